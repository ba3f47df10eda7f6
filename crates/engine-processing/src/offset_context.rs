use chrono::Utc;
use model::core::{offset::Offset, position::Position};

/// Single owner of the position advanced while streaming.
#[derive(Debug, Clone)]
pub struct OffsetContext {
    offset: Offset,
}

impl OffsetContext {
    pub fn new(initial: Option<&Offset>) -> Self {
        let offset = initial
            .cloned()
            .unwrap_or_else(|| Offset::new(Position::ZERO));
        Self { offset }
    }

    pub fn position(&self) -> Position {
        self.offset.position
    }

    /// Moves past a data change and counts it within its transaction.
    pub fn advance_event(&mut self, position: Position, transaction_id: Option<&str>) {
        if self.offset.transaction_id.as_deref() != transaction_id {
            self.offset.transaction_id = transaction_id.map(str::to_string);
            self.offset.event_serial = 0;
        }
        self.offset.event_serial += 1;
        self.move_to(position);
    }

    /// Moves past a transaction boundary.
    pub fn commit_transaction(&mut self, position: Position) {
        self.offset.transaction_id = None;
        self.offset.event_serial = 0;
        self.move_to(position);
    }

    /// Moves past a change that does not count as an event.
    pub fn advance(&mut self, position: Position) {
        self.move_to(position);
    }

    pub fn set_snapshot_in_progress(&mut self, in_progress: bool) {
        self.offset.snapshot_in_progress = in_progress;
    }

    pub fn event_serial(&self) -> u64 {
        self.offset.event_serial
    }

    pub fn snapshot(&self) -> Offset {
        self.offset.clone()
    }

    fn move_to(&mut self, position: Position) {
        if position > self.offset.position {
            self.offset.position = position;
        }
        self.offset.ts = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_zero_without_offset() {
        let ctx = OffsetContext::new(None);
        assert!(ctx.position().is_zero());
    }

    #[test]
    fn counts_events_per_transaction() {
        let mut ctx = OffsetContext::new(None);
        ctx.advance_event(Position::new(2, 1), Some("tx-1"));
        ctx.advance_event(Position::new(2, 2), Some("tx-1"));
        assert_eq!(ctx.event_serial(), 2);

        ctx.commit_transaction(Position::new(2, 3));
        assert_eq!(ctx.event_serial(), 0);
        assert!(ctx.snapshot().transaction_id.is_none());

        ctx.advance_event(Position::new(4, 1), Some("tx-2"));
        let offset = ctx.snapshot();
        assert_eq!(offset.event_serial, 1);
        assert_eq!(offset.transaction_id.as_deref(), Some("tx-2"));
        assert_eq!(offset.position, Position::new(4, 1));
    }

    #[test]
    fn never_moves_backwards() {
        let mut ctx = OffsetContext::new(Some(&Offset::new(Position::new(9, 9))));
        ctx.advance(Position::new(3, 3));
        assert_eq!(ctx.position(), Position::new(9, 9));
    }
}
