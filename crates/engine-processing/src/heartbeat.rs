use std::time::Duration;
use tokio::time::Instant;

/// Decides when a heartbeat record is due.
///
/// A heartbeat is only due when the position advanced without any record
/// carrying the new offset and the interval elapsed since the last record.
#[derive(Debug)]
pub struct Heartbeat {
    interval: Duration,
    last_emitted: Instant,
    pending: bool,
}

impl Heartbeat {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emitted: Instant::now(),
            pending: false,
        }
    }

    /// The position moved without a record being emitted.
    pub fn mark_pending(&mut self) {
        self.pending = true;
    }

    /// A record carrying the current offset was emitted.
    pub fn mark_emitted(&mut self) {
        self.pending = false;
        self.last_emitted = Instant::now();
    }

    pub fn is_due(&self) -> bool {
        self.pending && self.last_emitted.elapsed() >= self.interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_advanced_position() {
        let heartbeat = Heartbeat::new(Duration::ZERO);
        assert!(!heartbeat.is_due());
    }

    #[test]
    fn due_after_interval_when_pending() {
        let mut heartbeat = Heartbeat::new(Duration::ZERO);
        heartbeat.mark_pending();
        assert!(heartbeat.is_due());

        heartbeat.mark_emitted();
        assert!(!heartbeat.is_due());
    }

    #[test]
    fn waits_for_interval() {
        let mut heartbeat = Heartbeat::new(Duration::from_secs(3600));
        heartbeat.mark_pending();
        assert!(!heartbeat.is_due());
    }
}
