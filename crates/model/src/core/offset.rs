use crate::core::position::Position;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Resumable position in the change stream plus the task metadata needed to
/// resume exactly at that point.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offset {
    /// Position of the last change delivered with this offset.
    pub position: Position,
    /// True while an initial snapshot is still being emitted.
    pub snapshot_in_progress: bool,
    /// Transaction the last change belonged to, if any.
    pub transaction_id: Option<String>,
    /// Running count of events emitted inside the current transaction.
    pub event_serial: u64,
    pub ts: DateTime<Utc>,
}

impl Offset {
    pub fn new(position: Position) -> Self {
        Self {
            position,
            snapshot_in_progress: false,
            transaction_id: None,
            event_serial: 0,
            ts: Utc::now(),
        }
    }

    /// Whether a change at `position` has already been delivered by the
    /// time this offset was recorded.
    pub fn covers(&self, position: &Position) -> bool {
        *position <= self.position
    }
}
