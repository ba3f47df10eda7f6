use serde::{Deserialize, Serialize};
use std::fmt;

/// Log sequence number assigned by the source to every logged change.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Lsn(pub u64);

impl Lsn {
    pub const ZERO: Lsn = Lsn(0);

    pub fn next(self) -> Lsn {
        Lsn(self.0.saturating_add(1))
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Position of a single change inside the change stream.
///
/// Ordered by the commit LSN of the owning transaction first, then by the
/// LSN of the change inside that transaction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    pub commit_lsn: Lsn,
    pub change_lsn: Lsn,
}

impl Position {
    /// Sorts before every logged change.
    pub const ZERO: Position = Position {
        commit_lsn: Lsn::ZERO,
        change_lsn: Lsn::ZERO,
    };

    pub fn new(commit_lsn: u64, change_lsn: u64) -> Self {
        Self {
            commit_lsn: Lsn(commit_lsn),
            change_lsn: Lsn(change_lsn),
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.commit_lsn, self.change_lsn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_by_commit_then_change() {
        let a = Position::new(10, 11);
        let b = Position::new(10, 12);
        let c = Position::new(20, 1);

        assert!(a < b);
        assert!(b < c);
        assert!(Position::ZERO < a);
    }

    #[test]
    fn displays_as_hex_pair() {
        assert_eq!(Position::new(1, 255).to_string(), "0000000000000001:00000000000000ff");
    }
}
