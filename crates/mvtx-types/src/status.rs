//! Transaction lifecycle status.

use std::fmt;

/// Lifecycle status of a transaction.
///
/// Codes are stable: they are packed into the transaction state word and
/// persisted in transaction metadata.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[repr(u8)]
pub enum TxnStatus {
    /// Committed or rolled back; the id may be reused.
    Closed = 0,
    /// Reading and writing.
    Open = 1,
    /// Prepared for commit; can only be committed or fully rolled back.
    Prepared = 2,
    /// Being committed, possibly not finished. A store closed mid-commit
    /// recovers transactions in this status and commits them again.
    Committing = 3,
    /// Logically committed: other transactions already see its changes,
    /// but undo entries may remain and the id is not yet reusable.
    Committed = 4,
    /// Rolling back to a savepoint.
    RollingBack = 5,
    /// Rolled back completely, undo cleanup not yet finished.
    RolledBack = 6,
}

impl TxnStatus {
    /// All statuses in code order.
    pub const ALL: [Self; 7] = [
        Self::Closed,
        Self::Open,
        Self::Prepared,
        Self::Committing,
        Self::Committed,
        Self::RollingBack,
        Self::RolledBack,
    ];

    /// Numeric code.
    #[inline]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Decode a numeric code.
    #[inline]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Closed),
            1 => Some(Self::Open),
            2 => Some(Self::Prepared),
            3 => Some(Self::Committing),
            4 => Some(Self::Committed),
            5 => Some(Self::RollingBack),
            6 => Some(Self::RolledBack),
            _ => None,
        }
    }

    /// Canonical upper-case name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::Prepared => "PREPARED",
            Self::Committing => "COMMITTING",
            Self::Committed => "COMMITTED",
            Self::RollingBack => "ROLLING_BACK",
            Self::RolledBack => "ROLLED_BACK",
        }
    }

    /// Waypoints only ever held while the owning thread is inside a
    /// rollback.
    pub const fn is_internal(self) -> bool {
        matches!(self, Self::RollingBack | Self::RolledBack)
    }

    /// Whether a writer in this status has already made its changes visible.
    pub const fn is_committed(self) -> bool {
        matches!(self, Self::Committed | Self::Closed)
    }
}

impl fmt::Display for TxnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
