use thiserror::Error;

/// Primary error type for mvtx transaction operations.
///
/// Identifiers are carried as raw integers and statuses as their canonical
/// names so this crate stays below `mvtx-types` in the dependency graph.
#[derive(Error, Debug)]
pub enum MvtxError {
    // === Transaction State Errors ===
    /// A status change was requested that the transition table forbids.
    #[error("transaction {txn_id} was illegally transitioned from {from} to {to}")]
    IllegalTransition {
        txn_id: u32,
        from: &'static str,
        to: &'static str,
    },

    /// The owning thread lost the single-writer race during a savepoint
    /// rollback: the state word changed while undo replay was running.
    #[error("transaction {txn_id} concurrently modified while rollback to savepoint was in progress")]
    ConcurrentModification { txn_id: u32 },

    /// Operation requires an open or prepared transaction.
    #[error("transaction {txn_id} is closed")]
    TransactionClosed { txn_id: u32 },

    /// Savepoint lies beyond the transaction's current undo log position.
    #[error("savepoint {savepoint} is ahead of transaction {txn_id} log position {log_id}")]
    InvalidSavepoint {
        txn_id: u32,
        savepoint: u64,
        log_id: u64,
    },

    // === Registry Errors ===
    /// Every transaction id is in use.
    #[error("there are {max} open transactions")]
    TooManyTransactions { max: u32 },

    /// Store configuration rejected at open time.
    #[error("invalid store configuration: {detail}")]
    InvalidConfig { detail: String },

    // === Map Errors ===
    /// Key is held by another uncommitted writer.
    #[error("write conflict in map {map_id}: entry locked by transaction {holder}")]
    WriteConflict { map_id: u32, holder: u32 },

    /// Map does not exist (or was removed).
    #[error("no such map: {name}")]
    NoSuchMap { name: String },

    // === Undo Log / Metadata Errors ===
    /// Undo log is missing an entry or contains an inconsistent one.
    #[error("undo log corrupt: {detail}")]
    UndoLogCorrupt { detail: String },

    /// Persisted transaction metadata could not be decoded.
    #[error("transaction metadata corrupt: {detail}")]
    MetadataCorrupt { detail: String },

    // === I/O Errors ===
    /// Collaborator I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Internal Errors ===
    /// Internal logic error (should never happen).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Numeric error codes shared with the storage layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    /// Reading from the backing store failed.
    ReadingFailed = 1,
    /// Writing to the backing store failed.
    WritingFailed = 2,
    /// Internal logic error.
    Internal = 3,
    /// Object is closed.
    Closed = 4,
    /// Persisted bytes could not be decoded.
    Corrupt = 6,
    /// Undo log is corrupt.
    TransactionCorrupt = 100,
    /// Entry is locked by another transaction.
    TransactionLocked = 101,
    /// No transaction id is free.
    TooManyOpenTransactions = 102,
    /// Illegal transaction status change.
    TransactionIllegalState = 103,
}

impl MvtxError {
    /// Map this error to its numeric code.
    #[allow(clippy::match_same_arms)]
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::IllegalTransition { .. }
            | Self::ConcurrentModification { .. }
            | Self::InvalidSavepoint { .. } => ErrorCode::TransactionIllegalState,
            Self::TransactionClosed { .. } | Self::NoSuchMap { .. } => ErrorCode::Closed,
            Self::TooManyTransactions { .. } => ErrorCode::TooManyOpenTransactions,
            Self::WriteConflict { .. } => ErrorCode::TransactionLocked,
            Self::UndoLogCorrupt { .. } => ErrorCode::TransactionCorrupt,
            Self::MetadataCorrupt { .. } => ErrorCode::Corrupt,
            Self::Io(_) => ErrorCode::WritingFailed,
            Self::InvalidConfig { .. } | Self::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Whether this error reports a violated lifecycle rule.
    pub const fn is_state_violation(&self) -> bool {
        matches!(
            self,
            Self::IllegalTransition { .. } | Self::ConcurrentModification { .. }
        )
    }

    /// Whether this is a transient error that may succeed on retry.
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::WriteConflict { .. } | Self::TooManyTransactions { .. }
        )
    }

    /// Create an illegal-transition error.
    pub const fn illegal_transition(txn_id: u32, from: &'static str, to: &'static str) -> Self {
        Self::IllegalTransition { txn_id, from, to }
    }

    /// Create an undo-log corruption error.
    pub fn undo_corrupt(detail: impl Into<String>) -> Self {
        Self::UndoLogCorrupt {
            detail: detail.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Result type alias using `MvtxError`.
pub type Result<T> = std::result::Result<T, MvtxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_illegal_transition() {
        let err = MvtxError::illegal_transition(7, "CLOSED", "PREPARED");
        assert_eq!(
            err.to_string(),
            "transaction 7 was illegally transitioned from CLOSED to PREPARED"
        );
    }

    #[test]
    fn test_error_display_concurrent_modification() {
        let err = MvtxError::ConcurrentModification { txn_id: 3 };
        assert_eq!(
            err.to_string(),
            "transaction 3 concurrently modified while rollback to savepoint was in progress"
        );
    }

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(
            MvtxError::illegal_transition(1, "OPEN", "COMMITTED").error_code(),
            ErrorCode::TransactionIllegalState
        );
        assert_eq!(
            MvtxError::ConcurrentModification { txn_id: 1 }.error_code(),
            ErrorCode::TransactionIllegalState
        );
        assert_eq!(
            MvtxError::TransactionClosed { txn_id: 1 }.error_code(),
            ErrorCode::Closed
        );
        assert_eq!(
            MvtxError::WriteConflict {
                map_id: 1,
                holder: 2
            }
            .error_code(),
            ErrorCode::TransactionLocked
        );
        assert_eq!(
            MvtxError::undo_corrupt("gap").error_code(),
            ErrorCode::TransactionCorrupt
        );
    }

    #[test]
    fn test_state_violation_kinds() {
        assert!(MvtxError::illegal_transition(1, "OPEN", "COMMITTED").is_state_violation());
        assert!(MvtxError::ConcurrentModification { txn_id: 1 }.is_state_violation());
        assert!(!MvtxError::TransactionClosed { txn_id: 1 }.is_state_violation());
        assert!(!MvtxError::internal("bug").is_state_violation());
    }

    #[test]
    fn test_is_transient() {
        assert!(
            MvtxError::WriteConflict {
                map_id: 4,
                holder: 9
            }
            .is_transient()
        );
        assert!(MvtxError::TooManyTransactions { max: 8 }.is_transient());
        assert!(!MvtxError::TransactionClosed { txn_id: 1 }.is_transient());
    }

    #[test]
    fn test_io_error_from() {
        let io_err = std::io::Error::other("disk gone");
        let err: MvtxError = io_err.into();
        assert!(matches!(err, MvtxError::Io(_)));
        assert_eq!(err.error_code(), ErrorCode::WritingFailed);
    }

    #[test]
    fn test_error_code_values() {
        assert_eq!(ErrorCode::Closed as i32, 4);
        assert_eq!(ErrorCode::TransactionLocked as i32, 101);
        assert_eq!(ErrorCode::TransactionIllegalState as i32, 103);
    }
}
