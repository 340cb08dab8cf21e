//! Per-transaction state machine for a multi-version store.
//!
//! A transaction's status, undo log position and rollback flag live in one
//! packed atomic word ([`packed`]) that only changes by compare-and-swap,
//! validated against the transition table ([`transition`]). [`Transaction`]
//! drives the lifecycle and hands storage work to a [`TransactionStore`];
//! [`MemTransactionStore`] is the in-memory implementation.

pub mod config;
pub mod map;
pub mod memstore;
pub mod packed;
pub mod state;
pub mod statement;
pub mod store;
pub mod transaction;
pub mod transition;

pub use config::{DEFAULT_MAX_TRANSACTIONS, StoreConfig};
pub use map::TransactionMap;
pub use memstore::{ChangeIter, MemTransactionStore, VersionPin};
pub use packed::{LOG_ID_MASK, PackedState, ROLLBACK_FLAG, STATUS_MASK, STATUS_SHIFT};
pub use state::{StatusView, TxnState};
pub use statement::StatementGuard;
pub use store::TransactionStore;
pub use transaction::Transaction;
pub use transition::{allowed_sources, is_valid_transition};

pub use mvtx_error::{ErrorCode, MvtxError, Result};
pub use mvtx_types::{
    Change, LogId, MapId, OperationId, Savepoint, TxnId, TxnMeta, TxnStatus, VersionedValue,
};
