//! Collaborator interface required by [`Transaction`](crate::Transaction).
//!
//! The state machine owns only the packed state word. Undo log storage, map
//! storage, metadata persistence, id reclamation and snapshot pinning belong to
//! the store; the transaction hands work to it through this trait and keeps
//! the word as the single record of where the transaction is.

use mvtx_error::Result;
use mvtx_types::{Change, LogId, MapId, TxnId, TxnMeta, TxnStatus, VersionedValue};

use crate::state::TxnState;

/// Registry, undo log, and map storage behind a set of transactions.
///
/// Methods receiving a [`TxnState`] are invoked by the thread driving that
/// transaction; implementations may advance its status (`commit` and
/// `end_transaction` must).
pub trait TransactionStore: Send + Sync + Sized + 'static {
    /// Token keeping the versions needed by one statement alive.
    type VersionPin: Send;

    /// Lazy, single-pass change sequence; see [`TransactionStore::changes`].
    type Changes<'a>: Iterator<Item = Result<Change>>
    where
        Self: 'a;

    // === Undo log ===

    /// Record the value `key` held in `map_id` before the write logged at
    /// `log_id`.
    fn log(
        &self,
        txn: &TxnState,
        log_id: LogId,
        map_id: MapId,
        key: &[u8],
        old_value: Option<&VersionedValue>,
    ) -> Result<()>;

    /// Discard the entry at `log_id`.
    fn log_undo(&self, txn: &TxnState, log_id: LogId) -> Result<()>;

    /// Replay entries `to..from` most-recent-first, restoring each key's
    /// previous value (or deleting it for an insert).
    fn rollback_to(&self, txn: &TxnState, from: LogId, to: LogId) -> Result<()>;

    /// Change records `to..from`, most-recent-first, produced on demand.
    fn changes(&self, txn: &TxnState, from: LogId, to: LogId) -> Self::Changes<'_>;

    // === Registry ===

    /// Persist id, name and status for crash recovery.
    fn store_transaction(&self, meta: &TxnMeta) -> Result<()>;

    /// Make entries `0..log_id` permanently visible, pass through COMMITTED
    /// and end the transaction. `prior` is the status before COMMITTING.
    fn commit(&self, txn: &TxnState, log_id: LogId, prior: TxnStatus) -> Result<()>;

    /// Move the transaction from `final_status` to CLOSED and free its id.
    fn end_transaction(&self, txn: &TxnState, final_status: TxnStatus) -> Result<()>;

    /// Current status of another transaction, `None` if its id is free.
    fn status_of(&self, txn_id: TxnId) -> Option<TxnStatus>;

    // === Maps ===

    /// Open (creating if needed) the map called `name`.
    fn open_map(&self, name: &str) -> Result<MapId>;

    fn remove_map(&self, map_id: MapId) -> Result<()>;

    fn map_get(&self, map_id: MapId, key: &[u8]) -> Result<Option<VersionedValue>>;

    /// Replace the entry for `key` with `new` if it still equals `expected`.
    /// Returns `false` without writing when it does not.
    fn map_replace(
        &self,
        map_id: MapId,
        key: &[u8],
        expected: Option<&VersionedValue>,
        new: VersionedValue,
    ) -> Result<bool>;

    // === Version pinning ===

    fn register_version_usage(&self) -> Self::VersionPin;

    fn deregister_version_usage(&self, pin: Self::VersionPin);
}
