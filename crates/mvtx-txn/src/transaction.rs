//! Transaction handle: lifecycle orchestration over the packed state word.
//!
//! - [`Transaction`]: the single-writer handle. It is `Send` but not `Sync`,
//!   so exactly one thread at a time can drive transitions and the undo log
//!   position. Cross-thread status reads go through [`StatusView`].
//! - Commit, prepare and rollback validate and apply the status change here,
//!   then delegate the storage work to the [`TransactionStore`].

use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use mvtx_error::{MvtxError, Result};
use mvtx_types::{LogId, MapId, Savepoint, TxnId, TxnMeta, TxnStatus, VersionedValue};

use crate::map::TransactionMap;
use crate::packed::PackedState;
use crate::state::{StatusView, TxnState};
use crate::statement::StatementGuard;
use crate::store::TransactionStore;

/// A transaction over store `S`.
pub struct Transaction<S: TransactionStore> {
    store: Arc<S>,
    state: Arc<TxnState>,
    name: Option<String>,
    version_pin: Option<S::VersionPin>,
    _single_writer: PhantomData<Cell<()>>,
}

impl<S: TransactionStore> Transaction<S> {
    /// Construct a transaction handle. Called by the registry, either for a
    /// fresh transaction (OPEN, log id 0) or when reconstructing one from
    /// persisted metadata during recovery.
    #[must_use]
    pub fn new(
        store: Arc<S>,
        id: TxnId,
        status: TxnStatus,
        name: Option<String>,
        log_id: LogId,
    ) -> Self {
        tracing::debug!(target: "mvtx::txn", txn_id = %id, %status, %log_id, "transaction created");
        Self {
            store,
            state: Arc::new(TxnState::new(id, status, log_id)),
            name,
            version_pin: None,
            _single_writer: PhantomData,
        }
    }

    #[must_use]
    pub fn id(&self) -> TxnId {
        self.state.id()
    }

    /// Current status. Lock-free; never observes a torn word.
    #[must_use]
    pub fn status(&self) -> TxnStatus {
        self.state.status()
    }

    #[must_use]
    pub fn log_id(&self) -> LogId {
        self.state.log_id()
    }

    /// Whether any savepoint rollback has happened in this transaction.
    #[must_use]
    pub fn has_rollback(&self) -> bool {
        self.state.has_rollback()
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Shareable read-only view of this transaction's status.
    #[must_use]
    pub fn status_view(&self) -> StatusView {
        StatusView::new(Arc::clone(&self.state))
    }

    #[must_use]
    pub fn state(&self) -> &TxnState {
        &self.state
    }

    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Metadata as persisted by the store.
    #[must_use]
    pub fn meta(&self) -> TxnMeta {
        TxnMeta {
            id: self.id(),
            status: self.status(),
            name: self.name.clone(),
        }
    }

    /// Rename the transaction and persist the new metadata.
    pub fn set_name(&mut self, name: impl Into<String>) -> Result<()> {
        self.state.check_not_closed()?;
        self.name = Some(name.into());
        self.store.store_transaction(&self.meta())
    }

    pub fn check_not_closed(&self) -> Result<()> {
        self.state.check_not_closed()
    }

    // === Undo log position ===

    /// Take the next undo log slot and record `old_value` for `key` there.
    ///
    /// Returns the slot's position. If the store fails to record the entry,
    /// the slot is given back before the error is returned.
    pub fn log(
        &self,
        map_id: MapId,
        key: &[u8],
        old_value: Option<&VersionedValue>,
    ) -> Result<LogId> {
        let log_id = self.state.increment_log_id();
        tracing::trace!(target: "mvtx::txn", txn_id = %self.id(), %log_id, %map_id, "undo log append");
        if let Err(err) = self.store.log(&self.state, log_id, map_id, key, old_value) {
            let _ = self.state.decrement_log_id();
            return Err(err);
        }
        Ok(log_id)
    }

    /// Unwind the most recent undo log entry.
    pub fn log_undo(&self) -> Result<()> {
        let log_id = self.state.decrement_log_id();
        tracing::trace!(target: "mvtx::txn", txn_id = %self.id(), %log_id, "undo log entry discarded");
        self.store.log_undo(&self.state, log_id)
    }

    /// Current undo log position as a savepoint token.
    #[must_use]
    pub fn set_savepoint(&self) -> Savepoint {
        Savepoint::new(self.state.log_id())
    }

    // === Lifecycle ===

    /// Prepare for commit. Afterwards the transaction can only be committed
    /// or completely rolled back.
    pub fn prepare(&self) -> Result<()> {
        self.state.set_status(TxnStatus::Prepared)?;
        tracing::debug!(target: "mvtx::txn", txn_id = %self.id(), "transaction prepared");
        self.store.store_transaction(&self.meta())
    }

    /// Commit. Afterwards the transaction is closed and its id reusable.
    pub fn commit(&self) -> Result<()> {
        let last = self.state.set_status(TxnStatus::Committing)?;
        tracing::debug!(
            target: "mvtx::txn",
            txn_id = %self.id(),
            log_id = %last.log_id,
            prior = %last.status,
            "transaction committing"
        );
        self.store.commit(&self.state, last.log_id, last.status)
    }

    /// Undo every change made after `savepoint` and reopen the transaction.
    /// Only allowed while OPEN.
    ///
    /// The reopening CAS expects the exact word written when the rollback
    /// started; any other writer touching the word in between is a broken
    /// single-writer contract and fails with
    /// [`MvtxError::ConcurrentModification`].
    pub fn rollback_to_savepoint(&self, savepoint: Savepoint) -> Result<()> {
        let target = savepoint.log_id();
        let current = self.state.log_id();
        if target > current {
            return Err(MvtxError::InvalidSavepoint {
                txn_id: self.id().get(),
                savepoint: target.get(),
                log_id: current.get(),
            });
        }

        let last = self.state.set_status(TxnStatus::RollingBack)?;
        let from = last.log_id;
        tracing::debug!(target: "mvtx::txn", txn_id = %self.id(), %from, to = %target, "rollback to savepoint");
        let replay = self.store.rollback_to(&self.state, from, target);

        let expected = PackedState::new(TxnStatus::RollingBack, from, last.has_rollback);
        let reopened = PackedState::new(TxnStatus::Open, target, true);
        if !self.state.compare_and_set(expected, reopened) {
            tracing::error!(
                target: "mvtx::txn",
                txn_id = %self.id(),
                observed = ?self.state.load(),
                replay_failed = replay.is_err(),
                "state word changed during savepoint rollback"
            );
            return Err(MvtxError::ConcurrentModification {
                txn_id: self.id().get(),
            });
        }
        replay
    }

    /// Roll back completely. Afterwards the transaction is closed.
    ///
    /// Once ROLLED_BACK is set, the store is asked to end the transaction
    /// whether or not undo replay succeeded; a replay error is still
    /// returned.
    pub fn rollback(&self) -> Result<()> {
        let last = self.state.set_status(TxnStatus::RolledBack)?;
        tracing::debug!(target: "mvtx::txn", txn_id = %self.id(), log_id = %last.log_id, "transaction rolling back");
        let replay = if last.log_id > LogId::ZERO {
            self.store.rollback_to(&self.state, last.log_id, LogId::ZERO)
        } else {
            Ok(())
        };
        let end = self.store.end_transaction(&self.state, TxnStatus::RolledBack);
        match replay {
            Ok(()) => end,
            Err(err) => {
                tracing::warn!(
                    target: "mvtx::txn",
                    txn_id = %self.id(),
                    error = %err,
                    end_failed = end.is_err(),
                    "undo replay failed; transaction ended regardless"
                );
                Err(err)
            }
        }
    }

    /// Changes made after `savepoint`, latest first. Each change carries
    /// the value before it was applied. Single pass; not restartable.
    pub fn changes(&self, savepoint: Savepoint) -> S::Changes<'_> {
        self.store
            .changes(&self.state, self.state.log_id(), savepoint.log_id())
    }

    // === Maps ===

    /// Open the map called `name` bound to this transaction.
    pub fn open_map(&self, name: &str) -> Result<TransactionMap<'_, S>> {
        self.state.check_not_closed()?;
        let map_id = self.store.open_map(name)?;
        Ok(TransactionMap::new(self, map_id, name.to_owned()))
    }

    /// Remove the map's underlying storage.
    pub fn remove_map(&self, map: TransactionMap<'_, S>) -> Result<()> {
        self.store.remove_map(map.id())
    }

    // === Statement scope ===

    /// Pin the store's current versions for a new statement, releasing the
    /// previous statement's pin first.
    pub fn mark_statement_start(&mut self) {
        self.mark_statement_end();
        self.version_pin = Some(self.store.register_version_usage());
    }

    /// Release the statement pin, if any.
    pub fn mark_statement_end(&mut self) {
        if let Some(pin) = self.version_pin.take() {
            self.store.deregister_version_usage(pin);
        }
    }

    /// Start a statement whose pin is released when the guard drops.
    pub fn statement(&mut self) -> StatementGuard<'_, S> {
        self.mark_statement_start();
        StatementGuard::new(self)
    }

    #[must_use]
    pub const fn has_statement_pin(&self) -> bool {
        self.version_pin.is_some()
    }
}

impl<S: TransactionStore> Drop for Transaction<S> {
    fn drop(&mut self) {
        self.mark_statement_end();
    }
}

impl<S: TransactionStore> fmt::Display for Transaction<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.state, f)
    }
}

impl<S: TransactionStore> fmt::Debug for Transaction<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("state", &*self.state)
            .field("name", &self.name)
            .field("statement_pinned", &self.version_pin.is_some())
            .finish_non_exhaustive()
    }
}
