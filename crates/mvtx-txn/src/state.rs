//! The atomic state word of one transaction.
//!
//! [`TxnState`] owns the packed word and is the single source of truth for
//! where a transaction is in its lifecycle. Exactly one thread drives a
//! transaction's transitions and log position; any number of threads may read
//! its status concurrently through a [`StatusView`].

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use mvtx_error::{MvtxError, Result};
use mvtx_types::{LogId, TxnId, TxnStatus};

use crate::packed::{PackedState, log_id_bits};
use crate::transition::is_valid_transition;

/// Identity plus packed state word of a transaction.
pub struct TxnState {
    id: TxnId,
    word: AtomicU64,
}

impl TxnState {
    /// Create the state word for a transaction in `status` at `log_id`.
    /// The rollback flag always starts cleared.
    #[must_use]
    pub fn new(id: TxnId, status: TxnStatus, log_id: LogId) -> Self {
        Self {
            id,
            word: AtomicU64::new(PackedState::new(status, log_id, false).compose()),
        }
    }

    #[inline]
    #[must_use]
    pub const fn id(&self) -> TxnId {
        self.id
    }

    /// Snapshot of the whole word.
    #[inline]
    #[must_use]
    pub fn load(&self) -> PackedState {
        PackedState::decode(self.word.load(Ordering::Acquire))
    }

    #[inline]
    #[must_use]
    pub fn status(&self) -> TxnStatus {
        self.load().status
    }

    #[inline]
    #[must_use]
    pub fn log_id(&self) -> LogId {
        self.load().log_id
    }

    #[inline]
    #[must_use]
    pub fn has_rollback(&self) -> bool {
        self.load().has_rollback
    }

    /// Move to `status`, returning the state observed just before the change.
    ///
    /// Log position and rollback flag are carried over unchanged. A CAS miss
    /// re-reads and re-validates; an invalid transition fails without touching
    /// the word.
    pub fn set_status(&self, status: TxnStatus) -> Result<PackedState> {
        let mut current_word = self.word.load(Ordering::Acquire);
        loop {
            let current = PackedState::decode(current_word);
            if !is_valid_transition(current.status, status) {
                return Err(MvtxError::illegal_transition(
                    self.id.get(),
                    current.status.name(),
                    status.name(),
                ));
            }
            let new_word = current.with_status(status).compose();
            match self.word.compare_exchange_weak(
                current_word,
                new_word,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    tracing::trace!(
                        target: "mvtx::txn",
                        txn_id = %self.id,
                        from = %current.status,
                        to = %status,
                        log_id = %current.log_id,
                        "status transition"
                    );
                    return Ok(current);
                }
                Err(observed) => {
                    tracing::trace!(target: "mvtx::txn", txn_id = %self.id, "status CAS retry");
                    current_word = observed;
                }
            }
        }
    }

    /// Advance the log position by one, returning the position before the
    /// increment (the slot the caller now owns).
    ///
    /// # Panics
    ///
    /// Panics if the position would leave the 40-bit field.
    pub fn increment_log_id(&self) -> LogId {
        let previous = self
            .word
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |word| {
                let state = PackedState::decode(word);
                state.log_id.checked_next().map(|next| {
                    PackedState {
                        log_id: next,
                        ..state
                    }
                    .compose()
                })
            })
            .unwrap_or_else(|word| {
                panic!(
                    "transaction {} undo log position overflow at {}",
                    self.id,
                    PackedState::decode(word).log_id
                )
            });
        PackedState::decode(previous).log_id
    }

    /// Step the log position back by one, returning the new position (the
    /// slot being released).
    ///
    /// # Panics
    ///
    /// Panics if the position is already zero.
    pub fn decrement_log_id(&self) -> LogId {
        let previous = self
            .word
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |word| {
                let state = PackedState::decode(word);
                state.log_id.checked_prev().map(|prev| {
                    PackedState {
                        log_id: prev,
                        ..state
                    }
                    .compose()
                })
            })
            .unwrap_or_else(|_| panic!("transaction {} undo log position underflow", self.id));
        LogId::new(log_id_bits(previous) - 1).unwrap_or(LogId::ZERO)
    }

    /// Single CAS from exactly `expected` to `new`, no retry.
    ///
    /// Returns `false` if the word no longer equals `expected`.
    pub fn compare_and_set(&self, expected: PackedState, new: PackedState) -> bool {
        self.word
            .compare_exchange(
                expected.compose(),
                new.compose(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Fail with [`MvtxError::TransactionClosed`] if the status is CLOSED.
    pub fn check_not_closed(&self) -> Result<()> {
        if self.status() == TxnStatus::Closed {
            return Err(MvtxError::TransactionClosed {
                txn_id: self.id.get(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for TxnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.load();
        write!(f, "{} {} {}", self.id, state.status, state.log_id)
    }
}

impl fmt::Debug for TxnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.load();
        f.debug_struct("TxnState")
            .field("id", &self.id)
            .field("status", &state.status)
            .field("log_id", &state.log_id)
            .field("has_rollback", &state.has_rollback)
            .finish()
    }
}

/// Read-only, freely shareable view of a transaction's state word.
#[derive(Clone)]
pub struct StatusView {
    state: Arc<TxnState>,
}

impl StatusView {
    pub(crate) const fn new(state: Arc<TxnState>) -> Self {
        Self { state }
    }

    #[must_use]
    pub fn id(&self) -> TxnId {
        self.state.id()
    }

    #[must_use]
    pub fn status(&self) -> TxnStatus {
        self.state.status()
    }

    #[must_use]
    pub fn log_id(&self) -> LogId {
        self.state.log_id()
    }

    #[must_use]
    pub fn has_rollback(&self) -> bool {
        self.state.has_rollback()
    }

    /// Whether both views observe the same transaction object.
    #[must_use]
    pub fn same_transaction(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

impl fmt::Debug for StatusView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.state, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn txn(n: u32) -> TxnId {
        TxnId::new(n).unwrap()
    }

    fn log(n: u64) -> LogId {
        LogId::new(n).unwrap()
    }

    #[test]
    fn test_new_state() {
        let state = TxnState::new(txn(1), TxnStatus::Open, log(4));
        assert_eq!(state.status(), TxnStatus::Open);
        assert_eq!(state.log_id(), log(4));
        assert!(!state.has_rollback());
        assert_eq!(state.to_string(), "1 OPEN 4");
    }

    #[test]
    fn test_set_status_returns_prior_state() {
        let state = TxnState::new(txn(1), TxnStatus::Open, log(3));
        let prior = state.set_status(TxnStatus::Committing).unwrap();
        assert_eq!(prior.status, TxnStatus::Open);
        assert_eq!(prior.log_id, log(3));
        assert_eq!(state.status(), TxnStatus::Committing);
        assert_eq!(state.log_id(), log(3));
    }

    #[test]
    fn test_invalid_transition_leaves_word_unchanged() {
        let state = TxnState::new(txn(2), TxnStatus::Open, log(1));
        let before = state.load();
        let err = state.set_status(TxnStatus::Committed).unwrap_err();
        assert!(matches!(
            err,
            MvtxError::IllegalTransition {
                txn_id: 2,
                from: "OPEN",
                to: "COMMITTED"
            }
        ));
        assert_eq!(state.load(), before);
    }

    #[test]
    fn test_log_counters() {
        let state = TxnState::new(txn(1), TxnStatus::Open, LogId::ZERO);
        assert_eq!(state.increment_log_id(), log(0));
        assert_eq!(state.increment_log_id(), log(1));
        assert_eq!(state.increment_log_id(), log(2));
        assert_eq!(state.log_id(), log(3));
        assert_eq!(state.decrement_log_id(), log(2));
        assert_eq!(state.log_id(), log(2));
        assert_eq!(state.status(), TxnStatus::Open);
    }

    #[test]
    #[should_panic(expected = "overflow")]
    fn test_log_overflow_is_fatal() {
        let state = TxnState::new(txn(1), TxnStatus::Open, LogId::MAX);
        let _ = state.increment_log_id();
    }

    #[test]
    #[should_panic(expected = "underflow")]
    fn test_log_underflow_is_fatal() {
        let state = TxnState::new(txn(1), TxnStatus::Open, LogId::ZERO);
        let _ = state.decrement_log_id();
    }

    #[test]
    fn test_compare_and_set_is_exact() {
        let state = TxnState::new(txn(1), TxnStatus::Open, log(2));
        let stale = PackedState::new(TxnStatus::Open, log(1), false);
        let target = PackedState::new(TxnStatus::Open, log(0), true);
        assert!(!state.compare_and_set(stale, target));
        assert!(state.compare_and_set(state.load(), target));
        assert_eq!(state.load(), target);
    }

    #[test]
    fn test_check_not_closed() {
        let state = TxnState::new(txn(5), TxnStatus::Closed, LogId::ZERO);
        assert!(matches!(
            state.check_not_closed(),
            Err(MvtxError::TransactionClosed { txn_id: 5 })
        ));
        state.set_status(TxnStatus::Open).unwrap();
        assert!(state.check_not_closed().is_ok());
    }

    #[test]
    fn test_status_view_tracks_owner() {
        let state = Arc::new(TxnState::new(txn(1), TxnStatus::Open, LogId::ZERO));
        let view = StatusView::new(Arc::clone(&state));
        state.set_status(TxnStatus::Prepared).unwrap();
        assert_eq!(view.status(), TxnStatus::Prepared);
        assert!(view.same_transaction(&view.clone()));
    }

    proptest! {
        #[test]
        fn prop_transitions_follow_table(steps in proptest::collection::vec(0_u8..7, 1..40)) {
            let state = TxnState::new(txn(1), TxnStatus::Open, log(7));
            for code in steps {
                let to = TxnStatus::from_code(code).unwrap();
                let before = state.load();
                let result = state.set_status(to);
                if is_valid_transition(before.status, to) {
                    prop_assert_eq!(result.unwrap(), before);
                    prop_assert_eq!(state.status(), to);
                } else {
                    prop_assert!(result.unwrap_err().is_state_violation());
                    prop_assert_eq!(state.load(), before);
                }
                prop_assert_eq!(state.log_id(), log(7));
            }
        }

        #[test]
        fn prop_log_then_undo((n, k) in (0_u64..64).prop_flat_map(|n| (Just(n), 0..=n))) {
            let state = TxnState::new(txn(1), TxnStatus::Open, LogId::ZERO);
            for _ in 0..n {
                let _ = state.increment_log_id();
            }
            prop_assert_eq!(state.log_id(), log(n));
            for _ in 0..k {
                let _ = state.decrement_log_id();
            }
            prop_assert_eq!(state.log_id(), log(n - k));
        }
    }
}
