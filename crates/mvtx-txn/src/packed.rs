//! Packed transaction state word.
//!
//! A transaction's status, undo log position and rollback flag change
//! together, so they share one `u64` that is only ever replaced by CAS:
//!
//! ```text
//! bit  44      : a savepoint rollback has happened
//! bits 43..40  : status code
//! bits 39..0   : undo log position
//! ```

use mvtx_types::glossary::LOG_ID_BITS;
use mvtx_types::{LogId, TxnStatus};

/// Mask isolating the undo log position.
pub const LOG_ID_MASK: u64 = (1_u64 << LOG_ID_BITS) - 1;

/// Bit position where the status field begins.
pub const STATUS_SHIFT: u32 = LOG_ID_BITS;

/// Mask isolating the 4-bit status field.
pub const STATUS_MASK: u64 = 0b1111_u64 << STATUS_SHIFT;

/// Sticky flag set by the first savepoint rollback.
pub const ROLLBACK_FLAG: u64 = 1_u64 << (STATUS_SHIFT + 4);

/// Decoded form of the state word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PackedState {
    pub status: TxnStatus,
    pub log_id: LogId,
    pub has_rollback: bool,
}

impl PackedState {
    #[inline]
    #[must_use]
    pub const fn new(status: TxnStatus, log_id: LogId, has_rollback: bool) -> Self {
        Self {
            status,
            log_id,
            has_rollback,
        }
    }

    /// Encode into a state word.
    #[inline]
    #[must_use]
    pub const fn compose(self) -> u64 {
        let mut word = ((self.status.code() as u64) << STATUS_SHIFT) | self.log_id.get();
        if self.has_rollback {
            word |= ROLLBACK_FLAG;
        }
        word
    }

    /// Decode a word, or `None` if its status code is unknown or bits
    /// outside the three fields are set.
    #[inline]
    #[must_use]
    pub const fn try_decode(word: u64) -> Option<Self> {
        if word & !(LOG_ID_MASK | STATUS_MASK | ROLLBACK_FLAG) != 0 {
            return None;
        }
        let Some(status) = TxnStatus::from_code(status_code(word)) else {
            return None;
        };
        let Some(log_id) = LogId::new(word & LOG_ID_MASK) else {
            return None;
        };
        Some(Self {
            status,
            log_id,
            has_rollback: word & ROLLBACK_FLAG != 0,
        })
    }

    /// Decode a word produced by [`PackedState::compose`].
    ///
    /// # Panics
    ///
    /// Panics on a word no encoder could have produced; the state word is
    /// only written through `compose` and the log counters.
    #[inline]
    #[must_use]
    pub fn decode(word: u64) -> Self {
        Self::try_decode(word)
            .unwrap_or_else(|| panic!("corrupt transaction state word {word:#018x}"))
    }

    /// Same state with a different status.
    #[inline]
    #[must_use]
    pub const fn with_status(self, status: TxnStatus) -> Self {
        Self { status, ..self }
    }
}

/// Status code bits of a word.
#[inline]
#[must_use]
pub const fn status_code(word: u64) -> u8 {
    ((word & STATUS_MASK) >> STATUS_SHIFT) as u8
}

/// Undo log position of a word.
#[inline]
#[must_use]
pub const fn log_id_bits(word: u64) -> u64 {
    word & LOG_ID_MASK
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn log(n: u64) -> LogId {
        LogId::new(n).unwrap()
    }

    #[test]
    fn test_masks_are_disjoint() {
        assert_eq!(LOG_ID_MASK & STATUS_MASK, 0);
        assert_eq!(STATUS_MASK & ROLLBACK_FLAG, 0);
        assert_eq!(LOG_ID_MASK & ROLLBACK_FLAG, 0);
        assert_eq!(ROLLBACK_FLAG, 1 << 44);
    }

    #[test]
    fn test_compose_layout() {
        let word = PackedState::new(TxnStatus::Committing, log(5), false).compose();
        assert_eq!(word, (3 << 40) | 5);
        let word = PackedState::new(TxnStatus::Open, log(0), true).compose();
        assert_eq!(word, (1 << 44) | (1 << 40));
    }

    #[test]
    fn test_fresh_open_word() {
        let word = PackedState::new(TxnStatus::Open, LogId::ZERO, false).compose();
        let state = PackedState::decode(word);
        assert_eq!(state.status, TxnStatus::Open);
        assert_eq!(state.log_id, LogId::ZERO);
        assert!(!state.has_rollback);
    }

    #[test]
    fn test_max_log_id_does_not_touch_status() {
        let word = PackedState::new(TxnStatus::Prepared, LogId::MAX, false).compose();
        assert_eq!(status_code(word), TxnStatus::Prepared.code());
        assert_eq!(log_id_bits(word), LogId::MAX.get());
    }

    #[test]
    fn test_unknown_status_rejected() {
        assert_eq!(PackedState::try_decode(7 << 40), None);
        assert_eq!(PackedState::try_decode(15 << 40), None);
        assert_eq!(PackedState::try_decode(1 << 45), None);
    }

    #[test]
    #[should_panic(expected = "corrupt transaction state word")]
    fn test_decode_panics_on_garbage() {
        let _ = PackedState::decode(u64::MAX);
    }

    fn any_status() -> impl Strategy<Value = TxnStatus> {
        proptest::sample::select(TxnStatus::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn prop_decode_inverts_compose(
            status in any_status(),
            raw_log in 0_u64..=LogId::MAX.get(),
            flag in any::<bool>(),
        ) {
            let state = PackedState::new(status, log(raw_log), flag);
            let word = state.compose();
            prop_assert_eq!(PackedState::decode(word), state);
            prop_assert_eq!(PackedState::decode(word).compose(), word);
        }
    }
}
