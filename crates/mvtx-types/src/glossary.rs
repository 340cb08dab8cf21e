//! Identifier types.
//!
//! A transaction's writes are tagged with an [`OperationId`], which packs the
//! writer's [`TxnId`] above its undo [`LogId`]. The bit budgets below keep that
//! composition inside one `u64`.

use std::fmt;
use std::num::NonZeroU32;

/// Number of bits reserved for an undo log position.
pub const LOG_ID_BITS: u32 = 40;

/// Number of bits reserved for a transaction id inside an [`OperationId`].
pub const TXN_ID_BITS: u32 = 24;

/// Small positive transaction identifier, unique among open transactions.
///
/// Domain: `1..=(2^24 - 1)`. Ids are handed out and reclaimed by the
/// transaction registry.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct TxnId(NonZeroU32);

impl TxnId {
    /// Maximum raw value representable by a transaction id.
    pub const MAX_RAW: u32 = (1_u32 << TXN_ID_BITS) - 1;

    /// Construct a `TxnId` if `raw` is in-domain.
    #[inline]
    pub const fn new(raw: u32) -> Option<Self> {
        if raw > Self::MAX_RAW {
            return None;
        }
        match NonZeroU32::new(raw) {
            Some(nz) => Some(Self(nz)),
            None => None,
        }
    }

    /// Get the raw value.
    #[inline]
    pub const fn get(self) -> u32 {
        self.0.get()
    }

    /// Zero-based slot index for registry tables.
    #[inline]
    pub const fn index(self) -> usize {
        (self.0.get() - 1) as usize
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get())
    }
}

impl TryFrom<u32> for TxnId {
    type Error = InvalidTxnId;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(InvalidTxnId { raw: value })
    }
}

/// Error returned when attempting to construct an out-of-domain `TxnId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTxnId {
    raw: u32,
}

impl fmt::Display for InvalidTxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid TxnId {} (must satisfy 1 <= id <= {})",
            self.raw,
            TxnId::MAX_RAW
        )
    }
}

impl std::error::Error for InvalidTxnId {}

/// Position in a transaction's undo log.
///
/// Positions count entries: a transaction with log id `n` has written
/// entries `0..n`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    serde::Serialize,
    serde::Deserialize,
)]
#[repr(transparent)]
pub struct LogId(u64);

impl LogId {
    /// Start of every undo log.
    pub const ZERO: Self = Self(0);

    /// Largest position the packed state word can hold.
    pub const MAX: Self = Self((1_u64 << LOG_ID_BITS) - 1);

    /// Construct a `LogId` if `raw` fits in [`LOG_ID_BITS`].
    #[inline]
    pub const fn new(raw: u64) -> Option<Self> {
        if raw > Self::MAX.0 {
            None
        } else {
            Some(Self(raw))
        }
    }

    /// Get the raw value.
    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// The next position, or `None` at [`LogId::MAX`].
    #[inline]
    pub const fn checked_next(self) -> Option<Self> {
        Self::new(self.0 + 1)
    }

    /// The previous position, or `None` at zero.
    #[inline]
    pub const fn checked_prev(self) -> Option<Self> {
        match self.0.checked_sub(1) {
            Some(raw) => Some(Self(raw)),
            None => None,
        }
    }
}

impl fmt::Display for LogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a map in the underlying store.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct MapId(u32);

impl MapId {
    #[inline]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for MapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Writer tag of an uncommitted value: `(txn_id << 40) | log_id`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct OperationId(u64);

impl OperationId {
    #[inline]
    pub const fn new(txn_id: TxnId, log_id: LogId) -> Self {
        Self(((txn_id.get() as u64) << LOG_ID_BITS) | log_id.get())
    }

    /// The writing transaction.
    #[inline]
    pub const fn txn_id(self) -> TxnId {
        // The high bits were produced from a valid TxnId.
        match TxnId::new((self.0 >> LOG_ID_BITS) as u32) {
            Some(id) => id,
            None => panic!("operation id without a transaction id"),
        }
    }

    /// Undo log position of the write.
    #[inline]
    pub const fn log_id(self) -> LogId {
        LogId(self.0 & LogId::MAX.0)
    }

    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txn_id(), self.log_id())
    }
}

/// Opaque savepoint token: the undo log position at the time it was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Savepoint(LogId);

impl Savepoint {
    /// Savepoint at the very start of a transaction.
    pub const START: Self = Self(LogId::ZERO);

    #[inline]
    pub const fn new(log_id: LogId) -> Self {
        Self(log_id)
    }

    #[inline]
    pub const fn log_id(self) -> LogId {
        self.0
    }
}
