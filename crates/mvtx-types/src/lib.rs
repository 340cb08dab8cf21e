//! Shared types for the mvtx transaction core.
//!
//! Identifiers live in [`glossary`], the lifecycle status enum in
//! [`status`], and the map-level value types in [`value`].

pub mod glossary;
pub mod status;
pub mod value;

pub use glossary::{InvalidTxnId, LogId, MapId, OperationId, Savepoint, TxnId};
pub use status::TxnStatus;
pub use value::{Change, TxnMeta, VersionedValue};
