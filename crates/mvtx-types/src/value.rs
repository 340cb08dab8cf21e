//! Map-level value types: versioned values, undo change records, and
//! persisted transaction metadata.

use crate::{MapId, OperationId, TxnId, TxnStatus};

/// Value stored in a transactional map.
///
/// `operation_id` is `None` once the value is committed. While a writer
/// holds the entry, `value` is the writer's (possibly absent, i.e. deleted)
/// value and `committed_value` is what everyone else still sees.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct VersionedValue {
    pub operation_id: Option<OperationId>,
    pub value: Option<Vec<u8>>,
    pub committed_value: Option<Vec<u8>>,
}

impl VersionedValue {
    /// A committed value.
    #[must_use]
    pub const fn committed(value: Vec<u8>) -> Self {
        Self {
            operation_id: None,
            value: Some(value),
            committed_value: None,
        }
    }

    /// An uncommitted write by `operation_id`.
    #[must_use]
    pub const fn uncommitted(
        operation_id: OperationId,
        value: Option<Vec<u8>>,
        committed_value: Option<Vec<u8>>,
    ) -> Self {
        Self {
            operation_id: Some(operation_id),
            value,
            committed_value,
        }
    }

    #[must_use]
    pub const fn is_committed(&self) -> bool {
        self.operation_id.is_none()
    }

    /// Transaction holding this entry, if uncommitted.
    #[must_use]
    pub fn writer(&self) -> Option<TxnId> {
        self.operation_id.map(OperationId::txn_id)
    }

    /// The latest value, committed or not.
    #[must_use]
    pub fn current_value(&self) -> Option<&[u8]> {
        self.value.as_deref()
    }
}

/// One undo log record as seen by callers: the value `key` held in map
/// `map_id` immediately before the logged write (`None` for an insert).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub map_id: MapId,
    pub key: Vec<u8>,
    pub old_value: Option<Vec<u8>>,
}

/// Transaction metadata persisted for crash recovery.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TxnMeta {
    pub id: TxnId,
    pub status: TxnStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LogId;

    #[test]
    fn test_committed_value_has_no_writer() {
        let v = VersionedValue::committed(b"a".to_vec());
        assert!(v.is_committed());
        assert_eq!(v.writer(), None);
        assert_eq!(v.current_value(), Some(&b"a"[..]));
    }

    #[test]
    fn test_uncommitted_tombstone() {
        let txn = TxnId::new(2).unwrap();
        let op = OperationId::new(txn, LogId::new(1).unwrap());
        let v = VersionedValue::uncommitted(op, None, Some(b"old".to_vec()));
        assert!(!v.is_committed());
        assert_eq!(v.writer(), Some(txn));
        assert_eq!(v.current_value(), None);
        assert_eq!(v.committed_value.as_deref(), Some(&b"old"[..]));
    }

    #[test]
    fn test_meta_json_shape() {
        let meta = TxnMeta {
            id: TxnId::new(4).unwrap(),
            status: TxnStatus::Prepared,
            name: Some("xa-1".to_owned()),
        };
        let json = serde_json::to_string(&meta).unwrap();
        assert_eq!(json, r#"{"id":4,"status":"Prepared","name":"xa-1"}"#);
        let back: TxnMeta = serde_json::from_str(&json).unwrap();
        assert_eq!(back, meta);

        let unnamed: TxnMeta = serde_json::from_str(r#"{"id":1,"status":"Committing"}"#).unwrap();
        assert_eq!(unnamed.name, None);
    }
}
