//! Transaction-scoped map view.
//!
//! Every write goes through the owning transaction's undo log: the previous
//! versioned value is logged first, then the entry is swapped by CAS. If the
//! swap loses (the entry changed after it was read) or the store fails, the
//! log entry is unwound with [`Transaction::log_undo`].

use mvtx_error::{MvtxError, Result};
use mvtx_types::{MapId, OperationId, TxnStatus, VersionedValue};

use crate::store::TransactionStore;
use crate::transaction::Transaction;

/// A map opened by one transaction.
pub struct TransactionMap<'t, S: TransactionStore> {
    txn: &'t Transaction<S>,
    map_id: MapId,
    name: String,
}

impl<'t, S: TransactionStore> TransactionMap<'t, S> {
    pub(crate) const fn new(txn: &'t Transaction<S>, map_id: MapId, name: String) -> Self {
        Self { txn, map_id, name }
    }

    #[must_use]
    pub const fn id(&self) -> MapId {
        self.map_id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Value of `key` as seen by this transaction.
    ///
    /// Own uncommitted writes are visible; another writer's value is visible
    /// once that writer is COMMITTED, otherwise its `committed_value` is
    /// returned. An entry whose writer has already ended is read again.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let Some(entry) = self.txn.store().map_get(self.map_id, key)? else {
            return Ok(None);
        };
        self.visible_value(key, entry)
    }

    pub fn contains_key(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Set `key` to `value`, returning the value previously visible to this
    /// transaction.
    pub fn put(&self, key: &[u8], value: Vec<u8>) -> Result<Option<Vec<u8>>> {
        self.set(key, Some(value))
    }

    /// Delete `key`, returning the value previously visible to this
    /// transaction.
    pub fn remove(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.set(key, None)
    }

    fn visible_value(&self, key: &[u8], mut entry: VersionedValue) -> Result<Option<Vec<u8>>> {
        let store = self.txn.store();
        loop {
            let Some(writer) = entry.writer() else {
                return Ok(entry.value);
            };
            if writer == self.txn.id() {
                return Ok(entry.value);
            }
            match store.status_of(writer) {
                Some(TxnStatus::Closed) | None => {}
                Some(status) if status.is_committed() => return Ok(entry.value),
                Some(_) => return Ok(entry.committed_value),
            }
            // The writer ended after the entry was read; its entries have
            // been settled since, so read again.
            let Some(current) = store.map_get(self.map_id, key)? else {
                return Ok(None);
            };
            if current == entry {
                return Ok(entry.value);
            }
            entry = current;
        }
    }

    fn set(&self, key: &[u8], value: Option<Vec<u8>>) -> Result<Option<Vec<u8>>> {
        self.txn.check_not_closed()?;
        let store = self.txn.store();
        let current = store.map_get(self.map_id, key)?;

        let (previous, committed_value) = match &current {
            None => (None, None),
            Some(entry) => match entry.writer() {
                None => (entry.value.clone(), entry.value.clone()),
                Some(writer) if writer == self.txn.id() => {
                    (entry.value.clone(), entry.committed_value.clone())
                }
                Some(writer) => {
                    return Err(MvtxError::WriteConflict {
                        map_id: self.map_id.get(),
                        holder: writer.get(),
                    });
                }
            },
        };

        let log_id = self.txn.log(self.map_id, key, current.as_ref())?;
        let new = VersionedValue::uncommitted(
            OperationId::new(self.txn.id(), log_id),
            value,
            committed_value,
        );
        match store.map_replace(self.map_id, key, current.as_ref(), new) {
            Ok(true) => Ok(previous),
            Ok(false) => {
                self.txn.log_undo()?;
                let holder = store
                    .map_get(self.map_id, key)?
                    .and_then(|entry| entry.writer())
                    .map_or(0, |writer| writer.get());
                Err(MvtxError::WriteConflict {
                    map_id: self.map_id.get(),
                    holder,
                })
            }
            Err(err) => {
                self.txn.log_undo()?;
                Err(err)
            }
        }
    }
}

impl<S: TransactionStore> std::fmt::Debug for TransactionMap<'_, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionMap")
            .field("txn_id", &self.txn.id())
            .field("map_id", &self.map_id)
            .field("name", &self.name)
            .finish()
    }
}
