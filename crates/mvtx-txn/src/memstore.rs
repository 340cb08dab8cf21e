//! In-memory [`TransactionStore`].
//!
//! Holds the transaction registry, the undo log, the maps and the persisted
//! transaction metadata behind `parking_lot` locks. Locks are never nested:
//! every operation takes at most one of them at a time, except `recover`,
//! which reads the undo log and metadata before taking the registry.
//!
//! [`MemTransactionStore::reopen`] builds a fresh store over the durable
//! parts (maps, undo log, metadata) of an existing one, which is how tests
//! and embedders exercise crash recovery.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};

use mvtx_error::{MvtxError, Result};
use mvtx_types::{Change, LogId, MapId, TxnId, TxnMeta, TxnStatus, VersionedValue};

use crate::config::StoreConfig;
use crate::state::{StatusView, TxnState};
use crate::store::TransactionStore;
use crate::transaction::Transaction;
use crate::transition::is_valid_transition;

/// Initial registry capacity; grows on demand up to `max_transactions`.
const INITIAL_SLOTS: usize = 64;

/// Statement pin handed out by [`MemTransactionStore`].
#[derive(Debug, PartialEq, Eq)]
pub struct VersionPin {
    id: u64,
}

impl VersionPin {
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }
}

#[derive(Debug, Clone)]
struct UndoEntry {
    map_id: MapId,
    key: Vec<u8>,
    old_value: Option<VersionedValue>,
}

#[derive(Debug, Clone)]
struct MemMap {
    name: String,
    entries: BTreeMap<Vec<u8>, VersionedValue>,
}

#[derive(Debug, Clone, Default)]
struct MapCatalog {
    by_name: HashMap<String, MapId>,
    maps: HashMap<MapId, MemMap>,
    next_id: u32,
}

#[derive(Debug, Default)]
struct Registry {
    slots: Vec<Option<StatusView>>,
    next_hint: usize,
}

impl Registry {
    fn with_capacity(max: usize) -> Self {
        Self {
            slots: vec![None; max.min(INITIAL_SLOTS)],
            next_hint: 0,
        }
    }

    fn allocate(&mut self, max: usize, reuse: bool) -> Option<usize> {
        let start = if reuse { 0 } else { self.next_hint };
        for offset in 0..max {
            let idx = (start + offset) % max;
            if idx >= self.slots.len() {
                self.slots.resize(idx + 1, None);
            }
            if self.slots[idx].is_none() {
                self.next_hint = (idx + 1) % max;
                return Some(idx);
            }
        }
        None
    }

    fn get(&self, id: TxnId) -> Option<&StatusView> {
        self.slots.get(id.index()).and_then(Option::as_ref)
    }

    fn set(&mut self, id: TxnId, view: StatusView) {
        let idx = id.index();
        if idx >= self.slots.len() {
            self.slots.resize(idx + 1, None);
        }
        self.slots[idx] = Some(view);
    }

    fn open_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }
}

/// In-memory registry, undo log and map storage.
pub struct MemTransactionStore {
    config: StoreConfig,
    registry: Mutex<Registry>,
    undo_log: Mutex<BTreeMap<(TxnId, LogId), UndoEntry>>,
    maps: RwLock<MapCatalog>,
    metadata: Mutex<BTreeMap<TxnId, Vec<u8>>>,
    pins: Mutex<BTreeSet<u64>>,
    next_pin: AtomicU64,
}

impl MemTransactionStore {
    pub fn new(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_durable_state(
            config,
            BTreeMap::new(),
            MapCatalog::default(),
            BTreeMap::new(),
        ))
    }

    fn with_durable_state(
        config: StoreConfig,
        undo_log: BTreeMap<(TxnId, LogId), UndoEntry>,
        maps: MapCatalog,
        metadata: BTreeMap<TxnId, Vec<u8>>,
    ) -> Self {
        let registry = Registry::with_capacity(config.max_transactions as usize);
        Self {
            config,
            registry: Mutex::new(registry),
            undo_log: Mutex::new(undo_log),
            maps: RwLock::new(maps),
            metadata: Mutex::new(metadata),
            pins: Mutex::new(BTreeSet::new()),
            next_pin: AtomicU64::new(1),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Start a new OPEN transaction with the lowest free id (or the next id
    /// round-robin when id reuse is off).
    pub fn begin(self: &Arc<Self>) -> Result<Transaction<Self>> {
        let max = self.config.max_transactions;
        let mut registry = self.registry.lock();
        let idx = registry
            .allocate(max as usize, self.config.reuse_transaction_ids)
            .ok_or(MvtxError::TooManyTransactions { max })?;
        let id = u32::try_from(idx + 1)
            .ok()
            .and_then(TxnId::new)
            .ok_or_else(|| MvtxError::internal(format!("registry slot {idx} out of id range")))?;
        let txn = Transaction::new(Arc::clone(self), id, TxnStatus::Open, None, LogId::ZERO);
        registry.set(id, txn.status_view());
        Ok(txn)
    }

    /// Number of transactions holding an id.
    #[must_use]
    pub fn open_transaction_count(&self) -> usize {
        self.registry.lock().open_count()
    }

    /// Number of undo log entries across all transactions.
    #[must_use]
    pub fn undo_entry_count(&self) -> usize {
        self.undo_log.lock().len()
    }

    /// Number of live statement pins.
    #[must_use]
    pub fn active_version_pins(&self) -> usize {
        self.pins.lock().len()
    }

    /// Decode all persisted transaction metadata.
    pub fn persisted_metadata(&self) -> Result<Vec<TxnMeta>> {
        self.metadata.lock().values().map(|bytes| decode_meta(bytes)).collect()
    }

    /// Fresh store over this store's maps, undo log and metadata, with an
    /// empty registry and no pins: the state a restarted process would see.
    #[must_use]
    pub fn reopen(&self) -> Self {
        Self::with_durable_state(
            self.config.clone(),
            self.undo_log.lock().clone(),
            self.maps.read().clone(),
            self.metadata.lock().clone(),
        )
    }

    /// Reconstruct every transaction that left undo entries or metadata
    /// behind and is not registered yet.
    ///
    /// Status comes from persisted metadata (OPEN when there is none); the
    /// log position resumes after the highest surviving undo entry.
    pub fn recover(self: &Arc<Self>) -> Result<Vec<Transaction<Self>>> {
        let mut resume_at: BTreeMap<TxnId, LogId> = BTreeMap::new();
        for (id, log_id) in self.undo_log.lock().keys() {
            let next = log_id
                .checked_next()
                .ok_or_else(|| MvtxError::undo_corrupt(format!("log id {log_id} at maximum")))?;
            let slot = resume_at.entry(*id).or_insert(LogId::ZERO);
            *slot = (*slot).max(next);
        }
        let metas = self.persisted_metadata()?;
        let mut by_id: BTreeMap<TxnId, TxnMeta> =
            metas.into_iter().map(|meta| (meta.id, meta)).collect();
        for id in resume_at.keys() {
            by_id.entry(*id).or_insert(TxnMeta {
                id: *id,
                status: TxnStatus::Open,
                name: None,
            });
        }

        let max = self.config.max_transactions;
        let mut registry = self.registry.lock();
        let mut recovered = Vec::new();
        for (id, meta) in by_id {
            if registry.get(id).is_some() {
                continue;
            }
            if id.get() > max {
                return Err(MvtxError::MetadataCorrupt {
                    detail: format!("transaction id {id} exceeds limit {max}"),
                });
            }
            if !matches!(
                meta.status,
                TxnStatus::Open | TxnStatus::Prepared | TxnStatus::Committing
            ) {
                return Err(MvtxError::MetadataCorrupt {
                    detail: format!("transaction {id} persisted as {}", meta.status),
                });
            }
            let log_id = resume_at.get(&id).copied().unwrap_or(LogId::ZERO);
            let txn = Transaction::new(Arc::clone(self), id, meta.status, meta.name, log_id);
            registry.set(id, txn.status_view());
            recovered.push(txn);
        }
        tracing::info!(target: "mvtx::store", count = recovered.len(), "transactions recovered");
        Ok(recovered)
    }

    /// Finish what a restart left behind: resume interrupted commits, roll
    /// back transactions that were still OPEN, and hand PREPARED ones back
    /// to the caller for an explicit decision.
    ///
    /// A failed commit or rollback does not stop the sweep. The failure is
    /// logged, and a transaction it left unclosed is returned alongside the
    /// PREPARED ones so its id is never held without a handle.
    pub fn end_leftover_transactions(self: &Arc<Self>) -> Result<Vec<Transaction<Self>>> {
        let mut pending = Vec::new();
        for txn in self.recover()? {
            let outcome = match txn.status() {
                TxnStatus::Prepared => {
                    pending.push(txn);
                    continue;
                }
                TxnStatus::Committing => txn.commit(),
                _ => txn.rollback(),
            };
            if let Err(err) = outcome {
                tracing::warn!(
                    target: "mvtx::store",
                    txn_id = %txn.id(),
                    status = %txn.status(),
                    error = %err,
                    "leftover transaction could not be finished"
                );
                if txn.status() != TxnStatus::Closed {
                    pending.push(txn);
                }
            }
        }
        Ok(pending)
    }

    fn persist(&self, meta: &TxnMeta) -> Result<()> {
        let bytes = serde_json::to_vec(meta).map_err(|err| MvtxError::MetadataCorrupt {
            detail: err.to_string(),
        })?;
        self.metadata.lock().insert(meta.id, bytes);
        Ok(())
    }

    fn persisted_name(&self, id: TxnId) -> Result<Option<String>> {
        let bytes = self.metadata.lock().get(&id).cloned();
        match bytes {
            Some(bytes) => Ok(decode_meta(&bytes)?.name),
            None => Ok(None),
        }
    }

    /// Put `entry.old_value` back in its map.
    fn restore(&self, entry: UndoEntry) {
        let mut catalog = self.maps.write();
        let Some(map) = catalog.maps.get_mut(&entry.map_id) else {
            tracing::warn!(target: "mvtx::store", map_id = %entry.map_id, "undo entry for removed map skipped");
            return;
        };
        match entry.old_value {
            Some(old) => {
                map.entries.insert(entry.key, old);
            }
            None => {
                map.entries.remove(&entry.key);
            }
        }
    }

    fn take_entries(&self, id: TxnId, to: LogId) -> Vec<UndoEntry> {
        let mut undo = self.undo_log.lock();
        let keys: Vec<_> = undo
            .range((id, LogId::ZERO)..(id, to))
            .map(|(key, _)| *key)
            .collect();
        keys.iter().filter_map(|key| undo.remove(key)).collect()
    }

    /// Settle every map entry still owned by `id` before its id is freed:
    /// keep the written value if the transaction committed, otherwise fall
    /// back to the entry's committed value. Only an incomplete undo replay
    /// leaves such entries behind.
    fn release_owned_entries(&self, id: TxnId, final_status: TxnStatus) -> usize {
        let committed = final_status == TxnStatus::Committed;
        let mut released = 0;
        let mut catalog = self.maps.write();
        for map in catalog.maps.values_mut() {
            map.entries.retain(|_, entry| {
                if entry.writer() != Some(id) {
                    return true;
                }
                released += 1;
                let settled = if committed {
                    entry.value.take()
                } else {
                    entry.committed_value.take()
                };
                match settled {
                    Some(value) => {
                        *entry = VersionedValue::committed(value);
                        true
                    }
                    None => false,
                }
            });
        }
        released
    }

    fn purge_entries(&self, id: TxnId) -> usize {
        let mut undo = self.undo_log.lock();
        let before = undo.len();
        undo.retain(|(owner, _), _| *owner != id);
        before - undo.len()
    }
}

fn decode_meta(bytes: &[u8]) -> Result<TxnMeta> {
    serde_json::from_slice(bytes).map_err(|err| MvtxError::MetadataCorrupt {
        detail: err.to_string(),
    })
}

impl TransactionStore for MemTransactionStore {
    type VersionPin = VersionPin;
    type Changes<'a> = ChangeIter<'a>;

    fn log(
        &self,
        txn: &TxnState,
        log_id: LogId,
        map_id: MapId,
        key: &[u8],
        old_value: Option<&VersionedValue>,
    ) -> Result<()> {
        let entry = UndoEntry {
            map_id,
            key: key.to_vec(),
            old_value: old_value.cloned(),
        };
        let mut undo = self.undo_log.lock();
        if undo.insert((txn.id(), log_id), entry).is_some() {
            return Err(MvtxError::undo_corrupt(format!(
                "duplicate undo entry {}:{log_id}",
                txn.id()
            )));
        }
        Ok(())
    }

    fn log_undo(&self, txn: &TxnState, log_id: LogId) -> Result<()> {
        self.undo_log
            .lock()
            .remove(&(txn.id(), log_id))
            .map(|_| ())
            .ok_or_else(|| {
                MvtxError::undo_corrupt(format!("missing undo entry {}:{log_id}", txn.id()))
            })
    }

    fn rollback_to(&self, txn: &TxnState, from: LogId, to: LogId) -> Result<()> {
        let id = txn.id();
        let mut log_id = from;
        let mut replayed = 0_u64;
        while log_id > to {
            let Some(prev) = log_id.checked_prev() else {
                break;
            };
            log_id = prev;
            let entry = self.undo_log.lock().remove(&(id, log_id)).ok_or_else(|| {
                MvtxError::undo_corrupt(format!("missing undo entry {id}:{log_id}"))
            })?;
            self.restore(entry);
            replayed += 1;
        }
        tracing::debug!(target: "mvtx::store", txn_id = %id, %from, %to, replayed, "undo replayed");
        Ok(())
    }

    fn changes(&self, txn: &TxnState, from: LogId, to: LogId) -> ChangeIter<'_> {
        ChangeIter {
            store: self,
            txn_id: txn.id(),
            next: from,
            to,
            done: false,
        }
    }

    fn store_transaction(&self, meta: &TxnMeta) -> Result<()> {
        if !self.config.persist_metadata {
            return Ok(());
        }
        self.persist(meta)
    }

    fn commit(&self, txn: &TxnState, log_id: LogId, prior: TxnStatus) -> Result<()> {
        let id = txn.id();
        if prior == TxnStatus::Committing {
            tracing::info!(target: "mvtx::store", txn_id = %id, "resuming interrupted commit");
        } else if self.config.persist_metadata {
            let name = self.persisted_name(id)?;
            self.persist(&TxnMeta {
                id,
                status: TxnStatus::Committing,
                name,
            })?;
        }

        txn.set_status(TxnStatus::Committed)?;
        let entries = self.take_entries(id, log_id);
        let rewritten = entries.len();
        {
            let mut catalog = self.maps.write();
            for entry in entries {
                let Some(map) = catalog.maps.get_mut(&entry.map_id) else {
                    continue;
                };
                let Some(current) = map.entries.get(&entry.key) else {
                    continue;
                };
                if current.writer() != Some(id) {
                    continue;
                }
                match current.value.clone() {
                    Some(value) => {
                        map.entries
                            .insert(entry.key, VersionedValue::committed(value));
                    }
                    None => {
                        map.entries.remove(&entry.key);
                    }
                }
            }
        }
        tracing::debug!(target: "mvtx::store", txn_id = %id, %prior, rewritten, "changes committed");
        self.end_transaction(txn, TxnStatus::Committed)
    }

    fn end_transaction(&self, txn: &TxnState, final_status: TxnStatus) -> Result<()> {
        let id = txn.id();
        let current = txn.status();
        if !is_valid_transition(current, TxnStatus::Closed) {
            return Err(MvtxError::illegal_transition(
                id.get(),
                current.name(),
                TxnStatus::Closed.name(),
            ));
        }
        // A CLOSED writer owns no map entries.
        let leftover = self.purge_entries(id);
        if leftover > 0 {
            tracing::warn!(
                target: "mvtx::store",
                txn_id = %id,
                %final_status,
                leftover,
                "discarding undo entries that were not replayed"
            );
        }
        let released = self.release_owned_entries(id, final_status);
        if released > 0 {
            tracing::warn!(
                target: "mvtx::store",
                txn_id = %id,
                %final_status,
                released,
                "map entries still held by an ending transaction"
            );
        }
        txn.set_status(TxnStatus::Closed)?;
        self.metadata.lock().remove(&id);
        let mut registry = self.registry.lock();
        if let Some(slot) = registry.slots.get_mut(id.index()) {
            if slot.as_ref().is_some_and(|view| view.id() == id) {
                *slot = None;
            }
        }
        tracing::debug!(target: "mvtx::store", txn_id = %id, %final_status, "transaction ended");
        Ok(())
    }

    fn status_of(&self, txn_id: TxnId) -> Option<TxnStatus> {
        self.registry.lock().get(txn_id).map(StatusView::status)
    }

    fn open_map(&self, name: &str) -> Result<MapId> {
        let mut catalog = self.maps.write();
        if let Some(id) = catalog.by_name.get(name) {
            return Ok(*id);
        }
        catalog.next_id += 1;
        let id = MapId::new(catalog.next_id);
        catalog.by_name.insert(name.to_owned(), id);
        catalog.maps.insert(
            id,
            MemMap {
                name: name.to_owned(),
                entries: BTreeMap::new(),
            },
        );
        tracing::debug!(target: "mvtx::store", map_id = %id, name, "map created");
        Ok(id)
    }

    fn remove_map(&self, map_id: MapId) -> Result<()> {
        let mut catalog = self.maps.write();
        let map = catalog
            .maps
            .remove(&map_id)
            .ok_or_else(|| MvtxError::NoSuchMap {
                name: format!("#{map_id}"),
            })?;
        catalog.by_name.remove(&map.name);
        Ok(())
    }

    fn map_get(&self, map_id: MapId, key: &[u8]) -> Result<Option<VersionedValue>> {
        let catalog = self.maps.read();
        let map = catalog.maps.get(&map_id).ok_or_else(|| MvtxError::NoSuchMap {
            name: format!("#{map_id}"),
        })?;
        Ok(map.entries.get(key).cloned())
    }

    fn map_replace(
        &self,
        map_id: MapId,
        key: &[u8],
        expected: Option<&VersionedValue>,
        new: VersionedValue,
    ) -> Result<bool> {
        let mut catalog = self.maps.write();
        let map = catalog
            .maps
            .get_mut(&map_id)
            .ok_or_else(|| MvtxError::NoSuchMap {
                name: format!("#{map_id}"),
            })?;
        if map.entries.get(key) != expected {
            return Ok(false);
        }
        map.entries.insert(key.to_vec(), new);
        Ok(true)
    }

    fn register_version_usage(&self) -> VersionPin {
        let id = self.next_pin.fetch_add(1, Ordering::Relaxed);
        self.pins.lock().insert(id);
        VersionPin { id }
    }

    fn deregister_version_usage(&self, pin: VersionPin) {
        self.pins.lock().remove(&pin.id);
    }
}

impl std::fmt::Debug for MemTransactionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemTransactionStore")
            .field("open_transactions", &self.open_transaction_count())
            .field("undo_entries", &self.undo_entry_count())
            .field("version_pins", &self.active_version_pins())
            .finish_non_exhaustive()
    }
}

/// Lazy most-recent-first walk over one transaction's undo entries.
///
/// Each step re-reads a single entry under the undo log lock; nothing is
/// materialized up front. Fused after the first error.
pub struct ChangeIter<'a> {
    store: &'a MemTransactionStore,
    txn_id: TxnId,
    next: LogId,
    to: LogId,
    done: bool,
}

impl Iterator for ChangeIter<'_> {
    type Item = Result<Change>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.next <= self.to {
            return None;
        }
        let log_id = self.next.checked_prev()?;
        self.next = log_id;
        let entry = self
            .store
            .undo_log
            .lock()
            .get(&(self.txn_id, log_id))
            .cloned();
        let Some(entry) = entry else {
            self.done = true;
            return Some(Err(MvtxError::undo_corrupt(format!(
                "missing undo entry {}:{log_id}",
                self.txn_id
            ))));
        };
        Some(Ok(Change {
            map_id: entry.map_id,
            key: entry.key,
            old_value: entry.old_value.and_then(|old| old.value),
        }))
    }
}

impl std::iter::FusedIterator for ChangeIter<'_> {}
