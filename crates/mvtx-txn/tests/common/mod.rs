#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;

use mvtx_txn::{
    ChangeIter, LogId, MapId, MemTransactionStore, MvtxError, Result, StoreConfig, Transaction,
    TransactionStore, TxnId, TxnMeta, TxnState, TxnStatus, VersionPin, VersionedValue,
};

/// What [`ProbeStore::rollback_to`] does besides replaying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    None,
    /// Replay fails before touching anything.
    FailReplay,
    /// Replay succeeds, but the state word is moved behind the owner's back.
    TamperDuringReplay,
}

/// [`MemTransactionStore`] wrapper that records replayed keys and injects
/// faults into undo replay.
pub struct ProbeStore {
    pub inner: MemTransactionStore,
    pub fault: Mutex<Fault>,
    pub replayed: Mutex<Vec<Vec<u8>>>,
    pub ended: Mutex<Vec<(TxnId, TxnStatus)>>,
    next_id: Mutex<u32>,
}

impl ProbeStore {
    pub fn new(fault: Fault) -> Arc<Self> {
        Arc::new(Self {
            inner: MemTransactionStore::new(StoreConfig::default()).unwrap(),
            fault: Mutex::new(fault),
            replayed: Mutex::new(Vec::new()),
            ended: Mutex::new(Vec::new()),
            next_id: Mutex::new(0),
        })
    }

    pub fn begin(self: &Arc<Self>) -> Transaction<Self> {
        let mut next = self.next_id.lock();
        *next += 1;
        Transaction::new(
            Arc::clone(self),
            TxnId::new(*next).unwrap(),
            TxnStatus::Open,
            None,
            LogId::ZERO,
        )
    }
}

impl TransactionStore for ProbeStore {
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
        self.inner.log(txn, log_id, map_id, key, old_value)
    }

    fn log_undo(&self, txn: &TxnState, log_id: LogId) -> Result<()> {
        self.inner.log_undo(txn, log_id)
    }

    fn rollback_to(&self, txn: &TxnState, from: LogId, to: LogId) -> Result<()> {
        match *self.fault.lock() {
            Fault::FailReplay => {
                return Err(MvtxError::undo_corrupt("injected replay failure"));
            }
            Fault::TamperDuringReplay => {
                txn.set_status(TxnStatus::Open)?;
            }
            Fault::None => {}
        }
        for change in self.inner.changes(txn, from, to) {
            self.replayed.lock().push(change?.key);
        }
        self.inner.rollback_to(txn, from, to)
    }

    fn changes(&self, txn: &TxnState, from: LogId, to: LogId) -> ChangeIter<'_> {
        self.inner.changes(txn, from, to)
    }

    fn store_transaction(&self, meta: &TxnMeta) -> Result<()> {
        self.inner.store_transaction(meta)
    }

    fn commit(&self, txn: &TxnState, log_id: LogId, prior: TxnStatus) -> Result<()> {
        self.inner.commit(txn, log_id, prior)?;
        self.ended.lock().push((txn.id(), TxnStatus::Committed));
        Ok(())
    }

    fn end_transaction(&self, txn: &TxnState, final_status: TxnStatus) -> Result<()> {
        self.ended.lock().push((txn.id(), final_status));
        self.inner.end_transaction(txn, final_status)
    }

    fn status_of(&self, txn_id: TxnId) -> Option<TxnStatus> {
        self.inner.status_of(txn_id)
    }

    fn open_map(&self, name: &str) -> Result<MapId> {
        self.inner.open_map(name)
    }

    fn remove_map(&self, map_id: MapId) -> Result<()> {
        self.inner.remove_map(map_id)
    }

    fn map_get(&self, map_id: MapId, key: &[u8]) -> Result<Option<VersionedValue>> {
        self.inner.map_get(map_id, key)
    }

    fn map_replace(
        &self,
        map_id: MapId,
        key: &[u8],
        expected: Option<&VersionedValue>,
        new: VersionedValue,
    ) -> Result<bool> {
        self.inner.map_replace(map_id, key, expected, new)
    }

    fn register_version_usage(&self) -> VersionPin {
        self.inner.register_version_usage()
    }

    fn deregister_version_usage(&self, pin: VersionPin) {
        self.inner.deregister_version_usage(pin);
    }
}

pub fn mem_store() -> Arc<MemTransactionStore> {
    Arc::new(MemTransactionStore::new(StoreConfig::default()).unwrap())
}

pub fn log(n: u64) -> LogId {
    LogId::new(n).unwrap()
}
