use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use common::{DbResult, TxnId};
use log::debug;
use std::collections::HashMap;
use txn::{LockManager, Txn, TxnState};

use crate::StorageEngine;

/// Hands out transactions and drives their completion. Commit releases
/// every lock (the single release point under strict 2PL); abort first
/// unwinds the undo stack in reverse-chronological order.
pub struct TxnManager {
    engine: Arc<StorageEngine>,
    lock_mgr: Arc<LockManager>,
    next_id: AtomicU64,
    active: Mutex<HashMap<TxnId, Arc<Txn>>>,
}

impl TxnManager {
    pub fn new(engine: Arc<StorageEngine>, lock_mgr: Arc<LockManager>) -> Self {
        Self {
            engine,
            lock_mgr,
            next_id: AtomicU64::new(1),
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Start a transaction with the next monotonic id; a smaller id means
    /// an older transaction under wait-die.
    pub fn begin(&self) -> Arc<Txn> {
        let id = TxnId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let txn = Arc::new(Txn::new(id));
        self.active.lock().unwrap().insert(id, Arc::clone(&txn));
        debug!("begin txn {}", id.0);
        txn
    }

    pub fn commit(&self, txn: &Arc<Txn>) -> DbResult<()> {
        txn.set_state(TxnState::Committed);
        self.lock_mgr.release_all(txn)?;
        self.active.lock().unwrap().remove(&txn.id());
        debug!("commit txn {}", txn.id().0);
        Ok(())
    }

    /// Roll the transaction back and release its locks. The undo stack is
    /// applied newest-first, so state returns to the txn's begin point.
    pub fn abort(&self, txn: &Arc<Txn>) -> DbResult<()> {
        let mut undone = 0usize;
        while let Some(record) = txn.pop_undo() {
            self.engine.apply_undo(&record)?;
            undone += 1;
        }
        txn.set_state(TxnState::Aborted);
        self.lock_mgr.release_all(txn)?;
        self.active.lock().unwrap().remove(&txn.id());
        debug!("abort txn {} after {undone} undos", txn.id().0);
        Ok(())
    }
}
