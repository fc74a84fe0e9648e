//! Hierarchical multi-granularity locking and transaction state.
//!
//! Transactions follow strict two-phase locking: every lock is held until
//! commit or abort, and the first release moves the transaction into its
//! shrinking phase, after which any further acquisition is an error.
//! Deadlocks are prevented with wait-die: a requester blocked by an older
//! conflicting holder aborts immediately instead of waiting.

mod lock;

#[cfg(test)]
mod tests;

pub use lock::{compatible, upgradable, LockManager, LockMode};

use ahash::RandomState;
use common::TxnId;
use hashbrown::{HashMap, HashSet};
use std::sync::Mutex;

type Map<K, V> = HashMap<K, V, RandomState>;
type Set<T> = HashSet<T, RandomState>;

/// Life-cycle states of a transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TxnState {
    #[default]
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// Inverse operations captured before each storage mutation; popped in
/// reverse order on abort.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UndoRecord {
    /// Undone by deleting the key.
    Insert { table: String, key: Vec<u8> },
    /// Undone by re-inserting the old value.
    Delete {
        table: String,
        key: Vec<u8>,
        old: Vec<u8>,
    },
    /// Undone by restoring the old value.
    Update {
        table: String,
        key: Vec<u8>,
        old: Vec<u8>,
    },
}

#[derive(Default)]
struct TxnInner {
    state: TxnState,
    table_locks: Map<LockMode, Set<String>>,
    tuple_locks: Map<LockMode, Map<String, Set<Vec<u8>>>>,
    undo: Vec<UndoRecord>,
}

/// A transaction: monotonic id, 2PL state machine, the locks it holds, and
/// its undo stack. Shared behind `Arc`; one thread drives a transaction,
/// but the lock manager and an aborting driver touch it concurrently.
pub struct Txn {
    id: TxnId,
    inner: Mutex<TxnInner>,
}

impl Txn {
    pub fn new(id: TxnId) -> Self {
        Self {
            id,
            inner: Mutex::new(TxnInner::default()),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn state(&self) -> TxnState {
        self.inner.lock().unwrap().state
    }

    pub fn set_state(&self, state: TxnState) {
        self.inner.lock().unwrap().state = state;
    }

    /// Record the inverse of an upcoming mutation.
    pub fn push_undo(&self, record: UndoRecord) {
        self.inner.lock().unwrap().undo.push(record);
    }

    /// Most recent undo record, removing it from the stack.
    pub fn pop_undo(&self) -> Option<UndoRecord> {
        self.inner.lock().unwrap().undo.pop()
    }

    pub fn undo_depth(&self) -> usize {
        self.inner.lock().unwrap().undo.len()
    }

    /// True when the txn holds a table lock on `table` in any given mode.
    pub fn holds_table_lock(&self, table: &str, modes: &[LockMode]) -> bool {
        let inner = self.inner.lock().unwrap();
        modes.iter().any(|mode| {
            inner
                .table_locks
                .get(mode)
                .is_some_and(|set| set.contains(table))
        })
    }

    fn add_table_lock(&self, mode: LockMode, table: &str) {
        self.inner
            .lock()
            .unwrap()
            .table_locks
            .entry(mode)
            .or_default()
            .insert(table.to_string());
    }

    fn remove_table_lock(&self, mode: LockMode, table: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(set) = inner.table_locks.get_mut(&mode) {
            set.remove(table);
        }
    }

    fn add_tuple_lock(&self, mode: LockMode, table: &str, key: &[u8]) {
        self.inner
            .lock()
            .unwrap()
            .tuple_locks
            .entry(mode)
            .or_default()
            .entry(table.to_string())
            .or_default()
            .insert(key.to_vec());
    }

    fn remove_tuple_lock(&self, mode: LockMode, table: &str, key: &[u8]) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(tables) = inner.tuple_locks.get_mut(&mode) {
            if let Some(keys) = tables.get_mut(table) {
                keys.remove(key);
            }
        }
    }

    /// Snapshot of all held locks, tuple locks first, for release-all.
    fn held_locks(&self) -> (Vec<(LockMode, String, Vec<u8>)>, Vec<(LockMode, String)>) {
        let inner = self.inner.lock().unwrap();
        let mut tuples = Vec::new();
        for (mode, tables) in &inner.tuple_locks {
            for (table, keys) in tables {
                for key in keys {
                    tuples.push((*mode, table.clone(), key.clone()));
                }
            }
        }
        let mut tables = Vec::new();
        for (mode, names) in &inner.table_locks {
            for name in names {
                tables.push((*mode, name.clone()));
            }
        }
        (tuples, tables)
    }
}
