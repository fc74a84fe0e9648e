use std::sync::{Arc, Condvar, Mutex};

use ahash::RandomState;
use common::{DbError, DbResult, TxnId};
use hashbrown::HashMap;
use log::{debug, trace};

use crate::{Txn, TxnState};

/// Hierarchical lock modes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// Intention shared.
    IS,
    /// Intention exclusive.
    IX,
    /// Shared.
    S,
    /// Shared with intention exclusive.
    SIX,
    /// Exclusive.
    X,
}

/// Standard hierarchical compatibility: `X` conflicts with everything,
/// `IS` is compatible with everything but `X`, `SIX` only with `IS`,
/// and `S`/`IX` each with themselves (and `IS`).
pub fn compatible(a: LockMode, b: LockMode) -> bool {
    use LockMode::*;
    match (a, b) {
        (X, _) | (_, X) => false,
        (IS, _) | (_, IS) => true,
        (SIX, _) | (_, SIX) => false,
        (a, b) => a == b,
    }
}

/// Legal upgrades: `IS -> {S, X, IX, SIX}`, `S -> {X, SIX}`,
/// `IX -> {X, SIX}`, `SIX -> X`.
pub fn upgradable(from: LockMode, to: LockMode) -> bool {
    use LockMode::*;
    match from {
        IS => matches!(to, S | X | IX | SIX),
        S | IX => matches!(to, X | SIX),
        SIX => to == X,
        X => false,
    }
}

struct LockRequest {
    txn_id: TxnId,
    mode: LockMode,
    granted: bool,
}

#[derive(Default)]
struct QueueState {
    requests: Vec<LockRequest>,
    upgrading: Option<TxnId>,
}

#[derive(Default)]
struct RequestQueue {
    state: Mutex<QueueState>,
    cv: Condvar,
}

#[derive(Clone, Copy)]
enum Resource<'a> {
    Table(&'a str),
    Tuple(&'a str, &'a [u8]),
}

type Map<K, V> = HashMap<K, V, RandomState>;

/// Process-wide lock tables: one request queue per table and per tuple.
/// The outer maps are only latched long enough to find or create a queue;
/// blocking happens on the queue's own condition variable.
#[derive(Default)]
pub struct LockManager {
    table_locks: Mutex<Map<String, Arc<RequestQueue>>>,
    tuple_locks: Mutex<Map<(String, Vec<u8>), Arc<RequestQueue>>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire a table-level lock, blocking until granted or aborting the
    /// transaction under wait-die.
    pub fn acquire_table_lock(&self, table: &str, mode: LockMode, txn: &Txn) -> DbResult<()> {
        self.check_phase(txn)?;
        let queue = self.table_queue(table);
        self.acquire(&queue, mode, txn, Resource::Table(table))
    }

    pub fn release_table_lock(&self, table: &str, mode: LockMode, txn: &Txn) -> DbResult<()> {
        let queue = self.table_queue(table);
        let mut state = queue.state.lock().unwrap();
        if let Some(pos) = state.requests.iter().position(|r| r.txn_id == txn.id()) {
            state.requests.remove(pos);
            txn.remove_table_lock(mode, table);
            if txn.state() == TxnState::Growing {
                txn.set_state(TxnState::Shrinking);
            }
            trace!("txn {} released table lock {mode:?} on {table}", txn.id().0);
        }
        queue.cv.notify_all();
        Ok(())
    }

    /// Acquire a tuple-level lock. Only `S` and `X` are accepted, and the
    /// matching table-level intention lock must already be held.
    pub fn acquire_tuple_lock(
        &self,
        table: &str,
        key: &[u8],
        mode: LockMode,
        txn: &Txn,
    ) -> DbResult<()> {
        self.check_phase(txn)?;
        use LockMode::*;
        if mode != S && mode != X {
            txn.set_state(TxnState::Aborted);
            return Err(DbError::TxnInvalidBehavior(format!(
                "tuple locks must be S or X, got {mode:?}"
            )));
        }
        let table_modes: &[LockMode] = if mode == S {
            &[IS, IX, S, SIX, X]
        } else {
            &[IX, X, SIX]
        };
        if !txn.holds_table_lock(table, table_modes) {
            txn.set_state(TxnState::Aborted);
            return Err(DbError::TxnInvalidBehavior(format!(
                "tuple {mode:?} lock on '{table}' without a table intention lock"
            )));
        }
        let queue = self.tuple_queue(table, key);
        self.acquire(&queue, mode, txn, Resource::Tuple(table, key))
    }

    pub fn release_tuple_lock(
        &self,
        table: &str,
        key: &[u8],
        mode: LockMode,
        txn: &Txn,
    ) -> DbResult<()> {
        let queue = self.tuple_queue(table, key);
        let mut state = queue.state.lock().unwrap();
        if let Some(pos) = state.requests.iter().position(|r| r.txn_id == txn.id()) {
            state.requests.remove(pos);
            txn.remove_tuple_lock(mode, table, key);
            if txn.state() == TxnState::Growing {
                txn.set_state(TxnState::Shrinking);
            }
        }
        queue.cv.notify_all();
        Ok(())
    }

    /// Release everything a finished transaction holds, tuple locks first.
    pub fn release_all(&self, txn: &Txn) -> DbResult<()> {
        let (tuples, tables) = txn.held_locks();
        for (mode, table, key) in tuples {
            self.release_tuple_lock(&table, &key, mode, txn)?;
        }
        for (mode, table) in tables {
            self.release_table_lock(&table, mode, txn)?;
        }
        Ok(())
    }

    fn check_phase(&self, txn: &Txn) -> DbResult<()> {
        match txn.state() {
            TxnState::Aborted => Err(DbError::TxnInvalidBehavior(format!(
                "txn {} is aborted",
                txn.id().0
            ))),
            TxnState::Committed => Err(DbError::TxnInvalidBehavior(format!(
                "txn {} already committed",
                txn.id().0
            ))),
            TxnState::Shrinking => {
                txn.set_state(TxnState::Aborted);
                Err(DbError::TxnInvalidBehavior(format!(
                    "txn {} acquired a lock while shrinking",
                    txn.id().0
                )))
            }
            TxnState::Growing => Ok(()),
        }
    }

    fn table_queue(&self, table: &str) -> Arc<RequestQueue> {
        let mut map = self.table_locks.lock().unwrap();
        Arc::clone(map.entry(table.to_string()).or_default())
    }

    fn tuple_queue(&self, table: &str, key: &[u8]) -> Arc<RequestQueue> {
        let mut map = self.tuple_locks.lock().unwrap();
        Arc::clone(
            map.entry((table.to_string(), key.to_vec()))
                .or_default(),
        )
    }

    fn acquire(
        &self,
        queue: &RequestQueue,
        mode: LockMode,
        txn: &Txn,
        resource: Resource<'_>,
    ) -> DbResult<()> {
        let mut state = queue.state.lock().unwrap();

        // An existing request by this txn means re-acquire or upgrade.
        if let Some(existing) = state.requests.iter().find(|r| r.txn_id == txn.id()) {
            if existing.mode == mode {
                return Ok(());
            }
            if state.upgrading.is_some() {
                txn.set_state(TxnState::Aborted);
                return Err(DbError::TxnMultiUpgrade(format!(
                    "txn {} upgrade while another upgrade is pending",
                    txn.id().0
                )));
            }
            if !upgradable(existing.mode, mode) {
                txn.set_state(TxnState::Aborted);
                return Err(DbError::TxnInvalidBehavior(format!(
                    "illegal upgrade {:?} -> {mode:?}",
                    existing.mode
                )));
            }
            state.upgrading = Some(txn.id());
        }

        state.requests.push(LockRequest {
            txn_id: txn.id(),
            mode,
            granted: false,
        });

        loop {
            let mut ours_first = false;
            let mut die = false;
            for r in &state.requests {
                if !r.granted {
                    ours_first = r.txn_id == txn.id();
                    break;
                }
                if r.txn_id != txn.id() && !compatible(r.mode, mode) {
                    // Wait-die: abort when the conflicting holder is older.
                    die = r.txn_id < txn.id();
                    break;
                }
            }
            if ours_first {
                break;
            }
            if die {
                txn.set_state(TxnState::Aborted);
                if let Some(pos) = state
                    .requests
                    .iter()
                    .position(|r| !r.granted && r.txn_id == txn.id())
                {
                    state.requests.remove(pos);
                }
                if state.upgrading == Some(txn.id()) {
                    state.upgrading = None;
                }
                queue.cv.notify_all();
                debug!("txn {} dies under wait-die", txn.id().0);
                return Err(DbError::TxnDeadlockAbort(format!(
                    "txn {} aborted by wait-die",
                    txn.id().0
                )));
            }
            state = queue.cv.wait(state).unwrap();
        }

        // Grant our request; an upgrade also retires the old request.
        if let Some(pos) = state.requests.iter().position(|r| !r.granted) {
            state.requests[pos].granted = true;
            match resource {
                Resource::Table(table) => txn.add_table_lock(mode, table),
                Resource::Tuple(table, key) => txn.add_tuple_lock(mode, table, key),
            }
            if state.upgrading == Some(txn.id()) {
                if let Some(old) = state
                    .requests
                    .iter()
                    .position(|r| r.txn_id == txn.id() && r.mode != mode)
                {
                    let old_mode = state.requests[old].mode;
                    state.requests.remove(old);
                    match resource {
                        Resource::Table(table) => txn.remove_table_lock(old_mode, table),
                        Resource::Tuple(table, key) => {
                            txn.remove_tuple_lock(old_mode, table, key)
                        }
                    }
                }
                state.upgrading = None;
            }
        }
        queue.cv.notify_all();
        trace!("txn {} granted {mode:?}", txn.id().0);
        Ok(())
    }
}
