use super::*;
use common::{DbError, TxnId};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use LockMode::*;

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn txn(id: u64) -> Arc<Txn> {
    Arc::new(Txn::new(TxnId(id)))
}

#[test]
fn compatibility_matrix() {
    assert!(compatible(IS, IS));
    assert!(compatible(IS, IX));
    assert!(compatible(IS, S));
    assert!(compatible(IS, SIX));
    assert!(!compatible(IS, X));
    assert!(compatible(IX, IX));
    assert!(!compatible(IX, S));
    assert!(!compatible(IX, SIX));
    assert!(compatible(S, S));
    assert!(!compatible(S, SIX));
    assert!(!compatible(SIX, SIX));
    assert!(!compatible(X, IS));
    assert!(!compatible(X, X));
}

#[test]
fn upgrade_lattice() {
    for to in [S, X, IX, SIX] {
        assert!(upgradable(IS, to));
    }
    assert!(upgradable(S, X));
    assert!(upgradable(S, SIX));
    assert!(!upgradable(S, IX));
    assert!(upgradable(IX, X));
    assert!(upgradable(IX, SIX));
    assert!(!upgradable(IX, S));
    assert!(upgradable(SIX, X));
    assert!(!upgradable(SIX, S));
    assert!(!upgradable(X, S));
}

#[test]
fn shared_locks_coexist_and_exclusive_blocks() {
    let mgr = Arc::new(LockManager::new());
    let t1 = txn(1);
    let t2 = txn(2);
    mgr.acquire_table_lock("t", S, &t1).unwrap();
    mgr.acquire_table_lock("t", S, &t2).unwrap();

    // A younger writer dies instead of waiting on the older readers.
    let t3 = txn(3);
    let err = mgr.acquire_table_lock("t", X, &t3).unwrap_err();
    assert!(matches!(err, DbError::TxnDeadlockAbort(_)));
    assert_eq!(t3.state(), TxnState::Aborted);
}

#[test]
fn reacquiring_the_same_mode_is_a_no_op() {
    let mgr = LockManager::new();
    let t1 = txn(1);
    mgr.acquire_table_lock("t", S, &t1).unwrap();
    mgr.acquire_table_lock("t", S, &t1).unwrap();
    mgr.release_table_lock("t", S, &t1).unwrap();
    // Only one request existed, so the queue is empty now and a fresh txn
    // can take X.
    let t2 = txn(2);
    mgr.acquire_table_lock("t", X, &t2).unwrap();
}

#[test]
fn strict_two_phase_locking() {
    let mgr = LockManager::new();
    let t1 = txn(1);
    mgr.acquire_table_lock("a", S, &t1).unwrap();
    mgr.acquire_table_lock("b", S, &t1).unwrap();
    mgr.release_table_lock("a", S, &t1).unwrap();
    assert_eq!(t1.state(), TxnState::Shrinking);

    let err = mgr.acquire_table_lock("c", S, &t1).unwrap_err();
    assert!(matches!(err, DbError::TxnInvalidBehavior(_)));
    assert_eq!(t1.state(), TxnState::Aborted);
}

#[test]
fn aborted_txn_cannot_lock() {
    let mgr = LockManager::new();
    let t1 = txn(1);
    t1.set_state(TxnState::Aborted);
    let err = mgr.acquire_table_lock("t", S, &t1).unwrap_err();
    assert!(matches!(err, DbError::TxnInvalidBehavior(_)));
}

#[test]
fn tuple_locks_require_table_intentions() {
    let mgr = LockManager::new();
    let t1 = txn(1);
    let err = mgr.acquire_tuple_lock("t", b"k", S, &t1).unwrap_err();
    assert!(matches!(err, DbError::TxnInvalidBehavior(_)));
    assert_eq!(t1.state(), TxnState::Aborted);

    // IS admits tuple S but not tuple X.
    let t2 = txn(2);
    mgr.acquire_table_lock("t", IS, &t2).unwrap();
    mgr.acquire_tuple_lock("t", b"k", S, &t2).unwrap();
    let err = mgr.acquire_tuple_lock("t", b"k2", X, &t2).unwrap_err();
    assert!(matches!(err, DbError::TxnInvalidBehavior(_)));

    // Only S and X exist at tuple granularity.
    let t3 = txn(3);
    mgr.acquire_table_lock("t", IX, &t3).unwrap();
    let err = mgr.acquire_tuple_lock("t", b"k", IX, &t3).unwrap_err();
    assert!(matches!(err, DbError::TxnInvalidBehavior(_)));
}

#[test]
fn illegal_upgrade_aborts() {
    let mgr = LockManager::new();
    let t1 = txn(1);
    mgr.acquire_table_lock("t", S, &t1).unwrap();
    let err = mgr.acquire_table_lock("t", IX, &t1).unwrap_err();
    assert!(matches!(err, DbError::TxnInvalidBehavior(_)));
    assert_eq!(t1.state(), TxnState::Aborted);
}

#[test]
fn legal_upgrade_replaces_the_old_request() {
    let mgr = LockManager::new();
    let t1 = txn(1);
    mgr.acquire_table_lock("t", IS, &t1).unwrap();
    mgr.acquire_table_lock("t", X, &t1).unwrap();
    assert!(t1.holds_table_lock("t", &[X]));
    assert!(!t1.holds_table_lock("t", &[IS]));

    // After release the queue must be empty for others.
    mgr.release_table_lock("t", X, &t1).unwrap();
    let t2 = txn(2);
    mgr.acquire_table_lock("t", X, &t2).unwrap();
}

#[test]
fn second_upgrader_aborts() {
    init_logs();
    let mgr = Arc::new(LockManager::new());
    let t1 = txn(1);
    let t2 = txn(2);
    mgr.acquire_table_lock("t", S, &t1).unwrap();
    mgr.acquire_table_lock("t", S, &t2).unwrap();

    // t1's upgrade to X waits on t2's S (a younger holder, so no die).
    let waiter = {
        let mgr = Arc::clone(&mgr);
        let t1 = Arc::clone(&t1);
        thread::spawn(move || mgr.acquire_table_lock("t", X, &t1))
    };
    thread::sleep(Duration::from_millis(50));

    // t2 now tries to upgrade too: at most one upgrader per resource.
    let err = mgr.acquire_table_lock("t", X, &t2).unwrap_err();
    assert!(matches!(err, DbError::TxnMultiUpgrade(_)));
    assert_eq!(t2.state(), TxnState::Aborted);

    mgr.release_all(&t2).unwrap();
    waiter.join().unwrap().unwrap();
    assert!(t1.holds_table_lock("t", &[X]));
}

/// Wait-die end to end: any younger transaction whose request conflicts
/// with an older holder dies immediately, whatever mode it asks for; only
/// an older requester ever waits. After the holder commits, later
/// transactions lock the tuple without contention.
#[test]
fn wait_die_scenario() {
    init_logs();
    let mgr = LockManager::new();
    let t1 = txn(1);
    let t2 = txn(2);
    let t3 = txn(3);

    mgr.acquire_table_lock("t", IX, &t1).unwrap();
    mgr.acquire_tuple_lock("t", b"k", X, &t1).unwrap();

    // txn 2 requests X on the same tuple: the holder is older, so the
    // younger writer dies instead of waiting.
    mgr.acquire_table_lock("t", IX, &t2).unwrap();
    let err = mgr.acquire_tuple_lock("t", b"k", X, &t2).unwrap_err();
    assert!(matches!(err, DbError::TxnDeadlockAbort(_)));
    assert_eq!(t2.state(), TxnState::Aborted);
    mgr.release_all(&t2).unwrap();

    // txn 3 requests S: same fate.
    mgr.acquire_table_lock("t", IS, &t3).unwrap();
    let err = mgr.acquire_tuple_lock("t", b"k", S, &t3).unwrap_err();
    assert!(matches!(err, DbError::TxnDeadlockAbort(_)));
    assert_eq!(t3.state(), TxnState::Aborted);
    mgr.release_all(&t3).unwrap();

    // txn 1 commits and releases; a fresh transaction takes the lock.
    t1.set_state(TxnState::Committed);
    mgr.release_all(&t1).unwrap();

    let t4 = txn(4);
    mgr.acquire_table_lock("t", IX, &t4).unwrap();
    mgr.acquire_tuple_lock("t", b"k", X, &t4).unwrap();
    assert_eq!(t4.state(), TxnState::Growing);
}

#[test]
fn older_txn_waits_for_younger_holder() {
    init_logs();
    let mgr = Arc::new(LockManager::new());
    let t1 = txn(1);
    let t2 = txn(2);
    mgr.acquire_table_lock("t", X, &t2).unwrap();

    let blocked = {
        let mgr = Arc::clone(&mgr);
        let t1 = Arc::clone(&t1);
        thread::spawn(move || mgr.acquire_table_lock("t", X, &t1))
    };
    thread::sleep(Duration::from_millis(50));
    // The older transaction never dies because of a younger one.
    assert_eq!(t1.state(), TxnState::Growing);

    t2.set_state(TxnState::Committed);
    mgr.release_all(&t2).unwrap();
    blocked.join().unwrap().unwrap();
    assert!(t1.holds_table_lock("t", &[X]));
}

#[test]
fn committed_release_keeps_state() {
    let mgr = LockManager::new();
    let t1 = txn(1);
    mgr.acquire_table_lock("t", S, &t1).unwrap();
    t1.set_state(TxnState::Committed);
    mgr.release_all(&t1).unwrap();
    assert_eq!(t1.state(), TxnState::Committed);
}

#[test]
fn undo_stack_is_lifo() {
    let t1 = txn(1);
    t1.push_undo(UndoRecord::Insert {
        table: "t".into(),
        key: b"a".to_vec(),
    });
    t1.push_undo(UndoRecord::Update {
        table: "t".into(),
        key: b"a".to_vec(),
        old: b"1".to_vec(),
    });
    assert_eq!(t1.undo_depth(), 2);
    assert!(matches!(t1.pop_undo(), Some(UndoRecord::Update { .. })));
    assert!(matches!(t1.pop_undo(), Some(UndoRecord::Insert { .. })));
    assert!(t1.pop_undo().is_none());
}
