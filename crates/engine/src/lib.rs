//! Transactional table storage: one clustered B+-tree per table over a
//! shared page manager, accessed through lock-aware handles.
//!
//! - [`ReadHandle`] takes a table-level `S` lock and serves point gets and
//!   key-ordered cursors.
//! - [`ModifyHandle`] takes a table-level `IX` lock; every mutation locks
//!   the tuple in `X`, records its inverse on the transaction's undo stack,
//!   and only then touches the tree.
//! - [`TxnManager`] hands out transactions and drives commit and rollback.
//!
//! The table-name to tree-meta-page mapping lives on the page manager's
//! super page so a database file is self-describing.

mod manager;


pub use manager::TxnManager;

use std::sync::{Arc, Mutex};

use btree::{BPlusTree, BytewiseComparator, TreeIter};
use common::{DbError, DbResult, PageId};
use log::debug;
use storage::{PageManager, SUPER_PAGE};
use txn::{LockManager, LockMode, Txn, UndoRecord};

/// Inclusive/exclusive endpoint of a key range; `None` is unbounded.
pub type KeyBound = Option<(Vec<u8>, bool)>;

/// Table storage over a shared page manager.
pub struct StorageEngine {
    pgm: Arc<PageManager>,
    lock_mgr: Arc<LockManager>,
    registry: Mutex<Vec<(String, PageId)>>,
}

impl StorageEngine {
    /// Initialize an engine over a freshly created page file.
    pub fn create(pgm: Arc<PageManager>, lock_mgr: Arc<LockManager>) -> DbResult<Self> {
        let engine = Self {
            pgm,
            lock_mgr,
            registry: Mutex::new(Vec::new()),
        };
        engine.persist_registry()?;
        Ok(engine)
    }

    /// Open an engine over an existing page file, loading the table
    /// registry from the super page.
    pub fn open(pgm: Arc<PageManager>, lock_mgr: Arc<LockManager>) -> DbResult<Self> {
        let super_page = pgm.plain_page(SUPER_PAGE)?;
        let len = super_page.read_u32(0) as usize;
        let registry = if len == 0 {
            Vec::new()
        } else {
            let bytes = super_page.read(4, len);
            let (entries, _): (Vec<(String, u32)>, usize) =
                bincode::serde::decode_from_slice(&bytes, bincode::config::legacy()).map_err(
                    |e| DbError::Storage(format!("corrupt table registry: {e}")),
                )?;
            entries
                .into_iter()
                .map(|(name, pgid)| (name, PageId(pgid)))
                .collect()
        };
        drop(super_page);
        Ok(Self {
            pgm,
            lock_mgr,
            registry: Mutex::new(registry),
        })
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.lock_mgr
    }

    /// Create the clustered tree backing a new table.
    pub fn create_table(&self, name: &str) -> DbResult<()> {
        {
            let registry = self.registry.lock().unwrap();
            if registry.iter().any(|(n, _)| n == name) {
                return Err(DbError::Storage(format!("table '{name}' already stored")));
            }
        }
        let tree = BPlusTree::create(self.pgm.clone(), BytewiseComparator)?;
        self.registry
            .lock()
            .unwrap()
            .push((name.to_string(), tree.meta_page_id()));
        self.persist_registry()?;
        debug!("created table storage for '{name}'");
        Ok(())
    }

    /// Destroy a table's tree and forget it.
    pub fn drop_table(&self, name: &str) -> DbResult<()> {
        let meta = {
            let mut registry = self.registry.lock().unwrap();
            let pos = registry
                .iter()
                .position(|(n, _)| n == name)
                .ok_or_else(|| DbError::Storage(format!("no storage for table '{name}'")))?;
            registry.remove(pos).1
        };
        BPlusTree::open(self.pgm.clone(), meta, BytewiseComparator).destroy()?;
        self.persist_registry()
    }

    pub fn tables(&self) -> Vec<String> {
        self.registry
            .lock()
            .unwrap()
            .iter()
            .map(|(n, _)| n.clone())
            .collect()
    }

    /// Shared read access: takes a table-level `S` lock for the txn, which
    /// covers every tuple in the table. A txn already writing the table
    /// upgrades to `SIX` instead; one already holding a covering lock
    /// acquires nothing new.
    pub fn read_handle(
        self: &Arc<Self>,
        txn: &Arc<Txn>,
        table: &str,
    ) -> DbResult<ReadHandle> {
        use LockMode::*;
        if !txn.holds_table_lock(table, &[S, SIX, X]) {
            let mode = if txn.holds_table_lock(table, &[IX]) { SIX } else { S };
            self.lock_mgr.acquire_table_lock(table, mode, txn)?;
        }
        Ok(ReadHandle {
            engine: Arc::clone(self),
            table: table.to_string(),
        })
    }

    /// Write access: takes a table-level `IX` lock (`SIX` when the txn is
    /// already reading the table); tuples are locked `X` one by one as they
    /// are touched.
    pub fn modify_handle(
        self: &Arc<Self>,
        txn: Arc<Txn>,
        table: &str,
    ) -> DbResult<ModifyHandle> {
        use LockMode::*;
        if !txn.holds_table_lock(table, &[IX, SIX, X]) {
            let mode = if txn.holds_table_lock(table, &[S]) { SIX } else { IX };
            self.lock_mgr.acquire_table_lock(table, mode, &txn)?;
        }
        Ok(ModifyHandle {
            engine: Arc::clone(self),
            table: table.to_string(),
            txn,
        })
    }

    /// Current largest key of a table, for auto-increment key generation.
    pub fn max_key(&self, table: &str) -> DbResult<Option<Vec<u8>>> {
        self.tree(table)?.max_key()
    }

    /// Number of live tuples in a table.
    pub fn tuple_num(&self, table: &str) -> DbResult<u64> {
        self.tree(table)?.tuple_num()
    }

    /// Unlocked full scan, for offline passes like statistics builds.
    pub fn scan_unlocked(&self, table: &str) -> DbResult<TableCursor> {
        Ok(TableCursor::new(self.tree(table)?.begin()?, None))
    }

    /// Apply the inverse of a logged mutation, bypassing locks and undo
    /// logging. Only the rollback path uses this; the aborting transaction
    /// still holds `X` locks on every key it touched.
    pub(crate) fn apply_undo(&self, record: &UndoRecord) -> DbResult<()> {
        match record {
            UndoRecord::Insert { table, key } => {
                self.tree(table)?.delete(key)?;
            }
            UndoRecord::Delete { table, key, old } => {
                self.tree(table)?.insert(key, old)?;
            }
            UndoRecord::Update { table, key, old } => {
                self.tree(table)?.update(key, old)?;
            }
        }
        Ok(())
    }

    /// Flush every dirty page to the backing file.
    pub fn flush(&self) -> DbResult<()> {
        self.pgm.flush()
    }

    fn tree(&self, table: &str) -> DbResult<BPlusTree> {
        let registry = self.registry.lock().unwrap();
        let meta = registry
            .iter()
            .find(|(n, _)| n == table)
            .map(|(_, pgid)| *pgid)
            .ok_or_else(|| DbError::Storage(format!("no storage for table '{table}'")))?;
        Ok(BPlusTree::open(self.pgm.clone(), meta, BytewiseComparator))
    }

    fn persist_registry(&self) -> DbResult<()> {
        let entries: Vec<(String, u32)> = self
            .registry
            .lock()
            .unwrap()
            .iter()
            .map(|(n, pgid)| (n.clone(), pgid.0))
            .collect();
        let bytes = bincode::serde::encode_to_vec(&entries, bincode::config::legacy())
            .map_err(|e| DbError::Storage(format!("encode table registry: {e}")))?;
        if bytes.len() + 4 > storage::PAGE_SIZE {
            return Err(DbError::Storage("table registry exceeds super page".into()));
        }
        let super_page = self.pgm.plain_page(SUPER_PAGE)?;
        super_page.write_u32(0, bytes.len() as u32);
        super_page.write(4, &bytes);
        Ok(())
    }
}

/// Key-ordered cursor with an optional upper bound. The underlying tree
/// iterator (and its page pin) is dropped as soon as the cursor finishes,
/// not when the cursor itself goes away.
pub struct TableCursor {
    iter: Option<TreeIter<BytewiseComparator>>,
    upper: KeyBound,
}

impl TableCursor {
    fn new(iter: TreeIter<BytewiseComparator>, upper: KeyBound) -> Self {
        Self {
            iter: Some(iter),
            upper,
        }
    }

    /// Next key-value pair, or `None` past the end of the range.
    pub fn next(&mut self) -> DbResult<Option<(Vec<u8>, Vec<u8>)>> {
        let Some(iter) = self.iter.as_mut() else {
            return Ok(None);
        };
        let Some((key, value)) = iter.next()? else {
            self.iter = None;
            return Ok(None);
        };
        if let Some((bound, inclusive)) = &self.upper {
            let beyond = if *inclusive {
                key > *bound
            } else {
                key >= *bound
            };
            if beyond {
                self.iter = None;
                return Ok(None);
            }
        }
        Ok(Some((key, value)))
    }
}

/// Read access to one table under a granted table `S` lock.
pub struct ReadHandle {
    engine: Arc<StorageEngine>,
    table: String,
}

impl std::fmt::Debug for ReadHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadHandle").field("table", &self.table).finish()
    }
}

impl ReadHandle {
    pub fn get(&self, key: &[u8]) -> DbResult<Option<Vec<u8>>> {
        self.engine.tree(&self.table)?.get(key)
    }

    /// Cursor over the whole table.
    pub fn scan(&self) -> DbResult<TableCursor> {
        Ok(TableCursor::new(self.engine.tree(&self.table)?.begin()?, None))
    }

    /// Cursor over `[lower, upper]` with per-endpoint inclusivity.
    pub fn range(&self, lower: KeyBound, upper: KeyBound) -> DbResult<TableCursor> {
        let tree = self.engine.tree(&self.table)?;
        let iter = match &lower {
            None => tree.begin()?,
            Some((key, true)) => tree.lower_bound(key)?,
            Some((key, false)) => tree.upper_bound(key)?,
        };
        Ok(TableCursor::new(iter, upper))
    }
}

/// Write access to one table under a granted table `IX` lock.
pub struct ModifyHandle {
    engine: Arc<StorageEngine>,
    table: String,
    txn: Arc<Txn>,
}

impl ModifyHandle {
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Insert a fresh pair; false if the key already exists. The undo
    /// record is pushed before the tree is touched.
    pub fn insert(&self, key: &[u8], value: &[u8]) -> DbResult<bool> {
        let tree = self.lock_tuple(key)?;
        if tree.get(key)?.is_some() {
            return Ok(false);
        }
        self.txn.push_undo(UndoRecord::Insert {
            table: self.table.clone(),
            key: key.to_vec(),
        });
        tree.insert(key, value)
    }

    /// Replace an existing value; false if the key is absent.
    pub fn update(&self, key: &[u8], value: &[u8]) -> DbResult<bool> {
        let tree = self.lock_tuple(key)?;
        let Some(old) = tree.get(key)? else {
            return Ok(false);
        };
        self.txn.push_undo(UndoRecord::Update {
            table: self.table.clone(),
            key: key.to_vec(),
            old,
        });
        tree.update(key, value)
    }

    /// Remove a key; false if it is absent.
    pub fn delete(&self, key: &[u8]) -> DbResult<bool> {
        let tree = self.lock_tuple(key)?;
        let Some(old) = tree.get(key)? else {
            return Ok(false);
        };
        self.txn.push_undo(UndoRecord::Delete {
            table: self.table.clone(),
            key: key.to_vec(),
            old,
        });
        tree.delete(key)
    }

    /// Read through the write handle, under the tuple's `X` lock.
    pub fn get(&self, key: &[u8]) -> DbResult<Option<Vec<u8>>> {
        let tree = self.lock_tuple(key)?;
        tree.get(key)
    }

    fn lock_tuple(&self, key: &[u8]) -> DbResult<BPlusTree> {
        self.engine
            .lock_mgr
            .acquire_tuple_lock(&self.table, key, LockMode::X, &self.txn)?;
        self.engine.tree(&self.table)
    }
}
