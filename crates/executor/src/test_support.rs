//! Shared fixtures for operator tests.

use common::{DbResult, Row};
use expr::{OutputColumn, OutputSchema};
use types::{SqlType, Value};

use crate::Executor;

/// In-memory executor feeding canned rows.
pub struct MockExec {
    rows: Vec<Row>,
    pos: usize,
}

impl MockExec {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows, pos: 0 }
    }
}

impl Executor for MockExec {
    fn init(&mut self) -> DbResult<()> {
        self.pos = 0;
        Ok(())
    }

    fn next(&mut self) -> DbResult<Option<Row>> {
        if self.pos >= self.rows.len() {
            return Ok(None);
        }
        self.pos += 1;
        Ok(Some(self.rows[self.pos - 1].clone()))
    }
}

/// Schema of `n` Int64 columns with ids `0..n`.
pub fn int_schema(n: u32) -> OutputSchema {
    OutputSchema::new(
        (0..n)
            .map(|i| OutputColumn::new(i, format!("c{i}"), SqlType::Int64))
            .collect(),
    )
}

/// Rows of Int64 values.
pub fn int_rows<const N: usize>(data: &[[i64; N]]) -> Vec<Row> {
    data.iter()
        .map(|vals| Row::new(vals.iter().map(|v| Value::Int(*v)).collect()))
        .collect()
}

use catalog::{Catalog, TableMeta};
use engine::{StorageEngine, TxnManager};
use std::sync::Arc;
use txn::{LockManager, Txn};

/// A disk-backed database fixture: page file, lock manager, storage
/// engine, transaction manager, catalog.
pub struct TestDb {
    pub engine: Arc<StorageEngine>,
    pub manager: TxnManager,
    pub catalog: Catalog,
    _dir: tempfile::TempDir,
}

pub fn test_db() -> TestDb {
    let dir = tempfile::tempdir().unwrap();
    let pgm = Arc::new(storage::PageManager::create(dir.path().join("t.db"), 64).unwrap());
    let lock_mgr = Arc::new(LockManager::new());
    let engine = Arc::new(StorageEngine::create(pgm, Arc::clone(&lock_mgr)).unwrap());
    let manager = TxnManager::new(Arc::clone(&engine), lock_mgr);
    TestDb {
        engine,
        manager,
        catalog: Catalog::new(),
        _dir: dir,
    }
}

impl TestDb {
    pub fn create_table(&mut self, meta: TableMeta) {
        self.engine.create_table(&meta.name).unwrap();
        self.catalog.create_table(meta).unwrap();
    }

    /// Commit a batch of rows into a table, keyed on its primary key.
    pub fn seed(&self, table: &str, rows: Vec<Row>) {
        let meta = self.catalog.table(table).unwrap();
        let txn = self.manager.begin();
        let modify = self.engine.modify_handle(Arc::clone(&txn), table).unwrap();
        for row in rows {
            let key = row.values()[meta.primary_key].encode_key();
            assert!(modify.insert(&key, &crate::encode_row(&row).unwrap()).unwrap());
        }
        self.manager.commit(&txn).unwrap();
    }

    pub fn begin(&self) -> Arc<Txn> {
        self.manager.begin()
    }
}
