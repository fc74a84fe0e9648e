//! The assembled engine: storage, catalog, optimizer, executors, and
//! transactions behind one handle.
//!
//! A [`Database`] owns a page file (plus a JSON catalog next to it) and
//! serves bound plan trees: [`Database::execute`] optimizes the plan,
//! generates the operator tree, and drains it under the caller's
//! transaction. The SQL frontend — lexer, parser, binder — lives outside
//! this workspace; tests construct plans directly.
//!
//! # Example
//!
//! ```no_run
//! use std::path::PathBuf;
//!
//! use common::Config;
//! use database::Database;
//! use catalog::{ColumnMeta, TableMeta};
//! use types::SqlType;
//!
//! let db = Database::create(
//!     Config::builder().path(PathBuf::from("demo.wren")).build(),
//! )
//! .unwrap();
//! db.create_table(TableMeta::new(
//!     "users",
//!     vec![
//!         ColumnMeta::new("id", SqlType::Int64),
//!         ColumnMeta::new("name", SqlType::Varchar),
//!     ],
//!     0,
//! ))
//! .unwrap();
//! let txn = db.begin();
//! // ... execute plans under `txn` ...
//! db.commit(&txn).unwrap();
//! ```

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use catalog::{Catalog, TableMeta, TableStatsBuilder};
use common::{Config, DbResult, RecordBatch};
use engine::{StorageEngine, TxnManager};
use executor::{decode_row, execute_plan};
use expr::OutputSchema;
use log::info;
use planner::PlanNode;
use storage::PageManager;
use txn::{LockManager, Txn};

pub struct Database {
    config: Config,
    engine: Arc<StorageEngine>,
    txn_mgr: TxnManager,
    catalog: RwLock<Catalog>,
}

impl Database {
    /// Create a fresh database file (and catalog) at the configured path.
    pub fn create(config: Config) -> DbResult<Self> {
        let pgm = Arc::new(PageManager::create(&config.path, config.buffer_pool_pages)?);
        let lock_mgr = Arc::new(LockManager::new());
        let engine = Arc::new(StorageEngine::create(pgm, Arc::clone(&lock_mgr))?);
        let txn_mgr = TxnManager::new(Arc::clone(&engine), lock_mgr);
        let db = Self {
            config,
            engine,
            txn_mgr,
            catalog: RwLock::new(Catalog::new()),
        };
        db.save_catalog()?;
        info!("created database at {}", db.config.path.display());
        Ok(db)
    }

    /// Open an existing database file and its catalog.
    pub fn open(config: Config) -> DbResult<Self> {
        let pgm = Arc::new(PageManager::open(&config.path, config.buffer_pool_pages)?);
        let lock_mgr = Arc::new(LockManager::new());
        let engine = Arc::new(StorageEngine::open(pgm, Arc::clone(&lock_mgr))?);
        let txn_mgr = TxnManager::new(Arc::clone(&engine), lock_mgr);
        let catalog = Catalog::load(&catalog_path(&config.path))?;
        Ok(Self {
            config,
            engine,
            txn_mgr,
            catalog: RwLock::new(catalog),
        })
    }

    pub fn engine(&self) -> &Arc<StorageEngine> {
        &self.engine
    }

    /// Register a table and create its clustered storage.
    pub fn create_table(&self, meta: TableMeta) -> DbResult<()> {
        let name = meta.name.clone();
        self.catalog.write().unwrap().create_table(meta)?;
        if let Err(e) = self.engine.create_table(&name) {
            // Keep catalog and storage in step when storage creation fails.
            let _ = self.catalog.write().unwrap().drop_table(&name);
            return Err(e);
        }
        self.save_catalog()
    }

    pub fn drop_table(&self, name: &str) -> DbResult<()> {
        self.catalog.write().unwrap().drop_table(name)?;
        self.engine.drop_table(name)?;
        self.save_catalog()
    }

    /// Rebuild a table's statistics with a full scan. Statistics are
    /// read-only at query time; run this after bulk loads.
    pub fn analyze(&self, table: &str) -> DbResult<()> {
        let num_columns = {
            let catalog = self.catalog.read().unwrap();
            catalog.table(table)?.columns.len()
        };
        let mut builder = TableStatsBuilder::new(
            num_columns,
            self.config.cms_width,
            self.config.cms_depth,
            self.config.hll_buckets,
        );
        let mut cursor = self.engine.scan_unlocked(table)?;
        while let Some((_, bytes)) = cursor.next()? {
            builder.observe(&decode_row(&bytes)?);
        }
        let stats = builder.finish();
        info!(
            "analyzed '{table}': {} tuples, {} columns",
            stats.tuple_num, num_columns
        );
        self.catalog.write().unwrap().set_stats(table, stats);
        Ok(())
    }

    pub fn begin(&self) -> Arc<Txn> {
        self.txn_mgr.begin()
    }

    pub fn commit(&self, txn: &Arc<Txn>) -> DbResult<()> {
        self.txn_mgr.commit(txn)
    }

    pub fn abort(&self, txn: &Arc<Txn>) -> DbResult<()> {
        self.txn_mgr.abort(txn)
    }

    /// Optimize a bound plan against the current statistics.
    pub fn optimize(&self, plan: PlanNode) -> PlanNode {
        let catalog = self.catalog.read().unwrap();
        planner::optimize(plan, &catalog)
    }

    /// Optimize and run a plan under `txn`, returning the full result.
    pub fn execute(&self, plan: PlanNode, txn: &Arc<Txn>) -> DbResult<RecordBatch> {
        let plan = self.optimize(plan);
        let schema = plan.output_schema();
        let catalog = self.catalog.read().unwrap();
        let rows = execute_plan(&plan, &catalog, &self.engine, txn)?;
        let columns = if schema.size() == 0 {
            vec!["affected".to_string()]
        } else {
            schema.names()
        };
        Ok(RecordBatch { columns, rows })
    }

    /// Scan schema of a table, with global column ids starting at
    /// `base_id`; the shape plan builders and tests want.
    pub fn scan_schema(&self, table: &str, base_id: common::ColumnId) -> DbResult<OutputSchema> {
        let catalog = self.catalog.read().unwrap();
        Ok(planner::table_scan_schema(catalog.table(table)?, base_id))
    }

    pub fn table_meta(&self, table: &str) -> DbResult<TableMeta> {
        Ok(self.catalog.read().unwrap().table(table)?.clone())
    }

    /// Flush dirty pages to disk; durability ends here, there is no log.
    pub fn flush(&self) -> DbResult<()> {
        self.engine.flush()
    }

    fn save_catalog(&self) -> DbResult<()> {
        self.catalog
            .read()
            .unwrap()
            .save(&catalog_path(&self.config.path))
    }
}

fn catalog_path(db_path: &Path) -> PathBuf {
    let mut path = db_path.to_path_buf();
    path.set_extension("catalog.json");
    path
}
