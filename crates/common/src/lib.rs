pub mod pretty;

use serde::{Deserialize, Serialize};
use std::{io, path::PathBuf};
use thiserror::Error;
use types::Value;

/// Global identifier for a bound column within a plan tree. Assigned by the
/// binder; unique per table instance in the plan.
pub type ColumnId = u32;

/// On-disk page identifier. Page 0 is the page-manager meta page, page 1 the
/// pre-allocated super page.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PageId(pub u32);

impl PageId {
    /// Sentinel for "no page" (page 0 can never be linked or free-listed).
    pub const INVALID: PageId = PageId(0);

    pub fn is_invalid(&self) -> bool {
        self.0 == 0
    }
}

/// Monotonic transaction identifier; a smaller id means an older transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxnId(pub u64);

/// Positional row of runtime values.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Row(pub Vec<Value>);

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Row(values)
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Row(values)
    }
}

/// Rectangular result set carrying column labels and rows.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecordBatch {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

/// Canonical error type shared across the engine's subsystems.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("catalog: {0}")]
    Catalog(String),
    #[error("plan: {0}")]
    Plan(String),
    #[error("exec: {0}")]
    Executor(String),
    #[error("storage: {0}")]
    Storage(String),
    #[error("integrity violation: {0}")]
    Integrity(String),
    /// Lock or unlock in an illegal transaction state, or an illegal upgrade.
    #[error("txn invalid behavior: {0}")]
    TxnInvalidBehavior(String),
    /// A second transaction attempted to upgrade on the same resource.
    #[error("txn multi upgrade: {0}")]
    TxnMultiUpgrade(String),
    /// Wait-die chose this (younger) transaction as the victim.
    #[error("txn aborted by deadlock prevention: {0}")]
    TxnDeadlockAbort(String),
    /// All buffer-pool pages are pinned; fatal for the current query.
    #[error("buffer pool exhausted: {0}")]
    BufferExhausted(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Result alias that carries a `DbError`.
pub type DbResult<T> = Result<T, DbError>;

/// Runtime configuration for the engine.
///
/// # Example
/// ```
/// use common::Config;
/// use std::path::PathBuf;
///
/// let config = Config::builder()
///     .path(PathBuf::from("./db.wren"))
///     .buffer_pool_pages(64)
///     .build();
/// assert_eq!(config.cms_width, 4096);
/// ```
#[derive(Clone, Debug, Serialize, Deserialize, bon::Builder)]
pub struct Config {
    /// Backing database file.
    #[builder(default = PathBuf::from("./db.wren"))]
    pub path: PathBuf,
    /// Number of 4 KiB pages the buffer pool keeps resident. Must be >= 2.
    #[builder(default = 256)]
    pub buffer_pool_pages: usize,
    /// Count-Min Sketch counters per hash function.
    #[builder(default = 4096)]
    pub cms_width: usize,
    /// Count-Min Sketch hash functions.
    #[builder(default = 4)]
    pub cms_depth: usize,
    /// HyperLogLog bucket count; must be a power of two.
    #[builder(default = 1024)]
    pub hll_buckets: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./db.wren"),
            buffer_pool_pages: 256,
            cms_width: 4096,
            cms_depth: 4,
            hll_buckets: 1024,
        }
    }
}

/// Convenient re-exports for downstream crates.
pub mod prelude {
    pub use crate::{Config, DbError, DbResult, PageId, RecordBatch, Row, TxnId};
    pub use types::{SqlType, Value};
}
