//! Table catalog: schemas, key constraints, and per-table statistics.
//!
//! Schemas are persisted as JSON next to the database file; statistics are
//! rebuilt by an analyze pass and live only in memory.

mod stats;

pub use stats::{ColumnStats, CountMinSketch, HyperLogLog, TableStats, TableStatsBuilder};

use std::{fs, path::Path};

use ahash::RandomState;
use common::{DbError, DbResult};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use types::SqlType;

type Map<K, V> = HashMap<K, V, RandomState>;

/// A column of a table schema.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    pub ty: SqlType,
}

impl ColumnMeta {
    pub fn new(name: impl Into<String>, ty: SqlType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// A foreign-key constraint: `columns[column]` must reference the primary
/// key of `ref_table`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub column: usize,
    pub ref_table: String,
}

/// Metadata describing a registered table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TableMeta {
    pub name: String,
    pub columns: Vec<ColumnMeta>,
    /// Ordinal of the primary-key column; the clustered tree is keyed on it.
    pub primary_key: usize,
    /// When set, inserts may omit the PK and the engine assigns the next
    /// integer after the table's current maximum.
    pub auto_inc_pk: bool,
    pub foreign_keys: Vec<ForeignKey>,
}

impl TableMeta {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnMeta>, primary_key: usize) -> Self {
        Self {
            name: name.into(),
            columns,
            primary_key,
            auto_inc_pk: false,
            foreign_keys: Vec::new(),
        }
    }

    pub fn with_auto_inc(mut self) -> Self {
        self.auto_inc_pk = true;
        self
    }

    pub fn with_foreign_key(mut self, column: usize, ref_table: impl Into<String>) -> Self {
        self.foreign_keys.push(ForeignKey {
            column,
            ref_table: ref_table.into(),
        });
        self
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn pk_column(&self) -> &ColumnMeta {
        &self.columns[self.primary_key]
    }

    fn validate(&self) -> DbResult<()> {
        if self.columns.is_empty() {
            return Err(DbError::Catalog(format!(
                "table '{}' must have at least one column",
                self.name
            )));
        }
        if self.primary_key >= self.columns.len() {
            return Err(DbError::Catalog(format!(
                "table '{}' primary key ordinal {} out of range",
                self.name, self.primary_key
            )));
        }
        let mut seen = Map::default();
        for (i, column) in self.columns.iter().enumerate() {
            if seen.insert(column.name.clone(), i).is_some() {
                return Err(DbError::Catalog(format!(
                    "duplicate column '{}' in table '{}'",
                    column.name, self.name
                )));
            }
        }
        for fk in &self.foreign_keys {
            if fk.column >= self.columns.len() {
                return Err(DbError::Catalog(format!(
                    "foreign key ordinal {} out of range in table '{}'",
                    fk.column, self.name
                )));
            }
        }
        Ok(())
    }
}

/// Registry of table schemas plus the statistics attached to them.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Catalog {
    tables: Vec<TableMeta>,
    #[serde(skip)]
    name_index: Map<String, usize>,
    #[serde(skip)]
    stats: Map<String, TableStats>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a catalog from disk; missing file means an empty catalog.
    pub fn load(path: &Path) -> DbResult<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let data = fs::read_to_string(path)?;
        let mut catalog: Catalog = serde_json::from_str(&data)
            .map_err(|err| DbError::Catalog(format!("invalid catalog file: {err}")))?;
        catalog.rebuild_index();
        Ok(catalog)
    }

    /// Persist the schemas (not statistics) as pretty JSON.
    pub fn save(&self, path: &Path) -> DbResult<()> {
        let data = serde_json::to_string_pretty(self)
            .map_err(|err| DbError::Catalog(format!("serialize failed: {err}")))?;
        fs::write(path, data)?;
        Ok(())
    }

    pub fn create_table(&mut self, meta: TableMeta) -> DbResult<()> {
        meta.validate()?;
        if self.name_index.contains_key(&meta.name) {
            return Err(DbError::Catalog(format!(
                "table '{}' already exists",
                meta.name
            )));
        }
        for fk in &meta.foreign_keys {
            if fk.ref_table != meta.name && !self.name_index.contains_key(&fk.ref_table) {
                return Err(DbError::Catalog(format!(
                    "foreign key of '{}' references unknown table '{}'",
                    meta.name, fk.ref_table
                )));
            }
        }
        self.tables.push(meta);
        self.rebuild_index();
        Ok(())
    }

    pub fn drop_table(&mut self, name: &str) -> DbResult<()> {
        let idx = self
            .name_index
            .get(name)
            .copied()
            .ok_or_else(|| DbError::Catalog(format!("unknown table '{name}'")))?;
        self.tables.remove(idx);
        self.stats.remove(name);
        self.rebuild_index();
        Ok(())
    }

    pub fn table(&self, name: &str) -> DbResult<&TableMeta> {
        self.name_index
            .get(name)
            .and_then(|&idx| self.tables.get(idx))
            .ok_or_else(|| DbError::Catalog(format!("unknown table '{name}'")))
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableMeta> {
        self.tables.iter()
    }

    /// Tables whose foreign keys reference `name`, with the referencing
    /// column ordinals. Used by the delete path's integrity check.
    pub fn referencing_tables(&self, name: &str) -> Vec<(&TableMeta, usize)> {
        let mut out = Vec::new();
        for table in &self.tables {
            for fk in &table.foreign_keys {
                if fk.ref_table == name {
                    out.push((table, fk.column));
                }
            }
        }
        out
    }

    pub fn set_stats(&mut self, name: &str, stats: TableStats) {
        self.stats.insert(name.to_string(), stats);
    }

    pub fn stats(&self, name: &str) -> Option<&TableStats> {
        self.stats.get(name)
    }

    fn rebuild_index(&mut self) {
        self.name_index.clear();
        for (idx, table) in self.tables.iter().enumerate() {
            self.name_index.insert(table.name.clone(), idx);
        }
    }
}
