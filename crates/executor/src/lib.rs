//! Volcano-style query execution.
//!
//! Every operator implements [`Executor`]: `init` may be expensive
//! (materialization, lock acquisition), `next` pulls one row at a time and
//! returns `None` at end of stream. The [`build_executor`] generator turns
//! an optimized [`planner::PlanNode`] tree into an operator tree bound to a
//! transaction.

mod agg;
mod builder;
mod dml;
mod filter;
mod join;
mod limit;
mod project;
mod scan;
mod sort;

#[cfg(test)]
pub(crate) mod test_support;

pub use agg::AggregateExec;
pub use builder::{build_executor, execute_plan};
pub use dml::{DeleteExec, FkCheck, InsertExec, ReverseFkCheck};
pub use filter::FilterExec;
pub use join::{HashJoinExec, NestedLoopJoinExec};
pub use limit::{DistinctExec, LimitExec};
pub use project::ProjectExec;
pub use scan::{PrintExec, RangeScanExec, SeqScanExec};
pub use sort::{OrderByExec, SortKey};

use std::collections::hash_map::DefaultHasher;
use std::hash::Hasher;

use common::{DbError, DbResult, Row};
use expr::ExprFunction;
use types::Value;

/// Pull-based operator interface.
pub trait Executor {
    /// Prepare for iteration; may materialize inputs and take locks.
    fn init(&mut self) -> DbResult<()>;

    /// Produce the next row, or `None` at end of stream.
    fn next(&mut self) -> DbResult<Option<Row>>;
}

/// Drain an executor into a vector.
pub fn collect(exec: &mut dyn Executor) -> DbResult<Vec<Row>> {
    exec.init()?;
    let mut rows = Vec::new();
    while let Some(row) = exec.next()? {
        rows.push(row);
    }
    Ok(rows)
}

/// Append-only row arena used by blocking operators. Indices stay stable
/// until `clear`.
#[derive(Debug, Default)]
pub struct TupleStore {
    rows: Vec<Row>,
}

impl TupleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, row: Row) -> usize {
        self.rows.push(row);
        self.rows.len() - 1
    }

    pub fn get(&self, idx: usize) -> &Row {
        &self.rows[idx]
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn clear(&mut self) {
        self.rows.clear();
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }
}

/// Row image stored as a B+-tree value.
pub fn encode_row(row: &Row) -> DbResult<Vec<u8>> {
    bincode::serde::encode_to_vec(row.values(), bincode::config::legacy())
        .map_err(|e| DbError::Executor(format!("encode row: {e}")))
}

pub fn decode_row(bytes: &[u8]) -> DbResult<Row> {
    let (values, _): (Vec<Value>, usize) =
        bincode::serde::decode_from_slice(bytes, bincode::config::legacy())
            .map_err(|e| DbError::Executor(format!("decode row: {e}")))?;
    Ok(Row::new(values))
}

/// Hash of the values produced by a list of key expressions: strings hash
/// their bytes, numerics their 8 raw bytes. Used by hash join and
/// aggregation grouping; collisions are resolved by the residual predicate
/// (join) or accepted (grouping).
pub fn hash_keys(fns: &[ExprFunction], row: &Row) -> DbResult<u64> {
    let mut hasher = DefaultHasher::new();
    hasher.write_u64(233);
    for f in fns {
        match f.evaluate(row)? {
            Value::Str(s) => {
                hasher.write(s.as_bytes());
            }
            Value::Int(v) => hasher.write_u64(v as u64),
            Value::Float(v) => hasher.write_u64(v.to_bits()),
            Value::Null => hasher.write_u8(0),
        }
    }
    Ok(hasher.finish())
}

/// Column-wise row equality, used by `Distinct`.
pub(crate) fn rows_equal(a: &Row, b: &Row) -> bool {
    a.values() == b.values()
}

/// Concatenate a left and right row, left columns first.
pub(crate) fn concat_rows(left: &Row, right: &Row) -> Row {
    let mut values = left.values().to_vec();
    values.extend(right.values().iter().cloned());
    Row::new(values)
}
