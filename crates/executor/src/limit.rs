//! Limit/offset and duplicate elimination.

use common::{DbResult, Row};

use crate::{rows_equal, Executor, TupleStore};

/// Discard `offset` rows, then emit up to `limit`.
pub struct LimitExec {
    input: Box<dyn Executor>,
    limit: u64,
    offset: u64,
    seen: u64,
}

impl LimitExec {
    pub fn new(input: Box<dyn Executor>, limit: u64, offset: u64) -> Self {
        Self {
            input,
            limit,
            offset,
            seen: 0,
        }
    }
}

impl Executor for LimitExec {
    fn init(&mut self) -> DbResult<()> {
        self.seen = 0;
        self.input.init()
    }

    fn next(&mut self) -> DbResult<Option<Row>> {
        while self.seen < self.offset {
            self.seen += 1;
            if self.input.next()?.is_none() {
                return Ok(None);
            }
        }
        if self.seen >= self.offset + self.limit {
            return Ok(None);
        }
        self.seen += 1;
        self.input.next()
    }
}

/// Emit a row only when no previously emitted row equals it column-wise.
/// The linear scan over the accumulated output is fine for the small
/// inputs this operator sees after the rest of the pipeline.
pub struct DistinctExec {
    input: Box<dyn Executor>,
    emitted: TupleStore,
}

impl DistinctExec {
    pub fn new(input: Box<dyn Executor>) -> Self {
        Self {
            input,
            emitted: TupleStore::new(),
        }
    }
}

impl Executor for DistinctExec {
    fn init(&mut self) -> DbResult<()> {
        self.emitted.clear();
        self.input.init()
    }

    fn next(&mut self) -> DbResult<Option<Row>> {
        while let Some(row) = self.input.next()? {
            if self.emitted.rows().iter().any(|seen| rows_equal(seen, &row)) {
                continue;
            }
            self.emitted.append(row.clone());
            return Ok(Some(row));
        }
        Ok(None)
    }
}
