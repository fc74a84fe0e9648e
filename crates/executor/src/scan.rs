//! Leaf operators: table scans and constant rows.

use std::sync::Arc;

use common::{DbResult, Row};
use engine::{KeyBound, StorageEngine, TableCursor};
use expr::ExprFunction;
use txn::Txn;
use types::Value;

use crate::{decode_row, Executor};

/// Full-table scan in key order, with an optional residual predicate.
pub struct SeqScanExec {
    engine: Arc<StorageEngine>,
    txn: Arc<Txn>,
    table: String,
    predicate: Option<ExprFunction>,
    cursor: Option<TableCursor>,
}

impl SeqScanExec {
    pub fn new(
        engine: Arc<StorageEngine>,
        txn: Arc<Txn>,
        table: String,
        predicate: Option<ExprFunction>,
    ) -> Self {
        Self {
            engine,
            txn,
            table,
            predicate,
            cursor: None,
        }
    }
}

impl Executor for SeqScanExec {
    fn init(&mut self) -> DbResult<()> {
        let handle = self.engine.read_handle(&self.txn, &self.table)?;
        self.cursor = Some(handle.scan()?);
        Ok(())
    }

    fn next(&mut self) -> DbResult<Option<Row>> {
        let cursor = self
            .cursor
            .as_mut()
            .ok_or_else(|| common::DbError::Executor("scan used before init".into()))?;
        while let Some((_key, value)) = cursor.next()? {
            let row = decode_row(&value)?;
            match &self.predicate {
                Some(p) if !p.matches(&row)? => continue,
                _ => return Ok(Some(row)),
            }
        }
        Ok(None)
    }
}

/// Scan bounded to `[l, r]` on the primary key, endpoints optional and
/// individually inclusive or exclusive.
pub struct RangeScanExec {
    engine: Arc<StorageEngine>,
    txn: Arc<Txn>,
    table: String,
    range_l: Option<(Value, bool)>,
    range_r: Option<(Value, bool)>,
    predicate: Option<ExprFunction>,
    cursor: Option<TableCursor>,
}

impl RangeScanExec {
    pub fn new(
        engine: Arc<StorageEngine>,
        txn: Arc<Txn>,
        table: String,
        range_l: Option<(Value, bool)>,
        range_r: Option<(Value, bool)>,
        predicate: Option<ExprFunction>,
    ) -> Self {
        Self {
            engine,
            txn,
            table,
            range_l,
            range_r,
            predicate,
            cursor: None,
        }
    }

    fn key_bound(bound: &Option<(Value, bool)>) -> KeyBound {
        bound
            .as_ref()
            .map(|(value, inclusive)| (value.encode_key(), *inclusive))
    }
}

impl Executor for RangeScanExec {
    fn init(&mut self) -> DbResult<()> {
        let handle = self.engine.read_handle(&self.txn, &self.table)?;
        self.cursor = Some(handle.range(
            Self::key_bound(&self.range_l),
            Self::key_bound(&self.range_r),
        )?);
        Ok(())
    }

    fn next(&mut self) -> DbResult<Option<Row>> {
        let cursor = self
            .cursor
            .as_mut()
            .ok_or_else(|| common::DbError::Executor("scan used before init".into()))?;
        while let Some((_key, value)) = cursor.next()? {
            let row = decode_row(&value)?;
            match &self.predicate {
                Some(p) if !p.matches(&row)? => continue,
                _ => return Ok(Some(row)),
            }
        }
        Ok(None)
    }
}

/// Emits a constant list of literal rows; the input side of inserts.
pub struct PrintExec {
    rows: Vec<Row>,
    pos: usize,
}

impl PrintExec {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows, pos: 0 }
    }
}

impl Executor for PrintExec {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{test_db, TestDb};
    use catalog::{ColumnMeta, TableMeta};
    use expr::{col, lit, OutputColumn, OutputSchema};
    use pretty_assertions::assert_eq;
    use types::SqlType;

    fn numbers_db() -> TestDb {
        let mut db = test_db();
        db.create_table(TableMeta::new(
            "numbers",
            vec![
                ColumnMeta::new("id", SqlType::Int64),
                ColumnMeta::new("tens", SqlType::Int64),
            ],
            0,
        ));
        db.seed(
            "numbers",
            (0..20)
                .map(|i| Row::new(vec![Value::Int(i), Value::Int(i * 10)]))
                .collect(),
        );
        db
    }

    fn schema() -> OutputSchema {
        OutputSchema::new(vec![
            OutputColumn::new(0, "id", SqlType::Int64),
            OutputColumn::new(1, "tens", SqlType::Int64),
        ])
    }

    #[test]
    fn seq_scan_returns_rows_in_key_order() {
        let db = numbers_db();
        let txn = db.begin();
        let mut exec = SeqScanExec::new(
            Arc::clone(&db.engine),
            Arc::clone(&txn),
            "numbers".into(),
            None,
        );
        let rows = crate::collect(&mut exec).unwrap();
        assert_eq!(rows.len(), 20);
        assert_eq!(rows[0].values()[0], Value::Int(0));
        assert_eq!(rows[19].values()[0], Value::Int(19));
        db.manager.commit(&txn).unwrap();
    }

    #[test]
    fn seq_scan_applies_its_predicate() {
        let db = numbers_db();
        let txn = db.begin();
        let predicate = ExprFunction::bind(&col(1).ge(lit(150i64)), &schema()).unwrap();
        let mut exec = SeqScanExec::new(
            Arc::clone(&db.engine),
            Arc::clone(&txn),
            "numbers".into(),
            Some(predicate),
        );
        let rows = crate::collect(&mut exec).unwrap();
        assert_eq!(rows.len(), 5); // ids 15..=19
        db.manager.commit(&txn).unwrap();
    }

    #[test]
    fn range_scan_respects_inclusivity() {
        let db = numbers_db();
        let txn = db.begin();
        let mut exec = RangeScanExec::new(
            Arc::clone(&db.engine),
            Arc::clone(&txn),
            "numbers".into(),
            Some((Value::Int(5), false)),
            Some((Value::Int(9), true)),
            None,
        );
        let rows = crate::collect(&mut exec).unwrap();
        let ids: Vec<i64> = rows.iter().map(|r| r.values()[0].as_int().unwrap()).collect();
        assert_eq!(ids, vec![6, 7, 8, 9]);
        db.manager.commit(&txn).unwrap();
    }

    #[test]
    fn range_scan_with_open_endpoints() {
        let db = numbers_db();
        let txn = db.begin();
        let mut exec = RangeScanExec::new(
            Arc::clone(&db.engine),
            Arc::clone(&txn),
            "numbers".into(),
            None,
            Some((Value::Int(2), true)),
            None,
        );
        assert_eq!(crate::collect(&mut exec).unwrap().len(), 3);

        let mut exec = RangeScanExec::new(
            Arc::clone(&db.engine),
            Arc::clone(&txn),
            "numbers".into(),
            Some((Value::Int(18), true)),
            None,
            None,
        );
        assert_eq!(crate::collect(&mut exec).unwrap().len(), 2);
        db.manager.commit(&txn).unwrap();
    }

    #[test]
    fn print_emits_its_rows_once_per_init() {
        let rows = vec![Row::new(vec![Value::Int(1)]), Row::new(vec![Value::Int(2)])];
        let mut exec = PrintExec::new(rows.clone());
        assert_eq!(crate::collect(&mut exec).unwrap(), rows);
        assert_eq!(crate::collect(&mut exec).unwrap(), rows);
    }
}
