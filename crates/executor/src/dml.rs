//! Write-path operators: insert and delete with integrity checking.
//!
//! Both route every mutation through the transaction's lock-aware
//! [`ModifyHandle`] and emit a single row carrying the affected count.

use std::sync::Arc;

use catalog::TableMeta;
use common::{DbError, DbResult, Row};
use engine::{ModifyHandle, StorageEngine};
use log::debug;
use txn::Txn;
use types::Value;

use crate::{encode_row, Executor};

/// Foreign keys of the target table, resolved at build time: the value in
/// `column` must exist as the primary key of `ref_table`.
#[derive(Clone, Debug)]
pub struct FkCheck {
    pub column: usize,
    pub ref_table: String,
}

/// Tables referencing the target table, for delete-side checks.
#[derive(Clone, Debug)]
pub struct ReverseFkCheck {
    pub table: String,
    pub column: usize,
}

/// Insert every input row into the target table.
///
/// Per row: fill the auto-increment primary key if the table generates it
/// and the input left it NULL, check foreign keys, then insert. A duplicate
/// primary key or broken reference aborts the statement with an integrity
/// error.
pub struct InsertExec {
    engine: Arc<StorageEngine>,
    txn: Arc<Txn>,
    meta: TableMeta,
    input: Box<dyn Executor>,
    fk_checks: Vec<FkCheck>,
    handle: Option<ModifyHandle>,
    next_pk: i64,
    done: bool,
}

impl InsertExec {
    pub fn new(
        engine: Arc<StorageEngine>,
        txn: Arc<Txn>,
        meta: TableMeta,
        input: Box<dyn Executor>,
    ) -> Self {
        let fk_checks = meta
            .foreign_keys
            .iter()
            .map(|fk| FkCheck {
                column: fk.column,
                ref_table: fk.ref_table.clone(),
            })
            .collect();
        Self {
            engine,
            txn,
            meta,
            input,
            fk_checks,
            handle: None,
            next_pk: 1,
            done: false,
        }
    }

    fn check_foreign_keys(&self, row: &Row) -> DbResult<()> {
        for fk in &self.fk_checks {
            let value = &row.values()[fk.column];
            let read = self.engine.read_handle(&self.txn, &fk.ref_table)?;
            if read.get(&value.encode_key())?.is_none() {
                return Err(DbError::Integrity(format!(
                    "value {value} has no match in '{}'",
                    fk.ref_table
                )));
            }
        }
        Ok(())
    }
}

impl Executor for InsertExec {
    fn init(&mut self) -> DbResult<()> {
        self.input.init()?;
        if self.meta.auto_inc_pk {
            self.next_pk = match self.engine.max_key(&self.meta.name)? {
                Some(key) => Value::decode_key(self.meta.pk_column().ty, &key)
                    .and_then(|v| v.as_int())
                    .map(|v| v + 1)
                    .unwrap_or(1),
                None => 1,
            };
        }
        self.handle = Some(
            self.engine
                .modify_handle(Arc::clone(&self.txn), &self.meta.name)?,
        );
        self.done = false;
        Ok(())
    }

    fn next(&mut self) -> DbResult<Option<Row>> {
        if self.done {
            return Ok(None);
        }
        let mut count = 0i64;
        while let Some(mut row) = self.input.next()? {
            if row.len() != self.meta.columns.len() {
                return Err(DbError::Executor(format!(
                    "insert row has {} values, table '{}' has {} columns",
                    row.len(),
                    self.meta.name,
                    self.meta.columns.len()
                )));
            }
            if self.meta.auto_inc_pk && row.values()[self.meta.primary_key].is_null() {
                row.0[self.meta.primary_key] = Value::Int(self.next_pk);
                self.next_pk += 1;
            }
            self.check_foreign_keys(&row)?;
            let key = row.values()[self.meta.primary_key].encode_key();
            let handle = self.handle.as_ref().expect("initialized above");
            if !handle.insert(&key, &encode_row(&row)?)? {
                return Err(DbError::Integrity(format!(
                    "duplicate primary key {} in '{}'",
                    row.values()[self.meta.primary_key],
                    self.meta.name
                )));
            }
            count += 1;
        }
        debug!("inserted {count} rows into '{}'", self.meta.name);
        self.done = true;
        Ok(Some(Row::new(vec![Value::Int(count)])))
    }
}

/// Delete every input row from the target table, refusing to remove keys
/// still referenced by another table.
pub struct DeleteExec {
    engine: Arc<StorageEngine>,
    txn: Arc<Txn>,
    meta: TableMeta,
    input: Box<dyn Executor>,
    reverse_fks: Vec<ReverseFkCheck>,
    handle: Option<ModifyHandle>,
    done: bool,
}

impl DeleteExec {
    pub fn new(
        engine: Arc<StorageEngine>,
        txn: Arc<Txn>,
        meta: TableMeta,
        reverse_fks: Vec<ReverseFkCheck>,
        input: Box<dyn Executor>,
    ) -> Self {
        Self {
            engine,
            txn,
            meta,
            input,
            reverse_fks,
            handle: None,
            done: false,
        }
    }

    /// No row of a referencing table may point at the doomed key.
    fn check_not_referenced(&self, pk_value: &Value) -> DbResult<()> {
        for rfk in &self.reverse_fks {
            let read = self.engine.read_handle(&self.txn, &rfk.table)?;
            let mut cursor = read.scan()?;
            while let Some((_, bytes)) = cursor.next()? {
                let row = crate::decode_row(&bytes)?;
                if row.values()[rfk.column] == *pk_value {
                    return Err(DbError::Integrity(format!(
                        "key {pk_value} is still referenced by '{}'",
                        rfk.table
                    )));
                }
            }
        }
        Ok(())
    }
}

impl Executor for DeleteExec {
    fn init(&mut self) -> DbResult<()> {
        self.input.init()?;
        self.handle = Some(
            self.engine
                .modify_handle(Arc::clone(&self.txn), &self.meta.name)?,
        );
        self.done = false;
        Ok(())
    }

    fn next(&mut self) -> DbResult<Option<Row>> {
        if self.done {
            return Ok(None);
        }
        // The input is usually a scan of the very table being mutated;
        // materialize it before touching the tree so no cursor walks pages
        // that deletion is freeing.
        let mut doomed = Vec::new();
        while let Some(row) = self.input.next()? {
            doomed.push(row.values()[self.meta.primary_key].clone());
        }
        let mut count = 0i64;
        for pk_value in &doomed {
            self.check_not_referenced(pk_value)?;
            let handle = self.handle.as_ref().expect("initialized above");
            if handle.delete(&pk_value.encode_key())? {
                count += 1;
            }
        }
        debug!("deleted {count} rows from '{}'", self.meta.name);
        self.done = true;
        Ok(Some(Row::new(vec![Value::Int(count)])))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{test_db, MockExec, TestDb};
    use crate::{SeqScanExec, Executor};
    use catalog::{ColumnMeta, TableMeta};
    use pretty_assertions::assert_eq;
    use types::SqlType;

    fn users_and_orders() -> TestDb {
        let mut db = test_db();
        db.create_table(TableMeta::new(
            "users",
            vec![
                ColumnMeta::new("id", SqlType::Int64),
                ColumnMeta::new("name", SqlType::Varchar),
            ],
            0,
        ));
        db.create_table(
            TableMeta::new(
                "orders",
                vec![
                    ColumnMeta::new("id", SqlType::Int64),
                    ColumnMeta::new("user_id", SqlType::Int64),
                ],
                0,
            )
            .with_foreign_key(1, "users"),
        );
        db.seed(
            "users",
            vec![
                Row::new(vec![Value::Int(1), Value::Str("ada".into())]),
                Row::new(vec![Value::Int(2), Value::Str("bob".into())]),
            ],
        );
        db
    }

    fn run_once(exec: &mut dyn Executor) -> DbResult<i64> {
        exec.init()?;
        let row = exec.next()?.expect("dml emits a count row");
        Ok(row.values()[0].as_int().unwrap())
    }

    #[test]
    fn insert_checks_foreign_keys() {
        let db = users_and_orders();
        let txn = db.begin();
        let meta = db.catalog.table("orders").unwrap().clone();

        let ok = MockExec::new(vec![Row::new(vec![Value::Int(10), Value::Int(1)])]);
        let mut exec = InsertExec::new(
            Arc::clone(&db.engine),
            Arc::clone(&txn),
            meta.clone(),
            Box::new(ok),
        );
        assert_eq!(run_once(&mut exec).unwrap(), 1);

        let dangling = MockExec::new(vec![Row::new(vec![Value::Int(11), Value::Int(99)])]);
        let mut exec = InsertExec::new(
            Arc::clone(&db.engine),
            Arc::clone(&txn),
            meta,
            Box::new(dangling),
        );
        let err = run_once(&mut exec).unwrap_err();
        assert!(matches!(err, DbError::Integrity(_)));
        db.manager.abort(&txn).unwrap();
    }

    #[test]
    fn duplicate_primary_key_is_an_integrity_error() {
        let db = users_and_orders();
        let txn = db.begin();
        let meta = db.catalog.table("users").unwrap().clone();
        let dup = MockExec::new(vec![Row::new(vec![Value::Int(1), Value::Str("eve".into())])]);
        let mut exec = InsertExec::new(
            Arc::clone(&db.engine),
            Arc::clone(&txn),
            meta,
            Box::new(dup),
        );
        let err = run_once(&mut exec).unwrap_err();
        assert!(matches!(err, DbError::Integrity(_)));
        db.manager.abort(&txn).unwrap();
    }

    #[test]
    fn auto_increment_fills_null_keys() {
        let mut db = test_db();
        db.create_table(
            TableMeta::new(
                "events",
                vec![
                    ColumnMeta::new("id", SqlType::Int64),
                    ColumnMeta::new("kind", SqlType::Varchar),
                ],
                0,
            )
            .with_auto_inc(),
        );
        db.seed("events", vec![Row::new(vec![Value::Int(7), Value::Str("seed".into())])]);

        let txn = db.begin();
        let meta = db.catalog.table("events").unwrap().clone();
        let input = MockExec::new(vec![
            Row::new(vec![Value::Null, Value::Str("a".into())]),
            Row::new(vec![Value::Null, Value::Str("b".into())]),
        ]);
        let mut exec = InsertExec::new(
            Arc::clone(&db.engine),
            Arc::clone(&txn),
            meta,
            Box::new(input),
        );
        assert_eq!(run_once(&mut exec).unwrap(), 2);
        db.manager.commit(&txn).unwrap();

        // Generated keys continue past the existing maximum.
        let check = db.begin();
        let read = db.engine.read_handle(&check, "events").unwrap();
        assert!(read.get(&Value::Int(8).encode_key()).unwrap().is_some());
        assert!(read.get(&Value::Int(9).encode_key()).unwrap().is_some());
        db.manager.commit(&check).unwrap();
    }

    #[test]
    fn delete_refuses_referenced_keys() {
        let db = users_and_orders();
        db.seed("orders", vec![Row::new(vec![Value::Int(100), Value::Int(1)])]);

        let txn = db.begin();
        let meta = db.catalog.table("users").unwrap().clone();
        // Try to delete user 1, still referenced by order 100.
        let input = MockExec::new(vec![Row::new(vec![Value::Int(1), Value::Str("ada".into())])]);
        let mut exec = DeleteExec::new(
            Arc::clone(&db.engine),
            Arc::clone(&txn),
            meta.clone(),
            vec![ReverseFkCheck {
                table: "orders".into(),
                column: 1,
            }],
            Box::new(input),
        );
        let err = run_once(&mut exec).unwrap_err();
        assert!(matches!(err, DbError::Integrity(_)));
        db.manager.abort(&txn).unwrap();

        // User 2 is unreferenced and deletes fine.
        let txn = db.begin();
        let input = MockExec::new(vec![Row::new(vec![Value::Int(2), Value::Str("bob".into())])]);
        let mut exec = DeleteExec::new(
            Arc::clone(&db.engine),
            Arc::clone(&txn),
            meta,
            vec![ReverseFkCheck {
                table: "orders".into(),
                column: 1,
            }],
            Box::new(input),
        );
        assert_eq!(run_once(&mut exec).unwrap(), 1);
        db.manager.commit(&txn).unwrap();
    }

    #[test]
    fn delete_drains_a_scan_of_the_same_table() {
        let db = users_and_orders();
        let txn = db.begin();
        let meta = db.catalog.table("users").unwrap().clone();
        let scan = SeqScanExec::new(
            Arc::clone(&db.engine),
            Arc::clone(&txn),
            "users".into(),
            None,
        );
        let mut exec = DeleteExec::new(
            Arc::clone(&db.engine),
            Arc::clone(&txn),
            meta,
            Vec::new(),
            Box::new(scan),
        );
        assert_eq!(run_once(&mut exec).unwrap(), 2);
        db.manager.commit(&txn).unwrap();
        assert_eq!(db.engine.tuple_num("users").unwrap(), 0);
    }
}
