//! Join operators. Both materialize their left input and emit at most one
//! output row per left/right pair; the predicate is evaluated after
//! concatenation.

use ahash::RandomState;
use common::{DbResult, Row};
use expr::ExprFunction;
use hashbrown::HashMap;

use crate::{concat_rows, hash_keys, Executor, TupleStore};

/// Nested-loop join: the left side is materialized once; every right row
/// is paired against all of it. Without a predicate this is the cross
/// product.
pub struct NestedLoopJoinExec {
    left: Box<dyn Executor>,
    right: Box<dyn Executor>,
    predicate: Option<ExprFunction>,
    store: TupleStore,
    current_right: Option<Row>,
    left_pos: usize,
}

impl NestedLoopJoinExec {
    pub fn new(
        left: Box<dyn Executor>,
        right: Box<dyn Executor>,
        predicate: Option<ExprFunction>,
    ) -> Self {
        Self {
            left,
            right,
            predicate,
            store: TupleStore::new(),
            current_right: None,
            left_pos: 0,
        }
    }
}

impl Executor for NestedLoopJoinExec {
    fn init(&mut self) -> DbResult<()> {
        self.left.init()?;
        self.right.init()?;
        self.store.clear();
        while let Some(row) = self.left.next()? {
            self.store.append(row);
        }
        self.current_right = self.right.next()?;
        self.left_pos = 0;
        Ok(())
    }

    fn next(&mut self) -> DbResult<Option<Row>> {
        loop {
            let Some(right_row) = self.current_right.clone() else {
                return Ok(None);
            };
            while self.left_pos < self.store.len() {
                let left_row = self.store.get(self.left_pos);
                self.left_pos += 1;
                let combined = concat_rows(left_row, &right_row);
                match &self.predicate {
                    Some(p) if !p.matches(&combined)? => continue,
                    _ => return Ok(Some(combined)),
                }
            }
            self.current_right = self.right.next()?;
            self.left_pos = 0;
        }
    }
}

/// Hash join. Build: materialize the left side hashed by its key
/// expressions. Probe: hash each right row's keys and scan the matching
/// bucket. Bucket hits may be hash collisions, so the residual predicate
/// (which includes the equi-conditions) decides emission.
pub struct HashJoinExec {
    left: Box<dyn Executor>,
    right: Box<dyn Executor>,
    predicate: Option<ExprFunction>,
    left_keys: Vec<ExprFunction>,
    right_keys: Vec<ExprFunction>,
    store: TupleStore,
    buckets: HashMap<u64, Vec<usize>, RandomState>,
    current_right: Option<Row>,
    bucket: Vec<usize>,
    bucket_pos: usize,
}

impl HashJoinExec {
    pub fn new(
        left: Box<dyn Executor>,
        right: Box<dyn Executor>,
        predicate: Option<ExprFunction>,
        left_keys: Vec<ExprFunction>,
        right_keys: Vec<ExprFunction>,
    ) -> Self {
        Self {
            left,
            right,
            predicate,
            left_keys,
            right_keys,
            store: TupleStore::new(),
            buckets: HashMap::default(),
            current_right: None,
            bucket: Vec::new(),
            bucket_pos: 0,
        }
    }

    fn advance_right(&mut self) -> DbResult<bool> {
        loop {
            let Some(row) = self.right.next()? else {
                self.current_right = None;
                return Ok(false);
            };
            let hash = hash_keys(&self.right_keys, &row)?;
            if let Some(bucket) = self.buckets.get(&hash) {
                self.bucket = bucket.clone();
                self.bucket_pos = 0;
                self.current_right = Some(row);
                return Ok(true);
            }
        }
    }
}

impl Executor for HashJoinExec {
    fn init(&mut self) -> DbResult<()> {
        self.left.init()?;
        self.right.init()?;
        self.store.clear();
        self.buckets.clear();
        while let Some(row) = self.left.next()? {
            let hash = hash_keys(&self.left_keys, &row)?;
            let idx = self.store.append(row);
            self.buckets.entry(hash).or_default().push(idx);
        }
        self.current_right = None;
        self.bucket.clear();
        self.bucket_pos = 0;
        Ok(())
    }

    fn next(&mut self) -> DbResult<Option<Row>> {
        loop {
            if self.current_right.is_none() && !self.advance_right()? {
                return Ok(None);
            }
            let right_row = self
                .current_right
                .clone()
                .expect("probe row present after advance");
            while self.bucket_pos < self.bucket.len() {
                let left_row = self.store.get(self.bucket[self.bucket_pos]);
                self.bucket_pos += 1;
                let combined = concat_rows(left_row, &right_row);
                match &self.predicate {
                    Some(p) if !p.matches(&combined)? => continue,
                    _ => return Ok(Some(combined)),
                }
            }
            self.current_right = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{int_schema, MockExec};
    use expr::{col, ExprFunction, OutputColumn, OutputSchema};
    use pretty_assertions::assert_eq;
    use types::{SqlType, Value};

    fn row2(a: i64, s: &str) -> Row {
        Row::new(vec![Value::Int(a), Value::Str(s.into())])
    }

    fn two_col_schema(base: u32) -> OutputSchema {
        OutputSchema::new(vec![
            OutputColumn::new(base, "id", SqlType::Int64),
            OutputColumn::new(base + 1, "v", SqlType::Varchar),
        ])
    }

    #[test]
    fn nested_loop_cross_product_without_predicate() {
        let left = MockExec::new(vec![row2(1, "a"), row2(2, "b")]);
        let right = MockExec::new(vec![row2(10, "x")]);
        let mut exec = NestedLoopJoinExec::new(Box::new(left), Box::new(right), None);
        let rows = crate::collect(&mut exec).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].values().len(), 4);
    }

    #[test]
    fn nested_loop_join_filters_pairs() {
        let schema = OutputSchema::concat(&two_col_schema(0), &two_col_schema(10));
        let left = MockExec::new(vec![row2(1, "a"), row2(2, "b")]);
        let right = MockExec::new(vec![row2(2, "x"), row2(3, "y")]);
        let predicate = ExprFunction::bind(&col(0).eq(col(10)), &schema).unwrap();
        let mut exec =
            NestedLoopJoinExec::new(Box::new(left), Box::new(right), Some(predicate));
        let rows = crate::collect(&mut exec).unwrap();
        assert_eq!(rows, vec![Row::new(vec![
            Value::Int(2),
            Value::Str("b".into()),
            Value::Int(2),
            Value::Str("x".into()),
        ])]);
    }

    /// L(id, v) = {(1,a),(2,b),(3,c)}, R(id, w) = {(2,x),(3,y),(4,z)}
    /// joined on L.id = R.id gives exactly {(2,b,x), (3,c,y)}.
    #[test]
    fn hash_join_on_ids() {
        let left_schema = two_col_schema(0);
        let right_schema = two_col_schema(10);
        let both = OutputSchema::concat(&left_schema, &right_schema);

        let left = MockExec::new(vec![row2(1, "a"), row2(2, "b"), row2(3, "c")]);
        let right = MockExec::new(vec![row2(2, "x"), row2(3, "y"), row2(4, "z")]);
        let mut exec = HashJoinExec::new(
            Box::new(left),
            Box::new(right),
            Some(ExprFunction::bind(&col(0).eq(col(10)), &both).unwrap()),
            vec![ExprFunction::bind(&col(0), &left_schema).unwrap()],
            vec![ExprFunction::bind(&col(10), &right_schema).unwrap()],
        );
        let mut rows = crate::collect(&mut exec).unwrap();
        rows.sort_by_key(|r| r.values()[0].as_int());
        assert_eq!(
            rows,
            vec![
                Row::new(vec![
                    Value::Int(2),
                    Value::Str("b".into()),
                    Value::Int(2),
                    Value::Str("x".into()),
                ]),
                Row::new(vec![
                    Value::Int(3),
                    Value::Str("c".into()),
                    Value::Int(3),
                    Value::Str("y".into()),
                ]),
            ]
        );
    }

    #[test]
    fn hash_join_emits_all_bucket_matches() {
        let left_schema = int_schema(1);
        let right_schema = OutputSchema::new(vec![OutputColumn::new(10, "k", SqlType::Int64)]);
        let both = OutputSchema::concat(&left_schema, &right_schema);
        let left = MockExec::new(vec![
            Row::new(vec![Value::Int(7)]),
            Row::new(vec![Value::Int(7)]),
        ]);
        let right = MockExec::new(vec![Row::new(vec![Value::Int(7)])]);
        let mut exec = HashJoinExec::new(
            Box::new(left),
            Box::new(right),
            Some(ExprFunction::bind(&col(0).eq(col(10)), &both).unwrap()),
            vec![ExprFunction::bind(&col(0), &left_schema).unwrap()],
            vec![ExprFunction::bind(&col(10), &right_schema).unwrap()],
        );
        assert_eq!(crate::collect(&mut exec).unwrap().len(), 2);
    }

    #[test]
    fn hash_join_string_keys() {
        let left_schema = OutputSchema::new(vec![
            OutputColumn::new(0, "name", SqlType::Varchar),
        ]);
        let right_schema = OutputSchema::new(vec![
            OutputColumn::new(10, "name", SqlType::Varchar),
        ]);
        let both = OutputSchema::concat(&left_schema, &right_schema);
        let left = MockExec::new(vec![
            Row::new(vec![Value::Str("ada".into())]),
            Row::new(vec![Value::Str("bob".into())]),
        ]);
        let right = MockExec::new(vec![Row::new(vec![Value::Str("bob".into())])]);
        let mut exec = HashJoinExec::new(
            Box::new(left),
            Box::new(right),
            Some(ExprFunction::bind(&col(0).eq(col(10)), &both).unwrap()),
            vec![ExprFunction::bind(&col(0), &left_schema).unwrap()],
            vec![ExprFunction::bind(&col(10), &right_schema).unwrap()],
        );
        let rows = crate::collect(&mut exec).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].values()[0], Value::Str("bob".into()));
    }

    #[test]
    fn unmatched_probe_rows_vanish() {
        let left_schema = int_schema(1);
        let right_schema = OutputSchema::new(vec![OutputColumn::new(10, "k", SqlType::Int64)]);
        let both = OutputSchema::concat(&left_schema, &right_schema);
        let left = MockExec::new(vec![Row::new(vec![Value::Int(1)])]);
        let right = MockExec::new(vec![
            Row::new(vec![Value::Int(2)]),
            Row::new(vec![Value::Int(3)]),
        ]);
        let mut exec = HashJoinExec::new(
            Box::new(left),
            Box::new(right),
            Some(ExprFunction::bind(&col(0).eq(col(10)), &both).unwrap()),
            vec![ExprFunction::bind(&col(0), &left_schema).unwrap()],
            vec![ExprFunction::bind(&col(10), &right_schema).unwrap()],
        );
        assert!(crate::collect(&mut exec).unwrap().is_empty());
    }
}
