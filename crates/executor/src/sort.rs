//! Order-by: materialize, then emit by sorted index.

use std::cmp::Ordering;

use common::{DbResult, Row};
use expr::ExprFunction;
use types::Value;

use crate::Executor;

pub struct SortKey {
    pub expr: ExprFunction,
    pub desc: bool,
}

/// Blocking sort. Key values are computed once per row; indices are sorted
/// with the original position as the final tiebreak, so the output order
/// is deterministic for equal keys.
pub struct OrderByExec {
    input: Box<dyn Executor>,
    keys: Vec<SortKey>,
    rows: Vec<Row>,
    order: Vec<usize>,
    pos: usize,
}

impl OrderByExec {
    pub fn new(input: Box<dyn Executor>, keys: Vec<SortKey>) -> Self {
        Self {
            input,
            keys,
            rows: Vec::new(),
            order: Vec::new(),
            pos: 0,
        }
    }
}

fn compare_key_values(a: &Value, b: &Value) -> Ordering {
    // NULLs sort first; otherwise native comparison per type.
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a.compare(b).unwrap_or(Ordering::Equal),
    }
}

impl Executor for OrderByExec {
    fn init(&mut self) -> DbResult<()> {
        self.input.init()?;
        self.rows.clear();
        while let Some(row) = self.input.next()? {
            self.rows.push(row);
        }
        let mut key_values: Vec<Vec<Value>> = Vec::with_capacity(self.rows.len());
        for row in &self.rows {
            let mut values = Vec::with_capacity(self.keys.len());
            for key in &self.keys {
                values.push(key.expr.evaluate(row)?);
            }
            key_values.push(values);
        }
        self.order = (0..self.rows.len()).collect();
        let keys = &self.keys;
        self.order.sort_by(|&x, &y| {
            for (k, key) in keys.iter().enumerate() {
                let mut ord = compare_key_values(&key_values[x][k], &key_values[y][k]);
                if key.desc {
                    ord = ord.reverse();
                }
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.cmp(&y)
        });
        self.pos = 0;
        Ok(())
    }

    fn next(&mut self) -> DbResult<Option<Row>> {
        if self.pos >= self.order.len() {
            return Ok(None);
        }
        let row = self.rows[self.order[self.pos]].clone();
        self.pos += 1;
        Ok(Some(row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockExec;
    use expr::{col, OutputColumn, OutputSchema};
    use pretty_assertions::assert_eq;
    use types::SqlType;

    fn schema() -> OutputSchema {
        OutputSchema::new(vec![
            OutputColumn::new(0, "name", SqlType::Varchar),
            OutputColumn::new(1, "score", SqlType::Int64),
        ])
    }

    fn row(name: &str, score: i64) -> Row {
        Row::new(vec![Value::Str(name.into()), Value::Int(score)])
    }

    #[test]
    fn sorts_ascending_and_descending() {
        let input = MockExec::new(vec![row("b", 2), row("a", 3), row("c", 1)]);
        let mut exec = OrderByExec::new(
            Box::new(input),
            vec![SortKey {
                expr: ExprFunction::bind(&col(1), &schema()).unwrap(),
                desc: true,
            }],
        );
        let rows = crate::collect(&mut exec).unwrap();
        assert_eq!(rows, vec![row("a", 3), row("b", 2), row("c", 1)]);
    }

    #[test]
    fn ties_keep_input_order() {
        let input = MockExec::new(vec![row("first", 1), row("second", 1), row("third", 0)]);
        let mut exec = OrderByExec::new(
            Box::new(input),
            vec![SortKey {
                expr: ExprFunction::bind(&col(1), &schema()).unwrap(),
                desc: false,
            }],
        );
        let rows = crate::collect(&mut exec).unwrap();
        assert_eq!(rows, vec![row("third", 0), row("first", 1), row("second", 1)]);
    }

    #[test]
    fn secondary_key_breaks_primary_ties() {
        let input = MockExec::new(vec![row("b", 1), row("a", 1), row("c", 0)]);
        let mut exec = OrderByExec::new(
            Box::new(input),
            vec![
                SortKey {
                    expr: ExprFunction::bind(&col(1), &schema()).unwrap(),
                    desc: false,
                },
                SortKey {
                    expr: ExprFunction::bind(&col(0), &schema()).unwrap(),
                    desc: false,
                },
            ],
        );
        let rows = crate::collect(&mut exec).unwrap();
        assert_eq!(rows, vec![row("c", 0), row("a", 1), row("b", 1)]);
    }
}
