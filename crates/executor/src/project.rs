//! Projection: evaluate the output expression list per input row.

use common::{DbResult, Row};
use expr::ExprFunction;

use crate::Executor;

pub struct ProjectExec {
    input: Box<dyn Executor>,
    exprs: Vec<ExprFunction>,
}

impl ProjectExec {
    pub fn new(input: Box<dyn Executor>, exprs: Vec<ExprFunction>) -> Self {
        Self { input, exprs }
    }
}

impl Executor for ProjectExec {
    fn init(&mut self) -> DbResult<()> {
        self.input.init()
    }

    fn next(&mut self) -> DbResult<Option<Row>> {
        let Some(row) = self.input.next()? else {
            return Ok(None);
        };
        let mut values = Vec::with_capacity(self.exprs.len());
        for f in &self.exprs {
            values.push(f.evaluate(&row)?);
        }
        Ok(Some(Row::new(values)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{int_rows, int_schema, MockExec};
    use expr::{col, lit, BinaryOp, Expr, ExprFunction};
    use types::Value;

    #[test]
    fn project_computes_expressions() {
        let schema = int_schema(2);
        let input = MockExec::new(int_rows(&[[1, 10], [2, 20]]));
        let exprs = vec![
            ExprFunction::bind(&col(1), &schema).unwrap(),
            ExprFunction::bind(&Expr::binary(BinaryOp::Mul, col(0), lit(2i64)), &schema).unwrap(),
        ];
        let mut exec = ProjectExec::new(Box::new(input), exprs);
        let rows = crate::collect(&mut exec).unwrap();
        assert_eq!(
            rows,
            vec![
                Row::new(vec![Value::Int(10), Value::Int(2)]),
                Row::new(vec![Value::Int(20), Value::Int(4)]),
            ]
        );
    }
}
