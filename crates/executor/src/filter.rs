//! Pass-through predicate operator.

use common::{DbResult, Row};
use expr::ExprFunction;

use crate::Executor;

pub struct FilterExec {
    input: Box<dyn Executor>,
    predicate: ExprFunction,
}

impl FilterExec {
    pub fn new(input: Box<dyn Executor>, predicate: ExprFunction) -> Self {
        Self { input, predicate }
    }
}

impl Executor for FilterExec {
    fn init(&mut self) -> DbResult<()> {
        self.input.init()
    }

    fn next(&mut self) -> DbResult<Option<Row>> {
        while let Some(row) = self.input.next()? {
            if self.predicate.matches(&row)? {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{int_rows, int_schema, MockExec};
    use expr::{col, lit, ExprFunction};

    #[test]
    fn filter_drops_non_matching_rows() {
        let input = MockExec::new(int_rows(&[[1], [5], [3], [9]]));
        let predicate =
            ExprFunction::bind(&col(0).gt(lit(3i64)), &int_schema(1)).unwrap();
        let mut exec = FilterExec::new(Box::new(input), predicate);
        let rows = crate::collect(&mut exec).unwrap();
        assert_eq!(rows, int_rows(&[[5], [9]]));
    }

    #[test]
    fn filter_over_empty_input() {
        let input = MockExec::new(vec![]);
        let predicate =
            ExprFunction::bind(&col(0).gt(lit(0i64)), &int_schema(1)).unwrap();
        let mut exec = FilterExec::new(Box::new(input), predicate);
        assert!(crate::collect(&mut exec).unwrap().is_empty());
    }
}
