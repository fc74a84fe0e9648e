//! Bound expression trees and their evaluators.
//!
//! Plans arrive from the binder with columns already resolved to global
//! [`ColumnId`]s. Before execution an expression is bound against the
//! producing operator's [`OutputSchema`], turning column ids into row
//! ordinals; evaluation then works on plain [`Row`]s.

mod agg;
mod predicate;
mod schema;


pub use agg::{AggExprFunction, AggStates};
pub use predicate::{Predicate, PredicateVec};
pub use schema::{OutputColumn, OutputSchema};

use common::{ColumnId, DbError, DbResult, Row};
use types::Value;

/// Arithmetic operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

/// Comparison operators; evaluate to `Int(0)`/`Int(1)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CmpOp {
    Lt,
    Le,
    Eq,
    Ge,
    Gt,
    Ne,
}

impl CmpOp {
    /// Mirror of the operator with its operands swapped.
    pub fn flipped(self) -> CmpOp {
        match self {
            CmpOp::Lt => CmpOp::Gt,
            CmpOp::Le => CmpOp::Ge,
            CmpOp::Eq => CmpOp::Eq,
            CmpOp::Ge => CmpOp::Le,
            CmpOp::Gt => CmpOp::Lt,
            CmpOp::Ne => CmpOp::Ne,
        }
    }
}

/// Logical connectives; operands are tested for truthiness.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogicOp {
    And,
    Or,
}

/// Aggregate functions usable inside an aggregate plan's output list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AggFunc {
    Count,
    Sum,
    Min,
    Max,
    Avg,
}

/// Expression tree as produced by the binder.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Literal(Value),
    Column(ColumnId),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Cmp {
        op: CmpOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Logic {
        op: LogicOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Agg {
        func: AggFunc,
        arg: Box<Expr>,
    },
}

/// Literal leaf.
pub fn lit(value: impl Into<Value>) -> Expr {
    Expr::Literal(value.into())
}

/// Column leaf.
pub fn col(id: ColumnId) -> Expr {
    Expr::Column(id)
}

impl Expr {
    pub fn cmp(op: CmpOp, left: Expr, right: Expr) -> Expr {
        Expr::Cmp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn eq(self, other: Expr) -> Expr {
        Expr::cmp(CmpOp::Eq, self, other)
    }

    pub fn ne(self, other: Expr) -> Expr {
        Expr::cmp(CmpOp::Ne, self, other)
    }

    pub fn lt(self, other: Expr) -> Expr {
        Expr::cmp(CmpOp::Lt, self, other)
    }

    pub fn le(self, other: Expr) -> Expr {
        Expr::cmp(CmpOp::Le, self, other)
    }

    pub fn gt(self, other: Expr) -> Expr {
        Expr::cmp(CmpOp::Gt, self, other)
    }

    pub fn ge(self, other: Expr) -> Expr {
        Expr::cmp(CmpOp::Ge, self, other)
    }

    pub fn and(self, other: Expr) -> Expr {
        Expr::Logic {
            op: LogicOp::And,
            left: Box::new(self),
            right: Box::new(other),
        }
    }

    pub fn or(self, other: Expr) -> Expr {
        Expr::Logic {
            op: LogicOp::Or,
            left: Box::new(self),
            right: Box::new(other),
        }
    }

    pub fn agg(func: AggFunc, arg: Expr) -> Expr {
        Expr::Agg {
            func,
            arg: Box::new(arg),
        }
    }

    /// Collect every referenced column id.
    pub fn collect_columns(&self, out: &mut Vec<ColumnId>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Column(id) => out.push(*id),
            Expr::Binary { left, right, .. }
            | Expr::Cmp { left, right, .. }
            | Expr::Logic { left, right, .. } => {
                left.collect_columns(out);
                right.collect_columns(out);
            }
            Expr::Agg { arg, .. } => arg.collect_columns(out),
        }
    }

    pub fn contains_agg(&self) -> bool {
        match self {
            Expr::Literal(_) | Expr::Column(_) => false,
            Expr::Binary { left, right, .. }
            | Expr::Cmp { left, right, .. }
            | Expr::Logic { left, right, .. } => left.contains_agg() || right.contains_agg(),
            Expr::Agg { .. } => true,
        }
    }
}

/// Expression bound to row ordinals of one input schema.
#[derive(Clone, Debug)]
pub struct ExprFunction {
    bound: Bound,
}

#[derive(Clone, Debug)]
pub(crate) enum Bound {
    Lit(Value),
    Col(usize),
    Binary {
        op: BinaryOp,
        left: Box<Bound>,
        right: Box<Bound>,
    },
    Cmp {
        op: CmpOp,
        left: Box<Bound>,
        right: Box<Bound>,
    },
    Logic {
        op: LogicOp,
        left: Box<Bound>,
        right: Box<Bound>,
    },
}

pub(crate) fn bind(expr: &Expr, schema: &OutputSchema) -> DbResult<Bound> {
    Ok(match expr {
        Expr::Literal(v) => Bound::Lit(v.clone()),
        Expr::Column(id) => Bound::Col(schema.index_of(*id).ok_or_else(|| {
            DbError::Plan(format!("column #{id} not produced by the input schema"))
        })?),
        Expr::Binary { op, left, right } => Bound::Binary {
            op: *op,
            left: Box::new(bind(left, schema)?),
            right: Box::new(bind(right, schema)?),
        },
        Expr::Cmp { op, left, right } => Bound::Cmp {
            op: *op,
            left: Box::new(bind(left, schema)?),
            right: Box::new(bind(right, schema)?),
        },
        Expr::Logic { op, left, right } => Bound::Logic {
            op: *op,
            left: Box::new(bind(left, schema)?),
            right: Box::new(bind(right, schema)?),
        },
        Expr::Agg { .. } => {
            return Err(DbError::Plan(
                "aggregate expression outside an aggregate operator".into(),
            ))
        }
    })
}

pub(crate) fn eval_bound(bound: &Bound, row: &Row) -> DbResult<Value> {
    Ok(match bound {
        Bound::Lit(v) => v.clone(),
        Bound::Col(idx) => row
            .values()
            .get(*idx)
            .cloned()
            .ok_or_else(|| DbError::Executor(format!("row has no column {idx}")))?,
        Bound::Binary { op, left, right } => {
            let l = eval_bound(left, row)?;
            let r = eval_bound(right, row)?;
            eval_binary(*op, &l, &r)?
        }
        Bound::Cmp { op, left, right } => {
            let l = eval_bound(left, row)?;
            let r = eval_bound(right, row)?;
            Value::Int(eval_cmp(*op, &l, &r)? as i64)
        }
        Bound::Logic { op, left, right } => {
            let l = eval_bound(left, row)?.truthy();
            let ok = match op {
                LogicOp::And => l && eval_bound(right, row)?.truthy(),
                LogicOp::Or => l || eval_bound(right, row)?.truthy(),
            };
            Value::Int(ok as i64)
        }
    })
}

pub(crate) fn eval_binary(op: BinaryOp, l: &Value, r: &Value) -> DbResult<Value> {
    match (l, r) {
        (Value::Int(a), Value::Int(b)) => {
            let a = *a;
            let b = *b;
            Ok(Value::Int(match op {
                BinaryOp::Add => a.wrapping_add(b),
                BinaryOp::Sub => a.wrapping_sub(b),
                BinaryOp::Mul => a.wrapping_mul(b),
                BinaryOp::Div => {
                    if b == 0 {
                        return Err(DbError::Executor("division by zero".into()));
                    }
                    a / b
                }
                BinaryOp::Mod => {
                    if b == 0 {
                        return Err(DbError::Executor("division by zero".into()));
                    }
                    a % b
                }
            }))
        }
        _ => {
            let a = l
                .as_float()
                .ok_or_else(|| DbError::Executor(format!("arithmetic on non-numeric {l:?}")))?;
            let b = r
                .as_float()
                .ok_or_else(|| DbError::Executor(format!("arithmetic on non-numeric {r:?}")))?;
            Ok(Value::Float(match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => a / b,
                BinaryOp::Mod => a % b,
            }))
        }
    }
}

pub(crate) fn eval_cmp(op: CmpOp, l: &Value, r: &Value) -> DbResult<bool> {
    let ord = l.compare(r).ok_or_else(|| {
        DbError::Executor(format!("cannot compare {l:?} with {r:?}"))
    })?;
    Ok(match op {
        CmpOp::Lt => ord.is_lt(),
        CmpOp::Le => ord.is_le(),
        CmpOp::Eq => ord.is_eq(),
        CmpOp::Ge => ord.is_ge(),
        CmpOp::Gt => ord.is_gt(),
        CmpOp::Ne => ord.is_ne(),
    })
}

impl ExprFunction {
    /// Bind `expr` against the schema of its input rows.
    pub fn bind(expr: &Expr, schema: &OutputSchema) -> DbResult<Self> {
        Ok(Self {
            bound: bind(expr, schema)?,
        })
    }

    pub fn evaluate(&self, row: &Row) -> DbResult<Value> {
        eval_bound(&self.bound, row)
    }

    /// Evaluate as a predicate.
    pub fn matches(&self, row: &Row) -> DbResult<bool> {
        Ok(self.evaluate(row)?.truthy())
    }
}
