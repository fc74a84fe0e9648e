use common::{DbError, DbResult, Row};
use types::Value;

use crate::{bind, eval_binary, eval_cmp, AggFunc, Bound, Expr, LogicOp, OutputSchema};

/// Output expression of an aggregate operator: aggregate calls embedded in
/// an ordinary scalar expression, e.g. `sum(a) / count(a) + 1`.
///
/// The group's running state is kept outside the function in [`AggStates`]
/// so one bound function serves every group: `first_evaluate` seeds the
/// state from a group's first row, `aggregate` folds in subsequent rows,
/// and `last_evaluate` computes the final scalar (non-aggregated columns
/// read from the group's representative row).
#[derive(Clone, Debug)]
pub struct AggExprFunction {
    bound: AggBound,
    aggs: Vec<AggSpec>,
}

#[derive(Clone, Debug)]
struct AggSpec {
    func: AggFunc,
    arg: Bound,
}

#[derive(Clone, Debug)]
enum AggBound {
    Scalar(Bound),
    Agg(usize),
    Binary {
        op: crate::BinaryOp,
        left: Box<AggBound>,
        right: Box<AggBound>,
    },
    Cmp {
        op: crate::CmpOp,
        left: Box<AggBound>,
        right: Box<AggBound>,
    },
    Logic {
        op: LogicOp,
        left: Box<AggBound>,
        right: Box<AggBound>,
    },
}

/// Intermediate accumulators for one group, one entry per aggregate call.
#[derive(Clone, Debug)]
pub struct AggStates(Vec<AggState>);

#[derive(Clone, Debug)]
enum AggState {
    Count(i64),
    Sum(Value),
    Min(Value),
    Max(Value),
    Avg { sum: f64, count: i64 },
}

impl AggExprFunction {
    pub fn bind(expr: &Expr, schema: &OutputSchema) -> DbResult<Self> {
        let mut aggs = Vec::new();
        let bound = bind_agg(expr, schema, &mut aggs)?;
        Ok(Self { bound, aggs })
    }

    /// Seed the accumulators from the group's first row.
    pub fn first_evaluate(&self, row: &Row) -> DbResult<AggStates> {
        let mut states = Vec::with_capacity(self.aggs.len());
        for spec in &self.aggs {
            let v = crate::eval_bound(&spec.arg, row)?;
            states.push(match spec.func {
                AggFunc::Count => AggState::Count(1),
                AggFunc::Sum => AggState::Sum(v),
                AggFunc::Min => AggState::Min(v),
                AggFunc::Max => AggState::Max(v),
                AggFunc::Avg => AggState::Avg {
                    sum: numeric(&v)?,
                    count: 1,
                },
            });
        }
        Ok(AggStates(states))
    }

    /// Fold one more row of the group into the accumulators.
    pub fn aggregate(&self, states: &mut AggStates, row: &Row) -> DbResult<()> {
        for (spec, state) in self.aggs.iter().zip(states.0.iter_mut()) {
            let v = crate::eval_bound(&spec.arg, row)?;
            match state {
                AggState::Count(n) => *n += 1,
                AggState::Sum(acc) => *acc = eval_binary(crate::BinaryOp::Add, acc, &v)?,
                AggState::Min(acc) => {
                    if eval_cmp(crate::CmpOp::Lt, &v, acc)? {
                        *acc = v;
                    }
                }
                AggState::Max(acc) => {
                    if eval_cmp(crate::CmpOp::Gt, &v, acc)? {
                        *acc = v;
                    }
                }
                AggState::Avg { sum, count } => {
                    *sum += numeric(&v)?;
                    *count += 1;
                }
            }
        }
        Ok(())
    }

    /// Produce the final scalar. `row` is the group's representative row,
    /// used for group-by columns appearing outside aggregate calls.
    pub fn last_evaluate(&self, states: &AggStates, row: &Row) -> DbResult<Value> {
        eval_final(&self.bound, &states.0, row)
    }
}

fn bind_agg(expr: &Expr, schema: &OutputSchema, aggs: &mut Vec<AggSpec>) -> DbResult<AggBound> {
    Ok(match expr {
        Expr::Agg { func, arg } => {
            let arg = bind(arg, schema)?;
            aggs.push(AggSpec { func: *func, arg });
            AggBound::Agg(aggs.len() - 1)
        }
        Expr::Binary { op, left, right } if expr.contains_agg() => AggBound::Binary {
            op: *op,
            left: Box::new(bind_agg(left, schema, aggs)?),
            right: Box::new(bind_agg(right, schema, aggs)?),
        },
        Expr::Cmp { op, left, right } if expr.contains_agg() => AggBound::Cmp {
            op: *op,
            left: Box::new(bind_agg(left, schema, aggs)?),
            right: Box::new(bind_agg(right, schema, aggs)?),
        },
        Expr::Logic { op, left, right } if expr.contains_agg() => AggBound::Logic {
            op: *op,
            left: Box::new(bind_agg(left, schema, aggs)?),
            right: Box::new(bind_agg(right, schema, aggs)?),
        },
        other => AggBound::Scalar(bind(other, schema)?),
    })
}

fn eval_final(bound: &AggBound, states: &[AggState], row: &Row) -> DbResult<Value> {
    Ok(match bound {
        AggBound::Scalar(b) => crate::eval_bound(b, row)?,
        AggBound::Agg(idx) => match &states[*idx] {
            AggState::Count(n) => Value::Int(*n),
            AggState::Sum(v) | AggState::Min(v) | AggState::Max(v) => v.clone(),
            AggState::Avg { sum, count } => Value::Float(sum / *count as f64),
        },
        AggBound::Binary { op, left, right } => {
            let l = eval_final(left, states, row)?;
            let r = eval_final(right, states, row)?;
            eval_binary(*op, &l, &r)?
        }
        AggBound::Cmp { op, left, right } => {
            let l = eval_final(left, states, row)?;
            let r = eval_final(right, states, row)?;
            Value::Int(eval_cmp(*op, &l, &r)? as i64)
        }
        AggBound::Logic { op, left, right } => {
            let l = eval_final(left, states, row)?.truthy();
            let r = eval_final(right, states, row)?.truthy();
            Value::Int(match op {
                LogicOp::And => (l && r) as i64,
                LogicOp::Or => (l || r) as i64,
            })
        }
    })
}

fn numeric(v: &Value) -> DbResult<f64> {
    v.as_float()
        .ok_or_else(|| DbError::Executor(format!("aggregate over non-numeric {v:?}")))
}
