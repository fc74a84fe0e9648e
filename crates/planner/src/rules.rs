//! Rewrite rules applied in a fixed-point loop per node, top-down.

use expr::{Expr, PredicateVec};
use log::trace;

use crate::card::{column_interval, interval_bounds};
use crate::{PlanNode, PlannerContext};

/// One rewrite. `matches` must become false after `transform`, or the
/// fixed-point loop would spin.
pub trait OptRule {
    fn matches(&self, plan: &PlanNode, ctx: &PlannerContext) -> bool;
    fn transform(&self, plan: PlanNode, ctx: &PlannerContext) -> PlanNode;
}

/// Apply `rules` to `plan` until none matches, then recurse into children.
pub fn apply_rules(mut plan: PlanNode, rules: &[Box<dyn OptRule>], ctx: &PlannerContext) -> PlanNode {
    loop {
        let mut changed = false;
        for rule in rules {
            if rule.matches(&plan, ctx) {
                plan = rule.transform(plan, ctx);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    plan.map_children(&mut |child| apply_rules(child, rules, ctx))
}

/// Merge filters downward: into the scans beneath them, into adjacent
/// filters, and through projections that merely forward columns.
pub struct PushDownFilterRule;

impl PushDownFilterRule {
    /// A projection forwards the filter when every column the filter reads
    /// appears in the projection's output as a bare column of the input.
    fn projects_through(exprs: &[Expr], schema: &expr::OutputSchema, predicate: &PredicateVec) -> bool {
        let mut cols = Vec::new();
        for pred in predicate.iter() {
            pred.expr.collect_columns(&mut cols);
        }
        cols.iter().all(|id| {
            schema
                .index_of(*id)
                .map(|i| matches!(exprs[i], Expr::Column(inner) if inner == *id))
                .unwrap_or(false)
        })
    }
}

impl OptRule for PushDownFilterRule {
    fn matches(&self, plan: &PlanNode, _ctx: &PlannerContext) -> bool {
        match plan {
            PlanNode::Filter { child, predicate } => match &**child {
                PlanNode::SeqScan { .. }
                | PlanNode::RangeScan { .. }
                | PlanNode::Filter { .. }
                | PlanNode::Join { .. }
                | PlanNode::HashJoin { .. } => true,
                PlanNode::Project { exprs, schema, .. } => {
                    Self::projects_through(exprs, schema, predicate)
                }
                _ => false,
            },
            _ => false,
        }
    }

    fn transform(&self, plan: PlanNode, _ctx: &PlannerContext) -> PlanNode {
        let PlanNode::Filter { predicate, child } = plan else {
            unreachable!("rule matched a non-filter node");
        };
        match *child {
            PlanNode::SeqScan {
                table,
                predicate: mut scan_pred,
                schema,
                bitset,
            } => {
                scan_pred.append(predicate);
                PlanNode::SeqScan {
                    table,
                    predicate: scan_pred,
                    schema,
                    bitset,
                }
            }
            PlanNode::RangeScan {
                table,
                predicate: mut scan_pred,
                range_l,
                range_r,
                schema,
                bitset,
            } => {
                scan_pred.append(predicate);
                PlanNode::RangeScan {
                    table,
                    predicate: scan_pred,
                    range_l,
                    range_r,
                    schema,
                    bitset,
                }
            }
            PlanNode::Filter {
                predicate: mut inner,
                child,
            } => {
                inner.append(predicate);
                PlanNode::Filter {
                    predicate: inner,
                    child,
                }
            }
            PlanNode::Project {
                exprs,
                schema,
                child,
            } => PlanNode::Project {
                exprs,
                schema,
                child: Box::new(PlanNode::Filter { predicate, child }),
            },
            PlanNode::Join {
                predicate: mut join_pred,
                left,
                right,
            } => {
                join_pred.append(predicate);
                PlanNode::Join {
                    predicate: join_pred,
                    left,
                    right,
                }
            }
            PlanNode::HashJoin {
                predicate: mut join_pred,
                left_keys,
                right_keys,
                left,
                right,
            } => {
                join_pred.append(predicate);
                PlanNode::HashJoin {
                    predicate: join_pred,
                    left_keys,
                    right_keys,
                    left,
                    right,
                }
            }
            other => PlanNode::Filter {
                predicate,
                child: Box::new(other),
            },
        }
    }
}

/// Demote join conjuncts that reference only one side into a filter over
/// that side, leaving the genuinely cross-side conjuncts on the join.
pub struct PushDownJoinPredicateRule;

fn one_sided(predicate: &PredicateVec, left_bits: u64, right_bits: u64) -> bool {
    predicate
        .iter()
        .any(|p| p.subsumed_by(left_bits) || p.subsumed_by(right_bits))
}

fn partition(
    predicate: PredicateVec,
    left_bits: u64,
    right_bits: u64,
) -> (PredicateVec, PredicateVec, PredicateVec) {
    let mut cross = PredicateVec::new();
    let mut left_only = PredicateVec::new();
    let mut right_only = PredicateVec::new();
    for pred in predicate.into_vec() {
        if pred.subsumed_by(left_bits) {
            left_only.push(pred);
        } else if pred.subsumed_by(right_bits) {
            right_only.push(pred);
        } else {
            cross.push(pred);
        }
    }
    (cross, left_only, right_only)
}

fn wrap_filter(child: Box<PlanNode>, predicate: PredicateVec) -> Box<PlanNode> {
    if predicate.is_empty() {
        child
    } else {
        Box::new(PlanNode::Filter { predicate, child })
    }
}

impl OptRule for PushDownJoinPredicateRule {
    fn matches(&self, plan: &PlanNode, _ctx: &PlannerContext) -> bool {
        match plan {
            PlanNode::Join {
                predicate,
                left,
                right,
            }
            | PlanNode::HashJoin {
                predicate,
                left,
                right,
                ..
            } => one_sided(predicate, left.table_bitset(), right.table_bitset()),
            _ => false,
        }
    }

    fn transform(&self, plan: PlanNode, _ctx: &PlannerContext) -> PlanNode {
        match plan {
            PlanNode::Join {
                predicate,
                left,
                right,
            } => {
                let (cross, l, r) = partition(predicate, left.table_bitset(), right.table_bitset());
                PlanNode::Join {
                    predicate: cross,
                    left: wrap_filter(left, l),
                    right: wrap_filter(right, r),
                }
            }
            PlanNode::HashJoin {
                predicate,
                left_keys,
                right_keys,
                left,
                right,
            } => {
                let (cross, l, r) = partition(predicate, left.table_bitset(), right.table_bitset());
                PlanNode::HashJoin {
                    predicate: cross,
                    left_keys,
                    right_keys,
                    left: wrap_filter(left, l),
                    right: wrap_filter(right, r),
                }
            }
            _ => unreachable!("rule matched a non-join node"),
        }
    }
}

/// Turn a sequential scan whose predicate bounds the primary key with
/// literals into a range scan over the clustered tree. The predicate is
/// kept in full; the bounds only narrow the cursor.
pub struct ConvertToRangeScanRule;

impl ConvertToRangeScanRule {
    fn pk_column_id(table: &str, schema: &expr::OutputSchema, ctx: &PlannerContext) -> Option<common::ColumnId> {
        let meta = ctx.catalog.table(table).ok()?;
        schema.columns.get(meta.primary_key).map(|c| c.id)
    }
}

impl OptRule for ConvertToRangeScanRule {
    fn matches(&self, plan: &PlanNode, ctx: &PlannerContext) -> bool {
        let PlanNode::SeqScan {
            table,
            predicate,
            schema,
            ..
        } = plan
        else {
            return false;
        };
        let Some(pk) = Self::pk_column_id(table, schema, ctx) else {
            return false;
        };
        predicate.iter().any(|p| p.literal_against(pk).is_some())
    }

    fn transform(&self, plan: PlanNode, ctx: &PlannerContext) -> PlanNode {
        let PlanNode::SeqScan {
            table,
            predicate,
            schema,
            bitset,
        } = plan
        else {
            unreachable!("rule matched a non-seqscan node");
        };
        let pk = Self::pk_column_id(&table, &schema, ctx)
            .expect("matched scan lost its primary key column");
        let interval = column_interval(&predicate, pk);
        let (range_l, range_r) = interval_bounds(&interval);
        trace!("seq scan on {table} becomes range scan");
        PlanNode::RangeScan {
            table,
            predicate,
            range_l,
            range_r,
            schema,
            bitset,
        }
    }
}

/// Rewrite a join with at least one cross-side equi-predicate between bare
/// columns into a hash join keyed on those columns. The full predicate
/// list stays on the node: hash buckets may collide, and the residual
/// evaluation restores exactness.
pub struct ConvertToHashJoinRule;

fn equi_key_pairs(
    predicate: &PredicateVec,
    left_bits: u64,
    right_bits: u64,
) -> (Vec<Expr>, Vec<Expr>) {
    let mut left_keys = Vec::new();
    let mut right_keys = Vec::new();
    for pred in predicate.iter() {
        if !pred.is_eq() {
            continue;
        }
        let (Some(a), Some(b)) = (pred.left_col_id(), pred.right_col_id()) else {
            continue;
        };
        if pred.left_bits & !left_bits == 0 && pred.right_bits & !right_bits == 0 {
            left_keys.push(expr::col(a));
            right_keys.push(expr::col(b));
        } else if pred.left_bits & !right_bits == 0 && pred.right_bits & !left_bits == 0 {
            left_keys.push(expr::col(b));
            right_keys.push(expr::col(a));
        }
    }
    (left_keys, right_keys)
}

impl OptRule for ConvertToHashJoinRule {
    fn matches(&self, plan: &PlanNode, _ctx: &PlannerContext) -> bool {
        let PlanNode::Join {
            predicate,
            left,
            right,
        } = plan
        else {
            return false;
        };
        !equi_key_pairs(predicate, left.table_bitset(), right.table_bitset())
            .0
            .is_empty()
    }

    fn transform(&self, plan: PlanNode, _ctx: &PlannerContext) -> PlanNode {
        let PlanNode::Join {
            predicate,
            left,
            right,
        } = plan
        else {
            unreachable!("rule matched a non-join node");
        };
        let (left_keys, right_keys) =
            equi_key_pairs(&predicate, left.table_bitset(), right.table_bitset());
        PlanNode::HashJoin {
            predicate,
            left_keys,
            right_keys,
            left,
            right,
        }
    }
}
