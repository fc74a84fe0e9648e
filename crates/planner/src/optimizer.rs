//! Cost-based join ordering: a bitmask DP over table subsets, bracketed by
//! the rewrite rules.

use catalog::Catalog;
use expr::PredicateVec;
use log::debug;

use crate::card::{estimate_join_eq, estimate_table, Summary};
use crate::cost::{hash_join_cost, nested_loop_join_cost, seq_scan_cost};
use crate::rules::{
    apply_rules, ConvertToHashJoinRule, ConvertToRangeScanRule, OptRule, PushDownFilterRule,
    PushDownJoinPredicateRule,
};
use crate::{PlanNode, PlannerContext};

const MAX_DP_TABLES: usize = 10;

/// Optimize a bound plan: rewrite rules to a fixed point and, when the plan
/// shape allows it, the DP join reordering.
pub fn optimize(plan: PlanNode, catalog: &Catalog) -> PlanNode {
    let ctx = PlannerContext { catalog };
    if dp_applicable(&plan, catalog) {
        // Push predicates down first so leaf estimates see them, but delay
        // hash-join conversion until the new join order is in place.
        let rules: Vec<Box<dyn OptRule>> = vec![
            Box::new(PushDownFilterRule),
            Box::new(PushDownJoinPredicateRule),
            Box::new(ConvertToRangeScanRule),
        ];
        let plan = apply_rules(plan, &rules, &ctx);
        // Push-down may only have produced scans and joins below the root;
        // re-check before detaching leaves.
        let plan = if dp_applicable(&plan, catalog) {
            reorder_joins(plan, catalog)
        } else {
            plan
        };
        let rules: Vec<Box<dyn OptRule>> = vec![
            Box::new(PushDownFilterRule),
            Box::new(PushDownJoinPredicateRule),
            Box::new(ConvertToHashJoinRule),
            Box::new(ConvertToRangeScanRule),
        ];
        apply_rules(plan, &rules, &ctx)
    } else {
        let rules: Vec<Box<dyn OptRule>> = vec![
            Box::new(PushDownFilterRule),
            Box::new(PushDownJoinPredicateRule),
            Box::new(ConvertToHashJoinRule),
            Box::new(ConvertToRangeScanRule),
        ];
        apply_rules(plan, &rules, &ctx)
    }
}

/// DP applies when the root is a single Project or Aggregate over a pure
/// join tree of scans, with at most [`MAX_DP_TABLES`] tables, all of which
/// have statistics.
fn dp_applicable(plan: &PlanNode, catalog: &Catalog) -> bool {
    let child = match plan {
        PlanNode::Project { child, .. } | PlanNode::Aggregate { child, .. } => child,
        _ => return false,
    };
    table_count(child) <= MAX_DP_TABLES
        && all_joins_and_scans(child)
        && scans_have_stats(child, catalog)
}

fn table_count(plan: &PlanNode) -> usize {
    match plan {
        PlanNode::SeqScan { .. } | PlanNode::RangeScan { .. } => 1,
        PlanNode::Join { left, right, .. } | PlanNode::HashJoin { left, right, .. } => {
            table_count(left) + table_count(right)
        }
        // Anything else (e.g. constant rows) disqualifies the subtree by
        // inflating the count past the DP limit.
        _ => MAX_DP_TABLES + 1,
    }
}

fn all_joins_and_scans(plan: &PlanNode) -> bool {
    match plan {
        PlanNode::SeqScan { .. } | PlanNode::RangeScan { .. } => true,
        PlanNode::Join { left, right, .. } => all_joins_and_scans(left) && all_joins_and_scans(right),
        _ => false,
    }
}

fn scans_have_stats(plan: &PlanNode, catalog: &Catalog) -> bool {
    match plan {
        PlanNode::SeqScan { table, .. } | PlanNode::RangeScan { table, .. } => {
            catalog.stats(table).is_some()
        }
        PlanNode::Join { left, right, .. } => {
            scans_have_stats(left, catalog) && scans_have_stats(right, catalog)
        }
        _ => false,
    }
}

/// Collect every join predicate of the subtree into one flat list.
fn collect_join_predicates(plan: &PlanNode, out: &mut PredicateVec) {
    match plan {
        PlanNode::Join {
            predicate,
            left,
            right,
        } => {
            out.append(predicate.clone());
            collect_join_predicates(left, out);
            collect_join_predicates(right, out);
        }
        _ => {}
    }
}

/// Detach the leaf scans, estimating each one on the way out.
fn collect_leaves(plan: PlanNode, leaves: &mut Vec<(PlanNode, Summary)>, catalog: &Catalog) {
    match plan {
        PlanNode::SeqScan { .. } | PlanNode::RangeScan { .. } => {
            let (table, predicate, schema) = match &plan {
                PlanNode::SeqScan {
                    table,
                    predicate,
                    schema,
                    ..
                }
                | PlanNode::RangeScan {
                    table,
                    predicate,
                    schema,
                    ..
                } => (table.clone(), predicate.clone(), schema.clone()),
                _ => unreachable!(),
            };
            let stats = catalog
                .stats(&table)
                .expect("DP applicability guaranteed statistics");
            let summary = estimate_table(stats, &predicate, &schema);
            leaves.push((plan, summary));
        }
        PlanNode::Join { left, right, .. } => {
            collect_leaves(*left, leaves, catalog);
            collect_leaves(*right, leaves, catalog);
        }
        other => unreachable!("non-join node {other:?} under a DP join tree"),
    }
}

fn reorder_joins(plan: PlanNode, catalog: &Catalog) -> PlanNode {
    let (root, child) = match plan {
        PlanNode::Project {
            exprs,
            schema,
            child,
        } => (
            |c: PlanNode| PlanNode::Project {
                exprs,
                schema,
                child: Box::new(c),
            },
            child,
        ),
        _ => return reorder_joins_aggregate(plan, catalog),
    };
    let ordered = dp_order(*child, catalog);
    root(ordered)
}

// Split out because the two root closures have different captures.
fn reorder_joins_aggregate(plan: PlanNode, catalog: &Catalog) -> PlanNode {
    match plan {
        PlanNode::Aggregate {
            group_by,
            having,
            outputs,
            schema,
            child,
        } => {
            let ordered = dp_order(*child, catalog);
            PlanNode::Aggregate {
                group_by,
                having,
                outputs,
                schema,
                child: Box::new(ordered),
            }
        }
        other => other,
    }
}

/// The DP proper: `f[S]` is the cheapest cost of joining subset `S`,
/// `g[S]` its cardinality summary, `choice[S]` the winning split.
fn dp_order(join_tree: PlanNode, catalog: &Catalog) -> PlanNode {
    let mut predicates = PredicateVec::new();
    collect_join_predicates(&join_tree, &mut predicates);
    let mut leaves = Vec::new();
    collect_leaves(join_tree, &mut leaves, catalog);
    let n = leaves.len();
    let full = (1usize << n) - 1;

    let mut summaries: Vec<Summary> = vec![Summary::default(); full + 1];
    let mut cost = vec![f64::INFINITY; full + 1];
    let mut choice = vec![0usize; full + 1];
    let mut plans: Vec<Option<PlanNode>> = Vec::with_capacity(n);

    for (i, (plan, summary)) in leaves.into_iter().enumerate() {
        let mask = 1usize << i;
        cost[mask] = seq_scan_cost(summary.size);
        summaries[mask] = summary;
        plans.push(Some(plan));
    }

    for mask in 1..=full {
        if mask.count_ones() < 2 {
            continue;
        }
        let mut sub = (mask - 1) & mask;
        while sub != 0 {
            let rest = mask ^ sub;
            if cost[sub].is_finite() && cost[rest].is_finite() {
                let connected = has_equi_connection(&predicates, &summaries[sub], &summaries[rest]);
                let join_cost = if connected {
                    hash_join_cost(summaries[sub].size, summaries[rest].size)
                } else {
                    nested_loop_join_cost(summaries[sub].size, summaries[rest].size)
                };
                let total = cost[sub] + cost[rest] + join_cost;
                if total < cost[mask] {
                    cost[mask] = total;
                    choice[mask] = sub;
                    summaries[mask] =
                        estimate_join_eq(&predicates, &summaries[sub], &summaries[rest]);
                }
            }
            sub = (sub - 1) & mask;
        }
    }

    debug!(
        "dp join order over {n} tables, estimated cost {:.1}",
        cost[full]
    );
    build_join(full, &choice, &mut plans, &predicates, full)
}

fn has_equi_connection(predicates: &PredicateVec, a: &Summary, b: &Summary) -> bool {
    let in_a = |id| a.distinct_rate.iter().any(|(c, _)| *c == id);
    let in_b = |id| b.distinct_rate.iter().any(|(c, _)| *c == id);
    predicates.iter().any(|p| {
        p.is_eq()
            && match (p.left_col_id(), p.right_col_id()) {
                (Some(l), Some(r)) => (in_a(l) && in_b(r)) || (in_a(r) && in_b(l)),
                _ => false,
            }
    })
}

fn build_join(
    mask: usize,
    choice: &[usize],
    plans: &mut [Option<PlanNode>],
    predicates: &PredicateVec,
    full: usize,
) -> PlanNode {
    if mask.count_ones() == 1 {
        let idx = mask.trailing_zeros() as usize;
        return plans[idx].take().expect("leaf consumed twice");
    }
    let sub = choice[mask];
    let left = build_join(sub, choice, plans, predicates, full);
    let right = build_join(mask ^ sub, choice, plans, predicates, full);
    // The whole predicate list rides on the topmost join; the push-down
    // pass that follows distributes it to where it belongs.
    let predicate = if mask == full {
        predicates.clone()
    } else {
        PredicateVec::new()
    };
    PlanNode::Join {
        predicate,
        left: Box::new(left),
        right: Box::new(right),
    }
}
