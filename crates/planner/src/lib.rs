//! Logical plan tree and the cost-based optimizer that rewrites it.
//!
//! A [`PlanNode`] tree arrives from the binder with output schemas, global
//! column ids, and per-leaf table bitsets already assigned. The optimizer
//! first applies rewrite rules to a fixed point (predicate push-down,
//! scan-to-range conversion, hash-join conversion), then — when the plan is
//! a pure join tree over tables with statistics — replaces the join order
//! with the cheapest one found by a bitmask DP over table subsets.

mod card;
mod cost;
mod optimizer;
mod rules;


pub use card::{estimate_join_eq, estimate_table, Summary};
pub use optimizer::optimize;
pub use rules::{
    apply_rules, ConvertToHashJoinRule, ConvertToRangeScanRule, OptRule, PushDownFilterRule,
    PushDownJoinPredicateRule,
};

use catalog::Catalog;
use expr::{Expr, OutputSchema, PredicateVec};
use types::Value;

/// One endpoint of a range scan: the key value and whether it is included.
/// `None` means the scan is unbounded on that side.
pub type RangeBound = Option<(Value, bool)>;

/// Sort key: expression plus descending flag.
#[derive(Clone, Debug)]
pub struct OrderByKey {
    pub expr: Expr,
    pub desc: bool,
}

/// Logical/physical plan node. The same tree is both rewritten by the
/// optimizer and walked by the executor generator.
#[derive(Clone, Debug)]
pub enum PlanNode {
    /// Constant rows, the input of `Insert`.
    Print {
        rows: Vec<Vec<Expr>>,
        schema: OutputSchema,
    },
    SeqScan {
        table: String,
        predicate: PredicateVec,
        schema: OutputSchema,
        bitset: u64,
    },
    RangeScan {
        table: String,
        predicate: PredicateVec,
        range_l: RangeBound,
        range_r: RangeBound,
        schema: OutputSchema,
        bitset: u64,
    },
    Filter {
        predicate: PredicateVec,
        child: Box<PlanNode>,
    },
    Project {
        exprs: Vec<Expr>,
        schema: OutputSchema,
        child: Box<PlanNode>,
    },
    Join {
        predicate: PredicateVec,
        left: Box<PlanNode>,
        right: Box<PlanNode>,
    },
    HashJoin {
        predicate: PredicateVec,
        left_keys: Vec<Expr>,
        right_keys: Vec<Expr>,
        left: Box<PlanNode>,
        right: Box<PlanNode>,
    },
    Aggregate {
        group_by: Vec<Expr>,
        /// HAVING; groups whose evaluation is zero or NULL are dropped.
        having: Option<Expr>,
        outputs: Vec<Expr>,
        schema: OutputSchema,
        child: Box<PlanNode>,
    },
    Order {
        keys: Vec<OrderByKey>,
        child: Box<PlanNode>,
    },
    Limit {
        limit: u64,
        offset: u64,
        child: Box<PlanNode>,
    },
    Distinct {
        child: Box<PlanNode>,
    },
    Insert {
        table: String,
        child: Box<PlanNode>,
    },
    Delete {
        table: String,
        child: Box<PlanNode>,
    },
}

impl PlanNode {
    /// Schema of the rows this node produces.
    pub fn output_schema(&self) -> OutputSchema {
        match self {
            PlanNode::Print { schema, .. }
            | PlanNode::SeqScan { schema, .. }
            | PlanNode::RangeScan { schema, .. }
            | PlanNode::Project { schema, .. }
            | PlanNode::Aggregate { schema, .. } => schema.clone(),
            PlanNode::Filter { child, .. }
            | PlanNode::Order { child, .. }
            | PlanNode::Limit { child, .. }
            | PlanNode::Distinct { child } => child.output_schema(),
            PlanNode::Join { left, right, .. } | PlanNode::HashJoin { left, right, .. } => {
                OutputSchema::concat(&left.output_schema(), &right.output_schema())
            }
            // DML nodes produce a single affected-row count.
            PlanNode::Insert { .. } | PlanNode::Delete { .. } => OutputSchema::default(),
        }
    }

    /// Bitset of base-table instances feeding this node.
    pub fn table_bitset(&self) -> u64 {
        match self {
            PlanNode::SeqScan { bitset, .. } | PlanNode::RangeScan { bitset, .. } => *bitset,
            PlanNode::Print { .. } => 0,
            PlanNode::Filter { child, .. }
            | PlanNode::Project { child, .. }
            | PlanNode::Order { child, .. }
            | PlanNode::Limit { child, .. }
            | PlanNode::Distinct { child }
            | PlanNode::Aggregate { child, .. }
            | PlanNode::Insert { child, .. }
            | PlanNode::Delete { child, .. } => child.table_bitset(),
            PlanNode::Join { left, right, .. } | PlanNode::HashJoin { left, right, .. } => {
                left.table_bitset() | right.table_bitset()
            }
        }
    }

    /// Rebuild this node with its children mapped through `f`.
    pub(crate) fn map_children(self, f: &mut impl FnMut(PlanNode) -> PlanNode) -> PlanNode {
        match self {
            n @ (PlanNode::Print { .. }
            | PlanNode::SeqScan { .. }
            | PlanNode::RangeScan { .. }) => n,
            PlanNode::Filter { predicate, child } => PlanNode::Filter {
                predicate,
                child: Box::new(f(*child)),
            },
            PlanNode::Project {
                exprs,
                schema,
                child,
            } => PlanNode::Project {
                exprs,
                schema,
                child: Box::new(f(*child)),
            },
            PlanNode::Join {
                predicate,
                left,
                right,
            } => PlanNode::Join {
                predicate,
                left: Box::new(f(*left)),
                right: Box::new(f(*right)),
            },
            PlanNode::HashJoin {
                predicate,
                left_keys,
                right_keys,
                left,
                right,
            } => PlanNode::HashJoin {
                predicate,
                left_keys,
                right_keys,
                left: Box::new(f(*left)),
                right: Box::new(f(*right)),
            },
            PlanNode::Aggregate {
                group_by,
                having,
                outputs,
                schema,
                child,
            } => PlanNode::Aggregate {
                group_by,
                having,
                outputs,
                schema,
                child: Box::new(f(*child)),
            },
            PlanNode::Order { keys, child } => PlanNode::Order {
                keys,
                child: Box::new(f(*child)),
            },
            PlanNode::Limit {
                limit,
                offset,
                child,
            } => PlanNode::Limit {
                limit,
                offset,
                child: Box::new(f(*child)),
            },
            PlanNode::Distinct { child } => PlanNode::Distinct {
                child: Box::new(f(*child)),
            },
            PlanNode::Insert { table, child } => PlanNode::Insert {
                table,
                child: Box::new(f(*child)),
            },
            PlanNode::Delete { table, child } => PlanNode::Delete {
                table,
                child: Box::new(f(*child)),
            },
        }
    }
}

/// Build a scan's output schema from a table's columns, in declaration
/// order, assigning consecutive global column ids starting at `base_id`.
/// Scan schemas must keep declaration order so the optimizer can map a
/// schema ordinal back to the table's column ordinal.
pub fn table_scan_schema(
    table: &catalog::TableMeta,
    base_id: common::ColumnId,
) -> OutputSchema {
    OutputSchema::new(
        table
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| {
                expr::OutputColumn::new(base_id + i as common::ColumnId, c.name.clone(), c.ty)
            })
            .collect(),
    )
}

/// Everything the rules need besides the plan itself.
pub struct PlannerContext<'a> {
    pub catalog: &'a Catalog,
}
