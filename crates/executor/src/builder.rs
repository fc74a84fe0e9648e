//! Executor generator: walk an optimized plan tree and build the matching
//! operator tree, binding every expression against its input schema.

use std::sync::Arc;

use catalog::Catalog;
use common::{DbResult, Row};
use engine::StorageEngine;
use expr::{AggExprFunction, ExprFunction, OutputSchema, PredicateVec};
use planner::PlanNode;
use txn::Txn;

use crate::dml::ReverseFkCheck;
use crate::sort::SortKey;
use crate::{
    AggregateExec, DeleteExec, DistinctExec, Executor, FilterExec, HashJoinExec, InsertExec,
    LimitExec, NestedLoopJoinExec, OrderByExec, PrintExec, ProjectExec, RangeScanExec, SeqScanExec,
};

/// Build the operator tree for `plan` under `txn`.
pub fn build_executor(
    plan: &PlanNode,
    catalog: &Catalog,
    engine: &Arc<StorageEngine>,
    txn: &Arc<Txn>,
) -> DbResult<Box<dyn Executor>> {
    Ok(match plan {
        PlanNode::Print { rows, .. } => {
            let empty = OutputSchema::default();
            let mut materialized = Vec::with_capacity(rows.len());
            for row in rows {
                let mut values = Vec::with_capacity(row.len());
                for e in row {
                    let f = ExprFunction::bind(e, &empty)?;
                    values.push(f.evaluate(&Row::new(Vec::new()))?);
                }
                materialized.push(Row::new(values));
            }
            Box::new(PrintExec::new(materialized))
        }
        PlanNode::SeqScan {
            table,
            predicate,
            schema,
            ..
        } => Box::new(SeqScanExec::new(
            Arc::clone(engine),
            Arc::clone(txn),
            table.clone(),
            bind_predicate(predicate, schema)?,
        )),
        PlanNode::RangeScan {
            table,
            predicate,
            range_l,
            range_r,
            schema,
            ..
        } => Box::new(RangeScanExec::new(
            Arc::clone(engine),
            Arc::clone(txn),
            table.clone(),
            range_l.clone(),
            range_r.clone(),
            bind_predicate(predicate, schema)?,
        )),
        PlanNode::Filter { predicate, child } => {
            let schema = child.output_schema();
            let input = build_executor(child, catalog, engine, txn)?;
            match bind_predicate(predicate, &schema)? {
                Some(f) => Box::new(FilterExec::new(input, f)),
                None => input,
            }
        }
        PlanNode::Project {
            exprs,
            child,
            ..
        } => {
            let schema = child.output_schema();
            let input = build_executor(child, catalog, engine, txn)?;
            let fns = exprs
                .iter()
                .map(|e| ExprFunction::bind(e, &schema))
                .collect::<DbResult<Vec<_>>>()?;
            Box::new(ProjectExec::new(input, fns))
        }
        PlanNode::Join {
            predicate,
            left,
            right,
        } => {
            let schema = OutputSchema::concat(&left.output_schema(), &right.output_schema());
            let left_exec = build_executor(left, catalog, engine, txn)?;
            let right_exec = build_executor(right, catalog, engine, txn)?;
            Box::new(NestedLoopJoinExec::new(
                left_exec,
                right_exec,
                bind_predicate(predicate, &schema)?,
            ))
        }
        PlanNode::HashJoin {
            predicate,
            left_keys,
            right_keys,
            left,
            right,
        } => {
            let left_schema = left.output_schema();
            let right_schema = right.output_schema();
            let schema = OutputSchema::concat(&left_schema, &right_schema);
            let left_exec = build_executor(left, catalog, engine, txn)?;
            let right_exec = build_executor(right, catalog, engine, txn)?;
            let left_fns = left_keys
                .iter()
                .map(|e| ExprFunction::bind(e, &left_schema))
                .collect::<DbResult<Vec<_>>>()?;
            let right_fns = right_keys
                .iter()
                .map(|e| ExprFunction::bind(e, &right_schema))
                .collect::<DbResult<Vec<_>>>()?;
            Box::new(HashJoinExec::new(
                left_exec,
                right_exec,
                bind_predicate(predicate, &schema)?,
                left_fns,
                right_fns,
            ))
        }
        PlanNode::Aggregate {
            group_by,
            having,
            outputs,
            child,
            ..
        } => {
            let schema = child.output_schema();
            let input = build_executor(child, catalog, engine, txn)?;
            let group_fns = group_by
                .iter()
                .map(|e| ExprFunction::bind(e, &schema))
                .collect::<DbResult<Vec<_>>>()?;
            let output_fns = outputs
                .iter()
                .map(|e| AggExprFunction::bind(e, &schema))
                .collect::<DbResult<Vec<_>>>()?;
            let having_fn = having
                .as_ref()
                .map(|e| AggExprFunction::bind(e, &schema))
                .transpose()?;
            Box::new(AggregateExec::new(input, group_fns, output_fns, having_fn))
        }
        PlanNode::Order { keys, child } => {
            let schema = child.output_schema();
            let input = build_executor(child, catalog, engine, txn)?;
            let sort_keys = keys
                .iter()
                .map(|k| {
                    Ok(SortKey {
                        expr: ExprFunction::bind(&k.expr, &schema)?,
                        desc: k.desc,
                    })
                })
                .collect::<DbResult<Vec<_>>>()?;
            Box::new(OrderByExec::new(input, sort_keys))
        }
        PlanNode::Limit {
            limit,
            offset,
            child,
        } => {
            let input = build_executor(child, catalog, engine, txn)?;
            Box::new(LimitExec::new(input, *limit, *offset))
        }
        PlanNode::Distinct { child } => {
            let input = build_executor(child, catalog, engine, txn)?;
            Box::new(DistinctExec::new(input))
        }
        PlanNode::Insert { table, child } => {
            let meta = catalog.table(table)?.clone();
            let input = build_executor(child, catalog, engine, txn)?;
            Box::new(InsertExec::new(
                Arc::clone(engine),
                Arc::clone(txn),
                meta,
                input,
            ))
        }
        PlanNode::Delete { table, child } => {
            let meta = catalog.table(table)?.clone();
            let reverse_fks = catalog
                .referencing_tables(table)
                .into_iter()
                .filter(|(referencing, _)| referencing.name != *table)
                .map(|(referencing, column)| ReverseFkCheck {
                    table: referencing.name.clone(),
                    column,
                })
                .collect();
            let input = build_executor(child, catalog, engine, txn)?;
            Box::new(DeleteExec::new(
                Arc::clone(engine),
                Arc::clone(txn),
                meta,
                reverse_fks,
                input,
            ))
        }
    })
}

fn bind_predicate(
    predicate: &PredicateVec,
    schema: &OutputSchema,
) -> DbResult<Option<ExprFunction>> {
    match predicate.to_expr() {
        Some(expr) => Ok(Some(ExprFunction::bind(&expr, schema)?)),
        None => Ok(None),
    }
}

/// Top-level entry: build, init, and drain a plan under a transaction.
pub fn execute_plan(
    plan: &PlanNode,
    catalog: &Catalog,
    engine: &Arc<StorageEngine>,
    txn: &Arc<Txn>,
) -> DbResult<Vec<Row>> {
    let mut exec = build_executor(plan, catalog, engine, txn)?;
    crate::collect(exec.as_mut())
}

