//! # Column Pruning
//!
//! Rewrite rules that drop columns no consumer reads. The rewrite phase visits
//! groups parents first and hands every group the set of columns required by
//! its consumers (`OptContext::required_columns`); these rules narrow the
//! group's operator to that set:
//!
//! - **`PruneScanColumns`**: drops unread projection entries and table columns.
//!   The scan keeps every column its predicate or projection reads. A scan that
//!   would read nothing (e.g. under `count(*)`) keeps its narrowest column so
//!   the row count survives.
//! - **`PruneProjectColumns`**: drops unread projection entries.
//! - **`PruneAggregateColumns`**: drops aggregate calls whose result is never
//!   read. Group-by keys are kept since they decide the number of output rows.
//!   `count` of a non-null constant counts rows and becomes `count(*)`, which
//!   reads no input column.
//!
//! A projection is never pruned to nothing, and common sub-expressions that no
//! remaining entry references are dropped with it.
//!
//! Each rule returns no result when there is nothing to prune, which ends the
//! rewrite loop for the group.

use cascade_core::column::ColumnRefSet;
use cascade_core::error::Result;
use cascade_core::expr::{LogicalOperator, Operator, Projection};
use cascade_core::memo::{GroupExpression, Memo};
use cascade_core::pattern::Pattern;
use cascade_core::rule::{OptContext, Rule, RuleResult, RuleType};
use cascade_core::scalar::{AggCall, AggFunction, ScalarOperator, ScalarValue};

/// `count(c)` for a non-null constant `c` is `count(*)`.
fn count_rows(call: &AggCall) -> AggCall {
    match (&call.function, &call.arg, call.distinct) {
        (AggFunction::Count, Some(ScalarOperator::Constant(value, _)), false) if *value != ScalarValue::Null => {
            AggCall::new(AggFunction::Count, None)
        }
        _ => call.clone(),
    }
}

/// `projection` restricted to the `required` outputs, keeping at least one.
fn prune_projection(projection: &Projection, required: &ColumnRefSet) -> Projection {
    let mut columns: Vec<_> = projection
        .columns
        .iter()
        .filter(|(column, _)| required.contains(column.id))
        .cloned()
        .collect();
    if columns.is_empty() {
        columns.extend(projection.columns.first().cloned());
    }

    // Later common sub-expressions may read earlier ones.
    let mut used = ColumnRefSet::new();
    for (_, expr) in &columns {
        used.union_with(&expr.used_columns());
    }
    let mut common_sub_operators = Vec::new();
    for (column, expr) in projection.common_sub_operators.iter().rev() {
        if used.contains(column.id) {
            used.union_with(&expr.used_columns());
            common_sub_operators.push((column.clone(), expr.clone()));
        }
    }
    common_sub_operators.reverse();

    Projection {
        columns,
        common_sub_operators,
    }
}

/// Substitute `op` for `expr` unless nothing changed.
fn substitute_if_changed(expr: &GroupExpression, op: LogicalOperator) -> Vec<RuleResult> {
    let op = Operator::Logical(op);
    if op == expr.op {
        return vec![];
    }
    vec![RuleResult::Substitution(op, expr.children.clone())]
}

pub struct PruneScanColumns;

impl Rule for PruneScanColumns {
    fn name(&self) -> &str {
        "PruneScanColumns"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Rewrite
    }

    fn pattern(&self) -> Pattern {
        Pattern::scan()
    }

    fn apply(&self, expr: &GroupExpression, _memo: &Memo, ctx: &OptContext) -> Result<Vec<RuleResult>> {
        let (
            Some(required),
            Operator::Logical(LogicalOperator::Scan {
                table,
                columns,
                predicate,
                projection,
            }),
        ) = (ctx.required_columns, &expr.op)
        else {
            return Ok(vec![]);
        };

        let projection = projection.as_ref().map(|p| prune_projection(p, required));
        let mut needed = predicate.as_ref().map(|p| p.used_columns()).unwrap_or_default();
        match &projection {
            Some(projection) => needed.union_with(&projection.used_columns()),
            None => needed.union_with(required),
        }

        let mut kept: Vec<_> = columns.iter().filter(|c| needed.contains(c.id)).cloned().collect();
        if kept.is_empty() {
            kept.extend(
                columns
                    .iter()
                    .min_by(|a, b| a.data_type.byte_width().total_cmp(&b.data_type.byte_width()))
                    .cloned(),
            );
        }

        Ok(substitute_if_changed(
            expr,
            LogicalOperator::Scan {
                table: table.clone(),
                columns: kept,
                predicate: predicate.clone(),
                projection,
            },
        ))
    }
}

pub struct PruneProjectColumns;

impl Rule for PruneProjectColumns {
    fn name(&self) -> &str {
        "PruneProjectColumns"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Rewrite
    }

    fn pattern(&self) -> Pattern {
        Pattern::project()
    }

    fn apply(&self, expr: &GroupExpression, _memo: &Memo, ctx: &OptContext) -> Result<Vec<RuleResult>> {
        let (Some(required), Operator::Logical(LogicalOperator::Project { projection })) =
            (ctx.required_columns, &expr.op)
        else {
            return Ok(vec![]);
        };
        Ok(substitute_if_changed(
            expr,
            LogicalOperator::Project {
                projection: prune_projection(projection, required),
            },
        ))
    }
}

pub struct PruneAggregateColumns;

impl Rule for PruneAggregateColumns {
    fn name(&self) -> &str {
        "PruneAggregateColumns"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Rewrite
    }

    fn pattern(&self) -> Pattern {
        Pattern::aggregate()
    }

    fn apply(&self, expr: &GroupExpression, _memo: &Memo, ctx: &OptContext) -> Result<Vec<RuleResult>> {
        let (
            Some(required),
            Operator::Logical(LogicalOperator::Aggregate {
                stage,
                group_by,
                aggregations,
                split,
            }),
        ) = (ctx.required_columns, &expr.op)
        else {
            return Ok(vec![]);
        };

        let mut kept: Vec<_> = aggregations
            .iter()
            .filter(|(column, _)| required.contains(column.id))
            .map(|(column, call)| (column.clone(), count_rows(call)))
            .collect();
        if kept.is_empty() && group_by.is_empty() {
            kept.extend(aggregations.first().map(|(column, call)| (column.clone(), count_rows(call))));
        }

        Ok(substitute_if_changed(
            expr,
            LogicalOperator::Aggregate {
                stage: *stage,
                group_by: group_by.clone(),
                aggregations: kept,
                split: *split,
            },
        ))
    }
}
