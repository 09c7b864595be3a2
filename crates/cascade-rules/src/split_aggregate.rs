//! # Two-Stage Aggregation
//!
//! Splits a global aggregate into a local stage and a global stage:
//!
//! ```text
//! Before: Aggregate[global](keys, sum(x), count(*))
//! After:  Aggregate[global](keys, sum(p1), sum(p2))
//!           Aggregate[local](keys, p1 := sum(x), p2 := count(*))
//! ```
//!
//! The local stage runs on every node over whatever rows that node holds and
//! needs no data movement. Only its partial results are shuffled on the group-by
//! keys (or gathered, without keys) for the global stage. When the number of groups
//! is small compared to the input this moves far less data than shuffling the
//! raw rows; the cost model compares both shapes since the one-stage aggregate
//! stays in the group.
//!
//! Only calls whose partial results can be merged are split: `count` merges with
//! `merge_count` (which, unlike `sum`, yields 0 over no rows), `sum`/`min`/`max`
//! merge with themselves. `avg` keeps the aggregate in one stage.
//!
//! DISTINCT calls that all read the same column split differently. The rows are
//! first deduplicated on the keys plus that column, locally and then globally,
//! and the original functions run without DISTINCT over the distinct rows:
//!
//! ```text
//! Before: Aggregate[global](keys, count(DISTINCT x))
//! After:  Aggregate[global](keys, count(x))
//!           Aggregate[global](keys + x)
//!             Aggregate[local](keys + x)
//! ```

use cascade_core::column::ColumnRef;
use cascade_core::error::Result;
use cascade_core::expr::{AggStage, LogicalOperator, Operator};
use cascade_core::memo::{GroupExpression, GroupId, Memo};
use cascade_core::pattern::Pattern;
use cascade_core::rule::{OptContext, Rule, RuleChild, RuleResult, RuleType};
use cascade_core::scalar::{AggCall, ScalarOperator};

pub struct SplitAggregate;

/// The column every call aggregates with DISTINCT, if there is exactly one.
fn distinct_column(aggregations: &[(ColumnRef, AggCall)]) -> Option<&ColumnRef> {
    let (_, first) = aggregations.first()?;
    let column = first.arg.as_ref()?.as_column()?;
    aggregations
        .iter()
        .all(|(_, call)| call.distinct && call.arg.as_ref().and_then(|arg| arg.as_column()) == Some(column))
        .then_some(column)
}

fn split_distinct(
    group_by: &[ColumnRef],
    aggregations: &[(ColumnRef, AggCall)],
    column: &ColumnRef,
    input: GroupId,
) -> RuleResult {
    let mut keys = group_by.to_vec();
    if !keys.contains(column) {
        keys.push(column.clone());
    }
    let dedup = |stage| {
        Operator::Logical(LogicalOperator::Aggregate {
            stage,
            group_by: keys.clone(),
            aggregations: vec![],
            split: true,
        })
    };
    let global = Operator::Logical(LogicalOperator::Aggregate {
        stage: AggStage::Global,
        group_by: group_by.to_vec(),
        aggregations: aggregations
            .iter()
            .map(|(output, call)| (output.clone(), AggCall::new(call.function, call.arg.clone())))
            .collect(),
        split: true,
    });
    RuleResult::NewChildren(
        global,
        vec![RuleChild::NewExpr(
            dedup(AggStage::Global),
            vec![RuleChild::NewExpr(dedup(AggStage::Local), vec![RuleChild::Group(input)])],
        )],
    )
}

impl Rule for SplitAggregate {
    fn name(&self) -> &str {
        "SplitAggregate"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::aggregate()
    }

    fn check(&self, expr: &GroupExpression, _memo: &Memo, ctx: &OptContext) -> bool {
        let Operator::Logical(LogicalOperator::Aggregate {
            stage: AggStage::Global,
            aggregations,
            split: false,
            ..
        }) = &expr.op
        else {
            return false;
        };
        ctx.config.enable_two_stage_agg
            && (aggregations.iter().all(|(_, call)| call.is_splittable()) || distinct_column(aggregations).is_some())
    }

    fn apply(&self, expr: &GroupExpression, _memo: &Memo, ctx: &OptContext) -> Result<Vec<RuleResult>> {
        let (
            Operator::Logical(LogicalOperator::Aggregate {
                group_by,
                aggregations,
                ..
            }),
            &[input],
        ) = (&expr.op, &expr.children[..])
        else {
            return Ok(vec![]);
        };
        if let Some(column) = distinct_column(aggregations) {
            return Ok(vec![split_distinct(group_by, aggregations, column, input)]);
        }

        let mut local_aggregations = Vec::with_capacity(aggregations.len());
        let mut global_aggregations = Vec::with_capacity(aggregations.len());
        for (output, call) in aggregations {
            let partial = ctx
                .column_factory
                .create(format!("partial_{}", output.name), call.return_type(), call.nullable());
            let merge = AggCall::new(call.merge_function(), Some(ScalarOperator::column(&partial)));
            local_aggregations.push((partial, call.clone()));
            global_aggregations.push((output.clone(), merge));
        }

        let local = Operator::Logical(LogicalOperator::Aggregate {
            stage: AggStage::Local,
            group_by: group_by.clone(),
            aggregations: local_aggregations,
            split: false,
        });
        let global = Operator::Logical(LogicalOperator::Aggregate {
            stage: AggStage::Global,
            group_by: group_by.clone(),
            aggregations: global_aggregations,
            split: true,
        });
        Ok(vec![RuleResult::NewChildren(
            global,
            vec![RuleChild::NewExpr(local, vec![RuleChild::Group(input)])],
        )])
    }
}
