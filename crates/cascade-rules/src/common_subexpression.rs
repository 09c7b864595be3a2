//! # Common Sub-expression Reuse
//!
//! Extracts function calls that occur more than once in a projection into
//! `common_sub_operators`, so they are evaluated once per row:
//!
//! ```text
//! Before: x := f(g(a)) + 1, y := f(g(a)) * 2
//! After:  x := e2 + 1,      y := e2 * 2       with e1 := g(a), e2 := f(e1)
//! ```
//!
//! Works on Project operators and on scans that carry a projection. The rule
//! extracts one sub-expression per application, smallest first, and reports no
//! result once nothing repeats; the rewrite loop runs it to a fixpoint. The
//! smallest-first order makes the extracted entries build on each other.

use std::collections::{BTreeMap, HashMap};

use cascade_core::column::{ColumnRef, ColumnRefFactory};
use cascade_core::error::Result;
use cascade_core::expr::{LogicalOperator, Operator, Projection};
use cascade_core::memo::{GroupExpression, Memo};
use cascade_core::pattern::Pattern;
use cascade_core::rule::{OptContext, Rule, RuleResult, RuleType};
use cascade_core::scalar::ScalarOperator;
use tracing::trace;

pub struct ReuseCommonSubexpressions;

fn projection_of(op: &Operator) -> Option<&Projection> {
    match op {
        Operator::Logical(LogicalOperator::Project { projection })
        | Operator::Logical(LogicalOperator::Scan {
            projection: Some(projection),
            ..
        }) => Some(projection),
        _ => None,
    }
}

/// The smallest call evaluated at least twice by `projection`.
fn smallest_repeated_call(projection: &Projection) -> Option<ScalarOperator> {
    let mut counts: BTreeMap<&ScalarOperator, usize> = BTreeMap::new();
    for (_, expr) in projection.columns.iter().chain(&projection.common_sub_operators) {
        expr.walk(&mut |node| {
            if matches!(node, ScalarOperator::Call { .. }) {
                *counts.entry(node).or_default() += 1;
            }
        });
    }
    counts
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(expr, _)| expr)
        .min_by(|a, b| a.size().cmp(&b.size()).then_with(|| a.cmp(b)))
        .cloned()
}

/// `projection` with every occurrence of `repeated` read from a new common entry.
fn extract(projection: &Projection, repeated: ScalarOperator, factory: &ColumnRefFactory) -> Projection {
    let column = factory.create("expr", repeated.data_type(), true);
    let mapping = HashMap::from([(repeated.clone(), column.clone())]);

    let columns = replace_all(&projection.columns, &mapping);
    let mut common_sub_operators = replace_all(&projection.common_sub_operators, &mapping);
    // Entries are evaluated in order; the new one goes before its first reader.
    let position = common_sub_operators
        .iter()
        .position(|(_, expr)| expr.used_columns().contains(column.id))
        .unwrap_or(common_sub_operators.len());
    trace!("Extracted common sub-expression {} := {}", column, repeated);
    common_sub_operators.insert(position, (column, repeated));

    Projection {
        columns,
        common_sub_operators,
    }
}

fn replace_all(
    entries: &[(ColumnRef, ScalarOperator)],
    mapping: &HashMap<ScalarOperator, ColumnRef>,
) -> Vec<(ColumnRef, ScalarOperator)> {
    entries
        .iter()
        .map(|(column, expr)| (column.clone(), expr.replace(mapping)))
        .collect()
}

impl Rule for ReuseCommonSubexpressions {
    fn name(&self) -> &str {
        "ReuseCommonSubexpressions"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Rewrite
    }

    fn pattern(&self) -> Pattern {
        Pattern::any_logical()
    }

    fn check(&self, expr: &GroupExpression, _memo: &Memo, _ctx: &OptContext) -> bool {
        projection_of(&expr.op).is_some()
    }

    fn apply(&self, expr: &GroupExpression, _memo: &Memo, ctx: &OptContext) -> Result<Vec<RuleResult>> {
        let (Some(projection), Operator::Logical(op)) = (projection_of(&expr.op), &expr.op) else {
            return Ok(vec![]);
        };
        let Some(repeated) = smallest_repeated_call(projection) else {
            return Ok(vec![]);
        };

        let projection = extract(projection, repeated, ctx.column_factory);
        let Some(op) = op.with_projection(Some(projection)) else {
            return Ok(vec![]);
        };
        Ok(vec![RuleResult::Substitution(Operator::Logical(op), expr.children.clone())])
    }
}
