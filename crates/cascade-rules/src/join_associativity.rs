//! # Join Associativity Rule
//!
//! This rule implements the algebraic identity for inner joins:
//! `(A JOIN_1 B) JOIN_2 C = A JOIN_1 (B JOIN_2 C)`
//!
//! ## Why Associativity Matters
//!
//! Associativity changes the *shape* of the join tree (left-deep vs right-deep vs bushy).
//! Combined with commutativity, it enables exploring the full space of join orderings.
//!
//! For example, consider a 3-table join `(A ⋈ B) ⋈ C`:
//! - Without associativity: only commutativity swaps are explored (A⋈B)⋈C vs C⋈(A⋈B).
//! - With associativity: the optimizer also considers A⋈(B⋈C), which may be much cheaper
//!   if B and C are small and A is large.
//!
//! ## Implementation
//!
//! The rule uses [`RuleResult::NewChildren`] with [`RuleChild::NewExpr`] to create
//! new intermediate groups. Transforming `(A ⋈₁ B) ⋈₂ C → A ⋈₁ (B ⋈₂ C)` requires a
//! new memo group for `B ⋈₂ C`; if an identical join already exists the search
//! engine reuses its group.
//!
//! ## Condition Handling
//!
//! For inner joins, conjuncts can be freely redistributed as long as each one sits
//! on a join where all of its columns are available. The conjuncts of both joins
//! are pooled and split into:
//!
//! 1. **B-C conjuncts**: every column comes from B or C. These move to the new
//!    inner join.
//! 2. **Remaining conjuncts**: they reference A and stay on the new outer join.
//!
//! The transformation only fires if there is at least one B-C conjunct (otherwise
//! the new inner join would be a cross join, which is rarely useful).
//!
//! ## Both Orientations
//!
//! The rule tries both orientations of the inner join expression:
//! - `(A ⋈₁ B) ⋈₂ C → A ⋈ (B ⋈ C)`
//! - `(A ⋈₁ B) ⋈₂ C → B ⋈ (A ⋈ C)`
//!
//! ## Budget
//!
//! Reordering is exponential in the number of joins. The rule only fires for
//! queries with at most `max_reorder_joins` joins; larger queries keep the join
//! order they were written with (commutativity still applies).

use cascade_core::column::ColumnRefSet;
use cascade_core::error::Result;
use cascade_core::expr::{JoinType, LogicalOperator, Operator};
use cascade_core::memo::{GroupExpression, GroupId, Memo};
use cascade_core::pattern::Pattern;
use cascade_core::rule::{OptContext, Rule, RuleChild, RuleResult, RuleType};
use cascade_core::scalar::ScalarOperator;
use tracing::trace;

/// Join associativity: `(A ⋈₁ B) ⋈₂ C → A ⋈ (B ⋈ C)`.
pub struct JoinAssociativity;

impl Rule for JoinAssociativity {
    fn name(&self) -> &str {
        "JoinAssociativity"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::join_join_left()
    }

    fn check(&self, expr: &GroupExpression, _memo: &Memo, ctx: &OptContext) -> bool {
        if ctx.join_count > ctx.config.max_reorder_joins {
            trace!(
                "Skipping join reordering: {} joins exceed max_reorder_joins={}",
                ctx.join_count,
                ctx.config.max_reorder_joins
            );
            return false;
        }
        matches!(
            expr.op,
            Operator::Logical(LogicalOperator::Join {
                join_type: JoinType::Inner,
                ..
            })
        )
    }

    fn apply(&self, expr: &GroupExpression, memo: &Memo, _ctx: &OptContext) -> Result<Vec<RuleResult>> {
        let (
            Operator::Logical(LogicalOperator::Join {
                join_type: JoinType::Inner,
                predicate: outer_predicate,
            }),
            &[inner_group, c_group],
        ) = (&expr.op, &expr.children[..])
        else {
            return Ok(vec![]);
        };
        let c_columns = &memo.group(c_group)?.logical_property.output_columns;

        let mut results = Vec::new();
        for &eid in &memo.group(inner_group)?.logical_exprs {
            let inner = memo.expr(eid)?;
            let (
                Operator::Logical(LogicalOperator::Join {
                    join_type: JoinType::Inner,
                    predicate: inner_predicate,
                }),
                &[a_group, b_group],
            ) = (&inner.op, &inner.children[..])
            else {
                continue;
            };

            let mut conjuncts = Vec::new();
            for predicate in [outer_predicate, inner_predicate].into_iter().flatten() {
                conjuncts.extend(predicate.conjuncts());
            }

            // A ⋈ (B ⋈ C), then B ⋈ (A ⋈ C).
            for (kept, moved) in [(a_group, b_group), (b_group, a_group)] {
                let moved_columns = &memo.group(moved)?.logical_property.output_columns;
                if let Some(result) = reassociate(&conjuncts, kept, moved, c_group, &moved_columns.union(c_columns)) {
                    results.push(result);
                }
            }
        }
        Ok(results)
    }
}

/// Build `kept ⋈ (moved ⋈ c)` when some conjunct connects `moved` and `c`.
fn reassociate(
    conjuncts: &[ScalarOperator],
    kept: GroupId,
    moved: GroupId,
    c: GroupId,
    new_inner_columns: &ColumnRefSet,
) -> Option<RuleResult> {
    let (inner, outer): (Vec<ScalarOperator>, Vec<ScalarOperator>) = conjuncts
        .iter()
        .cloned()
        .partition(|conjunct| {
            let used = conjunct.used_columns();
            !used.is_empty() && new_inner_columns.contains_all(&used)
        });
    if inner.is_empty() {
        return None;
    }

    let new_inner = Operator::Logical(LogicalOperator::Join {
        join_type: JoinType::Inner,
        predicate: ScalarOperator::and_all(inner),
    });
    let new_outer = Operator::Logical(LogicalOperator::Join {
        join_type: JoinType::Inner,
        predicate: ScalarOperator::and_all(outer),
    });
    Some(RuleResult::NewChildren(
        new_outer,
        vec![
            RuleChild::Group(kept),
            RuleChild::NewExpr(new_inner, vec![RuleChild::Group(moved), RuleChild::Group(c)]),
        ],
    ))
}
