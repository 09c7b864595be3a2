//! # Join Implementation Rules
//!
//! This module provides two implementation rules that map a logical Join to
//! physical join operators. Each physical join has different cost characteristics
//! and applicability constraints:
//!
//! ## Hash Join (`ImplHashJoin`)
//!
//! The workhorse join algorithm for most queries. Builds a hash table on the right
//! input and looks up each row of the left input in it. Commutativity puts either
//! table on the build side, so one alternative per logical join is enough.
//!
//! The hash join is distributed either by broadcasting the build side to every
//! node or by shuffling both inputs on the join keys; the search costs both.
//!
//! **Requires**: at least one equi-join conjunct between the two inputs.
//! **Cost**: O(build_rows) memory + O(build_rows + left_rows) CPU.
//!
//! ## Nested Loop Join (`ImplNestedLoopJoin`)
//!
//! For each left row, scans all right rows. Used only when no equi-join conjunct
//! exists (cross joins, pure range conditions); O(n * m) makes it hopeless
//! whenever a hash join is possible.

use cascade_core::column::ColumnRef;
use cascade_core::error::Result;
use cascade_core::expr::{extract_equi_conjuncts, LogicalOperator, Operator, PhysicalOperator};
use cascade_core::memo::{GroupExpression, Memo};
use cascade_core::pattern::Pattern;
use cascade_core::rule::{OptContext, Rule, RuleResult, RuleType};

/// Equi-join key pairs of a logical join, oriented (left, right).
fn equi_keys(expr: &GroupExpression, memo: &Memo) -> Result<Vec<(ColumnRef, ColumnRef)>> {
    let (Operator::Logical(LogicalOperator::Join { predicate, .. }), [left, right]) = (&expr.op, &expr.children[..])
    else {
        return Ok(vec![]);
    };
    let left = &memo.group(*left)?.logical_property.output_columns;
    let right = &memo.group(*right)?.logical_property.output_columns;
    Ok(extract_equi_conjuncts(predicate.as_ref(), left, right))
}

/// Implement logical join as a hash join building on the right input.
pub struct ImplHashJoin;

impl Rule for ImplHashJoin {
    fn name(&self) -> &str {
        "ImplHashJoin"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Implementation
    }

    fn pattern(&self) -> Pattern {
        Pattern::join()
    }

    fn check(&self, expr: &GroupExpression, memo: &Memo, _ctx: &OptContext) -> bool {
        equi_keys(expr, memo).is_ok_and(|keys| !keys.is_empty())
    }

    fn apply(&self, expr: &GroupExpression, memo: &Memo, _ctx: &OptContext) -> Result<Vec<RuleResult>> {
        let Operator::Logical(LogicalOperator::Join {
            join_type,
            predicate,
        }) = &expr.op
        else {
            return Ok(vec![]);
        };
        let (left_keys, right_keys): (Vec<_>, Vec<_>) = equi_keys(expr, memo)?.into_iter().unzip();

        Ok(vec![RuleResult::Substitution(
            Operator::Physical(PhysicalOperator::HashJoin {
                join_type: *join_type,
                predicate: predicate.clone(),
                left_keys,
                right_keys,
            }),
            expr.children.clone(),
        )])
    }
}

/// Implement logical join as a nested loop join when there is nothing to hash on.
pub struct ImplNestedLoopJoin;

impl Rule for ImplNestedLoopJoin {
    fn name(&self) -> &str {
        "ImplNestedLoopJoin"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Implementation
    }

    fn pattern(&self) -> Pattern {
        Pattern::join()
    }

    fn check(&self, expr: &GroupExpression, memo: &Memo, _ctx: &OptContext) -> bool {
        equi_keys(expr, memo).is_ok_and(|keys| keys.is_empty())
    }

    fn apply(&self, expr: &GroupExpression, _memo: &Memo, _ctx: &OptContext) -> Result<Vec<RuleResult>> {
        let Operator::Logical(LogicalOperator::Join {
            join_type,
            predicate,
        }) = &expr.op
        else {
            return Ok(vec![]);
        };

        Ok(vec![RuleResult::Substitution(
            Operator::Physical(PhysicalOperator::NestedLoopJoin {
                join_type: *join_type,
                predicate: predicate.clone(),
            }),
            expr.children.clone(),
        )])
    }
}
