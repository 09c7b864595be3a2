//! # Join Commutativity Rule
//!
//! This rule implements the algebraic identity: `A JOIN B = B JOIN A`.
//!
//! ## Why Commutativity Matters
//!
//! A hash join always builds on its right input, so the orientation decides which
//! table is held in memory and, in a distributed plan, which one may be broadcast.
//! Commutativity lets the cost model try both. Combined with associativity it
//! also opens up different join orders for multi-table queries.
//!
//! ## Applicability
//!
//! Inner and cross joins swap as they are. A left outer join becomes a right outer
//! join with the inputs swapped and vice versa. Full outer, semi and anti joins are
//! left alone: semi and anti joins only output their left side, and the full outer
//! join gains nothing from swapping since neither orientation can broadcast.
//!
//! The predicate is kept as is; equality is symmetric and equi-join keys are
//! re-oriented against the inputs when the join is implemented.

use cascade_core::error::Result;
use cascade_core::expr::{JoinType, LogicalOperator, Operator};
use cascade_core::memo::{GroupExpression, Memo};
use cascade_core::pattern::Pattern;
use cascade_core::rule::{OptContext, Rule, RuleResult, RuleType};

/// Join commutativity: A JOIN B -> B JOIN A.
pub struct JoinCommutativity;

/// The join type of `left JOIN right` rewritten as `right JOIN left`.
fn swapped(join_type: JoinType) -> Option<JoinType> {
    match join_type {
        JoinType::Inner | JoinType::Cross => Some(join_type),
        JoinType::LeftOuter => Some(JoinType::RightOuter),
        JoinType::RightOuter => Some(JoinType::LeftOuter),
        JoinType::FullOuter | JoinType::LeftSemi | JoinType::LeftAnti => None,
    }
}

impl Rule for JoinCommutativity {
    fn name(&self) -> &str {
        "JoinCommutativity"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::join()
    }

    fn apply(&self, expr: &GroupExpression, _memo: &Memo, _ctx: &OptContext) -> Result<Vec<RuleResult>> {
        let Operator::Logical(LogicalOperator::Join {
            join_type,
            predicate,
        }) = &expr.op
        else {
            return Ok(vec![]);
        };
        let (Some(join_type), [left, right]) = (swapped(*join_type), &expr.children[..]) else {
            return Ok(vec![]);
        };

        Ok(vec![RuleResult::Substitution(
            Operator::Logical(LogicalOperator::Join {
                join_type,
                predicate: predicate.clone(),
            }),
            vec![*right, *left],
        )])
    }
}
