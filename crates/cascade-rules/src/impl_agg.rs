//! # Aggregate Implementation Rule
//!
//! ## Hash Aggregate (`ImplHashAggregate`)
//!
//! Uses a hash table keyed by the group-by columns. Each input row is hashed and
//! routed to the corresponding bucket, where the aggregate accumulators are updated.
//! Works with any input ordering.
//!
//! **Cost trade-off**: O(n) CPU + O(groups) memory.
//!
//! The rule implements both stages produced by `SplitAggregate`. A global stage
//! needs all rows of a group on one node and asks for its input hashed on the
//! group-by columns (or gathered, without group-by); a local stage runs wherever
//! its input already is.

use cascade_core::error::Result;
use cascade_core::expr::{LogicalOperator, Operator, PhysicalOperator};
use cascade_core::memo::{GroupExpression, Memo};
use cascade_core::pattern::Pattern;
use cascade_core::rule::{OptContext, Rule, RuleResult, RuleType};

/// Implement logical aggregate as a hash aggregate.
pub struct ImplHashAggregate;

impl Rule for ImplHashAggregate {
    fn name(&self) -> &str {
        "ImplHashAggregate"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Implementation
    }

    fn pattern(&self) -> Pattern {
        Pattern::aggregate()
    }

    fn apply(&self, expr: &GroupExpression, _memo: &Memo, _ctx: &OptContext) -> Result<Vec<RuleResult>> {
        let Operator::Logical(LogicalOperator::Aggregate {
            stage,
            group_by,
            aggregations,
            ..
        }) = &expr.op
        else {
            return Ok(vec![]);
        };

        Ok(vec![RuleResult::Substitution(
            Operator::Physical(PhysicalOperator::HashAggregate {
                stage: *stage,
                group_by: group_by.clone(),
                aggregations: aggregations.clone(),
            }),
            expr.children.clone(),
        )])
    }
}
