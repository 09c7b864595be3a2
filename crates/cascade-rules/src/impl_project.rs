//! Filter and Project implementation rules. Both map one to one onto their
//! physical counterparts over the same input group.

use cascade_core::error::Result;
use cascade_core::expr::{LogicalOperator, Operator, PhysicalOperator};
use cascade_core::memo::{GroupExpression, Memo};
use cascade_core::pattern::Pattern;
use cascade_core::rule::{OptContext, Rule, RuleResult, RuleType};

pub struct ImplFilter;

impl Rule for ImplFilter {
    fn name(&self) -> &str {
        "ImplFilter"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Implementation
    }

    fn pattern(&self) -> Pattern {
        Pattern::filter()
    }

    fn apply(&self, expr: &GroupExpression, _memo: &Memo, _ctx: &OptContext) -> Result<Vec<RuleResult>> {
        let Operator::Logical(LogicalOperator::Filter { predicate }) = &expr.op else {
            return Ok(vec![]);
        };
        Ok(vec![RuleResult::Substitution(
            Operator::Physical(PhysicalOperator::Filter {
                predicate: predicate.clone(),
            }),
            expr.children.clone(),
        )])
    }
}

pub struct ImplProject;

impl Rule for ImplProject {
    fn name(&self) -> &str {
        "ImplProject"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Implementation
    }

    fn pattern(&self) -> Pattern {
        Pattern::project()
    }

    fn apply(&self, expr: &GroupExpression, _memo: &Memo, _ctx: &OptContext) -> Result<Vec<RuleResult>> {
        let Operator::Logical(LogicalOperator::Project { projection }) = &expr.op else {
            return Ok(vec![]);
        };
        Ok(vec![RuleResult::Substitution(
            Operator::Physical(PhysicalOperator::Project {
                projection: projection.clone(),
            }),
            expr.children.clone(),
        )])
    }
}
