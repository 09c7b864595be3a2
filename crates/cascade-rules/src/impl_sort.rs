//! Sort and Limit implementation rules.
//!
//! Both operators see their whole input on one node: a physical sort produces a
//! single ordered stream, and a limit over a sorted input keeps that order.

use cascade_core::error::Result;
use cascade_core::expr::{LogicalOperator, Operator, PhysicalOperator};
use cascade_core::memo::{GroupExpression, Memo};
use cascade_core::pattern::Pattern;
use cascade_core::rule::{OptContext, Rule, RuleResult, RuleType};

pub struct ImplSort;

impl Rule for ImplSort {
    fn name(&self) -> &str {
        "ImplSort"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Implementation
    }

    fn pattern(&self) -> Pattern {
        Pattern::sort()
    }

    fn apply(&self, expr: &GroupExpression, _memo: &Memo, _ctx: &OptContext) -> Result<Vec<RuleResult>> {
        let Operator::Logical(LogicalOperator::Sort { order }) = &expr.op else {
            return Ok(vec![]);
        };
        Ok(vec![RuleResult::Substitution(
            Operator::Physical(PhysicalOperator::Sort { order: order.clone() }),
            expr.children.clone(),
        )])
    }
}

pub struct ImplLimit;

impl Rule for ImplLimit {
    fn name(&self) -> &str {
        "ImplLimit"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Implementation
    }

    fn pattern(&self) -> Pattern {
        Pattern::limit()
    }

    fn apply(&self, expr: &GroupExpression, _memo: &Memo, _ctx: &OptContext) -> Result<Vec<RuleResult>> {
        let Operator::Logical(LogicalOperator::Limit { limit, offset }) = &expr.op else {
            return Ok(vec![]);
        };
        Ok(vec![RuleResult::Substitution(
            Operator::Physical(PhysicalOperator::Limit {
                limit: *limit,
                offset: *offset,
            }),
            expr.children.clone(),
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::Fixture;
    use cascade_core::expr::SortKey;

    #[test]
    fn test_sort_and_limit() {
        let mut fx = Fixture::new();
        let (scan, columns) = fx.table("t", 100.0, &["a"]);
        let sort = fx.add(
            LogicalOperator::Sort {
                order: vec![SortKey::asc(&columns[0])],
            },
            vec![scan],
        );
        let limit = fx.add(LogicalOperator::Limit { limit: 10, offset: 5 }, vec![sort]);

        let results = fx.apply(&ImplSort, sort, None, 0);
        assert!(matches!(
            &results[..],
            [RuleResult::Substitution(Operator::Physical(PhysicalOperator::Sort { order }), _)] if order.len() == 1
        ));
        let results = fx.apply(&ImplLimit, limit, None, 0);
        assert!(matches!(
            &results[..],
            [RuleResult::Substitution(Operator::Physical(PhysicalOperator::Limit { limit: 10, offset: 5 }), children)]
                if children == &vec![sort]
        ));
    }
}
