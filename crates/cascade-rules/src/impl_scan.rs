//! # Scan Implementation Rule
//!
//! Maps a logical Scan to a physical Scan. Whatever the rewrite phase pushed into
//! the scan (a predicate, a projection with shared sub-expressions, a pruned column
//! list) is carried over unchanged, so the reader evaluates it while decoding rows.
//!
//! The scan's delivered distribution comes from the catalog: a table bucketed on
//! columns the scan reads is hash distributed, anything else is random.

use cascade_core::error::Result;
use cascade_core::expr::{LogicalOperator, Operator, PhysicalOperator};
use cascade_core::memo::{GroupExpression, Memo};
use cascade_core::pattern::Pattern;
use cascade_core::rule::{OptContext, Rule, RuleResult, RuleType};

/// Implement a logical scan as a full table scan.
pub struct ImplScan;

impl Rule for ImplScan {
    fn name(&self) -> &str {
        "ImplScan"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Implementation
    }

    fn pattern(&self) -> Pattern {
        Pattern::scan()
    }

    fn apply(&self, expr: &GroupExpression, _memo: &Memo, _ctx: &OptContext) -> Result<Vec<RuleResult>> {
        let Operator::Logical(LogicalOperator::Scan {
            table,
            columns,
            predicate,
            projection,
        }) = &expr.op
        else {
            return Ok(vec![]);
        };

        Ok(vec![RuleResult::Substitution(
            Operator::Physical(PhysicalOperator::Scan {
                table: table.clone(),
                columns: columns.clone(),
                predicate: predicate.clone(),
                projection: projection.clone(),
            }),
            vec![],
        )])
    }
}
