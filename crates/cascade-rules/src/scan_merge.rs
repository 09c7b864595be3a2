//! # Scan Merge Rules
//!
//! Rewrite rules that fold the operator directly above a scan into the scan
//! itself, so the reader evaluates it while decoding rows:
//!
//! ```text
//! Filter(p, Scan(t, q))          ->  Scan(t, q AND p)
//! Project(proj, Scan(t, q))      ->  Scan(t, q, proj)
//! ```
//!
//! A scan that already carries a projection is left alone: the operator above it
//! reads the projection's outputs, which the scan predicate cannot see.
//!
//! Both rules replace the parent's expression with a leaf; the scan's old group
//! loses its only consumer and is skipped by the rest of the rewrite.

use cascade_core::error::Result;
use cascade_core::expr::{LogicalOperator, Operator};
use cascade_core::memo::{GroupExpression, GroupId, Memo};
use cascade_core::pattern::Pattern;
use cascade_core::rule::{OptContext, Rule, RuleResult, RuleType};
use cascade_core::scalar::ScalarOperator;

/// The projection-free scan of the only child of `expr`.
fn child_scan<'m>(expr: &GroupExpression, memo: &'m Memo) -> Result<Option<&'m LogicalOperator>> {
    let &[child] = &expr.children[..] else {
        return Ok(None);
    };
    find_scan(memo, child)
}

fn find_scan(memo: &Memo, group: GroupId) -> Result<Option<&LogicalOperator>> {
    for &eid in &memo.group(group)?.logical_exprs {
        if let Operator::Logical(scan @ LogicalOperator::Scan { projection: None, .. }) = &memo.expr(eid)?.op {
            return Ok(Some(scan));
        }
    }
    Ok(None)
}

/// Merge a filter into the scan below it.
pub struct MergeFilterIntoScan;

impl Rule for MergeFilterIntoScan {
    fn name(&self) -> &str {
        "MergeFilterIntoScan"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Rewrite
    }

    fn pattern(&self) -> Pattern {
        Pattern::filter_scan()
    }

    fn apply(&self, expr: &GroupExpression, memo: &Memo, _ctx: &OptContext) -> Result<Vec<RuleResult>> {
        let Operator::Logical(LogicalOperator::Filter { predicate }) = &expr.op else {
            return Ok(vec![]);
        };
        let Some(scan @ LogicalOperator::Scan { predicate: existing, .. }) = child_scan(expr, memo)? else {
            return Ok(vec![]);
        };

        let mut conjuncts = existing.as_ref().map(|p| p.conjuncts()).unwrap_or_default();
        conjuncts.extend(predicate.conjuncts());
        let Some(merged) = scan.with_predicate(ScalarOperator::and_all(conjuncts)) else {
            return Ok(vec![]);
        };
        Ok(vec![RuleResult::Substitution(Operator::Logical(merged), vec![])])
    }
}

/// Merge a projection into the scan below it.
pub struct MergeProjectWithScan;

impl Rule for MergeProjectWithScan {
    fn name(&self) -> &str {
        "MergeProjectWithScan"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Rewrite
    }

    fn pattern(&self) -> Pattern {
        Pattern::project_scan()
    }

    fn apply(&self, expr: &GroupExpression, memo: &Memo, _ctx: &OptContext) -> Result<Vec<RuleResult>> {
        let Operator::Logical(LogicalOperator::Project { projection }) = &expr.op else {
            return Ok(vec![]);
        };
        let Some(scan) = child_scan(expr, memo)? else {
            return Ok(vec![]);
        };
        let Some(merged) = scan.with_projection(Some(projection.clone())) else {
            return Ok(vec![]);
        };
        Ok(vec![RuleResult::Substitution(Operator::Logical(merged), vec![])])
    }
}
