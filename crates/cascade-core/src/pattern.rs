//! # Declarative Pattern Matching for Optimization Rules
//!
//! Each optimization rule declares a `Pattern` that describes the shape of expressions
//! it can transform. Before applying a rule, the search engine checks the pattern to
//! avoid calling `apply()` on non-matching expressions.
//!
//! ## Pattern Language
//!
//! - `Pattern::Operator(matcher, children)`: matches an expression whose operator
//!   satisfies `matcher` and whose children match the given child patterns.
//! - `Pattern::Any`: matches any expression or group. Used as a wildcard for children
//!   that the rule doesn't inspect.
//! - `Pattern::Leaf`: matches only leaf expressions (those with no children, like Scan).
//!
//! ## Group-Level Matching
//!
//! When a child pattern is not `Any`, the matcher checks the logical expressions of
//! the child group. A child pattern matches if *any* of them satisfies it; all
//! expressions in a group are logically equivalent, so the rule may pick whichever
//! one fits.

use crate::error::Result;
use crate::expr::{LogicalOpKind, Operator, PhysicalOpKind};
use crate::memo::{ExprId, Memo};

/// Pattern for matching expressions in the memo.
#[derive(Debug, Clone)]
pub enum Pattern {
    /// Match an operator with child patterns.
    Operator(OpMatcher, Vec<Pattern>),
    /// Match any subtree (group).
    Any,
    /// Match a leaf node (no children).
    Leaf,
}

/// Matcher for operator types (without data).
#[derive(Debug, Clone)]
pub enum OpMatcher {
    LogicalOp(LogicalOpKind),
    PhysicalOp(PhysicalOpKind),
    AnyLogical,
}

impl Pattern {
    fn logical(kind: LogicalOpKind, children: Vec<Pattern>) -> Self {
        Pattern::Operator(OpMatcher::LogicalOp(kind), children)
    }

    /// Create a pattern that matches a logical join with two any-children.
    pub fn join() -> Self {
        Self::logical(LogicalOpKind::Join, vec![Pattern::Any, Pattern::Any])
    }

    /// Create a pattern that matches a logical join where the left child is also a join.
    pub fn join_join_left() -> Self {
        Self::logical(LogicalOpKind::Join, vec![Self::join(), Pattern::Any])
    }

    /// Match a logical scan.
    pub fn scan() -> Self {
        Self::logical(LogicalOpKind::Scan, vec![])
    }

    /// Match a logical filter with one child.
    pub fn filter() -> Self {
        Self::logical(LogicalOpKind::Filter, vec![Pattern::Any])
    }

    /// Match a filter directly above a scan.
    pub fn filter_scan() -> Self {
        Self::logical(LogicalOpKind::Filter, vec![Self::scan()])
    }

    /// Match a filter on top of a join.
    pub fn filter_join() -> Self {
        Self::logical(LogicalOpKind::Filter, vec![Self::join()])
    }

    /// Match a filter directly above a project.
    pub fn filter_project() -> Self {
        Self::logical(LogicalOpKind::Filter, vec![Self::project()])
    }

    /// Match a filter directly above an aggregate.
    pub fn filter_aggregate() -> Self {
        Self::logical(LogicalOpKind::Filter, vec![Self::aggregate()])
    }

    /// Match a project with one child.
    pub fn project() -> Self {
        Self::logical(LogicalOpKind::Project, vec![Pattern::Any])
    }

    /// Match a project directly above a scan.
    pub fn project_scan() -> Self {
        Self::logical(LogicalOpKind::Project, vec![Self::scan()])
    }

    /// Match a logical aggregate.
    pub fn aggregate() -> Self {
        Self::logical(LogicalOpKind::Aggregate, vec![Pattern::Any])
    }

    /// Match a logical sort.
    pub fn sort() -> Self {
        Self::logical(LogicalOpKind::Sort, vec![Pattern::Any])
    }

    pub fn limit() -> Self {
        Self::logical(LogicalOpKind::Limit, vec![Pattern::Any])
    }

    /// Any logical expression regardless of arity.
    pub fn any_logical() -> Self {
        Pattern::Operator(OpMatcher::AnyLogical, vec![])
    }

    /// The same pattern with every child replaced by `Any`.
    pub fn root_only(&self) -> Pattern {
        match self {
            Pattern::Operator(matcher, children) => {
                Pattern::Operator(matcher.clone(), vec![Pattern::Any; children.len()])
            }
            other => other.clone(),
        }
    }

    /// Child patterns that look into a child group.
    pub fn inspected_children(&self) -> Vec<usize> {
        match self {
            Pattern::Operator(_, children) => children
                .iter()
                .enumerate()
                .filter(|(_, p)| !matches!(p, Pattern::Any))
                .map(|(i, _)| i)
                .collect(),
            _ => vec![],
        }
    }
}

/// Check if a memo expression matches a pattern.
pub fn matches(memo: &Memo, expr_id: ExprId, pattern: &Pattern) -> Result<bool> {
    let expr = memo.expr(expr_id)?;
    match pattern {
        Pattern::Any => Ok(true),
        Pattern::Leaf => Ok(expr.children.is_empty()),
        Pattern::Operator(OpMatcher::AnyLogical, _) => Ok(expr.op.is_logical()),
        Pattern::Operator(matcher, child_patterns) => {
            let op_matches = match (&expr.op, matcher) {
                (Operator::Logical(l), OpMatcher::LogicalOp(kind)) => l.kind() == *kind,
                (Operator::Physical(p), OpMatcher::PhysicalOp(kind)) => p.kind() == *kind,
                _ => false,
            };
            if !op_matches || expr.children.len() != child_patterns.len() {
                return Ok(false);
            }

            // For each child group, at least one logical expression must match.
            for (child_gid, child_pattern) in expr.children.iter().zip(child_patterns) {
                if matches!(child_pattern, Pattern::Any) {
                    continue;
                }
                let mut any_match = false;
                for &eid in &memo.group(*child_gid)?.logical_exprs {
                    if matches(memo, eid, child_pattern)? {
                        any_match = true;
                        break;
                    }
                }
                if !any_match {
                    return Ok(false);
                }
            }
            Ok(true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::ColumnRefFactory;
    use crate::expr::{JoinType, LogicalOperator, TableRef};
    use crate::memo::GroupId;
    use crate::properties::LogicalProperty;
    use crate::scalar::{DataType, ScalarOperator};

    fn insert(memo: &mut Memo, op: LogicalOperator, children: Vec<GroupId>) -> (GroupId, ExprId) {
        let inserted = memo
            .insert_expression(Operator::Logical(op), children, None, |_, _, _| Ok(LogicalProperty::default()))
            .unwrap();
        (inserted.group_id, inserted.expr_id)
    }

    #[test]
    fn test_nested_patterns() {
        let factory = ColumnRefFactory::new();
        let a = factory.create("a", DataType::Int, true);
        let mut memo = Memo::new();
        let (scan_g, scan_e) = insert(&mut memo, LogicalOperator::scan(TableRef::new("db", "t"), vec![a.clone()]), vec![]);
        let (filter_g, filter_e) = insert(
            &mut memo,
            LogicalOperator::Filter {
                predicate: ScalarOperator::boolean(true),
            },
            vec![scan_g],
        );
        let join = LogicalOperator::Join {
            join_type: JoinType::Cross,
            predicate: None,
        };
        let (_, join_e) = insert(&mut memo, join, vec![filter_g, scan_g]);

        assert!(matches(&memo, scan_e, &Pattern::scan()).unwrap());
        assert!(matches(&memo, scan_e, &Pattern::Leaf).unwrap());
        assert!(matches(&memo, filter_e, &Pattern::filter_scan()).unwrap());
        assert!(!matches(&memo, filter_e, &Pattern::filter_join()).unwrap());
        assert!(matches(&memo, join_e, &Pattern::join()).unwrap());
        assert!(!matches(&memo, join_e, &Pattern::join_join_left()).unwrap());
        assert!(matches(&memo, join_e, &Pattern::join_join_left().root_only()).unwrap());
        assert!(matches(&memo, join_e, &Pattern::any_logical()).unwrap());
        assert_eq!(Pattern::join_join_left().inspected_children(), vec![0]);
    }
}
