//! # Predicate Pushdown Rules
//!
//! Predicate pushdown reduces the amount of data flowing through the plan as early
//! as possible.
//!
//! ## Filter Into Join
//!
//! When a Filter sits on top of an inner or cross Join, `PushFilterIntoJoin` merges the filter
//! predicate into the join condition. The join evaluates the predicate while it
//! matches rows instead of in a separate pass afterward.
//!
//! ```text
//! Before: Filter(pred, Join(A, B, cond))
//! After:  Join(A, B, cond AND pred)
//! ```
//!
//! A cross join under a filter becomes an inner join. If the filter compares
//! columns of both inputs, the merged condition now has equi-join keys and the
//! join can be implemented as a hash join.
//!
//! ## Memo-Based Approach
//!
//! The new join is added to the Filter's group as an equivalent expression. The
//! original Filter-over-Join plan stays in the memo and the cost model picks the
//! cheaper of the two.
//!
//! Outer joins are left alone: a filter on the null-supplying side of an outer
//! join must run after the join.
//!
//! ## Filter Below Project and Aggregate
//!
//! Two rewrite rules move a filter under the operator below it, where it can go
//! on to merge into a scan or a join:
//!
//! ```text
//! Filter(p, Project(proj, X))         ->  Project(proj, Filter(p[proj], X))
//! Filter(k AND h, Aggregate(keys, X)) ->  Filter(h, Aggregate(keys, Filter(k, X)))
//! ```
//!
//! Below a projection the predicate is rewritten over the projection's input. Below
//! an aggregate only conjuncts that read nothing but group-by keys may move; they
//! drop whole groups, which is the same before and after grouping.

use cascade_core::column::ColumnRefSet;
use cascade_core::error::Result;
use cascade_core::expr::{JoinType, LogicalOperator, Operator};
use cascade_core::memo::{GroupExpression, Memo};
use cascade_core::pattern::Pattern;
use cascade_core::rule::{OptContext, Rule, RuleChild, RuleResult, RuleType};
use cascade_core::scalar::ScalarOperator;

/// The first logical expression of the only child of `expr`.
fn child_expr<'m>(expr: &GroupExpression, memo: &'m Memo) -> Result<Option<&'m GroupExpression>> {
    let &[child] = &expr.children[..] else {
        return Ok(None);
    };
    match memo.group(child)?.logical_exprs.first() {
        Some(&eid) => Ok(Some(memo.expr(eid)?)),
        None => Ok(None),
    }
}

/// Push filter predicates into inner join conditions.
pub struct PushFilterIntoJoin;

impl Rule for PushFilterIntoJoin {
    fn name(&self) -> &str {
        "PushFilterIntoJoin"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::filter_join()
    }

    fn apply(&self, expr: &GroupExpression, memo: &Memo, _ctx: &OptContext) -> Result<Vec<RuleResult>> {
        let (Operator::Logical(LogicalOperator::Filter { predicate }), &[join_group]) = (&expr.op, &expr.children[..])
        else {
            return Ok(vec![]);
        };

        let mut results = Vec::new();
        for &eid in &memo.group(join_group)?.logical_exprs {
            let join = memo.expr(eid)?;
            let Operator::Logical(LogicalOperator::Join {
                join_type: JoinType::Inner | JoinType::Cross,
                predicate: join_predicate,
            }) = &join.op
            else {
                continue;
            };

            let mut conjuncts = join_predicate.as_ref().map(|p| p.conjuncts()).unwrap_or_default();
            conjuncts.extend(predicate.conjuncts());
            results.push(RuleResult::Substitution(
                Operator::Logical(LogicalOperator::Join {
                    join_type: JoinType::Inner,
                    predicate: ScalarOperator::and_all(conjuncts),
                }),
                join.children.clone(),
            ));
        }
        Ok(results)
    }
}

/// Move a filter below the projection it reads.
pub struct PushFilterBelowProject;

impl Rule for PushFilterBelowProject {
    fn name(&self) -> &str {
        "PushFilterBelowProject"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Rewrite
    }

    fn pattern(&self) -> Pattern {
        Pattern::filter_project()
    }

    fn apply(&self, expr: &GroupExpression, memo: &Memo, _ctx: &OptContext) -> Result<Vec<RuleResult>> {
        let Operator::Logical(LogicalOperator::Filter { predicate }) = &expr.op else {
            return Ok(vec![]);
        };
        let Some(project) = child_expr(expr, memo)? else {
            return Ok(vec![]);
        };
        let (Operator::Logical(LogicalOperator::Project { projection }), &[input]) =
            (&project.op, &project.children[..])
        else {
            return Ok(vec![]);
        };

        let filter = LogicalOperator::Filter {
            predicate: predicate.substitute(&projection.substitution()),
        };
        Ok(vec![RuleResult::NewChildren(
            project.op.clone(),
            vec![RuleChild::NewExpr(Operator::Logical(filter), vec![RuleChild::Group(input)])],
        )])
    }
}

/// Move conjuncts over group-by keys below an aggregate.
pub struct PushFilterBelowAggregate;

impl Rule for PushFilterBelowAggregate {
    fn name(&self) -> &str {
        "PushFilterBelowAggregate"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Rewrite
    }

    fn pattern(&self) -> Pattern {
        Pattern::filter_aggregate()
    }

    fn apply(&self, expr: &GroupExpression, memo: &Memo, _ctx: &OptContext) -> Result<Vec<RuleResult>> {
        let Operator::Logical(LogicalOperator::Filter { predicate }) = &expr.op else {
            return Ok(vec![]);
        };
        let Some(aggregate) = child_expr(expr, memo)? else {
            return Ok(vec![]);
        };
        let (Operator::Logical(LogicalOperator::Aggregate { group_by, .. }), &[input]) =
            (&aggregate.op, &aggregate.children[..])
        else {
            return Ok(vec![]);
        };

        let keys = ColumnRefSet::from_refs(group_by);
        let (pushed, kept): (Vec<_>, Vec<_>) = predicate.conjuncts().into_iter().partition(|conjunct| {
            let used = conjunct.used_columns();
            !used.is_empty() && keys.contains_all(&used)
        });
        let Some(pushed) = ScalarOperator::and_all(pushed) else {
            return Ok(vec![]);
        };

        let below = RuleChild::NewExpr(
            Operator::Logical(LogicalOperator::Filter { predicate: pushed }),
            vec![RuleChild::Group(input)],
        );
        let result = match ScalarOperator::and_all(kept) {
            None => RuleResult::NewChildren(aggregate.op.clone(), vec![below]),
            Some(rest) => RuleResult::NewChildren(
                Operator::Logical(LogicalOperator::Filter { predicate: rest }),
                vec![RuleChild::NewExpr(aggregate.op.clone(), vec![below])],
            ),
        };
        Ok(vec![result])
    }
}
