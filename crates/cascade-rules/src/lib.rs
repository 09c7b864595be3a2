//! # Built-in Optimization Rules
//!
//! This crate provides the default set of optimization rules for the Cascades search
//! engine. Rules are divided into three categories:
//!
//! ## Rewrite Rules (top-down, before exploration)
//!
//! These rules replace a group's only logical expression with a simpler one:
//!
//! - **`PushFilterBelowProject`** / **`PushFilterBelowAggregate`**: move a filter
//!   under a projection, or its group-by key conjuncts under an aggregate.
//! - **`MergeFilterIntoScan`** / **`MergeProjectWithScan`**: fold the operator above
//!   a scan into the scan, so the reader filters and projects while decoding.
//! - **`PruneScanColumns`**, **`PruneProjectColumns`**, **`PruneAggregateColumns`**:
//!   drop columns and aggregate calls no consumer reads. `count` of a non-null
//!   constant becomes `count(*)`.
//! - **`ReuseCommonSubexpressions`**: evaluate repeated calls in a projection once.
//!
//! ## Transformation Rules (Logical -> Logical)
//!
//! These rules expand the search space by generating equivalent logical alternatives:
//!
//! - **`JoinCommutativity`**: A JOIN B -> B JOIN A, flipping outer join sides.
//! - **`JoinAssociativity`**: (A JOIN B) JOIN C -> A JOIN (B JOIN C) for inner joins,
//!   limited to queries with at most `max_reorder_joins` joins.
//! - **`PushFilterIntoJoin`**: merges filter predicates into inner join conditions.
//! - **`SplitAggregate`**: splits an aggregate into local and global stages, or a
//!   DISTINCT aggregate into two deduplicating stages and a final aggregate.
//!
//! ## Implementation Rules (Logical -> Physical)
//!
//! These rules produce physical operator alternatives that the cost model scores:
//!
//! - **`ImplScan`**, **`ImplFilter`**, **`ImplProject`**, **`ImplSort`**, **`ImplLimit`**:
//!   one to one mappings.
//! - **`ImplHashJoin`**: hash join on the equi-join conjuncts.
//! - **`ImplNestedLoopJoin`**: the fallback when there is no equi-join conjunct.
//! - **`ImplHashAggregate`**: hash aggregation, for either stage.

pub mod column_pruning;
pub mod common_subexpression;
pub mod impl_agg;
pub mod impl_join;
pub mod impl_project;
pub mod impl_scan;
pub mod impl_sort;
pub mod join_associativity;
pub mod join_commutativity;
pub mod predicate_pushdown;
pub mod scan_merge;
pub mod split_aggregate;

#[cfg(test)]
mod test_util;

use cascade_core::rule::RuleRegistry;

/// Create a default rule registry with all built-in rules.
///
/// Rules of one type fire in registration order. Individual rules can be switched
/// off per query through `OptimizerConfig::disabled_rules`.
pub fn default_rule_registry() -> RuleRegistry {
    let mut registry = RuleRegistry::new();

    // Rewrite rules: pushdowns, then merges so pruning sees the merged scan.
    registry.add_rule(Box::new(predicate_pushdown::PushFilterBelowProject));
    registry.add_rule(Box::new(predicate_pushdown::PushFilterBelowAggregate));
    registry.add_rule(Box::new(scan_merge::MergeFilterIntoScan));
    registry.add_rule(Box::new(scan_merge::MergeProjectWithScan));
    registry.add_rule(Box::new(column_pruning::PruneScanColumns));
    registry.add_rule(Box::new(column_pruning::PruneProjectColumns));
    registry.add_rule(Box::new(column_pruning::PruneAggregateColumns));
    registry.add_rule(Box::new(common_subexpression::ReuseCommonSubexpressions));

    // Transformation rules: expand the logical search space.
    registry.add_rule(Box::new(join_commutativity::JoinCommutativity));
    registry.add_rule(Box::new(join_associativity::JoinAssociativity));
    registry.add_rule(Box::new(predicate_pushdown::PushFilterIntoJoin));
    registry.add_rule(Box::new(split_aggregate::SplitAggregate));

    // Implementation rules: map logical operators to physical alternatives.
    registry.add_rule(Box::new(impl_scan::ImplScan));
    registry.add_rule(Box::new(impl_project::ImplFilter));
    registry.add_rule(Box::new(impl_project::ImplProject));
    registry.add_rule(Box::new(impl_join::ImplHashJoin));
    registry.add_rule(Box::new(impl_join::ImplNestedLoopJoin));
    registry.add_rule(Box::new(impl_agg::ImplHashAggregate));
    registry.add_rule(Box::new(impl_sort::ImplSort));
    registry.add_rule(Box::new(impl_sort::ImplLimit));

    registry
}
