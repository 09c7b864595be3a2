//! # Property Requirements and Enforcers
//!
//! Three questions the search asks about each physical operator:
//!
//! 1. **What must my inputs deliver?** ([`child_requirements`]) An operator may
//!    offer several alternatives. A hash join can broadcast its build side or
//!    shuffle both sides on the join keys; each alternative is costed separately.
//! 2. **What do I deliver?** ([`delivered_properties`]) Given what the inputs
//!    actually delivered, the distribution and sort order of this operator's output.
//! 3. **How do I fix a mismatch?** ([`enforcers`]) When the delivered properties do
//!    not satisfy the consumer, an exchange and/or sort is placed on top.
//!
//! A sorted output only exists on a single node, so a requirement combining a sort
//! order with a hash or broadcast distribution cannot be enforced.

use crate::catalog::{Catalog, TableDistribution};
use crate::column::{ColumnId, ColumnRefSet};
use crate::config::OptimizerConfig;
use crate::cost::can_broadcast;
use crate::expr::{AggStage, PhysicalOperator};
use crate::properties::{DistributionSpec, LogicalProperty, PhysicalPropertySet};

/// Alternatives for the properties each input of `op` must deliver when `op`
/// itself is asked for `required`.
///
/// Alternatives are listed in preference order; ties between equally cheap
/// alternatives keep the first.
pub fn child_requirements(
    op: &PhysicalOperator,
    required: &PhysicalPropertySet,
    inputs: &[&LogicalProperty],
    config: &OptimizerConfig,
) -> Vec<Vec<PhysicalPropertySet>> {
    let any = PhysicalPropertySet::any;
    let with = PhysicalPropertySet::with_distribution;
    match op {
        PhysicalOperator::Scan { .. } => vec![vec![]],
        // Pass the requirement down when the input can see its columns, and also
        // try satisfying it above this operator.
        PhysicalOperator::Filter { .. } | PhysicalOperator::Project { .. } => {
            let passable = inputs
                .first()
                .is_some_and(|input| input.output_columns.contains_all(&required.columns()));
            if required.is_any() || !passable {
                vec![vec![any()]]
            } else {
                vec![vec![required.clone()], vec![any()]]
            }
        }
        PhysicalOperator::HashJoin {
            join_type,
            left_keys,
            right_keys,
            ..
        } => {
            let mut alternatives = Vec::new();
            if let [left, right] = inputs {
                if join_type.can_broadcast_right() && can_broadcast(right.row_count(), left.row_count(), config) {
                    alternatives.push(vec![any(), with(DistributionSpec::Broadcast)]);
                }
            }
            alternatives.push(vec![
                with(DistributionSpec::Hash(left_keys.iter().map(|c| c.id).collect())),
                with(DistributionSpec::Hash(right_keys.iter().map(|c| c.id).collect())),
            ]);
            alternatives
        }
        PhysicalOperator::NestedLoopJoin { join_type, .. } => {
            if join_type.can_broadcast_right() {
                vec![vec![any(), with(DistributionSpec::Broadcast)]]
            } else {
                vec![vec![PhysicalPropertySet::singleton(), PhysicalPropertySet::singleton()]]
            }
        }
        PhysicalOperator::HashAggregate {
            stage: AggStage::Global,
            group_by,
            ..
        } => {
            if group_by.is_empty() {
                vec![vec![PhysicalPropertySet::singleton()]]
            } else {
                vec![vec![with(DistributionSpec::Hash(group_by.iter().map(|c| c.id).collect()))]]
            }
        }
        PhysicalOperator::HashAggregate {
            stage: AggStage::Local,
            ..
        } => vec![vec![any()]],
        PhysicalOperator::Sort { .. } => vec![vec![PhysicalPropertySet::singleton()]],
        PhysicalOperator::Limit { .. } => vec![vec![PhysicalPropertySet {
            distribution: DistributionSpec::Singleton,
            sort_order: required.sort_order.clone(),
        }]],
        PhysicalOperator::Exchange { .. } => vec![vec![any()]],
    }
}

/// Properties `op` delivers given what its inputs delivered.
pub fn delivered_properties(
    op: &PhysicalOperator,
    inputs: &[&PhysicalPropertySet],
    output_columns: &ColumnRefSet,
    catalog: &dyn Catalog,
) -> PhysicalPropertySet {
    let first = || inputs.first().map(|p| (*p).clone()).unwrap_or_default();
    match op {
        PhysicalOperator::Scan { table, columns, .. } => match catalog.distribution_of(table) {
            TableDistribution::Hash(names) => {
                let ids: Option<Vec<ColumnId>> = names
                    .iter()
                    .map(|name| columns.iter().find(|c| &c.name == name).map(|c| c.id))
                    .collect();
                match ids {
                    Some(ids) if !ids.is_empty() && ids.iter().all(|id| output_columns.contains(*id)) => {
                        PhysicalPropertySet::with_distribution(DistributionSpec::Hash(ids))
                    }
                    _ => PhysicalPropertySet::any(),
                }
            }
            TableDistribution::Random => PhysicalPropertySet::any(),
        },
        PhysicalOperator::Filter { .. } | PhysicalOperator::Project { .. } | PhysicalOperator::Limit { .. } => first(),
        PhysicalOperator::HashJoin { .. } | PhysicalOperator::NestedLoopJoin { .. } => {
            PhysicalPropertySet::with_distribution(first().distribution)
        }
        PhysicalOperator::HashAggregate { stage, group_by, .. } => {
            if *stage == AggStage::Global && group_by.is_empty() {
                PhysicalPropertySet::singleton()
            } else {
                PhysicalPropertySet::with_distribution(first().distribution)
            }
        }
        PhysicalOperator::Sort { order } => PhysicalPropertySet {
            distribution: DistributionSpec::Singleton,
            sort_order: Some(order.clone()),
        },
        PhysicalOperator::Exchange { distribution } => PhysicalPropertySet::with_distribution(distribution.clone()),
    }
}

/// Enforcers turning `delivered` into something that satisfies `required`,
/// bottom-up, each with the properties it delivers.
///
/// `None` when the requirement cannot be enforced: a sort order combined with a
/// partitioned or replicated distribution, or a requirement on columns the group
/// does not produce.
pub fn enforcers(
    delivered: &PhysicalPropertySet,
    required: &PhysicalPropertySet,
    output_columns: &ColumnRefSet,
    equivalences: &[(ColumnId, ColumnId)],
) -> Option<Vec<(PhysicalOperator, PhysicalPropertySet)>> {
    if required.satisfied_by(delivered, equivalences) {
        return Some(vec![]);
    }
    if !output_columns.contains_all(&required.columns()) {
        return None;
    }

    let mut steps = Vec::new();
    match &required.sort_order {
        Some(order) => {
            if !matches!(required.distribution, DistributionSpec::Any | DistributionSpec::Singleton) {
                return None;
            }
            let mut current = delivered.clone();
            if current.distribution != DistributionSpec::Singleton {
                // Gathering to one node does not keep a partitioned sort order.
                current = PhysicalPropertySet::singleton();
                steps.push((
                    PhysicalOperator::Exchange {
                        distribution: DistributionSpec::Singleton,
                    },
                    current.clone(),
                ));
            }
            if !required.sort_satisfied_by(&current) {
                steps.push((
                    PhysicalOperator::Sort { order: order.clone() },
                    PhysicalPropertySet {
                        distribution: DistributionSpec::Singleton,
                        sort_order: Some(order.clone()),
                    },
                ));
            }
        }
        None => {
            steps.push((
                PhysicalOperator::Exchange {
                    distribution: required.distribution.clone(),
                },
                PhysicalPropertySet::with_distribution(required.distribution.clone()),
            ));
        }
    }
    Some(steps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InMemoryCatalog;
    use crate::column::ColumnRefFactory;
    use crate::expr::{JoinType, SortKey, TableRef};
    use crate::scalar::DataType;
    use crate::stats::Statistics;

    fn input(rows: f64) -> LogicalProperty {
        LogicalProperty {
            statistics: Statistics::new(rows),
            ..LogicalProperty::default()
        }
    }

    #[test]
    fn test_hash_join_offers_broadcast_only_for_small_right_side() {
        let factory = ColumnRefFactory::new();
        let a = factory.create("a", DataType::Int, true);
        let b = factory.create("b", DataType::Int, true);
        let join = PhysicalOperator::HashJoin {
            join_type: JoinType::Inner,
            predicate: None,
            left_keys: vec![a.clone()],
            right_keys: vec![b.clone()],
        };
        let config = OptimizerConfig::default();
        let (big, small) = (input(100_000_000.0), input(1000.0));

        let alternatives = child_requirements(&join, &PhysicalPropertySet::any(), &[&big, &small], &config);
        assert_eq!(alternatives.len(), 2);
        assert_eq!(alternatives[0][1].distribution, DistributionSpec::Broadcast);
        assert_eq!(alternatives[1][0].distribution, DistributionSpec::Hash(vec![a.id]));
        assert_eq!(alternatives[1][1].distribution, DistributionSpec::Hash(vec![b.id]));

        let alternatives = child_requirements(&join, &PhysicalPropertySet::any(), &[&small, &big], &config);
        assert_eq!(alternatives.len(), 1);

        let right_outer = PhysicalOperator::HashJoin {
            join_type: JoinType::RightOuter,
            predicate: None,
            left_keys: vec![a],
            right_keys: vec![b],
        };
        let alternatives = child_requirements(&right_outer, &PhysicalPropertySet::any(), &[&big, &small], &config);
        assert_eq!(alternatives.len(), 1);
    }

    #[test]
    fn test_enforcer_chains() {
        let factory = ColumnRefFactory::new();
        let a = factory.create("a", DataType::Int, true);
        let output = ColumnRefSet::from_refs([&a]);
        let any = PhysicalPropertySet::any();

        let hash = PhysicalPropertySet::with_distribution(DistributionSpec::Hash(vec![a.id]));
        let steps = enforcers(&any, &hash, &output, &[]).unwrap();
        assert_eq!(steps.len(), 1);
        assert!(matches!(steps[0].0, PhysicalOperator::Exchange { distribution: DistributionSpec::Hash(_) }));

        let sorted = PhysicalPropertySet {
            distribution: DistributionSpec::Any,
            sort_order: Some(vec![SortKey::asc(&a)]),
        };
        let steps = enforcers(&hash, &sorted, &output, &[]).unwrap();
        assert_eq!(steps.len(), 2);
        assert!(matches!(steps[1].0, PhysicalOperator::Sort { .. }));
        assert!(sorted.satisfied_by(&steps[1].1, &[]));

        assert!(enforcers(&hash, &hash, &output, &[]).unwrap().is_empty());
    }

    #[test]
    fn test_unenforceable_requirements() {
        let factory = ColumnRefFactory::new();
        let a = factory.create("a", DataType::Int, true);
        let b = factory.create("b", DataType::Int, true);
        let output = ColumnRefSet::from_refs([&a]);
        let hash_sorted = PhysicalPropertySet {
            distribution: DistributionSpec::Hash(vec![a.id]),
            sort_order: Some(vec![SortKey::asc(&a)]),
        };
        assert!(enforcers(&PhysicalPropertySet::any(), &hash_sorted, &output, &[]).is_none());

        let foreign = PhysicalPropertySet::with_distribution(DistributionSpec::Hash(vec![b.id]));
        assert!(enforcers(&PhysicalPropertySet::any(), &foreign, &output, &[]).is_none());
    }

    #[test]
    fn test_scan_delivers_catalog_distribution() {
        let factory = ColumnRefFactory::new();
        let key = factory.create("o_orderkey", DataType::BigInt, false);
        let table = TableRef::new("tpch", "orders");
        let mut catalog = InMemoryCatalog::new();
        catalog.set_distribution(&table, TableDistribution::Hash(vec!["o_orderkey".into()]));
        let scan = PhysicalOperator::Scan {
            table,
            columns: vec![key.clone()],
            predicate: None,
            projection: None,
        };
        let delivered = delivered_properties(&scan, &[], &ColumnRefSet::from_refs([&key]), &catalog);
        assert_eq!(delivered.distribution, DistributionSpec::Hash(vec![key.id]));

        let pruned = delivered_properties(&scan, &[], &ColumnRefSet::new(), &catalog);
        assert_eq!(pruned.distribution, DistributionSpec::Any);
    }
}
