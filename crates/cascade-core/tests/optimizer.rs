//! End-to-end tests of the optimizer facade with the built-in rule set.
//!
//! Each test builds a logical tree against an in-memory catalog, optimizes it
//! and checks the shape of the chosen physical plan, the memo, or the error.

mod common;

use cascade_core::column::ColumnRefSet;
use cascade_core::error::{OptimizerError, SearchBudget};
use cascade_core::expr::{AggStage, ExprTree, LogicalOperator, PhysicalOperator, Projection, SortKey};
use cascade_core::properties::{DistributionSpec, PhysicalPropertySet};
use cascade_core::scalar::{AggCall, AggFunction, BinaryType, DataType, ScalarOperator};
use common::{columns, cross_join, inner_join, nodes, TestDb};
use std::sync::atomic::Ordering;

fn call(name: &str, arg: ScalarOperator) -> ScalarOperator {
    ScalarOperator::call(name, vec![arg], DataType::Int)
}

fn gt(column: &cascade_core::column::ColumnRef, value: i64) -> ScalarOperator {
    ScalarOperator::binary(BinaryType::Gt, ScalarOperator::column(column), ScalarOperator::int(value))
}

// ---------------------------------------------------------------------------
// Memo shape
// ---------------------------------------------------------------------------

#[test]
fn test_equi_join_explores_both_orders() {
    let mut db = TestDb::new();
    let (t1, a) = db.table("t1", 1000.0, &[("a", 1000.0)]);
    let (t2, b) = db.table("t2", 100.0, &[("b", 100.0)]);
    let query = inner_join(t1, t2, ScalarOperator::eq(&a[0], &b[0]));
    let required = columns(&[&a[0], &b[0]]);

    let mut optimizer = db.optimizer();
    let result = optimizer.optimize(&query, &required).unwrap();

    // Two scans and the join; each join order has one hash join.
    assert_eq!(optimizer.memo().num_groups(), 3);
    assert_eq!(optimizer.memo().num_exprs(), 8);
    assert!(!result.timed_out);
    assert!(result.cost.total > 0.0);
    assert!(matches!(result.plan.op, PhysicalOperator::HashJoin { .. }));
    assert!(result.plan.output_columns.contains_all(&required));
}

#[test]
fn test_empty_required_columns() {
    let mut db = TestDb::new();
    let (t1, a) = db.table("t1", 1000.0, &[("a", 1000.0)]);
    let (t2, b) = db.table("t2", 100.0, &[("b", 100.0)]);
    let query = inner_join(t1, t2, ScalarOperator::eq(&a[0], &b[0]));

    let mut optimizer = db.optimizer();
    let result = optimizer.optimize(&query, &ColumnRefSet::new()).unwrap();

    // The join keys keep both scans from being pruned to nothing.
    assert_eq!(optimizer.memo().num_groups(), 3);
    assert_eq!(optimizer.memo().num_exprs(), 8);
    assert!(matches!(result.plan.op, PhysicalOperator::HashJoin { .. }));
}

#[test]
fn test_cross_join_uses_nested_loop() {
    let mut db = TestDb::new();
    let (t1, a) = db.table("t1", 1000.0, &[("a", 1000.0)]);
    let (t2, b) = db.table("t2", 100.0, &[("b", 100.0)]);
    let required = columns(&[&a[0], &b[0]]);

    let mut optimizer = db.optimizer();
    let result = optimizer.optimize(&cross_join(t1, t2), &required).unwrap();

    assert_eq!(optimizer.memo().num_groups(), 3);
    assert_eq!(optimizer.memo().num_exprs(), 8);
    assert!(matches!(result.plan.op, PhysicalOperator::NestedLoopJoin { .. }));
    // The inner side of a nested loop join is replicated.
    assert!(matches!(
        result.plan.inputs[1].op,
        PhysicalOperator::Exchange {
            distribution: DistributionSpec::Broadcast
        }
    ));
}

// ---------------------------------------------------------------------------
// Rewrite phase
// ---------------------------------------------------------------------------

#[test]
fn test_projection_is_merged_and_scan_is_pruned() {
    let mut db = TestDb::new();
    let (t, c) = db.table("t", 1000.0, &[("t1", 10.0), ("t2", 10.0), ("t3", 10.0), ("t4", 10.0), ("t5", 10.0)]);
    let out = db.factory.create("out", DataType::Int, true);
    let query = ExprTree::new(
        LogicalOperator::Project {
            projection: Projection::new(vec![(out.clone(), call("abs", ScalarOperator::column(&c[3])))]),
        },
        vec![t],
    );
    let required = columns(&[&out]);

    let result = db.optimizer().optimize(&query, &required).unwrap();
    let PhysicalOperator::Scan {
        columns: scanned,
        projection: Some(projection),
        ..
    } = &result.plan.op
    else {
        panic!("expected a projecting scan, got\n{}", result.plan.display(0));
    };
    assert_eq!(scanned, &vec![c[3].clone()]);
    assert_eq!(projection.output_columns(), required);
    assert_eq!(result.plan.output_columns, required);
}

#[test]
fn test_repeated_calls_are_computed_once() {
    let mut db = TestDb::new();
    let (t, c) = db.table("t", 1000.0, &[("a", 10.0), ("b", 10.0)]);
    let x = db.factory.create("x", DataType::Int, true);
    let y = db.factory.create("y", DataType::Int, true);
    let shared = call("g", ScalarOperator::column(&c[0]));
    let query = ExprTree::new(
        LogicalOperator::Project {
            projection: Projection::new(vec![
                (x.clone(), call("f", shared.clone())),
                (y.clone(), call("h", shared.clone())),
            ]),
        },
        vec![t],
    );
    let required = columns(&[&x, &y]);

    let result = db.optimizer().optimize(&query, &required).unwrap();
    let Some(projection) = result.plan.projection() else {
        panic!("expected a projection, got\n{}", result.plan.display(0));
    };
    assert_eq!(projection.common_sub_operators.len(), 1);
    assert_eq!(projection.common_sub_operators[0].1, shared);
    assert_eq!(projection.output_columns(), required);
}

#[test]
fn test_filter_is_merged_into_scan() {
    let mut db = TestDb::new();
    let (t, c) = db.table("t", 1000.0, &[("a", 100.0), ("b", 10.0)]);
    let query = ExprTree::new(LogicalOperator::Filter { predicate: gt(&c[0], 5) }, vec![t]);
    let required = columns(&[&c[0], &c[1]]);

    let result = db.optimizer().optimize(&query, &required).unwrap();
    assert!(matches!(result.plan.op, PhysicalOperator::Scan { .. }));
    assert_eq!(result.plan.predicate(), Some(&gt(&c[0], 5)));
    assert!(result.plan.inputs.is_empty());
}

// ---------------------------------------------------------------------------
// Exploration and costing
// ---------------------------------------------------------------------------

#[test]
fn test_filter_over_projection_reaches_scan() {
    let mut db = TestDb::new();
    let (t, c) = db.table("t", 1000.0, &[("a", 100.0), ("b", 10.0)]);
    let x = db.factory.create("x", DataType::Int, false);
    let y = db.factory.create("y", DataType::Int, true);
    let project = ExprTree::new(
        LogicalOperator::Project {
            projection: Projection::new(vec![
                (x.clone(), ScalarOperator::column(&c[0])),
                (y.clone(), call("abs", ScalarOperator::column(&c[1]))),
            ]),
        },
        vec![t],
    );
    let query = ExprTree::new(LogicalOperator::Filter { predicate: gt(&x, 5) }, vec![project]);
    let required = columns(&[&x, &y]);

    let result = db.optimizer().optimize(&query, &required).unwrap();
    assert!(
        matches!(result.plan.op, PhysicalOperator::Scan { .. }),
        "expected a single scan, got\n{}",
        result.plan.display(0)
    );
    assert_eq!(result.plan.predicate(), Some(&gt(&c[0], 5)));
    assert!(result.plan.projection().is_some());
    assert_eq!(result.plan.output_columns, required);
}

#[test]
fn test_filter_on_group_keys_runs_before_aggregation() {
    let mut db = TestDb::new();
    let (t, c) = db.table("t", 1_000_000.0, &[("k", 10.0), ("v", 1000.0)]);
    let count = db.factory.create("cnt", DataType::BigInt, false);
    let aggregate = ExprTree::new(
        LogicalOperator::Aggregate {
            stage: AggStage::Global,
            group_by: vec![c[0].clone()],
            aggregations: vec![(count.clone(), AggCall::new(AggFunction::Count, None))],
            split: false,
        },
        vec![t],
    );
    // HAVING k > 3 AND cnt > 10
    let having = ScalarOperator::and_all(vec![gt(&c[0], 3), gt(&count, 10)]).unwrap();
    let query = ExprTree::new(LogicalOperator::Filter { predicate: having }, vec![aggregate]);
    let required = columns(&[&c[0], &count]);

    let result = db.optimizer().optimize(&query, &required).unwrap();
    let plan = nodes(&result.plan);
    assert!(
        matches!(&result.plan.op, PhysicalOperator::Filter { predicate } if predicate == &gt(&count, 10)),
        "expected the count filter on top, got\n{}",
        result.plan.display(0)
    );
    let Some(scan) = plan.iter().find(|n| matches!(n.op, PhysicalOperator::Scan { .. })) else {
        panic!("expected a scan");
    };
    assert_eq!(scan.predicate(), Some(&gt(&c[0], 3)));
    assert_eq!(
        plan.iter()
            .filter(|n| matches!(n.op, PhysicalOperator::Filter { .. }))
            .count(),
        1
    );
}

#[test]
fn test_filter_over_cross_join_becomes_hash_join() {
    let mut db = TestDb::new();
    let (t1, a) = db.table("t1", 1000.0, &[("a", 1000.0)]);
    let (t2, b) = db.table("t2", 100.0, &[("b", 100.0)]);
    let query = ExprTree::new(
        LogicalOperator::Filter {
            predicate: ScalarOperator::eq(&a[0], &b[0]),
        },
        vec![cross_join(t1, t2)],
    );
    let required = columns(&[&a[0], &b[0]]);

    let result = db.optimizer().optimize(&query, &required).unwrap();
    assert!(
        matches!(result.plan.op, PhysicalOperator::HashJoin { .. }),
        "expected a hash join at the root, got\n{}",
        result.plan.display(0)
    );
}

/// A 100M row fact table joined with a 20M row table.
fn fact_join(db: &mut TestDb) -> (ExprTree, ColumnRefSet, cascade_core::column::ColumnRef) {
    let (fact, a) = db.table("fact", 100_000_000.0, &[("a", 20_000_000.0)]);
    let (dim, b) = db.table("dim", 20_000_000.0, &[("b", 20_000_000.0)]);
    let required = columns(&[&a[0], &b[0]]);
    (inner_join(fact, dim, ScalarOperator::eq(&a[0], &b[0])), required, b[0].clone())
}

#[test]
fn test_large_build_side_is_shuffled() {
    let mut db = TestDb::new();
    let (query, required, b) = fact_join(&mut db);

    let result = db.optimizer().optimize(&query, &required).unwrap();
    assert!(matches!(result.plan.op, PhysicalOperator::HashJoin { .. }));
    assert_eq!(
        result.plan.inputs[1].op,
        PhysicalOperator::Exchange {
            distribution: DistributionSpec::Hash(vec![b.id])
        },
        "\n{}",
        result.plan.display(0)
    );
}

#[test]
fn test_broadcast_when_limits_allow() {
    let mut db = TestDb::new();
    db.config.broadcast_row_limit = 30_000_000;
    db.config.broadcast_max_ratio = 0.25;
    let (query, required, _) = fact_join(&mut db);

    let result = db.optimizer().optimize(&query, &required).unwrap();
    assert_eq!(
        result.plan.inputs[1].op,
        PhysicalOperator::Exchange {
            distribution: DistributionSpec::Broadcast
        },
        "\n{}",
        result.plan.display(0)
    );
    assert!(matches!(result.plan.inputs[0].op, PhysicalOperator::Scan { .. }));
}

#[test]
fn test_broadcast_ratio_limit() {
    let mut db = TestDb::new();
    db.config.broadcast_row_limit = 30_000_000;
    db.config.broadcast_max_ratio = 0.1;
    let (query, required, b) = fact_join(&mut db);

    let result = db.optimizer().optimize(&query, &required).unwrap();
    assert_eq!(
        result.plan.inputs[1].op,
        PhysicalOperator::Exchange {
            distribution: DistributionSpec::Hash(vec![b.id])
        }
    );
}

#[test]
fn test_two_stage_aggregation() {
    let mut db = TestDb::new();
    let (t, c) = db.table("t", 1_000_000.0, &[("k", 10.0), ("v", 1000.0)]);
    let count = db.factory.create("cnt", DataType::BigInt, false);
    let query = ExprTree::new(
        LogicalOperator::Aggregate {
            stage: AggStage::Global,
            group_by: vec![c[0].clone()],
            aggregations: vec![(count.clone(), AggCall::new(AggFunction::Count, None))],
            split: false,
        },
        vec![t],
    );
    let required = columns(&[&c[0], &count]);

    let result = db.optimizer().optimize(&query, &required).unwrap();
    let shape: Vec<&PhysicalOperator> = nodes(&result.plan).into_iter().map(|n| &n.op).collect();
    assert!(
        matches!(
            shape[..],
            [
                PhysicalOperator::HashAggregate {
                    stage: AggStage::Global,
                    ..
                },
                PhysicalOperator::Exchange {
                    distribution: DistributionSpec::Hash(_)
                },
                PhysicalOperator::HashAggregate {
                    stage: AggStage::Local,
                    ..
                },
                PhysicalOperator::Scan { .. },
            ]
        ),
        "\n{}",
        result.plan.display(0)
    );
    assert_eq!(result.plan.output_columns, required);
}

#[test]
fn test_distinct_aggregation_deduplicates_locally() {
    let mut db = TestDb::new();
    let (t, c) = db.table("t", 1_000_000.0, &[("k", 10.0), ("v", 1000.0)]);
    let count = db.factory.create("cnt", DataType::BigInt, false);
    let query = ExprTree::new(
        LogicalOperator::Aggregate {
            stage: AggStage::Global,
            group_by: vec![c[0].clone()],
            aggregations: vec![(
                count.clone(),
                AggCall::distinct(AggFunction::Count, ScalarOperator::column(&c[1])),
            )],
            split: false,
        },
        vec![t],
    );
    let required = columns(&[&c[0], &count]);

    let result = db.optimizer().optimize(&query, &required).unwrap();
    let PhysicalOperator::HashAggregate {
        stage: AggStage::Global,
        aggregations,
        ..
    } = &result.plan.op
    else {
        panic!("expected a global aggregate, got\n{}", result.plan.display(0));
    };
    assert!(!aggregations[0].1.distinct);
    let plan = nodes(&result.plan);
    assert!(
        plan.iter().any(|n| matches!(
            &n.op,
            PhysicalOperator::HashAggregate { stage: AggStage::Local, group_by, aggregations }
                if group_by == &vec![c[0].clone(), c[1].clone()] && aggregations.is_empty()
        )),
        "expected a local dedup, got\n{}",
        result.plan.display(0)
    );
}

#[test]
fn test_count_of_constant_reads_one_column() {
    let mut db = TestDb::new();
    let (t, c) = db.table("t", 1_000_000.0, &[("a", 10.0), ("b", 10.0), ("c", 10.0)]);
    let count = db.factory.create("cnt", DataType::BigInt, false);
    let query = ExprTree::new(
        LogicalOperator::Aggregate {
            stage: AggStage::Global,
            group_by: vec![],
            aggregations: vec![(count.clone(), AggCall::new(AggFunction::Count, Some(ScalarOperator::int(1))))],
            split: false,
        },
        vec![t],
    );

    let result = db.optimizer().optimize(&query, &columns(&[&count])).unwrap();
    let plan = nodes(&result.plan);
    let Some(scan) = plan.iter().find(|n| matches!(n.op, PhysicalOperator::Scan { .. })) else {
        panic!("expected a scan");
    };
    let PhysicalOperator::Scan { columns: scanned, .. } = &scan.op else {
        unreachable!()
    };
    assert_eq!(scanned, &vec![c[0].clone()]);
    assert_eq!(result.plan.output_columns, columns(&[&count]));
    assert!(plan.iter().all(|n| match &n.op {
        PhysicalOperator::HashAggregate {
            stage: AggStage::Local,
            aggregations,
            ..
        } => aggregations[0].1.arg.is_none(),
        _ => true,
    }));
}

#[test]
fn test_limit_gathers_to_one_node() {
    let mut db = TestDb::new();
    let (t, c) = db.table("t", 1000.0, &[("a", 10.0)]);
    let query = ExprTree::new(LogicalOperator::Limit { limit: 10, offset: 0 }, vec![t]);

    let result = db.optimizer().optimize(&query, &columns(&[&c[0]])).unwrap();
    assert!(matches!(result.plan.op, PhysicalOperator::Limit { limit: 10, offset: 0 }));
    assert_eq!(result.plan.row_count, 10.0);
    assert_eq!(result.plan.distribution(), &DistributionSpec::Singleton);
}

#[test]
fn test_sorted_output() {
    let mut db = TestDb::new();
    let (t, c) = db.table("t", 1000.0, &[("a", 10.0)]);
    let order = vec![SortKey::asc(&c[0])];
    let required = PhysicalPropertySet {
        distribution: DistributionSpec::Any,
        sort_order: Some(order.clone()),
    };

    let result = db
        .optimizer()
        .optimize_for(&t, &columns(&[&c[0]]), &required)
        .unwrap();
    assert_eq!(result.plan.op, PhysicalOperator::Sort { order });
    assert!(matches!(
        result.plan.inputs[0].op,
        PhysicalOperator::Exchange {
            distribution: DistributionSpec::Singleton
        }
    ));
}

#[test]
fn test_optimization_is_deterministic() {
    let run = || {
        let mut db = TestDb::new();
        let (t1, a) = db.table("t1", 5000.0, &[("a", 5000.0)]);
        let (t2, b) = db.table("t2", 300.0, &[("b", 300.0), ("c", 30.0)]);
        let (t3, c) = db.table("t3", 30.0, &[("d", 30.0)]);
        let query = inner_join(
            inner_join(t1, t2, ScalarOperator::eq(&a[0], &b[0])),
            t3,
            ScalarOperator::eq(&b[1], &c[0]),
        );
        let required = columns(&[&a[0], &c[0]]);
        let result = db.optimizer().optimize(&query, &required).unwrap();
        (result.plan.display(0), result.cost.total)
    };
    assert_eq!(run(), run());
}

// ---------------------------------------------------------------------------
// Budgets and errors
// ---------------------------------------------------------------------------

fn three_way(db: &mut TestDb) -> (ExprTree, ColumnRefSet) {
    let (t1, a) = db.table("t1", 5000.0, &[("a", 5000.0)]);
    let (t2, b) = db.table("t2", 300.0, &[("b", 300.0)]);
    let (t3, c) = db.table("t3", 30.0, &[("c", 30.0)]);
    let query = inner_join(
        inner_join(t1, t2, ScalarOperator::eq(&a[0], &b[0])),
        t3,
        ScalarOperator::eq(&b[0], &c[0]),
    );
    (query, columns(&[&a[0], &b[0], &c[0]]))
}

#[test]
fn test_iteration_budget_without_plan() {
    let mut db = TestDb::new();
    db.config.max_iterations = 1;
    let (query, required) = three_way(&mut db);

    let err = db.optimizer().optimize(&query, &required).unwrap_err();
    assert!(matches!(
        err,
        OptimizerError::Timeout {
            budget: SearchBudget::Iterations,
            tasks: 1,
            ..
        }
    ));
}

#[test]
fn test_iteration_budget_keeps_best_plan_so_far() {
    let mut db = TestDb::new();
    let (query, required) = three_way(&mut db);
    let full = db.optimizer().optimize(&query, &required).unwrap();
    assert!(!full.timed_out);

    // Stop right before the final task: the root already has a winner.
    let mut db = TestDb::new();
    db.config.max_iterations = full.stats.tasks - 1;
    let (query, required) = three_way(&mut db);
    let partial = db.optimizer().optimize(&query, &required).unwrap();
    assert!(partial.timed_out);
    assert_eq!(partial.cost.total, full.cost.total);
}

#[test]
fn test_memo_group_budget() {
    let mut db = TestDb::new();
    db.config.max_memo_groups = 2;
    let (query, required) = three_way(&mut db);

    let err = db.optimizer().optimize(&query, &required).unwrap_err();
    assert!(matches!(
        err,
        OptimizerError::Timeout {
            budget: SearchBudget::MemoGroups,
            ..
        }
    ));
}

#[test]
fn test_cancellation() {
    let mut db = TestDb::new();
    let (query, required) = three_way(&mut db);
    let mut optimizer = db.optimizer();
    optimizer.context().cancel.store(true, Ordering::Relaxed);

    let err = optimizer.optimize(&query, &required).unwrap_err();
    assert!(matches!(err, OptimizerError::Cancelled));
    assert!(!err.is_internal());
}

#[test]
fn test_unsatisfiable_requirement() {
    let mut db = TestDb::new();
    let (t, c) = db.table("t", 1000.0, &[("a", 10.0)]);
    // Sorted output only exists on a single node.
    let required = PhysicalPropertySet {
        distribution: DistributionSpec::Hash(vec![c[0].id]),
        sort_order: Some(vec![SortKey::asc(&c[0])]),
    };

    let err = db
        .optimizer()
        .optimize_for(&t, &columns(&[&c[0]]), &required)
        .unwrap_err();
    assert!(matches!(err, OptimizerError::NoPlan { .. }), "{err}");
}

#[test]
fn test_aggregate_type_mismatch() {
    let mut db = TestDb::new();
    let (t, c) = db.table("t", 1000.0, &[("k", 10.0)]);
    // count() produces BIGINT.
    let count = db.factory.create("cnt", DataType::Int, false);
    let query = ExprTree::new(
        LogicalOperator::Aggregate {
            stage: AggStage::Global,
            group_by: vec![c[0].clone()],
            aggregations: vec![(count.clone(), AggCall::new(AggFunction::Count, None))],
            split: false,
        },
        vec![t],
    );

    let err = db.optimizer().optimize(&query, &columns(&[&count])).unwrap_err();
    assert!(matches!(err, OptimizerError::TypeCheck(_)), "{err}");
}

#[test]
fn test_physical_input_is_rejected() {
    let mut db = TestDb::new();
    let (_, c) = db.table("t", 1000.0, &[("a", 10.0)]);
    let query = ExprTree::leaf(PhysicalOperator::Limit { limit: 1, offset: 0 });

    let err = db.optimizer().optimize(&query, &columns(&[&c[0]])).unwrap_err();
    assert!(matches!(err, OptimizerError::TypeCheck(_)));
}

#[test]
fn test_invalid_config() {
    let mut db = TestDb::new();
    db.config.num_backends = 0;
    let (t, c) = db.table("t", 1000.0, &[("a", 10.0)]);

    let err = db.optimizer().optimize(&t, &columns(&[&c[0]])).unwrap_err();
    assert!(matches!(err, OptimizerError::Config(_)));
}
