//! End-to-end join ordering tests using TPC-H shaped queries.
//!
//! These tests construct left-deep join trees in query-text order (the "naive"
//! plan), run the optimizer with the built-in rules, and check that it finds valid
//! plans whose cost is no worse than what commutativity alone can reach.
//!
//! ## Queries (SF=1 row counts)
//! - Q10: 4-table chain (lineitem → orders → customer → nation)
//! - Q5:  6-table cycle (customer, orders, lineitem, supplier, nation, region),
//!   beyond `max_reorder_joins` so only commutativity applies
//!
//! ## What These Tests Verify
//! - Join associativity creates new intermediate groups (memo grows beyond commutativity)
//! - `max_reorder_joins` turns associativity off for larger queries
//! - Left-deep and right-deep inputs converge to the same cost
//! - The optimizer terminates for a 6-table query

mod common;

use cascade_core::column::ColumnRef;
use cascade_core::expr::{ExprTree, LogicalOperator, PhysicalOperator};
use cascade_core::scalar::{BinaryType, DataType, ScalarOperator, ScalarValue};
use cascade_core::OptimizedPlan;
use common::{columns, inner_join, nodes, TestDb};

fn run(db: TestDb, query: &ExprTree, required: &[&ColumnRef]) -> (OptimizedPlan, usize) {
    let mut optimizer = db.optimizer();
    let result = optimizer.optimize(query, &columns(required)).unwrap();
    println!("{}", result.plan.display(0));
    println!("Cost: {:.1}, groups: {}", result.cost.total, optimizer.memo().num_groups());
    (result, optimizer.memo().num_groups())
}

fn count_joins(result: &OptimizedPlan) -> usize {
    nodes(&result.plan)
        .iter()
        .filter(|n| {
            matches!(
                n.op,
                PhysicalOperator::HashJoin { .. } | PhysicalOperator::NestedLoopJoin { .. }
            )
        })
        .count()
}

// ===========================================================================
// Three tables: small(100) ⋈ medium(10K) ⋈ large(1M)
// ===========================================================================

struct Chain {
    small: (ExprTree, Vec<ColumnRef>),
    medium: (ExprTree, Vec<ColumnRef>),
    large: (ExprTree, Vec<ColumnRef>),
}

fn chain(db: &mut TestDb) -> Chain {
    Chain {
        small: db.table("small", 100.0, &[("s_id", 100.0), ("s_mid", 100.0)]),
        medium: db.table("medium", 10000.0, &[("m_id", 10000.0), ("m_sid", 100.0), ("m_lid", 10000.0)]),
        large: db.table("large", 1000000.0, &[("l_id", 1000000.0), ("l_mid", 10000.0)]),
    }
}

/// (small ⋈ medium) ⋈ large
fn left_deep(db: &mut TestDb) -> (ExprTree, ColumnRef) {
    let Chain {
        small: (s, sc),
        medium: (m, mc),
        large: (l, lc),
    } = chain(db);
    let sm = inner_join(s, m, ScalarOperator::eq(&sc[1], &mc[1]));
    (inner_join(sm, l, ScalarOperator::eq(&mc[2], &lc[1])), sc[0].clone())
}

#[test]
fn test_associativity_adds_groups() {
    let mut db = TestDb::new();
    let (query, s_id) = left_deep(&mut db);
    let (result, groups) = run(db, &query, &[&s_id]);
    assert_eq!(count_joins(&result), 2);
    // Three scans and two joins, plus at least medium ⋈ large.
    assert!(groups >= 6, "expected associativity to add groups, got {groups}");
}

#[test]
fn test_reorder_limit_disables_associativity() {
    let mut db = TestDb::new();
    db.config.max_reorder_joins = 1;
    let (query, s_id) = left_deep(&mut db);
    let (result, groups) = run(db, &query, &[&s_id]);
    assert_eq!(count_joins(&result), 2);
    assert_eq!(groups, 5);
}

#[test]
fn test_associativity_convergence_3_tables() {
    let mut db = TestDb::new();
    let (query, s_id) = left_deep(&mut db);
    let (left, _) = run(db, &query, &[&s_id]);

    // small ⋈ (medium ⋈ large)
    let mut db = TestDb::new();
    let Chain {
        small: (s, sc),
        medium: (m, mc),
        large: (l, lc),
    } = chain(&mut db);
    let ml = inner_join(m, l, ScalarOperator::eq(&mc[2], &lc[1]));
    let query = inner_join(s, ml, ScalarOperator::eq(&sc[1], &mc[1]));
    let (right, _) = run(db, &query, &[&sc[0]]);

    let ratio = left.cost.total / right.cost.total;
    assert!(
        (0.99..=1.01).contains(&ratio),
        "both orderings should converge: left={:.1}, right={:.1}",
        left.cost.total,
        right.cost.total
    );
}

// ===========================================================================
// TPC-H Q10: 4-table chain  lineitem → orders → customer → nation
// ===========================================================================

fn build_tpch_q10(db: &mut TestDb) -> (ExprTree, Vec<ColumnRef>) {
    let (lineitem, l) = db.table(
        "lineitem",
        6001215.0,
        &[("l_orderkey", 1500000.0), ("l_extendedprice", 1000000.0), ("l_discount", 11.0)],
    );
    let (orders, o) = db.table("orders", 1500000.0, &[("o_orderkey", 1500000.0), ("o_custkey", 100000.0)]);
    let (customer, c) = db.table(
        "customer",
        150000.0,
        &[("c_custkey", 150000.0), ("c_nationkey", 25.0), ("c_name", 150000.0)],
    );
    let (nation, n) = db.table("nation", 25.0, &[("n_nationkey", 25.0), ("n_name", 25.0)]);

    let lo = inner_join(lineitem, orders, ScalarOperator::eq(&l[0], &o[0]));
    let loc = inner_join(lo, customer, ScalarOperator::eq(&o[1], &c[0]));
    let query = inner_join(loc, nation, ScalarOperator::eq(&c[1], &n[0]));
    (query, vec![c[2].clone(), n[1].clone(), l[1].clone()])
}

#[test]
fn test_tpch_q10_chain_join() {
    let mut db = TestDb::new();
    let initial_groups = 7;
    let (query, required) = build_tpch_q10(&mut db);
    let required: Vec<&ColumnRef> = required.iter().collect();
    let (result, groups) = run(db, &query, &required);

    assert!(!result.timed_out);
    assert_eq!(count_joins(&result), 3);
    assert!(groups > initial_groups);
    assert!(result.plan.output_columns.contains_all(&columns(&required)));

    let mut db = TestDb::new();
    db.config = db.config.disable_rule("JoinAssociativity");
    let (query, required) = build_tpch_q10(&mut db);
    let required: Vec<&ColumnRef> = required.iter().collect();
    let (commuted, commuted_groups) = run(db, &query, &required);

    assert_eq!(commuted_groups, initial_groups);
    assert!(
        result.cost.total <= commuted.cost.total,
        "reordering should not make the plan worse: {:.1} > {:.1}",
        result.cost.total,
        commuted.cost.total
    );
}

// ===========================================================================
// TPC-H Q5: customer, orders, lineitem, supplier, nation, region
// ===========================================================================

#[test]
fn test_tpch_q5_six_tables() {
    let mut db = TestDb::new();
    let (customer, c) = db.table("customer", 150000.0, &[("c_custkey", 150000.0), ("c_nationkey", 25.0)]);
    let (orders, o) = db.table("orders", 1500000.0, &[("o_orderkey", 1500000.0), ("o_custkey", 100000.0)]);
    let (lineitem, l) = db.table(
        "lineitem",
        6001215.0,
        &[("l_orderkey", 1500000.0), ("l_suppkey", 10000.0), ("l_extendedprice", 1000000.0)],
    );
    let (supplier, s) = db.table("supplier", 10000.0, &[("s_suppkey", 10000.0), ("s_nationkey", 25.0)]);
    let (nation, n) = db.table(
        "nation",
        25.0,
        &[("n_nationkey", 25.0), ("n_regionkey", 5.0), ("n_name", 25.0)],
    );
    let (region, r) = db.table("region", 5.0, &[("r_regionkey", 5.0), ("r_name", 5.0)]);

    let asia = ExprTree::new(
        LogicalOperator::Filter {
            predicate: ScalarOperator::binary(
                BinaryType::Eq,
                ScalarOperator::column(&r[1]),
                ScalarOperator::Constant(ScalarValue::Varchar("ASIA".into()), DataType::Varchar),
            ),
        },
        vec![region],
    );
    let co = inner_join(customer, orders, ScalarOperator::eq(&c[0], &o[1]));
    let col = inner_join(co, lineitem, ScalarOperator::eq(&l[0], &o[0]));
    // Supplier joins on two conjuncts, closing the customer/supplier nation cycle.
    let cols = inner_join(
        col,
        supplier,
        ScalarOperator::and_all(vec![ScalarOperator::eq(&l[1], &s[0]), ScalarOperator::eq(&c[1], &s[1])]).unwrap(),
    );
    let colsn = inner_join(cols, nation, ScalarOperator::eq(&s[1], &n[0]));
    let query = inner_join(colsn, asia, ScalarOperator::eq(&n[1], &r[0]));

    let (result, _) = run(db, &query, &[&n[2], &l[2]]);
    assert_eq!(count_joins(&result), 5);
    // The region filter is evaluated by the scan.
    assert!(nodes(&result.plan).iter().any(|node| matches!(
        &node.op,
        PhysicalOperator::Scan { table, predicate: Some(_), .. } if table.name == "region"
    )));
}
