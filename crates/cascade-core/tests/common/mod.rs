//! Shared fixture for the end-to-end tests: a catalog, the column registry the
//! query is built from, and a config, turned into an `Optimizer` once the query
//! tree is ready.

#![allow(dead_code)]

use cascade_core::catalog::InMemoryCatalog;
use cascade_core::column::{ColumnRef, ColumnRefFactory, ColumnRefSet};
use cascade_core::config::OptimizerConfig;
use cascade_core::expr::{ExprTree, JoinType, LogicalOperator, TableRef};
use cascade_core::plan::PlanNode;
use cascade_core::scalar::{DataType, ScalarOperator};
use cascade_core::stats::{ColumnStatistics, TableStatistics};
use cascade_core::{Optimizer, OptimizerContext};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Log to the test output; filter with `RUST_LOG=cascade_core=debug`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub struct TestDb {
    pub catalog: InMemoryCatalog,
    pub factory: ColumnRefFactory,
    pub config: OptimizerConfig,
}

impl TestDb {
    pub fn new() -> Self {
        init_tracing();
        Self {
            catalog: InMemoryCatalog::new(),
            factory: ColumnRefFactory::new(),
            config: OptimizerConfig::default(),
        }
    }

    /// Register `tpch.<name>` with a row count and per-column NDVs, and return a
    /// scan of all its columns.
    pub fn table(&mut self, name: &str, rows: f64, columns: &[(&str, f64)]) -> (ExprTree, Vec<ColumnRef>) {
        let table = TableRef::new("tpch", name);
        let mut stats = TableStatistics::new(rows);
        for (column, ndv) in columns {
            stats = stats.with_column(*column, ColumnStatistics::new(*ndv, 0.0));
        }
        self.catalog.add_table(&table, stats);

        let refs: Vec<ColumnRef> = columns
            .iter()
            .map(|(column, _)| self.factory.create(*column, DataType::Int, false))
            .collect();
        (ExprTree::leaf(LogicalOperator::scan(table, refs.clone())), refs)
    }

    pub fn optimizer(self) -> Optimizer {
        let mut context = OptimizerContext::new(
            self.config,
            Arc::new(self.catalog),
            Arc::new(cascade_rules::default_rule_registry()),
        );
        context.column_factory = self.factory;
        Optimizer::new(context)
    }
}

pub fn inner_join(left: ExprTree, right: ExprTree, predicate: ScalarOperator) -> ExprTree {
    ExprTree::new(
        LogicalOperator::Join {
            join_type: JoinType::Inner,
            predicate: Some(predicate),
        },
        vec![left, right],
    )
}

pub fn cross_join(left: ExprTree, right: ExprTree) -> ExprTree {
    ExprTree::new(
        LogicalOperator::Join {
            join_type: JoinType::Cross,
            predicate: None,
        },
        vec![left, right],
    )
}

pub fn columns(refs: &[&ColumnRef]) -> ColumnRefSet {
    ColumnRefSet::from_refs(refs.iter().copied())
}

/// Every node of `plan`, parents first.
pub fn nodes(plan: &PlanNode) -> Vec<&PlanNode> {
    let mut out = Vec::new();
    plan.walk(&mut |node| out.push(node));
    out
}
