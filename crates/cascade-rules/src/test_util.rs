//! Memo fixture shared by the rule tests.

use cascade_core::catalog::InMemoryCatalog;
use cascade_core::column::{ColumnRef, ColumnRefFactory, ColumnRefSet};
use cascade_core::config::OptimizerConfig;
use cascade_core::derive::{derive_group_property, DeriveContext};
use cascade_core::expr::{LogicalOperator, TableRef};
use cascade_core::memo::{GroupExpression, GroupId, Memo};
use cascade_core::pattern::matches;
use cascade_core::rule::{OptContext, Rule, RuleResult};
use cascade_core::scalar::DataType;
use cascade_core::stats::TableStatistics;

pub struct Fixture {
    pub catalog: InMemoryCatalog,
    pub factory: ColumnRefFactory,
    pub config: OptimizerConfig,
    pub memo: Memo,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            catalog: InMemoryCatalog::new(),
            factory: ColumnRefFactory::new(),
            config: OptimizerConfig::default(),
            memo: Memo::new(),
        }
    }

    pub fn column(&self, name: &str) -> ColumnRef {
        self.factory.create(name, DataType::Int, true)
    }

    /// Register a table and copy a scan of all its columns into the memo.
    pub fn table(&mut self, name: &str, rows: f64, columns: &[&str]) -> (GroupId, Vec<ColumnRef>) {
        let table = TableRef::new("db", name);
        self.catalog.add_table(&table, TableStatistics::new(rows));
        let columns: Vec<ColumnRef> = columns.iter().map(|c| self.column(c)).collect();
        let group = self.add(LogicalOperator::scan(table, columns.clone()), vec![]);
        (group, columns)
    }

    pub fn add(&mut self, op: LogicalOperator, children: Vec<GroupId>) -> GroupId {
        let ctx = DeriveContext {
            catalog: &self.catalog,
            column_factory: &self.factory,
        };
        self.memo
            .insert_expression(op.into(), children, None, |memo, op, children| {
                derive_group_property(memo, op, children, &ctx)
            })
            .unwrap()
            .group_id
    }

    /// The first logical expression of `group`.
    pub fn expr(&self, group: GroupId) -> &GroupExpression {
        let id = self.memo.group(group).unwrap().logical_exprs[0];
        self.memo.expr(id).unwrap()
    }

    /// Match, check and apply `rule` to the first logical expression of `group`.
    pub fn apply(&self, rule: &dyn Rule, group: GroupId, required: Option<&ColumnRefSet>, join_count: usize) -> Vec<RuleResult> {
        let ctx = OptContext {
            catalog: &self.catalog,
            column_factory: &self.factory,
            config: &self.config,
            required_columns: required,
            join_count,
        };
        let expr = self.expr(group);
        if !matches(&self.memo, expr.id, &rule.pattern()).unwrap() || !rule.check(expr, &self.memo, &ctx) {
            return vec![];
        }
        rule.apply(expr, &self.memo, &ctx).unwrap()
    }
}

pub fn ids(columns: &[&ColumnRef]) -> ColumnRefSet {
    columns.iter().map(|c| c.id).collect()
}
