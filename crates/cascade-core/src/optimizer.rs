//! # Optimizer Facade
//!
//! `Optimizer` ties the pieces together for one query:
//!
//! ```text
//! ExprTree ──copy-in──▶ Memo ──rewrite──▶ explore/implement ──extract──▶ PlanNode
//! ```
//!
//! Everything a run needs besides the query itself lives in [`OptimizerContext`]:
//! configuration, catalog, rules, cost model, the column registry the query's
//! columns were minted from, and a cancellation flag the caller may set from
//! another thread. The memo belongs to the optimizer and is dropped with it.

use crate::catalog::Catalog;
use crate::column::{ColumnRefFactory, ColumnRefSet};
use crate::config::OptimizerConfig;
use crate::cost::{Cost, CostModel, DefaultCostModel};
use crate::error::{InternalError, OptimizerError, Result};
use crate::expr::ExprTree;
use crate::memo::Memo;
use crate::plan::PlanNode;
use crate::properties::PhysicalPropertySet;
use crate::rule::RuleRegistry;
use crate::search::{CascadesSearch, SearchStats};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{debug, error};

/// Shared inputs of an optimization run.
pub struct OptimizerContext {
    pub config: OptimizerConfig,
    pub catalog: Arc<dyn Catalog>,
    pub rules: Arc<RuleRegistry>,
    pub cost_model: Arc<dyn CostModel>,
    /// Registry that minted every column of the query; new columns come from it too.
    pub column_factory: ColumnRefFactory,
    /// Set to `true` to stop the search at the next task boundary.
    pub cancel: Arc<AtomicBool>,
}

impl OptimizerContext {
    /// A context with the default cost model and a fresh column registry.
    pub fn new(config: OptimizerConfig, catalog: Arc<dyn Catalog>, rules: Arc<RuleRegistry>) -> Self {
        Self {
            config,
            catalog,
            rules,
            cost_model: Arc::new(DefaultCostModel::default()),
            column_factory: ColumnRefFactory::new(),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// Result of a successful optimization.
#[derive(Debug, Clone)]
pub struct OptimizedPlan {
    pub plan: PlanNode,
    pub cost: Cost,
    /// A budget ran out; `plan` is the best one found until then.
    pub timed_out: bool,
    pub stats: SearchStats,
}

pub struct Optimizer {
    context: OptimizerContext,
    memo: Memo,
}

impl Optimizer {
    pub fn new(context: OptimizerContext) -> Self {
        Self {
            context,
            memo: Memo::new(),
        }
    }

    pub fn context(&self) -> &OptimizerContext {
        &self.context
    }

    /// The memo of the last optimization, for inspection.
    pub fn memo(&self) -> &Memo {
        &self.memo
    }

    /// Optimize `tree` so that its result contains `required_columns`, with no
    /// requirement on distribution or order.
    pub fn optimize(&mut self, tree: &ExprTree, required_columns: &ColumnRefSet) -> Result<OptimizedPlan> {
        self.optimize_for(tree, required_columns, &PhysicalPropertySet::any())
    }

    /// Optimize `tree` for a consumer that also needs `required` physical properties.
    pub fn optimize_for(
        &mut self,
        tree: &ExprTree,
        required_columns: &ColumnRefSet,
        required: &PhysicalPropertySet,
    ) -> Result<OptimizedPlan> {
        let result = self.run(tree, required_columns, required);
        if let Err(err) = &result {
            if err.is_internal() {
                error!("Optimizer invariant violated: {}", err);
            } else {
                debug!("Optimization failed: {}", err);
            }
        }
        result
    }

    fn run(
        &mut self,
        tree: &ExprTree,
        required_columns: &ColumnRefSet,
        required: &PhysicalPropertySet,
    ) -> Result<OptimizedPlan> {
        self.context.config.validate()?;
        self.memo = Memo::new();

        let mut search = CascadesSearch::new(&mut self.memo, &self.context);
        let root = search.copy_in(tree)?;
        debug!(
            "Starting Cascades optimization: root_group={}, joins={}, required={}",
            root,
            tree.join_count(),
            required
        );
        search.rewrite(root, required_columns)?;
        let timed_out = search.search(root, required)?;
        let stats = search.stats();

        let plan = self.memo.extract_best_plan(root, required)?;
        let missing = required_columns.except(&plan.output_columns);
        if !missing.is_empty() {
            return Err(OptimizerError::Internal(InternalError::MissingColumns {
                context: "query output".to_string(),
                missing,
            }));
        }

        debug!(
            "Optimization complete: cost={:.1}, tasks={}, rules={}, groups={}, exprs={}, timed_out={}",
            plan.cost.total, stats.tasks, stats.rule_applications, stats.groups, stats.exprs, timed_out
        );
        Ok(OptimizedPlan {
            cost: plan.cost,
            plan,
            timed_out,
            stats,
        })
    }
}
