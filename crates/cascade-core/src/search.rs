//! # Cascades Search Algorithm
//!
//! This module implements the Cascades-style top-down search. Instead of recursing,
//! the engine keeps an explicit LIFO stack of tasks; a task may push more tasks,
//! including a continuation of itself, and the search is over when the stack is empty.
//!
//! ## Phases
//!
//! 1. **Copy-in**: the input `ExprTree` becomes one group per node.
//! 2. **Rewrite**: one `RewriteGroup` task per group, parents before children. Each
//!    applies the rewrite rules until nothing changes, knowing which columns the
//!    group's consumers need, then hands its own needs down to its children. A
//!    rewrite that pushes an operator down opens new groups; those are rewritten
//!    next and the group is revisited after them.
//!    Logical properties are re-derived bottom-up afterwards.
//! 3. **Explore/implement**: starting from `OptimizeGroup(root, required)`.
//!
//! ## Tasks
//!
//! - `OptimizeGroup`: find the cheapest plan of a group for one required property.
//! - `OptimizeExpression`: schedule every rule whose root matches one expression.
//! - `ExploreGroup`: apply transformation rules to a child group so that multi-level
//!   patterns (a join whose left input is a join) see every alternative.
//! - `ApplyRule`: fire one rule and insert its results into the memo.
//! - `EnforceAndCost`: cost one physical expression. Children are optimized one at a
//!   time; the task re-pushes itself under the child's `OptimizeGroup` and resumes
//!   once the child has a winner. Enforcers close any gap between delivered and
//!   required properties.
//! - `DeriveBestPlan`: the last task of an `OptimizeGroup`; marks it finished.
//!
//! ## Budgets
//!
//! Before every task the engine checks the cancellation flag, the wall-clock
//! timeout, the task count and the memo size. When a budget runs out after the root
//! already has a winner, that plan is returned and flagged as timed out.

use crate::column::ColumnRefSet;
use crate::cost::{Cost, CostContext};
use crate::derive::{derive_group_property, derive_logical_property, DeriveContext};
use crate::enforce::{child_requirements, delivered_properties, enforcers};
use crate::error::{InternalError, OptimizerError, Result, SearchBudget};
use crate::expr::{ExprTree, Operator};
use crate::memo::{EnforcerStep, ExprId, GroupId, Memo, SearchState, Winner};
use crate::optimizer::OptimizerContext;
use crate::pattern::matches;
use crate::properties::{LogicalProperty, PhysicalPropertySet};
use crate::rule::{OptContext, Rule, RuleChild, RuleResult, RuleType};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Upper bound on rewrite passes over one group.
const MAX_REWRITE_PASSES: usize = 16;

/// Counters reported with every optimized plan.
#[derive(Debug, Clone, Default)]
pub struct SearchStats {
    /// Tasks executed, rewrite tasks included.
    pub tasks: usize,
    pub rule_applications: usize,
    pub groups: usize,
    pub exprs: usize,
    pub elapsed: Duration,
}

enum Task<'a> {
    RewriteGroup {
        group: GroupId,
    },
    OptimizeGroup {
        group: GroupId,
        required: PhysicalPropertySet,
    },
    OptimizeExpression {
        expr: ExprId,
        required: PhysicalPropertySet,
        explore_only: bool,
    },
    ExploreGroup {
        group: GroupId,
    },
    ApplyRule {
        expr: ExprId,
        rule: &'a dyn Rule,
        required: PhysicalPropertySet,
        explore_only: bool,
    },
    /// `child_props` is `None` until the alternatives have been enumerated.
    EnforceAndCost {
        expr: ExprId,
        required: PhysicalPropertySet,
        child_props: Option<Vec<PhysicalPropertySet>>,
        next_child: usize,
        child_cost: Cost,
        requested: bool,
    },
    DeriveBestPlan {
        group: GroupId,
        required: PhysicalPropertySet,
    },
}

impl<'a> Task<'a> {
    fn enforce_and_cost(expr: ExprId, required: PhysicalPropertySet) -> Self {
        Task::EnforceAndCost {
            expr,
            required,
            child_props: None,
            next_child: 0,
            child_cost: Cost::zero(),
            requested: false,
        }
    }
}

/// The Cascades search engine for one optimization.
pub struct CascadesSearch<'a> {
    memo: &'a mut Memo,
    context: &'a OptimizerContext,
    tasks: Vec<Task<'a>>,
    /// Columns consumers need from each group, filled during the rewrite phase.
    rewrite_required: HashMap<GroupId, ColumnRefSet>,
    join_count: usize,
    stats: SearchStats,
    started: Instant,
}

fn derive_context(context: &OptimizerContext) -> DeriveContext<'_> {
    DeriveContext {
        catalog: context.catalog.as_ref(),
        column_factory: &context.column_factory,
    }
}

/// Derivation callback for inserts into an existing group, which never derive.
fn no_new_group(_: &Memo, op: &Operator, _: &[GroupId]) -> Result<LogicalProperty> {
    Err(InternalError::Invariant(format!("targeted insert of {} tried to open a group", op)).into())
}

impl<'a> CascadesSearch<'a> {
    pub fn new(memo: &'a mut Memo, context: &'a OptimizerContext) -> Self {
        Self {
            memo,
            context,
            tasks: Vec::new(),
            rewrite_required: HashMap::new(),
            join_count: 0,
            stats: SearchStats::default(),
            started: Instant::now(),
        }
    }

    pub fn stats(&self) -> SearchStats {
        SearchStats {
            groups: self.memo.num_groups(),
            exprs: self.memo.num_exprs(),
            elapsed: self.started.elapsed(),
            ..self.stats.clone()
        }
    }

    fn opt_context<'c>(&self, required_columns: Option<&'c ColumnRefSet>) -> OptContext<'c>
    where
        'a: 'c,
    {
        let context = self.context;
        OptContext {
            catalog: context.catalog.as_ref(),
            column_factory: &context.column_factory,
            config: &context.config,
            required_columns,
            join_count: self.join_count,
        }
    }

    /// Copy a logical expression tree into the memo, one group per node.
    ///
    /// Physical operators are rejected: the optimizer only plans logical input.
    pub fn copy_in(&mut self, tree: &ExprTree) -> Result<GroupId> {
        self.join_count = tree.join_count();
        self.insert_tree(tree)
    }

    fn insert_tree(&mut self, tree: &ExprTree) -> Result<GroupId> {
        if !tree.op.is_logical() {
            return Err(OptimizerError::TypeCheck(format!(
                "input plan contains physical operator {}",
                tree.op
            )));
        }
        let children = tree
            .inputs
            .iter()
            .map(|input| self.insert_tree(input))
            .collect::<Result<Vec<_>>>()?;
        let ctx = derive_context(self.context);
        let inserted = self
            .memo
            .insert_expression(tree.op.clone(), children, None, |memo, op, children| {
                derive_group_property(memo, op, children, &ctx)
            })?;
        Ok(inserted.group_id)
    }

    /// Groups reachable from `root` through logical expressions, parents first.
    fn topological_order(&self, root: GroupId) -> Result<Vec<GroupId>> {
        let mut visited = HashSet::new();
        let mut post_order = Vec::new();
        // (group, children already pushed)
        let mut stack = vec![(root, false)];
        while let Some((group, expanded)) = stack.pop() {
            if expanded {
                post_order.push(group);
                continue;
            }
            if !visited.insert(group) {
                continue;
            }
            stack.push((group, true));
            for &expr in self.memo.group(group)?.logical_exprs.iter().rev() {
                for &child in self.memo.expr(expr)?.children.iter().rev() {
                    if !visited.contains(&child) {
                        stack.push((child, false));
                    }
                }
            }
        }
        post_order.reverse();
        Ok(post_order)
    }

    /// Run the rewrite phase from `root`, whose consumer needs `required`.
    pub fn rewrite(&mut self, root: GroupId, required: &ColumnRefSet) -> Result<()> {
        let order = self.topological_order(root)?;
        self.rewrite_required.clear();
        self.rewrite_required.insert(root, required.clone());
        for &group in order.iter().rev() {
            self.tasks.push(Task::RewriteGroup { group });
        }
        if let Some(budget) = self.drain()? {
            return Err(self.timeout(budget));
        }

        // Rewrites may have pruned columns or merged operators; refresh bottom-up.
        let ctx = derive_context(self.context);
        for group in self.topological_order(root)?.into_iter().rev() {
            let expr_id = self.single_logical_expr(group)?;
            let expr = self.memo.expr(expr_id)?;
            let Operator::Logical(op) = &expr.op else {
                return Err(InternalError::Invariant(format!("group {} holds no logical expression", group)).into());
            };
            let inputs = expr
                .children
                .iter()
                .map(|child| self.memo.group(*child).map(|g| &g.logical_property))
                .collect::<Result<Vec<_>>>()?;
            let property = derive_logical_property(op, &inputs, &ctx)?;
            self.memo.set_logical_property(group, property)?;
        }
        debug!(
            "Rewrite complete: groups={}, exprs={}, tasks={}",
            self.memo.num_groups(),
            self.memo.num_exprs(),
            self.stats.tasks
        );
        Ok(())
    }

    fn single_logical_expr(&self, group: GroupId) -> Result<ExprId> {
        match self.memo.group(group)?.logical_exprs[..] {
            [expr] => Ok(expr),
            ref exprs => Err(InternalError::Invariant(format!(
                "group {} has {} logical expressions during rewrite",
                group,
                exprs.len()
            ))
            .into()),
        }
    }

    /// Search for the cheapest plan of `root` delivering `required`.
    ///
    /// Returns whether a budget ran out before the search completed.
    pub fn search(&mut self, root: GroupId, required: &PhysicalPropertySet) -> Result<bool> {
        self.tasks.push(Task::OptimizeGroup {
            group: root,
            required: required.clone(),
        });
        let Some(budget) = self.drain()? else {
            return Ok(false);
        };
        if self.memo.winner(root, required)?.is_some() {
            warn!(
                "Search stopped by {} after {} tasks; returning best plan found so far",
                budget, self.stats.tasks
            );
            Ok(true)
        } else {
            Err(self.timeout(budget))
        }
    }

    fn timeout(&self, budget: SearchBudget) -> OptimizerError {
        let elapsed_ms = self.started.elapsed().as_millis() as u64;
        warn!(
            "Search stopped by {} after {} ms and {} tasks without a plan",
            budget, elapsed_ms, self.stats.tasks
        );
        OptimizerError::Timeout {
            budget,
            elapsed_ms,
            tasks: self.stats.tasks,
        }
    }

    fn exhausted_budget(&self) -> Result<Option<SearchBudget>> {
        if self.context.cancel.load(Ordering::Relaxed) {
            return Err(OptimizerError::Cancelled);
        }
        let config = &self.context.config;
        if self.started.elapsed() >= config.search_timeout() {
            return Ok(Some(SearchBudget::Time));
        }
        if self.stats.tasks >= config.max_iterations {
            return Ok(Some(SearchBudget::Iterations));
        }
        if self.memo.num_groups() > config.max_memo_groups {
            return Ok(Some(SearchBudget::MemoGroups));
        }
        Ok(None)
    }

    /// Execute tasks until the stack is empty or a budget runs out.
    fn drain(&mut self) -> Result<Option<SearchBudget>> {
        while let Some(task) = self.tasks.pop() {
            if let Some(budget) = self.exhausted_budget()? {
                self.tasks.clear();
                return Ok(Some(budget));
            }
            self.stats.tasks += 1;
            match task {
                Task::RewriteGroup { group } => self.rewrite_group(group)?,
                Task::OptimizeGroup { group, required } => self.optimize_group(group, required)?,
                Task::OptimizeExpression {
                    expr,
                    required,
                    explore_only,
                } => self.optimize_expression(expr, required, explore_only)?,
                Task::ExploreGroup { group } => self.explore_group(group)?,
                Task::ApplyRule {
                    expr,
                    rule,
                    required,
                    explore_only,
                } => self.apply_rule(expr, rule, required, explore_only)?,
                Task::EnforceAndCost {
                    expr,
                    required,
                    child_props,
                    next_child,
                    child_cost,
                    requested,
                } => self.enforce_and_cost(expr, required, child_props, next_child, child_cost, requested)?,
                Task::DeriveBestPlan { group, required } => {
                    self.memo.set_search_state(group, &required, SearchState::Finished)?
                }
            }
        }
        Ok(None)
    }

    fn rewrite_group(&mut self, group: GroupId) -> Result<()> {
        // Groups cut off by an earlier rewrite have no consumers left.
        let Some(required) = self.rewrite_required.get(&group).cloned() else {
            return Ok(());
        };
        let context = self.context;
        let rules = context.rules.rules_of(RuleType::Rewrite, &context.config);
        let expr_id = self.single_logical_expr(group)?;
        let mut opened = Vec::new();

        for _ in 0..MAX_REWRITE_PASSES {
            let mut changed = false;
            for &rule in &rules {
                if !matches(self.memo, expr_id, &rule.pattern())? {
                    continue;
                }
                let ctx = self.opt_context(Some(&required));
                let expr = self.memo.expr(expr_id)?;
                if !rule.check(expr, self.memo, &ctx) {
                    continue;
                }
                let results = rule.apply(expr, self.memo, &ctx)?;
                let current = (expr.op.clone(), expr.children.clone());
                self.stats.rule_applications += 1;

                let mut replacement = None;
                for result in results {
                    let (op, children) = match result {
                        RuleResult::Substitution(op, children) => (op, children),
                        RuleResult::NewChildren(op, children) => {
                            let children = children
                                .into_iter()
                                .map(|child| self.materialize(child, &mut opened))
                                .collect::<Result<Vec<_>>>()?;
                            (op, children)
                        }
                    };
                    if op != current.0 || children != current.1 {
                        replacement = Some((op, children));
                        break;
                    }
                }
                if let Some((op, children)) = replacement {
                    trace!("Rewrite {} on group {}: {}", rule.name(), group, op);
                    self.memo.replace_logical_expr(group, op, children)?;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        let expr = self.memo.expr(expr_id)?;
        let Operator::Logical(op) = &expr.op else {
            return Err(InternalError::Invariant(format!("group {} lost its logical expression", group)).into());
        };
        let needed = required.union(&op.used_columns());
        for &child in &expr.children {
            let output = &self.memo.group(child)?.logical_property.output_columns;
            self.rewrite_required
                .entry(child)
                .or_default()
                .union_with(&needed.intersect(output));
        }

        // Groups opened here are rewritten next, then this group once more so that
        // it sees its rewritten children.
        if !opened.is_empty() {
            self.tasks.push(Task::RewriteGroup { group });
            for &new_group in &opened {
                self.tasks.push(Task::RewriteGroup { group: new_group });
            }
        }
        Ok(())
    }

    fn optimize_group(&mut self, group: GroupId, required: PhysicalPropertySet) -> Result<()> {
        if self.memo.winner(group, &required)?.is_some() || self.memo.search_state(group, &required)?.is_some() {
            return Ok(());
        }
        self.memo.set_search_state(group, &required, SearchState::InProgress)?;
        self.tasks.push(Task::DeriveBestPlan {
            group,
            required: required.clone(),
        });

        let g = self.memo.group(group)?;
        for &expr in g.physical_exprs.iter().rev() {
            self.tasks.push(Task::enforce_and_cost(expr, required.clone()));
        }
        for &expr in g.logical_exprs.iter().rev() {
            if !self.memo.expr(expr)?.explored {
                self.tasks.push(Task::OptimizeExpression {
                    expr,
                    required: required.clone(),
                    explore_only: false,
                });
            }
        }
        Ok(())
    }

    fn optimize_expression(&mut self, expr_id: ExprId, required: PhysicalPropertySet, explore_only: bool) -> Result<()> {
        let context = self.context;
        if !explore_only {
            self.memo.expr_mut(expr_id)?.explored = true;
        }
        let mut rules = context.rules.rules_of(RuleType::Transformation, &context.config);
        if !explore_only {
            rules.extend(context.rules.rules_of(RuleType::Implementation, &context.config));
        }

        let mut fire = Vec::new();
        let mut explore = Vec::new();
        let children = self.memo.expr(expr_id)?.children.clone();
        for rule in rules {
            if self.memo.rule_applied(expr_id, rule.rule_hash())? {
                continue;
            }
            let pattern = rule.pattern();
            if !matches(self.memo, expr_id, &pattern.root_only())? {
                continue;
            }
            if rule.rule_type() == RuleType::Transformation {
                for index in pattern.inspected_children() {
                    if let Some(&child) = children.get(index) {
                        if !explore.contains(&child) {
                            explore.push(child);
                        }
                    }
                }
            }
            fire.push(rule);
        }

        for rule in fire.into_iter().rev() {
            self.tasks.push(Task::ApplyRule {
                expr: expr_id,
                rule,
                required: required.clone(),
                explore_only,
            });
        }
        // Children are explored before any rule binds to them.
        for group in explore {
            self.tasks.push(Task::ExploreGroup { group });
        }
        Ok(())
    }

    fn explore_group(&mut self, group: GroupId) -> Result<()> {
        let g = self.memo.group_mut(group)?;
        if g.explored {
            return Ok(());
        }
        g.explored = true;
        let exprs = g.logical_exprs.clone();
        for expr in exprs.into_iter().rev() {
            self.tasks.push(Task::OptimizeExpression {
                expr,
                required: PhysicalPropertySet::any(),
                explore_only: true,
            });
        }
        Ok(())
    }

    fn apply_rule(
        &mut self,
        expr_id: ExprId,
        rule: &'a dyn Rule,
        required: PhysicalPropertySet,
        explore_only: bool,
    ) -> Result<()> {
        let hash = rule.rule_hash();
        if self.memo.rule_applied(expr_id, hash)? {
            return Ok(());
        }
        self.memo.mark_rule_applied(expr_id, hash)?;
        if !matches(self.memo, expr_id, &rule.pattern())? {
            return Ok(());
        }

        let ctx = self.opt_context(None);
        let expr = self.memo.expr(expr_id)?;
        if !rule.check(expr, self.memo, &ctx) {
            return Ok(());
        }
        let results = rule.apply(expr, self.memo, &ctx)?;
        let group = expr.group_id;
        self.stats.rule_applications += 1;
        trace!(
            "Applied {} to expr {} in group {}: {} result(s)",
            rule.name(),
            expr_id,
            group,
            results.len()
        );

        for result in results {
            let (op, children) = match result {
                RuleResult::Substitution(op, children) => (op, children),
                RuleResult::NewChildren(op, children) => {
                    let mut opened = Vec::new();
                    let children = children
                        .into_iter()
                        .map(|child| self.materialize(child, &mut opened))
                        .collect::<Result<Vec<_>>>()?;
                    (op, children)
                }
            };
            let is_logical = op.is_logical();
            let inserted = self.memo.insert_expression(op, children, Some(group), no_new_group)?;
            if !inserted.is_new {
                continue;
            }
            if is_logical {
                self.tasks.push(Task::OptimizeExpression {
                    expr: inserted.expr_id,
                    required: required.clone(),
                    explore_only,
                });
            } else if !explore_only {
                self.tasks.push(Task::enforce_and_cost(inserted.expr_id, required.clone()));
            }
        }
        Ok(())
    }

    /// Insert a rule-built child, opening new groups as needed. Opened groups are
    /// appended to `opened`, children before parents.
    fn materialize(&mut self, child: RuleChild, opened: &mut Vec<GroupId>) -> Result<GroupId> {
        match child {
            RuleChild::Group(group) => Ok(group),
            RuleChild::NewExpr(op, children) => {
                let children = children
                    .into_iter()
                    .map(|child| self.materialize(child, opened))
                    .collect::<Result<Vec<_>>>()?;
                let ctx = derive_context(self.context);
                let inserted = self.memo.insert_expression(op, children, None, |memo, op, children| {
                    derive_group_property(memo, op, children, &ctx)
                })?;
                if inserted.is_new {
                    trace!("Rule opened group {} with expr {}", inserted.group_id, inserted.expr_id);
                    opened.push(inserted.group_id);
                }
                Ok(inserted.group_id)
            }
        }
    }

    fn enforce_and_cost(
        &mut self,
        expr_id: ExprId,
        required: PhysicalPropertySet,
        child_props: Option<Vec<PhysicalPropertySet>>,
        mut next_child: usize,
        mut child_cost: Cost,
        mut requested: bool,
    ) -> Result<()> {
        let context = self.context;
        let expr = self.memo.expr(expr_id)?;
        let Operator::Physical(op) = &expr.op else {
            return Err(InternalError::Invariant(format!("expr {} is not physical", expr_id)).into());
        };
        let group = expr.group_id;
        let children = expr.children.clone();

        let Some(child_props) = child_props else {
            let inputs = children
                .iter()
                .map(|child| self.memo.group(*child).map(|g| &g.logical_property))
                .collect::<Result<Vec<_>>>()?;
            let alternatives = child_requirements(op, &required, &inputs, &context.config);
            for alternative in alternatives.into_iter().rev() {
                if alternative.len() != children.len() {
                    return Err(InternalError::Invariant(format!(
                        "{} requirements for {} children of {}",
                        alternative.len(),
                        children.len(),
                        op
                    ))
                    .into());
                }
                self.tasks.push(Task::EnforceAndCost {
                    expr: expr_id,
                    required: required.clone(),
                    child_props: Some(alternative),
                    next_child: 0,
                    child_cost: Cost::zero(),
                    requested: false,
                });
            }
            return Ok(());
        };

        while next_child < children.len() {
            let child = children[next_child];
            let props = &child_props[next_child];
            match self.memo.winner(child, props)? {
                Some(winner) => {
                    child_cost = child_cost + winner.cost;
                    next_child += 1;
                    requested = false;
                    if let Some(current) = self.memo.winner(group, &required)? {
                        if !child_cost.is_lower_than(&current.cost) {
                            trace!("Pruned expr {} in group {} at cost {:.1}", expr_id, group, child_cost.total);
                            return Ok(());
                        }
                    }
                }
                // The child was optimized for this property and nothing qualified.
                None if requested => return Ok(()),
                None => {
                    let props = props.clone();
                    self.tasks.push(Task::EnforceAndCost {
                        expr: expr_id,
                        required,
                        child_props: Some(child_props),
                        next_child,
                        child_cost,
                        requested: true,
                    });
                    self.tasks.push(Task::OptimizeGroup {
                        group: child,
                        required: props,
                    });
                    return Ok(());
                }
            }
        }

        let property = &self.memo.group(group)?.logical_property;
        let mut input_rows = Vec::with_capacity(children.len());
        let mut input_widths = Vec::with_capacity(children.len());
        let mut delivered_inputs = Vec::with_capacity(children.len());
        for (child, props) in children.iter().zip(&child_props) {
            let child_property = &self.memo.group(*child)?.logical_property;
            input_rows.push(child_property.row_count());
            input_widths.push(child_property.row_width);
            let winner = self.memo.winner(*child, props)?.ok_or_else(|| {
                InternalError::Invariant(format!("group {} lost its winner for {}", child, props))
            })?;
            delivered_inputs.push(winner.delivered());
        }
        let cost_ctx = CostContext {
            input_rows,
            input_widths,
            input_distributions: delivered_inputs.iter().map(|p| p.distribution.clone()).collect(),
            output_rows: property.row_count(),
            output_width: property.row_width,
            num_backends: context.config.num_backends,
        };
        let expr_cost = child_cost + context.cost_model.compute_cost(op, &cost_ctx);
        let expr_properties =
            delivered_properties(op, &delivered_inputs, &property.output_columns, context.catalog.as_ref());

        let Some(steps) = enforcers(&expr_properties, &required, &property.output_columns, &property.equivalences)
        else {
            trace!("Expr {} cannot be enforced to {}", expr_id, required);
            return Ok(());
        };
        let mut cost = expr_cost;
        let mut current = expr_properties.clone();
        let mut enforcer_steps = Vec::with_capacity(steps.len());
        for (enforcer, properties) in steps {
            let enforcer_ctx = CostContext {
                input_rows: vec![property.row_count()],
                input_widths: vec![property.row_width],
                input_distributions: vec![current.distribution.clone()],
                output_rows: property.row_count(),
                output_width: property.row_width,
                num_backends: context.config.num_backends,
            };
            cost = cost + context.cost_model.compute_cost(&enforcer, &enforcer_ctx);
            current = properties.clone();
            enforcer_steps.push(EnforcerStep {
                op: enforcer,
                properties,
                cost,
            });
        }

        let winner = Winner {
            expr_id,
            cost,
            expr_cost,
            expr_properties,
            child_props,
            enforcers: enforcer_steps,
        };
        if self.memo.update_winner(group, &required, winner)? {
            trace!("New winner for group {} {}: expr {} cost={:.1}", group, required, expr_id, cost.total);
        }
        Ok(())
    }
}
