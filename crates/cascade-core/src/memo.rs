//! # Memo
//!
//! The memo is the optimizer's search space: a set of **groups**, each an
//! equivalence class of expressions producing the same result, and the
//! **group expressions** inside them (an operator whose inputs are groups, not
//! concrete subtrees).
//!
//! ## Storage
//!
//! Groups and expressions live in two arenas indexed by `GroupId` / `ExprId`.
//! Every cross reference is an id, so the whole memo is dropped in one piece once
//! the best plan has been extracted. Nothing outlives an optimization.
//!
//! ## Deduplication
//!
//! An expression is identified by its operator (kind and payload) plus its child
//! group ids. Inserting an expression that already exists anywhere in the memo
//! returns the existing one instead of adding a copy. Because compound predicates
//! are canonical, `a AND b` and `b AND a` deduplicate too.
//!
//! ## Winners
//!
//! For every (group, required physical property) pair the memo keeps the cheapest
//! physical implementation found so far. A candidate replaces the winner only if it
//! is strictly cheaper, so among equal-cost plans the first one found stays.
//! Enforcers (exchange, sort) placed on top of a winner are recorded with it rather
//! than inserted as group expressions.

use crate::column::ColumnRefSet;
use crate::cost::Cost;
use crate::error::{InternalError, OptimizerError, Result};
use crate::expr::{Operator, PhysicalOperator};
use crate::plan::PlanNode;
use crate::properties::{LogicalProperty, PhysicalPropertySet};
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupId(pub u32);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExprId(pub u32);

impl fmt::Display for ExprId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Progress of the search for one (group, required property) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchState {
    InProgress,
    Finished,
}

/// A group of logically equivalent expressions.
#[derive(Debug)]
pub struct Group {
    pub id: GroupId,
    pub logical_exprs: Vec<ExprId>,
    pub physical_exprs: Vec<ExprId>,
    pub logical_property: LogicalProperty,
    pub winners: HashMap<PhysicalPropertySet, Winner>,
    pub search_state: HashMap<PhysicalPropertySet, SearchState>,
    /// Transformation rules have been applied to every logical expression.
    pub explored: bool,
}

/// An operator whose inputs are groups.
#[derive(Debug)]
pub struct GroupExpression {
    pub id: ExprId,
    pub group_id: GroupId,
    pub op: Operator,
    pub children: Vec<GroupId>,
    /// Fingerprints of rules already applied to this expression.
    pub applied_rules: HashSet<u64>,
    /// Transformation and implementation rules have been scheduled for it.
    pub explored: bool,
}

/// One enforcer placed on top of a winning expression.
#[derive(Debug, Clone)]
pub struct EnforcerStep {
    pub op: PhysicalOperator,
    /// Properties delivered after this step.
    pub properties: PhysicalPropertySet,
    /// Cumulative cost including this step.
    pub cost: Cost,
}

/// Best plan found for a (group, required property) pair.
#[derive(Debug, Clone)]
pub struct Winner {
    pub expr_id: ExprId,
    /// Total cost, enforcers included.
    pub cost: Cost,
    /// Cost of the expression subtree before enforcers.
    pub expr_cost: Cost,
    /// Properties the expression itself delivers.
    pub expr_properties: PhysicalPropertySet,
    /// Property each child group was optimized for.
    pub child_props: Vec<PhysicalPropertySet>,
    pub enforcers: Vec<EnforcerStep>,
}

impl Winner {
    /// Properties of the final output, after enforcers.
    pub fn delivered(&self) -> &PhysicalPropertySet {
        self.enforcers
            .last()
            .map(|step| &step.properties)
            .unwrap_or(&self.expr_properties)
    }
}

/// Outcome of `Memo::insert_expression`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inserted {
    pub expr_id: ExprId,
    pub group_id: GroupId,
    /// False when an identical expression already existed.
    pub is_new: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ExprFingerprint {
    op: Operator,
    children: Vec<GroupId>,
}

/// The memo table.
#[derive(Debug, Default)]
pub struct Memo {
    groups: Vec<Group>,
    exprs: Vec<GroupExpression>,
    fingerprints: HashMap<ExprFingerprint, ExprId>,
}

impl Memo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_groups(&self) -> usize {
        self.groups.len()
    }

    pub fn num_exprs(&self) -> usize {
        self.exprs.len()
    }

    pub fn groups(&self) -> impl Iterator<Item = &Group> {
        self.groups.iter()
    }

    pub fn group(&self, id: GroupId) -> Result<&Group> {
        self.groups
            .get(id.0 as usize)
            .ok_or_else(|| InternalError::UnknownGroup(id).into())
    }

    pub fn group_mut(&mut self, id: GroupId) -> Result<&mut Group> {
        self.groups
            .get_mut(id.0 as usize)
            .ok_or_else(|| InternalError::UnknownGroup(id).into())
    }

    pub fn expr(&self, id: ExprId) -> Result<&GroupExpression> {
        self.exprs
            .get(id.0 as usize)
            .ok_or_else(|| InternalError::UnknownExpr(id).into())
    }

    pub fn expr_mut(&mut self, id: ExprId) -> Result<&mut GroupExpression> {
        self.exprs
            .get_mut(id.0 as usize)
            .ok_or_else(|| InternalError::UnknownExpr(id).into())
    }

    /// Insert `op` over `children`, deduplicating against every existing expression.
    ///
    /// A new expression goes into `target` when given, otherwise into a new group
    /// whose logical property `derive` computes; `derive` is not called for
    /// duplicates or targeted inserts. An identical expression that already lives
    /// in another group is returned as is.
    pub fn insert_expression<F>(
        &mut self,
        op: Operator,
        children: Vec<GroupId>,
        target: Option<GroupId>,
        derive: F,
    ) -> Result<Inserted>
    where
        F: FnOnce(&Memo, &Operator, &[GroupId]) -> Result<LogicalProperty>,
    {
        for child in &children {
            self.group(*child)?;
        }
        if let Some(target) = target {
            self.group(target)?;
            if children.contains(&target) {
                return Err(InternalError::Cycle(target).into());
            }
        }

        let fingerprint = ExprFingerprint { op, children };
        if let Some(&existing) = self.fingerprints.get(&fingerprint) {
            let group_id = self.expr(existing)?.group_id;
            if target.is_some_and(|t| t != group_id) {
                trace!("expr {} already lives in group {}, not in target {:?}", existing, group_id, target);
            }
            return Ok(Inserted {
                expr_id: existing,
                group_id,
                is_new: false,
            });
        }

        let group_id = match target {
            Some(target) => target,
            None => {
                let property = derive(&*self, &fingerprint.op, &fingerprint.children)?;
                let id = GroupId(self.groups.len() as u32);
                self.groups.push(Group {
                    id,
                    logical_exprs: Vec::new(),
                    physical_exprs: Vec::new(),
                    logical_property: property,
                    winners: HashMap::new(),
                    search_state: HashMap::new(),
                    explored: false,
                });
                id
            }
        };

        let expr_id = ExprId(self.exprs.len() as u32);
        let is_logical = fingerprint.op.is_logical();
        self.exprs.push(GroupExpression {
            id: expr_id,
            group_id,
            op: fingerprint.op.clone(),
            children: fingerprint.children.clone(),
            applied_rules: HashSet::new(),
            explored: false,
        });
        self.fingerprints.insert(fingerprint, expr_id);

        let group = self.group_mut(group_id)?;
        if is_logical {
            group.logical_exprs.push(expr_id);
        } else {
            group.physical_exprs.push(expr_id);
        }
        Ok(Inserted {
            expr_id,
            group_id,
            is_new: true,
        })
    }

    /// Replace the single logical expression of `group` in place.
    ///
    /// Only valid before exploration, while every group holds exactly one logical
    /// expression and no physical ones.
    pub fn replace_logical_expr(&mut self, group: GroupId, op: Operator, children: Vec<GroupId>) -> Result<ExprId> {
        for child in &children {
            self.group(*child)?;
        }
        if children.contains(&group) {
            return Err(InternalError::Cycle(group).into());
        }
        let g = self.group(group)?;
        let [expr_id] = g.logical_exprs[..] else {
            return Err(InternalError::Invariant(format!(
                "group {} has {} logical expressions, expected one",
                group,
                g.logical_exprs.len()
            ))
            .into());
        };
        if !g.physical_exprs.is_empty() || !op.is_logical() {
            return Err(InternalError::Invariant(format!("group {} was replaced after implementation", group)).into());
        }

        let expr = self.expr_mut(expr_id)?;
        let old = ExprFingerprint {
            op: std::mem::replace(&mut expr.op, op.clone()),
            children: std::mem::replace(&mut expr.children, children.clone()),
        };
        if self.fingerprints.get(&old) == Some(&expr_id) {
            self.fingerprints.remove(&old);
        }
        self.fingerprints
            .entry(ExprFingerprint { op, children })
            .or_insert(expr_id);
        Ok(expr_id)
    }

    pub fn set_logical_property(&mut self, group: GroupId, property: LogicalProperty) -> Result<()> {
        self.group_mut(group)?.logical_property = property;
        Ok(())
    }

    pub fn rule_applied(&self, expr: ExprId, rule_hash: u64) -> Result<bool> {
        Ok(self.expr(expr)?.applied_rules.contains(&rule_hash))
    }

    pub fn mark_rule_applied(&mut self, expr: ExprId, rule_hash: u64) -> Result<()> {
        self.expr_mut(expr)?.applied_rules.insert(rule_hash);
        Ok(())
    }

    pub fn winner(&self, group: GroupId, required: &PhysicalPropertySet) -> Result<Option<&Winner>> {
        Ok(self.group(group)?.winners.get(required))
    }

    /// Record `candidate` if it is strictly cheaper than the current winner.
    pub fn update_winner(&mut self, group: GroupId, required: &PhysicalPropertySet, candidate: Winner) -> Result<bool> {
        let winners = &mut self.group_mut(group)?.winners;
        match winners.get(required) {
            Some(current) if !candidate.cost.is_lower_than(&current.cost) => Ok(false),
            _ => {
                winners.insert(required.clone(), candidate);
                Ok(true)
            }
        }
    }

    pub fn search_state(&self, group: GroupId, required: &PhysicalPropertySet) -> Result<Option<SearchState>> {
        Ok(self.group(group)?.search_state.get(required).copied())
    }

    pub fn set_search_state(&mut self, group: GroupId, required: &PhysicalPropertySet, state: SearchState) -> Result<()> {
        self.group_mut(group)?.search_state.insert(required.clone(), state);
        Ok(())
    }

    /// Build the physical plan tree of the winner for (`root`, `required`).
    ///
    /// Every node is checked to read only columns its inputs produce; a violation
    /// means an earlier rewrite dropped a column that is still needed.
    pub fn extract_best_plan(&self, root: GroupId, required: &PhysicalPropertySet) -> Result<PlanNode> {
        let group = self.group(root)?;
        let winner = group.winners.get(required).ok_or_else(|| OptimizerError::NoPlan {
            group: root,
            required: required.clone(),
        })?;
        let expr = self.expr(winner.expr_id)?;
        let Operator::Physical(op) = &expr.op else {
            return Err(InternalError::Invariant(format!("winner {} of group {} is logical", expr.id, root)).into());
        };
        if expr.children.len() != winner.child_props.len() {
            return Err(InternalError::Invariant(format!(
                "winner {} has {} children but {} child properties",
                expr.id,
                expr.children.len(),
                winner.child_props.len()
            ))
            .into());
        }

        let inputs = expr
            .children
            .iter()
            .zip(&winner.child_props)
            .map(|(child, props)| self.extract_best_plan(*child, props))
            .collect::<Result<Vec<_>>>()?;

        let available = match op {
            PhysicalOperator::Scan { columns, .. } => ColumnRefSet::from_refs(columns),
            _ => inputs.iter().fold(ColumnRefSet::new(), |acc, input| acc.union(&input.output_columns)),
        };
        let missing = op.used_columns().except(&available);
        if !missing.is_empty() {
            return Err(InternalError::MissingColumns {
                context: op.to_string(),
                missing,
            }
            .into());
        }

        let property = &group.logical_property;
        let mut node = PlanNode {
            op: op.clone(),
            inputs,
            output_columns: property.output_columns.clone(),
            row_count: property.row_count(),
            properties: winner.expr_properties.clone(),
            cost: winner.expr_cost,
        };
        for step in &winner.enforcers {
            node = PlanNode {
                op: step.op.clone(),
                output_columns: property.output_columns.clone(),
                row_count: property.row_count(),
                properties: step.properties.clone(),
                cost: step.cost,
                inputs: vec![node],
            };
        }
        Ok(node)
    }
}
