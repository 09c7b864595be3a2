//! # Rule System
//!
//! This module defines the rule trait and rule registry that drive the Cascades optimizer.
//!
//! ## Rule Types
//!
//! - **Rewrite rules** (`RuleType::Rewrite`): run once, top-down, before the search.
//!   They replace a group's only logical expression with a cheaper equivalent that
//!   is always better (column pruning, merging a filter into a scan, extracting
//!   common sub-expressions). They see the columns required from the group.
//!
//! - **Transformation rules** (`RuleType::Transformation`): Rewrite a logical operator
//!   into an equivalent logical operator. They expand the search space by generating
//!   alternatives, for example join commutativity (A JOIN B -> B JOIN A).
//!
//! - **Implementation rules** (`RuleType::Implementation`): Map a logical operator to
//!   one or more physical operators, for example a logical Join to a HashJoin.
//!
//! ## Purity
//!
//! Rules never touch the memo. They read the matched expression and its child
//! groups and return [`RuleResult`]s; the search engine inserts them.
//!
//! ## Rule Deduplication
//!
//! Each rule has a `rule_hash()` fingerprint. The memo tracks which rules have already
//! been applied to each expression to prevent infinite loops (e.g., commutativity
//! swapping back and forth) and redundant work.

use crate::catalog::Catalog;
use crate::column::{ColumnRefFactory, ColumnRefSet};
use crate::config::OptimizerConfig;
use crate::error::Result;
use crate::expr::Operator;
use crate::memo::{GroupExpression, GroupId, Memo};
use crate::pattern::Pattern;
use std::hash::{Hash, Hasher};

/// Classification of optimization rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleType {
    /// Logical → Logical replacement before the search (e.g., column pruning).
    Rewrite,
    /// Logical → Logical transformation (e.g., join commutativity).
    Transformation,
    /// Logical → Physical implementation (e.g., join → hash join).
    Implementation,
}

/// Context passed to rules during application.
pub struct OptContext<'a> {
    pub catalog: &'a dyn Catalog,
    pub column_factory: &'a ColumnRefFactory,
    pub config: &'a OptimizerConfig,
    /// Columns the consumers of the matched group need. Only set for rewrite rules.
    pub required_columns: Option<&'a ColumnRefSet>,
    /// Number of joins in the query being optimized.
    pub join_count: usize,
}

/// A child reference in a rule result — either an existing group or a new sub-expression.
///
/// This is the mechanism that enables rules like join associativity, which need to
/// create new intermediate groups. For example, the transformation:
///
/// ```text
/// (A ⋈ B) ⋈ C  →  A ⋈ (B ⋈ C)
/// ```
///
/// requires creating a *new group* for `B ⋈ C`. The rule expresses this by returning
/// `RuleChild::NewExpr(Join, [Group(B), Group(C)])`, and the search engine creates
/// the new group when inserting the rule result into the memo.
#[derive(Debug, Clone)]
pub enum RuleChild {
    /// Reference to an existing group in the memo.
    Group(GroupId),
    /// A new sub-expression that the search engine should place in a new group.
    NewExpr(Operator, Vec<RuleChild>),
}

/// Result of applying a rule to an expression.
#[derive(Debug, Clone)]
pub enum RuleResult {
    /// A new expression for the matched group over existing child groups.
    Substitution(Operator, Vec<GroupId>),
    /// A new expression where some children are new sub-expressions needing their
    /// own groups.
    NewChildren(Operator, Vec<RuleChild>),
}

/// A rule transforms or implements expressions.
pub trait Rule: Send + Sync {
    /// Unique name of this rule; also the name used to disable it in the config.
    fn name(&self) -> &str;

    fn rule_type(&self) -> RuleType;

    /// Pattern that this rule matches against.
    fn pattern(&self) -> Pattern;

    /// Cheap applicability check run after the pattern matched.
    fn check(&self, _expr: &GroupExpression, _memo: &Memo, _ctx: &OptContext) -> bool {
        true
    }

    /// Apply the rule to a matching expression, producing equivalent expressions.
    fn apply(&self, expr: &GroupExpression, memo: &Memo, ctx: &OptContext) -> Result<Vec<RuleResult>>;

    /// Hash for fingerprinting (to avoid re-applying rules).
    fn rule_hash(&self) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.name().hash(&mut hasher);
        hasher.finish()
    }
}

/// Registry of optimization rules, kept in registration order.
#[derive(Default)]
pub struct RuleRegistry {
    rules: Vec<Box<dyn Rule>>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_rule(&mut self, rule: Box<dyn Rule>) {
        self.rules.push(rule);
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Enabled rules of one type, in registration order.
    pub fn rules_of(&self, rule_type: RuleType, config: &OptimizerConfig) -> Vec<&dyn Rule> {
        self.rules
            .iter()
            .map(|r| r.as_ref())
            .filter(|r| r.rule_type() == rule_type && config.is_rule_enabled(r.name()))
            .collect()
    }
}
