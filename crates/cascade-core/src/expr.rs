//! # Relational Operators and Expression Trees
//!
//! This module defines the relational operator model used throughout the optimizer:
//!
//! - **Logical operators** (`LogicalOperator`) describe *what* to compute: scan a
//!   table, filter rows, join two inputs, aggregate. They are the optimizer's input
//!   and the subject of transformation rules.
//! - **Physical operators** (`PhysicalOperator`) describe *how* to compute it: hash
//!   join vs. nested-loop join, hash aggregation in one or two stages, exchanges
//!   that redistribute data between nodes. They are produced by implementation rules
//!   and costed by the cost model.
//!
//! Both sets are closed sum types. Kind-specific behavior (used columns, display,
//! pattern matching) is an exhaustive `match` over the variant; a new operator
//! therefore fails to compile until every behavior handles it.
//!
//! ## Column References
//!
//! Operators never refer to columns by name. Every input and output column is a
//! [`ColumnRef`] minted by the query's column factory, so output-column and
//! required-column computations are set operations over ids.
//!
//! ## Expression Trees
//!
//! [`ExprTree`] is the optimizer's external input format: an operator paired with
//! its ordered inputs. It has no memoization and is never modified in place.

use crate::column::{ColumnId, ColumnRef, ColumnRefSet};
use crate::properties::DistributionSpec;
use crate::scalar::{AggCall, BinaryType, ScalarOperator};
use std::collections::HashMap;
use std::fmt;

/// A table reference with schema qualification.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub schema: String,
    pub name: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// Join types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinType {
    Inner,
    LeftOuter,
    RightOuter,
    FullOuter,
    LeftSemi,
    LeftAnti,
    Cross,
}

impl JoinType {
    /// Semi and anti joins only output the left input's columns.
    pub fn outputs_right(&self) -> bool {
        !matches!(self, JoinType::LeftSemi | JoinType::LeftAnti)
    }

    /// Whether the right input may be replicated to every node.
    ///
    /// Right and full outer joins must see all right rows in one place to emit
    /// the unmatched ones exactly once.
    pub fn can_broadcast_right(&self) -> bool {
        !matches!(self, JoinType::RightOuter | JoinType::FullOuter)
    }
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JoinType::Inner => "INNER",
            JoinType::LeftOuter => "LEFT OUTER",
            JoinType::RightOuter => "RIGHT OUTER",
            JoinType::FullOuter => "FULL OUTER",
            JoinType::LeftSemi => "LEFT SEMI",
            JoinType::LeftAnti => "LEFT ANTI",
            JoinType::Cross => "CROSS",
        };
        write!(f, "{}", name)
    }
}

/// Sort key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SortKey {
    pub column: ColumnRef,
    pub ascending: bool,
    pub nulls_first: bool,
}

impl SortKey {
    pub fn asc(column: &ColumnRef) -> Self {
        Self {
            column: column.clone(),
            ascending: true,
            nulls_first: true,
        }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.column, if self.ascending { "ASC" } else { "DESC" })
    }
}

/// Stage of an aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggStage {
    /// Produces final results; sees every row of a group.
    Global,
    /// Pre-aggregates on each node before data is redistributed.
    Local,
}

/// Output projection of an operator.
///
/// `columns` lists the produced columns in output order. `common_sub_operators`
/// holds sub-expressions shared by several outputs; they are evaluated first and
/// referenced from `columns` through their own column refs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Projection {
    pub columns: Vec<(ColumnRef, ScalarOperator)>,
    pub common_sub_operators: Vec<(ColumnRef, ScalarOperator)>,
}

impl Projection {
    pub fn new(columns: Vec<(ColumnRef, ScalarOperator)>) -> Self {
        Self {
            columns,
            common_sub_operators: Vec::new(),
        }
    }

    pub fn output_columns(&self) -> ColumnRefSet {
        ColumnRefSet::from_refs(self.columns.iter().map(|(c, _)| c))
    }

    /// Input columns this projection reads.
    pub fn used_columns(&self) -> ColumnRefSet {
        let mut used = ColumnRefSet::new();
        for (_, expr) in self.columns.iter().chain(self.common_sub_operators.iter()) {
            used.union_with(&expr.used_columns());
        }
        let computed = ColumnRefSet::from_refs(self.common_sub_operators.iter().map(|(c, _)| c));
        used.except(&computed)
    }

    /// Each output column mapped to its expression over the projection's input,
    /// with common sub-expressions inlined.
    pub fn substitution(&self) -> HashMap<ColumnId, ScalarOperator> {
        let mut common = HashMap::new();
        for (column, expr) in &self.common_sub_operators {
            let inlined = expr.substitute(&common);
            common.insert(column.id, inlined);
        }
        self.columns
            .iter()
            .map(|(column, expr)| (column.id, expr.substitute(&common)))
            .collect()
    }
}

impl fmt::Display for Projection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (column, expr)) in self.columns.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} := {}", column, expr)?;
        }
        if !self.common_sub_operators.is_empty() {
            write!(f, " with ")?;
            for (i, (column, expr)) in self.common_sub_operators.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{} := {}", column, expr)?;
            }
        }
        Ok(())
    }
}

/// Logical operators.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LogicalOperator {
    /// Table scan. `projection`, when present, replaces `columns` as the output.
    Scan {
        table: TableRef,
        columns: Vec<ColumnRef>,
        predicate: Option<ScalarOperator>,
        projection: Option<Projection>,
    },
    Filter {
        predicate: ScalarOperator,
    },
    Project {
        projection: Projection,
    },
    Join {
        join_type: JoinType,
        predicate: Option<ScalarOperator>,
    },
    Aggregate {
        stage: AggStage,
        group_by: Vec<ColumnRef>,
        aggregations: Vec<(ColumnRef, AggCall)>,
        /// Set on a global aggregate whose input is already a local stage.
        split: bool,
    },
    Sort {
        order: Vec<SortKey>,
    },
    Limit {
        limit: u64,
        offset: u64,
    },
}

/// Logical operator kind, without payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalOpKind {
    Scan,
    Filter,
    Project,
    Join,
    Aggregate,
    Sort,
    Limit,
}

impl LogicalOperator {
    pub fn kind(&self) -> LogicalOpKind {
        match self {
            LogicalOperator::Scan { .. } => LogicalOpKind::Scan,
            LogicalOperator::Filter { .. } => LogicalOpKind::Filter,
            LogicalOperator::Project { .. } => LogicalOpKind::Project,
            LogicalOperator::Join { .. } => LogicalOpKind::Join,
            LogicalOperator::Aggregate { .. } => LogicalOpKind::Aggregate,
            LogicalOperator::Sort { .. } => LogicalOpKind::Sort,
            LogicalOperator::Limit { .. } => LogicalOpKind::Limit,
        }
    }

    /// A new table scan with no predicate or projection.
    pub fn scan(table: TableRef, columns: Vec<ColumnRef>) -> Self {
        LogicalOperator::Scan {
            table,
            columns,
            predicate: None,
            projection: None,
        }
    }

    /// Columns this operator reads from its inputs (for a scan: from the table).
    pub fn used_columns(&self) -> ColumnRefSet {
        match self {
            LogicalOperator::Scan {
                predicate,
                projection,
                ..
            } => {
                let mut used = predicate.as_ref().map(|p| p.used_columns()).unwrap_or_default();
                if let Some(projection) = projection {
                    used.union_with(&projection.used_columns());
                }
                used
            }
            LogicalOperator::Filter { predicate } => predicate.used_columns(),
            LogicalOperator::Project { projection } => projection.used_columns(),
            LogicalOperator::Join { predicate, .. } => {
                predicate.as_ref().map(|p| p.used_columns()).unwrap_or_default()
            }
            LogicalOperator::Aggregate {
                group_by,
                aggregations,
                ..
            } => {
                let mut used = ColumnRefSet::from_refs(group_by);
                for (_, call) in aggregations {
                    used.union_with(&call.used_columns());
                }
                used
            }
            LogicalOperator::Sort { order } => ColumnRefSet::from_refs(order.iter().map(|k| &k.column)),
            LogicalOperator::Limit { .. } => ColumnRefSet::new(),
        }
    }

    /// Copy of a scan with different columns.
    pub fn with_columns(&self, new_columns: Vec<ColumnRef>) -> Option<Self> {
        match self {
            LogicalOperator::Scan {
                table,
                predicate,
                projection,
                ..
            } => Some(LogicalOperator::Scan {
                table: table.clone(),
                columns: new_columns,
                predicate: predicate.clone(),
                projection: projection.clone(),
            }),
            _ => None,
        }
    }

    /// Copy of a scan, filter or join with a different predicate.
    pub fn with_predicate(&self, new_predicate: Option<ScalarOperator>) -> Option<Self> {
        match self {
            LogicalOperator::Scan {
                table,
                columns,
                projection,
                ..
            } => Some(LogicalOperator::Scan {
                table: table.clone(),
                columns: columns.clone(),
                predicate: new_predicate,
                projection: projection.clone(),
            }),
            LogicalOperator::Filter { .. } => {
                new_predicate.map(|predicate| LogicalOperator::Filter { predicate })
            }
            LogicalOperator::Join { join_type, .. } => Some(LogicalOperator::Join {
                join_type: *join_type,
                predicate: new_predicate,
            }),
            _ => None,
        }
    }

    /// Copy of a scan or project with a different projection.
    pub fn with_projection(&self, new_projection: Option<Projection>) -> Option<Self> {
        match self {
            LogicalOperator::Scan {
                table,
                columns,
                predicate,
                ..
            } => Some(LogicalOperator::Scan {
                table: table.clone(),
                columns: columns.clone(),
                predicate: predicate.clone(),
                projection: new_projection,
            }),
            LogicalOperator::Project { .. } => {
                new_projection.map(|projection| LogicalOperator::Project { projection })
            }
            _ => None,
        }
    }
}

/// Physical operators.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PhysicalOperator {
    Scan {
        table: TableRef,
        columns: Vec<ColumnRef>,
        predicate: Option<ScalarOperator>,
        projection: Option<Projection>,
    },
    Filter {
        predicate: ScalarOperator,
    },
    Project {
        projection: Projection,
    },
    /// Hash join; builds on the right input. `predicate` is the full join
    /// condition, `left_keys[i] = right_keys[i]` are its equi-conjuncts.
    HashJoin {
        join_type: JoinType,
        predicate: Option<ScalarOperator>,
        left_keys: Vec<ColumnRef>,
        right_keys: Vec<ColumnRef>,
    },
    NestedLoopJoin {
        join_type: JoinType,
        predicate: Option<ScalarOperator>,
    },
    HashAggregate {
        stage: AggStage,
        group_by: Vec<ColumnRef>,
        aggregations: Vec<(ColumnRef, AggCall)>,
    },
    Sort {
        order: Vec<SortKey>,
    },
    Limit {
        limit: u64,
        offset: u64,
    },
    /// Redistributes rows between nodes. Only ever created as an enforcer.
    Exchange {
        distribution: DistributionSpec,
    },
}

/// Physical operator kind, without payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhysicalOpKind {
    Scan,
    Filter,
    Project,
    HashJoin,
    NestedLoopJoin,
    HashAggregate,
    Sort,
    Limit,
    Exchange,
}

impl PhysicalOperator {
    pub fn kind(&self) -> PhysicalOpKind {
        match self {
            PhysicalOperator::Scan { .. } => PhysicalOpKind::Scan,
            PhysicalOperator::Filter { .. } => PhysicalOpKind::Filter,
            PhysicalOperator::Project { .. } => PhysicalOpKind::Project,
            PhysicalOperator::HashJoin { .. } => PhysicalOpKind::HashJoin,
            PhysicalOperator::NestedLoopJoin { .. } => PhysicalOpKind::NestedLoopJoin,
            PhysicalOperator::HashAggregate { .. } => PhysicalOpKind::HashAggregate,
            PhysicalOperator::Sort { .. } => PhysicalOpKind::Sort,
            PhysicalOperator::Limit { .. } => PhysicalOpKind::Limit,
            PhysicalOperator::Exchange { .. } => PhysicalOpKind::Exchange,
        }
    }

    /// The predicate this operator evaluates, if any.
    pub fn predicate(&self) -> Option<&ScalarOperator> {
        match self {
            PhysicalOperator::Scan { predicate, .. }
            | PhysicalOperator::HashJoin { predicate, .. }
            | PhysicalOperator::NestedLoopJoin { predicate, .. } => predicate.as_ref(),
            PhysicalOperator::Filter { predicate } => Some(predicate),
            _ => None,
        }
    }

    /// The projection this operator computes, if any.
    pub fn projection(&self) -> Option<&Projection> {
        match self {
            PhysicalOperator::Scan { projection, .. } => projection.as_ref(),
            PhysicalOperator::Project { projection } => Some(projection),
            _ => None,
        }
    }

    /// Columns this operator reads from its inputs (for a scan: from the table).
    pub fn used_columns(&self) -> ColumnRefSet {
        let mut used = self.predicate().map(|p| p.used_columns()).unwrap_or_default();
        if let Some(projection) = self.projection() {
            used.union_with(&projection.used_columns());
        }
        match self {
            PhysicalOperator::HashJoin {
                left_keys,
                right_keys,
                ..
            } => {
                used.extend(left_keys.iter().chain(right_keys).map(|c| c.id));
            }
            PhysicalOperator::HashAggregate {
                group_by,
                aggregations,
                ..
            } => {
                used.extend(group_by.iter().map(|c| c.id));
                for (_, call) in aggregations {
                    used.union_with(&call.used_columns());
                }
            }
            PhysicalOperator::Sort { order } => used.extend(order.iter().map(|k| k.column.id)),
            PhysicalOperator::Exchange {
                distribution: DistributionSpec::Hash(columns),
            } => used.extend(columns.iter().copied()),
            _ => {}
        }
        used
    }
}

/// An operator of either level.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operator {
    Logical(LogicalOperator),
    Physical(PhysicalOperator),
}

/// Operator kind, without payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Logical(LogicalOpKind),
    Physical(PhysicalOpKind),
}

impl Operator {
    pub fn kind(&self) -> OpKind {
        match self {
            Operator::Logical(op) => OpKind::Logical(op.kind()),
            Operator::Physical(op) => OpKind::Physical(op.kind()),
        }
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, Operator::Logical(_))
    }

    pub fn as_logical(&self) -> Option<&LogicalOperator> {
        match self {
            Operator::Logical(op) => Some(op),
            Operator::Physical(_) => None,
        }
    }

    pub fn as_physical(&self) -> Option<&PhysicalOperator> {
        match self {
            Operator::Physical(op) => Some(op),
            Operator::Logical(_) => None,
        }
    }
}

impl From<LogicalOperator> for Operator {
    fn from(op: LogicalOperator) -> Self {
        Operator::Logical(op)
    }
}

impl From<PhysicalOperator> for Operator {
    fn from(op: PhysicalOperator) -> Self {
        Operator::Physical(op)
    }
}

/// An operator with its ordered inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct ExprTree {
    pub op: Operator,
    pub inputs: Vec<ExprTree>,
}

impl ExprTree {
    pub fn new(op: impl Into<Operator>, inputs: Vec<ExprTree>) -> Self {
        Self {
            op: op.into(),
            inputs,
        }
    }

    pub fn leaf(op: impl Into<Operator>) -> Self {
        Self::new(op, vec![])
    }

    /// Number of logical joins in the tree.
    pub fn join_count(&self) -> usize {
        let own = usize::from(matches!(self.op, Operator::Logical(LogicalOperator::Join { .. })));
        own + self.inputs.iter().map(ExprTree::join_count).sum::<usize>()
    }
}

/// Extract the equi-join column pairs of a join predicate.
///
/// Returns `(left, right)` pairs for every `a = b` conjunct where one side is a
/// column of the left input and the other a column of the right input; the pair
/// is oriented so the first column always comes from the left input.
pub fn extract_equi_conjuncts(
    predicate: Option<&ScalarOperator>,
    left_columns: &ColumnRefSet,
    right_columns: &ColumnRefSet,
) -> Vec<(ColumnRef, ColumnRef)> {
    let Some(predicate) = predicate else {
        return vec![];
    };
    predicate
        .conjuncts()
        .iter()
        .filter_map(|conjunct| {
            let ScalarOperator::BinaryPredicate {
                op: BinaryType::Eq,
                left,
                right,
            } = conjunct
            else {
                return None;
            };
            let (l, r) = (left.as_column()?, right.as_column()?);
            if left_columns.contains(l.id) && right_columns.contains(r.id) {
                Some((l.clone(), r.clone()))
            } else if left_columns.contains(r.id) && right_columns.contains(l.id) {
                Some((r.clone(), l.clone()))
            } else {
                None
            }
        })
        .collect()
}

fn fmt_predicate(f: &mut fmt::Formatter<'_>, predicate: &Option<ScalarOperator>) -> fmt::Result {
    match predicate {
        Some(p) => write!(f, ", {}", p),
        None => Ok(()),
    }
}

fn fmt_columns(f: &mut fmt::Formatter<'_>, columns: &[ColumnRef]) -> fmt::Result {
    for (i, c) in columns.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", c)?;
    }
    Ok(())
}

fn fmt_aggregations(f: &mut fmt::Formatter<'_>, aggregations: &[(ColumnRef, AggCall)]) -> fmt::Result {
    for (column, call) in aggregations {
        write!(f, ", {} := {}", column, call)?;
    }
    Ok(())
}

impl fmt::Display for LogicalOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogicalOperator::Scan {
                table,
                columns,
                predicate,
                projection,
            } => {
                write!(f, "LogicalScan[{}: ", table)?;
                fmt_columns(f, columns)?;
                fmt_predicate(f, predicate)?;
                if let Some(p) = projection {
                    write!(f, " | {}", p)?;
                }
                write!(f, "]")
            }
            LogicalOperator::Filter { predicate } => write!(f, "LogicalFilter[{}]", predicate),
            LogicalOperator::Project { projection } => write!(f, "LogicalProject[{}]", projection),
            LogicalOperator::Join {
                join_type,
                predicate,
            } => {
                write!(f, "LogicalJoin[{}", join_type)?;
                fmt_predicate(f, predicate)?;
                write!(f, "]")
            }
            LogicalOperator::Aggregate {
                stage,
                group_by,
                aggregations,
                split,
            } => {
                write!(f, "LogicalAggregate[{:?}{}, by ", stage, if *split { " split" } else { "" })?;
                fmt_columns(f, group_by)?;
                fmt_aggregations(f, aggregations)?;
                write!(f, "]")
            }
            LogicalOperator::Sort { order } => {
                write!(f, "LogicalSort[")?;
                for (i, key) in order.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", key)?;
                }
                write!(f, "]")
            }
            LogicalOperator::Limit { limit, offset } => {
                write!(f, "LogicalLimit[{} offset {}]", limit, offset)
            }
        }
    }
}

impl fmt::Display for PhysicalOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhysicalOperator::Scan {
                table,
                columns,
                predicate,
                projection,
            } => {
                write!(f, "Scan[{}: ", table)?;
                fmt_columns(f, columns)?;
                fmt_predicate(f, predicate)?;
                if let Some(p) = projection {
                    write!(f, " | {}", p)?;
                }
                write!(f, "]")
            }
            PhysicalOperator::Filter { predicate } => write!(f, "Filter[{}]", predicate),
            PhysicalOperator::Project { projection } => write!(f, "Project[{}]", projection),
            PhysicalOperator::HashJoin {
                join_type,
                predicate,
                ..
            } => {
                write!(f, "HashJoin[{}", join_type)?;
                fmt_predicate(f, predicate)?;
                write!(f, "]")
            }
            PhysicalOperator::NestedLoopJoin {
                join_type,
                predicate,
            } => {
                write!(f, "NestedLoopJoin[{}", join_type)?;
                fmt_predicate(f, predicate)?;
                write!(f, "]")
            }
            PhysicalOperator::HashAggregate {
                stage,
                group_by,
                aggregations,
            } => {
                write!(f, "HashAggregate[{:?}, by ", stage)?;
                fmt_columns(f, group_by)?;
                fmt_aggregations(f, aggregations)?;
                write!(f, "]")
            }
            PhysicalOperator::Sort { order } => {
                write!(f, "Sort[")?;
                for (i, key) in order.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", key)?;
                }
                write!(f, "]")
            }
            PhysicalOperator::Limit { limit, offset } => write!(f, "Limit[{} offset {}]", limit, offset),
            PhysicalOperator::Exchange { distribution } => write!(f, "Exchange[{}]", distribution),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operator::Logical(op) => write!(f, "{}", op),
            Operator::Physical(op) => write!(f, "{}", op),
        }
    }
}
