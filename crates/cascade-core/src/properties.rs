//! # Physical and Logical Properties
//!
//! Properties describe characteristics of a plan's output.
//!
//! ## Logical Properties
//!
//! Logical properties are shared by every expression in a group: which columns are
//! produced, how many rows are expected, and which columns are known to hold equal
//! values (from equi-join or equality filter predicates). They are derived once,
//! when a group is created.
//!
//! ## Physical Properties
//!
//! Physical properties describe how the output is laid out at runtime:
//! - **Distribution**: how rows are spread across nodes (one node, every node,
//!   hash partitioned on some columns, or "don't care").
//! - **Sort order**: whether the output arrives ordered by some keys.
//!
//! A `PhysicalPropertySet` is both the *requirement* attached to a search request
//! for a group and the *delivered* description of a costed plan. Winners are
//! memoized per required set.
//!
//! ## Property Enforcement
//!
//! When a plan does not deliver what its consumer requires, the optimizer places
//! enforcers (exchange, sort) on top of it; see [`crate::enforce`].

use crate::column::{ColumnId, ColumnRefSet};
use crate::expr::SortKey;
use crate::stats::Statistics;
use std::fmt;

/// Properties shared by all expressions in a group.
#[derive(Debug, Clone, Default)]
pub struct LogicalProperty {
    /// Columns produced by this group.
    pub output_columns: ColumnRefSet,
    /// Average width of one output row in bytes.
    pub row_width: f64,
    pub statistics: Statistics,
    /// Column pairs known to hold equal values in every output row.
    pub equivalences: Vec<(ColumnId, ColumnId)>,
}

impl LogicalProperty {
    pub fn row_count(&self) -> f64 {
        self.statistics.row_count
    }

    /// Whether `a` and `b` are the same column or transitively equivalent.
    pub fn are_equivalent(&self, a: ColumnId, b: ColumnId) -> bool {
        are_equivalent(&self.equivalences, a, b)
    }
}

pub(crate) fn are_equivalent(equivalences: &[(ColumnId, ColumnId)], a: ColumnId, b: ColumnId) -> bool {
    if a == b {
        return true;
    }
    let mut reached = ColumnRefSet::new();
    reached.insert(a);
    let mut frontier = vec![a];
    while let Some(column) = frontier.pop() {
        for &(x, y) in equivalences {
            let next = if x == column {
                y
            } else if y == column {
                x
            } else {
                continue;
            };
            if next == b {
                return true;
            }
            if reached.insert(next) {
                frontier.push(next);
            }
        }
    }
    false
}

/// Data distribution across worker nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum DistributionSpec {
    /// No requirement / unknown layout.
    #[default]
    Any,
    /// All rows on one node.
    Singleton,
    /// Every node holds all rows.
    Broadcast,
    /// Rows partitioned by the hash of these columns, in this order.
    Hash(Vec<ColumnId>),
}

impl DistributionSpec {
    /// Whether data laid out as `provided` meets this requirement.
    ///
    /// Hash requirements need the same columns in the same positions, modulo
    /// column equivalences; both inputs of a shuffle join must be partitioned
    /// identically for matching keys to meet.
    pub fn satisfied_by(&self, provided: &DistributionSpec, equivalences: &[(ColumnId, ColumnId)]) -> bool {
        match (self, provided) {
            (DistributionSpec::Any, _) => true,
            (DistributionSpec::Singleton, DistributionSpec::Singleton) => true,
            (DistributionSpec::Broadcast, DistributionSpec::Broadcast) => true,
            (DistributionSpec::Hash(required), DistributionSpec::Hash(provided)) => {
                required.len() == provided.len()
                    && required
                        .iter()
                        .zip(provided)
                        .all(|(r, p)| are_equivalent(equivalences, *r, *p))
            }
            _ => false,
        }
    }

    pub fn columns(&self) -> ColumnRefSet {
        match self {
            DistributionSpec::Hash(columns) => columns.iter().copied().collect(),
            _ => ColumnRefSet::new(),
        }
    }
}

impl fmt::Display for DistributionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DistributionSpec::Any => write!(f, "ANY"),
            DistributionSpec::Singleton => write!(f, "SINGLETON"),
            DistributionSpec::Broadcast => write!(f, "BROADCAST"),
            DistributionSpec::Hash(columns) => {
                write!(f, "HASH(")?;
                for (i, c) in columns.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", c)?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Physical properties: required by a consumer or delivered by a plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct PhysicalPropertySet {
    pub distribution: DistributionSpec,
    pub sort_order: Option<Vec<SortKey>>,
}

impl PhysicalPropertySet {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn with_distribution(distribution: DistributionSpec) -> Self {
        Self {
            distribution,
            sort_order: None,
        }
    }

    pub fn singleton() -> Self {
        Self::with_distribution(DistributionSpec::Singleton)
    }

    pub fn is_any(&self) -> bool {
        self.distribution == DistributionSpec::Any && self.sort_order.is_none()
    }

    /// Check if this requirement is satisfied by the provided properties.
    ///
    /// - **Sort**: the required order must be a prefix of the provided order;
    ///   `ORDER BY a` is satisfied by data sorted on `a, b`.
    /// - **Distribution**: see [`DistributionSpec::satisfied_by`].
    pub fn satisfied_by(&self, provided: &PhysicalPropertySet, equivalences: &[(ColumnId, ColumnId)]) -> bool {
        self.sort_satisfied_by(provided) && self.distribution.satisfied_by(&provided.distribution, equivalences)
    }

    pub fn sort_satisfied_by(&self, provided: &PhysicalPropertySet) -> bool {
        match (&self.sort_order, &provided.sort_order) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(required), Some(provided)) => {
                required.len() <= provided.len() && required.iter().zip(provided).all(|(r, p)| r == p)
            }
        }
    }

    /// Every column the requirement mentions.
    pub fn columns(&self) -> ColumnRefSet {
        let mut columns = self.distribution.columns();
        if let Some(order) = &self.sort_order {
            columns.extend(order.iter().map(|k| k.column.id));
        }
        columns
    }
}

impl fmt::Display for PhysicalPropertySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{dist: {}", self.distribution)?;
        if let Some(order) = &self.sort_order {
            write!(f, ", sort: [")?;
            for (i, key) in order.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", key)?;
            }
            write!(f, "]")?;
        }
        write!(f, "}}")
    }
}
