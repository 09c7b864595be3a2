//! # Optimizer Errors
//!
//! Failures that cross the `optimize()` boundary fall into two categories:
//!
//! - **Query errors** (`TypeCheck`, `NoPlan`, `Timeout`, `Cancelled`, `Config`):
//!   the query cannot be planned as written or within the configured budget. The
//!   caller reports these back to the user and may retry with different settings.
//! - **Internal errors** (`Internal`): the optimizer broke one of its own
//!   invariants (dangling ids, cyclic memo, pruned columns that are still needed).
//!   These are defects, never user mistakes, and the current optimization must not
//!   continue after one is raised.
//!
//! `OptimizerError::is_internal()` lets the caller route the two categories
//! differently (e.g. a user-facing message vs. a bug report).

use crate::column::ColumnRefSet;
use crate::memo::{ExprId, GroupId};
use crate::properties::PhysicalPropertySet;
use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, OptimizerError>;

/// The search budget that stopped the optimizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchBudget {
    Time,
    Iterations,
    MemoGroups,
}

impl fmt::Display for SearchBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchBudget::Time => write!(f, "search timeout"),
            SearchBudget::Iterations => write!(f, "iteration limit"),
            SearchBudget::MemoGroups => write!(f, "memo group limit"),
        }
    }
}

#[derive(Debug, Error)]
pub enum OptimizerError {
    /// A declared column type disagrees with the type its expression derives.
    #[error("Type check failed. {0}")]
    TypeCheck(String),

    /// The search finished but nothing satisfies the required properties.
    #[error("no physical plan for group {group} satisfies {required}")]
    NoPlan {
        group: GroupId,
        required: PhysicalPropertySet,
    },

    /// A budget ran out before the root group had any winner.
    #[error("optimizer reached its {budget} after {elapsed_ms} ms and {tasks} tasks without a plan")]
    Timeout {
        budget: SearchBudget,
        elapsed_ms: u64,
        tasks: usize,
    },

    #[error("optimization was cancelled")]
    Cancelled,

    #[error("invalid optimizer configuration: {0}")]
    Config(String),

    #[error("internal optimizer error: {0}")]
    Internal(#[from] InternalError),
}

impl OptimizerError {
    /// Whether this error is an optimizer defect rather than a query-level failure.
    pub fn is_internal(&self) -> bool {
        matches!(self, OptimizerError::Internal(_))
    }
}

/// Internal consistency violations. Never recoverable.
#[derive(Debug, Error)]
pub enum InternalError {
    #[error("group {0} does not exist")]
    UnknownGroup(GroupId),

    #[error("group expression {0} does not exist")]
    UnknownExpr(ExprId),

    #[error("expression inserted into group {0} uses that group as an input")]
    Cycle(GroupId),

    #[error("{context} needs columns {missing} that its inputs do not produce")]
    MissingColumns {
        context: String,
        missing: ColumnRefSet,
    },

    #[error("{0}")]
    Invariant(String),
}
