//! # cascade-core: Cascades Query Optimizer Core
//!
//! This crate implements the core data structures and algorithms for a Cascades-style
//! cost-based query optimizer: a logical operator tree goes in, the cheapest physical
//! plan under a distributed cost model comes out.
//!
//! ## Module Overview
//!
//! - **`scalar`**: Scalar expressions, including canonical AND/OR/NOT predicates.
//! - **`column`**: Column references and the per-query registry that mints them.
//! - **`expr`**: Logical and physical operators and the `ExprTree` input format.
//! - **`memo`**: The Memo table, which compactly represents the search space with
//!   groups of equivalent expressions.
//! - **`derive`**: Logical property derivation and type checks for new groups.
//! - **`rule`**: The Rule trait and RuleRegistry for rewrite, transformation and
//!   implementation rules.
//! - **`pattern`**: Declarative pattern matching for rule applicability checks.
//! - **`search`**: The task-stack driven Cascades search with memoization.
//! - **`enforce`**: Child requirements, delivered properties and enforcers.
//! - **`cost`**: Cost model trait and default implementation (CPU/memory/network weighted).
//! - **`stats`**: Statistics structures and derivation formulas for cardinality estimation.
//! - **`properties`**: Logical and physical property definitions (distribution, sort order).
//! - **`catalog`**: Catalog trait for accessing table metadata and statistics.
//! - **`config`**: Search budgets and rule toggles.
//! - **`optimizer`**: The entry point that runs a query through all phases.

pub mod catalog;
pub mod column;
pub mod config;
pub mod cost;
pub mod derive;
pub mod enforce;
pub mod error;
pub mod expr;
pub mod memo;
pub mod optimizer;
pub mod pattern;
pub mod plan;
pub mod properties;
pub mod rule;
pub mod scalar;
pub mod search;
pub mod stats;

pub use error::{OptimizerError, Result};
pub use optimizer::{OptimizedPlan, Optimizer, OptimizerContext};
