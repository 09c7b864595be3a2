//! # Cost Model
//!
//! This module defines the cost abstraction and a default cost model for the optimizer.
//!
//! ## Multi-Dimensional Cost Model
//!
//! Query execution cost depends on CPU time, memory consumption, and network
//! transfer. The `DefaultCostModel` uses a weighted sum of these three dimensions to
//! collapse them into a single comparable `Cost` value:
//!
//! ```text
//! total_cost = cpu_weight * cpu_cost + memory_weight * memory_cost + network_weight * network_cost
//! ```
//!
//! The default weights (1.0, 1.0, 10.0) make network I/O the most expensive
//! dimension, since data movement dominates distributed execution.
//!
//! ## Cost Accumulation
//!
//! `CostModel::compute_cost` returns an operator's **local** cost. The search adds
//! the accumulated costs of the chosen child plans and of any enforcers placed on
//! top, so the cost of a plan is the sum over all of its nodes.
//!
//! ## Broadcast vs. Shuffle
//!
//! A join can either replicate its smaller input to every node (broadcast) or
//! repartition both inputs on the join keys (shuffle). [`can_broadcast`] decides
//! whether the broadcast alternative is considered at all; when both are allowed
//! the cost model picks the cheaper one.

use crate::config::OptimizerConfig;
use crate::expr::PhysicalOperator;
use crate::properties::DistributionSpec;
use serde::{Deserialize, Serialize};
use std::ops::Add;

/// Cost is a single comparable value representing the estimated expense of a plan.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Cost {
    /// The total weighted cost. Lower is better.
    pub total: f64,
}

impl Cost {
    pub fn zero() -> Self {
        Self { total: 0.0 }
    }

    pub fn new(total: f64) -> Self {
        Self { total }
    }

    /// Strictly cheaper than `other`; equal costs are not lower.
    pub fn is_lower_than(&self, other: &Cost) -> bool {
        self.total < other.total && self != other
    }
}

/// Relative tolerance of cost equality.
const COST_EPSILON: f64 = 1e-9;

/// Costs within `COST_EPSILON` of the larger magnitude are equal, so sums of the
/// same terms in a different order compare equal at any scale.
impl PartialEq for Cost {
    fn eq(&self, other: &Self) -> bool {
        let scale = self.total.abs().max(other.total.abs()).max(1.0);
        (self.total - other.total).abs() <= COST_EPSILON * scale
    }
}

impl PartialOrd for Cost {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.total.partial_cmp(&other.total)
    }
}

impl Add for Cost {
    type Output = Cost;

    fn add(self, rhs: Cost) -> Cost {
        Cost::new(self.total + rhs.total)
    }
}

/// Inputs to the cost of one physical operator.
#[derive(Debug, Clone)]
pub struct CostContext {
    /// Estimated rows of each input, in input order.
    pub input_rows: Vec<f64>,
    /// Average row width in bytes of each input.
    pub input_widths: Vec<f64>,
    /// Distribution each input is delivered in.
    pub input_distributions: Vec<DistributionSpec>,
    pub output_rows: f64,
    pub output_width: f64,
    pub num_backends: usize,
}

impl CostContext {
    fn rows(&self, input: usize) -> f64 {
        self.input_rows.get(input).copied().unwrap_or(self.output_rows)
    }

    fn width(&self, input: usize) -> f64 {
        self.input_widths.get(input).copied().unwrap_or(self.output_width)
    }

    fn backends(&self) -> f64 {
        self.num_backends.max(1) as f64
    }
}

/// Trait for pluggable cost models.
pub trait CostModel: Send + Sync {
    /// Local cost of `op`, excluding its inputs.
    fn compute_cost(&self, op: &PhysicalOperator, ctx: &CostContext) -> Cost;
}

/// Default cost model inspired by Presto's multi-dimensional cost model.
///
/// Each physical operator's cost is computed as a weighted sum of three dimensions:
/// - **CPU**: proportional to the number of rows processed or comparisons made.
/// - **Memory**: proportional to the amount of data held in memory (e.g., hash table).
/// - **Network**: proportional to the bytes transferred across nodes (exchanges).
#[derive(Debug, Clone)]
pub struct DefaultCostModel {
    /// Weight for CPU-bound operations (row processing, comparisons).
    pub cpu_weight: f64,
    /// Weight for memory-bound operations (hash table construction, buffering).
    pub memory_weight: f64,
    /// Weight for network-bound operations (exchange/shuffle between nodes).
    pub network_weight: f64,
}

impl Default for DefaultCostModel {
    fn default() -> Self {
        Self {
            cpu_weight: 1.0,
            memory_weight: 1.0,
            network_weight: 10.0,
        }
    }
}

impl CostModel for DefaultCostModel {
    fn compute_cost(&self, op: &PhysicalOperator, ctx: &CostContext) -> Cost {
        let local = match op {
            PhysicalOperator::Scan { .. } => self.cpu_weight * ctx.output_rows,
            PhysicalOperator::Filter { .. } | PhysicalOperator::Project { .. } => self.cpu_weight * ctx.rows(0),
            // Probe every left row, build a hash table over the right input. A
            // broadcast build side is materialized on every node.
            PhysicalOperator::HashJoin { .. } => {
                let build = self.memory_weight * ctx.rows(1) * ctx.width(1) * self.build_copies(ctx);
                self.cpu_weight * (ctx.rows(0) + ctx.rows(1)) + build
            }
            // O(n * m): every left row is compared with every right row.
            PhysicalOperator::NestedLoopJoin { .. } => {
                let build = self.memory_weight * ctx.rows(1) * ctx.width(1) * self.build_copies(ctx);
                self.cpu_weight * ctx.rows(0) * ctx.rows(1) + build
            }
            PhysicalOperator::HashAggregate { .. } => {
                self.cpu_weight * ctx.rows(0) + self.memory_weight * ctx.output_rows * ctx.output_width
            }
            PhysicalOperator::Sort { .. } => {
                let rows = ctx.rows(0);
                let n_log_n = if rows > 1.0 { rows * rows.log2() } else { 1.0 };
                self.cpu_weight * n_log_n + self.memory_weight * rows * ctx.width(0)
            }
            PhysicalOperator::Limit { .. } => self.cpu_weight * ctx.output_rows,
            PhysicalOperator::Exchange { distribution } => {
                let bytes = ctx.rows(0) * ctx.width(0);
                match distribution {
                    DistributionSpec::Any => 0.0,
                    DistributionSpec::Broadcast => self.network_weight * bytes * ctx.backends(),
                    DistributionSpec::Hash(_) | DistributionSpec::Singleton => self.network_weight * bytes,
                }
            }
        };
        Cost::new(local)
    }
}

impl DefaultCostModel {
    fn build_copies(&self, ctx: &CostContext) -> f64 {
        match ctx.input_distributions.get(1) {
            Some(DistributionSpec::Broadcast) => ctx.backends(),
            _ => 1.0,
        }
    }
}

/// Whether an input of `small_rows` rows may be broadcast to join a peer of
/// `peer_rows` rows: it must be small both absolutely and relative to its peer.
pub fn can_broadcast(small_rows: f64, peer_rows: f64, config: &OptimizerConfig) -> bool {
    if small_rows > config.broadcast_row_limit as f64 {
        return false;
    }
    if peer_rows <= 0.0 {
        return small_rows <= 0.0;
    }
    small_rows / peer_rows <= config.broadcast_max_ratio
}
