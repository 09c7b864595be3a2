//! Optimizer configuration.
//!
//! All knobs have defaults so a config can be built with `OptimizerConfig::default()`
//! or loaded from a partial JSON document such as `{"search_timeout_ms": 10000}`.

use crate::error::{OptimizerError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

/// Per-query limits and toggles for the Cascades search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Join reordering (associativity) only runs for queries with at most this many joins.
    pub max_reorder_joins: usize,
    /// Wall-clock budget for the search, checked between tasks.
    pub search_timeout_ms: u64,
    /// Upper bound on scheduler tasks executed.
    pub max_iterations: usize,
    /// Upper bound on the number of groups the memo may contain.
    pub max_memo_groups: usize,
    /// Rules (by name) that must not fire.
    pub disabled_rules: BTreeSet<String>,
    /// The broadcast side of a join may have at most this many rows.
    pub broadcast_row_limit: u64,
    /// The broadcast side may be at most this fraction of its peer's rows.
    pub broadcast_max_ratio: f64,
    /// Number of worker nodes data is spread across.
    pub num_backends: usize,
    /// Allow splitting aggregates into local and global stages.
    pub enable_two_stage_agg: bool,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_reorder_joins: 4,
            search_timeout_ms: 3000,
            max_iterations: 1_000_000,
            max_memo_groups: 100_000,
            disabled_rules: BTreeSet::new(),
            broadcast_row_limit: 15_000_000,
            broadcast_max_ratio: 0.5,
            num_backends: 3,
            enable_two_stage_agg: true,
        }
    }
}

impl OptimizerConfig {
    /// Parse a (possibly partial) JSON document; missing fields keep their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: OptimizerConfig =
            serde_json::from_str(text).map_err(|e| OptimizerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_backends == 0 {
            return Err(OptimizerError::Config("num_backends must be at least 1".into()));
        }
        if !(self.broadcast_max_ratio > 0.0) {
            return Err(OptimizerError::Config(format!(
                "broadcast_max_ratio must be positive, got {}",
                self.broadcast_max_ratio
            )));
        }
        Ok(())
    }

    pub fn search_timeout(&self) -> Duration {
        Duration::from_millis(self.search_timeout_ms)
    }

    pub fn is_rule_enabled(&self, name: &str) -> bool {
        !self.disabled_rules.contains(name)
    }

    pub fn disable_rule(mut self, name: impl Into<String>) -> Self {
        self.disabled_rules.insert(name.into());
        self
    }
}
