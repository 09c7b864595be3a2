//! # Statistics for Cost-Based Optimization
//!
//! Statistics flow in two shapes:
//!
//! - **Table-level** (`TableStatistics`): what the catalog knows about a stored
//!   table, keyed by column *name*. Row count plus per-column NDV and null fraction.
//! - **Group-level** (`Statistics`): the estimate attached to a memo group's logical
//!   property, keyed by `ColumnId` so it follows columns through joins, projections
//!   and aggregations.
//!
//! ## Derivation Formulas
//!
//! Statistics for intermediate plan nodes are derived bottom-up:
//!
//! - **Filter**: output_rows = input_rows * selectivity. Column NDVs are scaled
//!   proportionally to the row reduction ratio.
//! - **Join**: output_rows = |left| * |right| / max(NDV_left_key, NDV_right_key).
//!   This is the standard equi-join cardinality formula assuming uniform distribution.
//! - **Aggregate**: output_rows = product of NDVs of group-by columns, capped by input rows.
//! - **Limit**: output_rows = min(input_rows, limit).
//!
//! ## Selectivity Estimation
//!
//! - **Equality with a constant**: 1 / NDV (uniform distribution assumption).
//! - **Range**: fixed 1/3 heuristic.
//! - **Default**: 0.1 (10%) when no better estimate is available.

use crate::column::{ColumnId, ColumnRef};
use crate::expr::JoinType;
use crate::scalar::{BinaryType, CompoundType, ScalarOperator};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Row count assumed for tables the catalog has no statistics for.
pub const DEFAULT_ROW_COUNT: f64 = 1000.0;

/// Default filter selectivity when we can't determine it.
pub const DEFAULT_FILTER_SELECTIVITY: f64 = 0.1;

/// Selectivity of a range comparison.
pub const RANGE_SELECTIVITY: f64 = 1.0 / 3.0;

/// Statistics of a stored table, as reported by the catalog.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableStatistics {
    pub row_count: f64,
    /// Per-column statistics keyed by column name.
    #[serde(default)]
    pub columns: HashMap<String, ColumnStatistics>,
}

impl TableStatistics {
    pub fn new(row_count: f64) -> Self {
        Self {
            row_count,
            columns: HashMap::new(),
        }
    }

    pub fn with_column(mut self, name: impl Into<String>, stats: ColumnStatistics) -> Self {
        self.columns.insert(name.into(), stats);
        self
    }
}

/// Per-column statistics used for selectivity estimation and cost modeling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnStatistics {
    /// Number of distinct values (NDV). Used for equality selectivity: sel = 1/NDV.
    pub distinct_count: f64,
    /// Fraction of rows that are NULL [0.0, 1.0].
    #[serde(default)]
    pub null_fraction: f64,
}

impl ColumnStatistics {
    pub fn new(distinct_count: f64, null_fraction: f64) -> Self {
        Self {
            distinct_count,
            null_fraction,
        }
    }
}

/// Estimated statistics of a memo group's output.
#[derive(Debug, Clone, Default)]
pub struct Statistics {
    pub row_count: f64,
    pub column_stats: HashMap<ColumnId, ColumnStatistics>,
}

impl Statistics {
    pub fn new(row_count: f64) -> Self {
        Self {
            row_count,
            column_stats: HashMap::new(),
        }
    }

    /// NDV of a column; without statistics every row is assumed distinct.
    pub fn distinct_count(&self, column: ColumnId) -> f64 {
        self.column_stats
            .get(&column)
            .map(|s| s.distinct_count)
            .unwrap_or(self.row_count)
            .max(1.0)
    }

    /// Keep only the statistics of the given columns.
    pub fn retain_columns(&mut self, keep: impl Fn(ColumnId) -> bool) {
        self.column_stats.retain(|id, _| keep(*id));
    }
}

/// Statistics of a scan over `columns` of a table.
pub fn derive_scan_stats(table: Option<&TableStatistics>, columns: &[ColumnRef]) -> Statistics {
    let Some(table) = table else {
        return Statistics::new(DEFAULT_ROW_COUNT);
    };
    let mut stats = Statistics::new(table.row_count.max(1.0));
    for column in columns {
        if let Some(cs) = table.columns.get(&column.name) {
            stats.column_stats.insert(column.id, cs.clone());
        }
    }
    stats
}

/// Derive statistics for filter output.
///
/// Applies the given selectivity to the input statistics:
/// - Output rows = input rows * selectivity (floored at 1).
/// - Column NDVs are scaled by the same ratio, clamped to [1, row_count].
pub fn derive_filter_stats(input: &Statistics, selectivity: f64) -> Statistics {
    let row_count = (input.row_count * selectivity).max(1.0);
    let ratio = if input.row_count > 0.0 {
        row_count / input.row_count
    } else {
        1.0
    };

    let column_stats = input
        .column_stats
        .iter()
        .map(|(id, stats)| {
            let mut cs = stats.clone();
            cs.distinct_count = (cs.distinct_count * ratio).max(1.0).min(row_count);
            (*id, cs)
        })
        .collect();

    Statistics {
        row_count,
        column_stats,
    }
}

/// Derive statistics for join output.
///
/// Uses the standard cardinality estimation formula for equi-joins:
///
/// ```text
/// |A JOIN B| = |A| * |B| / max(NDV(A.key), NDV(B.key))
/// ```
///
/// For multi-column joins, selectivities are multiplied (independence assumption).
/// `residual_selectivity` covers the non-equi part of the join condition.
/// Outer joins never return fewer rows than their preserved side; semi and anti
/// joins never return more rows than their left input.
pub fn derive_join_stats(
    left: &Statistics,
    right: &Statistics,
    join_type: JoinType,
    keys: &[(ColumnId, ColumnId)],
    residual_selectivity: f64,
) -> Statistics {
    let mut selectivity = residual_selectivity;
    for (left_col, right_col) in keys {
        let max_ndv = left.distinct_count(*left_col).max(right.distinct_count(*right_col));
        selectivity /= max_ndv;
    }

    let inner_rows = (left.row_count * right.row_count * selectivity).max(1.0);
    let row_count = match join_type {
        JoinType::Inner | JoinType::Cross => inner_rows,
        JoinType::LeftOuter => inner_rows.max(left.row_count),
        JoinType::RightOuter => inner_rows.max(right.row_count),
        JoinType::FullOuter => inner_rows.max(left.row_count + right.row_count),
        JoinType::LeftSemi => inner_rows.min(left.row_count),
        JoinType::LeftAnti => (left.row_count - inner_rows.min(left.row_count)).max(1.0),
    };

    let mut column_stats = HashMap::new();
    let sides = if join_type.outputs_right() {
        vec![left, right]
    } else {
        vec![left]
    };
    for side in sides {
        for (id, stats) in &side.column_stats {
            let mut cs = stats.clone();
            cs.distinct_count = cs.distinct_count.min(row_count);
            column_stats.insert(*id, cs);
        }
    }

    Statistics {
        row_count,
        column_stats,
    }
}

/// Derive statistics for aggregate output.
///
/// The number of output groups is estimated as the product of NDVs of all group-by
/// columns, capped by the input row count. A global aggregate (no group-by columns)
/// always returns one row.
pub fn derive_aggregate_stats(input: &Statistics, group_by: &[ColumnId]) -> Statistics {
    let mut row_count = 1.0_f64;
    for col in group_by {
        row_count *= input.distinct_count(*col);
    }
    row_count = row_count.min(input.row_count).max(1.0);

    let column_stats = group_by
        .iter()
        .filter_map(|id| {
            input.column_stats.get(id).map(|cs| {
                let mut cs = cs.clone();
                cs.distinct_count = cs.distinct_count.min(row_count);
                (*id, cs)
            })
        })
        .collect();

    Statistics {
        row_count,
        column_stats,
    }
}

pub fn derive_limit_stats(input: &Statistics, limit: u64) -> Statistics {
    let row_count = input.row_count.min(limit as f64).max(1.0);
    let mut stats = input.clone();
    stats.row_count = row_count;
    for cs in stats.column_stats.values_mut() {
        cs.distinct_count = cs.distinct_count.min(row_count);
    }
    stats
}

/// Estimate the fraction of input rows a predicate keeps.
pub fn estimate_selectivity(predicate: &ScalarOperator, stats: &Statistics) -> f64 {
    let selectivity = match predicate {
        ScalarOperator::BinaryPredicate { op, left, right } => match (left.as_column(), right.as_column()) {
            (Some(l), Some(r)) if *op == BinaryType::Eq => {
                1.0 / stats.distinct_count(l.id).max(stats.distinct_count(r.id))
            }
            (Some(c), None) | (None, Some(c)) => match op {
                BinaryType::Eq => 1.0 / stats.distinct_count(c.id),
                BinaryType::NotEq => 1.0 - 1.0 / stats.distinct_count(c.id),
                _ => RANGE_SELECTIVITY,
            },
            _ => match op {
                BinaryType::Eq => DEFAULT_FILTER_SELECTIVITY,
                BinaryType::NotEq => 1.0 - DEFAULT_FILTER_SELECTIVITY,
                _ => RANGE_SELECTIVITY,
            },
        },
        ScalarOperator::Compound(compound) => {
            let children = compound.children();
            match compound.compound_type() {
                CompoundType::And => children.iter().map(|c| estimate_selectivity(c, stats)).product(),
                CompoundType::Or => {
                    // P(a or b) = 1 - (1 - P(a)) * (1 - P(b))
                    1.0 - children
                        .iter()
                        .map(|c| 1.0 - estimate_selectivity(c, stats))
                        .product::<f64>()
                }
                CompoundType::Not => 1.0 - estimate_selectivity(&children[0], stats),
            }
        }
        ScalarOperator::IsNull { child, negated } => {
            let null_fraction = child
                .as_column()
                .and_then(|c| stats.column_stats.get(&c.id))
                .map(|cs| cs.null_fraction)
                .unwrap_or(DEFAULT_FILTER_SELECTIVITY);
            if *negated {
                1.0 - null_fraction
            } else {
                null_fraction
            }
        }
        ScalarOperator::Constant(crate::scalar::ScalarValue::Bool(true), _) => 1.0,
        ScalarOperator::Constant(..) => 0.0,
        _ => DEFAULT_FILTER_SELECTIVITY,
    };
    selectivity.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::ColumnRefFactory;
    use crate::scalar::{CompoundPredicate, DataType};

    fn stats_with(rows: f64, cols: &[(u32, f64)]) -> Statistics {
        let mut stats = Statistics::new(rows);
        for (id, ndv) in cols {
            stats.column_stats.insert(ColumnId(*id), ColumnStatistics::new(*ndv, 0.0));
        }
        stats
    }

    #[test]
    fn test_equi_join_cardinality() {
        let orders = stats_with(1_500_000.0, &[(1, 1_500_000.0)]);
        let lineitem = stats_with(6_000_000.0, &[(2, 1_500_000.0)]);
        let joined = derive_join_stats(&lineitem, &orders, JoinType::Inner, &[(ColumnId(2), ColumnId(1))], 1.0);
        assert_eq!(joined.row_count, 6_000_000.0);

        let cross = derive_join_stats(&lineitem, &orders, JoinType::Cross, &[], 1.0);
        assert_eq!(cross.row_count, 6_000_000.0 * 1_500_000.0);

        let semi = derive_join_stats(&lineitem, &orders, JoinType::LeftSemi, &[(ColumnId(2), ColumnId(1))], 1.0);
        assert!(semi.row_count <= lineitem.row_count);
        assert!(!semi.column_stats.contains_key(&ColumnId(1)));
    }

    #[test]
    fn test_aggregate_rows_capped_by_input() {
        let input = stats_with(100.0, &[(1, 10.0), (2, 50.0)]);
        assert_eq!(derive_aggregate_stats(&input, &[ColumnId(1)]).row_count, 10.0);
        assert_eq!(derive_aggregate_stats(&input, &[ColumnId(1), ColumnId(2)]).row_count, 100.0);
        assert_eq!(derive_aggregate_stats(&input, &[]).row_count, 1.0);
    }

    #[test]
    fn test_selectivity_estimates() {
        let factory = ColumnRefFactory::new();
        let a = factory.create("a", DataType::Int, true);
        let stats = stats_with(1000.0, &[(a.id.0, 20.0)]);
        let eq = ScalarOperator::binary(BinaryType::Eq, ScalarOperator::column(&a), ScalarOperator::int(3));
        assert!((estimate_selectivity(&eq, &stats) - 0.05).abs() < 1e-9);

        let range = ScalarOperator::binary(BinaryType::Gt, ScalarOperator::column(&a), ScalarOperator::int(3));
        let both = CompoundPredicate::and(vec![eq.clone(), range.clone()]);
        assert!((estimate_selectivity(&both, &stats) - 0.05 / 3.0).abs() < 1e-9);

        let either = CompoundPredicate::or(vec![eq, range]);
        let s = estimate_selectivity(&either, &stats);
        assert!(s > 1.0 / 3.0 && s < 1.0);
    }

    #[test]
    fn test_filter_and_limit_scale_ndv() {
        let input = stats_with(1000.0, &[(1, 500.0)]);
        let filtered = derive_filter_stats(&input, 0.1);
        assert_eq!(filtered.row_count, 100.0);
        assert_eq!(filtered.distinct_count(ColumnId(1)), 50.0);

        let limited = derive_limit_stats(&input, 10);
        assert_eq!(limited.row_count, 10.0);
        assert_eq!(limited.distinct_count(ColumnId(1)), 10.0);
    }
}
