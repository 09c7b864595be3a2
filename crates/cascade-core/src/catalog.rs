//! # Catalog Interface
//!
//! The catalog provides the optimizer with the statistics it needs to compare
//! alternative plans: table row counts, column NDVs, and how a table's rows are
//! laid out across worker nodes.
//!
//! ## Trait Design
//!
//! The `Catalog` trait is intentionally minimal and behind a trait object (`dyn Catalog`)
//! so that different metadata backends can be plugged in. Lookups are assumed to be
//! synchronous and side-effect free; the optimizer may call them repeatedly and does
//! not cache results. For testing, `InMemoryCatalog` is populated programmatically.
//!
//! ## Key Lookups
//!
//! Tables are identified by `TableRef` (schema + name). The provided methods
//! `row_count`, `distinct_count` and `distribution_of` are the statistics calls the
//! optimizer makes; implementors only supply the two raw lookups.

use crate::expr::TableRef;
use crate::stats::TableStatistics;
use std::collections::HashMap;

/// How a stored table's rows are spread across worker nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TableDistribution {
    /// No known placement.
    #[default]
    Random,
    /// Hash partitioned on these columns, by name.
    Hash(Vec<String>),
}

/// Catalog provides table statistics and placement.
pub trait Catalog: Send + Sync {
    fn get_table_stats(&self, table: &TableRef) -> Option<TableStatistics>;

    fn get_table_distribution(&self, table: &TableRef) -> Option<TableDistribution>;

    fn row_count(&self, table: &TableRef) -> Option<u64> {
        self.get_table_stats(table).map(|s| s.row_count.max(0.0) as u64)
    }

    fn distinct_count(&self, table: &TableRef, column: &str) -> Option<u64> {
        self.get_table_stats(table)
            .and_then(|s| s.columns.get(column).map(|c| c.distinct_count.max(0.0) as u64))
    }

    /// Placement of `table`; unknown tables are treated as randomly distributed.
    fn distribution_of(&self, table: &TableRef) -> TableDistribution {
        self.get_table_distribution(table).unwrap_or_default()
    }
}

/// In-memory catalog for testing and development.
///
/// Tables are keyed by their fully-qualified name (`schema.table`).
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    table_stats: HashMap<String, TableStatistics>,
    distributions: HashMap<String, TableDistribution>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(&mut self, table: &TableRef, stats: TableStatistics) {
        self.table_stats.insert(table.to_string(), stats);
    }

    pub fn set_distribution(&mut self, table: &TableRef, distribution: TableDistribution) {
        self.distributions.insert(table.to_string(), distribution);
    }
}

impl Catalog for InMemoryCatalog {
    fn get_table_stats(&self, table: &TableRef) -> Option<TableStatistics> {
        self.table_stats.get(&table.to_string()).cloned()
    }

    fn get_table_distribution(&self, table: &TableRef) -> Option<TableDistribution> {
        self.distributions.get(&table.to_string()).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::ColumnStatistics;

    #[test]
    fn test_in_memory_lookups() {
        let mut catalog = InMemoryCatalog::new();
        let orders = TableRef::new("tpch", "orders");
        catalog.add_table(
            &orders,
            TableStatistics::new(1_500_000.0).with_column("o_custkey", ColumnStatistics::new(100_000.0, 0.0)),
        );
        catalog.set_distribution(&orders, TableDistribution::Hash(vec!["o_orderkey".into()]));

        assert_eq!(catalog.row_count(&orders), Some(1_500_000));
        assert_eq!(catalog.distinct_count(&orders, "o_custkey"), Some(100_000));
        assert_eq!(catalog.distinct_count(&orders, "o_comment"), None);
        assert_eq!(
            catalog.distribution_of(&orders),
            TableDistribution::Hash(vec!["o_orderkey".into()])
        );

        let unknown = TableRef::new("tpch", "nation");
        assert_eq!(catalog.row_count(&unknown), None);
        assert_eq!(catalog.distribution_of(&unknown), TableDistribution::Random);
    }
}
