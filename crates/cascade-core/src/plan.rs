//! Physical plan trees produced by the optimizer.

use crate::column::ColumnRefSet;
use crate::cost::Cost;
use crate::expr::{PhysicalOperator, Projection};
use crate::properties::{DistributionSpec, PhysicalPropertySet};
use crate::scalar::ScalarOperator;

/// One node of an optimized physical plan.
#[derive(Debug, Clone)]
pub struct PlanNode {
    pub op: PhysicalOperator,
    pub inputs: Vec<PlanNode>,
    pub output_columns: ColumnRefSet,
    pub row_count: f64,
    /// Properties this node's output is delivered with.
    pub properties: PhysicalPropertySet,
    /// Cumulative cost of this subtree.
    pub cost: Cost,
}

impl PlanNode {
    pub fn predicate(&self) -> Option<&ScalarOperator> {
        self.op.predicate()
    }

    pub fn projection(&self) -> Option<&Projection> {
        self.op.projection()
    }

    pub fn distribution(&self) -> &DistributionSpec {
        &self.properties.distribution
    }

    /// Pre-order traversal.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a PlanNode)) {
        f(self);
        for input in &self.inputs {
            input.walk(f);
        }
    }

    /// Explain text, one operator per line, inputs indented below their parent.
    pub fn display(&self, indent: usize) -> String {
        let mut out = format!(
            "{}{}  rows={:.0} cost={:.1} dist={}\n",
            "  ".repeat(indent),
            self.op,
            self.row_count,
            self.cost.total,
            self.properties.distribution
        );
        for input in &self.inputs {
            out.push_str(&input.display(indent + 1));
        }
        out
    }
}
