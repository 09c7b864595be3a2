//! # Scalar Operators
//!
//! Scalar operators are the expressions that appear inside relational operators:
//! filter and join predicates, projection expressions, aggregate arguments.
//!
//! ## Canonical Compound Predicates
//!
//! Boolean `AND`/`OR` trees are kept in a canonical shape so that the memo can
//! deduplicate logically identical operators by structural equality:
//!
//! - nested compounds of the same type are flattened into one n-ary node, so
//!   `AND(AND(a, b), c)` and `AND(a, AND(b, c))` both become `AND(a, b, c)`;
//! - operands are sorted by their structural hash (ties broken by `Ord`), so
//!   `AND(a, b)` and `AND(b, a)` produce the same operand list.
//!
//! `NOT` is never flattened and `NOT(a)` never equals `a`.
//!
//! The leaf summary of a compound (how many leaves, which distinct leaves) is
//! computed on first use and cached on the node. Nodes are immutable, so the
//! cached value never needs invalidation.

use crate::column::{ColumnId, ColumnRef, ColumnRefSet};
use ordered_float::OrderedFloat;
use std::cmp::Ordering;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

/// SQL data types the optimizer distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DataType {
    Boolean,
    Int,
    BigInt,
    Double,
    Varchar,
    Date,
}

impl DataType {
    /// Average width of one value in bytes, used for data volume estimates.
    pub fn byte_width(&self) -> f64 {
        match self {
            DataType::Boolean => 1.0,
            DataType::Int | DataType::Date => 4.0,
            DataType::BigInt | DataType::Double => 8.0,
            DataType::Varchar => 16.0,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Boolean => "BOOLEAN",
            DataType::Int => "INT",
            DataType::BigInt => "BIGINT",
            DataType::Double => "DOUBLE",
            DataType::Varchar => "VARCHAR",
            DataType::Date => "DATE",
        };
        write!(f, "{}", name)
    }
}

/// Literal values.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ScalarValue {
    Null,
    Bool(bool),
    Int(i64),
    Double(OrderedFloat<f64>),
    Varchar(String),
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Null => write!(f, "NULL"),
            ScalarValue::Bool(b) => write!(f, "{}", b),
            ScalarValue::Int(i) => write!(f, "{}", i),
            ScalarValue::Double(d) => write!(f, "{}", d),
            ScalarValue::Varchar(s) => write!(f, "'{}'", s),
        }
    }
}

/// Binary comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BinaryType {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl BinaryType {
    /// The operator that gives the same result with swapped operands.
    pub fn commute(self) -> BinaryType {
        match self {
            BinaryType::Lt => BinaryType::Gt,
            BinaryType::LtEq => BinaryType::GtEq,
            BinaryType::Gt => BinaryType::Lt,
            BinaryType::GtEq => BinaryType::LtEq,
            other => other,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            BinaryType::Eq => "=",
            BinaryType::NotEq => "<>",
            BinaryType::Lt => "<",
            BinaryType::LtEq => "<=",
            BinaryType::Gt => ">",
            BinaryType::GtEq => ">=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CompoundType {
    And,
    Or,
    Not,
}

/// A scalar expression.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ScalarOperator {
    Column(ColumnRef),
    Constant(ScalarValue, DataType),
    BinaryPredicate {
        op: BinaryType,
        left: Box<ScalarOperator>,
        right: Box<ScalarOperator>,
    },
    Compound(CompoundPredicate),
    IsNull {
        child: Box<ScalarOperator>,
        negated: bool,
    },
    /// A function call (arithmetic included, e.g. `add(a, 1)`).
    Call {
        name: String,
        args: Vec<ScalarOperator>,
        return_type: DataType,
    },
}

impl ScalarOperator {
    pub fn column(column: &ColumnRef) -> Self {
        ScalarOperator::Column(column.clone())
    }

    pub fn int(value: i64) -> Self {
        ScalarOperator::Constant(ScalarValue::Int(value), DataType::Int)
    }

    pub fn boolean(value: bool) -> Self {
        ScalarOperator::Constant(ScalarValue::Bool(value), DataType::Boolean)
    }

    pub fn binary(op: BinaryType, left: ScalarOperator, right: ScalarOperator) -> Self {
        ScalarOperator::BinaryPredicate {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// `left = right` over two columns.
    pub fn eq(left: &ColumnRef, right: &ColumnRef) -> Self {
        Self::binary(BinaryType::Eq, Self::column(left), Self::column(right))
    }

    pub fn call(name: impl Into<String>, args: Vec<ScalarOperator>, return_type: DataType) -> Self {
        ScalarOperator::Call {
            name: name.into(),
            args,
            return_type,
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            ScalarOperator::Column(c) => c.data_type,
            ScalarOperator::Constant(_, t) => *t,
            ScalarOperator::BinaryPredicate { .. }
            | ScalarOperator::Compound(_)
            | ScalarOperator::IsNull { .. } => DataType::Boolean,
            ScalarOperator::Call { return_type, .. } => *return_type,
        }
    }

    pub fn children(&self) -> Vec<&ScalarOperator> {
        match self {
            ScalarOperator::Column(_) | ScalarOperator::Constant(..) => vec![],
            ScalarOperator::BinaryPredicate { left, right, .. } => vec![left.as_ref(), right.as_ref()],
            ScalarOperator::Compound(c) => c.children.iter().collect(),
            ScalarOperator::IsNull { child, .. } => vec![child.as_ref()],
            ScalarOperator::Call { args, .. } => args.iter().collect(),
        }
    }

    /// Pre-order traversal.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a ScalarOperator)) {
        f(self);
        for child in self.children() {
            child.walk(f);
        }
    }

    /// Columns referenced anywhere in this expression.
    pub fn used_columns(&self) -> ColumnRefSet {
        let mut columns = ColumnRefSet::new();
        self.walk(&mut |op| {
            if let ScalarOperator::Column(c) = op {
                columns.insert(c.id);
            }
        });
        columns
    }

    pub fn as_column(&self) -> Option<&ColumnRef> {
        match self {
            ScalarOperator::Column(c) => Some(c),
            _ => None,
        }
    }

    /// Hash of the expression structure. Deterministic across runs.
    pub fn structural_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }

    /// The operands of a top-level AND, or the expression itself.
    pub fn conjuncts(&self) -> Vec<ScalarOperator> {
        match self {
            ScalarOperator::Compound(c) if c.compound_type == CompoundType::And => c.children.clone(),
            other => vec![other.clone()],
        }
    }

    /// AND together a list of predicates; `None` when the list is empty.
    pub fn and_all(predicates: Vec<ScalarOperator>) -> Option<ScalarOperator> {
        if predicates.is_empty() {
            None
        } else {
            Some(CompoundPredicate::and(predicates))
        }
    }

    /// Replace every sub-expression found in `mapping` by a reference to its column.
    ///
    /// Compound nodes are rebuilt through their constructors so the result stays
    /// canonical.
    pub fn replace(&self, mapping: &HashMap<ScalarOperator, ColumnRef>) -> ScalarOperator {
        self.transform(&|expr| mapping.get(expr).map(ScalarOperator::column))
    }

    /// Replace every reference to a column in `mapping` by the column's expression.
    pub fn substitute(&self, mapping: &HashMap<ColumnId, ScalarOperator>) -> ScalarOperator {
        self.transform(&|expr| match expr {
            ScalarOperator::Column(column) => mapping.get(&column.id).cloned(),
            _ => None,
        })
    }

    /// Rebuild the tree top-down, stopping at nodes `f` rewrites.
    fn transform(&self, f: &impl Fn(&ScalarOperator) -> Option<ScalarOperator>) -> ScalarOperator {
        if let Some(rewritten) = f(self) {
            return rewritten;
        }
        match self {
            ScalarOperator::Column(_) | ScalarOperator::Constant(..) => self.clone(),
            ScalarOperator::BinaryPredicate { op, left, right } => {
                Self::binary(*op, left.transform(f), right.transform(f))
            }
            ScalarOperator::Compound(c) => {
                let mut children: Vec<ScalarOperator> = c.children.iter().map(|child| child.transform(f)).collect();
                match c.compound_type {
                    CompoundType::Not => CompoundPredicate::not(children.remove(0)),
                    other => CompoundPredicate::build(other, children),
                }
            }
            ScalarOperator::IsNull { child, negated } => ScalarOperator::IsNull {
                child: Box::new(child.transform(f)),
                negated: *negated,
            },
            ScalarOperator::Call {
                name,
                args,
                return_type,
            } => ScalarOperator::Call {
                name: name.clone(),
                args: args.iter().map(|a| a.transform(f)).collect(),
                return_type: *return_type,
            },
        }
    }

    /// Number of nodes in the expression tree.
    pub fn size(&self) -> usize {
        let mut n = 0;
        self.walk(&mut |_| n += 1);
        n
    }
}

impl fmt::Display for ScalarOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarOperator::Column(c) => write!(f, "{}", c),
            ScalarOperator::Constant(v, _) => write!(f, "{}", v),
            ScalarOperator::BinaryPredicate { op, left, right } => {
                write!(f, "{} {} {}", left, op.symbol(), right)
            }
            ScalarOperator::Compound(c) => write!(f, "{}", c),
            ScalarOperator::IsNull { child, negated } => {
                if *negated {
                    write!(f, "{} IS NOT NULL", child)
                } else {
                    write!(f, "{} IS NULL", child)
                }
            }
            ScalarOperator::Call { name, args, .. } => {
                write!(f, "{}(", name)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Leaf statistics of a compound predicate tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafSummary {
    /// Number of non-compound operands, counting duplicates.
    pub leaf_count: usize,
    /// Distinct non-compound operands in sorted order.
    pub unique_leaves: Vec<ScalarOperator>,
}

/// AND / OR / NOT node in canonical form.
///
/// Construct through [`CompoundPredicate::and`], [`CompoundPredicate::or`] and
/// [`CompoundPredicate::not`]; the fields are private so a non-canonical node
/// cannot be built.
#[derive(Debug, Clone)]
pub struct CompoundPredicate {
    compound_type: CompoundType,
    children: Vec<ScalarOperator>,
    leaf_summary: OnceLock<LeafSummary>,
}

impl CompoundPredicate {
    /// Conjunction of `operands`. A single operand is returned unchanged and an
    /// empty list yields `TRUE`.
    pub fn and(operands: Vec<ScalarOperator>) -> ScalarOperator {
        Self::build(CompoundType::And, operands)
    }

    /// Disjunction of `operands`. A single operand is returned unchanged and an
    /// empty list yields `FALSE`.
    pub fn or(operands: Vec<ScalarOperator>) -> ScalarOperator {
        Self::build(CompoundType::Or, operands)
    }

    pub fn not(operand: ScalarOperator) -> ScalarOperator {
        ScalarOperator::Compound(CompoundPredicate {
            compound_type: CompoundType::Not,
            children: vec![operand],
            leaf_summary: OnceLock::new(),
        })
    }

    fn build(compound_type: CompoundType, operands: Vec<ScalarOperator>) -> ScalarOperator {
        let mut flat = Vec::with_capacity(operands.len());
        for operand in operands {
            flatten_into(compound_type, operand, &mut flat);
        }
        match flat.len() {
            0 => ScalarOperator::boolean(compound_type == CompoundType::And),
            1 => flat.remove(0),
            _ => {
                let mut keyed: Vec<(u64, ScalarOperator)> =
                    flat.into_iter().map(|op| (op.structural_hash(), op)).collect();
                keyed.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
                ScalarOperator::Compound(CompoundPredicate {
                    compound_type,
                    children: keyed.into_iter().map(|(_, op)| op).collect(),
                    leaf_summary: OnceLock::new(),
                })
            }
        }
    }

    pub fn compound_type(&self) -> CompoundType {
        self.compound_type
    }

    /// Operands in canonical order.
    pub fn children(&self) -> &[ScalarOperator] {
        &self.children
    }

    /// Leaf count and distinct leaves of this tree. Computed once.
    pub fn leaf_summary(&self) -> &LeafSummary {
        self.leaf_summary.get_or_init(|| {
            let mut leaves = Vec::new();
            collect_leaves(&self.children, &mut leaves);
            let leaf_count = leaves.len();
            leaves.sort();
            leaves.dedup();
            LeafSummary {
                leaf_count,
                unique_leaves: leaves,
            }
        })
    }

    #[cfg(test)]
    fn is_summary_cached(&self) -> bool {
        self.leaf_summary.get().is_some()
    }
}

fn flatten_into(compound_type: CompoundType, operand: ScalarOperator, out: &mut Vec<ScalarOperator>) {
    match operand {
        ScalarOperator::Compound(c) if c.compound_type == compound_type => {
            // Children of a canonical node are already flat.
            out.extend(c.children);
        }
        other => out.push(other),
    }
}

fn collect_leaves(operands: &[ScalarOperator], out: &mut Vec<ScalarOperator>) {
    for operand in operands {
        match operand {
            ScalarOperator::Compound(c) => collect_leaves(&c.children, out),
            leaf => out.push(leaf.clone()),
        }
    }
}

// Identity ignores the cached summary.
impl PartialEq for CompoundPredicate {
    fn eq(&self, other: &Self) -> bool {
        self.compound_type == other.compound_type && self.children == other.children
    }
}

impl Eq for CompoundPredicate {}

impl Hash for CompoundPredicate {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.compound_type.hash(state);
        self.children.hash(state);
    }
}

impl PartialOrd for CompoundPredicate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CompoundPredicate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compound_type
            .cmp(&other.compound_type)
            .then_with(|| self.children.cmp(&other.children))
    }
}

impl fmt::Display for CompoundPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.compound_type == CompoundType::Not {
            return write!(f, "NOT ({})", self.children[0]);
        }
        let sep = if self.compound_type == CompoundType::And {
            " AND "
        } else {
            " OR "
        };
        write!(f, "(")?;
        for (i, child) in self.children.iter().enumerate() {
            if i > 0 {
                write!(f, "{}", sep)?;
            }
            write!(f, "{}", child)?;
        }
        write!(f, ")")
    }
}

/// Aggregate functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AggFunction {
    Count,
    Sum,
    Min,
    Max,
    Avg,
    /// Adds up partial counts. Unlike `sum`, an empty input yields 0.
    MergeCount,
}

impl fmt::Display for AggFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AggFunction::Count => "count",
            AggFunction::Sum => "sum",
            AggFunction::Min => "min",
            AggFunction::Max => "max",
            AggFunction::Avg => "avg",
            AggFunction::MergeCount => "merge_count",
        };
        write!(f, "{}", name)
    }
}

/// One aggregate call. `arg` is `None` for `count(*)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AggCall {
    pub function: AggFunction,
    pub arg: Option<ScalarOperator>,
    pub distinct: bool,
}

impl AggCall {
    pub fn new(function: AggFunction, arg: Option<ScalarOperator>) -> Self {
        Self {
            function,
            arg,
            distinct: false,
        }
    }

    /// The type this call produces.
    pub fn return_type(&self) -> DataType {
        let arg_type = self.arg.as_ref().map(|a| a.data_type());
        match self.function {
            AggFunction::Count | AggFunction::MergeCount => DataType::BigInt,
            AggFunction::Sum => match arg_type {
                Some(DataType::Double) => DataType::Double,
                _ => DataType::BigInt,
            },
            AggFunction::Min | AggFunction::Max => arg_type.unwrap_or(DataType::BigInt),
            AggFunction::Avg => DataType::Double,
        }
    }

    pub fn used_columns(&self) -> ColumnRefSet {
        self.arg.as_ref().map(|a| a.used_columns()).unwrap_or_default()
    }

    /// `count(DISTINCT arg)` and friends.
    pub fn distinct(function: AggFunction, arg: ScalarOperator) -> Self {
        Self {
            function,
            arg: Some(arg),
            distinct: true,
        }
    }

    /// Whether the result can be NULL. Counts are 0 on empty input.
    pub fn nullable(&self) -> bool {
        !matches!(self.function, AggFunction::Count | AggFunction::MergeCount)
    }

    /// Whether partial results of this call can be combined by a second stage.
    pub fn is_splittable(&self) -> bool {
        !self.distinct && self.function != AggFunction::Avg
    }

    /// The function a global stage applies to this call's partial results.
    pub fn merge_function(&self) -> AggFunction {
        match self.function {
            AggFunction::Count | AggFunction::MergeCount => AggFunction::MergeCount,
            other => other,
        }
    }
}

impl fmt::Display for AggCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let distinct = if self.distinct { "DISTINCT " } else { "" };
        match &self.arg {
            Some(arg) => write!(f, "{}({}{})", self.function, distinct, arg),
            None => write!(f, "{}(*)", self.function),
        }
    }
}
