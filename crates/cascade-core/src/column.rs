//! # Column References
//!
//! Every value produced anywhere in a query plan (a scanned column, a projected
//! expression, an aggregate result) is identified by a small integer `ColumnId`
//! allocated by the query's `ColumnRefFactory`. Operators refer to columns only
//! through these ids, which makes "which columns does this subtree produce / need"
//! a matter of cheap set algebra over `ColumnRefSet`.
//!
//! Ids are query-scoped: the factory lives as long as one optimization and is
//! dropped with it. They have no serialized form.

use crate::scalar::DataType;
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::fmt;

/// Identifier of one produced column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ColumnId(pub u32);

impl fmt::Display for ColumnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A column reference with the metadata the optimizer needs (type, nullability).
///
/// `name` is the source column name for scanned columns and a display label for
/// computed columns.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ColumnRef {
    pub id: ColumnId,
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.id)
    }
}

/// Allocates column ids for one query.
///
/// Allocation goes through `&self` so that rules, which only see a shared
/// optimizer context, can mint columns for extracted sub-expressions.
#[derive(Debug, Default)]
pub struct ColumnRefFactory {
    columns: RefCell<Vec<ColumnRef>>,
}

impl ColumnRefFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a new column. Ids start at 1 and increase by one per call.
    pub fn create(&self, name: impl Into<String>, data_type: DataType, nullable: bool) -> ColumnRef {
        let mut columns = self.columns.borrow_mut();
        let column = ColumnRef {
            id: ColumnId(columns.len() as u32 + 1),
            name: name.into(),
            data_type,
            nullable,
        };
        columns.push(column.clone());
        column
    }

    pub fn get(&self, id: ColumnId) -> Option<ColumnRef> {
        let index = (id.0 as usize).checked_sub(1)?;
        self.columns.borrow().get(index).cloned()
    }

    pub fn len(&self) -> usize {
        self.columns.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An ordered set of column ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ColumnRefSet(BTreeSet<ColumnId>);

impl ColumnRefSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_refs<'a>(columns: impl IntoIterator<Item = &'a ColumnRef>) -> Self {
        columns.into_iter().map(|c| c.id).collect()
    }

    pub fn insert(&mut self, id: ColumnId) -> bool {
        self.0.insert(id)
    }

    pub fn contains(&self, id: ColumnId) -> bool {
        self.0.contains(&id)
    }

    /// True when every column of `other` is in `self`.
    pub fn contains_all(&self, other: &ColumnRefSet) -> bool {
        other.0.is_subset(&self.0)
    }

    pub fn is_subset_of(&self, other: &ColumnRefSet) -> bool {
        self.0.is_subset(&other.0)
    }

    pub fn union(&self, other: &ColumnRefSet) -> ColumnRefSet {
        ColumnRefSet(self.0.union(&other.0).copied().collect())
    }

    pub fn union_with(&mut self, other: &ColumnRefSet) {
        self.0.extend(other.0.iter().copied());
    }

    pub fn intersect(&self, other: &ColumnRefSet) -> ColumnRefSet {
        ColumnRefSet(self.0.intersection(&other.0).copied().collect())
    }

    /// Columns of `self` that are not in `other`.
    pub fn except(&self, other: &ColumnRefSet) -> ColumnRefSet {
        ColumnRefSet(self.0.difference(&other.0).copied().collect())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = ColumnId> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<ColumnId> for ColumnRefSet {
    fn from_iter<I: IntoIterator<Item = ColumnId>>(iter: I) -> Self {
        ColumnRefSet(iter.into_iter().collect())
    }
}

impl Extend<ColumnId> for ColumnRefSet {
    fn extend<I: IntoIterator<Item = ColumnId>>(&mut self, iter: I) {
        self.0.extend(iter)
    }
}

impl fmt::Display for ColumnRefSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, id) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", id)?;
        }
        write!(f, "}}")
    }
}
