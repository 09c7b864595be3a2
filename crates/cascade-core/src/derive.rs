//! # Logical Property Derivation
//!
//! Every group carries one `LogicalProperty`, derived from the first expression
//! inserted into it and the properties of that expression's input groups. The
//! derivation also type-checks the operator: a projection or aggregation whose
//! declared output column type disagrees with the type of the expression it is
//! computed from fails with `OptimizerError::TypeCheck`.

use crate::catalog::Catalog;
use crate::column::{ColumnId, ColumnRef, ColumnRefFactory, ColumnRefSet};
use crate::error::{InternalError, OptimizerError, Result};
use crate::expr::{extract_equi_conjuncts, JoinType, LogicalOperator, Operator, Projection};
use crate::memo::{GroupId, Memo};
use crate::properties::LogicalProperty;
use crate::scalar::{BinaryType, DataType, ScalarOperator};
use crate::stats::{self, Statistics};

/// What derivation needs besides the operator and its inputs.
pub struct DeriveContext<'a> {
    pub catalog: &'a dyn Catalog,
    pub column_factory: &'a ColumnRefFactory,
}

/// Derive the logical property of a new group whose first expression is `op`
/// over `children`.
pub fn derive_group_property(
    memo: &Memo,
    op: &Operator,
    children: &[GroupId],
    ctx: &DeriveContext<'_>,
) -> Result<LogicalProperty> {
    let Operator::Logical(op) = op else {
        return Err(InternalError::Invariant(format!("physical operator {} cannot start a new group", op)).into());
    };
    let inputs = children
        .iter()
        .map(|child| memo.group(*child).map(|g| &g.logical_property))
        .collect::<Result<Vec<_>>>()?;
    derive_logical_property(op, &inputs, ctx)
}

/// Derive output columns, statistics and column equivalences of `op`.
pub fn derive_logical_property(
    op: &LogicalOperator,
    inputs: &[&LogicalProperty],
    ctx: &DeriveContext<'_>,
) -> Result<LogicalProperty> {
    let expected = match op {
        LogicalOperator::Scan { .. } => 0,
        LogicalOperator::Join { .. } => 2,
        _ => 1,
    };
    if inputs.len() != expected {
        return Err(InternalError::Invariant(format!(
            "{} expects {} inputs, got {}",
            op,
            expected,
            inputs.len()
        ))
        .into());
    }

    let (output_columns, statistics, equivalences) = match op {
        LogicalOperator::Scan {
            table,
            columns,
            predicate,
            projection,
        } => {
            let table_stats = ctx.catalog.get_table_stats(table);
            let mut statistics = stats::derive_scan_stats(table_stats.as_ref(), columns);
            let mut equivalences = Vec::new();
            if let Some(predicate) = predicate {
                check_boolean("scan predicate", predicate)?;
                statistics = stats::derive_filter_stats(&statistics, stats::estimate_selectivity(predicate, &statistics));
                equivalences.extend(column_equalities(predicate));
            }
            let output = match projection {
                Some(projection) => {
                    check_projection(projection)?;
                    project_statistics(&mut statistics, projection);
                    projection.output_columns()
                }
                None => ColumnRefSet::from_refs(columns),
            };
            (output, statistics, equivalences)
        }
        LogicalOperator::Filter { predicate } => {
            check_boolean("filter predicate", predicate)?;
            let input = inputs[0];
            let statistics = stats::derive_filter_stats(
                &input.statistics,
                stats::estimate_selectivity(predicate, &input.statistics),
            );
            let mut equivalences = input.equivalences.clone();
            equivalences.extend(column_equalities(predicate));
            (input.output_columns.clone(), statistics, equivalences)
        }
        LogicalOperator::Project { projection } => {
            check_projection(projection)?;
            let input = inputs[0];
            let mut statistics = input.statistics.clone();
            project_statistics(&mut statistics, projection);
            (projection.output_columns(), statistics, input.equivalences.clone())
        }
        LogicalOperator::Join {
            join_type,
            predicate,
        } => {
            let (left, right) = (inputs[0], inputs[1]);
            if let Some(predicate) = predicate {
                check_boolean("join predicate", predicate)?;
            }
            let keys = extract_equi_conjuncts(predicate.as_ref(), &left.output_columns, &right.output_columns);
            let key_ids: Vec<(ColumnId, ColumnId)> = keys.iter().map(|(l, r)| (l.id, r.id)).collect();
            let residual = predicate
                .as_ref()
                .map(|p| {
                    p.conjuncts()
                        .iter()
                        .filter(|c| !is_key_conjunct(c, &key_ids))
                        .map(|c| stats::estimate_selectivity(c, &merged(&left.statistics, &right.statistics)))
                        .product()
                })
                .unwrap_or(1.0);
            let statistics =
                stats::derive_join_stats(&left.statistics, &right.statistics, *join_type, &key_ids, residual);

            let mut output = left.output_columns.clone();
            let mut equivalences = left.equivalences.clone();
            if join_type.outputs_right() {
                output.union_with(&right.output_columns);
                equivalences.extend(right.equivalences.iter().copied());
            }
            if matches!(join_type, JoinType::Inner | JoinType::Cross | JoinType::LeftSemi) {
                equivalences.extend(key_ids.iter().copied());
            }
            (output, statistics, equivalences)
        }
        LogicalOperator::Aggregate {
            group_by,
            aggregations,
            ..
        } => {
            for (column, call) in aggregations {
                let derived = call.return_type();
                if column.data_type != derived {
                    return Err(OptimizerError::TypeCheck(format!(
                        "the type of aggregate output {} is {} but {} returns {}",
                        column, column.data_type, call, derived
                    )));
                }
            }
            let input = inputs[0];
            let group_ids: Vec<ColumnId> = group_by.iter().map(|c| c.id).collect();
            let statistics = stats::derive_aggregate_stats(&input.statistics, &group_ids);
            let mut output = ColumnRefSet::from_refs(group_by);
            output.extend(aggregations.iter().map(|(c, _)| c.id));
            (output, statistics, input.equivalences.clone())
        }
        LogicalOperator::Sort { .. } => {
            let input = inputs[0];
            (input.output_columns.clone(), input.statistics.clone(), input.equivalences.clone())
        }
        LogicalOperator::Limit { limit, .. } => {
            let input = inputs[0];
            let statistics = stats::derive_limit_stats(&input.statistics, *limit);
            (input.output_columns.clone(), statistics, input.equivalences.clone())
        }
    };

    let equivalences = equivalences
        .into_iter()
        .filter(|(a, b)| output_columns.contains(*a) && output_columns.contains(*b))
        .collect();
    let row_width = output_columns
        .iter()
        .map(|id| {
            ctx.column_factory
                .get(id)
                .map(|c| c.data_type.byte_width())
                .unwrap_or(8.0)
        })
        .sum();

    Ok(LogicalProperty {
        output_columns,
        row_width,
        statistics,
        equivalences,
    })
}

fn check_boolean(context: &str, predicate: &ScalarOperator) -> Result<()> {
    let derived = predicate.data_type();
    if derived != DataType::Boolean {
        return Err(OptimizerError::TypeCheck(format!(
            "{} {} has type {}, expected BOOLEAN",
            context, predicate, derived
        )));
    }
    Ok(())
}

fn check_projection(projection: &Projection) -> Result<()> {
    for (column, expr) in projection.columns.iter().chain(&projection.common_sub_operators) {
        check_column_type(column, expr)?;
    }
    Ok(())
}

fn check_column_type(column: &ColumnRef, expr: &ScalarOperator) -> Result<()> {
    let derived = expr.data_type();
    if column.data_type != derived {
        return Err(OptimizerError::TypeCheck(format!(
            "the type of {} is {} but its expression {} returns {}",
            column, column.data_type, expr, derived
        )));
    }
    Ok(())
}

/// Columns that a projection passes through unchanged keep their statistics.
fn project_statistics(statistics: &mut Statistics, projection: &Projection) {
    let passed: ColumnRefSet = projection
        .columns
        .iter()
        .filter_map(|(column, expr)| match expr.as_column() {
            Some(source) if source.id == column.id => Some(column.id),
            _ => None,
        })
        .collect();
    statistics.retain_columns(|id| passed.contains(id));
}

/// `a = b` conjuncts over two columns.
fn column_equalities(predicate: &ScalarOperator) -> Vec<(ColumnId, ColumnId)> {
    predicate
        .conjuncts()
        .iter()
        .filter_map(|c| match c {
            ScalarOperator::BinaryPredicate {
                op: BinaryType::Eq,
                left,
                right,
            } => Some((left.as_column()?.id, right.as_column()?.id)),
            _ => None,
        })
        .collect()
}

fn is_key_conjunct(conjunct: &ScalarOperator, keys: &[(ColumnId, ColumnId)]) -> bool {
    column_equalities(conjunct)
        .iter()
        .any(|(a, b)| keys.contains(&(*a, *b)) || keys.contains(&(*b, *a)))
}

fn merged(left: &Statistics, right: &Statistics) -> Statistics {
    let mut stats = left.clone();
    stats
        .column_stats
        .extend(right.column_stats.iter().map(|(id, cs)| (*id, cs.clone())));
    stats
}
