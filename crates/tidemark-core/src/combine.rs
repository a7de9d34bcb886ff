//! Dataset combinators used by multi-statement query plans.

use std::collections::HashSet;

use polars::prelude::{
    col, Column, DataFrame, DataType, IntoLazy, JoinArgs, JoinType, LazyFrame, NamedFrom,
    PlSmallStr, PolarsError, Series,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CombineError {
    #[error("column '{0}' is missing from a combined part")]
    MissingColumn(String),
    #[error("a join needs at least one part")]
    NoParts,
    #[error("polars operation failed: {0}")]
    Polars(#[from] PolarsError),
}

/// Distinct non-null values of `column`, rendered as strings.
pub fn member_ids(frame: &DataFrame, column: &str) -> Result<HashSet<String>, CombineError> {
    let ids = string_column(frame, column)?;
    let members = ids
        .str()?
        .into_iter()
        .flatten()
        .map(str::to_string)
        .collect();
    Ok(members)
}

/// Returns a copy of `frame` with a boolean `flag_column` that is true where `id_column`
/// is one of `members`. Null ids are never members.
pub fn flag_members(
    frame: &DataFrame,
    id_column: &str,
    members: &HashSet<String>,
    flag_column: &str,
) -> Result<DataFrame, CombineError> {
    let ids = string_column(frame, id_column)?;
    let flags: Vec<bool> = ids
        .str()?
        .into_iter()
        .map(|id| id.is_some_and(|id| members.contains(id)))
        .collect();

    let mut flagged = frame.clone();
    flagged.with_column(Series::new(flag_column.into(), flags))?;
    Ok(flagged)
}

/// Stacks frames vertically, aligning columns by name. Columns absent from a frame are
/// filled with nulls; the first dtype seen for a name wins and later frames are cast to it.
pub fn union_by_name(frames: &[DataFrame]) -> Result<DataFrame, CombineError> {
    let mut schema: Vec<(PlSmallStr, DataType)> = Vec::new();
    for frame in frames {
        for column in frame.get_columns() {
            if !schema.iter().any(|(name, _)| name == column.name()) {
                schema.push((column.name().clone(), column.dtype().clone()));
            }
        }
    }

    let mut combined: Option<DataFrame> = None;
    for frame in frames {
        let mut columns: Vec<Column> = Vec::with_capacity(schema.len());
        for (name, dtype) in &schema {
            let column = match frame.column(name.as_str()) {
                Ok(existing) => existing.cast(dtype)?,
                Err(_) => Series::full_null(name.clone(), frame.height(), dtype).into(),
            };
            columns.push(column);
        }
        let aligned = DataFrame::new(columns)?;

        match combined.as_mut() {
            Some(acc) => {
                acc.vstack_mut(&aligned)?;
            }
            None => combined = Some(aligned),
        }
    }

    Ok(combined.unwrap_or_default())
}

/// Inner-joins every part on a shared key. Each part names its own key column, which is
/// renamed to `key` before joining.
pub fn inner_join_on(parts: Vec<(DataFrame, String)>, key: &str) -> Result<DataFrame, CombineError> {
    let mut joined: Option<LazyFrame> = None;

    for (frame, key_column) in parts {
        if frame.column(&key_column).is_err() {
            return Err(CombineError::MissingColumn(key_column));
        }
        let frame = rename_column(frame, &key_column, key)?;

        let lazy = frame.lazy();
        joined = Some(match joined {
            None => lazy,
            Some(acc) => acc.join(
                lazy,
                [col(key)],
                [col(key)],
                JoinArgs::new(JoinType::Inner),
            ),
        });
    }

    let joined = joined.ok_or(CombineError::NoParts)?;
    Ok(joined.collect()?)
}

/// Rebuilds `frame` with `from` renamed to `to`.
fn rename_column(frame: DataFrame, from: &str, to: &str) -> Result<DataFrame, CombineError> {
    if from == to {
        return Ok(frame);
    }
    let columns: Vec<Column> = frame
        .take_columns()
        .into_iter()
        .map(|column| {
            if column.name().as_str() == from {
                column.with_name(to.into())
            } else {
                column
            }
        })
        .collect();
    Ok(DataFrame::new(columns)?)
}

fn string_column(frame: &DataFrame, column: &str) -> Result<Series, CombineError> {
    let existing = frame
        .column(column)
        .map_err(|_| CombineError::MissingColumn(column.to_string()))?;
    Ok(existing
        .as_materialized_series()
        .cast(&DataType::String)?)
}
