use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use polars::prelude::{Column as FrameColumn, DataFrame, DataType, NamedFrom, Series, TimeUnit};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sqlx::postgres::{PgColumn, PgRow};
use sqlx::{Column, Decode, Postgres, Row, Type, TypeInfo};
use uuid::Uuid;

use crate::SourceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Boolean,
    SmallInt,
    Int,
    BigInt,
    Real,
    Double,
    /// Arbitrary precision; widened to `f64`, so very large or very precise values round.
    Numeric,
    Text,
    Uuid,
    Json,
    Date,
    Timestamp,
    TimestampTz,
}

impl ColumnKind {
    fn for_column(column: &PgColumn) -> Result<Self, SourceError> {
        let type_name = column.type_info().name();
        Self::from_type_name(type_name).ok_or_else(|| SourceError::UnsupportedType {
            column: column.name().to_string(),
            type_name: type_name.to_string(),
        })
    }

    fn from_type_name(type_name: &str) -> Option<Self> {
        let kind = match type_name {
            "BOOL" => ColumnKind::Boolean,
            "INT2" => ColumnKind::SmallInt,
            "INT4" => ColumnKind::Int,
            "INT8" => ColumnKind::BigInt,
            "FLOAT4" => ColumnKind::Real,
            "FLOAT8" => ColumnKind::Double,
            "NUMERIC" => ColumnKind::Numeric,
            "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => ColumnKind::Text,
            "UUID" => ColumnKind::Uuid,
            "JSON" | "JSONB" => ColumnKind::Json,
            "DATE" => ColumnKind::Date,
            "TIMESTAMP" => ColumnKind::Timestamp,
            "TIMESTAMPTZ" => ColumnKind::TimestampTz,
            _ => return None,
        };
        Some(kind)
    }

    /// Frame dtype for this database type. Zoned timestamps are normalized to UTC
    /// and stored without a zone.
    fn dtype(self) -> DataType {
        match self {
            ColumnKind::Boolean => DataType::Boolean,
            ColumnKind::SmallInt | ColumnKind::Int => DataType::Int32,
            ColumnKind::BigInt => DataType::Int64,
            ColumnKind::Real => DataType::Float32,
            ColumnKind::Double | ColumnKind::Numeric => DataType::Float64,
            ColumnKind::Text | ColumnKind::Uuid | ColumnKind::Json => DataType::String,
            ColumnKind::Date => DataType::Date,
            ColumnKind::Timestamp | ColumnKind::TimestampTz => {
                DataType::Datetime(TimeUnit::Microseconds, None)
            }
        }
    }
}

/// Converts fetched rows into a DataFrame with one column per result column, in order.
pub fn rows_to_dataframe(rows: &[PgRow]) -> Result<DataFrame, SourceError> {
    let Some(first) = rows.first() else {
        return Ok(DataFrame::default());
    };

    let mut columns: Vec<FrameColumn> = Vec::with_capacity(first.columns().len());
    for (index, column) in first.columns().iter().enumerate() {
        let kind = ColumnKind::for_column(column)?;
        let series = build_series(rows, index, column.name(), kind)?;
        columns.push(series.into());
    }

    Ok(DataFrame::new(columns)?)
}

pub(crate) fn empty_dataframe(columns: &[PgColumn]) -> Result<DataFrame, SourceError> {
    let mut frame_columns: Vec<FrameColumn> = Vec::with_capacity(columns.len());
    for column in columns {
        let kind = ColumnKind::for_column(column)?;
        frame_columns.push(Series::new_empty(column.name().into(), &kind.dtype()).into());
    }
    Ok(DataFrame::new(frame_columns)?)
}

fn build_series(
    rows: &[PgRow],
    index: usize,
    name: &str,
    kind: ColumnKind,
) -> Result<Series, SourceError> {
    let name = name.into();
    let series = match kind {
        ColumnKind::Boolean => Series::new(name, decode_column::<bool>(rows, index)?),
        ColumnKind::SmallInt => {
            let values: Vec<Option<i32>> = decode_column::<i16>(rows, index)?
                .into_iter()
                .map(|value| value.map(i32::from))
                .collect();
            Series::new(name, values)
        }
        ColumnKind::Int => Series::new(name, decode_column::<i32>(rows, index)?),
        ColumnKind::BigInt => Series::new(name, decode_column::<i64>(rows, index)?),
        ColumnKind::Real => Series::new(name, decode_column::<f32>(rows, index)?),
        ColumnKind::Double => Series::new(name, decode_column::<f64>(rows, index)?),
        ColumnKind::Numeric => {
            let values: Vec<Option<f64>> = decode_column::<Decimal>(rows, index)?
                .into_iter()
                .map(|value| value.and_then(|decimal| decimal.to_f64()))
                .collect();
            Series::new(name, values)
        }
        ColumnKind::Text => Series::new(name, decode_column::<String>(rows, index)?),
        ColumnKind::Uuid => {
            let values: Vec<Option<String>> = decode_column::<Uuid>(rows, index)?
                .into_iter()
                .map(|value| value.map(|id| id.to_string()))
                .collect();
            Series::new(name, values)
        }
        ColumnKind::Json => {
            let values: Vec<Option<String>> = decode_column::<serde_json::Value>(rows, index)?
                .into_iter()
                .map(|value| value.map(|json| json.to_string()))
                .collect();
            Series::new(name, values)
        }
        ColumnKind::Date => {
            let epoch = DateTime::UNIX_EPOCH.date_naive();
            let days: Vec<Option<i32>> = decode_column::<NaiveDate>(rows, index)?
                .into_iter()
                .map(|value| value.map(|date| (date - epoch).num_days() as i32))
                .collect();
            Series::new(name, days).cast(&kind.dtype())?
        }
        ColumnKind::Timestamp => {
            let micros: Vec<Option<i64>> = decode_column::<NaiveDateTime>(rows, index)?
                .into_iter()
                .map(|value| value.map(|ts| ts.and_utc().timestamp_micros()))
                .collect();
            Series::new(name, micros).cast(&kind.dtype())?
        }
        ColumnKind::TimestampTz => {
            let micros: Vec<Option<i64>> = decode_column::<DateTime<Utc>>(rows, index)?
                .into_iter()
                .map(|value| value.map(|ts| ts.timestamp_micros()))
                .collect();
            Series::new(name, micros).cast(&kind.dtype())?
        }
    };
    Ok(series)
}

fn decode_column<'r, T>(rows: &'r [PgRow], index: usize) -> Result<Vec<Option<T>>, SourceError>
where
    T: Decode<'r, Postgres> + Type<Postgres>,
{
    rows.iter()
        .map(|row| row.try_get::<Option<T>, _>(index).map_err(SourceError::from))
        .collect()
}
