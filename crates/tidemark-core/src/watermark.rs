//! Watermarks summarize how much of a source a published dataset has already captured.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use polars::prelude::{ChunkAgg, DataFrame, DataType, PolarsError, Series, TimeUnit};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Canonical rendering shared by every timestamp watermark.
pub const CANONICAL_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f%z";

const ZONED_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%.f%:z"];
const NAIVE_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

#[derive(Debug, Error)]
pub enum WatermarkError {
    #[error("cannot derive a watermark from an empty dataset")]
    EmptyDataset,
    #[error("watermark column '{0}' is missing from the dataset")]
    MissingColumn(String),
    #[error("watermark column '{column}' has unsupported type {dtype}")]
    UnsupportedColumnType { column: String, dtype: String },
    #[error("watermark column '{column}' holds an invalid timestamp: {value}")]
    InvalidTimestamp { column: String, value: String },
    #[error("polars operation failed: {0}")]
    Polars(#[from] PolarsError),
}

/// How an entity's watermark is derived. Fixed per entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WatermarkStrategy {
    /// Maximum value of a timestamp column.
    Timestamp { column: String },
    /// Distinct values of an identity column.
    IdentitySet { column: String },
}

impl WatermarkStrategy {
    pub fn timestamp(column: impl Into<String>) -> Self {
        WatermarkStrategy::Timestamp {
            column: column.into(),
        }
    }

    pub fn identity_set(column: impl Into<String>) -> Self {
        WatermarkStrategy::IdentitySet {
            column: column.into(),
        }
    }

    pub fn column(&self) -> &str {
        match self {
            WatermarkStrategy::Timestamp { column } | WatermarkStrategy::IdentitySet { column } => {
                column
            }
        }
    }

    pub fn kind(&self) -> WatermarkKind {
        match self {
            WatermarkStrategy::Timestamp { .. } => WatermarkKind::Timestamp,
            WatermarkStrategy::IdentitySet { .. } => WatermarkKind::IdentitySet,
        }
    }
}

impl fmt::Display for WatermarkStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind(), self.column())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WatermarkKind {
    Timestamp,
    IdentitySet,
}

impl fmt::Display for WatermarkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatermarkKind::Timestamp => f.write_str("timestamp"),
            WatermarkKind::IdentitySet => f.write_str("identity_set"),
        }
    }
}

/// Maximum observed instant. Compared through its canonical string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimestampWatermark {
    instant: DateTime<Utc>,
}

impl TimestampWatermark {
    pub fn new(instant: DateTime<Utc>) -> Self {
        Self { instant }
    }

    pub fn instant(&self) -> DateTime<Utc> {
        self.instant
    }

    /// `YYYY-MM-DD HH:MM:SS.ffffff+0000`.
    pub fn canonical(&self) -> String {
        self.instant.format(CANONICAL_TIMESTAMP_FORMAT).to_string()
    }
}

impl fmt::Display for TimestampWatermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Watermark {
    Timestamp(TimestampWatermark),
    IdentitySet(BTreeSet<String>),
}

impl Watermark {
    pub fn kind(&self) -> WatermarkKind {
        match self {
            Watermark::Timestamp(_) => WatermarkKind::Timestamp,
            Watermark::IdentitySet(_) => WatermarkKind::IdentitySet,
        }
    }

    pub fn as_timestamp(&self) -> Option<&TimestampWatermark> {
        match self {
            Watermark::Timestamp(ts) => Some(ts),
            Watermark::IdentitySet(_) => None,
        }
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Watermark::Timestamp(ts) => write!(f, "{ts}"),
            Watermark::IdentitySet(ids) => write!(f, "{} distinct identities", ids.len()),
        }
    }
}

/// Derives the watermark of `dataset` under `strategy`.
///
/// Zero rows is always [`WatermarkError::EmptyDataset`], checked before the column lookup
/// so that an empty result without a schema is still recognized as empty. A column holding
/// only nulls is empty as well, for either strategy.
pub fn extract(dataset: &DataFrame, strategy: &WatermarkStrategy) -> Result<Watermark, WatermarkError> {
    if dataset.height() == 0 {
        return Err(WatermarkError::EmptyDataset);
    }

    let column_name = strategy.column();
    let column = dataset
        .column(column_name)
        .map_err(|_| WatermarkError::MissingColumn(column_name.to_string()))?;
    let series = column.as_materialized_series();

    match strategy {
        WatermarkStrategy::Timestamp { .. } => {
            let instant = max_instant(series, column_name)?.ok_or(WatermarkError::EmptyDataset)?;
            Ok(Watermark::Timestamp(TimestampWatermark::new(instant)))
        }
        WatermarkStrategy::IdentitySet { .. } => {
            let ids = identity_set(series)?;
            if ids.is_empty() {
                return Err(WatermarkError::EmptyDataset);
            }
            Ok(Watermark::IdentitySet(ids))
        }
    }
}

/// Latest non-null instant in `series`, or `None` when every value is null.
fn max_instant(series: &Series, column: &str) -> Result<Option<DateTime<Utc>>, WatermarkError> {
    match series.dtype() {
        DataType::Datetime(unit, _) => {
            let physical = series.to_physical_repr();
            match physical.i64()?.max() {
                Some(value) => instant_from_physical(value, *unit)
                    .map(Some)
                    .ok_or_else(|| WatermarkError::InvalidTimestamp {
                        column: column.to_string(),
                        value: value.to_string(),
                    }),
                None => Ok(None),
            }
        }
        DataType::Date => {
            let physical = series.to_physical_repr();
            Ok(physical
                .i32()?
                .max()
                .map(|days| DateTime::UNIX_EPOCH + Duration::days(i64::from(days))))
        }
        DataType::String => {
            let mut latest: Option<DateTime<Utc>> = None;
            for value in series.str()?.into_iter().flatten() {
                let instant =
                    parse_timestamp(value).ok_or_else(|| WatermarkError::InvalidTimestamp {
                        column: column.to_string(),
                        value: value.to_string(),
                    })?;
                latest = Some(latest.map_or(instant, |current| current.max(instant)));
            }
            Ok(latest)
        }
        other => Err(WatermarkError::UnsupportedColumnType {
            column: column.to_string(),
            dtype: other.to_string(),
        }),
    }
}

fn instant_from_physical(value: i64, unit: TimeUnit) -> Option<DateTime<Utc>> {
    match unit {
        TimeUnit::Nanoseconds => Some(DateTime::from_timestamp_nanos(value)),
        TimeUnit::Microseconds => DateTime::from_timestamp_micros(value),
        TimeUnit::Milliseconds => DateTime::from_timestamp_millis(value),
    }
}

/// Parses the textual timestamp shapes the source database and older objects emit.
/// Values without an offset are taken as UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in ZONED_FORMATS {
        if let Ok(parsed) = DateTime::parse_from_str(value, format) {
            return Some(parsed.with_timezone(&Utc));
        }
    }
    for format in NAIVE_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, format) {
            return Some(parsed.and_utc());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|midnight| midnight.and_utc())
}

fn identity_set(series: &Series) -> Result<BTreeSet<String>, WatermarkError> {
    let as_text = series.cast(&DataType::String)?;
    let ids = as_text
        .str()?
        .into_iter()
        .flatten()
        .map(str::to_string)
        .collect();
    Ok(ids)
}
