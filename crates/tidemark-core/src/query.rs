//! Entity query plans: which statements to run and how to combine their results.

use chrono::NaiveDate;
use polars::prelude::DataFrame;
use tidemark_source::QueryExecutor;
use tracing::debug;

use crate::combine;
use crate::error::IngestError;
use crate::watermark::Watermark;

const WINDOW_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryPlan {
    Single {
        sql: String,
    },
    /// Rows of `primary` and `secondary` stacked by column name, with `flag_column` true for
    /// rows whose `id_column` also appears in `secondary`.
    UnionFlagged {
        primary: String,
        secondary: String,
        id_column: String,
        flag_column: String,
    },
    /// Parts inner-joined on `key`.
    InnerJoin { parts: Vec<JoinPart>, key: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinPart {
    pub sql: String,
    pub key_column: String,
}

impl JoinPart {
    pub fn new(sql: impl Into<String>, key_column: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            key_column: key_column.into(),
        }
    }
}

/// Values substituted into statement placeholders before execution.
///
/// * `{watermark}`: the prior timestamp watermark as a quoted literal (delta loads only)
/// * `{window_start}` / `{window_end}`: midnight of the day before the run and of the run day
#[derive(Debug, Clone)]
pub struct QueryParams {
    pub watermark: Option<String>,
    pub window_start: String,
    pub window_end: String,
}

impl QueryParams {
    pub fn for_run(run_date: NaiveDate, prior: Option<&Watermark>) -> Self {
        let window_end = run_date.and_hms_opt(0, 0, 0).unwrap_or_default();
        let window_start = run_date
            .pred_opt()
            .and_then(|day| day.and_hms_opt(0, 0, 0))
            .unwrap_or(window_end);

        Self {
            watermark: prior
                .and_then(Watermark::as_timestamp)
                .map(|ts| ts.canonical()),
            window_start: window_start.format(WINDOW_FORMAT).to_string(),
            window_end: window_end.format(WINDOW_FORMAT).to_string(),
        }
    }

    pub fn render(&self, template: &str) -> Result<String, IngestError> {
        let mut sql = template
            .replace("{window_start}", &quote(&self.window_start))
            .replace("{window_end}", &quote(&self.window_end));

        if sql.contains("{watermark}") {
            let watermark = self
                .watermark
                .as_deref()
                .ok_or(IngestError::UnboundParameter("watermark"))?;
            sql = sql.replace("{watermark}", &quote(watermark));
        }
        Ok(sql)
    }
}

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

impl QueryPlan {
    pub fn single(sql: impl Into<String>) -> Self {
        QueryPlan::Single { sql: sql.into() }
    }

    pub fn statements(&self) -> Vec<&str> {
        match self {
            QueryPlan::Single { sql } => vec![sql.as_str()],
            QueryPlan::UnionFlagged {
                primary, secondary, ..
            } => vec![primary.as_str(), secondary.as_str()],
            QueryPlan::InnerJoin { parts, .. } => parts.iter().map(|part| part.sql.as_str()).collect(),
        }
    }

    /// Renders and runs every statement in order, then combines the results.
    pub async fn execute(
        &self,
        source: &dyn QueryExecutor,
        params: &QueryParams,
    ) -> Result<DataFrame, IngestError> {
        match self {
            QueryPlan::Single { sql } => run_statement(source, params, sql).await,
            QueryPlan::UnionFlagged {
                primary,
                secondary,
                id_column,
                flag_column,
            } => {
                let primary = run_statement(source, params, primary).await?;
                let secondary = run_statement(source, params, secondary).await?;
                let members = combine::member_ids(&secondary, id_column)?;
                let merged = combine::union_by_name(&[primary, secondary])?;
                Ok(combine::flag_members(&merged, id_column, &members, flag_column)?)
            }
            QueryPlan::InnerJoin { parts, key } => {
                let mut frames = Vec::with_capacity(parts.len());
                for part in parts {
                    let frame = run_statement(source, params, &part.sql).await?;
                    frames.push((frame, part.key_column.clone()));
                }
                Ok(combine::inner_join_on(frames, key)?)
            }
        }
    }
}

async fn run_statement(
    source: &dyn QueryExecutor,
    params: &QueryParams,
    template: &str,
) -> Result<DataFrame, IngestError> {
    let sql = params.render(template)?;
    let frame = source.query(&sql).await?;
    debug!(rows = frame.height(), columns = frame.width(), "statement finished");
    Ok(frame)
}
