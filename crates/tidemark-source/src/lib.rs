//! Read-only access to the operational database, materializing query results as DataFrames.

mod rows;
mod static_source;

use std::time::Duration;

use async_trait::async_trait;
use polars::prelude::{DataFrame, PolarsError};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};
use thiserror::Error;
use tracing::debug;

pub use rows::rows_to_dataframe;
pub use static_source::StaticSource;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("column '{column}' has unsupported database type {type_name}; cast it in the query")]
    UnsupportedType { column: String, type_name: String },

    #[error("failed to assemble result frame: {0}")]
    Frame(#[from] PolarsError),

    #[error("no canned result for statement: {0}")]
    UnknownStatement(String),

    #[error("query failed: {0}")]
    Failed(String),
}

/// Executes one SQL statement and returns the fully materialized result.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn query(&self, sql: &str) -> Result<DataFrame, SourceError>;
}

#[derive(Clone)]
pub struct PostgresSource {
    pool: PgPool,
}

impl PostgresSource {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, SourceError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl QueryExecutor for PostgresSource {
    async fn query(&self, sql: &str) -> Result<DataFrame, SourceError> {
        let rows = sqlx::query(sql).fetch_all(&self.pool).await?;
        debug!(rows = rows.len(), "source query returned");

        if rows.is_empty() {
            // No rows to read column metadata from; ask the server for the result shape.
            let described = (&self.pool).describe(sql).await?;
            return rows::empty_dataframe(described.columns());
        }

        rows_to_dataframe(&rows)
    }
}
