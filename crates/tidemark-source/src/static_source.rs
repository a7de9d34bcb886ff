use std::collections::HashMap;

use async_trait::async_trait;
use polars::prelude::DataFrame;
use tokio::sync::Mutex;

use crate::{QueryExecutor, SourceError};

/// Canned-response executor. Statements are matched on their whitespace-normalized text.
#[derive(Debug, Default)]
pub struct StaticSource {
    responses: Mutex<HashMap<String, Response>>,
    executed: Mutex<Vec<String>>,
}

#[derive(Debug, Clone)]
enum Response {
    Frame(DataFrame),
    Error(String),
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn respond(&self, sql: &str, frame: DataFrame) {
        self.responses
            .lock()
            .await
            .insert(normalize(sql), Response::Frame(frame));
    }

    pub async fn fail(&self, sql: &str, message: impl Into<String>) {
        self.responses
            .lock()
            .await
            .insert(normalize(sql), Response::Error(message.into()));
    }

    /// Statements executed so far, in order, as received.
    pub async fn executed(&self) -> Vec<String> {
        self.executed.lock().await.clone()
    }

    pub async fn query_count(&self) -> usize {
        self.executed.lock().await.len()
    }
}

#[async_trait]
impl QueryExecutor for StaticSource {
    async fn query(&self, sql: &str) -> Result<DataFrame, SourceError> {
        self.executed.lock().await.push(sql.to_string());
        match self.responses.lock().await.get(&normalize(sql)) {
            Some(Response::Frame(frame)) => Ok(frame.clone()),
            Some(Response::Error(message)) => Err(SourceError::Failed(message.clone())),
            None => Err(SourceError::UnknownStatement(sql.to_string())),
        }
    }
}

fn normalize(sql: &str) -> String {
    sql.split_whitespace().collect::<Vec<_>>().join(" ")
}
