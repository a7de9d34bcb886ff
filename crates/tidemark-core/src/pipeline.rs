//! Full and delta load orchestration for one entity.

use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use polars::prelude::DataFrame;
use serde::Serialize;
use tidemark_bucket::{BucketError, BucketStore, ObjectRef};
use tidemark_source::QueryExecutor;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::change::{self, ChangeVerdict};
use crate::codec;
use crate::entities::EntityDefinition;
use crate::error::{IngestError, Result};
use crate::publisher::DatasetPublisher;
use crate::query::QueryParams;
use crate::watermark::{self, Watermark, WatermarkError, WatermarkStrategy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadMode {
    Full,
    Delta,
}

impl fmt::Display for LoadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadMode::Full => f.write_str("full"),
            LoadMode::Delta => f.write_str("delta"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The delta query returned no rows.
    EmptyDelta,
    /// The fresh watermark equals the published one.
    WatermarkUnchanged,
}

/// Result of one entity run. Reported, never consulted for control flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IngestionOutcome {
    Published { rows: usize },
    SkippedUnchanged { reason: SkipReason },
    Failed { cause: String },
}

impl IngestionOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, IngestionOutcome::Failed { .. })
    }
}

impl fmt::Display for IngestionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestionOutcome::Published { rows } => write!(f, "published {rows} rows"),
            IngestionOutcome::SkippedUnchanged { reason } => match reason {
                SkipReason::EmptyDelta => f.write_str("skipped (no delta rows)"),
                SkipReason::WatermarkUnchanged => f.write_str("skipped (unchanged)"),
            },
            IngestionOutcome::Failed { cause } => write!(f, "failed: {cause}"),
        }
    }
}

/// Collaborators shared by every entity pipeline of one run.
#[derive(Clone)]
pub struct PipelineContext {
    pub source: Arc<dyn QueryExecutor>,
    pub store: Arc<dyn BucketStore>,
    pub bucket: String,
    /// Calendar day of the run in the configured timezone. Drives the object year and the
    /// extraction window.
    pub run_date: NaiveDate,
}

#[derive(Debug, Clone, Copy)]
enum Stage {
    FetchingPrior,
    Querying,
    ExtractingCurrentWatermark,
    Detecting,
    Publishing,
    SkippingNoop,
}

impl Stage {
    fn as_str(self) -> &'static str {
        match self {
            Stage::FetchingPrior => "fetching_prior",
            Stage::Querying => "querying",
            Stage::ExtractingCurrentWatermark => "extracting_current_watermark",
            Stage::Detecting => "detecting",
            Stage::Publishing => "publishing",
            Stage::SkippingNoop => "skipping_noop",
        }
    }
}

pub struct IngestionPipeline {
    source: Arc<dyn QueryExecutor>,
    store: Arc<dyn BucketStore>,
    publisher: DatasetPublisher,
    entity: EntityDefinition,
    destination: ObjectRef,
    run_date: NaiveDate,
}

impl IngestionPipeline {
    pub fn new(context: &PipelineContext, entity: EntityDefinition) -> Self {
        let destination = entity.destination(&context.bucket, context.run_date);
        Self {
            source: Arc::clone(&context.source),
            store: Arc::clone(&context.store),
            publisher: DatasetPublisher::new(Arc::clone(&context.store)),
            entity,
            destination,
            run_date: context.run_date,
        }
    }

    pub fn destination(&self) -> &ObjectRef {
        &self.destination
    }

    /// Runs `mode` inside a tracing span and folds any error into the outcome.
    pub async fn run(&self, mode: LoadMode) -> IngestionOutcome {
        let run_id = Uuid::new_v4();
        let span = info_span!(
            "ingest",
            entity = %self.entity.name,
            mode = %mode,
            run_id = %run_id,
        );

        async {
            match self.try_run(mode).await {
                Ok(outcome) => {
                    info!(outcome = %outcome, "entity run finished");
                    outcome
                }
                Err(err) => {
                    error!(
                        error = %err,
                        misconfigured = err.is_misconfiguration(),
                        "entity run failed"
                    );
                    IngestionOutcome::Failed {
                        cause: err.to_string(),
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    pub async fn try_run(&self, mode: LoadMode) -> Result<IngestionOutcome> {
        match mode {
            LoadMode::Full => self.run_full().await,
            LoadMode::Delta => self.run_delta().await,
        }
    }

    /// Queries and publishes unconditionally.
    pub async fn run_full(&self) -> Result<IngestionOutcome> {
        self.enter(Stage::Querying);
        let params = QueryParams::for_run(self.run_date, None);
        let dataset = self
            .entity
            .full_load
            .execute(self.source.as_ref(), &params)
            .await?;

        self.publish(dataset).await
    }

    /// Publishes only when the fresh watermark differs from the published one.
    pub async fn run_delta(&self) -> Result<IngestionOutcome> {
        self.enter(Stage::FetchingPrior);
        let prior =
            fetch_watermark(self.store.as_ref(), &self.destination, &self.entity.strategy).await?;
        debug!(watermark = %prior, "prior watermark");

        self.enter(Stage::Querying);
        let params = QueryParams::for_run(self.run_date, Some(&prior));
        let current_dataset = self
            .entity
            .delta_load
            .execute(self.source.as_ref(), &params)
            .await?;

        self.enter(Stage::ExtractingCurrentWatermark);
        let current = match watermark::extract(&current_dataset, &self.entity.strategy) {
            Ok(current) => current,
            Err(WatermarkError::EmptyDataset) => {
                self.enter(Stage::SkippingNoop);
                warn!(
                    previous = %prior,
                    "delta query returned no rows; nothing to publish"
                );
                return Ok(IngestionOutcome::SkippedUnchanged {
                    reason: SkipReason::EmptyDelta,
                });
            }
            Err(err) => return Err(err.into()),
        };

        self.enter(Stage::Detecting);
        match change::detect(&prior, &current)? {
            ChangeVerdict::Unchanged => {
                self.enter(Stage::SkippingNoop);
                warn!(
                    watermark = %current,
                    "dataset is already up to date or replica is not updated"
                );
                Ok(IngestionOutcome::SkippedUnchanged {
                    reason: SkipReason::WatermarkUnchanged,
                })
            }
            ChangeVerdict::Changed => {
                info!(previous = %prior, current = %current, "watermark advanced");
                self.publish(current_dataset).await
            }
        }
    }

    async fn publish(&self, dataset: DataFrame) -> Result<IngestionOutcome> {
        self.enter(Stage::Publishing);
        self.publisher.publish(&dataset, &self.destination).await?;
        Ok(IngestionOutcome::Published {
            rows: dataset.height(),
        })
    }

    fn enter(&self, stage: Stage) {
        debug!(stage = stage.as_str(), key = %self.destination.key, "stage");
    }
}

/// Reads and decodes the object at `location`. A missing object is
/// [`IngestError::NoPriorData`].
async fn fetch_published(store: &dyn BucketStore, location: &ObjectRef) -> Result<DataFrame> {
    let bytes = store.get_object(location).await.map_err(|source| match source {
        BucketError::NotFound(location) => IngestError::NoPriorData { location },
        source => IngestError::StorageRead {
            location: location.clone(),
            source,
        },
    })?;
    Ok(codec::decode(&bytes)?)
}

/// Watermark of the object currently published at `location`. Missing objects are
/// [`IngestError::NoPriorData`]; an empty one is [`WatermarkError::EmptyDataset`].
pub async fn fetch_watermark(
    store: &dyn BucketStore,
    location: &ObjectRef,
    strategy: &WatermarkStrategy,
) -> Result<Watermark> {
    let dataset = fetch_published(store, location).await?;
    Ok(watermark::extract(&dataset, strategy)?)
}

#[derive(Debug, Clone, Serialize)]
pub struct EntityReport {
    pub entity: String,
    pub mode: LoadMode,
    pub location: String,
    pub outcome: IngestionOutcome,
}

/// Runs every entity in order, one at a time. A failed entity does not stop the rest.
pub async fn run_entities(
    context: &PipelineContext,
    entities: &[EntityDefinition],
    mode: LoadMode,
) -> Vec<EntityReport> {
    let mut reports = Vec::with_capacity(entities.len());
    for entity in entities {
        let pipeline = IngestionPipeline::new(context, entity.clone());
        let outcome = pipeline.run(mode).await;
        reports.push(EntityReport {
            entity: entity.name.clone(),
            mode,
            location: pipeline.destination().to_string(),
            outcome,
        });
    }
    reports
}
