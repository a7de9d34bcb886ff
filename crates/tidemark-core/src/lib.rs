//! Delta-load reconciliation: query the operational database, derive a watermark, and
//! republish an entity's columnar object only when that watermark moved.

pub mod change;
pub mod codec;
pub mod combine;
pub mod config;
pub mod entities;
pub mod error;
pub mod pipeline;
pub mod publisher;
pub mod query;
pub mod watermark;

/// A fully materialized table held in memory.
pub use polars::prelude::DataFrame as Dataset;

pub use change::{ChangeError, ChangeVerdict};
pub use config::{AppConfig, ConfigError};
pub use entities::{builtin_entities, find_builtin, EntityDefinition};
pub use error::{IngestError, Result};
pub use pipeline::{
    fetch_watermark, run_entities, EntityReport, IngestionOutcome, IngestionPipeline, LoadMode, PipelineContext,
    SkipReason,
};
pub use publisher::DatasetPublisher;
pub use watermark::{Watermark, WatermarkKind, WatermarkStrategy};
