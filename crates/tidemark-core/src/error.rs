// crates/tidemark-core/src/error.rs

use thiserror::Error;
use tidemark_bucket::{BucketError, ObjectRef};
use tidemark_source::SourceError;

use crate::change::ChangeError;
use crate::codec::CodecError;
use crate::combine::CombineError;
use crate::publisher::PublishError;
use crate::watermark::WatermarkError;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("source query failed: {0}")]
    SourceQuery(#[from] SourceError),

    #[error("failed to read {location}: {source}")]
    StorageRead {
        location: ObjectRef,
        #[source]
        source: BucketError,
    },

    #[error("failed to write {location}: {source}")]
    StorageWrite {
        location: ObjectRef,
        #[source]
        source: BucketError,
    },

    #[error("no published dataset at {location}; run a full load first")]
    NoPriorData { location: ObjectRef },

    #[error("watermark extraction failed: {0}")]
    Watermark(#[from] WatermarkError),

    #[error("change detection failed: {0}")]
    Change(#[from] ChangeError),

    #[error("columnar codec failed: {0}")]
    Codec(#[from] CodecError),

    #[error("failed to combine query results: {0}")]
    Combine(#[from] CombineError),

    #[error("query placeholder {{{0}}} has no value in this run")]
    UnboundParameter(&'static str),
}

impl From<PublishError> for IngestError {
    fn from(err: PublishError) -> Self {
        match err {
            PublishError::Codec(codec) => IngestError::Codec(codec),
            PublishError::Storage { location, source } => IngestError::StorageWrite { location, source },
        }
    }
}

impl IngestError {
    /// Errors caused by wiring (strategy, column or placeholder mismatches) rather than by
    /// the data or the infrastructure.
    pub fn is_misconfiguration(&self) -> bool {
        matches!(
            self,
            IngestError::Change(ChangeError::IncompatibleWatermarkKinds { .. })
                | IngestError::Watermark(WatermarkError::MissingColumn(_))
                | IngestError::Watermark(WatermarkError::UnsupportedColumnType { .. })
                | IngestError::UnboundParameter(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
