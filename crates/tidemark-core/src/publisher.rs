use std::sync::Arc;

use polars::prelude::DataFrame;
use thiserror::Error;
use tidemark_bucket::{BucketError, BucketStore, ObjectRef};
use tracing::info;

use crate::codec::{self, CodecError, PARQUET_CONTENT_TYPE};

#[derive(Debug, Error)]
pub enum PublishError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("failed to upload {location}: {source}")]
    Storage {
        location: ObjectRef,
        #[source]
        source: BucketError,
    },
}

/// Writes datasets to their canonical object, replacing the previous version in one PUT.
#[derive(Clone)]
pub struct DatasetPublisher {
    store: Arc<dyn BucketStore>,
}

impl DatasetPublisher {
    pub fn new(store: Arc<dyn BucketStore>) -> Self {
        Self { store }
    }

    /// Encodes `dataset` and uploads it to `destination`. On failure the prior object
    /// stays in place.
    pub async fn publish(&self, dataset: &DataFrame, destination: &ObjectRef) -> Result<(), PublishError> {
        let body = codec::encode(dataset)?;
        let size = body.len();

        self.store
            .put_object(destination, body, PARQUET_CONTENT_TYPE)
            .await
            .map_err(|source| PublishError::Storage {
                location: destination.clone(),
                source,
            })?;

        info!(
            bucket = %destination.bucket,
            key = %destination.key,
            rows = dataset.height(),
            bytes = size,
            "published dataset"
        );
        Ok(())
    }
}
