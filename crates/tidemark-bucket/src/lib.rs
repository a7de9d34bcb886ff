//! Abstractions over S3-compatible storage backends holding published entity datasets.

mod memory;
mod s3;

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::MemoryBucketStore;
pub use s3::{S3BucketStore, S3Config};

/// Canonical location of one published object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRef {
    pub bucket: String,
    pub key: String,
}

impl ObjectRef {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

#[derive(Debug, Error)]
pub enum BucketError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("sdk error: {0}")]
    Sdk(String),
    #[error("object not found: {0}")]
    NotFound(ObjectRef),
}

impl BucketError {
    fn from_sdk(err: impl fmt::Display) -> Self {
        Self::Sdk(err.to_string())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, BucketError::NotFound(_))
    }
}

#[async_trait]
pub trait BucketStore: Send + Sync {
    /// Writes `bytes` to `location`, replacing whatever object was there.
    async fn put_object(
        &self,
        location: &ObjectRef,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<(), BucketError>;

    /// Reads the full object body. Missing objects are reported as [`BucketError::NotFound`].
    async fn get_object(&self, location: &ObjectRef) -> Result<Bytes, BucketError>;
}
