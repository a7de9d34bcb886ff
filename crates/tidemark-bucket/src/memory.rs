use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;

use crate::{BucketError, BucketStore, ObjectRef};

/// Process-local [`BucketStore`] used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryBucketStore {
    objects: Mutex<HashMap<ObjectRef, StoredObject>>,
    puts: AtomicUsize,
    gets: AtomicUsize,
    fail_writes: AtomicBool,
}

#[derive(Debug, Clone)]
struct StoredObject {
    bytes: Bytes,
    content_type: String,
}

impl MemoryBucketStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an object without counting it as a write.
    pub async fn insert(&self, location: ObjectRef, bytes: impl Into<Bytes>) {
        self.objects.lock().await.insert(
            location,
            StoredObject {
                bytes: bytes.into(),
                content_type: "application/octet-stream".to_string(),
            },
        );
    }

    pub async fn content_type(&self, location: &ObjectRef) -> Option<String> {
        self.objects
            .lock()
            .await
            .get(location)
            .map(|object| object.content_type.clone())
    }

    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    /// Makes every subsequent `put_object` fail without touching stored objects.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl BucketStore for MemoryBucketStore {
    async fn put_object(
        &self,
        location: &ObjectRef,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<(), BucketError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(BucketError::Sdk(format!("simulated write failure for {location}")));
        }
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.objects.lock().await.insert(
            location.clone(),
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn get_object(&self, location: &ObjectRef) -> Result<Bytes, BucketError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.objects
            .lock()
            .await
            .get(location)
            .map(|object| object.bytes.clone())
            .ok_or_else(|| BucketError::NotFound(location.clone()))
    }
}
