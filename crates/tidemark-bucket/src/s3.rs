use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::provider::SharedCredentialsProvider;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use serde::Deserialize;
use tracing::debug;

use crate::{BucketError, BucketStore, ObjectRef};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub force_path_style: bool,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: "tidemark-datasets".to_string(),
            region: "us-east-1".to_string(),
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            force_path_style: false,
        }
    }
}

impl S3Config {
    /// Overlays `S3_*` values found through `lookup`. Missing or empty values keep the
    /// existing setting.
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |name: &str| lookup(name).filter(|value| !value.is_empty());

        if let Some(bucket) = lookup("S3_BUCKET") {
            self.bucket = bucket;
        }
        if let Some(region) = lookup("S3_REGION") {
            self.region = region;
        }
        if let Some(endpoint) = lookup("S3_ENDPOINT_URL") {
            self.endpoint = Some(endpoint);
        }
        if let Some(access_key) = lookup("S3_ACCESS_KEY_ID") {
            self.access_key_id = Some(access_key);
        }
        if let Some(secret_key) = lookup("S3_SECRET_ACCESS_KEY") {
            self.secret_access_key = Some(secret_key);
        }
        if let Some(flag) = lookup("S3_FORCE_PATH_STYLE") {
            self.force_path_style =
                matches!(flag.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        self
    }
}

#[derive(Clone)]
pub struct S3BucketStore {
    client: Client,
}

impl S3BucketStore {
    pub async fn new(config: &S3Config) -> Result<Self, BucketError> {
        if config.bucket.is_empty() {
            return Err(BucketError::Configuration(
                "bucket name cannot be empty".into(),
            ));
        }

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));

        if let (Some(access_key), Some(secret_key)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            let credentials = Credentials::new(access_key, secret_key, None, None, "static");
            loader = loader.credentials_provider(SharedCredentialsProvider::new(credentials));
        }

        let shared_config = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared_config);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        if config.force_path_style {
            builder = builder.force_path_style(true);
        }

        let client = Client::from_conf(builder.build());
        Ok(Self { client })
    }
}

#[async_trait]
impl BucketStore for S3BucketStore {
    async fn put_object(
        &self,
        location: &ObjectRef,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<(), BucketError> {
        debug!(%location, size = bytes.len(), "uploading object");
        self.client
            .put_object()
            .bucket(&location.bucket)
            .key(&location.key)
            .body(ByteStream::from(bytes))
            .content_type(content_type)
            .send()
            .await
            .map_err(BucketError::from_sdk)?;
        Ok(())
    }

    async fn get_object(&self, location: &ObjectRef) -> Result<Bytes, BucketError> {
        debug!(%location, "fetching object");
        let output = self
            .client
            .get_object()
            .bucket(&location.bucket)
            .key(&location.key)
            .send()
            .await
            .map_err(|err| match err {
                SdkError::ServiceError(service_err) => {
                    if service_err.err().is_no_such_key() {
                        BucketError::NotFound(location.clone())
                    } else {
                        BucketError::from_sdk(service_err.err())
                    }
                }
                other => BucketError::from_sdk(other),
            })?;

        let data = output.body.collect().await.map_err(BucketError::from_sdk)?;
        Ok(data.into_bytes())
    }
}
