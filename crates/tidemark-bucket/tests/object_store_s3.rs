use anyhow::{Context, Result};
use bytes::Bytes;
use tidemark_bucket::{BucketStore, ObjectRef, S3BucketStore, S3Config};

const REQUIRED_VARS: &[&str] = &[
    "TIDEMARK_TEST_S3_BUCKET",
    "TIDEMARK_TEST_S3_ENDPOINT",
    "TIDEMARK_TEST_S3_ACCESS_KEY_ID",
    "TIDEMARK_TEST_S3_SECRET_ACCESS_KEY",
];

#[tokio::test]
async fn s3_put_then_get_and_missing_key() -> Result<()> {
    let Some(config) = test_config() else {
        eprintln!(
            "Skipping S3 bucket test; set {} to enable",
            REQUIRED_VARS.join(", ")
        );
        return Ok(());
    };

    let store = S3BucketStore::new(&config)
        .await
        .context("failed to build S3 bucket store")?;

    let location = ObjectRef::new(&config.bucket, "tidemark-it/roundtrip.bin");
    let payload = Bytes::from_static(b"tidemark integration test");

    store
        .put_object(&location, payload.clone(), "application/octet-stream")
        .await
        .context("upload to S3 failed")?;
    let fetched = store.get_object(&location).await.context("download failed")?;
    assert_eq!(fetched, payload);

    let missing = ObjectRef::new(&config.bucket, "tidemark-it/does-not-exist.bin");
    let err = store.get_object(&missing).await.unwrap_err();
    assert!(err.is_not_found(), "expected NotFound, got {err}");

    Ok(())
}

fn test_config() -> Option<S3Config> {
    for &var in REQUIRED_VARS {
        if std::env::var(var)
            .ok()
            .filter(|value| !value.is_empty())
            .is_none()
        {
            return None;
        }
    }

    Some(S3Config {
        bucket: std::env::var("TIDEMARK_TEST_S3_BUCKET").ok()?,
        region: std::env::var("TIDEMARK_TEST_S3_REGION").unwrap_or_else(|_| "us-east-1".into()),
        endpoint: std::env::var("TIDEMARK_TEST_S3_ENDPOINT").ok(),
        access_key_id: std::env::var("TIDEMARK_TEST_S3_ACCESS_KEY_ID").ok(),
        secret_access_key: std::env::var("TIDEMARK_TEST_S3_SECRET_ACCESS_KEY").ok(),
        force_path_style: true,
    })
}
