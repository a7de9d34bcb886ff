use std::sync::Arc;

use chrono::NaiveDate;
use polars::prelude::{DataFrame, DataType, NamedFrom, Series, TimeUnit};
use tidemark_bucket::{BucketStore, MemoryBucketStore};
use tidemark_core::codec::{self, PARQUET_CONTENT_TYPE};
use tidemark_core::query::QueryPlan;
use tidemark_core::watermark::{parse_timestamp, WatermarkError};
use tidemark_core::{
    fetch_watermark, run_entities, EntityDefinition, IngestError, IngestionOutcome,
    IngestionPipeline, LoadMode, PipelineContext, SkipReason, WatermarkStrategy,
};
use tidemark_source::StaticSource;

const BUCKET: &str = "lake";
const FULL_SQL: &str = "SELECT id, updated_at FROM events";
const DELTA_SQL: &str = "SELECT id, updated_at FROM events WHERE updated_at > {watermark}";
const ZONES_SQL: &str = "SELECT area_id FROM zones";

fn run_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 4).unwrap()
}

fn delta_sql(prior: &str) -> String {
    format!("SELECT id, updated_at FROM events WHERE updated_at > '{prior}'")
}

fn events_entity(name: &str) -> EntityDefinition {
    EntityDefinition {
        name: name.to_string(),
        folder: name.to_string(),
        strategy: WatermarkStrategy::timestamp("updated_at"),
        full_load: QueryPlan::single(FULL_SQL),
        delta_load: QueryPlan::single(DELTA_SQL),
    }
}

fn zones_entity() -> EntityDefinition {
    EntityDefinition {
        name: "zones".to_string(),
        folder: "zones".to_string(),
        strategy: WatermarkStrategy::identity_set("area_id"),
        full_load: QueryPlan::single(ZONES_SQL),
        delta_load: QueryPlan::single(ZONES_SQL),
    }
}

fn timestamps(name: &str, values: &[Option<&str>]) -> Series {
    let micros: Vec<Option<i64>> = values
        .iter()
        .map(|value| value.map(|raw| parse_timestamp(raw).unwrap().timestamp_micros()))
        .collect();
    Series::new(name.into(), micros)
        .cast(&DataType::Datetime(TimeUnit::Microseconds, None))
        .unwrap()
}

fn events(rows: &[(i64, &str)]) -> DataFrame {
    let ids: Vec<i64> = rows.iter().map(|(id, _)| *id).collect();
    let stamps: Vec<Option<&str>> = rows.iter().map(|(_, ts)| Some(*ts)).collect();
    DataFrame::new(vec![
        Series::new("id".into(), ids).into(),
        timestamps("updated_at", &stamps).into(),
    ])
    .unwrap()
}

struct Harness {
    source: Arc<StaticSource>,
    store: Arc<MemoryBucketStore>,
    context: PipelineContext,
}

impl Harness {
    fn new() -> Self {
        let source = Arc::new(StaticSource::new());
        let store = Arc::new(MemoryBucketStore::new());
        let context = PipelineContext {
            source: source.clone(),
            store: store.clone(),
            bucket: BUCKET.to_string(),
            run_date: run_date(),
        };
        Self {
            source,
            store,
            context,
        }
    }

    fn pipeline(&self, entity: &EntityDefinition) -> IngestionPipeline {
        IngestionPipeline::new(&self.context, entity.clone())
    }

    async fn seed(&self, entity: &EntityDefinition, frame: &DataFrame) {
        let bytes = codec::encode(frame).unwrap();
        self.store
            .insert(entity.destination(BUCKET, run_date()), bytes)
            .await;
    }

    async fn published(&self, entity: &EntityDefinition) -> DataFrame {
        let bytes = self
            .store
            .get_object(&entity.destination(BUCKET, run_date()))
            .await
            .unwrap();
        codec::decode(&bytes).unwrap()
    }
}

#[tokio::test]
async fn full_load_publishes_unconditionally() {
    let harness = Harness::new();
    let entity = events_entity("events");
    let rows = events(&[(1, "2024-01-01 08:00:00"), (2, "2024-01-02 09:30:00")]);
    harness.source.respond(FULL_SQL, rows.clone()).await;

    let outcome = harness.pipeline(&entity).run(LoadMode::Full).await;

    assert_eq!(outcome, IngestionOutcome::Published { rows: 2 });
    assert_eq!(harness.store.put_count(), 1);
    let location = entity.destination(BUCKET, run_date());
    assert_eq!(location.key, "events/events2024.parquet");
    assert_eq!(
        harness.store.content_type(&location).await.as_deref(),
        Some(PARQUET_CONTENT_TYPE)
    );
    assert!(harness.published(&entity).await.equals_missing(&rows));
}

#[tokio::test]
async fn delta_publishes_the_current_dataset_when_the_watermark_advances() {
    let harness = Harness::new();
    let entity = events_entity("events");
    harness
        .seed(&entity, &events(&[(1, "2024-01-01 00:00:00"), (2, "2024-01-02 00:00:00")]))
        .await;

    let current = events(&[(2, "2024-01-02 00:00:00"), (3, "2024-01-03 00:00:00")]);
    harness
        .source
        .respond(&delta_sql("2024-01-02 00:00:00.000000+0000"), current.clone())
        .await;

    let outcome = harness.pipeline(&entity).run(LoadMode::Delta).await;

    assert_eq!(outcome, IngestionOutcome::Published { rows: 2 });
    assert_eq!(harness.store.put_count(), 1);
    assert!(harness.published(&entity).await.equals_missing(&current));
}

#[tokio::test]
async fn repeated_delta_runs_publish_at_most_once() {
    let harness = Harness::new();
    let entity = events_entity("events");
    harness
        .seed(&entity, &events(&[(1, "2024-01-02 00:00:00")]))
        .await;

    let current = events(&[(3, "2024-01-03 00:00:00")]);
    harness
        .source
        .respond(&delta_sql("2024-01-02 00:00:00.000000+0000"), current.clone())
        .await;
    harness
        .source
        .respond(&delta_sql("2024-01-03 00:00:00.000000+0000"), current.clone())
        .await;

    let pipeline = harness.pipeline(&entity);
    assert!(matches!(
        pipeline.run(LoadMode::Delta).await,
        IngestionOutcome::Published { .. }
    ));
    assert_eq!(
        pipeline.run(LoadMode::Delta).await,
        IngestionOutcome::SkippedUnchanged {
            reason: SkipReason::WatermarkUnchanged
        }
    );
    assert_eq!(harness.store.put_count(), 1);
}

#[tokio::test]
async fn unchanged_watermark_leaves_the_object_alone() {
    let harness = Harness::new();
    let entity = events_entity("events");
    let prior = events(&[(1, "2024-01-03 00:00:00")]);
    harness.seed(&entity, &prior).await;
    harness
        .source
        .respond(
            &delta_sql("2024-01-03 00:00:00.000000+0000"),
            events(&[(1, "2024-01-03 00:00:00")]),
        )
        .await;

    let outcome = harness.pipeline(&entity).run(LoadMode::Delta).await;

    assert_eq!(
        outcome,
        IngestionOutcome::SkippedUnchanged {
            reason: SkipReason::WatermarkUnchanged
        }
    );
    assert_eq!(harness.store.put_count(), 0);
    assert!(harness.published(&entity).await.equals_missing(&prior));
}

#[tokio::test]
async fn delta_without_a_published_object_fails_before_querying() {
    let harness = Harness::new();
    let entity = events_entity("events");

    let err = harness
        .pipeline(&entity)
        .try_run(LoadMode::Delta)
        .await
        .unwrap_err();

    assert!(matches!(err, IngestError::NoPriorData { .. }));
    assert_eq!(harness.source.query_count().await, 0);
    assert_eq!(harness.store.put_count(), 0);
}

#[tokio::test]
async fn empty_delta_results_are_skipped() {
    let harness = Harness::new();
    let entity = events_entity("events");
    harness
        .seed(&entity, &events(&[(1, "2024-01-03 00:00:00")]))
        .await;
    let sql = delta_sql("2024-01-03 00:00:00.000000+0000");

    harness.source.respond(&sql, DataFrame::empty()).await;
    let outcome = harness.pipeline(&entity).run(LoadMode::Delta).await;
    assert_eq!(
        outcome,
        IngestionOutcome::SkippedUnchanged {
            reason: SkipReason::EmptyDelta
        }
    );

    let all_null = DataFrame::new(vec![
        Series::new("id".into(), [7i64]).into(),
        timestamps("updated_at", &[None]).into(),
    ])
    .unwrap();
    harness.source.respond(&sql, all_null).await;
    let outcome = harness.pipeline(&entity).run(LoadMode::Delta).await;
    assert_eq!(
        outcome,
        IngestionOutcome::SkippedUnchanged {
            reason: SkipReason::EmptyDelta
        }
    );
    assert_eq!(harness.store.put_count(), 0);
}

#[tokio::test]
async fn missing_watermark_column_is_a_misconfiguration() {
    let harness = Harness::new();
    let entity = events_entity("events");
    harness
        .seed(&entity, &events(&[(1, "2024-01-03 00:00:00")]))
        .await;
    harness
        .source
        .respond(
            &delta_sql("2024-01-03 00:00:00.000000+0000"),
            polars::df!["id" => [1i64, 2]].unwrap(),
        )
        .await;

    let err = harness
        .pipeline(&entity)
        .try_run(LoadMode::Delta)
        .await
        .unwrap_err();

    assert!(matches!(
        &err,
        IngestError::Watermark(WatermarkError::MissingColumn(column)) if column == "updated_at"
    ));
    assert!(err.is_misconfiguration());
    assert_eq!(harness.store.put_count(), 0);
}

#[tokio::test]
async fn failed_upload_keeps_the_prior_object() {
    let harness = Harness::new();
    let entity = events_entity("events");
    let prior = events(&[(1, "2024-01-02 00:00:00")]);
    harness.seed(&entity, &prior).await;
    harness
        .source
        .respond(
            &delta_sql("2024-01-02 00:00:00.000000+0000"),
            events(&[(2, "2024-01-03 00:00:00")]),
        )
        .await;
    harness.store.set_fail_writes(true);

    let err = harness
        .pipeline(&entity)
        .try_run(LoadMode::Delta)
        .await
        .unwrap_err();

    assert!(matches!(err, IngestError::StorageWrite { .. }));
    assert!(harness.published(&entity).await.equals_missing(&prior));
}

#[tokio::test]
async fn source_failures_are_reported_not_published() {
    let harness = Harness::new();
    let entity = events_entity("events");
    harness
        .seed(&entity, &events(&[(1, "2024-01-02 00:00:00")]))
        .await;
    harness
        .source
        .fail(&delta_sql("2024-01-02 00:00:00.000000+0000"), "replica offline")
        .await;

    let outcome = harness.pipeline(&entity).run(LoadMode::Delta).await;

    match outcome {
        IngestionOutcome::Failed { cause } => assert!(cause.contains("replica offline"), "{cause}"),
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(harness.store.put_count(), 0);
}

#[tokio::test]
async fn identity_sets_ignore_order_and_duplicates() {
    let harness = Harness::new();
    let entity = zones_entity();
    harness
        .seed(&entity, &polars::df!["area_id" => [1i64, 2, 2, 3]].unwrap())
        .await;
    harness
        .source
        .respond(
            ZONES_SQL,
            polars::df!["area_id" => [3i64, 1, 2]].unwrap(),
        )
        .await;

    let outcome = harness.pipeline(&entity).run(LoadMode::Delta).await;
    assert_eq!(
        outcome,
        IngestionOutcome::SkippedUnchanged {
            reason: SkipReason::WatermarkUnchanged
        }
    );

    harness
        .source
        .respond(
            ZONES_SQL,
            polars::df!["area_id" => [3i64, 1, 2, 4]].unwrap(),
        )
        .await;
    let outcome = harness.pipeline(&entity).run(LoadMode::Delta).await;
    assert_eq!(outcome, IngestionOutcome::Published { rows: 4 });
}

#[tokio::test]
async fn one_failing_entity_does_not_stop_the_run() {
    let harness = Harness::new();
    let orphan = events_entity("orphans");
    let tracked = events_entity("events");
    harness
        .seed(&tracked, &events(&[(1, "2024-01-02 00:00:00")]))
        .await;
    harness
        .source
        .respond(
            &delta_sql("2024-01-02 00:00:00.000000+0000"),
            events(&[(2, "2024-01-03 12:00:00")]),
        )
        .await;

    let reports = run_entities(&harness.context, &[orphan, tracked], LoadMode::Delta).await;

    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].entity, "orphans");
    assert!(reports[0].outcome.is_failure());
    assert_eq!(reports[1].entity, "events");
    assert_eq!(reports[1].location, "s3://lake/events/events2024.parquet");
    assert_eq!(reports[1].outcome, IngestionOutcome::Published { rows: 1 });

    let json = serde_json::to_value(&reports[1]).unwrap();
    assert_eq!(json["mode"], "delta");
    assert_eq!(json["outcome"]["status"], "published");
}

#[tokio::test]
async fn fetch_watermark_reads_the_current_object() {
    let harness = Harness::new();
    let entity = events_entity("events");
    let location = entity.destination(BUCKET, run_date());

    let err = fetch_watermark(harness.store.as_ref(), &location, &entity.strategy)
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::NoPriorData { .. }));

    harness
        .seed(&entity, &events(&[(1, "2024-01-01 00:00:00"), (2, "2024-01-03 00:00:00")]))
        .await;
    let watermark = fetch_watermark(harness.store.as_ref(), &location, &entity.strategy)
        .await
        .unwrap();
    assert_eq!(watermark.to_string(), "2024-01-03 00:00:00.000000+0000");
}

#[tokio::test]
async fn empty_published_object_is_an_error_not_a_skip() {
    let harness = Harness::new();
    let entity = zones_entity();
    let empty = polars::df!["area_id" => Vec::<i64>::new()].unwrap();
    harness.seed(&entity, &empty).await;
    harness
        .source
        .respond(
            ZONES_SQL,
            polars::df!["area_id" => [1i64]].unwrap(),
        )
        .await;

    let err = harness
        .pipeline(&entity)
        .try_run(LoadMode::Delta)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        IngestError::Watermark(WatermarkError::EmptyDataset)
    ));
    assert_eq!(harness.source.query_count().await, 0);
    assert_eq!(harness.store.put_count(), 0);
}

#[tokio::test]
async fn all_null_identities_are_never_a_watermark() {
    let harness = Harness::new();
    let entity = zones_entity();
    let all_null = polars::df!["area_id" => [None::<i64>, None]].unwrap();
    harness.seed(&entity, &all_null).await;
    harness
        .source
        .respond(ZONES_SQL, all_null.clone())
        .await;

    let err = harness
        .pipeline(&entity)
        .try_run(LoadMode::Delta)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        IngestError::Watermark(WatermarkError::EmptyDataset)
    ));
    assert_eq!(harness.store.put_count(), 0);
}
