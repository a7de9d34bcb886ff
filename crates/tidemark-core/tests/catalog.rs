use std::sync::Arc;

use chrono::NaiveDate;
use polars::prelude::{DataFrame, DataType, NamedFrom, Series, TimeUnit};
use tidemark_bucket::MemoryBucketStore;
use tidemark_core::query::{QueryParams, QueryPlan};
use tidemark_core::{
    fetch_watermark, find_builtin, IngestionOutcome, IngestionPipeline, LoadMode, PipelineContext,
};
use tidemark_source::StaticSource;

fn run_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
}

#[tokio::test]
async fn customers_union_flags_deleted_users() {
    let customers = find_builtin("customers").unwrap();
    let QueryPlan::UnionFlagged {
        primary, secondary, ..
    } = &customers.full_load
    else {
        panic!("customers should union active and deleted users");
    };

    let source = StaticSource::new();
    source
        .respond(
            primary,
            polars::df!["user_id" => [1i64, 2], "city" => ["Madrid", "Lisboa"]].unwrap(),
        )
        .await;
    source
        .respond(
            secondary,
            polars::df!["user_id" => [9i64], "city" => ["Porto"]].unwrap(),
        )
        .await;

    let params = QueryParams::for_run(run_date(), None);
    let frame = customers.full_load.execute(&source, &params).await.unwrap();

    assert_eq!(frame.height(), 3);
    let flags: Vec<Option<bool>> = frame
        .column("deleted_user")
        .unwrap()
        .bool()
        .unwrap()
        .into_iter()
        .collect();
    assert_eq!(flags, [Some(false), Some(false), Some(true)]);
}

#[tokio::test]
async fn trips_join_start_end_and_facts_on_the_trip_id() {
    let trips = find_builtin("trips").unwrap();
    let QueryPlan::InnerJoin { parts, .. } = &trips.full_load else {
        panic!("trips should join three parts");
    };
    assert_eq!(parts.len(), 3);

    let starts = Series::new("start_trip_date".into(), [1_717_200_000_000_000i64, 1_717_203_600_000_000])
        .cast(&DataType::Datetime(TimeUnit::Microseconds, None))
        .unwrap();
    let source = Arc::new(StaticSource::new());
    source
        .respond(
            &parts[0].sql,
            DataFrame::new(vec![
                starts.into(),
                Series::new("vehicle_trip_id".into(), [10i64, 11]).into(),
            ])
            .unwrap(),
        )
        .await;
    source
        .respond(
            &parts[1].sql,
            polars::df!["vehicle_trip_id2" => [11i64, 10], "end_gps_lat" => [40.1f64, 40.2]].unwrap(),
        )
        .await;
    source
        .respond(
            &parts[2].sql,
            polars::df!["vehicle_trip_id3" => [10i64], "trip_distance_meters" => [1200i64]].unwrap(),
        )
        .await;

    let store = Arc::new(MemoryBucketStore::new());
    let context = PipelineContext {
        source: source.clone(),
        store: store.clone(),
        bucket: "lake".to_string(),
        run_date: run_date(),
    };
    let pipeline = IngestionPipeline::new(&context, trips.clone());

    let outcome = pipeline.run(LoadMode::Full).await;

    assert_eq!(outcome, IngestionOutcome::Published { rows: 1 });
    assert_eq!(source.query_count().await, 3);
    assert_eq!(pipeline.destination().key, "trips/trips2024.parquet");
    assert_eq!(
        fetch_watermark(store.as_ref(), pipeline.destination(), &trips.strategy)
            .await
            .unwrap()
            .to_string(),
        "2024-06-01 00:00:00.000000+0000"
    );
}
