//! End-to-end scenarios against the fully wired service state: prediction
//! caching, model swaps, demand forecasting, and event-driven retraining.

use chrono::{Duration, NaiveDate, Utc};
use forgecast_backend::api::AppState;
use forgecast_backend::cache::InMemoryCache;
use forgecast_backend::events::{OrderCreatedEvent, OrderItem};
use forgecast_backend::models::{
    AuditStatus, CacheOutcome, FamilyMetadata, Granularity, MlModel, ModelFamily, ModelStatus,
    ModelVersion,
};
use forgecast_backend::predict::artifact::{ForecastModel, LinearModel, ModelArtifact};
use forgecast_backend::predict::demand::DemandForecastRequest;
use forgecast_backend::predict::print_time::PrintTimeRequest;
use forgecast_backend::training::TrainJob;
use forgecast_backend::ServiceConfig;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

struct TestService {
    state: AppState,
    job_rx: mpsc::UnboundedReceiver<TrainJob>,
    _dir: tempfile::TempDir,
}

async fn service() -> TestService {
    let dir = tempfile::tempdir().unwrap();
    let config = ServiceConfig {
        db_path: dir.path().join("forgecast.db").to_string_lossy().into_owned(),
        artifact_dir: dir.path().join("artifacts").to_string_lossy().into_owned(),
        ..ServiceConfig::default()
    };
    let cache = Arc::new(InMemoryCache::new());
    let (state, job_rx) = AppState::build_with_cache(config, cache).await.unwrap();
    TestService {
        state,
        job_rx,
        _dir: dir,
    }
}

/// Install an Active model for a family with the given artifact.
async fn install_active(
    state: &AppState,
    family: ModelFamily,
    version: ModelVersion,
    artifact: &ModelArtifact,
) -> String {
    let handle = state.model_store.persist(family, version, artifact).unwrap();
    let model = MlModel {
        id: uuid::Uuid::new_v4().to_string(),
        family,
        version,
        status: ModelStatus::Testing,
        algorithm: "test".into(),
        metrics: HashMap::new(),
        trained_at: Utc::now(),
        deployed_at: None,
        artifact_path: handle,
        training_job_id: None,
        metadata: HashMap::new(),
    };
    state.registry.insert(&model).await.unwrap();
    state.lifecycle.activate(&model.id).await.unwrap();
    model.id
}

fn linear_print_model() -> ModelArtifact {
    ModelArtifact::Linear(LinearModel {
        feature_names: vec!["volume".into(), "layer_count".into(), "infill_pct".into()],
        weights: vec![0.8, 1.5, 0.6],
        intercept: 12.0,
        residual_std: 4.0,
    })
}

/// Minimal valid binary STL: two facets of a right prism. Enough for the
/// parser and the feature extractor; geometry realism is not the point.
fn fixture_stl() -> Vec<u8> {
    let triangles: [([f32; 3], [f32; 3], [f32; 3], [f32; 3]); 2] = [
        ([0.0, 0.0, 1.0], [0.0, 0.0, 2.0], [10.0, 0.0, 2.0], [10.0, 10.0, 2.0]),
        ([0.0, 0.0, -1.0], [0.0, 0.0, 0.0], [10.0, 10.0, 0.0], [10.0, 0.0, 0.0]),
    ];
    let mut out = vec![0u8; 80];
    out.extend_from_slice(&(triangles.len() as u32).to_le_bytes());
    for (normal, v1, v2, v3) in &triangles {
        for f in normal.iter().chain(v1).chain(v2).chain(v3) {
            out.extend_from_slice(&f.to_le_bytes());
        }
        out.extend_from_slice(&0u16.to_le_bytes());
    }
    out
}

fn print_request(infill: f64) -> PrintTimeRequest {
    PrintTimeRequest {
        geometry: fixture_stl(),
        file_name: "bracket.stl".into(),
        material: "PLA".into(),
        density: 1.24,
        printer_model: "Prusa MK4".into(),
        print_speed: 60.0,
        layer_height: 0.2,
        nozzle_temperature: 215.0,
        bed_temperature: 60.0,
        infill_percentage: infill,
    }
}

fn order_event(message_id: &str, product: &str) -> OrderCreatedEvent {
    OrderCreatedEvent {
        message_id: message_id.to_string(),
        order_id: format!("order-{message_id}"),
        customer_id: "cust-1".into(),
        items: vec![OrderItem {
            product_id: product.to_string(),
            quantity: 4.0,
            unit_price: 12.5,
            line_total: 50.0,
        }],
        created_at: Utc::now(),
    }
}

#[tokio::test]
async fn print_time_second_request_hits_cache() {
    let svc = service().await;
    install_active(
        &svc.state,
        ModelFamily::PrintTime,
        ModelVersion::new(1, 0, 0),
        &linear_print_model(),
    )
    .await;

    let first = svc
        .state
        .pipeline
        .predict_print_time(print_request(20.0), Some("user-1".into()), "corr-1".into())
        .await
        .unwrap();
    assert_eq!(first.cache_status, CacheOutcome::Miss);
    assert_eq!(first.unit, "minutes");

    let second = svc
        .state
        .pipeline
        .predict_print_time(print_request(20.0), Some("user-1".into()), "corr-2".into())
        .await
        .unwrap();
    assert_eq!(second.cache_status, CacheOutcome::Hit);
    assert_eq!(second.predicted, first.predicted);

    let audit_1 = svc.state.audit.find_by_correlation("corr-1").await.unwrap();
    let audit_2 = svc.state.audit.find_by_correlation("corr-2").await.unwrap();
    assert_eq!(audit_1.len(), 1);
    assert_eq!(audit_2.len(), 1);
    assert_eq!(audit_1[0].status, AuditStatus::Success);
    assert_eq!(audit_2[0].status, AuditStatus::CachedHit);
}

#[tokio::test]
async fn print_time_parameter_change_is_a_fresh_key() {
    let svc = service().await;
    install_active(
        &svc.state,
        ModelFamily::PrintTime,
        ModelVersion::new(1, 0, 0),
        &linear_print_model(),
    )
    .await;

    let first = svc
        .state
        .pipeline
        .predict_print_time(print_request(20.0), None, "corr-1".into())
        .await
        .unwrap();
    let second = svc
        .state
        .pipeline
        .predict_print_time(print_request(25.0), None, "corr-2".into())
        .await
        .unwrap();

    assert_eq!(first.cache_status, CacheOutcome::Miss);
    assert_eq!(second.cache_status, CacheOutcome::Miss);
    assert_ne!(first.predicted, second.predicted);
}

#[tokio::test]
async fn active_swap_shadows_cached_predictions() {
    let svc = service().await;
    install_active(
        &svc.state,
        ModelFamily::PrintTime,
        ModelVersion::new(1, 0, 0),
        &linear_print_model(),
    )
    .await;

    let first = svc
        .state
        .pipeline
        .predict_print_time(print_request(20.0), None, "corr-1".into())
        .await
        .unwrap();
    assert_eq!(first.cache_status, CacheOutcome::Miss);
    assert_eq!(first.model_version, "1.0.0");

    install_active(
        &svc.state,
        ModelFamily::PrintTime,
        ModelVersion::new(1, 1, 0),
        &linear_print_model(),
    )
    .await;

    let after_swap = svc
        .state
        .pipeline
        .predict_print_time(print_request(20.0), None, "corr-2".into())
        .await
        .unwrap();
    assert_eq!(after_swap.cache_status, CacheOutcome::Miss);
    assert_eq!(after_swap.model_version, "1.1.0");
}

#[tokio::test]
async fn demand_forecast_daily_seven_periods() {
    let svc = service().await;
    // Saturday lower bound deviates 50% from forecast: one anomalous
    // weekday pattern per week.
    let mut dow_std = [2.0 / forgecast_backend::predict::artifact::Z_95; 7];
    dow_std[5] = 50.0 / forgecast_backend::predict::artifact::Z_95;
    install_active(
        &svc.state,
        ModelFamily::DemandForecast,
        ModelVersion::new(1, 0, 0),
        &ModelArtifact::Forecast(ForecastModel {
            level: 100.0,
            trend: 0.0,
            dow_factors: [1.0; 7],
            dow_std,
        }),
    )
    .await;

    let baseline = NaiveDate::from_ymd_opt(2026, 2, 14).unwrap();
    let response = svc
        .state
        .pipeline
        .predict_demand(
            DemandForecastRequest {
                product_id: "PROD-A".into(),
                horizon: 7,
                granularity: Granularity::Daily,
                baseline_date: baseline,
            },
            None,
            "corr-demand".into(),
        )
        .await
        .unwrap();

    assert_eq!(response.unit, "units");
    let FamilyMetadata::Demand {
        forecast_count,
        anomaly_count,
        points,
        ..
    } = &response.metadata
    else {
        panic!("expected demand metadata");
    };
    assert_eq!(*forecast_count, 7);
    assert_eq!(points.len(), 7);
    assert_eq!(points[0].date, NaiveDate::from_ymd_opt(2026, 2, 15).unwrap());
    assert_eq!(points[6].date, NaiveDate::from_ymd_opt(2026, 2, 21).unwrap());

    // Exactly one Saturday (2026-02-21) falls in the window.
    let expected_anomalies = points
        .iter()
        .filter(|p| (p.forecast - p.lower).abs() / p.forecast * 100.0 > 40.0)
        .count();
    assert_eq!(*anomaly_count, expected_anomalies);
    assert_eq!(*anomaly_count, 1);
}

#[tokio::test]
async fn thousand_orders_trigger_retraining() {
    let mut svc = service().await;

    for i in 0..1000 {
        svc.state
            .consumer
            .consume(order_event(&format!("msg-{i}"), "PROD-A"))
            .await
            .unwrap();
    }

    let dataset = svc
        .state
        .training_store
        .latest_dataset(ModelFamily::DemandForecast)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(dataset.record_count, 1000);

    let job = svc.job_rx.try_recv().expect("retraining job after threshold");
    assert_eq!(job.family, ModelFamily::DemandForecast);
}

#[tokio::test]
async fn duplicate_order_event_ingests_once() {
    let svc = service().await;
    let event = order_event("msg-dup", "PROD-B");

    svc.state.consumer.consume(event.clone()).await.unwrap();
    svc.state.consumer.consume(event).await.unwrap();

    let dataset = svc
        .state
        .training_store
        .latest_dataset(ModelFamily::DemandForecast)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(dataset.record_count, 1);
}

#[tokio::test]
async fn ingestion_training_prediction_full_loop() {
    let mut svc = service().await;

    // Ingest a month of orders, then run the queued training job through
    // the consumer logic and serve a forecast from the trained model.
    let start = Utc::now() - Duration::days(30);
    for day in 0..30 {
        for n in 0..4 {
            let mut event = order_event(&format!("msg-{day}-{n}"), "PROD-A");
            event.created_at = start + Duration::days(day);
            svc.state.consumer.consume(event).await.unwrap();
        }
    }

    svc.state
        .dispatcher
        .enqueue_for_family(
            &svc.state.registry,
            ModelFamily::DemandForecast,
            forgecast_backend::models::TriggerSource::Manual,
        )
        .await
        .unwrap();

    let consumer = svc.state.training_consumer();
    let job = svc.job_rx.recv().await.unwrap();
    consumer.process(job).await.unwrap();

    let active = svc
        .state
        .registry
        .active_for(ModelFamily::DemandForecast)
        .await
        .unwrap()
        .expect("training produced an active model");
    assert_eq!(active.algorithm, "seasonal_level_trend");

    let response = svc
        .state
        .pipeline
        .predict_demand(
            DemandForecastRequest {
                product_id: "PROD-A".into(),
                horizon: 7,
                granularity: Granularity::Daily,
                baseline_date: Utc::now().date_naive(),
            },
            None,
            "corr-loop".into(),
        )
        .await
        .unwrap();
    assert!(response.predicted > 0.0);
}
