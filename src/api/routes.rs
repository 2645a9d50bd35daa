//! Route table and handlers.

use crate::api::{ApiError, AppState};
use crate::models::{Granularity, ModelFamily, ModelStatus, PredictionResponse, TriggerSource};
use crate::predict::demand::DemandForecastRequest;
use crate::predict::print_time::PrintTimeRequest;
use crate::predict::tabular::TabularRequest;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/predict/print-time", post(predict_print_time))
        .route("/api/predict/demand-forecast", post(predict_demand))
        .route("/api/predict/:family", post(predict_tabular))
        .route("/api/audit/:id", get(get_audit))
        .route("/api/audit/:id/outcome", post(amend_outcome))
        .route("/api/audit", get(query_audit))
        .route("/api/models", get(list_models))
        .route("/api/models/:id/transition", post(transition_model))
        .route("/api/training/enqueue", post(enqueue_training))
        .route("/api/events/order-created", post(ingest_order_event))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Correlation id from the gateway, or a fresh one.
fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get("x-correlation-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

fn user_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[derive(Debug, Deserialize)]
pub struct PrintTimeParams {
    #[serde(default = "default_file_name")]
    pub file_name: String,
    pub material: String,
    pub density: f64,
    pub printer_model: String,
    pub print_speed: f64,
    pub layer_height: f64,
    pub nozzle_temperature: f64,
    pub bed_temperature: f64,
    pub infill_percentage: f64,
}

fn default_file_name() -> String {
    "upload.stl".to_string()
}

/// Geometry arrives as the raw request body; the print parameters ride the
/// query string so the upload stays a single unencoded stream.
async fn predict_print_time(
    State(state): State<AppState>,
    Query(params): Query<PrintTimeParams>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<PredictionResponse>, ApiError> {
    const INSTANCE: &str = "/api/predict/print-time";
    let correlation = correlation_id(&headers);
    let user = user_id(&headers);

    let request = PrintTimeRequest {
        geometry: body.to_vec(),
        file_name: params.file_name,
        material: params.material,
        density: params.density,
        printer_model: params.printer_model,
        print_speed: params.print_speed,
        layer_height: params.layer_height,
        nozzle_temperature: params.nozzle_temperature,
        bed_temperature: params.bed_temperature,
        infill_percentage: params.infill_percentage,
    };

    let response = state
        .pipeline
        .predict_print_time(request, user, correlation.clone())
        .await
        .map_err(|e| ApiError::from_predict(e, INSTANCE, &correlation))?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct DemandForecastBody {
    pub product_id: String,
    pub horizon: u32,
    pub granularity: String,
    pub baseline_date: NaiveDate,
}

async fn predict_demand(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<DemandForecastBody>,
) -> Result<Json<PredictionResponse>, ApiError> {
    const INSTANCE: &str = "/api/predict/demand-forecast";
    let correlation = correlation_id(&headers);
    let user = user_id(&headers);

    let granularity = match body.granularity.as_str() {
        "daily" => Granularity::Daily,
        "weekly" => Granularity::Weekly,
        other => {
            return Err(ApiError::bad_request(
                format!("granularity {other} must be daily or weekly"),
                INSTANCE,
                &correlation,
            ))
        }
    };

    let request = DemandForecastRequest {
        product_id: body.product_id,
        horizon: body.horizon,
        granularity,
        baseline_date: body.baseline_date,
    };
    let response = state
        .pipeline
        .predict_demand(request, user, correlation.clone())
        .await
        .map_err(|e| ApiError::from_predict(e, INSTANCE, &correlation))?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct TabularBody {
    pub features: HashMap<String, f64>,
}

async fn predict_tabular(
    State(state): State<AppState>,
    Path(family_slug): Path<String>,
    headers: HeaderMap,
    Json(body): Json<TabularBody>,
) -> Result<Json<PredictionResponse>, ApiError> {
    let instance = format!("/api/predict/{family_slug}");
    let correlation = correlation_id(&headers);
    let user = user_id(&headers);

    let family = match family_slug.as_str() {
        "price" => ModelFamily::PriceOptimization,
        "churn" => ModelFamily::ChurnPrediction,
        "material-demand" => ModelFamily::MaterialDemand,
        "bottleneck" => ModelFamily::BottleneckDetection,
        other => {
            return Err(ApiError::not_found(
                format!("unknown prediction family {other}"),
                &instance,
                &correlation,
            ))
        }
    };

    let response = state
        .pipeline
        .predict_tabular(
            family,
            TabularRequest {
                features: body.features,
            },
            user,
            correlation.clone(),
        )
        .await
        .map_err(|e| ApiError::from_predict(e, &instance, &correlation))?;
    Ok(Json(response))
}

async fn get_audit(
    State(state): State<AppState>,
    Path(correlation): Path<String>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let instance = format!("/api/audit/{correlation}");
    let request_correlation = correlation_id(&headers);

    let records = state
        .audit
        .find_by_correlation(&correlation)
        .await
        .map_err(|e| ApiError::internal(format!("{e:#}"), &instance, &request_correlation))?;
    if records.is_empty() {
        return Err(ApiError::not_found(
            format!("no audit records for correlation {correlation}"),
            &instance,
            &request_correlation,
        ));
    }
    Ok(Json(serde_json::json!({ "records": records })))
}

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    pub family: String,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

async fn query_audit(
    State(state): State<AppState>,
    Query(query): Query<AuditQuery>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    const INSTANCE: &str = "/api/audit";
    let correlation = correlation_id(&headers);

    let family = ModelFamily::parse(&query.family).ok_or_else(|| {
        ApiError::bad_request(
            format!("unknown family {}", query.family),
            INSTANCE,
            &correlation,
        )
    })?;
    let to = query.to.unwrap_or_else(Utc::now);
    let from = query.from.unwrap_or(to - chrono::Duration::hours(24));

    let records = state
        .audit
        .range(family, from, to)
        .await
        .map_err(|e| ApiError::internal(format!("{e:#}"), INSTANCE, &correlation))?;
    Ok(Json(serde_json::json!({ "count": records.len(), "records": records })))
}

async fn amend_outcome(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(outcome): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let instance = format!("/api/audit/{id}/outcome");
    let correlation = correlation_id(&headers);

    let amended = state
        .audit
        .amend_outcome(&id, &outcome)
        .await
        .map_err(|e| ApiError::internal(format!("{e:#}"), &instance, &correlation))?;
    if !amended {
        return Err(ApiError::conflict(
            "record missing or outcome already set",
            &instance,
            &correlation,
        ));
    }
    Ok(Json(serde_json::json!({ "amended": true })))
}

#[derive(Debug, Deserialize)]
pub struct ModelsQuery {
    pub family: Option<String>,
}

async fn list_models(
    State(state): State<AppState>,
    Query(query): Query<ModelsQuery>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    const INSTANCE: &str = "/api/models";
    let correlation = correlation_id(&headers);

    let family = match &query.family {
        Some(slug) => Some(ModelFamily::parse(slug).ok_or_else(|| {
            ApiError::bad_request(format!("unknown family {slug}"), INSTANCE, &correlation)
        })?),
        None => None,
    };
    let models = state
        .registry
        .list(family)
        .await
        .map_err(|e| ApiError::internal(format!("{e:#}"), INSTANCE, &correlation))?;
    Ok(Json(serde_json::json!({ "models": models })))
}

#[derive(Debug, Deserialize)]
pub struct TransitionBody {
    pub target: String,
}

async fn transition_model(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<TransitionBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let instance = format!("/api/models/{id}/transition");
    let correlation = correlation_id(&headers);

    let target = ModelStatus::parse(&body.target).ok_or_else(|| {
        ApiError::bad_request(
            format!("unknown status {}", body.target),
            &instance,
            &correlation,
        )
    })?;
    state
        .lifecycle
        .transition(&id, target)
        .await
        .map_err(|e| ApiError::conflict(format!("{e:#}"), &instance, &correlation))?;
    Ok(Json(serde_json::json!({ "id": id, "status": target.as_str() })))
}

#[derive(Debug, Deserialize)]
pub struct EnqueueBody {
    pub family: String,
}

async fn enqueue_training(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<EnqueueBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    const INSTANCE: &str = "/api/training/enqueue";
    let correlation = correlation_id(&headers);

    let family = ModelFamily::parse(&body.family).ok_or_else(|| {
        ApiError::bad_request(
            format!("unknown family {}", body.family),
            INSTANCE,
            &correlation,
        )
    })?;
    let model_id = state
        .dispatcher
        .enqueue_for_family(&state.registry, family, TriggerSource::Manual)
        .await
        .map_err(|e| ApiError::internal(format!("{e:#}"), INSTANCE, &correlation))?;
    info!(family = %family, model_id = %model_id, "Manual retraining enqueued");
    Ok(Json(serde_json::json!({ "model_id": model_id, "family": family })))
}

/// Local delivery surface for order events; the production broker
/// subscription feeds the same consumer.
async fn ingest_order_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    const INSTANCE: &str = "/api/events/order-created";
    let correlation = correlation_id(&headers);

    state
        .consumer
        .consume_raw(&body)
        .await
        .map_err(|e| ApiError::internal(format!("{e:#}"), INSTANCE, &correlation))?;
    Ok(Json(serde_json::json!({ "accepted": true })))
}
