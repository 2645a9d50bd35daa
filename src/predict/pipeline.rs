//! The prediction pipeline.
//!
//! Per request: validate, resolve the active model, consult the cache,
//! load the model, extract features and infer, write back, audit, return.
//! Identical in-flight requests coalesce to one computation. Cache and
//! audit outages never fail a prediction; predictor failures are audited
//! and re-raised.

use crate::cache::{fingerprint, key::bytes_digest, DistributedCache};
use crate::config::ServiceConfig;
use crate::error::PredictError;
use crate::features::stl::parse_stl;
use crate::models::{
    AuditStatus, CacheOutcome, MlModel, ModelFamily, PredictionRecord, PredictionResponse,
};
use crate::predict::artifact::ModelArtifact;
use crate::predict::demand::{self, DemandForecastRequest};
use crate::predict::print_time::{self, PrintTimeRequest};
use crate::predict::singleflight::SingleFlight;
use crate::predict::tabular::{self, TabularRequest};
use crate::predict::PredictionOutcome;
use crate::store::{AuditLog, ModelRegistry, ModelStore};
use anyhow::Result;
use chrono::Utc;
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

#[derive(Clone)]
pub struct PredictionPipeline {
    config: Arc<ServiceConfig>,
    registry: ModelRegistry,
    audit: AuditLog,
    model_store: Arc<ModelStore>,
    cache: Arc<dyn DistributedCache>,
    flight: SingleFlight,
}

impl PredictionPipeline {
    pub fn new(
        config: Arc<ServiceConfig>,
        registry: ModelRegistry,
        audit: AuditLog,
        model_store: Arc<ModelStore>,
        cache: Arc<dyn DistributedCache>,
    ) -> Self {
        Self {
            config,
            registry,
            audit,
            model_store,
            cache,
            flight: SingleFlight::new(),
        }
    }

    pub async fn predict_print_time(
        &self,
        req: PrintTimeRequest,
        user_id: Option<String>,
        correlation_id: String,
    ) -> Result<PredictionResponse, PredictError> {
        req.validate()?;
        // Hashing up to 50 MB is worth a blocking slot.
        let (req, digest) = tokio::task::spawn_blocking(move || {
            let digest = bytes_digest(&req.geometry);
            (req, digest)
        })
        .await
        .map_err(|e| PredictError::Internal(format!("digest task failed: {e}")))?;
        let inputs = req.fingerprint_inputs(&digest);

        self.run(
            ModelFamily::PrintTime,
            inputs,
            user_id,
            correlation_id,
            move |artifact| {
                let model = artifact.as_linear().ok_or_else(|| {
                    PredictError::Internal("print-time artifact is not a linear model".into())
                })?;
                let metrics = parse_stl(&req.geometry)
                    .map_err(|e| PredictError::InvalidData(e.to_string()))?;
                print_time::predict(model, &req, &metrics)
            },
        )
        .await
    }

    pub async fn predict_demand(
        &self,
        req: DemandForecastRequest,
        user_id: Option<String>,
        correlation_id: String,
    ) -> Result<PredictionResponse, PredictError> {
        req.validate()?;
        let inputs = req.fingerprint_inputs();

        self.run(
            ModelFamily::DemandForecast,
            inputs,
            user_id,
            correlation_id,
            move |artifact| {
                let model = artifact.as_forecast().ok_or_else(|| {
                    PredictError::Internal("demand artifact is not a forecast model".into())
                })?;
                demand::forecast(model, &req)
            },
        )
        .await
    }

    /// Price, churn, material-demand and bottleneck share this entry.
    pub async fn predict_tabular(
        &self,
        family: ModelFamily,
        req: TabularRequest,
        user_id: Option<String>,
        correlation_id: String,
    ) -> Result<PredictionResponse, PredictError> {
        req.validate()?;
        let inputs = req.fingerprint_inputs();

        self.run(family, inputs, user_id, correlation_id, move |artifact| {
            let model = artifact.as_linear().ok_or_else(|| {
                PredictError::Internal(format!("{family} artifact is not a linear model"))
            })?;
            tabular::predict(family, model, &req)
        })
        .await
    }

    async fn run<F>(
        &self,
        family: ModelFamily,
        inputs: serde_json::Value,
        user_id: Option<String>,
        correlation_id: String,
        compute: F,
    ) -> Result<PredictionResponse, PredictError>
    where
        F: FnOnce(Arc<ModelArtifact>) -> Result<PredictionOutcome, PredictError> + Send + 'static,
    {
        let started = Instant::now();
        let deadline = started + self.config.request_timeout;

        let model = self.resolve_active(family).await?;
        let version = model.version.to_string();
        let key = fingerprint(family, &inputs, &version);

        if let Some(resp) = self.cache_lookup(&key, &correlation_id).await {
            self.audit_entry(
                family,
                &version,
                &inputs,
                serde_json::to_value(&resp).unwrap_or_default(),
                AuditStatus::CachedHit,
                None,
                user_id,
                &correlation_id,
                started,
            )
            .await;
            return Ok(resp);
        }

        let _permit = timeout_at(deadline, self.flight.acquire(&key))
            .await
            .map_err(|_| PredictError::Internal("request deadline exceeded".into()))?;

        // Another flight may have populated the key while we waited.
        if let Some(resp) = self.cache_lookup(&key, &correlation_id).await {
            self.audit_entry(
                family,
                &version,
                &inputs,
                serde_json::to_value(&resp).unwrap_or_default(),
                AuditStatus::CachedHit,
                None,
                user_id,
                &correlation_id,
                started,
            )
            .await;
            return Ok(resp);
        }

        let outcome = {
            let store = self.model_store.clone();
            let handle = model.artifact_path.clone();
            let work = tokio::task::spawn_blocking(move || -> Result<_, PredictError> {
                let artifact = store
                    .load(&handle)
                    .map_err(|e| PredictError::Internal(format!("model load failed: {e:#}")))?;
                compute(artifact)
            });
            match timeout_at(deadline, work).await {
                Err(_) => {
                    return Err(PredictError::Internal("request deadline exceeded".into()))
                }
                Ok(Err(join_err)) => {
                    Err(PredictError::Internal(format!("predictor panicked: {join_err}")))
                }
                Ok(Ok(result)) => result,
            }
        };

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(family = %family, error = %err, "Prediction failed");
                metrics::counter!("predictions_failed", 1);
                self.audit_entry(
                    family,
                    &version,
                    &inputs,
                    serde_json::Value::Null,
                    AuditStatus::Failure,
                    Some(err.message()),
                    user_id,
                    &correlation_id,
                    started,
                )
                .await;
                return Err(err);
            }
        };

        let response = PredictionResponse {
            family,
            predicted: outcome.predicted,
            unit: outcome.unit,
            lower_bound: outcome.lower,
            upper_bound: outcome.upper,
            explanation: outcome.explanation,
            model_version: version.clone(),
            cache_status: CacheOutcome::Miss,
            correlation_id: correlation_id.clone(),
            metadata: outcome.metadata,
        };

        match serde_json::to_vec(&response) {
            Ok(bytes) => {
                let ttl = self.config.cache_ttl(family);
                if let Err(e) = self.cache.set(&key, bytes, ttl).await {
                    warn!(key, error = %e, "Cache write failed");
                    metrics::counter!("cache_write_errors", 1);
                }
            }
            Err(e) => warn!(error = %e, "Response serialization for cache failed"),
        }

        metrics::counter!("predictions_served", 1);
        self.audit_entry(
            family,
            &version,
            &inputs,
            serde_json::to_value(&response).unwrap_or_default(),
            AuditStatus::Success,
            None,
            user_id,
            &correlation_id,
            started,
        )
        .await;

        Ok(response)
    }

    async fn resolve_active(&self, family: ModelFamily) -> Result<MlModel, PredictError> {
        let registry = self.registry.clone();
        let found = with_retries("resolve_active", || {
            let registry = registry.clone();
            async move { registry.active_for(family).await }
        })
        .await
        .map_err(|e| PredictError::Internal(format!("model registry unavailable: {e:#}")))?;

        found.ok_or(PredictError::Unavailable(family))
    }

    /// Cache read with hit rewriting: the stored response keeps its payload
    /// but reports this request's correlation id and a hit status. Errors
    /// degrade to a miss.
    async fn cache_lookup(&self, key: &str, correlation_id: &str) -> Option<PredictionResponse> {
        let bytes = match self.cache.get(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!(key, error = %e, "Cache read failed, treating as miss");
                metrics::counter!("cache_read_errors", 1);
                return None;
            }
        };
        match serde_json::from_slice::<PredictionResponse>(&bytes) {
            Ok(mut resp) => {
                resp.cache_status = CacheOutcome::Hit;
                resp.correlation_id = correlation_id.to_string();
                debug!(key, "Cache hit");
                Some(resp)
            }
            Err(e) => {
                warn!(key, error = %e, "Cache entry undecodable, treating as miss");
                None
            }
        }
    }

    /// Append an audit row; bounded retries, then swallow. The audit path
    /// may never fail a prediction.
    #[allow(clippy::too_many_arguments)]
    async fn audit_entry(
        &self,
        family: ModelFamily,
        version: &str,
        inputs: &serde_json::Value,
        output: serde_json::Value,
        status: AuditStatus,
        error_message: Option<String>,
        user_id: Option<String>,
        correlation_id: &str,
        started: Instant,
    ) {
        let record = PredictionRecord {
            id: uuid::Uuid::new_v4().to_string(),
            correlation_id: correlation_id.to_string(),
            family,
            model_version: version.to_string(),
            input_features: inputs.clone(),
            output,
            status,
            response_ms: started.elapsed().as_millis() as i64,
            user_id,
            tenant_id: None,
            timestamp: Utc::now(),
            actual_outcome: None,
            error_message,
        };

        let audit = self.audit.clone();
        let result = with_retries("audit_append", || {
            let audit = audit.clone();
            let record = record.clone();
            async move { audit.append(&record).await }
        })
        .await;

        if let Err(e) = result {
            warn!(correlation_id, error = %e, "Audit append failed after retries");
            metrics::counter!("audit_write_errors", 1);
        }
    }
}

/// Bounded exponential backoff: 3 attempts, base 100 ms, jittered.
async fn with_retries<T, F, Fut>(label: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    const ATTEMPTS: u32 = 3;
    let mut delay = Duration::from_millis(100);
    let mut last_err = None;

    for attempt in 1..=ATTEMPTS {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                warn!(label, attempt, error = %e, "Store operation failed");
                last_err = Some(e);
            }
        }
        if attempt < ATTEMPTS {
            let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..50));
            tokio::time::sleep(delay + jitter).await;
            delay *= 2;
        }
    }
    Err(last_err.expect("at least one attempt"))
}
