//! Core entities shared across the prediction and training paths.
//!
//! Everything here is plain data. Mutation rules (who may flip a model's
//! status, when an audit row may be amended) are enforced by the lifecycle
//! manager and the stores, not by these types.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Prediction family. Keys models, caches, audit rows and trainers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelFamily {
    PrintTime,
    DemandForecast,
    PriceOptimization,
    ChurnPrediction,
    MaterialDemand,
    BottleneckDetection,
}

impl ModelFamily {
    pub const ALL: [ModelFamily; 6] = [
        Self::PrintTime,
        Self::DemandForecast,
        Self::PriceOptimization,
        Self::ChurnPrediction,
        Self::MaterialDemand,
        Self::BottleneckDetection,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PrintTime => "print_time",
            Self::DemandForecast => "demand_forecast",
            Self::PriceOptimization => "price_optimization",
            Self::ChurnPrediction => "churn_prediction",
            Self::MaterialDemand => "material_demand",
            Self::BottleneckDetection => "bottleneck_detection",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "print_time" => Some(Self::PrintTime),
            "demand_forecast" => Some(Self::DemandForecast),
            "price_optimization" => Some(Self::PriceOptimization),
            "churn_prediction" => Some(Self::ChurnPrediction),
            "material_demand" => Some(Self::MaterialDemand),
            "bottleneck_detection" => Some(Self::BottleneckDetection),
            _ => None,
        }
    }

    /// Default cache TTL for prediction responses of this family.
    pub fn default_ttl(&self) -> Duration {
        match self {
            Self::PrintTime => Duration::from_secs(24 * 3600),
            Self::DemandForecast => Duration::from_secs(6 * 3600),
            Self::PriceOptimization => Duration::from_secs(3600),
            Self::ChurnPrediction => Duration::from_secs(24 * 3600),
            Self::MaterialDemand => Duration::from_secs(12 * 3600),
            Self::BottleneckDetection => Duration::from_secs(6 * 3600),
        }
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Model lifecycle state. Transition rules live in `lifecycle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelStatus {
    Draft,
    Testing,
    Active,
    Deprecated,
    Archived,
}

impl ModelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Testing => "testing",
            Self::Active => "active",
            Self::Deprecated => "deprecated",
            Self::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "testing" => Some(Self::Testing),
            "active" => Some(Self::Active),
            "deprecated" => Some(Self::Deprecated),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }
}

/// Semantic model version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ModelVersion {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }

    pub fn bump_minor(&self) -> Self {
        Self {
            major: self.major,
            minor: self.minor + 1,
            patch: 0,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next()?.parse().ok()?;
        let patch = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self { major, minor, patch })
    }
}

impl fmt::Display for ModelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Registry entity for one trained model version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MlModel {
    pub id: String,
    pub family: ModelFamily,
    pub version: ModelVersion,
    pub status: ModelStatus,
    pub algorithm: String,
    /// Family-appropriate subset of r2/mae/rmse/mape/precision/recall/f1/auc.
    pub metrics: HashMap<String, f64>,
    pub trained_at: DateTime<Utc>,
    /// Set on first transition to Active, never cleared.
    pub deployed_at: Option<DateTime<Utc>>,
    /// Opaque handle understood by the model store.
    pub artifact_path: String,
    pub training_job_id: Option<String>,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrainingJobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TrainingJobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// What caused a retraining job to be enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerSource {
    Manual,
    Scheduled,
    AutoRetrain,
}

impl TriggerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Scheduled => "scheduled",
            Self::AutoRetrain => "auto-retrain",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "manual" => Some(Self::Manual),
            "scheduled" => Some(Self::Scheduled),
            "auto-retrain" => Some(Self::AutoRetrain),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingJob {
    pub id: String,
    pub family: ModelFamily,
    pub status: TrainingJobStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub dataset_id: Option<String>,
    /// Non-null once the job reaches Completed.
    pub result_model_id: Option<String>,
    /// Non-null once the job reaches Failed.
    pub error_message: Option<String>,
    pub trigger: TriggerSource,
    pub hyperparameters: HashMap<String, f64>,
    pub validation: HashMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingDataset {
    pub id: String,
    pub family: ModelFamily,
    pub record_count: u64,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub feature_columns: Vec<String>,
    pub target_column: String,
    /// SHA-256 of contents, used for deduplication.
    pub dataset_hash: Option<String>,
    pub quality_metrics: HashMap<String, f64>,
    pub artifact_path: Option<String>,
}

/// One ingested training row (one order line item for demand families).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetRecord {
    pub id: String,
    pub dataset_id: String,
    pub product_id: String,
    pub quantity: f64,
    pub unit_price: f64,
    pub order_date: NaiveDate,
    pub is_holiday: bool,
    pub raw: serde_json::Value,
}

/// Audit status of a served prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditStatus {
    Success,
    CachedHit,
    Failure,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::CachedHit => "cached_hit",
            Self::Failure => "failure",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Self::Success),
            "cached_hit" => Some(Self::CachedHit),
            "failure" => Some(Self::Failure),
            _ => None,
        }
    }
}

/// Append-only audit row. Only `actual_outcome` may ever be written after
/// insert, and at most once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub id: String,
    pub correlation_id: String,
    pub family: ModelFamily,
    pub model_version: String,
    pub input_features: serde_json::Value,
    pub output: serde_json::Value,
    pub status: AuditStatus,
    pub response_ms: i64,
    pub user_id: Option<String>,
    pub tenant_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub actual_outcome: Option<serde_json::Value>,
    pub error_message: Option<String>,
}

/// Forecast granularity for demand requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Daily,
    Weekly,
}

impl Granularity {
    pub fn stride(&self) -> usize {
        match self {
            Self::Daily => 1,
            Self::Weekly => 7,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
        }
    }
}

/// One forecasted period in a demand response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub date: NaiveDate,
    pub forecast: f64,
    pub lower: f64,
    pub upper: f64,
    pub anomalous: bool,
}

/// Typed per-family response metadata. Converted to a JSON map only at the
/// transport boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FamilyMetadata {
    PrintTime {
        triangle_count: u32,
        volume: f64,
        surface_area: f64,
        layer_count: u32,
        support_pct: f64,
        complexity: f64,
        material: String,
        infill_pct: f64,
    },
    Demand {
        product_id: String,
        granularity: Granularity,
        horizon: u32,
        forecast_count: usize,
        anomaly_count: usize,
        points: Vec<ForecastPoint>,
    },
    Tabular {
        features_used: Vec<String>,
        threshold: Option<f64>,
    },
}

/// Whether the response was computed or served from cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheOutcome {
    Hit,
    Miss,
}

/// Normalized prediction response, identical across families.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub family: ModelFamily,
    pub predicted: f64,
    pub unit: String,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub explanation: String,
    pub model_version: String,
    pub cache_status: CacheOutcome,
    pub correlation_id: String,
    pub metadata: FamilyMetadata,
}
