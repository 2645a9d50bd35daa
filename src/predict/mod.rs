//! Prediction families: request DTOs with validation, feature-to-inference
//! adapters, and the orchestrating pipeline.

pub mod artifact;
pub mod demand;
pub mod pipeline;
pub mod print_time;
pub mod singleflight;
pub mod tabular;

pub use pipeline::PredictionPipeline;

use crate::models::FamilyMetadata;

/// What a family predictor hands back to the pipeline. The pipeline adds
/// version, cache status and correlation id to form the response.
#[derive(Debug, Clone)]
pub struct PredictionOutcome {
    pub predicted: f64,
    pub unit: String,
    pub lower: f64,
    pub upper: f64,
    pub explanation: String,
    pub metadata: FamilyMetadata,
}
