//! Forgecast Backend Library
//!
//! Exposes the prediction, lifecycle and training modules for the binary
//! and the integration tests.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod features;
pub mod lifecycle;
pub mod models;
pub mod predict;
pub mod store;
pub mod training;

// Re-export the pieces startup and tests touch most.
pub use api::{router, AppState};
pub use config::ServiceConfig;
pub use error::PredictError;
pub use models::{ModelFamily, ModelStatus, PredictionResponse};
