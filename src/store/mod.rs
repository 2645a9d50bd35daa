//! Persistence layer: shared SQLite handle, model registry, audit log,
//! training bookkeeping and the artifact store with its in-memory model
//! handle cache.

pub mod artifacts;
pub mod audit;
pub mod db;
pub mod registry;
pub mod training;

pub use artifacts::{EvictReason, ModelStore};
pub use audit::AuditLog;
pub use db::Db;
pub use registry::ModelRegistry;
pub use training::TrainingStore;
