//! Shared application state wired at startup.

use crate::cache::{DistributedCache, InMemoryCache};
use crate::config::ServiceConfig;
use crate::events::OrderEventConsumer;
use crate::features::HolidayCalendar;
use crate::lifecycle::LifecycleManager;
use crate::predict::PredictionPipeline;
use crate::store::{AuditLog, Db, ModelRegistry, ModelStore, TrainingStore};
use crate::training::{TrainJob, TrainerRegistry, TrainingConsumer, TrainingDispatcher};
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServiceConfig>,
    pub registry: ModelRegistry,
    pub audit: AuditLog,
    pub training_store: TrainingStore,
    pub model_store: Arc<ModelStore>,
    pub cache: Arc<dyn DistributedCache>,
    pub pipeline: PredictionPipeline,
    pub lifecycle: Arc<LifecycleManager>,
    pub dispatcher: TrainingDispatcher,
    pub consumer: Arc<OrderEventConsumer>,
}

impl AppState {
    /// Build the full dependency graph against the configured SQLite file
    /// and the in-process cache. Returns the training-job receiver for the
    /// consumer task.
    pub async fn build(config: ServiceConfig) -> Result<(Self, mpsc::UnboundedReceiver<TrainJob>)> {
        let cache: Arc<dyn DistributedCache> = Arc::new(InMemoryCache::new());
        Self::build_with_cache(config, cache).await
    }

    /// Same wiring with an externally provided cache implementation.
    pub async fn build_with_cache(
        config: ServiceConfig,
        cache: Arc<dyn DistributedCache>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<TrainJob>)> {
        let config = Arc::new(config);
        let db = Db::open(&config.db_path)?;
        let registry = ModelRegistry::new(db.clone()).await?;
        let audit = AuditLog::new(db.clone()).await?;
        let training_store = TrainingStore::new(db).await?;
        let model_store = Arc::new(ModelStore::new(
            config.artifact_dir.clone(),
            config.model_cache_capacity,
        )?);

        let calendar = HolidayCalendar::new(config.holidays.iter().copied());
        let lifecycle = Arc::new(LifecycleManager::new(registry.clone(), cache.clone()));
        let (dispatcher, job_rx) = TrainingDispatcher::new();

        let pipeline = PredictionPipeline::new(
            config.clone(),
            registry.clone(),
            audit.clone(),
            model_store.clone(),
            cache.clone(),
        );
        let consumer = Arc::new(OrderEventConsumer::new(
            training_store.clone(),
            registry.clone(),
            dispatcher.clone(),
            calendar,
            config.dedup_capacity,
            config.retrain_threshold,
        ));

        Ok((
            Self {
                config,
                registry,
                audit,
                training_store,
                model_store,
                cache,
                pipeline,
                lifecycle,
                dispatcher,
                consumer,
            },
            job_rx,
        ))
    }

    /// The single training consumer for this process.
    pub fn training_consumer(&self) -> TrainingConsumer {
        let calendar = HolidayCalendar::new(self.config.holidays.iter().copied());
        TrainingConsumer {
            registry: self.registry.clone(),
            training_store: self.training_store.clone(),
            model_store: self.model_store.clone(),
            lifecycle: self.lifecycle.clone(),
            trainers: Arc::new(TrainerRegistry::with_defaults(calendar)),
            max_records: 50_000,
        }
    }
}
