//! Training dispatcher: an unbounded multi-producer queue drained by one
//! consumer.
//!
//! Producers are the event consumers, the staleness sweep and operator
//! commands. Jobs run strictly in enqueue order. A failed job is marked
//! Failed and never retried automatically; operators re-enqueue.

use crate::models::{
    MlModel, ModelFamily, ModelStatus, ModelVersion, TrainingJob, TrainingJobStatus, TriggerSource,
};
use crate::store::{ModelRegistry, ModelStore, TrainingStore};
use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::lifecycle::LifecycleManager;
use crate::training::trainer::TrainerRegistry;

#[derive(Debug, Clone)]
pub struct TrainJob {
    pub model_id: String,
    pub family: ModelFamily,
    pub trigger: TriggerSource,
}

/// Producer handle. Cheap to clone; enqueue never blocks.
#[derive(Clone)]
pub struct TrainingDispatcher {
    tx: mpsc::UnboundedSender<TrainJob>,
}

impl TrainingDispatcher {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TrainJob>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn enqueue(&self, job: TrainJob) -> Result<()> {
        self.tx
            .send(job)
            .map_err(|_| anyhow::anyhow!("training consumer is gone"))
    }

    /// Enqueue retraining for a family, creating a Draft registry entry
    /// when the family has no model yet. Returns the target model id.
    pub async fn enqueue_for_family(
        &self,
        registry: &ModelRegistry,
        family: ModelFamily,
        trigger: TriggerSource,
    ) -> Result<String> {
        let model_id = match registry.active_for(family).await? {
            Some(model) => model.id,
            None => {
                let version = registry
                    .max_version(family)
                    .await?
                    .map(|v| v.bump_minor())
                    .unwrap_or(ModelVersion::new(0, 1, 0));
                let draft = MlModel {
                    id: uuid::Uuid::new_v4().to_string(),
                    family,
                    version,
                    status: ModelStatus::Draft,
                    algorithm: String::new(),
                    metrics: HashMap::new(),
                    trained_at: Utc::now(),
                    deployed_at: None,
                    artifact_path: String::new(),
                    training_job_id: None,
                    metadata: HashMap::new(),
                };
                registry.insert(&draft).await?;
                info!(family = %family, model_id = %draft.id, "Created draft model for first training");
                draft.id
            }
        };

        self.enqueue(TrainJob {
            model_id: model_id.clone(),
            family,
            trigger,
        })?;
        Ok(model_id)
    }
}

/// The single consumer. `spawn` owns the receive loop for the process
/// lifetime.
pub struct TrainingConsumer {
    pub registry: ModelRegistry,
    pub training_store: TrainingStore,
    pub model_store: Arc<ModelStore>,
    pub lifecycle: Arc<LifecycleManager>,
    pub trainers: Arc<TrainerRegistry>,
    /// Upper bound on records pulled per training run.
    pub max_records: usize,
}

impl TrainingConsumer {
    pub fn spawn(self, mut rx: mpsc::UnboundedReceiver<TrainJob>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!("Training consumer started");
            while let Some(job) = rx.recv().await {
                let model_id = job.model_id.clone();
                let family = job.family;
                match self.process(job).await {
                    Ok(job_id) => {
                        metrics::counter!("training_jobs_completed", 1);
                        info!(model_id = %model_id, family = %family, job_id = %job_id, "Training job complete");
                    }
                    Err(e) => {
                        metrics::counter!("training_jobs_failed", 1);
                        let detail = format!("{e:#}");
                        error!(model_id = %model_id, family = %family, error = %detail, "Training job failed");
                    }
                }
            }
            info!("Training consumer stopped: queue closed");
        })
    }

    /// Run one job to a terminal state. The job row reaches Completed or
    /// Failed in all paths; errors are returned for logging only.
    pub async fn process(&self, job: TrainJob) -> Result<String> {
        let row = TrainingJob {
            id: uuid::Uuid::new_v4().to_string(),
            family: job.family,
            status: TrainingJobStatus::Queued,
            started_at: None,
            finished_at: None,
            dataset_id: None,
            result_model_id: None,
            error_message: None,
            trigger: job.trigger,
            hyperparameters: HashMap::new(),
            validation: HashMap::new(),
        };
        self.training_store.insert_job(&row).await?;
        self.training_store.mark_running(&row.id).await?;

        match self.train_and_swap(&job, &row.id).await {
            Ok(()) => Ok(row.id),
            Err(e) => {
                let message = format!("{e:#}");
                if let Err(mark_err) = self.training_store.mark_failed(&row.id, &message).await {
                    warn!(job_id = %row.id, error = %mark_err, "Failed to persist job failure");
                }
                Err(e)
            }
        }
    }

    async fn train_and_swap(&self, job: &TrainJob, job_id: &str) -> Result<()> {
        let mut model = self
            .registry
            .get(&job.model_id)
            .await?
            .with_context(|| format!("model {} not found", job.model_id))?;

        let dataset = self
            .training_store
            .latest_dataset(job.family)
            .await?
            .with_context(|| format!("no dataset for family {}", job.family))?;
        if dataset.record_count == 0 {
            anyhow::bail!("dataset {} has no records", dataset.id);
        }

        let records = self
            .training_store
            .records_for_family(job.family, self.max_records)
            .await?;

        let distinct_products = records
            .iter()
            .map(|r| r.product_id.as_str())
            .collect::<std::collections::HashSet<_>>()
            .len();
        let quality = HashMap::from([
            ("records_used".to_string(), records.len() as f64),
            ("distinct_products".to_string(), distinct_products as f64),
        ]);
        self.training_store
            .update_quality_metrics(&dataset.id, &quality)
            .await?;

        let trainer = self
            .trainers
            .get(job.family)
            .with_context(|| format!("no trainer registered for family {}", job.family))?;
        let trained = trainer
            .train(job.family, &records)
            .await
            .context("trainer failed")?;

        // First training keeps the version assigned at Draft creation; a
        // retrain of an already-trained model bumps minor.
        let new_version = if model.artifact_path.is_empty() {
            model.version
        } else {
            model.version.bump_minor()
        };
        let handle = self
            .model_store
            .persist(job.family, new_version, &trained.artifact)
            .context("persist artifact")?;

        model.version = new_version;
        model.algorithm = trained.algorithm;
        model.metrics = trained.metrics;
        model.trained_at = Utc::now();
        model.artifact_path = handle;
        model.training_job_id = Some(job_id.to_string());
        self.registry.update(&model).await?;

        // Active-swap: statuses, deployment date and cache invalidation.
        self.lifecycle.activate(&model.id).await?;

        self.training_store
            .mark_completed(
                job_id,
                &model.id,
                &dataset.id,
                &trained.validation,
                &trained.hyperparameters,
            )
            .await?;
        Ok(())
    }
}
