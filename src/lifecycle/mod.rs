//! Model lifecycle management.
//!
//! Owns the state machine (`Draft -> Testing -> Active -> Deprecated ->
//! Archived`, with rollback from Deprecated) and the active-swap protocol.
//! Swaps are serialized per family: the registry never shows two Active
//! models for one family, and every swap invalidates the family's cache
//! namespace.

use crate::cache::{family_pattern, DistributedCache};
use crate::models::{MlModel, ModelFamily, ModelStatus, TriggerSource};
use crate::store::ModelRegistry;
use crate::training::dispatcher::{TrainJob, TrainingDispatcher};
use anyhow::{bail, Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Valid state-machine edges, target Active excluded (that is `activate`).
fn transition_allowed(from: ModelStatus, to: ModelStatus) -> bool {
    use ModelStatus::*;
    matches!(
        (from, to),
        (Draft, Testing) | (Testing, Active) | (Active, Deprecated) | (Deprecated, Archived)
            | (Deprecated, Active)
    )
}

pub struct LifecycleManager {
    registry: ModelRegistry,
    cache: Arc<dyn DistributedCache>,
    /// One swap mutex per family; held across the whole active-swap.
    locks: HashMap<ModelFamily, Mutex<()>>,
}

impl LifecycleManager {
    pub fn new(registry: ModelRegistry, cache: Arc<dyn DistributedCache>) -> Self {
        let locks = ModelFamily::ALL
            .into_iter()
            .map(|family| (family, Mutex::new(())))
            .collect();
        Self {
            registry,
            cache,
            locks,
        }
    }

    /// Operator-facing state transition with state-machine enforcement.
    /// Transitions into Active go through the swap protocol.
    pub async fn transition(&self, model_id: &str, target: ModelStatus) -> Result<()> {
        let model = self
            .registry
            .get(model_id)
            .await?
            .with_context(|| format!("model {model_id} not found"))?;

        if !transition_allowed(model.status, target) {
            bail!(
                "transition {} -> {} not allowed for model {}",
                model.status.as_str(),
                target.as_str(),
                model_id
            );
        }

        if target == ModelStatus::Active {
            return self.activate(model_id).await;
        }

        // Draft -> Testing needs no exclusion; the rest ride the family
        // lock so they serialize with swaps.
        if model.status == ModelStatus::Draft {
            self.registry.set_status(model_id, target).await?;
        } else {
            let _guard = self.locks[&model.family].lock().await;
            self.registry.set_status(model_id, target).await?;
        }
        info!(
            model_id,
            from = model.status.as_str(),
            to = target.as_str(),
            "Model transitioned"
        );
        Ok(())
    }

    /// Active-swap protocol: under the family mutex, demote the current
    /// Active and promote `model_id` in one registry transaction, then
    /// best-effort invalidate the family's cache namespace.
    ///
    /// Callable for any model the trainer just produced; the operator
    /// `transition` path enforces the Testing/Deprecated origin.
    pub async fn activate(&self, model_id: &str) -> Result<()> {
        let model = self
            .registry
            .get(model_id)
            .await?
            .with_context(|| format!("model {model_id} not found"))?;

        let _guard = self.locks[&model.family].lock().await;

        let demoted = self.registry.promote_active(model_id, Utc::now()).await?;
        info!(
            model_id,
            family = %model.family,
            version = %model.version,
            demoted = demoted.len(),
            "Model activated"
        );
        metrics::counter!("model_activations", 1);

        // Outside the transaction and best-effort: stale entries are
        // already unreachable because keys embed the version.
        match self.cache.invalidate_pattern(&family_pattern(model.family)).await {
            Ok(removed) => info!(family = %model.family, removed, "Cache namespace invalidated"),
            Err(e) => warn!(family = %model.family, error = %e, "Cache invalidation failed"),
        }
        Ok(())
    }

    /// Enqueue retraining for every Active model older than the cutoff.
    /// Returns the number of jobs enqueued.
    pub async fn sweep_stale(
        &self,
        stale_after: ChronoDuration,
        dispatcher: &TrainingDispatcher,
    ) -> Result<usize> {
        let cutoff = Utc::now() - stale_after;
        let stale = self.registry.active_trained_before(cutoff).await?;
        let mut enqueued = 0;

        for model in &stale {
            let job = TrainJob {
                model_id: model.id.clone(),
                family: model.family,
                trigger: TriggerSource::Scheduled,
            };
            if let Err(e) = dispatcher.enqueue(job) {
                warn!(model_id = %model.id, error = %e, "Failed to enqueue stale-model retrain");
                continue;
            }
            info!(
                model_id = %model.id,
                family = %model.family,
                trained_at = %model.trained_at,
                "Stale model enqueued for retraining"
            );
            enqueued += 1;
        }

        metrics::counter!("staleness_sweep_enqueued", enqueued as u64);
        Ok(enqueued)
    }

    /// Long-running staleness sweep. Wakes every `interval` and enqueues
    /// retraining for models trained more than `stale_after_days` ago.
    pub fn spawn_sweep_loop(
        self: Arc<Self>,
        dispatcher: TrainingDispatcher,
        interval: Duration,
        stale_after_days: i64,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The immediate first tick would re-enqueue everything at boot.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match self
                    .sweep_stale(ChronoDuration::days(stale_after_days), &dispatcher)
                    .await
                {
                    Ok(n) if n > 0 => info!(enqueued = n, "Staleness sweep complete"),
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "Staleness sweep failed"),
                }
            }
        })
    }

    pub async fn active_for(&self, family: ModelFamily) -> Result<Option<MlModel>> {
        self.registry.active_for(family).await
    }
}
