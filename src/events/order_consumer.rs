//! OrderCreated consumer: one training record per line item.
//!
//! Malformed payloads are logged and dropped so a bad message can never
//! poison the subscription; only transport-level failures (the store being
//! down) propagate, letting the broker redeliver. Deduplication is a
//! process-local bounded set; the broker delivers at-least-once and the
//! downstream writes tolerate rare duplicates, so durable idempotency
//! stays a deferred concern.

use crate::events::types::OrderCreatedEvent;
use crate::features::calendar::HolidayCalendar;
use crate::models::{DatasetRecord, ModelFamily, TriggerSource};
use crate::store::{ModelRegistry, TrainingStore};
use crate::training::dispatcher::TrainingDispatcher;
use anyhow::Result;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{HashSet, VecDeque};
use tracing::{debug, info, warn};

/// Bounded insertion-order dedup set.
struct DedupSet {
    seen: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl DedupSet {
    fn new(capacity: usize) -> Self {
        Self {
            seen: HashSet::new(),
            order: VecDeque::with_capacity(capacity.min(4096)),
            capacity: capacity.max(1),
        }
    }

    /// Returns false when the id was already present.
    fn insert(&mut self, id: &str) -> bool {
        if self.seen.contains(id) {
            return false;
        }
        if self.order.len() >= self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        self.seen.insert(id.to_string());
        self.order.push_back(id.to_string());
        true
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

pub struct OrderEventConsumer {
    training_store: TrainingStore,
    registry: ModelRegistry,
    dispatcher: TrainingDispatcher,
    calendar: HolidayCalendar,
    dedup: Mutex<DedupSet>,
    retrain_threshold: u64,
}

impl OrderEventConsumer {
    pub fn new(
        training_store: TrainingStore,
        registry: ModelRegistry,
        dispatcher: TrainingDispatcher,
        calendar: HolidayCalendar,
        dedup_capacity: usize,
        retrain_threshold: u64,
    ) -> Self {
        Self {
            training_store,
            registry,
            dispatcher,
            calendar,
            dedup: Mutex::new(DedupSet::new(dedup_capacity)),
            retrain_threshold: retrain_threshold.max(1),
        }
    }

    /// Handle one raw broker payload. Undecodable bytes are dropped like
    /// any other malformed event.
    pub async fn consume_raw(&self, payload: &[u8]) -> Result<()> {
        let event: OrderCreatedEvent = match serde_json::from_slice(payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Discarding undecodable order event");
                metrics::counter!("order_events_discarded", 1);
                return Ok(());
            }
        };
        self.consume(event).await
    }

    /// Ingest one event. Returns Err only for transport-level failures,
    /// which the broker should retry.
    pub async fn consume(&self, event: OrderCreatedEvent) -> Result<()> {
        let problems = event.validate();
        if !problems.is_empty() {
            warn!(
                message_id = %event.message_id,
                order_id = %event.order_id,
                problems = %problems.join("; "),
                "Discarding malformed order event"
            );
            metrics::counter!("order_events_discarded", 1);
            return Ok(());
        }

        if !self.dedup.lock().insert(&event.message_id) {
            debug!(message_id = %event.message_id, "Duplicate order event skipped");
            metrics::counter!("order_events_duplicate", 1);
            return Ok(());
        }

        let family = ModelFamily::DemandForecast;
        let dataset = self.training_store.ensure_dataset(family).await?;
        let order_date = event.created_at.date_naive();
        let is_holiday = self.calendar.is_holiday(order_date);

        let mut count = dataset.record_count;
        for item in &event.items {
            let record = DatasetRecord {
                id: uuid::Uuid::new_v4().to_string(),
                dataset_id: dataset.id.clone(),
                product_id: item.product_id.clone(),
                quantity: item.quantity,
                unit_price: item.unit_price,
                order_date,
                is_holiday,
                raw: json!({
                    "message_id": event.message_id.as_str(),
                    "order_id": event.order_id.as_str(),
                    "customer_id": event.customer_id.as_str(),
                    "line_total": item.line_total,
                }),
            };
            count = self.training_store.append_record(&record).await?;
        }
        metrics::counter!("order_events_ingested", 1);

        let before = dataset.record_count;
        if crossed_threshold(before, count, self.retrain_threshold) {
            info!(
                family = %family,
                record_count = count,
                threshold = self.retrain_threshold,
                "Dataset threshold crossed, enqueueing retraining"
            );
            if let Err(e) = self
                .dispatcher
                .enqueue_for_family(&self.registry, family, TriggerSource::AutoRetrain)
                .await
            {
                // Queue loss is an operational fault, not a reason to
                // reject the already-ingested event.
                warn!(error = %e, "Failed to enqueue threshold retraining");
            }
        }
        Ok(())
    }

    pub fn dedup_len(&self) -> usize {
        self.dedup.lock().len()
    }
}

/// True when the count passed a multiple of `threshold` in this step.
fn crossed_threshold(before: u64, after: u64, threshold: u64) -> bool {
    after / threshold > before / threshold
}
