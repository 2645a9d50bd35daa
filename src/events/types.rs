//! Typed event envelopes delivered by the message broker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Price consistency tolerance: `line_total` must equal
/// `quantity * unit_price` within this absolute error.
pub const LINE_TOTAL_TOLERANCE: f64 = 0.01;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCreatedEvent {
    pub message_id: String,
    pub order_id: String,
    pub customer_id: String,
    pub items: Vec<OrderItem>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: String,
    pub quantity: f64,
    pub unit_price: f64,
    pub line_total: f64,
}

impl OrderCreatedEvent {
    /// All payload problems at once; an empty list means the event is
    /// ingestible.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.message_id.is_empty() {
            errors.push("message_id is empty".to_string());
        }
        if self.order_id.is_empty() {
            errors.push("order_id is empty".to_string());
        }
        if self.customer_id.is_empty() {
            errors.push("customer_id is empty".to_string());
        }
        if self.items.is_empty() {
            errors.push("order has no line items".to_string());
        }
        for (i, item) in self.items.iter().enumerate() {
            if item.product_id.is_empty() {
                errors.push(format!("item {i}: product_id is empty"));
            }
            if item.quantity <= 0.0 || !item.quantity.is_finite() {
                errors.push(format!("item {i}: quantity {} must be positive", item.quantity));
            }
            if item.unit_price < 0.0 || !item.unit_price.is_finite() {
                errors.push(format!(
                    "item {i}: unit_price {} must be non-negative",
                    item.unit_price
                ));
            }
            let expected = item.quantity * item.unit_price;
            if (item.line_total - expected).abs() > LINE_TOTAL_TOLERANCE {
                errors.push(format!(
                    "item {i}: line_total {} inconsistent with {} * {}",
                    item.line_total, item.quantity, item.unit_price
                ));
            }
        }
        errors
    }
}
