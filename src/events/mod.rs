//! Domain-event ingestion into the training dataset.

pub mod order_consumer;
pub mod types;

pub use order_consumer::OrderEventConsumer;
pub use types::{OrderCreatedEvent, OrderItem};
