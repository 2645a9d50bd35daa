//! Model training: the dispatcher queue with its single consumer, and the
//! trainer seam with default in-process implementations.

pub mod dispatcher;
pub mod trainer;

pub use dispatcher::{TrainJob, TrainingConsumer, TrainingDispatcher};
pub use trainer::{Trainer, TrainerRegistry, TrainedModel};
