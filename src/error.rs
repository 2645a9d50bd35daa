//! Prediction error taxonomy.
//!
//! The pipeline is the only place that converts these into user-visible
//! responses. Transient cache/audit failures never appear here; they are
//! logged and swallowed below the prediction path.

use crate::models::ModelFamily;
use std::fmt;

#[derive(Debug, Clone)]
pub enum PredictError {
    /// Client-side constraint violation. Never retried.
    Validation(Vec<String>),
    /// No Active model for the family. Retry-able by the client.
    Unavailable(ModelFamily),
    /// Malformed input payload (bad STL and friends).
    InvalidData(String),
    /// Predictor or extractor failure. Audited as Failure, re-raised.
    Internal(String),
}

impl PredictError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(vec![msg.into()])
    }

    /// Joined message suitable for the audit row's error column.
    pub fn message(&self) -> String {
        match self {
            Self::Validation(msgs) => msgs.join("; "),
            Self::Unavailable(family) => format!("no active model for family {}", family),
            Self::InvalidData(msg) => msg.clone(),
            Self::Internal(msg) => msg.clone(),
        }
    }
}

impl fmt::Display for PredictError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation(msgs) => write!(f, "validation failed: {}", msgs.join("; ")),
            Self::Unavailable(family) => {
                write!(f, "no active model for family {}", family)
            }
            Self::InvalidData(msg) => write!(f, "invalid input data: {}", msg),
            Self::Internal(msg) => write!(f, "prediction failed: {}", msg),
        }
    }
}

impl std::error::Error for PredictError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_joins_validation_messages() {
        let err = PredictError::Validation(vec!["a".into(), "b".into()]);
        assert_eq!(err.to_string(), "validation failed: a; b");
        assert_eq!(err.message(), "a; b");
    }

    #[test]
    fn test_unavailable_names_family() {
        let err = PredictError::Unavailable(ModelFamily::DemandForecast);
        assert!(err.to_string().contains("demand_forecast"));
    }
}
