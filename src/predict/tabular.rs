//! Shared regression substrate for the price, churn, material-demand and
//! bottleneck families: a named-feature vector in, a scalar with a
//! residual-based confidence band out.

use crate::error::PredictError;
use crate::models::{FamilyMetadata, ModelFamily};
use crate::predict::artifact::{LinearModel, Z_95};
use crate::predict::PredictionOutcome;
use serde_json::json;
use std::collections::HashMap;

/// Classification cut-off reported for churn predictions.
pub const CHURN_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone)]
pub struct TabularRequest {
    pub features: HashMap<String, f64>,
}

impl TabularRequest {
    pub fn validate(&self) -> Result<(), PredictError> {
        let mut errors = Vec::new();
        if self.features.is_empty() {
            errors.push("feature map must not be empty".to_string());
        }
        if self.features.len() > 200 {
            errors.push(format!(
                "feature map has {} entries, limit is 200",
                self.features.len()
            ));
        }
        for (name, value) in &self.features {
            if name.is_empty() || name.len() > 100 {
                errors.push("feature names must be 1-100 characters".to_string());
                break;
            }
            if !value.is_finite() {
                errors.push(format!("feature {name} has non-finite value"));
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(PredictError::Validation(errors))
        }
    }

    pub fn fingerprint_inputs(&self) -> serde_json::Value {
        json!({ "features": self.features })
    }
}

pub fn unit_for(family: ModelFamily) -> &'static str {
    match family {
        ModelFamily::PriceOptimization => "usd",
        ModelFamily::ChurnPrediction => "probability",
        ModelFamily::MaterialDemand => "kg",
        ModelFamily::BottleneckDetection => "score",
        // Print-time and demand have dedicated predictors.
        ModelFamily::PrintTime => "minutes",
        ModelFamily::DemandForecast => "units",
    }
}

pub fn predict(
    family: ModelFamily,
    model: &LinearModel,
    req: &TabularRequest,
) -> Result<PredictionOutcome, PredictError> {
    let raw = model.predict(&req.features);
    if !raw.is_finite() {
        return Err(PredictError::Internal(format!(
            "{family} model produced non-finite estimate {raw}"
        )));
    }

    let band = Z_95 * model.residual_std;
    let (predicted, lower, upper, threshold) = match family {
        ModelFamily::ChurnPrediction => {
            let p = raw.clamp(0.0, 1.0);
            (
                p,
                (p - band).clamp(0.0, 1.0),
                (p + band).clamp(0.0, 1.0),
                Some(CHURN_THRESHOLD),
            )
        }
        _ => {
            let p = raw.max(0.0);
            ((p), (p - band).max(0.0), p + band, None)
        }
    };

    let mut used: Vec<String> = model
        .feature_names
        .iter()
        .filter(|name| req.features.contains_key(*name))
        .cloned()
        .collect();
    used.sort();

    let explanation = format!(
        "{} estimate {:.3} {} from {} features",
        family,
        predicted,
        unit_for(family),
        used.len()
    );

    Ok(PredictionOutcome {
        predicted,
        unit: unit_for(family).to_string(),
        lower,
        upper,
        explanation,
        metadata: FamilyMetadata::Tabular {
            features_used: used,
            threshold,
        },
    })
}
