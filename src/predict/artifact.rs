//! Serialized model parameter sets.
//!
//! These are what the model store persists and what predictors execute.
//! The production gradient-boosted / spectral trainers are external
//! capabilities; their artifacts deserialize into the same shapes.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ModelArtifact {
    Linear(LinearModel),
    Forecast(ForecastModel),
}

impl ModelArtifact {
    pub fn as_linear(&self) -> Option<&LinearModel> {
        match self {
            Self::Linear(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_forecast(&self) -> Option<&ForecastModel> {
        match self {
            Self::Forecast(m) => Some(m),
            _ => None,
        }
    }
}

/// Weighted sum over named features. Shared by the print-time and tabular
/// families.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearModel {
    pub feature_names: Vec<String>,
    pub weights: Vec<f64>,
    pub intercept: f64,
    /// Residual standard deviation observed in training.
    pub residual_std: f64,
}

impl LinearModel {
    /// Missing features contribute zero.
    pub fn predict(&self, features: &HashMap<String, f64>) -> f64 {
        let mut sum = self.intercept;
        for (name, weight) in self.feature_names.iter().zip(&self.weights) {
            if let Some(value) = features.get(name) {
                sum += weight * value;
            }
        }
        sum
    }
}

/// Level/trend forecaster with multiplicative day-of-week seasonality.
///
/// `project` materializes the `(forecast[], lower[], upper[])` arrays the
/// demand predictor samples from, anchored to the day after the requested
/// baseline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastModel {
    /// Demand level at the end of training.
    pub level: f64,
    /// Per-day linear trend.
    pub trend: f64,
    /// Multiplicative factors indexed by weekday (Monday = 0).
    pub dow_factors: [f64; 7],
    /// Residual standard deviation per weekday, for the 95% band.
    pub dow_std: [f64; 7],
}

/// z-quantile for a two-sided 95% interval.
pub const Z_95: f64 = 1.959_963_984_540_054;

#[derive(Debug, Clone)]
pub struct ProjectedSeries {
    pub forecast: Vec<f64>,
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl ForecastModel {
    pub fn project(&self, baseline: NaiveDate, len: usize) -> ProjectedSeries {
        let mut forecast = Vec::with_capacity(len);
        let mut lower = Vec::with_capacity(len);
        let mut upper = Vec::with_capacity(len);

        for i in 0..len {
            let date = baseline + chrono::Duration::days(i as i64 + 1);
            let dow = date.weekday().num_days_from_monday() as usize;
            let value = ((self.level + self.trend * i as f64) * self.dow_factors[dow]).max(0.0);
            let band = Z_95 * self.dow_std[dow];
            forecast.push(value);
            lower.push((value - band).max(0.0));
            upper.push(value + band);
        }

        ProjectedSeries { forecast, lower, upper }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_predict_ignores_unknown_features() {
        let model = LinearModel {
            feature_names: vec!["volume".into(), "infill".into()],
            weights: vec![2.0, 0.5],
            intercept: 10.0,
            residual_std: 1.0,
        };
        let mut features = HashMap::new();
        features.insert("volume".to_string(), 3.0);
        features.insert("unrelated".to_string(), 99.0);
        assert!((model.predict(&features) - 16.0).abs() < 1e-9);
    }

    #[test]
    fn test_project_len_and_nonnegative() {
        let model = ForecastModel {
            level: 10.0,
            trend: -1.0,
            dow_factors: [1.0; 7],
            dow_std: [2.0; 7],
        };
        let baseline = NaiveDate::from_ymd_opt(2026, 2, 14).unwrap();
        let series = model.project(baseline, 30);
        assert_eq!(series.forecast.len(), 30);
        // Trend drives the level negative late in the horizon; projections clamp.
        assert!(series.forecast.iter().all(|&v| v >= 0.0));
        assert!(series.lower.iter().all(|&v| v >= 0.0));
    }

    #[test]
    fn test_z95_matches_normal_quantile() {
        use statrs::distribution::{ContinuousCDF, Normal};
        let standard = Normal::new(0.0, 1.0).unwrap();
        assert!((standard.inverse_cdf(0.975) - Z_95).abs() < 1e-7);
    }

    #[test]
    fn test_project_applies_seasonality() {
        let mut factors = [1.0; 7];
        factors[5] = 2.0; // Saturdays double
        let model = ForecastModel {
            level: 10.0,
            trend: 0.0,
            dow_factors: factors,
            dow_std: [0.0; 7],
        };
        // 2026-02-13 is a Friday, so the first projected day is a Saturday.
        let baseline = NaiveDate::from_ymd_opt(2026, 2, 13).unwrap();
        let series = model.project(baseline, 2);
        assert!((series.forecast[0] - 20.0).abs() < 1e-9);
        assert!((series.forecast[1] - 10.0).abs() < 1e-9);
    }
}
