//! Product demand forecasting over configurable horizons.

use crate::error::PredictError;
use crate::models::{FamilyMetadata, ForecastPoint, Granularity};
use crate::predict::artifact::ForecastModel;
use crate::predict::PredictionOutcome;
use chrono::{Duration, NaiveDate, Utc};
use serde_json::json;

/// A point is anomalous when its lower bound deviates from the forecast by
/// more than this share of the forecast value.
pub const ANOMALY_THRESHOLD_PCT: f64 = 40.0;

pub const HORIZONS: [u32; 3] = [7, 30, 90];

#[derive(Debug, Clone)]
pub struct DemandForecastRequest {
    pub product_id: String,
    /// Number of periods to forecast.
    pub horizon: u32,
    pub granularity: Granularity,
    /// Forecasting starts the day after this date.
    pub baseline_date: NaiveDate,
}

impl DemandForecastRequest {
    pub fn validate(&self) -> Result<(), PredictError> {
        let mut errors = Vec::new();

        if self.product_id.is_empty() || self.product_id.len() > 100 {
            errors.push("product id must be 1-100 characters".to_string());
        } else if !self
            .product_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            errors.push(format!(
                "product id {} may only contain letters, digits, '_' and '-'",
                self.product_id
            ));
        }

        if !HORIZONS.contains(&self.horizon) {
            errors.push(format!(
                "horizon {} must be one of {:?}",
                self.horizon, HORIZONS
            ));
        }
        if self.granularity == Granularity::Weekly && self.horizon < 30 {
            errors.push("weekly granularity requires horizon >= 30".to_string());
        }

        let today = Utc::now().date_naive();
        if self.baseline_date > today {
            errors.push(format!(
                "baseline date {} must not be in the future",
                self.baseline_date
            ));
        }
        if self.baseline_date < today - Duration::days(2 * 365) {
            errors.push(format!(
                "baseline date {} must be within the last two years",
                self.baseline_date
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(PredictError::Validation(errors))
        }
    }

    pub fn fingerprint_inputs(&self) -> serde_json::Value {
        json!({
            "product_id": self.product_id,
            "horizon": self.horizon,
            "granularity": self.granularity.as_str(),
            "baseline_date": self.baseline_date.to_string(),
        })
    }
}

pub fn forecast(
    model: &ForecastModel,
    req: &DemandForecastRequest,
) -> Result<PredictionOutcome, PredictError> {
    let stride = req.granularity.stride();
    let horizon = req.horizon as usize;
    let series = model.project(req.baseline_date, horizon * stride);

    let mut points = Vec::with_capacity(horizon);
    for k in 0..horizon {
        let idx = k * stride;
        let (f, l, u) = (series.forecast[idx], series.lower[idx], series.upper[idx]);
        if !f.is_finite() || !l.is_finite() || !u.is_finite() {
            return Err(PredictError::Internal(format!(
                "forecast model produced non-finite band at offset {idx}"
            )));
        }

        // Label with the day the sampled band was projected for: index i
        // of the series is baseline + i + 1.
        let date = req.baseline_date + Duration::days((idx + 1) as i64);
        // A zero forecast cannot carry a meaningful deviation ratio; treat
        // it as anomalous rather than divide.
        let anomalous = if f == 0.0 {
            true
        } else {
            (f - l).abs() / f * 100.0 > ANOMALY_THRESHOLD_PCT
        };
        points.push(ForecastPoint {
            date,
            forecast: f,
            lower: l,
            upper: u,
            anomalous,
        });
    }

    let count = points.len();
    let anomaly_count = points.iter().filter(|p| p.anomalous).count();
    let mean = points.iter().map(|p| p.forecast).sum::<f64>() / count.max(1) as f64;
    let lower_mean = points.iter().map(|p| p.lower).sum::<f64>() / count.max(1) as f64;
    let upper_mean = points.iter().map(|p| p.upper).sum::<f64>() / count.max(1) as f64;

    let explanation = format!(
        "Mean demand {:.1} units per {} period over {} periods from {}; {} anomalous",
        mean,
        req.granularity.as_str(),
        count,
        req.baseline_date,
        anomaly_count,
    );

    Ok(PredictionOutcome {
        predicted: mean,
        unit: "units".to_string(),
        lower: lower_mean,
        upper: upper_mean,
        explanation,
        metadata: FamilyMetadata::Demand {
            product_id: req.product_id.clone(),
            granularity: req.granularity,
            horizon: req.horizon,
            forecast_count: count,
            anomaly_count,
            points,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    fn flat_model(level: f64, band: f64) -> ForecastModel {
        ForecastModel {
            level,
            trend: 0.0,
            dow_factors: [1.0; 7],
            // project() widens the band by the 95% z-score; divide it out
            // so tests control the absolute half-width.
            dow_std: [band / crate::predict::artifact::Z_95; 7],
        }
    }

    fn request(horizon: u32, granularity: Granularity) -> DemandForecastRequest {
        DemandForecastRequest {
            product_id: "PROD-A".into(),
            horizon,
            granularity,
            baseline_date: Utc::now().date_naive() - Duration::days(10),
        }
    }

    #[test]
    fn test_valid_request_passes() {
        assert!(request(7, Granularity::Daily).validate().is_ok());
        assert!(request(30, Granularity::Weekly).validate().is_ok());
    }

    #[test]
    fn test_weekly_needs_long_horizon() {
        let err = request(7, Granularity::Weekly).validate().unwrap_err();
        assert!(err.to_string().contains("weekly"));
    }

    #[test]
    fn test_future_baseline_rejected() {
        let mut req = request(7, Granularity::Daily);
        req.baseline_date = Utc::now().date_naive() + Duration::days(1);
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_ancient_baseline_rejected() {
        let mut req = request(7, Granularity::Daily);
        req.baseline_date = Utc::now().date_naive() - Duration::days(800);
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_product_id_charset() {
        let mut req = request(7, Granularity::Daily);
        req.product_id = "ok_ID-42".into();
        assert!(req.validate().is_ok());
        req.product_id = "bad id!".into();
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_daily_points_are_consecutive_dates() {
        let req = request(7, Granularity::Daily);
        let outcome = forecast(&flat_model(100.0, 10.0), &req).unwrap();

        let FamilyMetadata::Demand {
            forecast_count,
            anomaly_count,
            points,
            ..
        } = &outcome.metadata
        else {
            panic!("wrong metadata family");
        };
        assert_eq!(*forecast_count, 7);
        assert_eq!(*anomaly_count, 0);
        assert_eq!(points.len(), 7);
        for (i, point) in points.iter().enumerate() {
            assert_eq!(
                point.date,
                req.baseline_date + Duration::days(i as i64 + 1)
            );
        }
        assert!((outcome.predicted - 100.0).abs() < 1e-9);
        assert_eq!(outcome.unit, "units");
    }

    #[test]
    fn test_weekly_points_sample_and_label_the_same_day() {
        // Rising trend makes a sample/label mismatch visible: the value at
        // series index 7k must be reported with the date of day 7k+1.
        let model = ForecastModel {
            level: 50.0,
            trend: 1.0,
            dow_factors: [1.0; 7],
            dow_std: [0.0; 7],
        };
        let req = request(30, Granularity::Weekly);
        let outcome = forecast(&model, &req).unwrap();

        let FamilyMetadata::Demand { points, .. } = &outcome.metadata else {
            panic!("wrong metadata family");
        };
        assert_eq!(points.len(), 30);
        for (k, point) in points.iter().enumerate() {
            let idx = k * 7;
            assert_eq!(point.date, req.baseline_date + Duration::days(idx as i64 + 1));
            assert!((point.forecast - (50.0 + idx as f64)).abs() < 1e-9);
        }
        // Sampling every 7th day keeps the weekday constant, and the label
        // agrees with it.
        let first_weekday = points[0].date.weekday();
        assert!(points.iter().all(|p| p.date.weekday() == first_weekday));
    }

    #[test]
    fn test_wide_band_flags_anomaly() {
        // Lower bound 45 below a forecast of 100: 45% deviation > 40%.
        let req = request(7, Granularity::Daily);
        let outcome = forecast(&flat_model(100.0, 45.0), &req).unwrap();
        let FamilyMetadata::Demand { anomaly_count, .. } = &outcome.metadata else {
            panic!("wrong metadata family");
        };
        assert_eq!(*anomaly_count, 7);
    }

    #[test]
    fn test_zero_forecast_point_is_anomalous_without_division() {
        let req = request(7, Granularity::Daily);
        let outcome = forecast(&flat_model(0.0, 5.0), &req).unwrap();
        let FamilyMetadata::Demand { anomaly_count, .. } = &outcome.metadata else {
            panic!("wrong metadata family");
        };
        assert_eq!(*anomaly_count, 7);
    }
}
