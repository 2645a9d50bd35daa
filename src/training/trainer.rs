//! Trainer seam and default implementations.
//!
//! Production-grade gradient-boosted and spectral trainers are external
//! capabilities; these defaults keep the service end-to-end functional.
//! Linear families train ridge regression via the normal equations;
//! demand trains a level/trend forecaster with day-of-week seasonality.

use crate::features::calendar::HolidayCalendar;
use crate::features::timeseries::{derive_features, DemandObservation};
use crate::models::{DatasetRecord, ModelFamily};
use crate::predict::artifact::{ForecastModel, LinearModel, ModelArtifact};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use nalgebra::{DMatrix, DVector};
use std::collections::HashMap;
use std::sync::Arc;

/// Output of one training run.
#[derive(Debug, Clone)]
pub struct TrainedModel {
    pub artifact: ModelArtifact,
    pub algorithm: String,
    pub metrics: HashMap<String, f64>,
    pub validation: HashMap<String, f64>,
    pub hyperparameters: HashMap<String, f64>,
}

#[async_trait]
pub trait Trainer: Send + Sync {
    async fn train(&self, family: ModelFamily, records: &[DatasetRecord]) -> Result<TrainedModel>;
}

/// Trainer lookup by family.
pub struct TrainerRegistry {
    trainers: HashMap<ModelFamily, Arc<dyn Trainer>>,
}

impl TrainerRegistry {
    pub fn with_defaults(calendar: HolidayCalendar) -> Self {
        let ridge: Arc<dyn Trainer> = Arc::new(RidgeTrainer::default());
        let seasonal: Arc<dyn Trainer> = Arc::new(SeasonalTrainer { calendar });

        let mut trainers: HashMap<ModelFamily, Arc<dyn Trainer>> = HashMap::new();
        for family in ModelFamily::ALL {
            let trainer = match family {
                ModelFamily::DemandForecast => seasonal.clone(),
                _ => ridge.clone(),
            };
            trainers.insert(family, trainer);
        }
        Self { trainers }
    }

    pub fn get(&self, family: ModelFamily) -> Option<Arc<dyn Trainer>> {
        self.trainers.get(&family).cloned()
    }

    pub fn register(&mut self, family: ModelFamily, trainer: Arc<dyn Trainer>) {
        self.trainers.insert(family, trainer);
    }
}

/// Ridge regression over per-record calendar and price features with the
/// line-item quantity as target.
pub struct RidgeTrainer {
    pub lambda: f64,
}

impl Default for RidgeTrainer {
    fn default() -> Self {
        Self { lambda: 1.0 }
    }
}

const RIDGE_FEATURES: [&str; 4] = ["unit_price", "day_of_week", "month", "is_holiday"];

fn ridge_features(record: &DatasetRecord) -> [f64; 4] {
    [
        record.unit_price,
        record.order_date.weekday().num_days_from_monday() as f64,
        record.order_date.month() as f64,
        record.is_holiday as i64 as f64,
    ]
}

#[async_trait]
impl Trainer for RidgeTrainer {
    async fn train(&self, _family: ModelFamily, records: &[DatasetRecord]) -> Result<TrainedModel> {
        let n = records.len();
        let p = RIDGE_FEATURES.len() + 1;
        if n < p {
            bail!("need at least {p} records to fit, got {n}");
        }

        let mut design = DMatrix::zeros(n, p);
        let mut target = DVector::zeros(n);
        for (i, record) in records.iter().enumerate() {
            design[(i, 0)] = 1.0;
            for (j, value) in ridge_features(record).into_iter().enumerate() {
                design[(i, j + 1)] = value;
            }
            target[i] = record.quantity;
        }

        // Normal equations with an L2 penalty (intercept unpenalized).
        let xtx = design.transpose() * &design;
        let mut penalized = xtx;
        for j in 1..p {
            penalized[(j, j)] += self.lambda;
        }
        let xty = design.transpose() * &target;
        let solution = penalized
            .lu()
            .solve(&xty)
            .context("normal equations are singular")?;

        let intercept = solution[0];
        let weights: Vec<f64> = solution.iter().skip(1).copied().collect();

        let mut sse = 0.0;
        let mut sae = 0.0;
        let mean_y = target.iter().sum::<f64>() / n as f64;
        let mut sst = 0.0;
        for (i, record) in records.iter().enumerate() {
            let mut fitted = intercept;
            for (j, value) in ridge_features(record).into_iter().enumerate() {
                fitted += weights[j] * value;
            }
            let err = target[i] - fitted;
            sse += err * err;
            sae += err.abs();
            sst += (target[i] - mean_y) * (target[i] - mean_y);
        }
        let rmse = (sse / n as f64).sqrt();
        let mae = sae / n as f64;
        let r2 = if sst > 0.0 { 1.0 - sse / sst } else { 0.0 };

        let metrics = HashMap::from([
            ("r2".to_string(), r2),
            ("mae".to_string(), mae),
            ("rmse".to_string(), rmse),
        ]);

        Ok(TrainedModel {
            artifact: ModelArtifact::Linear(LinearModel {
                feature_names: RIDGE_FEATURES.iter().map(|s| s.to_string()).collect(),
                weights,
                intercept,
                residual_std: rmse,
            }),
            algorithm: "ridge_regression".to_string(),
            metrics: metrics.clone(),
            validation: metrics,
            hyperparameters: HashMap::from([("lambda".to_string(), self.lambda)]),
        })
    }
}

/// Level/trend demand forecaster with multiplicative day-of-week factors,
/// fitted on daily quantity totals.
pub struct SeasonalTrainer {
    pub calendar: HolidayCalendar,
}

#[async_trait]
impl Trainer for SeasonalTrainer {
    async fn train(&self, _family: ModelFamily, records: &[DatasetRecord]) -> Result<TrainedModel> {
        if records.is_empty() {
            bail!("dataset is empty");
        }

        let mut daily: HashMap<NaiveDate, f64> = HashMap::new();
        for record in records {
            *daily.entry(record.order_date).or_insert(0.0) += record.quantity;
        }
        let mut days: Vec<(NaiveDate, f64)> = daily.into_iter().collect();
        days.sort_by_key(|(date, _)| *date);
        let n = days.len();

        let level = days.iter().map(|(_, q)| q).sum::<f64>() / n as f64;
        if level <= 0.0 {
            bail!("demand history sums to zero");
        }

        // Least-squares slope over day index.
        let trend = if n > 1 {
            let mean_x = (n - 1) as f64 / 2.0;
            let mut cov = 0.0;
            let mut var = 0.0;
            for (i, (_, q)) in days.iter().enumerate() {
                let dx = i as f64 - mean_x;
                cov += dx * (q - level);
                var += dx * dx;
            }
            if var > 0.0 {
                cov / var
            } else {
                0.0
            }
        } else {
            0.0
        };

        let mut dow_sum = [0.0f64; 7];
        let mut dow_count = [0usize; 7];
        for (date, quantity) in &days {
            let dow = date.weekday().num_days_from_monday() as usize;
            dow_sum[dow] += quantity;
            dow_count[dow] += 1;
        }
        let mut dow_factors = [1.0f64; 7];
        for dow in 0..7 {
            if dow_count[dow] > 0 {
                dow_factors[dow] = (dow_sum[dow] / dow_count[dow] as f64) / level;
            }
        }

        let mut dow_sq = [0.0f64; 7];
        let mut ape_sum = 0.0;
        let mut ape_n = 0usize;
        for (date, quantity) in &days {
            let dow = date.weekday().num_days_from_monday() as usize;
            let fitted = level * dow_factors[dow];
            let residual = quantity - fitted;
            dow_sq[dow] += residual * residual;
            if *quantity > 0.0 {
                ape_sum += (residual / quantity).abs();
                ape_n += 1;
            }
        }
        let mut dow_std = [0.0f64; 7];
        for dow in 0..7 {
            if dow_count[dow] > 0 {
                dow_std[dow] = (dow_sq[dow] / dow_count[dow] as f64).sqrt();
            }
        }
        let mape = if ape_n > 0 {
            ape_sum / ape_n as f64 * 100.0
        } else {
            0.0
        };

        // Holiday lift from the calendar-derived features; trainers that
        // model holidays directly read the same flag.
        let observations: Vec<DemandObservation> = days
            .iter()
            .map(|(date, demand)| DemandObservation {
                date: *date,
                demand: *demand,
                promotion: None,
            })
            .collect();
        let last_date = days[n - 1].0;
        let features = derive_features(last_date, &observations, &self.calendar);
        let mut holiday_sum = 0.0;
        let mut holiday_n = 0usize;
        for ((_, point), (_, demand)) in features.iter().zip(&days) {
            if point.is_holiday {
                holiday_sum += demand;
                holiday_n += 1;
            }
        }
        let holiday_lift = if holiday_n > 0 {
            (holiday_sum / holiday_n as f64) / level
        } else {
            1.0
        };

        let metrics = HashMap::from([
            ("mape".to_string(), mape),
            ("observed_days".to_string(), n as f64),
            ("holiday_lift".to_string(), holiday_lift),
        ]);

        Ok(TrainedModel {
            artifact: ModelArtifact::Forecast(ForecastModel {
                level,
                trend,
                dow_factors,
                dow_std,
            }),
            algorithm: "seasonal_level_trend".to_string(),
            metrics: metrics.clone(),
            validation: metrics,
            hyperparameters: HashMap::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(date: NaiveDate, quantity: f64, unit_price: f64) -> DatasetRecord {
        DatasetRecord {
            id: uuid::Uuid::new_v4().to_string(),
            dataset_id: "ds".into(),
            product_id: "PROD-A".into(),
            quantity,
            unit_price,
            order_date: date,
            is_holiday: false,
            raw: json!({}),
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    #[tokio::test]
    async fn test_ridge_recovers_price_slope() {
        // quantity = 100 - 2 * price, noiseless.
        let records: Vec<_> = (1..=20)
            .map(|i| {
                let price = i as f64;
                record(day((i % 28) + 1), 100.0 - 2.0 * price, price)
            })
            .collect();

        let trained = RidgeTrainer { lambda: 1e-3 }
            .train(ModelFamily::PriceOptimization, &records)
            .await
            .unwrap();
        let ModelArtifact::Linear(model) = &trained.artifact else {
            panic!("expected linear artifact");
        };
        let price_weight = model.weights[0];
        assert!(
            (price_weight + 2.0).abs() < 0.1,
            "price weight {price_weight}"
        );
        assert!(trained.metrics["r2"] > 0.95);
    }

    #[tokio::test]
    async fn test_ridge_needs_enough_records() {
        let records = vec![record(day(1), 5.0, 2.0)];
        assert!(RidgeTrainer::default()
            .train(ModelFamily::PriceOptimization, &records)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_seasonal_learns_weekend_lift() {
        // Four weeks: weekdays 10 units, Saturdays 30.
        let mut records = Vec::new();
        let start = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(); // a Monday
        for offset in 0..28 {
            let date = start + chrono::Duration::days(offset);
            let quantity = if date.weekday() == chrono::Weekday::Sat {
                30.0
            } else {
                10.0
            };
            records.push(record(date, quantity, 5.0));
        }

        let trained = SeasonalTrainer {
            calendar: HolidayCalendar::new([]),
        }
        .train(ModelFamily::DemandForecast, &records)
        .await
        .unwrap();
        let ModelArtifact::Forecast(model) = &trained.artifact else {
            panic!("expected forecast artifact");
        };
        assert!(model.dow_factors[5] > model.dow_factors[0] * 2.0);
        assert!(trained.metrics["observed_days"] == 28.0);
    }

    #[tokio::test]
    async fn test_seasonal_rejects_empty_dataset() {
        let trainer = SeasonalTrainer {
            calendar: HolidayCalendar::new([]),
        };
        assert!(trainer.train(ModelFamily::DemandForecast, &[]).await.is_err());
    }

    #[tokio::test]
    async fn test_seasonal_reports_holiday_lift() {
        // Holidays carry triple demand.
        let mut records = Vec::new();
        let start = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        for offset in 0..14 {
            let date = start + chrono::Duration::days(offset);
            let quantity = if date == NaiveDate::from_ymd_opt(2026, 3, 10).unwrap() {
                30.0
            } else {
                10.0
            };
            records.push(record(date, quantity, 5.0));
        }

        let trainer = SeasonalTrainer {
            calendar: HolidayCalendar::new([(3, 10)]),
        };
        let trained = trainer
            .train(ModelFamily::DemandForecast, &records)
            .await
            .unwrap();
        assert!(trained.metrics["holiday_lift"] > 2.0);
    }
}
