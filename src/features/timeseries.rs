//! Time-series feature derivation for demand training.
//!
//! Lag and rolling features are absent when history does not reach back
//! far enough; trainers must tolerate the gaps.

use crate::features::calendar::HolidayCalendar;
use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One observed point of product demand history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemandObservation {
    pub date: NaiveDate,
    pub demand: f64,
    #[serde(default)]
    pub promotion: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointFeatures {
    pub day_of_week: u32,
    pub month: u32,
    pub quarter: u32,
    pub day_of_month: u32,
    pub is_weekend: bool,
    pub is_holiday: bool,
    pub promotion: bool,
    pub lag_1: Option<f64>,
    pub lag_7: Option<f64>,
    pub rolling_mean_7: Option<f64>,
}

/// Derive per-point features for a history series relative to a baseline
/// date. Points after the baseline are ignored.
pub fn derive_features(
    baseline: NaiveDate,
    series: &[DemandObservation],
    calendar: &HolidayCalendar,
) -> Vec<(NaiveDate, PointFeatures)> {
    let mut by_date: HashMap<NaiveDate, &DemandObservation> = HashMap::new();
    for obs in series {
        if obs.date <= baseline {
            by_date.insert(obs.date, obs);
        }
    }

    let mut dates: Vec<NaiveDate> = by_date.keys().copied().collect();
    dates.sort();

    dates
        .iter()
        .map(|&date| {
            let obs = by_date[&date];
            let lag_1 = by_date
                .get(&(date - chrono::Duration::days(1)))
                .map(|o| o.demand);
            let lag_7 = by_date
                .get(&(date - chrono::Duration::days(7)))
                .map(|o| o.demand);

            let window: Vec<f64> = (1..=7)
                .filter_map(|back| {
                    by_date
                        .get(&(date - chrono::Duration::days(back)))
                        .map(|o| o.demand)
                })
                .collect();
            let rolling_mean_7 = if window.is_empty() {
                None
            } else {
                Some(window.iter().sum::<f64>() / window.len() as f64)
            };

            let features = PointFeatures {
                day_of_week: date.weekday().num_days_from_monday(),
                month: date.month(),
                quarter: (date.month() - 1) / 3 + 1,
                day_of_month: date.day(),
                is_weekend: matches!(date.weekday(), Weekday::Sat | Weekday::Sun),
                is_holiday: calendar.is_holiday(date),
                promotion: obs.promotion.unwrap_or(false),
                lag_1,
                lag_7,
                rolling_mean_7,
            };
            (date, features)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(date: NaiveDate, demand: f64) -> DemandObservation {
        DemandObservation {
            date,
            demand,
            promotion: None,
        }
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_calendar_fields() {
        let calendar = HolidayCalendar::new([(7, 4)]);
        let baseline = day(2026, 7, 10);
        let series = vec![obs(day(2026, 7, 4), 12.0)];

        let features = derive_features(baseline, &series, &calendar);
        assert_eq!(features.len(), 1);
        let (_, f) = &features[0];
        assert_eq!(f.month, 7);
        assert_eq!(f.quarter, 3);
        assert_eq!(f.day_of_month, 4);
        assert!(f.is_weekend); // 2026-07-04 is a Saturday
        assert!(f.is_holiday);
    }

    #[test]
    fn test_lags_and_rolling_mean() {
        let calendar = HolidayCalendar::new([]);
        let baseline = day(2026, 3, 10);
        let series: Vec<_> = (1..=10).map(|d| obs(day(2026, 3, d), d as f64)).collect();

        let features = derive_features(baseline, &series, &calendar);
        let (_, last) = features.last().unwrap();
        assert_eq!(last.lag_1, Some(9.0));
        assert_eq!(last.lag_7, Some(3.0));
        // Days 3..=9 average to 6.
        assert_eq!(last.rolling_mean_7, Some(6.0));
    }

    #[test]
    fn test_missing_history_yields_absent_features() {
        let calendar = HolidayCalendar::new([]);
        let baseline = day(2026, 3, 10);
        let series = vec![obs(day(2026, 3, 1), 5.0)];

        let features = derive_features(baseline, &series, &calendar);
        let (_, f) = &features[0];
        assert_eq!(f.lag_1, None);
        assert_eq!(f.lag_7, None);
        assert_eq!(f.rolling_mean_7, None);
    }

    #[test]
    fn test_points_after_baseline_dropped() {
        let calendar = HolidayCalendar::new([]);
        let baseline = day(2026, 3, 5);
        let series = vec![obs(day(2026, 3, 1), 5.0), obs(day(2026, 3, 9), 7.0)];
        assert_eq!(derive_features(baseline, &series, &calendar).len(), 1);
    }
}
