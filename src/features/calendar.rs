//! Fixed-date holiday calendar.
//!
//! Shared by the time-series feature extractor and the order-event
//! consumer's enrichment step. Dates are (month, day) pairs applied to
//! every year; the set comes from configuration.

use chrono::{Datelike, NaiveDate};
use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct HolidayCalendar {
    days: HashSet<(u32, u32)>,
}

impl HolidayCalendar {
    pub fn new(days: impl IntoIterator<Item = (u32, u32)>) -> Self {
        Self {
            days: days.into_iter().collect(),
        }
    }

    pub fn is_holiday(&self, date: NaiveDate) -> bool {
        self.days.contains(&(date.month(), date.day()))
    }

    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_holiday_lookup_ignores_year() {
        let calendar = HolidayCalendar::new([(12, 25), (1, 1)]);
        assert!(calendar.is_holiday(NaiveDate::from_ymd_opt(2025, 12, 25).unwrap()));
        assert!(calendar.is_holiday(NaiveDate::from_ymd_opt(2026, 12, 25).unwrap()));
        assert!(!calendar.is_holiday(NaiveDate::from_ymd_opt(2026, 12, 24).unwrap()));
    }
}
