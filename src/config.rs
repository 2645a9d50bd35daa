//! Service configuration.
//!
//! Everything comes from environment variables with working defaults, so a
//! bare `forgecast` starts against a local SQLite file. Secrets are injected
//! by the deployment environment; nothing sensitive lives here.

use crate::models::ModelFamily;
use std::collections::HashMap;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub db_path: String,
    pub artifact_dir: String,
    pub bind_addr: String,
    /// Staleness sweep wake interval.
    pub sweep_interval: Duration,
    /// Active models trained longer ago than this are re-enqueued.
    pub stale_after_days: i64,
    /// Dataset record count at which ingestion triggers retraining.
    pub retrain_threshold: u64,
    /// Capacity of the event consumer's message-id dedup set.
    pub dedup_capacity: usize,
    /// Capacity of the in-memory model handle cache.
    pub model_cache_capacity: usize,
    /// Per-request deadline for the prediction path.
    pub request_timeout: Duration,
    /// Per-family cache TTL overrides; families not present use defaults.
    pub ttl_overrides: HashMap<ModelFamily, Duration>,
    /// Fixed-date holidays as (month, day).
    pub holidays: Vec<(u32, u32)>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            db_path: "forgecast.db".into(),
            artifact_dir: "artifacts".into(),
            bind_addr: "0.0.0.0:8085".into(),
            sweep_interval: Duration::from_secs(6 * 3600),
            stale_after_days: 30,
            retrain_threshold: 1000,
            dedup_capacity: 10_000,
            model_cache_capacity: 64,
            request_timeout: Duration::from_secs(30),
            ttl_overrides: HashMap::new(),
            holidays: default_holidays(),
        }
    }
}

impl ServiceConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let mut ttl_overrides = HashMap::new();
        for family in ModelFamily::ALL {
            let var = format!(
                "FORGECAST_TTL_{}_SECS",
                family.as_str().to_uppercase()
            );
            let secs = env_u64(&var, 0);
            if secs > 0 {
                ttl_overrides.insert(family, Duration::from_secs(secs));
            }
        }

        Self {
            db_path: env_str("FORGECAST_DB_PATH", &defaults.db_path),
            artifact_dir: env_str("FORGECAST_ARTIFACT_DIR", &defaults.artifact_dir),
            bind_addr: env_str("FORGECAST_BIND_ADDR", &defaults.bind_addr),
            sweep_interval: Duration::from_secs(env_u64(
                "FORGECAST_SWEEP_INTERVAL_SECS",
                defaults.sweep_interval.as_secs(),
            )),
            stale_after_days: env_u64(
                "FORGECAST_STALE_AFTER_DAYS",
                defaults.stale_after_days as u64,
            ) as i64,
            retrain_threshold: env_u64(
                "FORGECAST_RETRAIN_THRESHOLD",
                defaults.retrain_threshold,
            ),
            dedup_capacity: env_u64(
                "FORGECAST_DEDUP_CAPACITY",
                defaults.dedup_capacity as u64,
            ) as usize,
            model_cache_capacity: env_u64(
                "FORGECAST_MODEL_CACHE_CAPACITY",
                defaults.model_cache_capacity as u64,
            ) as usize,
            request_timeout: Duration::from_millis(env_u64(
                "FORGECAST_REQUEST_TIMEOUT_MS",
                defaults.request_timeout.as_millis() as u64,
            )),
            ttl_overrides,
            holidays: env::var("FORGECAST_HOLIDAYS")
                .ok()
                .map(|v| parse_holidays(&v))
                .unwrap_or(defaults.holidays),
        }
    }

    /// Cache TTL for a family, override-aware.
    pub fn cache_ttl(&self, family: ModelFamily) -> Duration {
        self.ttl_overrides
            .get(&family)
            .copied()
            .unwrap_or_else(|| family.default_ttl())
    }
}

fn default_holidays() -> Vec<(u32, u32)> {
    vec![(1, 1), (5, 1), (7, 4), (12, 24), (12, 25), (12, 26), (12, 31)]
}

/// Parse a comma-separated `MM-DD` list; malformed entries are skipped.
fn parse_holidays(raw: &str) -> Vec<(u32, u32)> {
    raw.split(',')
        .filter_map(|entry| {
            let (m, d) = entry.trim().split_once('-')?;
            let month: u32 = m.parse().ok().filter(|&m| (1..=12).contains(&m))?;
            let day: u32 = d.parse().ok().filter(|&d| (1..=31).contains(&d))?;
            Some((month, day))
        })
        .collect()
}

fn env_str(var: &str, default: &str) -> String {
    env::var(var).ok().filter(|v| !v.is_empty()).unwrap_or_else(|| default.to_string())
}

fn env_u64(var: &str, default: u64) -> u64 {
    env::var(var)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_holidays() {
        let parsed = parse_holidays("01-01, 12-25, bogus, 13-40");
        assert_eq!(parsed, vec![(1, 1), (12, 25)]);
    }

    #[test]
    fn test_ttl_override_beats_default() {
        let mut cfg = ServiceConfig::default();
        cfg.ttl_overrides
            .insert(ModelFamily::PrintTime, Duration::from_secs(60));
        assert_eq!(cfg.cache_ttl(ModelFamily::PrintTime), Duration::from_secs(60));
        assert_eq!(
            cfg.cache_ttl(ModelFamily::DemandForecast),
            ModelFamily::DemandForecast.default_ttl()
        );
    }
}
