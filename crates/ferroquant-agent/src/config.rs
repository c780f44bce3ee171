//! Service configuration.
//!
//! Defaults are overridden by `FERROQUANT_*` environment variables:
//!
//! | Variable | Effect |
//! |----------|--------|
//! | `FERROQUANT_YAHOO_BASE_URL` | Yahoo base URL |
//! | `FERROQUANT_POLYGON_BASE_URL` | Polygon base URL |
//! | `FERROQUANT_ALPHAVANTAGE_BASE_URL` | Alpha Vantage base URL |
//! | `FERROQUANT_MAX_CONCURRENCY` | concurrent provider requests per call |
//! | `FERROQUANT_TIMEOUT_MS` | timeout of a single provider request |
//! | `FERROQUANT_MAX_RETRIES` | retries for transient provider failures |
//! | `FERROQUANT_SERIES_TTL_SECS` | TTL of cached series |
//! | `FERROQUANT_CURVE_TTL_SECS` | TTL of cached curves |
//! | `FERROQUANT_VALUATION_TTL_SECS` | TTL of cached valuations |
//! | `FERROQUANT_BUMP_SIZE` | default sensitivity bump, decimal |
//! | `FERROQUANT_DAY_COUNT` | day count for curves that name none |
//! | `FERROQUANT_DEADLINE_MS` | overall deadline of one tool call |
//! | `FERROQUANT_DB_PATH` | cache database file, `:memory:` for none |

use std::env;
use std::str::FromStr;
use std::time::Duration;

use ferroquant_core::{FetchOptions, ProviderEndpoints};
use ferroquant_kernel::{DayCount, DEFAULT_BUMP_SIZE};
use ferroquant_store::{EntryKind, StoreConfig};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {variable}: {reason}")]
    Invalid {
        variable: String,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(variable: &str, value: &str, reason: impl ToString) -> Self {
        Self::Invalid {
            variable: variable.to_owned(),
            value: value.to_owned(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalyticsConfig {
    pub endpoints: ProviderEndpoints,
    pub max_concurrency: usize,
    pub timeout_per_request: Duration,
    pub max_retries: u32,
    pub series_ttl: Duration,
    pub curve_ttl: Duration,
    pub valuation_ttl: Duration,
    /// Sensitivity bump applied when a call does not name one.
    pub bump_size: f64,
    /// Day count for curves that do not name one; Act/365F when unset.
    pub day_count: Option<DayCount>,
    /// Overall deadline of one tool call.
    pub deadline: Duration,
    pub store: StoreConfig,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            endpoints: ProviderEndpoints::default(),
            max_concurrency: 4,
            timeout_per_request: Duration::from_secs(10),
            max_retries: 3,
            series_ttl: Duration::from_secs(15 * 60),
            curve_ttl: Duration::from_secs(15 * 60),
            valuation_ttl: Duration::from_secs(5 * 60),
            bump_size: DEFAULT_BUMP_SIZE,
            day_count: None,
            deadline: Duration::from_secs(30),
            store: StoreConfig::default(),
        }
    }
}

impl AnalyticsConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
        };
        let mut config = Self::default();

        if let Some(url) = var("FERROQUANT_YAHOO_BASE_URL") {
            config.endpoints.yahoo = url;
        }
        if let Some(url) = var("FERROQUANT_POLYGON_BASE_URL") {
            config.endpoints.polygon = url;
        }
        if let Some(url) = var("FERROQUANT_ALPHAVANTAGE_BASE_URL") {
            config.endpoints.alphavantage = url;
        }

        if let Some(value) = var("FERROQUANT_MAX_CONCURRENCY") {
            let parsed: usize = parse("FERROQUANT_MAX_CONCURRENCY", &value)?;
            if parsed == 0 {
                return Err(ConfigError::invalid(
                    "FERROQUANT_MAX_CONCURRENCY",
                    &value,
                    "must be at least 1",
                ));
            }
            config.max_concurrency = parsed;
        }
        if let Some(value) = var("FERROQUANT_TIMEOUT_MS") {
            config.timeout_per_request = millis("FERROQUANT_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = var("FERROQUANT_MAX_RETRIES") {
            config.max_retries = parse("FERROQUANT_MAX_RETRIES", &value)?;
        }
        if let Some(value) = var("FERROQUANT_SERIES_TTL_SECS") {
            config.series_ttl = seconds("FERROQUANT_SERIES_TTL_SECS", &value)?;
        }
        if let Some(value) = var("FERROQUANT_CURVE_TTL_SECS") {
            config.curve_ttl = seconds("FERROQUANT_CURVE_TTL_SECS", &value)?;
        }
        if let Some(value) = var("FERROQUANT_VALUATION_TTL_SECS") {
            config.valuation_ttl = seconds("FERROQUANT_VALUATION_TTL_SECS", &value)?;
        }
        if let Some(value) = var("FERROQUANT_BUMP_SIZE") {
            let bump: f64 = parse("FERROQUANT_BUMP_SIZE", &value)?;
            if !bump.is_finite() || bump <= 0.0 {
                return Err(ConfigError::invalid(
                    "FERROQUANT_BUMP_SIZE",
                    &value,
                    "must be positive and finite",
                ));
            }
            config.bump_size = bump;
        }
        if let Some(value) = var("FERROQUANT_DAY_COUNT") {
            config.day_count = Some(parse("FERROQUANT_DAY_COUNT", &value)?);
        }
        if let Some(value) = var("FERROQUANT_DEADLINE_MS") {
            config.deadline = millis("FERROQUANT_DEADLINE_MS", &value)?;
        }
        if let Some(value) = var("FERROQUANT_DB_PATH") {
            config.store = if value == ":memory:" {
                StoreConfig::in_memory()
            } else {
                StoreConfig::at(value)
            };
        }

        Ok(config)
    }

    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions::default()
            .with_max_concurrency(self.max_concurrency)
            .with_timeout(self.timeout_per_request)
            .with_max_retries(self.max_retries)
    }

    pub fn ttl_for(&self, kind: EntryKind) -> Duration {
        match kind {
            EntryKind::Series => self.series_ttl,
            EntryKind::Curve => self.curve_ttl,
            EntryKind::Valuation => self.valuation_ttl,
        }
    }
}

fn parse<T>(variable: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: ToString,
{
    value
        .parse()
        .map_err(|error: T::Err| ConfigError::invalid(variable, value, error))
}

fn millis(variable: &str, value: &str) -> Result<Duration, ConfigError> {
    let millis: u64 = parse(variable, value)?;
    if millis == 0 {
        return Err(ConfigError::invalid(variable, value, "must be positive"));
    }
    Ok(Duration::from_millis(millis))
}

fn seconds(variable: &str, value: &str) -> Result<Duration, ConfigError> {
    parse(variable, value).map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars = pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect::<HashMap<_, _>>();
        move |name: &str| vars.get(name).cloned()
    }

    #[test]
    fn defaults_without_overrides() {
        let config = AnalyticsConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.max_concurrency, 4);
        assert_eq!(config.bump_size, DEFAULT_BUMP_SIZE);
        assert_eq!(config.day_count, None);
        assert_eq!(config.ttl_for(EntryKind::Valuation), Duration::from_secs(300));
        assert_eq!(config.endpoints, ProviderEndpoints::default());
    }

    #[test]
    fn reads_overrides() {
        let config = AnalyticsConfig::from_lookup(lookup(&[
            ("FERROQUANT_POLYGON_BASE_URL", "http://localhost:9000"),
            ("FERROQUANT_MAX_CONCURRENCY", "8"),
            ("FERROQUANT_TIMEOUT_MS", "2500"),
            ("FERROQUANT_MAX_RETRIES", "0"),
            ("FERROQUANT_SERIES_TTL_SECS", "60"),
            ("FERROQUANT_BUMP_SIZE", "0.0005"),
            ("FERROQUANT_DAY_COUNT", "act360"),
            ("FERROQUANT_DEADLINE_MS", "1500"),
            ("FERROQUANT_DB_PATH", ":memory:"),
        ]))
        .unwrap();

        assert_eq!(config.endpoints.polygon, "http://localhost:9000");
        assert_eq!(config.max_concurrency, 8);
        assert_eq!(config.max_retries, 0);
        assert_eq!(config.series_ttl, Duration::from_secs(60));
        assert_eq!(config.bump_size, 0.0005);
        assert_eq!(config.day_count, Some(DayCount::Act360));
        assert_eq!(config.deadline, Duration::from_millis(1500));
        assert_eq!(config.store, StoreConfig::in_memory());

        let options = config.fetch_options();
        assert_eq!(options.max_concurrency, 8);
        assert_eq!(options.timeout_per_request, Duration::from_millis(2500));
        assert_eq!(options.max_retries(), 0);
    }

    #[test]
    fn rejects_bad_values() {
        for (name, value) in [
            ("FERROQUANT_MAX_CONCURRENCY", "0"),
            ("FERROQUANT_TIMEOUT_MS", "soon"),
            ("FERROQUANT_BUMP_SIZE", "-0.01"),
            ("FERROQUANT_DAY_COUNT", "act/act"),
        ] {
            let error = AnalyticsConfig::from_lookup(lookup(&[(name, value)])).unwrap_err();
            let ConfigError::Invalid { variable, .. } = error;
            assert_eq!(variable, name);
        }
    }
}
