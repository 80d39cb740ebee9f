use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ErrorKind, Result};
use crate::period::Period;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub period: Period,
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    #[serde(default)]
    pub page_pacing_ms: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub fetcher: FetcherConfig,
    #[serde(default)]
    pub default_limits: RateLimitConfig,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub joins: Vec<JoinConfig>,
}

/// Retry policy for every outbound call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FetcherConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_true")]
    pub jitter: bool,
}

/// Dual sliding-window capacities.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub per_second: u32,
    pub per_minute: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceConfig {
    pub id: String,
    #[serde(default)]
    pub instruments: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub limits: Option<RateLimitConfig>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Overrides the adapter's availability floor
    #[serde(default)]
    pub min_start_date: Option<NaiveDate>,
}

/// One side of a join: a job's output series.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeriesRef {
    pub source: String,
    pub instrument: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldMapping {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JoinConfig {
    pub name: String,
    pub driving: SeriesRef,
    pub other: SeriesRef,
    #[serde(default = "default_tolerance_secs")]
    pub tolerance_secs: u64,
    pub fields: Vec<FieldMapping>,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("data/backfill")
}

fn default_max_pages() -> usize {
    100
}

fn default_concurrency() -> usize {
    4
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_tolerance_secs() -> u64 {
    1_800
}

fn default_true() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            start_date: None,
            end_date: None,
            period: Period::default(),
            max_pages: default_max_pages(),
            page_pacing_ms: 0,
            concurrency: default_concurrency(),
            fetcher: FetcherConfig::default(),
            default_limits: RateLimitConfig::default(),
            sources: Vec::new(),
            joins: Vec::new(),
        }
    }
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: true,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_second: 5,
            per_minute: 120,
        }
    }
}

impl FetcherConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    #[must_use]
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    #[must_use]
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl SourceConfig {
    pub fn new(id: impl Into<String>, instruments: Vec<String>) -> Self {
        Self {
            id: id.into(),
            instruments,
            enabled: true,
            limits: None,
            base_url: None,
            api_key: None,
            min_start_date: None,
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    #[must_use]
    pub fn with_limits(mut self, per_second: u32, per_minute: u32) -> Self {
        self.limits = Some(RateLimitConfig {
            per_second,
            per_minute,
        });
        self
    }

    #[must_use]
    pub fn with_min_start_date(mut self, date: NaiveDate) -> Self {
        self.min_start_date = Some(date);
        self
    }
}

impl AppConfig {
    /// Looks up a source entry by id.
    #[must_use]
    pub fn source(&self, id: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.id == id)
    }

    /// Returns the configured date range.
    ///
    /// # Errors
    /// Returns `Config` if either bound is missing or they are out of order.
    pub fn date_range(&self) -> Result<(NaiveDate, NaiveDate)> {
        match (self.start_date, self.end_date) {
            (Some(start), Some(end)) if start <= end => Ok((start, end)),
            (Some(start), Some(end)) => Err(ErrorKind::config(format!(
                "start_date {start} is after end_date {end}"
            ))),
            _ => Err(ErrorKind::config("start_date and end_date are required")),
        }
    }

    /// Checks the settings the pipeline relies on.
    ///
    /// # Errors
    /// Returns `Config` describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if start > end {
                return Err(ErrorKind::config(format!(
                    "start_date {start} is after end_date {end}"
                )));
            }
        }

        if self.max_pages == 0 {
            return Err(ErrorKind::config("max_pages must be at least 1"));
        }
        if self.concurrency == 0 {
            return Err(ErrorKind::config("concurrency must be at least 1"));
        }
        if self.fetcher.timeout_secs == 0 {
            return Err(ErrorKind::config("fetcher.timeout_secs must be at least 1"));
        }
        if self.fetcher.base_delay_ms > self.fetcher.max_delay_ms {
            return Err(ErrorKind::config(
                "fetcher.base_delay_ms must not exceed fetcher.max_delay_ms",
            ));
        }

        validate_limits("default_limits", &self.default_limits)?;
        for source in &self.sources {
            if let Some(limits) = &source.limits {
                validate_limits(&source.id, limits)?;
            }
        }

        for join in &self.joins {
            if join.fields.is_empty() {
                return Err(ErrorKind::config(format!(
                    "join '{}' maps no fields",
                    join.name
                )));
            }
        }

        Ok(())
    }
}

fn validate_limits(owner: &str, limits: &RateLimitConfig) -> Result<()> {
    if limits.per_second == 0 || limits.per_minute == 0 {
        return Err(ErrorKind::config(format!(
            "{owner}: rate limit capacities must be non-zero"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_pages, 100);
        assert_eq!(config.period, Period::OneHour);
    }

    #[test]
    fn test_validate_rejects_reversed_dates() {
        let config = AppConfig {
            start_date: Some(date(2024, 2, 1)),
            end_date: Some(date(2024, 1, 1)),
            ..AppConfig::default()
        };
        assert!(matches!(config.validate(), Err(ErrorKind::Config(_))));
        assert!(config.date_range().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_caps() {
        let mut config = AppConfig::default();
        config
            .sources
            .push(SourceConfig::new("eth_gas", vec!["mainnet".into()]).with_limits(0, 10));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("eth_gas"));
    }

    #[test]
    fn test_validate_rejects_zero_page_cap() {
        let config = AppConfig {
            max_pages: 0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_date_range_requires_both() {
        let config = AppConfig {
            start_date: Some(date(2024, 1, 1)),
            ..AppConfig::default()
        };
        assert!(config.date_range().is_err());

        let config = AppConfig {
            end_date: Some(date(2024, 1, 2)),
            ..config
        };
        assert_eq!(
            config.date_range().unwrap(),
            (date(2024, 1, 1), date(2024, 1, 2))
        );
    }
}
