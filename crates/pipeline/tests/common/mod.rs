//! Shared fixtures for the orchestrator integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use backfill_core::{
    AppConfig, ErrorKind, FetchWindow, Period, RateLimitConfig, Result, SeriesKind, TimePoint,
};
use backfill_pipeline::Orchestrator;
use backfill_sources::{
    Page, Pagination, Payload, RateLimiterRegistry, Request, ResilientFetcher, SourceAdapter,
    SourceRegistry,
};
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use serde_json::Value;

pub fn date(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
}

pub fn at(minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minutes)
}

/// In-memory adapter returning a fixed set of points in one page.
pub struct StaticAdapter {
    pub id: &'static str,
    pub kind: SeriesKind,
    pub period: Period,
    pub min_start: NaiveDate,
    pub points: Vec<TimePoint>,
    pub panic_on_parse: bool,
    /// When set, each page first calls this URL through the fetcher.
    pub upstream: Option<String>,
}

impl StaticAdapter {
    pub fn new(id: &'static str, kind: SeriesKind, period: Period, points: Vec<TimePoint>) -> Self {
        Self {
            id,
            kind,
            period,
            min_start: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
            points,
            panic_on_parse: false,
            upstream: None,
        }
    }
}

#[async_trait]
impl SourceAdapter for StaticAdapter {
    fn source_id(&self) -> &str {
        self.id
    }

    fn kind(&self) -> SeriesKind {
        self.kind
    }

    fn unit(&self) -> &str {
        "test"
    }

    fn min_start_date(&self) -> NaiveDate {
        self.min_start
    }

    fn pagination(&self) -> Pagination {
        Pagination::ForwardChunks
    }

    fn page_size(&self) -> usize {
        self.points.len().max(1)
    }

    fn period(&self) -> Period {
        self.period
    }

    async fn fetch_page(&self, fetcher: &ResilientFetcher, _window: &FetchWindow) -> Result<Payload> {
        if let Some(url) = &self.upstream {
            fetcher.fetch_json(&Request::get(url)).await?;
        }
        Ok(Payload::Json(Value::Null))
    }

    fn parse_page(&self, _window: &FetchWindow, _payload: Payload) -> Result<Page> {
        if self.panic_on_parse {
            panic!("adapter {} blew up", self.id);
        }
        Ok(Page::new(
            self.points.iter().cloned().map(Ok::<_, ErrorKind>).collect(),
            backfill_core::Cursor::Done,
        ))
    }
}

/// Hourly OHLCV-shaped bars over `hours` hours from 2024-01-01.
pub fn hourly_bars(hours: i64) -> Vec<TimePoint> {
    (0..hours)
        .map(|h| {
            let c = 100.0 + h as f64;
            TimePoint::ohlcv(at(h * 60), c, c, c, c, 1.0)
        })
        .collect()
}

pub fn config(output_dir: &Path) -> AppConfig {
    AppConfig {
        output_dir: output_dir.to_path_buf(),
        ..AppConfig::default()
    }
}

pub fn orchestrator(config: AppConfig, adapters: Vec<Arc<dyn SourceAdapter>>) -> Orchestrator {
    let mut registry = SourceRegistry::new();
    for adapter in adapters {
        registry.register(adapter);
    }
    let limiters = Arc::new(RateLimiterRegistry::new(RateLimitConfig {
        per_second: 100,
        per_minute: 1_000,
    }));
    let fetcher = config.fetcher.clone();
    Orchestrator::new(config, registry, limiters, fetcher)
}
