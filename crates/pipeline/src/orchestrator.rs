//! Runs one job per (source, instrument), isolates their failures, and
//! writes the consolidated report.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use backfill_core::{
    AppConfig, DerivedResult, DownloadResult, ErrorKind, FetchWindow, FetcherConfig, JoinConfig,
    Period, Report, Result, Series, Shutdown,
};
use backfill_data::{nearest_join, CsvStorage};
use backfill_sources::{
    drain, DrainConfig, RateLimiterRegistry, ResilientFetcher, SourceAdapter, SourceRegistry,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::job::Job;
use crate::reconcile::{reconcile, window_bounds};

/// Longest join tolerance honored: one year.
const MAX_JOIN_TOLERANCE_SECS: u64 = 365 * 86_400;

/// Instruments requested from one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRequest {
    pub source_id: String,
    pub instruments: Vec<String>,
}

impl SourceRequest {
    pub fn new(source_id: impl Into<String>, instruments: Vec<String>) -> Self {
        Self {
            source_id: source_id.into(),
            instruments,
        }
    }

    /// Requests for every enabled source in `config`, in declaration order.
    #[must_use]
    pub fn from_config(config: &AppConfig) -> Vec<Self> {
        config
            .sources
            .iter()
            .filter(|s| s.enabled)
            .map(|s| Self::new(&s.id, s.instruments.clone()))
            .collect()
    }
}

/// Everything one job needs, owned by its task.
pub struct JobContext {
    pub adapter: Arc<dyn SourceAdapter>,
    pub fetcher: ResilientFetcher,
    pub window: FetchWindow,
    pub drain: DrainConfig,
    /// Output period of interpolated rates
    pub target_period: Period,
    pub output_dir: PathBuf,
}

/// Output of a successful job.
struct JobOutput {
    series: Series,
    path: PathBuf,
}

enum Slot {
    /// Failed before a task was spawned
    Done(DownloadResult),
    Spawned(Job, JoinHandle<Result<JobOutput>>),
}

pub struct Orchestrator {
    config: AppConfig,
    sources: SourceRegistry,
    limiters: Arc<RateLimiterRegistry>,
    fetcher_config: FetcherConfig,
    shutdown: Shutdown,
}

impl Orchestrator {
    pub fn new(
        config: AppConfig,
        sources: SourceRegistry,
        limiters: Arc<RateLimiterRegistry>,
        fetcher_config: FetcherConfig,
    ) -> Self {
        Self {
            config,
            sources,
            limiters,
            fetcher_config,
            shutdown: Shutdown::never(),
        }
    }

    /// Cancels in-flight jobs when `shutdown` fires.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Downloads every requested series for `start..=end`.
    ///
    /// Per-job failures are recorded in the report and never fail the run.
    ///
    /// # Errors
    /// - `Config` if `start` is after `end`
    /// - `Storage` if the output directory or the report cannot be written
    pub async fn run(
        &self,
        requests: &[SourceRequest],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Report> {
        if start > end {
            return Err(ErrorKind::config(format!(
                "start date {start} is after end date {end}"
            )));
        }
        std::fs::create_dir_all(&self.config.output_dir).map_err(|e| {
            ErrorKind::storage(format!(
                "cannot create output directory {}: {e}",
                self.config.output_dir.display()
            ))
        })?;

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut slots = Vec::new();

        for request in requests {
            for instrument in &request.instruments {
                let mut job = Job::new(&request.source_id, instrument);
                let context = match self.prepare(&request.source_id, instrument, start, end) {
                    Ok(context) => context,
                    Err(e) => {
                        warn!(job = %job.key(), error = %e, "Job not started");
                        job.start()?;
                        slots.push(Slot::Done(job.fail(e)?));
                        continue;
                    }
                };

                job.start()?;
                let semaphore = Arc::clone(&semaphore);
                let shutdown = self.shutdown.clone();
                let handle = tokio::spawn(async move {
                    let _permit = tokio::select! {
                        () = shutdown.wait() => return Err(ErrorKind::Cancelled),
                        permit = semaphore.acquire_owned() => permit
                            .map_err(|_| ErrorKind::Internal("job semaphore closed".into()))?,
                    };
                    execute(context, &shutdown).await
                });
                slots.push(Slot::Spawned(job, handle));
            }
        }

        let keep_series = !self.config.joins.is_empty();
        let mut outputs: HashMap<String, Series> = HashMap::new();
        let mut results = Vec::with_capacity(slots.len());

        for slot in slots {
            let (mut job, handle) = match slot {
                Slot::Done(result) => {
                    results.push(result);
                    continue;
                }
                Slot::Spawned(job, handle) => (job, handle),
            };

            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(job = %job.key(), error = %e, "Job task panicked");
                    Err(ErrorKind::Internal(format!("job task failed: {e}")))
                }
            };

            let result = match outcome {
                Ok(output) => {
                    let result = job.succeed(output.series.len(), output.path)?;
                    if keep_series {
                        outputs.insert(job.key(), output.series);
                    }
                    result
                }
                Err(e) => {
                    warn!(job = %job.key(), error = %e, "Job failed");
                    job.fail(e)?
                }
            };
            results.push(result);
        }

        let mut report = Report::new(start, end, results);
        report.derived = self
            .config
            .joins
            .iter()
            .map(|join| self.run_join(join, &report, &outputs))
            .collect();

        let report_path = self.config.output_dir.join(report.file_name());
        CsvStorage::write_report(&report_path, &report)?;

        info!(
            total = report.totals.total,
            succeeded = report.totals.succeeded,
            failed = report.totals.failed,
            records = report.totals.records,
            report = %report_path.display(),
            "Backfill run complete"
        );
        Ok(report)
    }

    /// Builds the context of one job, clamping its range to the source's
    /// availability floor.
    fn prepare(
        &self,
        source_id: &str,
        instrument_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<JobContext> {
        let adapter = self
            .sources
            .get(source_id)
            .ok_or_else(|| ErrorKind::config(format!("unknown source {source_id}")))?;

        let floor = self
            .config
            .source(source_id)
            .and_then(|s| s.min_start_date)
            .unwrap_or_else(|| adapter.min_start_date());
        let clamped = start.max(floor);
        if clamped > end {
            let (from, to) = window_bounds(adapter.kind(), adapter.period(), start, end);
            return Err(ErrorKind::CoverageGap { from, to });
        }
        if clamped > start {
            info!(
                source = source_id,
                instrument = instrument_id,
                requested = %start,
                clamped = %clamped,
                "Start date clamped to source availability"
            );
        }

        let (from, to) = window_bounds(adapter.kind(), adapter.period(), clamped, end);
        let window = FetchWindow::new(source_id, instrument_id, from, to, adapter.page_size());
        let limiter = self.limiters.get(source_id)?;
        let fetcher = ResilientFetcher::new(self.fetcher_config.clone(), limiter, self.shutdown.clone())?;

        Ok(JobContext {
            adapter,
            fetcher,
            window,
            drain: DrainConfig {
                max_pages: self.config.max_pages,
                pacing: Duration::from_millis(self.config.page_pacing_ms),
            },
            target_period: self.config.period,
            output_dir: self.config.output_dir.clone(),
        })
    }

    fn run_join(
        &self,
        join: &JoinConfig,
        report: &Report,
        outputs: &HashMap<String, Series>,
    ) -> DerivedResult {
        let failed = |error: ErrorKind| {
            warn!(join = %join.name, error = %error, "Join skipped");
            DerivedResult {
                name: join.name.clone(),
                success: false,
                record_count: 0,
                output_ref: None,
                error: Some(error),
            }
        };

        let mut inputs = Vec::with_capacity(2);
        for side in [&join.driving, &join.other] {
            let Some(result) = report.find(&side.source, &side.instrument) else {
                return failed(ErrorKind::config(format!(
                    "join input {}/{} is not part of this run",
                    side.source, side.instrument
                )));
            };
            if let Some(e) = &result.error {
                return failed(e.clone());
            }
            match outputs.get(&result.key()) {
                Some(series) => inputs.push(series),
                None => {
                    return failed(ErrorKind::Internal(format!(
                        "join input {} has no series",
                        result.key()
                    )))
                }
            }
        }

        let fields: Vec<(&str, &str)> = join
            .fields
            .iter()
            .map(|f| (f.from.as_str(), f.to.as_str()))
            .collect();
        let tolerance = chrono::Duration::seconds(join.tolerance_secs.min(MAX_JOIN_TOLERANCE_SECS) as i64);
        let joined = nearest_join(inputs[0], inputs[1], tolerance, &fields);

        let path = CsvStorage::derived_path(&self.config.output_dir, &join.name);
        match CsvStorage::write_series(&path, &joined) {
            Ok(()) => {
                info!(join = %join.name, records = joined.len(), "Join written");
                DerivedResult {
                    name: join.name.clone(),
                    success: true,
                    record_count: joined.len(),
                    output_ref: Some(path),
                    error: None,
                }
            }
            Err(e) => failed(e),
        }
    }
}

/// Drains, reconciles and writes one series.
async fn execute(mut ctx: JobContext, shutdown: &Shutdown) -> Result<JobOutput> {
    info!(
        source = %ctx.window.source_id,
        instrument = %ctx.window.instrument_id,
        start = %ctx.window.start,
        end = %ctx.window.end,
        pagination = %ctx.adapter.pagination(),
        "Job started"
    );

    let outcome = drain(ctx.adapter.as_ref(), &ctx.fetcher, &mut ctx.window, &ctx.drain).await?;
    let series = reconcile(
        &outcome.series,
        ctx.adapter.period(),
        ctx.target_period,
        ctx.window.start,
        ctx.window.end,
    )?;

    if shutdown.is_triggered() {
        return Err(ErrorKind::Cancelled);
    }

    let path = CsvStorage::series_path(&ctx.output_dir, series.meta());
    CsvStorage::write_series(&path, &series)?;

    let stats = ctx.fetcher.stats();
    info!(
        source = %ctx.window.source_id,
        instrument = %ctx.window.instrument_id,
        raw = outcome.series.len(),
        records = series.len(),
        malformed = outcome.malformed,
        pages = outcome.pages,
        requests = stats.requests,
        retries = stats.retries,
        "Job finished"
    );
    Ok(JobOutput { series, path })
}
