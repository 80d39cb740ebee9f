//! Per-job results and the consolidated run report.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::ErrorKind;

/// Outcome of one (source, instrument) job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadResult {
    pub source_id: String,
    pub instrument_id: String,
    pub success: bool,
    pub record_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_ref: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
}

impl DownloadResult {
    pub fn succeeded(
        source_id: impl Into<String>,
        instrument_id: impl Into<String>,
        record_count: usize,
        output_ref: PathBuf,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            instrument_id: instrument_id.into(),
            success: true,
            record_count,
            output_ref: Some(output_ref),
            error: None,
        }
    }

    pub fn failed(
        source_id: impl Into<String>,
        instrument_id: impl Into<String>,
        error: ErrorKind,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            instrument_id: instrument_id.into(),
            success: false,
            record_count: 0,
            output_ref: None,
            error: Some(error),
        }
    }

    /// `source_id/instrument_id`
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}/{}", self.source_id, self.instrument_id)
    }
}

/// Output of one configured nearest-time join.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedResult {
    pub name: String,
    pub success: bool,
    pub record_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_ref: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub records: usize,
}

/// Consolidated report for one run. Jobs appear in submission order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub date_range: DateRange,
    pub per_source: Vec<DownloadResult>,
    pub totals: Totals,
    #[serde(default)]
    pub derived: Vec<DerivedResult>,
}

impl Report {
    /// Builds a report and computes its totals from `per_source`.
    pub fn new(start: NaiveDate, end: NaiveDate, per_source: Vec<DownloadResult>) -> Self {
        let totals = Totals {
            total: per_source.len(),
            succeeded: per_source.iter().filter(|r| r.success).count(),
            failed: per_source.iter().filter(|r| !r.success).count(),
            records: per_source.iter().map(|r| r.record_count).sum(),
        };

        Self {
            date_range: DateRange { start, end },
            per_source,
            totals,
            derived: Vec::new(),
        }
    }

    /// Conventional report file name: `report_<start>_<end>.json`.
    #[must_use]
    pub fn file_name(&self) -> String {
        format!(
            "report_{}_{}.json",
            self.date_range.start.format("%Y-%m-%d"),
            self.date_range.end.format("%Y-%m-%d")
        )
    }

    /// Looks up a job result by source and instrument.
    #[must_use]
    pub fn find(&self, source_id: &str, instrument_id: &str) -> Option<&DownloadResult> {
        self.per_source
            .iter()
            .find(|r| r.source_id == source_id && r.instrument_id == instrument_id)
    }

    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.totals.failed == 0
    }
}
