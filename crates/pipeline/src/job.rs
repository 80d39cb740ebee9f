//! Per (source, instrument) job lifecycle.

use backfill_core::{DownloadResult, ErrorKind, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// One download job: `Pending -> Running -> {Succeeded, Failed}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub source_id: String,
    pub instrument_id: String,
    state: JobState,
}

impl Job {
    pub fn new(source_id: impl Into<String>, instrument_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            instrument_id: instrument_id.into(),
            state: JobState::Pending,
        }
    }

    #[must_use]
    pub fn state(&self) -> JobState {
        self.state
    }

    #[must_use]
    pub fn key(&self) -> String {
        format!("{}/{}", self.source_id, self.instrument_id)
    }

    /// # Errors
    /// Returns `Internal` unless the job is pending.
    pub fn start(&mut self) -> Result<()> {
        self.transition(JobState::Running)
    }

    /// Marks the job succeeded and produces its result.
    ///
    /// # Errors
    /// Returns `Internal` unless the job is running.
    pub fn succeed(&mut self, record_count: usize, output: PathBuf) -> Result<DownloadResult> {
        self.transition(JobState::Succeeded)?;
        Ok(DownloadResult::succeeded(
            &self.source_id,
            &self.instrument_id,
            record_count,
            output,
        ))
    }

    /// Marks the job failed and produces its result.
    ///
    /// # Errors
    /// Returns `Internal` unless the job is running.
    pub fn fail(&mut self, error: ErrorKind) -> Result<DownloadResult> {
        self.transition(JobState::Failed)?;
        Ok(DownloadResult::failed(&self.source_id, &self.instrument_id, error))
    }

    fn transition(&mut self, to: JobState) -> Result<()> {
        let legal = matches!(
            (self.state, to),
            (JobState::Pending, JobState::Running)
                | (JobState::Running, JobState::Succeeded)
                | (JobState::Running, JobState::Failed)
        );
        if !legal {
            return Err(ErrorKind::Internal(format!(
                "job {}: illegal transition {} -> {}",
                self.key(),
                self.state,
                to
            )));
        }
        debug!(job = %self.key(), from = %self.state, to = %to, "Job transition");
        self.state = to;
        Ok(())
    }
}
