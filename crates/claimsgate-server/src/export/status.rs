//! Job status as a read-time projection over the job's batches.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use claimsgate_storage::{Batch, BatchFile, BatchStatus};

use super::manifest::Manifest;

/// How long a completed job's results stay servable.
pub fn result_ttl() -> Duration {
    Duration::hours(24)
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobState {
    Failed,
    InProgress(Progress),
    /// Nothing to report yet, e.g. no batches are visible.
    Pending,
    Complete(Box<Manifest>, DateTime<Utc>),
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressLabel {
    Queued,
    Running,
}

/// Percentage of patients processed across all batches.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub label: ProgressLabel,
    pub percent: f64,
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.label {
            ProgressLabel::Queued => "QUEUED",
            ProgressLabel::Running => "RUNNING",
        };
        write!(f, "{label}: {:.2}%", self.percent)
    }
}

fn progress(batches: &[Batch]) -> Progress {
    let total: i64 = batches.iter().map(|b| i64::from(b.total_patients)).sum();
    let processed: i64 = batches.iter().map(|b| i64::from(b.patients_processed)).sum();
    if total == 0 {
        return Progress {
            label: ProgressLabel::Queued,
            percent: 0.0,
        };
    }
    let label = if batches.iter().any(|b| b.status == BatchStatus::Running) {
        ProgressLabel::Running
    } else {
        ProgressLabel::Queued
    };
    Progress {
        label,
        percent: processed as f64 / total as f64 * 100.0,
    }
}

/// Derives the state of one job. Rules are checked in order:
/// any FAILED batch, then any unfinished batch, then all COMPLETED;
/// every other combination is pending.
pub fn aggregate(
    batches: &[Batch],
    files: &[BatchFile],
    base_url: &str,
    now: DateTime<Utc>,
) -> JobState {
    if batches.iter().any(|b| b.status == BatchStatus::Failed) {
        return JobState::Failed;
    }

    if batches
        .iter()
        .any(|b| matches!(b.status, BatchStatus::Running | BatchStatus::Queued))
    {
        return JobState::InProgress(progress(batches));
    }

    if !batches.is_empty() && batches.iter().all(|b| b.status == BatchStatus::Completed) {
        let Some(latest) = batches.iter().filter_map(|b| b.complete_time).max() else {
            return JobState::Pending;
        };
        if now - latest > result_ttl() {
            return JobState::Stale;
        }
        return match Manifest::build(batches, files, base_url, latest) {
            Some(manifest) => JobState::Complete(Box::new(manifest), latest + result_ttl()),
            None => JobState::Pending,
        };
    }

    JobState::Pending
}
