#![forbid(unsafe_code)]

use cg_core::model::JobStatus;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobRow {
    pub id: i64,
    pub command: String,
    pub status: JobStatus,
    pub created_at_ms: i64,
    pub started_at_ms: Option<i64>,
    pub finished_at_ms: Option<i64>,
    pub output: Option<String>,
    pub error: Option<String>,
}

/// Partial update merged into a job row; `None` leaves the column untouched.
///
/// `started_at_ms` and `finished_at_ms` are write-once: a value is only stored while
/// the column is still null.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub started_at_ms: Option<i64>,
    pub finished_at_ms: Option<i64>,
    pub output: Option<String>,
    pub error: Option<String>,
}

impl JobUpdate {
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.started_at_ms.is_none()
            && self.finished_at_ms.is_none()
            && self.output.is_none()
            && self.error.is_none()
    }

    pub fn running(now_ms: i64) -> Self {
        Self {
            status: Some(JobStatus::Running),
            started_at_ms: Some(now_ms),
            ..Self::default()
        }
    }

    pub fn completed(now_ms: i64, output: String) -> Self {
        Self {
            status: Some(JobStatus::Completed),
            finished_at_ms: Some(now_ms),
            output: Some(output),
            ..Self::default()
        }
    }

    pub fn failed(now_ms: i64, output: Option<String>, error: String) -> Self {
        Self {
            status: Some(JobStatus::Failed),
            finished_at_ms: Some(now_ms),
            output,
            error: Some(error),
            ..Self::default()
        }
    }

    pub fn rejected(now_ms: i64, error: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Rejected),
            finished_at_ms: Some(now_ms),
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct JobsStatusCounts {
    pub pending: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
    pub rejected: u64,
}
