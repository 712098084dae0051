//! Job definition and execution-listener event types owned by the Scheduler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    Success,
    Failure,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDefinition {
    pub id: String,
    pub name: String,
    pub interval_ms: u64,
    pub paused: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_result: Option<JobOutcome>,
    pub run_count: u64,
    pub overlap_skip_count: u64,
}

impl JobDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>, interval_ms: u64) -> Self {
        JobDefinition {
            id: id.into(),
            name: name.into(),
            interval_ms,
            paused: false,
            last_run_at: None,
            last_result: None,
            run_count: 0,
            overlap_skip_count: 0,
        }
    }
}

/// Delivered to execution listeners after each job run (or skipped tick).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRunEvent {
    pub job_id: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub outcome: JobOutcome,
    pub error: Option<String>,
}
