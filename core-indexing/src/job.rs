//! # Jobs
//!
//! A job is one named unit of deferred work (`index_user`, `test_task`)
//! with positional string arguments, as written to the durable queue.
//!
//! ## State Machine
//!
//! ```text
//!            claim               success
//! Pending ───────────> Running ──────────> Completed
//!    ^                    │
//!    │  failure, retries  │ failure, attempts exhausted
//!    └────────────────────┤ or no handler
//!                         v
//!                       Failed
//! ```
//!
//! A `Running` job whose lease has expired is claimable again, which is
//! what makes delivery at-least-once.

use crate::error::{IndexingError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Delay before the first retry; doubles with every failed attempt.
pub const INITIAL_BACKOFF_MS: u64 = 100;

/// Type-safe job identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| IndexingError::InvalidJobId(e.to_string()))
    }

    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    /// Waiting for `available_at`
    Pending,
    /// Claimed by a worker until `lease_expires_at`
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl FromStr for JobStatus {
    type Err = IndexingError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(IndexingError::InvalidStatus(s.to_string())),
        }
    }
}

/// Queued job. Timestamps are Unix epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub task_name: String,
    pub args: Vec<String>,
    pub status: JobStatus,
    /// Deliveries so far, including the current one
    pub attempts: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,
    /// Worker holding or last holding the job
    pub worker: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    /// Earliest time the job may be claimed
    pub available_at: i64,
    pub lease_expires_at: Option<i64>,
    pub finished_at: Option<i64>,
}

impl Job {
    pub fn new(task_name: impl Into<String>, args: Vec<String>, max_attempts: u32) -> Self {
        let now = now_ms();
        Self {
            id: JobId::new(),
            task_name: task_name.into(),
            args,
            status: JobStatus::Pending,
            attempts: 0,
            max_attempts,
            last_error: None,
            worker: None,
            created_at: now,
            updated_at: now,
            available_at: now,
            lease_expires_at: None,
            finished_at: None,
        }
    }

    /// Backoff before the next delivery, exponential in the attempts made.
    pub fn next_retry_delay_ms(&self) -> u64 {
        INITIAL_BACKOFF_MS.saturating_mul(2u64.saturating_pow(self.attempts))
    }

    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    pub(crate) fn complete(&mut self) {
        let now = now_ms();
        self.status = JobStatus::Completed;
        self.lease_expires_at = None;
        self.finished_at = Some(now);
        self.updated_at = now;
    }

    /// Record a failed delivery. Returns whether the job was re-queued.
    pub(crate) fn fail(&mut self, message: String, retryable: bool) -> bool {
        let now = now_ms();
        self.last_error = Some(message);
        self.lease_expires_at = None;
        self.updated_at = now;

        if retryable && self.can_retry() {
            self.status = JobStatus::Pending;
            self.available_at = now.saturating_add(self.next_retry_delay_ms() as i64);
            true
        } else {
            self.status = JobStatus::Failed;
            self.finished_at = Some(now);
            false
        }
    }
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
