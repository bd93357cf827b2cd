// Copyright (C) 2026 Cpeops Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Job ledger abstraction.
//!
//! The ledger is the single source of truth for job state. Every accessor
//! takes a [`TenantContext`] and filters on `tenant_id` at the storage layer;
//! a job belonging to another tenant behaves exactly like a job that does not
//! exist.

pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreError, ErrorDescriptor};
use crate::tenant::TenantContext;

pub use sqlite::SqliteLedger;

/// Lifecycle state of a job.
///
/// Legal transitions: `queued -> running`, `running -> completed | failed |
/// timeout`, and `queued | running -> cancelled`. A job that was never
/// claimable (no registered client for its kind) may also go
/// `queued -> failed`. Terminal states never transition again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Accepted and waiting for a worker.
    Queued,
    /// Claimed by a worker and executing.
    Running,
    /// Finished successfully; a result payload exists.
    Completed,
    /// Finished unsuccessfully; an error descriptor exists.
    Failed,
    /// Killed after exceeding the execution budget.
    #[serde(rename = "timeout")]
    TimedOut,
    /// Stopped on request before completion.
    Cancelled,
}

impl JobStatus {
    /// Stable string form stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TimedOut => "timeout",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse the stored string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "timeout" => Some(Self::TimedOut),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Whether this state admits no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::TimedOut | Self::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A job row as stored in the ledger.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct JobRecord {
    /// Unique job identifier (UUID v4, assigned at submission).
    pub job_id: String,
    /// Owning tenant.
    pub tenant_id: String,
    /// User that submitted the job.
    pub requested_by: String,
    /// Target device, if the operation addresses one.
    pub device_id: Option<String>,
    /// Operation kind, e.g. `snmp.get` or `usp.operate`.
    pub kind: String,
    /// Operation parameters as a JSON document.
    pub params: String,
    /// Current lifecycle state (string form).
    pub status: String,
    /// Percent progress; meaningful only while `running`.
    pub progress: i64,
    /// Submission time.
    pub created_at: DateTime<Utc>,
    /// Last state change.
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// Typed view of the stored status string.
    pub fn status(&self) -> Option<JobStatus> {
        JobStatus::parse(&self.status)
    }

    /// Parse the stored parameter document.
    pub fn params_json(&self) -> Value {
        serde_json::from_str(&self.params).unwrap_or(Value::Null)
    }
}

/// A result row; exists exactly when its job is terminal.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct JobResultRecord {
    /// Job this result belongs to.
    pub job_id: String,
    /// Owning tenant, duplicated for filtered reads.
    pub tenant_id: String,
    /// Success payload (JSON text), present for `completed` jobs.
    pub payload: Option<String>,
    /// Failure kind code, present for unsuccessful terminal states.
    pub error_kind: Option<String>,
    /// Failure message.
    pub error_message: Option<String>,
    /// When the result was written.
    pub written_at: DateTime<Utc>,
}

impl JobResultRecord {
    /// Parse the success payload.
    pub fn payload_json(&self) -> Option<Value> {
        self.payload
            .as_deref()
            .and_then(|p| serde_json::from_str(p).ok())
    }

    /// The recorded failure, if the job did not complete.
    pub fn error(&self) -> Option<ErrorDescriptor> {
        match (&self.error_kind, &self.error_message) {
            (Some(kind), Some(message)) => Some(ErrorDescriptor::new(kind, message)),
            (Some(kind), None) => Some(ErrorDescriptor::new(kind, "")),
            _ => None,
        }
    }
}

/// Combined job + result view returned by status queries.
#[derive(Debug, Clone)]
pub struct JobSnapshot {
    /// The job row.
    pub job: JobRecord,
    /// The result row, present iff the job is terminal.
    pub result: Option<JobResultRecord>,
}

/// Parameters for inserting a new job.
#[derive(Debug, Clone)]
pub struct NewJob {
    /// Pre-assigned job identifier.
    pub job_id: String,
    /// Target device, if any.
    pub device_id: Option<String>,
    /// Operation kind.
    pub kind: String,
    /// Operation parameters.
    pub params: Value,
}

/// Storage operations for the job ledger.
///
/// Implementations must make `claim_job` atomic: of any number of concurrent
/// claims for the same job, exactly one returns `true`.
#[async_trait]
pub trait JobLedger: Send + Sync {
    /// Insert a new job in `queued` state.
    async fn insert_job(&self, ctx: &TenantContext, job: &NewJob) -> Result<(), CoreError>;

    /// Fetch a job visible to this tenant.
    async fn get_job(&self, ctx: &TenantContext, job_id: &str)
    -> Result<Option<JobRecord>, CoreError>;

    /// Fetch a job together with its result row, if any.
    async fn get_snapshot(
        &self,
        ctx: &TenantContext,
        job_id: &str,
    ) -> Result<Option<JobSnapshot>, CoreError>;

    /// List this tenant's jobs, newest first, optionally filtered by status.
    async fn list_jobs(
        &self,
        ctx: &TenantContext,
        status: Option<JobStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<JobRecord>, CoreError>;

    /// Atomically move a `queued` job to `running` and reset its progress.
    ///
    /// Returns `false` if the job was already claimed, terminal, or invisible.
    async fn claim_job(&self, ctx: &TenantContext, job_id: &str) -> Result<bool, CoreError>;

    /// Record progress for a `running` job.
    ///
    /// Progress is monotonic: a lower value than the stored one is kept as-is.
    /// Silently ignored when the job is not running.
    async fn record_progress(
        &self,
        ctx: &TenantContext,
        job_id: &str,
        percent: u8,
    ) -> Result<(), CoreError>;

    /// Move a `running` job to the given terminal status and write its result
    /// row, in one transaction.
    ///
    /// Returns `false` without writing anything if the job is no longer
    /// `running` (a late write after cancellation or timeout).
    async fn finish_job(
        &self,
        ctx: &TenantContext,
        job_id: &str,
        status: JobStatus,
        payload: Option<&Value>,
        error: Option<&ErrorDescriptor>,
    ) -> Result<bool, CoreError>;

    /// Fail a job that is still `queued`, writing its result row.
    ///
    /// Used when no worker will ever pick the job up (e.g. no client is
    /// registered for its kind). Returns `false` if the job already left
    /// `queued`.
    async fn fail_queued(
        &self,
        ctx: &TenantContext,
        job_id: &str,
        error: &ErrorDescriptor,
    ) -> Result<bool, CoreError>;

    /// Cancel a `queued` or `running` job, writing a cancellation result in
    /// the same transaction.
    ///
    /// Returns `false` (a no-op) when the job is already terminal.
    async fn cancel_job(
        &self,
        ctx: &TenantContext,
        job_id: &str,
        reason: &str,
    ) -> Result<bool, CoreError>;

    /// Whether a cancellation has been recorded for this job.
    async fn is_cancelled(&self, ctx: &TenantContext, job_id: &str) -> Result<bool, CoreError>;

    /// List `queued` jobs across all tenants, oldest first.
    ///
    /// Engine-internal: used by the daemon's startup sweep to re-enqueue jobs
    /// that were accepted before a restart.
    async fn list_queued(&self, limit: i64) -> Result<Vec<JobRecord>, CoreError>;

    /// Verify the backing store is reachable.
    async fn health_check(&self) -> Result<(), CoreError>;
}
