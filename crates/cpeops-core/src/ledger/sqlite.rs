// Copyright (C) 2026 Cpeops Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed job ledger implementation.

use std::path::Path;

use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

use crate::error::{CoreError, ErrorDescriptor};
use crate::tenant::TenantContext;

use super::{JobLedger, JobRecord, JobResultRecord, JobSnapshot, JobStatus, NewJob};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

/// SQLite-backed job ledger.
#[derive(Clone)]
pub struct SqliteLedger {
    pool: SqlitePool,
}

impl SqliteLedger {
    /// Create a ledger from an existing pool. Migrations must already be applied.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create and initialize a ledger from a database file path.
    ///
    /// Creates parent directories and the database file if missing, then runs
    /// all migrations.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| CoreError::DatabaseError {
                operation: "create_dir".to_string(),
                details: format!("Failed to create directory {:?}: {}", parent, e),
            })?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .map_err(|e| CoreError::DatabaseError {
                operation: "connect".to_string(),
                details: format!("Failed to connect to SQLite at {:?}: {}", path, e),
            })?;

        Self::migrate(pool).await
    }

    /// Create a fresh in-memory ledger, mainly for tests.
    ///
    /// The pool is pinned to a single connection: with more, each connection
    /// would get its own private `:memory:` database.
    pub async fn in_memory() -> Result<Self, CoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| CoreError::DatabaseError {
                operation: "connect".to_string(),
                details: format!("Failed to open in-memory SQLite: {}", e),
            })?;

        Self::migrate(pool).await
    }

    async fn migrate(pool: SqlitePool) -> Result<Self, CoreError> {
        MIGRATOR
            .run(&pool)
            .await
            .map_err(|e| CoreError::DatabaseError {
                operation: "migrate".to_string(),
                details: format!("Failed to run migrations: {}", e),
            })?;

        Ok(Self { pool })
    }
}

const JOB_COLUMNS: &str = "job_id, tenant_id, requested_by, device_id, kind, params, \
                           status, progress, created_at, updated_at";

#[async_trait::async_trait]
impl JobLedger for SqliteLedger {
    async fn insert_job(&self, ctx: &TenantContext, job: &NewJob) -> Result<(), CoreError> {
        let params = serde_json::to_string(&job.params)?;

        sqlx::query(
            r#"
            INSERT INTO jobs (job_id, tenant_id, requested_by, device_id, kind, params, status)
            VALUES (?, ?, ?, ?, ?, ?, 'queued')
            "#,
        )
        .bind(&job.job_id)
        .bind(&ctx.tenant_id)
        .bind(&ctx.user_id)
        .bind(&job.device_id)
        .bind(&job.kind)
        .bind(&params)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_job(
        &self,
        ctx: &TenantContext,
        job_id: &str,
    ) -> Result<Option<JobRecord>, CoreError> {
        let record = sqlx::query_as::<_, JobRecord>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE job_id = ? AND tenant_id = ?"
        ))
        .bind(job_id)
        .bind(&ctx.tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn get_snapshot(
        &self,
        ctx: &TenantContext,
        job_id: &str,
    ) -> Result<Option<JobSnapshot>, CoreError> {
        let Some(job) = self.get_job(ctx, job_id).await? else {
            return Ok(None);
        };

        let result = sqlx::query_as::<_, JobResultRecord>(
            r#"
            SELECT job_id, tenant_id, payload, error_kind, error_message, written_at
            FROM job_results
            WHERE job_id = ? AND tenant_id = ?
            "#,
        )
        .bind(job_id)
        .bind(&ctx.tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(Some(JobSnapshot { job, result }))
    }

    async fn list_jobs(
        &self,
        ctx: &TenantContext,
        status: Option<JobStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<JobRecord>, CoreError> {
        let records = match status {
            Some(status) => {
                sqlx::query_as::<_, JobRecord>(&format!(
                    "SELECT {JOB_COLUMNS} FROM jobs \
                     WHERE tenant_id = ? AND status = ? \
                     ORDER BY created_at DESC, job_id DESC LIMIT ? OFFSET ?"
                ))
                .bind(&ctx.tenant_id)
                .bind(status.as_str())
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, JobRecord>(&format!(
                    "SELECT {JOB_COLUMNS} FROM jobs \
                     WHERE tenant_id = ? \
                     ORDER BY created_at DESC, job_id DESC LIMIT ? OFFSET ?"
                ))
                .bind(&ctx.tenant_id)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(records)
    }

    async fn claim_job(&self, ctx: &TenantContext, job_id: &str) -> Result<bool, CoreError> {
        // The status guard makes concurrent claims race-free: only one
        // UPDATE can see status='queued'.
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'running', progress = 0, updated_at = CURRENT_TIMESTAMP
            WHERE job_id = ? AND tenant_id = ? AND status = 'queued'
            "#,
        )
        .bind(job_id)
        .bind(&ctx.tenant_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn record_progress(
        &self,
        ctx: &TenantContext,
        job_id: &str,
        percent: u8,
    ) -> Result<(), CoreError> {
        let percent = i64::from(percent.min(100));

        sqlx::query(
            r#"
            UPDATE jobs
            SET progress = MAX(progress, ?), updated_at = CURRENT_TIMESTAMP
            WHERE job_id = ? AND tenant_id = ? AND status = 'running'
            "#,
        )
        .bind(percent)
        .bind(job_id)
        .bind(&ctx.tenant_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn finish_job(
        &self,
        ctx: &TenantContext,
        job_id: &str,
        status: JobStatus,
        payload: Option<&serde_json::Value>,
        error: Option<&ErrorDescriptor>,
    ) -> Result<bool, CoreError> {
        debug_assert!(status.is_terminal());

        let payload = payload.map(serde_json::to_string).transpose()?;

        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE jobs
            SET status = ?, updated_at = CURRENT_TIMESTAMP
            WHERE job_id = ? AND tenant_id = ? AND status = 'running'
            "#,
        )
        .bind(status.as_str())
        .bind(job_id)
        .bind(&ctx.tenant_id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        upsert_result(
            &mut tx,
            job_id,
            &ctx.tenant_id,
            payload.as_deref(),
            error,
        )
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn fail_queued(
        &self,
        ctx: &TenantContext,
        job_id: &str,
        error: &ErrorDescriptor,
    ) -> Result<bool, CoreError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'failed', updated_at = CURRENT_TIMESTAMP
            WHERE job_id = ? AND tenant_id = ? AND status = 'queued'
            "#,
        )
        .bind(job_id)
        .bind(&ctx.tenant_id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        upsert_result(&mut tx, job_id, &ctx.tenant_id, None, Some(error)).await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn cancel_job(
        &self,
        ctx: &TenantContext,
        job_id: &str,
        reason: &str,
    ) -> Result<bool, CoreError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'cancelled', updated_at = CURRENT_TIMESTAMP
            WHERE job_id = ? AND tenant_id = ? AND status IN ('queued', 'running')
            "#,
        )
        .bind(job_id)
        .bind(&ctx.tenant_id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        let error = ErrorDescriptor::new("cancelled", reason);
        upsert_result(&mut tx, job_id, &ctx.tenant_id, None, Some(&error)).await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn is_cancelled(&self, ctx: &TenantContext, job_id: &str) -> Result<bool, CoreError> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM jobs WHERE job_id = ? AND tenant_id = ?")
                .bind(job_id)
                .bind(&ctx.tenant_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(status.as_deref() == Some("cancelled"))
    }

    async fn list_queued(&self, limit: i64) -> Result<Vec<JobRecord>, CoreError> {
        let records = sqlx::query_as::<_, JobRecord>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs \
             WHERE status = 'queued' \
             ORDER BY created_at ASC, job_id ASC LIMIT ?"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn health_check(&self) -> Result<(), CoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

async fn upsert_result(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    job_id: &str,
    tenant_id: &str,
    payload: Option<&str>,
    error: Option<&ErrorDescriptor>,
) -> Result<(), CoreError> {
    sqlx::query(
        r#"
        INSERT INTO job_results (job_id, tenant_id, payload, error_kind, error_message, written_at)
        VALUES (?, ?, ?, ?, ?, CURRENT_TIMESTAMP)
        ON CONFLICT (job_id) DO UPDATE SET
            payload = excluded.payload,
            error_kind = excluded.error_kind,
            error_message = excluded.error_message,
            written_at = excluded.written_at
        "#,
    )
    .bind(job_id)
    .bind(tenant_id)
    .bind(payload)
    .bind(error.map(|e| e.kind.as_str()))
    .bind(error.map(|e| e.message.as_str()))
    .execute(&mut **tx)
    .await?;

    Ok(())
}
