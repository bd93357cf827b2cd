// Copyright (C) 2026 Cpeops Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Job submission service.
//!
//! The facade the calling layer talks to: validate, persist, enqueue, and the
//! read-side operations (query, list, cancel, subscribe). Persisting the job
//! row and handing it to the queue are deliberately not atomic; the row is
//! the durable fact, and a job whose enqueue is lost stays `queued` until the
//! startup sweep re-delivers it.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::clients::ClientRegistry;
use crate::config::Config;
use crate::error::CoreError;
use crate::ledger::{JobLedger, JobRecord, JobSnapshot, JobStatus, NewJob};
use crate::progress::{self, JobEvent, StreamOptions};
use crate::queue::{DispatchRequest, JobQueue};
use crate::tenant::TenantContext;

/// Entry point for submitting and observing jobs.
pub struct JobService {
    ledger: Arc<dyn JobLedger>,
    registry: Arc<ClientRegistry>,
    queue: Arc<dyn JobQueue>,
    stream_options: StreamOptions,
}

impl JobService {
    /// Create a service over the shared ledger, registry and queue.
    pub fn new(
        ledger: Arc<dyn JobLedger>,
        registry: Arc<ClientRegistry>,
        queue: Arc<dyn JobQueue>,
        config: &Config,
    ) -> Self {
        Self {
            ledger,
            registry,
            queue,
            stream_options: StreamOptions {
                poll_interval: config.stream_poll_interval,
                max_wait: config.stream_max_wait,
            },
        }
    }

    /// Submit a new job. Returns its id once the row is durable.
    ///
    /// Parameters are validated synchronously when a client is registered for
    /// the kind; malformed parameters are rejected without creating a job. An
    /// unregistered kind is accepted and fails closed at dispatch, so the
    /// caller still gets a queryable failure record.
    #[instrument(skip(self, ctx, params), fields(tenant_id = %ctx.tenant_id, kind = %kind))]
    pub async fn submit(
        &self,
        ctx: &TenantContext,
        kind: &str,
        device_id: Option<&str>,
        params: Value,
    ) -> Result<String, CoreError> {
        if kind.trim().is_empty() {
            return Err(CoreError::ValidationError {
                field: "kind".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        if let Some(client) = self.registry.resolve(kind) {
            client.validate(kind, &params)?;
        }

        let job_id = Uuid::new_v4().to_string();
        self.ledger
            .insert_job(
                ctx,
                &NewJob {
                    job_id: job_id.clone(),
                    device_id: device_id.map(str::to_string),
                    kind: kind.to_string(),
                    params,
                },
            )
            .await?;

        if let Err(error) = self
            .queue
            .enqueue(DispatchRequest {
                job_id: job_id.clone(),
                tenant: ctx.clone(),
                kind: kind.to_string(),
            })
            .await
        {
            // The row is durable; the startup sweep will re-deliver it.
            warn!(%job_id, %error, "enqueue failed, job stays queued");
        }

        info!(%job_id, "job accepted");
        Ok(job_id)
    }

    /// Fetch a job with its result, if terminal.
    pub async fn query(
        &self,
        ctx: &TenantContext,
        job_id: &str,
    ) -> Result<JobSnapshot, CoreError> {
        self.ledger
            .get_snapshot(ctx, job_id)
            .await?
            .ok_or_else(|| CoreError::NotFound {
                job_id: job_id.to_string(),
            })
    }

    /// List this tenant's jobs, newest first.
    pub async fn list(
        &self,
        ctx: &TenantContext,
        status: Option<JobStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<JobRecord>, CoreError> {
        self.ledger.list_jobs(ctx, status, limit, offset).await
    }

    /// Request cancellation of a job.
    ///
    /// Returns `true` if this call stopped the job, `false` if it was already
    /// terminal (including already cancelled); cancelling a finished job is a
    /// no-op, never an error.
    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id))]
    pub async fn cancel(
        &self,
        ctx: &TenantContext,
        job_id: &str,
        reason: &str,
    ) -> Result<bool, CoreError> {
        if self.ledger.get_job(ctx, job_id).await?.is_none() {
            return Err(CoreError::NotFound {
                job_id: job_id.to_string(),
            });
        }

        let cancelled = self.ledger.cancel_job(ctx, job_id, reason).await?;
        if cancelled {
            info!(%job_id, "job cancelled");
        }
        Ok(cancelled)
    }

    /// Subscribe to a job's progress events.
    pub async fn subscribe(
        &self,
        ctx: &TenantContext,
        job_id: &str,
    ) -> Result<mpsc::Receiver<JobEvent>, CoreError> {
        progress::subscribe(
            Arc::clone(&self.ledger),
            ctx.clone(),
            job_id.to_string(),
            self.stream_options.clone(),
        )
        .await
    }
}
