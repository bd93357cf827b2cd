// Copyright (C) 2026 Cpeops Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Dispatch worker pool.
//!
//! Workers pull [`DispatchRequest`]s off the queue and drive each job through
//! its lifecycle: claim, execute via the protocol client, record the outcome.
//! The claim is an atomic conditional update, so a duplicated queue message or
//! a second worker racing for the same job loses cleanly. A running client
//! call is raced against the execution budget and a periodic cancellation
//! check; whichever fires first decides the terminal state, and the ledger's
//! `running`-only finish guard drops any late writes from the losers.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::clients::{ClientRegistry, OperationRequest, ProtocolClient};
use crate::config::Config;
use crate::error::{CoreError, ErrorDescriptor};
use crate::ledger::{JobLedger, JobRecord, JobStatus};
use crate::queue::{DispatchRequest, JobReceiver};
use crate::tenant::TenantContext;

/// Outcome of one guarded client execution.
enum ExecOutcome {
    Completed(serde_json::Value),
    Failed(ErrorDescriptor),
    TimedOut,
    Cancelled,
}

/// Executes jobs pulled from the dispatch queue.
pub struct Dispatcher {
    ledger: Arc<dyn JobLedger>,
    registry: Arc<ClientRegistry>,
    job_timeout: Duration,
    cancel_poll_interval: Duration,
}

impl Dispatcher {
    /// Create a dispatcher over the given ledger and client registry.
    pub fn new(ledger: Arc<dyn JobLedger>, registry: Arc<ClientRegistry>, config: &Config) -> Self {
        Self {
            ledger,
            registry,
            job_timeout: config.job_timeout,
            cancel_poll_interval: config.cancel_poll_interval,
        }
    }

    /// Spawn `count` workers sharing one queue receiver.
    ///
    /// Workers exit when the queue closes; a failed job never takes its
    /// worker down with it.
    pub fn spawn_workers(
        self: &Arc<Self>,
        receiver: JobReceiver,
        count: usize,
    ) -> Vec<JoinHandle<()>> {
        let receiver = Arc::new(Mutex::new(receiver));

        (0..count)
            .map(|worker| {
                let dispatcher = Arc::clone(self);
                let receiver = Arc::clone(&receiver);
                tokio::spawn(async move {
                    debug!(worker, "dispatch worker started");
                    loop {
                        let request = { receiver.lock().await.recv().await };
                        let Some(request) = request else {
                            debug!(worker, "dispatch queue closed, worker exiting");
                            break;
                        };
                        if let Err(error) = dispatcher.process(&request).await {
                            warn!(
                                worker,
                                job_id = %request.job_id,
                                %error,
                                "job processing failed"
                            );
                        }
                    }
                })
            })
            .collect()
    }

    /// Drive a single job from `queued` to a terminal state.
    ///
    /// Idempotent with respect to duplicate deliveries: anything that is not
    /// claimable is left alone.
    #[instrument(skip(self, request), fields(job_id = %request.job_id, tenant_id = %request.tenant.tenant_id))]
    pub async fn process(&self, request: &DispatchRequest) -> Result<(), CoreError> {
        let ctx = &request.tenant;

        let Some(job) = self.ledger.get_job(ctx, &request.job_id).await? else {
            warn!("queued job not found in ledger, dropping");
            return Ok(());
        };
        if job.status() != Some(JobStatus::Queued) {
            debug!(status = %job.status, "job already picked up, skipping");
            return Ok(());
        }

        // Fail closed before claiming: a job nobody can execute must never
        // reach `running`.
        let Some(client) = self.registry.resolve(&job.kind) else {
            let error = ErrorDescriptor::new(
                "unsupported",
                format!("no protocol client registered for '{}'", job.kind),
            );
            if self.ledger.fail_queued(ctx, &job.job_id, &error).await? {
                info!(kind = %job.kind, "job failed: unsupported operation kind");
            }
            return Ok(());
        };

        if !self.ledger.claim_job(ctx, &job.job_id).await? {
            debug!("claim lost, another worker owns this job");
            return Ok(());
        }

        // Cancellation may have landed between submission and the claim.
        if self.ledger.is_cancelled(ctx, &job.job_id).await? {
            debug!("job cancelled before execution");
            return Ok(());
        }

        let outcome = self.execute_with_guards(ctx, &job, client).await?;

        let recorded = match outcome {
            ExecOutcome::Completed(payload) => {
                self.ledger
                    .finish_job(ctx, &job.job_id, JobStatus::Completed, Some(&payload), None)
                    .await?
            }
            ExecOutcome::Failed(error) => {
                info!(kind = %error.kind, "job failed");
                self.ledger
                    .finish_job(ctx, &job.job_id, JobStatus::Failed, None, Some(&error))
                    .await?
            }
            ExecOutcome::TimedOut => {
                let error = ErrorDescriptor::new(
                    "timeout",
                    format!(
                        "job exceeded its {}ms execution budget",
                        self.job_timeout.as_millis()
                    ),
                );
                info!("job killed after exceeding its execution budget");
                self.ledger
                    .finish_job(ctx, &job.job_id, JobStatus::TimedOut, None, Some(&error))
                    .await?
            }
            ExecOutcome::Cancelled => {
                // The cancel request already flipped the status and wrote the
                // cancellation result in one transaction.
                info!("job aborted on cancellation request");
                return Ok(());
            }
        };

        if !recorded {
            debug!("terminal state already recorded, dropping late result");
        }
        Ok(())
    }

    /// Run the client call raced against the execution budget and the
    /// cancellation poll. The client future runs on its own task so a hung or
    /// panicking client cannot wedge the worker.
    async fn execute_with_guards(
        &self,
        ctx: &TenantContext,
        job: &JobRecord,
        client: Arc<dyn ProtocolClient>,
    ) -> Result<ExecOutcome, CoreError> {
        let request = OperationRequest {
            kind: job.kind.clone(),
            device_id: job.device_id.clone(),
            params: job.params_json(),
        };
        let mut handle = tokio::spawn(async move { client.execute(&request).await });

        let started = tokio::time::Instant::now();
        let deadline = tokio::time::sleep(self.job_timeout);
        tokio::pin!(deadline);
        let mut cancel_poll = tokio::time::interval(self.cancel_poll_interval);

        loop {
            tokio::select! {
                joined = &mut handle => {
                    return Ok(match joined {
                        Ok(Ok(payload)) => ExecOutcome::Completed(payload),
                        Ok(Err(failure)) => ExecOutcome::Failed(failure.descriptor()),
                        Err(join_error) => {
                            if join_error.is_panic() {
                                warn!("protocol client panicked during execution");
                            }
                            ExecOutcome::Failed(ErrorDescriptor::new(
                                "unexpected",
                                "protocol client crashed while executing the job",
                            ))
                        }
                    });
                }
                _ = &mut deadline => {
                    handle.abort();
                    return Ok(ExecOutcome::TimedOut);
                }
                _ = cancel_poll.tick() => {
                    if self.ledger.is_cancelled(ctx, &job.job_id).await? {
                        handle.abort();
                        return Ok(ExecOutcome::Cancelled);
                    }
                    // Clients report no progress of their own, so progress
                    // tracks the consumed share of the execution budget,
                    // capped short of done.
                    let elapsed = started.elapsed().as_millis() as f64;
                    let budget = self.job_timeout.as_millis().max(1) as f64;
                    let percent = ((elapsed / budget) * 100.0).min(95.0) as u8;
                    if percent > 0 {
                        self.ledger.record_progress(ctx, &job.job_id, percent).await?;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{Value, json};

    use crate::clients::ClientFailure;
    use crate::ledger::{NewJob, SqliteLedger};

    fn test_config() -> Config {
        Config {
            database_url: "sqlite::memory:".to_string(),
            workers: 1,
            job_timeout: Duration::from_millis(200),
            cancel_poll_interval: Duration::from_millis(10),
            stream_poll_interval: Duration::from_millis(10),
            stream_max_wait: Duration::from_secs(5),
        }
    }

    fn ctx() -> TenantContext {
        TenantContext::new("acme", "alice").unwrap()
    }

    fn request(job_id: &str, kind: &str) -> DispatchRequest {
        DispatchRequest {
            job_id: job_id.to_string(),
            tenant: ctx(),
            kind: kind.to_string(),
        }
    }

    async fn insert(ledger: &SqliteLedger, job_id: &str, kind: &str, params: Value) {
        ledger
            .insert_job(
                &ctx(),
                &NewJob {
                    job_id: job_id.to_string(),
                    device_id: None,
                    kind: kind.to_string(),
                    params,
                },
            )
            .await
            .unwrap();
    }

    struct HangingClient;

    #[async_trait]
    impl ProtocolClient for HangingClient {
        fn supported_kinds(&self) -> &'static [&'static str] {
            &["hang.get"]
        }

        fn validate(&self, _kind: &str, _params: &Value) -> Result<(), CoreError> {
            Ok(())
        }

        async fn execute(&self, _request: &OperationRequest) -> Result<Value, ClientFailure> {
            futures::future::pending().await
        }
    }

    struct PanickingClient;

    #[async_trait]
    impl ProtocolClient for PanickingClient {
        fn supported_kinds(&self) -> &'static [&'static str] {
            &["panic.get"]
        }

        fn validate(&self, _kind: &str, _params: &Value) -> Result<(), CoreError> {
            Ok(())
        }

        async fn execute(&self, _request: &OperationRequest) -> Result<Value, ClientFailure> {
            panic!("client bug");
        }
    }

    fn dispatcher_with(ledger: &SqliteLedger, registry: ClientRegistry) -> Dispatcher {
        Dispatcher::new(
            Arc::new(ledger.clone()),
            Arc::new(registry),
            &test_config(),
        )
    }

    #[tokio::test]
    async fn test_echo_job_completes() {
        let ledger = SqliteLedger::in_memory().await.unwrap();
        insert(&ledger, "j-1", "echo.get", json!({"path": "Device.DeviceInfo."})).await;

        let dispatcher = dispatcher_with(&ledger, ClientRegistry::with_default_clients());
        dispatcher.process(&request("j-1", "echo.get")).await.unwrap();

        let snap = ledger.get_snapshot(&ctx(), "j-1").await.unwrap().unwrap();
        assert_eq!(snap.job.status(), Some(JobStatus::Completed));
        let result = snap.result.unwrap();
        assert_eq!(result.payload_json().unwrap()["value"], "Device.DeviceInfo.");
        assert!(result.error().is_none());
    }

    #[tokio::test]
    async fn test_unknown_kind_fails_without_running() {
        let ledger = SqliteLedger::in_memory().await.unwrap();
        insert(&ledger, "j-1", "unknown.op", json!({})).await;

        let dispatcher = dispatcher_with(&ledger, ClientRegistry::with_default_clients());
        dispatcher.process(&request("j-1", "unknown.op")).await.unwrap();

        let snap = ledger.get_snapshot(&ctx(), "j-1").await.unwrap().unwrap();
        assert_eq!(snap.job.status(), Some(JobStatus::Failed));
        assert_eq!(snap.result.unwrap().error().unwrap().kind, "unsupported");
    }

    #[tokio::test]
    async fn test_duplicate_delivery_is_noop() {
        let ledger = SqliteLedger::in_memory().await.unwrap();
        insert(&ledger, "j-1", "echo.get", json!({"path": "Device."})).await;

        let dispatcher = dispatcher_with(&ledger, ClientRegistry::with_default_clients());
        dispatcher.process(&request("j-1", "echo.get")).await.unwrap();
        dispatcher.process(&request("j-1", "echo.get")).await.unwrap();

        let snap = ledger.get_snapshot(&ctx(), "j-1").await.unwrap().unwrap();
        assert_eq!(snap.job.status(), Some(JobStatus::Completed));
    }

    #[tokio::test]
    async fn test_hanging_client_times_out() {
        let ledger = SqliteLedger::in_memory().await.unwrap();
        insert(&ledger, "j-1", "hang.get", json!({})).await;

        let mut registry = ClientRegistry::new();
        registry.register(Arc::new(HangingClient));
        let dispatcher = dispatcher_with(&ledger, registry);

        dispatcher.process(&request("j-1", "hang.get")).await.unwrap();

        let snap = ledger.get_snapshot(&ctx(), "j-1").await.unwrap().unwrap();
        assert_eq!(snap.job.status(), Some(JobStatus::TimedOut));
        assert_eq!(snap.result.unwrap().error().unwrap().kind, "timeout");
    }

    #[tokio::test]
    async fn test_cancellation_aborts_running_job() {
        let ledger = SqliteLedger::in_memory().await.unwrap();
        insert(&ledger, "j-1", "hang.get", json!({})).await;

        let mut registry = ClientRegistry::new();
        registry.register(Arc::new(HangingClient));
        let dispatcher = Arc::new(dispatcher_with(&ledger, registry));

        let worker = {
            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move { dispatcher.process(&request("j-1", "hang.get")).await })
        };

        // Let the worker claim the job, then cancel it out from under it.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(ledger.cancel_job(&ctx(), "j-1", "operator request").await.unwrap());

        worker.await.unwrap().unwrap();

        let snap = ledger.get_snapshot(&ctx(), "j-1").await.unwrap().unwrap();
        assert_eq!(snap.job.status(), Some(JobStatus::Cancelled));
        assert_eq!(snap.result.unwrap().error().unwrap().kind, "cancelled");
    }

    #[tokio::test]
    async fn test_progress_advances_while_running() {
        let ledger = SqliteLedger::in_memory().await.unwrap();
        insert(&ledger, "j-1", "hang.get", json!({})).await;

        let mut registry = ClientRegistry::new();
        registry.register(Arc::new(HangingClient));
        let dispatcher = Arc::new(dispatcher_with(&ledger, registry));

        let worker = {
            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move { dispatcher.process(&request("j-1", "hang.get")).await })
        };

        // Halfway into the 200ms budget the observed progress is off zero
        // but not yet complete.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let job = ledger.get_job(&ctx(), "j-1").await.unwrap().unwrap();
        assert_eq!(job.status(), Some(JobStatus::Running));
        assert!(job.progress > 0, "progress stuck at {}", job.progress);
        assert!(job.progress < 100);

        ledger.cancel_job(&ctx(), "j-1", "done watching").await.unwrap();
        worker.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_panicking_client_records_unexpected() {
        let ledger = SqliteLedger::in_memory().await.unwrap();
        insert(&ledger, "j-1", "panic.get", json!({})).await;

        let mut registry = ClientRegistry::new();
        registry.register(Arc::new(PanickingClient));
        let dispatcher = dispatcher_with(&ledger, registry);

        dispatcher.process(&request("j-1", "panic.get")).await.unwrap();

        let snap = ledger.get_snapshot(&ctx(), "j-1").await.unwrap().unwrap();
        assert_eq!(snap.job.status(), Some(JobStatus::Failed));
        let error = snap.result.unwrap().error().unwrap();
        assert_eq!(error.kind, "unexpected");
        // Internal panic details never leak into the stored result.
        assert!(!error.message.contains("client bug"));
    }

    #[tokio::test]
    async fn test_cancelled_before_claim_stays_cancelled() {
        let ledger = SqliteLedger::in_memory().await.unwrap();
        insert(&ledger, "j-1", "echo.get", json!({"path": "Device."})).await;

        assert!(ledger.cancel_job(&ctx(), "j-1", "changed my mind").await.unwrap());

        let dispatcher = dispatcher_with(&ledger, ClientRegistry::with_default_clients());
        dispatcher.process(&request("j-1", "echo.get")).await.unwrap();

        let snap = ledger.get_snapshot(&ctx(), "j-1").await.unwrap().unwrap();
        assert_eq!(snap.job.status(), Some(JobStatus::Cancelled));
        assert_eq!(snap.result.unwrap().error().unwrap().kind, "cancelled");
    }
}
