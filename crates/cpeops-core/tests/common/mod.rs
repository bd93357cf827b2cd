// Copyright (C) 2026 Cpeops Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared harness for end-to-end job engine tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::task::JoinHandle;

use cpeops_core::clients::{ClientFailure, ClientRegistry, OperationRequest, ProtocolClient};
use cpeops_core::config::Config;
use cpeops_core::dispatch::Dispatcher;
use cpeops_core::error::CoreError;
use cpeops_core::ledger::{JobLedger, JobSnapshot, SqliteLedger};
use cpeops_core::queue;
use cpeops_core::service::JobService;
use cpeops_core::tenant::TenantContext;

/// Test configuration with aggressive timings.
pub fn test_config() -> Config {
    Config {
        database_url: "sqlite::memory:".to_string(),
        workers: 2,
        job_timeout: Duration::from_millis(300),
        cancel_poll_interval: Duration::from_millis(10),
        stream_poll_interval: Duration::from_millis(10),
        stream_max_wait: Duration::from_millis(500),
    }
}

pub fn tenant(name: &str) -> TenantContext {
    TenantContext::new(name, "tester").unwrap()
}

/// A client that never answers; used to exercise timeouts and cancellation.
pub struct HangingClient;

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

/// A client that counts how many times it actually executed.
pub struct CountingClient {
    pub executions: Arc<AtomicUsize>,
}

#[async_trait]
impl ProtocolClient for CountingClient {
    fn supported_kinds(&self) -> &'static [&'static str] {
        &["count.get"]
    }

    fn validate(&self, _kind: &str, _params: &Value) -> Result<(), CoreError> {
        Ok(())
    }

    async fn execute(&self, _request: &OperationRequest) -> Result<Value, ClientFailure> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        Ok(serde_json::json!({"counted": true}))
    }
}

/// Running engine: service facade, backing ledger, live worker pool.
pub struct TestHarness {
    pub service: JobService,
    pub ledger: Arc<SqliteLedger>,
    pub dispatcher: Arc<Dispatcher>,
    workers: Vec<JoinHandle<()>>,
}

impl TestHarness {
    /// Harness with the default client set plus the hanging and counting test
    /// clients.
    pub async fn start() -> Self {
        Self::start_with(Arc::new(AtomicUsize::new(0))).await
    }

    /// Harness whose counting client shares the given execution counter.
    pub async fn start_with(executions: Arc<AtomicUsize>) -> Self {
        let config = test_config();
        let ledger = Arc::new(SqliteLedger::in_memory().await.unwrap());

        let mut registry = ClientRegistry::with_default_clients();
        registry.register(Arc::new(HangingClient));
        registry.register(Arc::new(CountingClient { executions }));
        let registry = Arc::new(registry);

        let (tx, rx) = queue::in_memory();
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&ledger) as Arc<dyn JobLedger>,
            Arc::clone(&registry),
            &config,
        ));
        let workers = dispatcher.spawn_workers(rx, config.workers);

        let service = JobService::new(
            Arc::clone(&ledger) as Arc<dyn JobLedger>,
            registry,
            Arc::new(tx),
            &config,
        );

        Self {
            service,
            ledger,
            dispatcher,
            workers,
        }
    }

    /// Poll until the job reaches a terminal state, panicking after 2 s.
    pub async fn wait_for_terminal(&self, ctx: &TenantContext, job_id: &str) -> JobSnapshot {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let snapshot = self.service.query(ctx, job_id).await.unwrap();
            if snapshot.job.status().is_some_and(|s| s.is_terminal()) {
                return snapshot;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!(
                    "job {} still '{}' after 2s",
                    job_id, snapshot.job.status
                );
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        for worker in self.workers.drain(..) {
            worker.abort();
        }
    }
}
