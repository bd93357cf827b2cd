// Copyright (C) 2026 Cpeops Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cpeops Core - Device Operation Job Engine
//!
//! The worker daemon: opens the job ledger, re-enqueues jobs that were still
//! queued when the previous process stopped, and runs the dispatch worker
//! pool until Ctrl-C.

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};

use cpeops_core::clients::ClientRegistry;
use cpeops_core::config::Config;
use cpeops_core::dispatch::Dispatcher;
use cpeops_core::ledger::{JobLedger, SqliteLedger};
use cpeops_core::queue::{self, DispatchRequest, JobQueue};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("cpeops_core=info".parse().unwrap()),
        )
        .init();

    info!("Starting Cpeops Core");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    info!(
        workers = config.workers,
        job_timeout_ms = config.job_timeout.as_millis() as u64,
        "Configuration loaded"
    );

    // Open the ledger (creates the database file and runs migrations)
    let database_path = config
        .database_url
        .trim_start_matches("sqlite:")
        .trim_end_matches("?mode=rwc")
        .to_string();
    let ledger = Arc::new(SqliteLedger::from_path(&database_path).await?);
    ledger.health_check().await?;
    info!(database = %database_path, "Job ledger opened");

    let registry = Arc::new(ClientRegistry::with_default_clients());
    info!(kinds = ?registry.kinds(), "Protocol clients registered");

    let (tx, rx) = queue::in_memory();
    let dispatcher = Arc::new(Dispatcher::new(
        ledger.clone() as Arc<dyn JobLedger>,
        registry,
        &config,
    ));
    let workers = dispatcher.spawn_workers(rx, config.workers);
    info!(count = workers.len(), "Dispatch workers started");

    // Re-enqueue jobs that were accepted before the last shutdown and never
    // picked up.
    let stranded = ledger.list_queued(10_000).await?;
    if !stranded.is_empty() {
        info!(count = stranded.len(), "Re-enqueueing stranded jobs");
        for job in stranded {
            let tenant = match cpeops_core::tenant::TenantContext::new(
                job.tenant_id.clone(),
                job.requested_by.clone(),
            ) {
                Ok(tenant) => tenant,
                Err(e) => {
                    error!(job_id = %job.job_id, "Skipping job with invalid tenant context: {}", e);
                    continue;
                }
            };
            let request = DispatchRequest {
                job_id: job.job_id.clone(),
                tenant,
                kind: job.kind.clone(),
            };
            if let Err(e) = tx.enqueue(request).await {
                error!(job_id = %job.job_id, "Failed to re-enqueue job: {}", e);
            }
        }
    }

    info!("Cpeops Core initialized successfully");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    drop(tx);
    for worker in workers {
        worker.abort();
    }

    info!("Shutdown complete");

    Ok(())
}
