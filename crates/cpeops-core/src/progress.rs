// Copyright (C) 2026 Cpeops Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Poll-based progress subscriptions.
//!
//! A subscription re-reads the ledger at a fixed interval and forwards
//! observable changes as [`JobEvent`]s over a channel. Ordering comes from the
//! ledger itself: every event reflects a state the job actually passed
//! through, updates are deduplicated, and exactly one terminal event closes
//! the stream. A subscription never outlives its wall-clock cap; if the job
//! is still not terminal by then, an explicit [`JobEvent::LapsedWait`] is
//! emitted before the channel closes so the consumer can tell "gave up
//! waiting" apart from a dropped connection.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{CoreError, ErrorDescriptor};
use crate::ledger::{JobLedger, JobStatus};
use crate::tenant::TenantContext;

/// One observation delivered to a subscriber.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    /// The job moved to a new non-terminal state or progress value.
    Update {
        /// Current lifecycle state.
        status: JobStatus,
        /// Percent progress; zero unless the job is running.
        progress: u8,
    },
    /// The job reached a terminal state. Always the last event, sent at most
    /// once.
    Done {
        /// The terminal state.
        status: JobStatus,
        /// Success payload, for completed jobs.
        payload: Option<Value>,
        /// Failure descriptor, for everything else.
        error: Option<ErrorDescriptor>,
    },
    /// The subscription hit its wall-clock cap before the job finished.
    /// Always the last event when sent; re-subscribe to keep watching.
    LapsedWait {
        /// Last state observed before giving up.
        last_status: Option<JobStatus>,
    },
}

/// Polling cadence and lifetime of a subscription.
#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// Interval between ledger reads.
    pub poll_interval: Duration,
    /// Wall-clock cap on the whole subscription.
    pub max_wait: Duration,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            max_wait: Duration::from_secs(60),
        }
    }
}

/// Subscribe to a job's progress.
///
/// Fails with `NotFound` if the job does not exist under this tenant; after
/// that, the returned channel yields [`JobEvent`]s until a terminal or
/// lapsed-wait event closes it. Subscribing to an already-terminal job yields
/// exactly one `Done` event.
pub async fn subscribe(
    ledger: Arc<dyn JobLedger>,
    ctx: TenantContext,
    job_id: String,
    options: StreamOptions,
) -> Result<mpsc::Receiver<JobEvent>, CoreError> {
    if ledger.get_job(&ctx, &job_id).await?.is_none() {
        return Err(CoreError::NotFound { job_id });
    }

    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(observe(ledger, ctx, job_id, options, tx));
    Ok(rx)
}

async fn observe(
    ledger: Arc<dyn JobLedger>,
    ctx: TenantContext,
    job_id: String,
    options: StreamOptions,
    tx: mpsc::Sender<JobEvent>,
) {
    let deadline = Instant::now() + options.max_wait;
    let mut last_sent: Option<(JobStatus, u8)> = None;

    loop {
        let snapshot = match ledger.get_snapshot(&ctx, &job_id).await {
            Ok(snapshot) => snapshot,
            Err(error) => {
                warn!(%job_id, %error, "progress poll failed, closing subscription");
                return;
            }
        };

        let Some(snapshot) = snapshot else {
            // Row gone mid-subscription (retention sweep); nothing more to
            // observe.
            debug!(%job_id, "job disappeared, closing subscription");
            let _ = tx
                .send(JobEvent::LapsedWait {
                    last_status: last_sent.map(|(status, _)| status),
                })
                .await;
            return;
        };

        let Some(status) = snapshot.job.status() else {
            warn!(%job_id, status = %snapshot.job.status, "unknown status in ledger, closing subscription");
            return;
        };

        if status.is_terminal() {
            let result = snapshot.result;
            let _ = tx
                .send(JobEvent::Done {
                    status,
                    payload: result.as_ref().and_then(|r| r.payload_json()),
                    error: result.as_ref().and_then(|r| r.error()),
                })
                .await;
            return;
        }

        let progress = if status == JobStatus::Running {
            snapshot.job.progress.clamp(0, 100) as u8
        } else {
            0
        };

        if last_sent != Some((status, progress)) {
            if tx.send(JobEvent::Update { status, progress }).await.is_err() {
                // Subscriber hung up.
                return;
            }
            last_sent = Some((status, progress));
        }

        if Instant::now() >= deadline {
            let _ = tx
                .send(JobEvent::LapsedWait {
                    last_status: last_sent.map(|(status, _)| status),
                })
                .await;
            return;
        }

        tokio::time::sleep(options.poll_interval).await;
    }
}
