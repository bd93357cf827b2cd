// Copyright (C) 2026 Cpeops Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Hand-off between submission and the dispatch workers.
//!
//! The queue is a delivery hint, not the source of truth: the ledger row is.
//! A lost or duplicated queue message is recovered by the startup sweep and
//! the dispatcher's claim guard respectively.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::CoreError;
use crate::tenant::TenantContext;

/// Pointer to a queued job, carried from submission to a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchRequest {
    /// The job to execute.
    pub job_id: String,
    /// Context the job was submitted under; workers execute inside it.
    pub tenant: TenantContext,
    /// Operation kind, for routing and logging.
    pub kind: String,
}

/// Producer side of the dispatch queue.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Hand a job to the workers.
    async fn enqueue(&self, request: DispatchRequest) -> Result<(), CoreError>;
}

/// In-process FIFO queue over an unbounded channel.
#[derive(Clone)]
pub struct InMemoryQueue {
    tx: mpsc::UnboundedSender<DispatchRequest>,
}

/// Consumer side handed to the worker pool.
pub struct JobReceiver {
    rx: mpsc::UnboundedReceiver<DispatchRequest>,
}

/// Create a connected queue/receiver pair.
pub fn in_memory() -> (InMemoryQueue, JobReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (InMemoryQueue { tx }, JobReceiver { rx })
}

#[async_trait]
impl JobQueue for InMemoryQueue {
    async fn enqueue(&self, request: DispatchRequest) -> Result<(), CoreError> {
        let job_id = request.job_id.clone();
        self.tx
            .send(request)
            .map_err(|_| CoreError::DispatchFailed {
                job_id,
                details: "dispatch queue is closed".to_string(),
            })
    }
}

impl JobReceiver {
    /// Receive the next job; `None` once all producers are gone.
    pub async fn recv(&mut self) -> Option<DispatchRequest> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(job_id: &str) -> DispatchRequest {
        DispatchRequest {
            job_id: job_id.to_string(),
            tenant: TenantContext::new("acme", "alice").unwrap(),
            kind: "echo.get".to_string(),
        }
    }

    #[tokio::test]
    async fn test_fifo_delivery() {
        let (queue, mut receiver) = in_memory();

        queue.enqueue(request("j-1")).await.unwrap();
        queue.enqueue(request("j-2")).await.unwrap();

        assert_eq!(receiver.recv().await.unwrap().job_id, "j-1");
        assert_eq!(receiver.recv().await.unwrap().job_id, "j-2");
    }

    #[tokio::test]
    async fn test_enqueue_after_receiver_dropped() {
        let (queue, receiver) = in_memory();
        drop(receiver);

        let err = queue.enqueue(request("j-1")).await.unwrap_err();
        assert_eq!(err.error_code(), "DISPATCH_FAILED");
    }

    #[tokio::test]
    async fn test_recv_none_after_producers_dropped() {
        let (queue, mut receiver) = in_memory();
        queue.enqueue(request("j-1")).await.unwrap();
        drop(queue);

        assert!(receiver.recv().await.is_some());
        assert!(receiver.recv().await.is_none());
    }
}
