// Copyright (C) 2026 Cpeops Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! End-to-end progress stream tests against the live worker pool.

mod common;

use common::*;
use serde_json::json;

use cpeops_core::ledger::{JobLedger, JobStatus, NewJob};
use cpeops_core::progress::JobEvent;

/// Collect every event until the stream closes.
async fn drain(mut rx: tokio::sync::mpsc::Receiver<JobEvent>) -> Vec<JobEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_stream_follows_job_to_completion() {
    let harness = TestHarness::start().await;
    let ctx = tenant("acme");

    let job_id = harness
        .service
        .submit(&ctx, "echo.get", None, json!({"path": "Device."}))
        .await
        .unwrap();

    let rx = harness.service.subscribe(&ctx, &job_id).await.unwrap();
    let events = drain(rx).await;

    assert!(!events.is_empty());

    // Exactly one terminal event, and it is the last one.
    let terminal: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, JobEvent::Done { .. }))
        .collect();
    assert_eq!(terminal.len(), 1);
    match events.last().unwrap() {
        JobEvent::Done {
            status, payload, ..
        } => {
            assert_eq!(*status, JobStatus::Completed);
            assert_eq!(payload.as_ref().unwrap()["value"], "Device.");
        }
        other => panic!("expected Done last, got {other:?}"),
    }

    // Every preceding event reflects a real pre-terminal state, in order.
    for event in &events[..events.len() - 1] {
        match event {
            JobEvent::Update { status, .. } => {
                assert!(matches!(status, JobStatus::Queued | JobStatus::Running));
            }
            other => panic!("unexpected event before Done: {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_stream_never_repeats_unchanged_state() {
    let harness = TestHarness::start().await;
    let ctx = tenant("acme");

    let job_id = harness
        .service
        .submit(&ctx, "echo.get", None, json!({"path": "Device."}))
        .await
        .unwrap();

    let rx = harness.service.subscribe(&ctx, &job_id).await.unwrap();
    let events = drain(rx).await;

    let updates: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            JobEvent::Update { status, progress } => Some((*status, *progress)),
            _ => None,
        })
        .collect();

    let mut deduped = updates.clone();
    deduped.dedup();
    assert_eq!(updates, deduped, "adjacent duplicate updates emitted");
}

#[tokio::test]
async fn test_stream_reports_cancellation() {
    let harness = TestHarness::start().await;
    let ctx = tenant("acme");

    let job_id = harness
        .service
        .submit(&ctx, "hang.get", None, json!({}))
        .await
        .unwrap();

    let mut rx = harness.service.subscribe(&ctx, &job_id).await.unwrap();

    // First observation is a live state, not a fabricated one.
    match rx.recv().await.unwrap() {
        JobEvent::Update { status, .. } => {
            assert!(matches!(status, JobStatus::Queued | JobStatus::Running));
        }
        other => panic!("expected Update first, got {other:?}"),
    }

    harness
        .service
        .cancel(&ctx, &job_id, "operator request")
        .await
        .unwrap();

    let mut last = None;
    while let Some(event) = rx.recv().await {
        last = Some(event);
    }
    match last.expect("stream closed without a terminal event") {
        JobEvent::Done { status, error, .. } => {
            assert_eq!(status, JobStatus::Cancelled);
            assert_eq!(error.unwrap().kind, "cancelled");
        }
        other => panic!("expected Done, got {other:?}"),
    }
}

#[tokio::test]
async fn test_stream_lapses_on_stuck_job() {
    let harness = TestHarness::start().await;
    let ctx = tenant("acme");

    // Insert directly so no worker ever touches it; the job stays queued
    // longer than the stream's 500ms cap.
    harness
        .ledger
        .insert_job(
            &ctx,
            &NewJob {
                job_id: "stuck".to_string(),
                device_id: None,
                kind: "echo.get".to_string(),
                params: json!({"path": "Device."}),
            },
        )
        .await
        .unwrap();

    let rx = harness.service.subscribe(&ctx, "stuck").await.unwrap();
    let events = drain(rx).await;

    match events.last().unwrap() {
        JobEvent::LapsedWait { last_status } => {
            assert_eq!(*last_status, Some(JobStatus::Queued));
        }
        other => panic!("expected LapsedWait last, got {other:?}"),
    }
    assert!(
        !events
            .iter()
            .any(|e| matches!(e, JobEvent::Done { .. }))
    );
}

#[tokio::test]
async fn test_subscribing_to_finished_job_yields_single_done() {
    let harness = TestHarness::start().await;
    let ctx = tenant("acme");

    let job_id = harness
        .service
        .submit(&ctx, "echo.get", None, json!({"path": "Device."}))
        .await
        .unwrap();
    harness.wait_for_terminal(&ctx, &job_id).await;

    let rx = harness.service.subscribe(&ctx, &job_id).await.unwrap();
    let events = drain(rx).await;

    assert_eq!(events.len(), 1);
    assert!(matches!(
        events[0],
        JobEvent::Done {
            status: JobStatus::Completed,
            ..
        }
    ));
}
