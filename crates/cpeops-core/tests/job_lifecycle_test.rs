// Copyright (C) 2026 Cpeops Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! End-to-end lifecycle tests: submit through the service, execute through
//! the live worker pool, observe through the query surface.

mod common;

use common::*;
use serde_json::json;

use cpeops_core::ledger::JobStatus;

#[tokio::test]
async fn test_echo_job_runs_to_completion() {
    let harness = TestHarness::start().await;
    let ctx = tenant("acme");

    let job_id = harness
        .service
        .submit(&ctx, "echo.get", None, json!({"path": "Device.DeviceInfo."}))
        .await
        .unwrap();

    let snapshot = harness.wait_for_terminal(&ctx, &job_id).await;
    assert_eq!(snapshot.job.status(), Some(JobStatus::Completed));

    let result = snapshot.result.expect("terminal job must have a result");
    assert_eq!(result.payload_json().unwrap()["value"], "Device.DeviceInfo.");
    assert!(result.error().is_none());
}

#[tokio::test]
async fn test_unknown_kind_fails_closed() {
    let harness = TestHarness::start().await;
    let ctx = tenant("acme");

    let job_id = harness
        .service
        .submit(&ctx, "unknown.op", None, json!({}))
        .await
        .unwrap();

    let snapshot = harness.wait_for_terminal(&ctx, &job_id).await;
    assert_eq!(snapshot.job.status(), Some(JobStatus::Failed));

    let error = snapshot.result.unwrap().error().unwrap();
    assert_eq!(error.kind, "unsupported");
    assert!(error.message.contains("unknown.op"));
}

#[tokio::test]
async fn test_hanging_job_times_out() {
    let harness = TestHarness::start().await;
    let ctx = tenant("acme");

    let job_id = harness
        .service
        .submit(&ctx, "hang.get", None, json!({}))
        .await
        .unwrap();

    let snapshot = harness.wait_for_terminal(&ctx, &job_id).await;
    assert_eq!(snapshot.job.status(), Some(JobStatus::TimedOut));
    assert_eq!(snapshot.result.unwrap().error().unwrap().kind, "timeout");
}

#[tokio::test]
async fn test_malformed_submission_is_rejected_idempotently() {
    let harness = TestHarness::start().await;
    let ctx = tenant("acme");

    for _ in 0..2 {
        let err = harness
            .service
            .submit(&ctx, "snmp.get", None, json!({"host": "10.0.0.1"}))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
    }

    assert!(
        harness
            .service
            .list(&ctx, None, 10, 0)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_list_filters_by_status() {
    let harness = TestHarness::start().await;
    let ctx = tenant("acme");

    let done = harness
        .service
        .submit(&ctx, "echo.get", None, json!({"path": "Device."}))
        .await
        .unwrap();
    harness.wait_for_terminal(&ctx, &done).await;

    let hung = harness
        .service
        .submit(&ctx, "hang.get", None, json!({}))
        .await
        .unwrap();

    let completed = harness
        .service
        .list(&ctx, Some(JobStatus::Completed), 10, 0)
        .await
        .unwrap();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].job_id, done);

    let all = harness.service.list(&ctx, None, 10, 0).await.unwrap();
    assert_eq!(all.len(), 2);

    // The hung job eventually times out rather than lingering.
    let snapshot = harness.wait_for_terminal(&ctx, &hung).await;
    assert_eq!(snapshot.job.status(), Some(JobStatus::TimedOut));
}

#[tokio::test]
async fn test_cross_tenant_invisibility() {
    let harness = TestHarness::start().await;
    let acme = tenant("acme");
    let globex = tenant("globex");

    let job_id = harness
        .service
        .submit(&acme, "echo.get", None, json!({"path": "Device."}))
        .await
        .unwrap();

    let err = harness.service.query(&globex, &job_id).await.unwrap_err();
    assert_eq!(err.error_code(), "NOT_FOUND");

    let err = harness
        .service
        .cancel(&globex, &job_id, "not mine")
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "NOT_FOUND");

    let err = harness.service.subscribe(&globex, &job_id).await.unwrap_err();
    assert_eq!(err.error_code(), "NOT_FOUND");

    assert!(
        harness
            .service
            .list(&globex, None, 10, 0)
            .await
            .unwrap()
            .is_empty()
    );

    // The owner still sees the job and its eventual result.
    let snapshot = harness.wait_for_terminal(&acme, &job_id).await;
    assert_eq!(snapshot.job.status(), Some(JobStatus::Completed));
}

#[tokio::test]
async fn test_result_exists_iff_terminal() {
    let harness = TestHarness::start().await;
    let ctx = tenant("acme");

    let job_id = harness
        .service
        .submit(&ctx, "hang.get", None, json!({}))
        .await
        .unwrap();

    // While queued or running there is no result row.
    let snapshot = harness.service.query(&ctx, &job_id).await.unwrap();
    assert!(!snapshot.job.status().unwrap().is_terminal());
    assert!(snapshot.result.is_none());

    let snapshot = harness.wait_for_terminal(&ctx, &job_id).await;
    assert!(snapshot.result.is_some());
}
