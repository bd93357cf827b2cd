// Copyright (C) 2026 Cpeops Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cpeops Core - Device Operation Job Engine
//!
//! This crate runs device-management operations (SNMP, WebPA, CWMP/TR-069,
//! USP/TR-369) as asynchronous jobs. Submissions are persisted to a job
//! ledger, executed by a pool of dispatch workers, and observable through a
//! poll-based progress stream. Every surface is tenant-scoped: callers only
//! ever see their own jobs.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Calling Layer                          │
//! │              (API handlers, admin tooling)                  │
//! └─────────────────────────────────────────────────────────────┘
//!                 │ submit / query / cancel / subscribe
//!                 ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       JobService                            │
//! │        validate → persist → enqueue │ read side             │
//! └─────────────────────────────────────────────────────────────┘
//!        │ DispatchRequest                     │
//!        ▼                                     ▼
//! ┌──────────────────┐              ┌─────────────────────┐
//! │  Dispatch Queue  │              │   Progress Stream   │
//! │  (in-process)    │              │   (ledger polling)  │
//! └────────┬─────────┘              └─────────────────────┘
//!          ▼                                   ▲
//! ┌──────────────────┐                         │
//! │   Worker Pool    │──── claim/finish ───────┤
//! │  (Dispatcher)    │                         │
//! └────────┬─────────┘              ┌──────────┴──────────┐
//!          │ execute                │     Job Ledger      │
//!          ▼                        │      (SQLite)       │
//! ┌──────────────────┐              └─────────────────────┘
//! │ Protocol Clients │
//! │ snmp/webpa/cwmp/ │
//! │ usp/echo         │
//! └──────────────────┘
//! ```
//!
//! # Job Status State Machine
//!
//! ```text
//!                   ┌────────┐
//!        ┌──────────│ QUEUED │──────────────┐
//!        │          └───┬────┘              │
//!        │              │ claim             │ no client
//!   cancel              ▼                   │ for kind
//!        │          ┌─────────┐             │
//!        │ ┌────────│ RUNNING │───────┐     │
//!        │ │        └────┬────┘       │     │
//!        │ │             │            │     │
//!        │ │cancel  complete      budget    │
//!        │ │             │       exceeded   │
//!        ▼ ▼             ▼            │     ▼
//!  ┌───────────┐  ┌───────────┐       │ ┌────────┐
//!  │ CANCELLED │  │ COMPLETED │       │ │ FAILED │
//!  └───────────┘  └───────────┘       │ └────────┘
//!                                     ▼
//!                               ┌─────────┐
//!                               │ TIMEOUT │
//!                               └─────────┘
//! ```
//!
//! A client failure during execution also lands in `FAILED`. Terminal states
//! never transition again, and a result row exists exactly when a job is
//! terminal.
//!
//! # Operation Kinds
//!
//! | Kind | Client | Description |
//! |------|--------|-------------|
//! | `snmp.get` / `snmp.set` / `snmp.bulk_walk` | SNMP (v2c/v3) | OID reads, writes, subtree walks |
//! | `webpa.get` / `webpa.set` | WebPA | Parameter reads/writes via the WebPA head-end |
//! | `cwmp.get` / `cwmp.set` | TR-069 ACS | Parameter reads/writes through the ACS REST facade |
//! | `usp.get` / `usp.set` / `usp.operate` | USP controller | Data-model reads, writes, commands |
//! | `echo.get` | loopback | Pipeline smoke test, no device involved |
//!
//! # Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `CPEOPS_DATABASE_URL` | Yes | - | SQLite connection string |
//! | `CPEOPS_WORKERS` | No | `4` | Dispatch worker count |
//! | `CPEOPS_JOB_TIMEOUT_MS` | No | `60000` | Per-job execution budget |
//! | `CPEOPS_CANCEL_POLL_MS` | No | `500` | Cancellation poll interval |
//! | `CPEOPS_STREAM_POLL_MS` | No | `500` | Progress stream poll interval |
//! | `CPEOPS_STREAM_MAX_WAIT_MS` | No | `60000` | Progress stream lifetime cap |
//!
//! # Modules
//!
//! - [`config`]: Configuration from environment variables
//! - [`error`]: Error types and the stored failure descriptor
//! - [`tenant`]: Explicit tenant context carried by every call
//! - [`ledger`]: Job ledger trait and SQLite implementation
//! - [`clients`]: Protocol client capability and registry
//! - [`queue`]: Submission-to-worker hand-off
//! - [`dispatch`]: Worker pool and guarded execution
//! - [`progress`]: Poll-based progress subscriptions
//! - [`service`]: Submission service facade

#![deny(missing_docs)]

/// Configuration loaded from environment variables.
pub mod config;

/// Error types for job operations and stored failure descriptors.
pub mod error;

/// Explicit tenant context carried by every operation.
pub mod tenant;

/// Job ledger trait and its SQLite implementation.
pub mod ledger;

/// Protocol clients (SNMP, WebPA, CWMP, USP, echo) and their registry.
pub mod clients;

/// Hand-off queue between submission and the dispatch workers.
pub mod queue;

/// Dispatch worker pool with claim, timeout and cancellation guards.
pub mod dispatch;

/// Poll-based progress subscriptions over the ledger.
pub mod progress;

/// Job submission service facade.
pub mod service;
