// Copyright (C) 2026 Cpeops Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Protocol client capability.
//!
//! Each client family (SNMP, WebPA, CWMP, USP, plus the loopback echo client)
//! implements [`ProtocolClient`] for a fixed set of operation kinds. The
//! dispatcher resolves a client by kind string through the [`ClientRegistry`];
//! a kind with no registered client fails closed instead of silently
//! no-opping.
//!
//! The shipped clients are simulated transports: they validate parameters and
//! credentials, honor their configured timeout/retry budgets and answer with
//! canned values shaped like the real device responses.
//!
//! TODO: replace the simulated transports with gateway-backed clients once the
//! device gateway service ships.

pub mod cwmp;
pub mod echo;
pub mod snmp;
pub mod usp;
pub mod webpa;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{CoreError, ErrorDescriptor};

pub use cwmp::CwmpClient;
pub use echo::EchoClient;
pub use snmp::SnmpClient;
pub use usp::UspClient;
pub use webpa::WebpaClient;

/// A single operation handed to a protocol client.
#[derive(Debug, Clone)]
pub struct OperationRequest {
    /// Operation kind, e.g. `snmp.get`.
    pub kind: String,
    /// Target device, if the operation addresses one.
    pub device_id: Option<String>,
    /// Parameters as validated at submission time.
    pub params: Value,
}

/// Failure of a protocol operation, mapped to a stable kind code when stored.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientFailure {
    /// The device did not answer within the client's own budget.
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// The device or head-end rejected the client's credentials.
    #[error("authentication failed: {0}")]
    AuthenticationFailure(String),

    /// The transport answered, but with a protocol-level fault.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The client cannot perform this operation as requested.
    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

impl ClientFailure {
    /// Stable code stored in `job_results.error_kind`.
    pub fn kind_code(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::AuthenticationFailure(_) => "auth",
            Self::Protocol(_) => "protocol",
            Self::Unsupported(_) => "unsupported",
        }
    }

    /// Convert into the descriptor form stored with the job result.
    pub fn descriptor(&self) -> ErrorDescriptor {
        let message = match self {
            Self::Timeout(m)
            | Self::AuthenticationFailure(m)
            | Self::Protocol(m)
            | Self::Unsupported(m) => m.clone(),
        };
        ErrorDescriptor::new(self.kind_code(), message)
    }
}

/// A client capable of executing one family of device operations.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    /// Operation kinds this client handles.
    fn supported_kinds(&self) -> &'static [&'static str];

    /// Validate submission-time parameters for one of this client's kinds.
    ///
    /// Called synchronously before a job row exists; rejections surface as
    /// validation errors to the submitter.
    fn validate(&self, kind: &str, params: &Value) -> Result<(), CoreError>;

    /// Execute the operation against the device.
    async fn execute(&self, request: &OperationRequest) -> Result<Value, ClientFailure>;
}

/// Maps operation kind strings to their protocol client.
#[derive(Clone, Default)]
pub struct ClientRegistry {
    clients: HashMap<&'static str, Arc<dyn ProtocolClient>>,
}

impl ClientRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client under every kind it supports.
    pub fn register(&mut self, client: Arc<dyn ProtocolClient>) {
        for kind in client.supported_kinds() {
            self.clients.insert(kind, client.clone());
        }
    }

    /// Look up the client for an operation kind.
    pub fn resolve(&self, kind: &str) -> Option<Arc<dyn ProtocolClient>> {
        self.clients.get(kind).cloned()
    }

    /// Whether any client handles this kind.
    pub fn contains(&self, kind: &str) -> bool {
        self.clients.contains_key(kind)
    }

    /// All registered kinds, sorted.
    pub fn kinds(&self) -> Vec<&'static str> {
        let mut kinds: Vec<_> = self.clients.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }

    /// Registry with the default client set for every supported family.
    pub fn with_default_clients() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(SnmpClient::new()));
        registry.register(Arc::new(WebpaClient::new()));
        registry.register(Arc::new(CwmpClient::new()));
        registry.register(Arc::new(UspClient::new()));
        registry.register(Arc::new(EchoClient::new()));
        registry
    }
}

/// Shared validation error constructor for parameter schemas.
pub(crate) fn invalid_params(err: impl std::fmt::Display) -> CoreError {
    CoreError::ValidationError {
        field: "params".to_string(),
        message: err.to_string(),
    }
}

/// Run `attempt` up to `1 + retries` times, each bounded by `timeout`.
///
/// Authentication failures are returned immediately; retrying a bad
/// credential only locks accounts. If every attempt times out or faults,
/// the last failure is returned.
pub(crate) async fn run_with_retries<F, Fut>(
    timeout: Duration,
    retries: u32,
    mut attempt: F,
) -> Result<Value, ClientFailure>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Value, ClientFailure>>,
{
    let mut last_failure = None;

    for _ in 0..=retries {
        match tokio::time::timeout(timeout, attempt()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(failure @ ClientFailure::AuthenticationFailure(_))) => return Err(failure),
            Ok(Err(failure)) => last_failure = Some(failure),
            Err(_) => {
                last_failure = Some(ClientFailure::Timeout(format!(
                    "no response within {}ms",
                    timeout.as_millis()
                )));
            }
        }
    }

    Err(last_failure
        .unwrap_or_else(|| ClientFailure::Timeout("retries exhausted".to_string())))
}
