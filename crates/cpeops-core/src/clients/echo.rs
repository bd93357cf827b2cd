// Copyright (C) 2026 Cpeops Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Loopback echo client for smoke tests and pipeline verification.
//!
//! Kind: `echo.get`. Answers immediately with the requested path, so a
//! deployment can verify the whole submit/dispatch/result pipeline without
//! touching a device.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::CoreError;

use super::{ClientFailure, OperationRequest, ProtocolClient, invalid_params};

const KINDS: &[&str] = &["echo.get"];

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct EchoParams {
    path: String,
}

/// Loopback client; no transport behind it.
#[derive(Default)]
pub struct EchoClient;

impl EchoClient {
    /// Create the echo client.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProtocolClient for EchoClient {
    fn supported_kinds(&self) -> &'static [&'static str] {
        KINDS
    }

    fn validate(&self, kind: &str, params: &Value) -> Result<(), CoreError> {
        if kind != "echo.get" {
            return Err(invalid_params(format!("not an echo operation: '{kind}'")));
        }
        let parsed: EchoParams =
            serde_json::from_value(params.clone()).map_err(invalid_params)?;
        if parsed.path.is_empty() {
            return Err(invalid_params("path must not be empty"));
        }
        Ok(())
    }

    async fn execute(&self, request: &OperationRequest) -> Result<Value, ClientFailure> {
        let parsed: EchoParams = serde_json::from_value(request.params.clone())
            .map_err(|e| ClientFailure::Protocol(e.to_string()))?;

        Ok(json!({ "value": parsed.path }))
    }
}
