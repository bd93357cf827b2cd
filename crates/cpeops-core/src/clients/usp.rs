// Copyright (C) 2026 Cpeops Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! USP (TR-369) client against a controller REST facade.
//!
//! Kinds: `usp.get`, `usp.set`, `usp.operate`. Only the `http` transport mode
//! is wired up; `mqtt` and `websocket` are accepted by validation but fail the
//! job as unsupported.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::CoreError;

use super::{ClientFailure, OperationRequest, ProtocolClient, invalid_params, run_with_retries};

const KINDS: &[&str] = &["usp.get", "usp.set", "usp.operate"];

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct UspParams {
    base_url: String,
    #[serde(default = "default_mode")]
    mode: String,
    #[serde(default = "default_auth_type")]
    auth_type: String,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    api_key: Option<String>,
    // per-operation
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    value: Option<Value>,
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    input: Option<Value>,
}

fn default_mode() -> String {
    "http".to_string()
}

fn default_auth_type() -> String {
    "none".to_string()
}

impl UspParams {
    fn parse(params: &Value) -> Result<Self, CoreError> {
        let parsed: Self =
            serde_json::from_value(params.clone()).map_err(invalid_params)?;

        if parsed.base_url.trim().is_empty() {
            return Err(invalid_params("base_url must not be empty"));
        }
        if !matches!(parsed.mode.as_str(), "http" | "mqtt" | "websocket") {
            return Err(invalid_params(
                "mode must be one of http, mqtt, websocket",
            ));
        }
        if !matches!(
            parsed.auth_type.as_str(),
            "none" | "basic" | "bearer" | "apikey"
        ) {
            return Err(invalid_params(
                "auth_type must be one of none, basic, bearer, apikey",
            ));
        }

        Ok(parsed)
    }

    fn require_path(&self) -> Result<&str, CoreError> {
        self.path
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| invalid_params("path is required"))
    }

    fn check_credentials(&self) -> Result<(), ClientFailure> {
        let missing = match self.auth_type.as_str() {
            "basic" => self.username.is_none() || self.password.is_none(),
            "bearer" => self.token.as_deref().unwrap_or("").is_empty(),
            "apikey" => self.api_key.as_deref().unwrap_or("").is_empty(),
            _ => false,
        };
        if missing {
            return Err(ClientFailure::AuthenticationFailure(format!(
                "incomplete credentials for auth_type '{}'",
                self.auth_type
            )));
        }
        Ok(())
    }
}

/// Simulated USP controller client.
pub struct UspClient {
    timeout: Duration,
    retries: u32,
}

impl UspClient {
    /// Client with the standard USP budget (30 s timeout, 3 retries).
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retries: 3,
        }
    }

    /// Client with a custom timeout/retry budget.
    pub fn with_budget(timeout: Duration, retries: u32) -> Self {
        Self { timeout, retries }
    }
}

impl Default for UspClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProtocolClient for UspClient {
    fn supported_kinds(&self) -> &'static [&'static str] {
        KINDS
    }

    fn validate(&self, kind: &str, params: &Value) -> Result<(), CoreError> {
        let parsed = UspParams::parse(params)?;
        match kind {
            "usp.get" => {
                parsed.require_path()?;
            }
            "usp.set" => {
                parsed.require_path()?;
                if parsed.value.is_none() {
                    return Err(invalid_params("value is required for usp.set"));
                }
            }
            "usp.operate" => {
                if parsed.command.as_deref().unwrap_or("").is_empty() {
                    return Err(invalid_params("command is required for usp.operate"));
                }
            }
            other => {
                return Err(invalid_params(format!("not a USP operation: '{other}'")));
            }
        }
        Ok(())
    }

    async fn execute(&self, request: &OperationRequest) -> Result<Value, ClientFailure> {
        let params = UspParams::parse(&request.params)
            .map_err(|e| ClientFailure::Protocol(e.to_string()))?;

        if params.mode != "http" {
            return Err(ClientFailure::Unsupported(format!(
                "transport mode '{}' is not wired up; use http",
                params.mode
            )));
        }
        params.check_credentials()?;

        run_with_retries(self.timeout, self.retries, || {
            let params = &params;
            let kind = request.kind.as_str();
            let device = request.device_id.as_deref().unwrap_or("unknown");
            async move {
                match kind {
                    "usp.get" => {
                        let path = params.path.as_deref().unwrap_or_default();
                        Ok(json!({
                            "path": path,
                            "value": format!("sim:{device}:{path}"),
                        }))
                    }
                    "usp.set" => Ok(json!({
                        "path": params.path,
                        "value": params.value,
                    })),
                    "usp.operate" => Ok(json!({
                        "command": params.command,
                        "input": params.input,
                        "status": "complete",
                    })),
                    other => Err(ClientFailure::Unsupported(format!(
                        "not a USP operation: '{other}'"
                    ))),
                }
            }
        })
        .await
    }
}
