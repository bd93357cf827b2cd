// Copyright (C) 2026 Cpeops Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! WebPA client for parameter reads and writes over the WebPA head-end.
//!
//! Kinds: `webpa.get`, `webpa.set`.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::CoreError;

use super::{ClientFailure, OperationRequest, ProtocolClient, invalid_params, run_with_retries};

const KINDS: &[&str] = &["webpa.get", "webpa.set"];

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct WebpaParams {
    base_url: String,
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
}

fn default_auth_type() -> String {
    "none".to_string()
}

impl WebpaParams {
    fn parse(params: &Value) -> Result<Self, CoreError> {
        let parsed: Self =
            serde_json::from_value(params.clone()).map_err(invalid_params)?;

        if !parsed.base_url.starts_with("http://") && !parsed.base_url.starts_with("https://") {
            return Err(invalid_params("base_url must be an http(s) URL"));
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

/// Simulated WebPA head-end client.
pub struct WebpaClient {
    timeout: Duration,
    retries: u32,
}

impl WebpaClient {
    /// Client with the standard WebPA budget (30 s timeout, 3 retries).
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

impl Default for WebpaClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProtocolClient for WebpaClient {
    fn supported_kinds(&self) -> &'static [&'static str] {
        KINDS
    }

    fn validate(&self, kind: &str, params: &Value) -> Result<(), CoreError> {
        let parsed = WebpaParams::parse(params)?;
        match kind {
            "webpa.get" => {
                parsed.require_path()?;
            }
            "webpa.set" => {
                parsed.require_path()?;
                if parsed.value.is_none() {
                    return Err(invalid_params("value is required for webpa.set"));
                }
            }
            other => {
                return Err(invalid_params(format!("not a WebPA operation: '{other}'")));
            }
        }
        Ok(())
    }

    async fn execute(&self, request: &OperationRequest) -> Result<Value, ClientFailure> {
        let params = WebpaParams::parse(&request.params)
            .map_err(|e| ClientFailure::Protocol(e.to_string()))?;
        params.check_credentials()?;

        run_with_retries(self.timeout, self.retries, || {
            let params = &params;
            let kind = request.kind.as_str();
            let device = request.device_id.as_deref().unwrap_or("unknown");
            async move {
                let path = params.path.as_deref().unwrap_or_default();
                match kind {
                    "webpa.get" => Ok(json!({
                        "parameters": [{
                            "name": path,
                            "value": format!("sim:{device}:{path}"),
                        }]
                    })),
                    "webpa.set" => Ok(json!({
                        "parameters": [{
                            "name": path,
                            "value": params.value,
                            "message": "Success",
                        }]
                    })),
                    other => Err(ClientFailure::Unsupported(format!(
                        "not a WebPA operation: '{other}'"
                    ))),
                }
            }
        })
        .await
    }
}
