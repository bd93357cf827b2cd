// Copyright (C) 2026 Cpeops Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! CWMP (TR-069) client speaking to an ACS REST facade.
//!
//! Kinds: `cwmp.get`, `cwmp.set`. TR-069 sessions are slow by nature, so the
//! default timeout is wider than the other families.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::CoreError;

use super::{ClientFailure, OperationRequest, ProtocolClient, invalid_params, run_with_retries};

const KINDS: &[&str] = &["cwmp.get", "cwmp.set"];

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct CwmpParams {
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
    parameter: Option<String>,
    #[serde(default)]
    value: Option<Value>,
}

fn default_auth_type() -> String {
    "basic".to_string()
}

impl CwmpParams {
    fn parse(params: &Value) -> Result<Self, CoreError> {
        let parsed: Self =
            serde_json::from_value(params.clone()).map_err(invalid_params)?;

        if !parsed.base_url.starts_with("http://") && !parsed.base_url.starts_with("https://") {
            return Err(invalid_params("base_url must be an http(s) URL"));
        }
        if !matches!(parsed.auth_type.as_str(), "basic" | "bearer" | "apikey") {
            return Err(invalid_params(
                "auth_type must be one of basic, bearer, apikey",
            ));
        }

        Ok(parsed)
    }

    fn require_parameter(&self) -> Result<&str, CoreError> {
        self.parameter
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| invalid_params("parameter is required"))
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

/// Simulated ACS-backed TR-069 client.
pub struct CwmpClient {
    timeout: Duration,
    retries: u32,
}

impl CwmpClient {
    /// Client with the standard TR-069 budget (60 s timeout, 3 retries).
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            retries: 3,
        }
    }

    /// Client with a custom timeout/retry budget.
    pub fn with_budget(timeout: Duration, retries: u32) -> Self {
        Self { timeout, retries }
    }
}

impl Default for CwmpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProtocolClient for CwmpClient {
    fn supported_kinds(&self) -> &'static [&'static str] {
        KINDS
    }

    fn validate(&self, kind: &str, params: &Value) -> Result<(), CoreError> {
        let parsed = CwmpParams::parse(params)?;
        match kind {
            "cwmp.get" => {
                parsed.require_parameter()?;
            }
            "cwmp.set" => {
                parsed.require_parameter()?;
                if parsed.value.is_none() {
                    return Err(invalid_params("value is required for cwmp.set"));
                }
            }
            other => {
                return Err(invalid_params(format!("not a CWMP operation: '{other}'")));
            }
        }
        Ok(())
    }

    async fn execute(&self, request: &OperationRequest) -> Result<Value, ClientFailure> {
        let params = CwmpParams::parse(&request.params)
            .map_err(|e| ClientFailure::Protocol(e.to_string()))?;
        params.check_credentials()?;

        run_with_retries(self.timeout, self.retries, || {
            let params = &params;
            let kind = request.kind.as_str();
            let device = request.device_id.as_deref().unwrap_or("unknown");
            async move {
                match kind {
                    "cwmp.get" => {
                        let parameter = params.parameter.as_deref().unwrap_or_default();
                        Ok(json!({
                            "parameter": parameter,
                            "value": format!("sim:{device}:{parameter}"),
                        }))
                    }
                    "cwmp.set" => Ok(json!({
                        "parameter": params.parameter,
                        "value": params.value,
                        "status": "Success",
                    })),
                    other => Err(ClientFailure::Unsupported(format!(
                        "not a CWMP operation: '{other}'"
                    ))),
                }
            }
        })
        .await
    }
}
