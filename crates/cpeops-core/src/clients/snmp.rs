// Copyright (C) 2026 Cpeops Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SNMP client supporting v2c and v3 (authNoPriv, authPriv).
//!
//! Kinds: `snmp.get`, `snmp.set`, `snmp.bulk_walk`.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::CoreError;

use super::{ClientFailure, OperationRequest, ProtocolClient, invalid_params, run_with_retries};

const KINDS: &[&str] = &["snmp.get", "snmp.set", "snmp.bulk_walk"];

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct SnmpParams {
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_version")]
    version: String,
    // v2c
    #[serde(default = "default_community")]
    community: String,
    // v3
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    auth_protocol: Option<String>,
    #[serde(default)]
    auth_password: Option<String>,
    #[serde(default)]
    priv_protocol: Option<String>,
    #[serde(default)]
    priv_password: Option<String>,
    // per-operation
    #[serde(default)]
    oid: Option<String>,
    #[serde(default)]
    value: Option<Value>,
    #[serde(default)]
    base_oid: Option<String>,
    #[serde(default = "default_max_repetitions")]
    max_repetitions: u32,
}

fn default_port() -> u16 {
    161
}

fn default_version() -> String {
    "2c".to_string()
}

fn default_community() -> String {
    "public".to_string()
}

fn default_max_repetitions() -> u32 {
    25
}

impl SnmpParams {
    fn parse(params: &Value) -> Result<Self, CoreError> {
        let parsed: Self =
            serde_json::from_value(params.clone()).map_err(invalid_params)?;

        if parsed.host.trim().is_empty() {
            return Err(invalid_params("host must not be empty"));
        }
        match parsed.version.as_str() {
            "2c" => {}
            "3" => {
                if parsed.username.as_deref().unwrap_or("").is_empty() {
                    return Err(invalid_params("version 3 requires a username"));
                }
                if let Some(proto) = parsed.auth_protocol.as_deref()
                    && !matches!(proto, "MD5" | "SHA")
                {
                    return Err(invalid_params("auth_protocol must be MD5 or SHA"));
                }
                if let Some(proto) = parsed.priv_protocol.as_deref()
                    && !matches!(proto, "DES" | "AES")
                {
                    return Err(invalid_params("priv_protocol must be DES or AES"));
                }
                if parsed.priv_protocol.is_some() && parsed.auth_protocol.is_none() {
                    return Err(invalid_params("privacy requires an auth protocol"));
                }
            }
            other => {
                return Err(invalid_params(format!(
                    "version must be 2c or 3, got '{other}'"
                )));
            }
        }

        Ok(parsed)
    }

    fn require_oid(&self) -> Result<&str, CoreError> {
        self.oid
            .as_deref()
            .filter(|o| !o.is_empty())
            .ok_or_else(|| invalid_params("oid is required"))
    }

    fn require_base_oid(&self) -> Result<&str, CoreError> {
        self.base_oid
            .as_deref()
            .filter(|o| !o.is_empty())
            .ok_or_else(|| invalid_params("base_oid is required"))
    }

    fn check_credentials(&self) -> Result<(), ClientFailure> {
        match self.version.as_str() {
            "2c" if self.community.is_empty() => Err(ClientFailure::AuthenticationFailure(
                "empty community string".to_string(),
            )),
            "3" if self.auth_protocol.is_some()
                && self.auth_password.as_deref().unwrap_or("").is_empty() =>
            {
                Err(ClientFailure::AuthenticationFailure(
                    "auth protocol set but no auth password".to_string(),
                ))
            }
            _ => Ok(()),
        }
    }
}

/// Simulated SNMP transport.
pub struct SnmpClient {
    timeout: Duration,
    retries: u32,
}

impl SnmpClient {
    /// Client with the standard SNMP budget (5 s timeout, 3 retries).
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            retries: 3,
        }
    }

    /// Client with a custom timeout/retry budget.
    pub fn with_budget(timeout: Duration, retries: u32) -> Self {
        Self { timeout, retries }
    }
}

impl Default for SnmpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProtocolClient for SnmpClient {
    fn supported_kinds(&self) -> &'static [&'static str] {
        KINDS
    }

    fn validate(&self, kind: &str, params: &Value) -> Result<(), CoreError> {
        let parsed = SnmpParams::parse(params)?;
        match kind {
            "snmp.get" => {
                parsed.require_oid()?;
            }
            "snmp.set" => {
                parsed.require_oid()?;
                if parsed.value.is_none() {
                    return Err(invalid_params("value is required for snmp.set"));
                }
            }
            "snmp.bulk_walk" => {
                parsed.require_base_oid()?;
            }
            other => {
                return Err(invalid_params(format!("not an SNMP operation: '{other}'")));
            }
        }
        Ok(())
    }

    async fn execute(&self, request: &OperationRequest) -> Result<Value, ClientFailure> {
        let params = SnmpParams::parse(&request.params)
            .map_err(|e| ClientFailure::Protocol(e.to_string()))?;
        params.check_credentials()?;

        let target = format!("{}:{}", params.host, params.port);

        run_with_retries(self.timeout, self.retries, || {
            let params = &params;
            let target = &target;
            let kind = request.kind.as_str();
            async move {
                match kind {
                    "snmp.get" => {
                        let oid = params.oid.as_deref().unwrap_or_default();
                        Ok(json!({
                            "oid": oid,
                            "value": format!("sim:{target}:{oid}"),
                        }))
                    }
                    "snmp.set" => Ok(json!({
                        "oid": params.oid,
                        "value": params.value,
                    })),
                    "snmp.bulk_walk" => {
                        let base = params.base_oid.as_deref().unwrap_or_default();
                        let count = params.max_repetitions.min(3) as usize;
                        let varbinds: Vec<Value> = (1..=count)
                            .map(|i| {
                                json!({
                                    "oid": format!("{base}.{i}"),
                                    "value": format!("sim:{target}:{base}.{i}"),
                                })
                            })
                            .collect();
                        Ok(json!({ "base_oid": base, "varbinds": varbinds }))
                    }
                    other => Err(ClientFailure::Unsupported(format!(
                        "not an SNMP operation: '{other}'"
                    ))),
                }
            }
        })
        .await
    }
}
