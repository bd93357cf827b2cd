// Copyright (C) 2026 Cpeops Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tenant context carried explicitly through every operation.
//!
//! There is no ambient or thread-local tenant state: every ledger call,
//! dispatch request and stream subscription takes a [`TenantContext`] value,
//! so a forgotten context is a compile error rather than a data leak.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Identity pair under which a request executes.
///
/// Constructed once at the trust boundary (the caller authenticating the
/// request) and passed by reference everywhere below it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantContext {
    /// Organisation whose rows this request may see.
    pub tenant_id: String,
    /// Acting user, recorded as `requested_by` on jobs it creates.
    pub user_id: String,
}

impl TenantContext {
    /// Create a context, rejecting empty identifiers.
    pub fn new(
        tenant_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Result<Self, CoreError> {
        let tenant_id = tenant_id.into();
        let user_id = user_id.into();

        if tenant_id.trim().is_empty() {
            return Err(CoreError::ValidationError {
                field: "tenant_id".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        if user_id.trim().is_empty() {
            return Err(CoreError::ValidationError {
                field: "user_id".to_string(),
                message: "must not be empty".to_string(),
            });
        }

        Ok(Self { tenant_id, user_id })
    }
}
