// Copyright (C) 2026 Cpeops Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for cpeops-core.
//!
//! `CoreError` covers the synchronous surfaces (submission, query, cancel,
//! subscribe); execution failures are recorded in the ledger as an
//! [`ErrorDescriptor`] instead of propagating back through the submit call.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Result type using CoreError
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core errors that can occur during request processing.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum CoreError {
    /// A submission was malformed and was rejected before any ledger row existed.
    ValidationError {
        /// The field that failed validation.
        field: String,
        /// The validation error message.
        message: String,
    },

    /// Job absent, or not visible under the calling tenant context.
    ///
    /// Both cases are deliberately indistinguishable.
    NotFound {
        /// The job id that was not found.
        job_id: String,
    },

    /// Handing a job to the dispatch queue failed.
    DispatchFailed {
        /// The job id whose dispatch failed.
        job_id: String,
        /// The reason for failure.
        details: String,
    },

    /// Database operation failed.
    DatabaseError {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },
}

impl CoreError {
    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ValidationError { .. } => "VALIDATION_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::DispatchFailed { .. } => "DISPATCH_FAILED",
            Self::DatabaseError { .. } => "DATABASE_ERROR",
        }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ValidationError { field, message } => {
                write!(f, "Validation error for '{}': {}", field, message)
            }
            Self::NotFound { job_id } => {
                write!(f, "Job '{}' not found", job_id)
            }
            Self::DispatchFailed { job_id, details } => {
                write!(f, "Failed to dispatch job '{}': {}", job_id, details)
            }
            Self::DatabaseError { operation, details } => {
                write!(f, "Database error during '{}': {}", operation, details)
            }
        }
    }
}

impl std::error::Error for CoreError {}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        CoreError::DatabaseError {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::DatabaseError {
            operation: "json".to_string(),
            details: err.to_string(),
        }
    }
}

/// User-visible failure recorded with a terminal job result.
///
/// The `kind` is a stable machine-readable code; the message is free text.
/// Raw internal faults (panics, driver errors) are never stored verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDescriptor {
    /// Stable failure code: `unsupported`, `timeout`, `auth`, `protocol`,
    /// `unexpected`, or `cancelled`.
    pub kind: String,
    /// Human-readable explanation.
    pub message: String,
}

impl ErrorDescriptor {
    /// Create a descriptor from a kind code and message.
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}
