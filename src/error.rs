//! Unified error model for the broker.
//!
//! `ProvisionError` is what the provisioning engine and its collaborators return.
//! `AppError` is the HTTP-facing shape: a stable code plus the short message the
//! platform shows to operators, with a fixed status mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use thiserror::Error;

/// Failures raised while provisioning buckets, bucket types and users.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Missing or malformed request parameters. Raised before any side effect.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// riak-admin exited non-zero.
    #[error("remote command `{command}` exited with status {status}: {output}")]
    RemoteCommand { command: String, status: i32, output: String },

    /// The remote session could not be opened or was torn down mid-command.
    #[error("remote session error: {0}")]
    Transport(String),

    /// Fetch, store, list or props call against the data protocol failed.
    #[error("store operation failed: {0}")]
    Store(String),

    /// The store rejected the caller's credentials or permissions.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0} already declared")]
    Conflict(String),

    /// Operation intentionally unsupported (bucket deletion, user deletion).
    #[error("not implemented: {0}")]
    Policy(String),
}

impl ProvisionError {
    pub fn invalid<S: Into<String>>(msg: S) -> Self { ProvisionError::InvalidInput(msg.into()) }
    pub fn store<S: Into<String>>(msg: S) -> Self { ProvisionError::Store(msg.into()) }
    pub fn not_found<S: Into<String>>(msg: S) -> Self { ProvisionError::NotFound(msg.into()) }
    pub fn transport<E: Display>(err: E) -> Self { ProvisionError::Transport(err.to_string()) }

    /// Stable short code used in logs and in `AppError`.
    pub fn code(&self) -> &'static str {
        match self {
            ProvisionError::InvalidInput(_) => "invalid_input",
            ProvisionError::RemoteCommand { .. } => "remote_command_failed",
            ProvisionError::Transport(_) => "remote_session_failed",
            ProvisionError::Store(_) => "store_operation_failed",
            ProvisionError::PermissionDenied(_) => "permission_denied",
            ProvisionError::NotFound(_) => "not_found",
            ProvisionError::Conflict(_) => "conflict",
            ProvisionError::Policy(_) => "not_implemented",
        }
    }
}

pub type ProvisionResult<T> = Result<T, ProvisionError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppError {
    UserInput { code: String, message: String },
    Provision { code: String, message: String },
    Auth { code: String, message: String },
    Internal { code: String, message: String },
}

impl AppError {
    pub fn code_str(&self) -> &str {
        match self {
            AppError::UserInput { code, .. }
            | AppError::Provision { code, .. }
            | AppError::Auth { code, .. }
            | AppError::Internal { code, .. } => code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AppError::UserInput { message, .. }
            | AppError::Provision { message, .. }
            | AppError::Auth { message, .. }
            | AppError::Internal { message, .. } => message.as_str(),
        }
    }

    pub fn user<S: Into<String>>(code: S, msg: S) -> Self { AppError::UserInput { code: code.into(), message: msg.into() } }
    pub fn auth<S: Into<String>>(code: S, msg: S) -> Self { AppError::Auth { code: code.into(), message: msg.into() } }
    pub fn internal<S: Into<String>>(code: S, msg: S) -> Self { AppError::Internal { code: code.into(), message: msg.into() } }

    /// Wrap an engine failure behind a fixed, operator-facing message.
    pub fn provision(err: &ProvisionError, msg: &str) -> Self {
        AppError::Provision { code: err.code().to_string(), message: msg.to_string() }
    }

    /// Map to HTTP status code.
    ///
    /// tsuru reads any non-2xx as failure and expects 500 for rejected parameters,
    /// so only authentication gets a 4xx.
    pub fn http_status(&self) -> u16 {
        match self {
            AppError::UserInput { .. } => 500,
            AppError::Provision { .. } => 500,
            AppError::Auth { .. } => 401,
            AppError::Internal { .. } => 500,
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code_str(), self.message())
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        match self {
            AppError::Auth { message, .. } => (status, message).into_response(),
            other => (status, Json(other.message().to_string())).into_response(),
        }
    }
}
