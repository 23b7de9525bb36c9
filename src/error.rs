//! Error types for the gateway and the sandbox capability layer.
//!
//! [`CapabilityError`] is what a sandbox backend reports. [`GatewayError`] is
//! what the router renders: `{"error": "...", ...context}` with a 400, 404,
//! 405 or 500 status. A command exiting non-zero is neither; it travels as an
//! ordinary [`crate::sandbox::ExecutionResult`].

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

/// Failures reported by the sandbox capability layer.
#[derive(Error, Debug)]
pub enum CapabilityError {
    /// The sandbox could not be reached or could not start the command.
    #[error("sandbox unavailable: {0}")]
    Unavailable(String),

    #[error("command timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("not found: {0}")]
    NotFound(String),

    /// A file operation named a directory.
    #[error("is a directory: {0}")]
    IsDirectory(String),

    /// Structured signal that an exposure already exists for the port.
    #[error("port {0} is already exposed")]
    PortAlreadyExposed(u16),

    #[error("mount failed: {0}")]
    Mount(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced to HTTP callers.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Missing or invalid request field, unsafe path. Raised before any
    /// sandbox interaction.
    #[error("{message}")]
    Validation {
        message: String,
        context: Map<String, Value>,
    },

    #[error("{message}")]
    NotFound {
        message: String,
        context: Map<String, Value>,
    },

    #[error("Method {method} not allowed")]
    MethodNotAllowed {
        method: String,
        allowed: &'static [&'static str],
    },

    /// Sandbox unreachable or a capability call failed.
    #[error("{0}")]
    Transport(String),
}

pub type Result<T> = std::result::Result<T, GatewayError>;

impl GatewayError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            context: Map::new(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
            context: Map::new(),
        }
    }

    pub fn method_not_allowed(method: impl Into<String>, allowed: &'static [&'static str]) -> Self {
        Self::MethodNotAllowed {
            method: method.into(),
            allowed,
        }
    }

    /// Attach an extra field to the error body. No-op for variants without
    /// a context map.
    pub fn with_context(mut self, key: &str, value: impl Into<Value>) -> Self {
        if let Self::Validation { context, .. } | Self::NotFound { context, .. } = &mut self {
            context.insert(key.to_string(), value.into());
        }
        self
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            Self::Transport(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<CapabilityError> for GatewayError {
    fn from(err: CapabilityError) -> Self {
        match err {
            CapabilityError::NotFound(path) => {
                GatewayError::not_found(format!("Not found: {}", path)).with_context("path", path)
            }
            CapabilityError::IsDirectory(path) => {
                GatewayError::validation(format!("Path is a directory: {}", path))
                    .with_context("path", path)
            }
            other => GatewayError::Transport(other.to_string()),
        }
    }
}

impl From<JsonRejection> for GatewayError {
    fn from(rejection: JsonRejection) -> Self {
        GatewayError::validation(format!("Invalid JSON body: {}", rejection.body_text()))
    }
}

impl From<QueryRejection> for GatewayError {
    fn from(rejection: QueryRejection) -> Self {
        GatewayError::validation(format!("Invalid query string: {}", rejection.body_text()))
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();
        if status.is_server_error() {
            warn!(error = %message, "request failed");
        }

        let (mut body, allow) = match self {
            Self::Validation { context, .. } | Self::NotFound { context, .. } => (context, None),
            Self::MethodNotAllowed { allowed, .. } => {
                let mut body = Map::new();
                body.insert("allowed".to_string(), Value::from(allowed.to_vec()));
                (body, Some(allowed.join(", ")))
            }
            Self::Transport(_) => (Map::new(), None),
        };
        body.insert("error".to_string(), Value::String(message));

        let mut response = (status, Json(Value::Object(body))).into_response();
        if let Some(allow) = allow.and_then(|a| HeaderValue::from_str(&a).ok()) {
            response.headers_mut().insert(header::ALLOW, allow);
        }
        response
    }
}
