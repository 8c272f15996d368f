//! Error types for script dispatch.
//!
//! `ExecuteError` is the request-level taxonomy returned by `POST /execute_file`;
//! `DeliveryError` describes a single failed send to one agent and never reaches
//! the HTTP caller directly (it is folded into the delivery count).

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// Body of every `/execute_file` response, success or not.
#[derive(Debug, Clone, Serialize)]
pub struct ExecuteResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clients_reached: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_clients: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecuteError {
    #[error("No file path provided")]
    MissingPath,

    #[error("File '{0}' does not exist")]
    NotFound(String),

    #[error("'{0}' is not a file")]
    NotAFile(String),

    #[error("File must be one of {allowed:?}, got '{got}'")]
    InvalidExtension { allowed: Vec<String>, got: String },

    #[error("Error reading file: {0}")]
    Read(String),

    #[error("Error serializing message: {0}")]
    Encode(String),

    #[error("No clients connected")]
    NoClients,
}

impl ExecuteError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingPath
            | Self::NotFound(_)
            | Self::NotAFile(_)
            | Self::InvalidExtension { .. } => StatusCode::BAD_REQUEST,
            Self::Read(_) | Self::Encode(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NoClients => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Caller mistakes, as opposed to server-side or availability failures
    pub fn is_validation(&self) -> bool {
        self.status_code() == StatusCode::BAD_REQUEST
    }

    pub fn to_response_body(&self) -> ExecuteResponse {
        // Only the no-clients case reports counts; validation and I/O failures
        // never got as far as looking at the registry.
        let (clients_reached, total_clients) = match self {
            Self::NoClients => (Some(0), Some(0)),
            _ => (None, None),
        };
        ExecuteResponse {
            success: false,
            message: None,
            error: Some(self.to_string()),
            clients_reached,
            total_clients,
        }
    }
}

impl IntoResponse for ExecuteError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(self.to_response_body())).into_response()
    }
}

/// Why a frame could not be handed to one agent's socket.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The connection was removed from the registry or its writer has exited
    #[error("connection closed")]
    Closed,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("send timed out")]
    TimedOut,
}
