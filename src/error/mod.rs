use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::store::StoreError;

/// Result type for rate limiter operations
pub type Result<T> = std::result::Result<T, LimiterError>;

/// Rate limiter error types
#[derive(Error, Debug)]
pub enum LimiterError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Token not registered: {0}")]
    TokenNotRegistered(String),

    #[error("Invalid quota record for token {token}: {source}")]
    InvalidQuotaRecord {
        token: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to register quota for token {token}: {source}")]
    Registration {
        token: String,
        #[source]
        source: Box<LimiterError>,
    },

    #[error("Quota lookup timed out for token: {0}")]
    QuotaLookupTimeout(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LimiterError {
    /// Get the HTTP status code for this error
    ///
    /// Every engine failure is a server-side problem from the client's point of view.
    pub fn status_code(&self) -> StatusCode {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

impl IntoResponse for LimiterError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": format!("Internal Server Error: {}", self),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}
