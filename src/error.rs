use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Unified error type for the Shroud application
#[derive(Error, Debug)]
pub enum ShroudError {
    // Request errors
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden")]
    Forbidden,

    #[error("Method not allowed")]
    MethodNotAllowed,

    // Upstream errors
    #[error("Upstream request failed: {0}")]
    BadGateway(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for Shroud operations
pub type Result<T> = std::result::Result<T, ShroudError>;

impl ShroudError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ShroudError::BadRequest(_) => StatusCode::BAD_REQUEST,

            ShroudError::Unauthorized => StatusCode::UNAUTHORIZED,

            ShroudError::Forbidden => StatusCode::FORBIDDEN,

            ShroudError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,

            ShroudError::BadGateway(_) => StatusCode::BAD_GATEWAY,

            ShroudError::InvalidConfig(_)
            | ShroudError::Io(_)
            | ShroudError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }
}

// Every HTTP-visible failure carries the same JSON envelope
impl IntoResponse for ShroudError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = json!({
            "error": {
                "message": self.to_string(),
                "status_code": status.as_u16(),
            },
        });

        (status, Json(body)).into_response()
    }
}

// Convert from URL parse errors
impl From<url::ParseError> for ShroudError {
    fn from(err: url::ParseError) -> Self {
        ShroudError::BadRequest(format!("invalid url: {err}"))
    }
}
