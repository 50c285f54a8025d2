//! Failures of a platform API call.

use reqwest::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Not allowed: {0}")]
    AccessDenied(String),

    #[error("Not signed in or session expired")]
    Unauthorized,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Too many requests, try again shortly")]
    RateLimited,

    #[error("Platform error: {0}")]
    ServerError(String),

    #[error("Could not reach the platform: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Unexpected response: {0}")]
    InvalidResponse(String),

    /// The envelope said `success: false`. Displays the server text verbatim.
    #[error("{0}")]
    Rejected(String),
}

/// Bytes of an error body kept in the message.
const BODY_LIMIT: usize = 500;

/// Used when a rejected envelope has no message.
pub const DEFAULT_REJECTION_MESSAGE: &str = "Request failed";

impl ApiError {
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let body = clip(body);
        match status {
            StatusCode::UNAUTHORIZED => ApiError::Unauthorized,
            StatusCode::FORBIDDEN => ApiError::AccessDenied(body),
            StatusCode::NOT_FOUND => ApiError::NotFound(body),
            StatusCode::TOO_MANY_REQUESTS => ApiError::RateLimited,
            s if s.is_server_error() => ApiError::ServerError(body),
            s => ApiError::InvalidResponse(format!("HTTP {}: {}", s.as_u16(), body)),
        }
    }

    /// The token is missing, expired or lacks the role. Expected, not alarming.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, ApiError::Unauthorized | ApiError::AccessDenied(_))
    }

    /// Text a view can show as-is.
    pub fn user_message(&self) -> String {
        self.to_string()
    }
}

fn clip(body: &str) -> String {
    let body = body.trim();
    if body.len() <= BODY_LIMIT {
        return body.to_string();
    }
    let mut end = BODY_LIMIT;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... ({} bytes)", &body[..end], body.len())
}
