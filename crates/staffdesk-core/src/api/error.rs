use reqwest::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    /// The request never got a response (connect failure, timeout, reset).
    #[error("No response from server: {0}")]
    NoResponse(#[from] reqwest::Error),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Access denied: {0}")]
    Forbidden(String),

    /// Any other non-success status; the session is left alone.
    #[error("Request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            return body.to_string();
        }
        let cut = body
            .char_indices()
            .map(|(i, _)| i)
            .take_while(|&i| i <= MAX_ERROR_BODY_LENGTH)
            .last()
            .unwrap_or(0);
        format!(
            "{}... (truncated, {} total bytes)",
            &body[..cut],
            body.len()
        )
    }

    /// Prefer the backend's `{ "message": ... }` field over the raw body.
    fn message_from_body(body: &str) -> String {
        serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
            .unwrap_or_else(|| Self::truncate_body(body))
    }

    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let message = Self::message_from_body(body);
        match status.as_u16() {
            401 => ApiError::Unauthorized(message),
            403 => ApiError::Forbidden(message),
            code => ApiError::Rejected {
                status: code,
                message,
            },
        }
    }

    /// True for 401/403, the statuses that tear the session down.
    pub fn is_credential_rejection(&self) -> bool {
        matches!(self, ApiError::Unauthorized(_) | ApiError::Forbidden(_))
    }

    pub fn is_no_response(&self) -> bool {
        matches!(self, ApiError::NoResponse(_))
    }

    /// HTTP status the server asserted, if a response arrived.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Unauthorized(_) => Some(401),
            ApiError::Forbidden(_) => Some(403),
            ApiError::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Server-provided message, when one came back with the failure.
    pub fn server_message(&self) -> Option<&str> {
        match self {
            ApiError::Unauthorized(m) | ApiError::Forbidden(m) => Some(m),
            ApiError::Rejected { message, .. } => Some(message),
            _ => None,
        }
    }
}
