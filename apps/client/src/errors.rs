use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

use crate::storage::StorageError;

/// Shown whenever a request never reached the server or no response came back.
pub const NETWORK_ERROR_MESSAGE: &str = "Unable to reach the server. Please check your connection.";

const TIMEOUT_MESSAGE: &str = "The server took too long to respond. Please try again.";

/// Client-level error type.
/// Every variant renders as a human-readable message suitable for inline display,
/// so callers never see raw transport errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("{0}")]
    Network(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("Your session has expired. Please sign in again.")]
    SessionExpired,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{message}")]
    Validation { status: u16, message: String },

    #[error("{message}")]
    Server { status: u16, message: String },

    #[error("Unexpected response from the server: {0}")]
    Decode(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Could not save your credentials: {0}")]
    Storage(String),
}

impl ApiError {
    /// Builds the error for a non-success response, preferring the server's own message.
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let message = extract_message(body).unwrap_or_else(|| fallback_message(status).to_string());
        match status.as_u16() {
            401 => ApiError::Unauthorized(message),
            403 => ApiError::Forbidden(message),
            404 => ApiError::NotFound(message),
            code @ 400..=499 => ApiError::Validation {
                status: code,
                message,
            },
            code => ApiError::Server {
                status: code,
                message,
            },
        }
    }

    /// HTTP status behind this error, if it came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Unauthorized(_) => Some(401),
            ApiError::Forbidden(_) => Some(403),
            ApiError::NotFound(_) => Some(404),
            ApiError::Validation { status, .. } | ApiError::Server { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn message(&self) -> String {
        self.to_string()
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Network(TIMEOUT_MESSAGE.to_string())
        } else if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else if err.is_builder() {
            ApiError::InvalidRequest(err.to_string())
        } else {
            tracing::debug!("Transport error: {err}");
            ApiError::Network(NETWORK_ERROR_MESSAGE.to_string())
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        ApiError::Storage(err.to_string())
    }
}

/// Pulls a message out of `{"message": ..}`, `{"error": ".."}` or `{"error": {"message": ..}}`.
fn extract_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    let candidate = value
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| value.get("error").and_then(Value::as_str))
        .or_else(|| {
            value
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
        })?;

    let trimmed = candidate.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn fallback_message(status: StatusCode) -> &'static str {
    match status.as_u16() {
        401 => "Authentication required",
        403 => "You do not have permission to perform this action",
        404 => "The requested resource was not found",
        400..=499 => "The request could not be completed",
        _ => "Something went wrong on our end. Please try again later.",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_from_body() {
        let err = ApiError::from_status(StatusCode::BAD_REQUEST, r#"{"message":"Email already in use"}"#);
        assert_eq!(
            err,
            ApiError::Validation {
                status: 400,
                message: "Email already in use".to_string()
            }
        );
        assert_eq!(err.message(), "Email already in use");
    }

    #[test]
    fn test_nested_error_message() {
        let err = ApiError::from_status(
            StatusCode::FORBIDDEN,
            r#"{"error":{"code":"FORBIDDEN","message":"Employers only"}}"#,
        );
        assert_eq!(err, ApiError::Forbidden("Employers only".to_string()));
    }

    #[test]
    fn test_fallback_when_body_is_not_json() {
        let err = ApiError::from_status(StatusCode::BAD_GATEWAY, "<html>bad gateway</html>");
        assert_eq!(err.status(), Some(502));
        assert_eq!(
            err.message(),
            "Something went wrong on our end. Please try again later."
        );
    }

    #[test]
    fn test_blank_message_uses_fallback() {
        let err = ApiError::from_status(StatusCode::NOT_FOUND, r#"{"message":"   "}"#);
        assert_eq!(
            err,
            ApiError::NotFound("The requested resource was not found".to_string())
        );
    }

    #[test]
    fn test_unprocessable_is_validation() {
        let err = ApiError::from_status(StatusCode::UNPROCESSABLE_ENTITY, r#"{"error":"Bad date"}"#);
        assert_eq!(err.status(), Some(422));
        assert!(matches!(err, ApiError::Validation { .. }));
    }
}
