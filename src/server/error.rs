//! Mapping from relay errors to HTTP responses.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::error::RelayError;

/// JSON body of every error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Stable machine-readable kind.
    pub error: &'static str,
    /// Human-readable detail.
    pub message: String,
}

/// An error ready to be sent to the client.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        let (status, kind) = match &err {
            RelayError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            RelayError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            RelayError::Upstream(upstream) if upstream.is_timeout() => {
                (StatusCode::GATEWAY_TIMEOUT, "upstream_timeout")
            }
            RelayError::Upstream(_) => (StatusCode::BAD_GATEWAY, "upstream_error"),
            RelayError::InvalidConfig(_)
            | RelayError::InvalidRecord(_)
            | RelayError::Sqlite(_)
            | RelayError::Storage(_)
            | RelayError::Url(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        // Only client mistakes are echoed back; the rest stays in the logs.
        let message = if err.is_client_error() {
            err.to_string()
        } else if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("Request failed: {err}");
            "internal server error".to_string()
        } else {
            tracing::warn!("Completion request failed: {err}");
            if status == StatusCode::GATEWAY_TIMEOUT {
                "the completion API timed out".to_string()
            } else {
                "the completion API did not return a reply".to_string()
            }
        };

        Self {
            status,
            kind,
            message,
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            kind: "validation_error",
            message: rejection.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.kind,
            message: self.message,
        });
        (self.status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::UpstreamError;

    #[test]
    fn test_upstream_body_is_not_echoed() {
        let err = RelayError::Upstream(UpstreamError::status(500, "secret-provider-detail"));
        let api = ApiError::from(err);

        assert_eq!(api.status, StatusCode::BAD_GATEWAY);
        assert_eq!(api.kind, "upstream_error");
        assert!(!api.message.contains("secret-provider-detail"));
    }

    #[test]
    fn test_timeout_maps_to_gateway_timeout() {
        let api = ApiError::from(RelayError::Upstream(UpstreamError::Timeout));

        assert_eq!(api.status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(api.kind, "upstream_timeout");
        assert_eq!(api.message, "the completion API timed out");
    }

    #[test]
    fn test_client_errors_keep_their_message() {
        let api = ApiError::from(RelayError::NotFound("s1".to_string()));

        assert_eq!(api.status, StatusCode::NOT_FOUND);
        assert!(api.message.contains("s1"));
    }

    #[test]
    fn test_internal_errors_are_masked() {
        let api = ApiError::from(RelayError::InvalidRecord("bad role: x".to_string()));

        assert_eq!(api.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(api.message, "internal server error");
    }
}
