//! API Error Handling

use axum::{
    http::{header::RETRY_AFTER, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use governance::{ErrorKind, GovernanceError};
use serde_json::json;
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Governance(#[from] GovernanceError),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

fn status_for(kind: ErrorKind) -> (StatusCode, &'static str) {
    match kind {
        ErrorKind::Validation => (StatusCode::BAD_REQUEST, "validation"),
        ErrorKind::NotFound => (StatusCode::NOT_FOUND, "not_found"),
        ErrorKind::StateConflict => (StatusCode::CONFLICT, "state_conflict"),
        ErrorKind::Authorization => (StatusCode::FORBIDDEN, "authorization"),
        ErrorKind::OracleUnavailable => (StatusCode::SERVICE_UNAVAILABLE, "oracle_unavailable"),
        ErrorKind::RateLimited => (StatusCode::TOO_MANY_REQUESTS, "rate_limited"),
        ErrorKind::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message, retry_after) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg, None),
            ApiError::Governance(e) => {
                let (status, error_type) = status_for(e.kind());
                let retry_after = match e {
                    GovernanceError::RateLimited { retry_after_secs } => Some(retry_after_secs),
                    _ => None,
                };
                // storage details stay in the server log
                let message = if e.kind() == ErrorKind::Internal {
                    "internal error".to_string()
                } else {
                    e.to_string()
                };
                (status, error_type, message, retry_after)
            }
        };

        let body = Json(json!({
            "error": error_type,
            "message": message,
        }));

        let mut response = (status, body).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limited_sets_retry_after() {
        let response =
            ApiError::from(GovernanceError::RateLimited { retry_after_secs: 42 }).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(RETRY_AFTER).unwrap(), "42");
    }

    #[test]
    fn test_kind_to_status() {
        let cases = [
            (GovernanceError::ProposalNotFound(9), StatusCode::NOT_FOUND),
            (GovernanceError::InvalidSignature, StatusCode::FORBIDDEN),
            (
                GovernanceError::AlreadyQueued("0xab".to_string()),
                StatusCode::CONFLICT,
            ),
            (
                GovernanceError::OracleUnavailable("timeout".to_string()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                GovernanceError::InvalidInput("title".to_string()),
                StatusCode::BAD_REQUEST,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), status);
        }
    }
}
