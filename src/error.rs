// src/error.rs
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, FetchError>;

/// Failure taxonomy for the fetch pipeline.
///
/// `Network` is retried with backoff at the adapter boundary; `Parse` is
/// never retried; `Auth` is surfaced distinctly so an operator can refresh
/// credentials instead of chasing phantom network problems. Enrichment
/// failures degrade item fields locally and do not reach job level.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("auth error: {0}")]
    Auth(String),
}

impl FetchError {
    /// Only network-class failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Network(_) | FetchError::Timeout(_))
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout(std::time::Duration::from_secs(0))
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

/// Error shape for the admin/API surface. Maps onto an HTTP status class
/// and a short JSON body; internal detail stays in the logs.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::NotFound(what) => (StatusCode::NOT_FOUND, format!("{what} not found")),
            ApiError::Internal(err) => {
                tracing::error!(error = ?err, "internal error serving request");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_and_timeout_are_retryable() {
        assert!(FetchError::Network("connection refused".into()).is_retryable());
        assert!(FetchError::Timeout(std::time::Duration::from_secs(30)).is_retryable());
        assert!(!FetchError::Parse("bad xml".into()).is_retryable());
        assert!(!FetchError::Auth("missing credential".into()).is_retryable());
    }
}
