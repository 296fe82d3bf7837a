use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Cause of a failed outbound call to the provider API.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    /// Network failure or per-attempt timeout.
    #[error("transport error: {0}")]
    Transport(String),

    /// HTTP 429 from the provider.
    #[error("rate limited by provider")]
    RateLimited,

    /// Any other non-success HTTP status.
    #[error("HTTP {status}: {body}")]
    Client { status: u16, body: String },

    /// The response did not carry the JSON the caller needed.
    #[error("unexpected response shape: {0}")]
    DataShape(String),
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Transport(_) | FetchError::RateLimited)
    }

    /// Short label used in logs and failure reports.
    pub fn label(&self) -> &'static str {
        match self {
            FetchError::Transport(_) => "transport",
            FetchError::RateLimited => "rate_limited",
            FetchError::Client { .. } => "client",
            FetchError::DataShape(_) => "data_shape",
        }
    }
}

/// Terminal failure of a fetch, after the retry loop gave up.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{cause} (after {attempts} attempt(s))")]
pub struct FetchFailure {
    pub cause: FetchError,
    pub attempts: u32,
}

impl FetchFailure {
    pub fn new(cause: FetchError, attempts: u32) -> Self {
        Self { cause, attempts }
    }

    /// A failure raised while interpreting a response that was fetched fine.
    pub fn data_shape(message: impl Into<String>) -> Self {
        Self::new(FetchError::DataShape(message.into()), 1)
    }

    pub fn retryable(&self) -> bool {
        self.cause.is_retryable()
    }
}

/// Unified error type for the broker service.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    // ── Request Errors ──────────────────────────────────────────────────
    #[error("Authentication required")]
    Unauthorized,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("{0} not found")]
    NotFound(String),

    // ── Configuration ───────────────────────────────────────────────────
    #[error("Not configured: {0}")]
    NotConfigured(String),

    // ── Provider Errors ─────────────────────────────────────────────────
    #[error("Provider error: {0}")]
    Provider(#[from] FetchFailure),

    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    // ── Credentials ─────────────────────────────────────────────────────
    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    // ── Internal ────────────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for BrokerError {
    fn from(e: sqlx::Error) -> Self {
        tracing::error!("Database error: {e}");
        BrokerError::Persistence(e.to_string())
    }
}

impl From<anyhow::Error> for BrokerError {
    fn from(e: anyhow::Error) -> Self {
        BrokerError::Internal(e.to_string())
    }
}

impl IntoResponse for BrokerError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            BrokerError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            BrokerError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            BrokerError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            BrokerError::NotConfigured(_) => (StatusCode::INTERNAL_SERVER_ERROR, "not_configured"),
            BrokerError::Provider(f) => (StatusCode::BAD_GATEWAY, f.cause.label()),
            BrokerError::RefreshFailed(_) => (StatusCode::BAD_GATEWAY, "refresh_failed"),
            BrokerError::InvalidCredential(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "invalid_credential")
            }
            BrokerError::Crypto(_) => (StatusCode::INTERNAL_SERVER_ERROR, "crypto_error"),
            BrokerError::Persistence(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database_error"),
            BrokerError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        let body = json!({
            "error": {
                "code": code,
                "message": self.to_string(),
            }
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(FetchError::Transport("reset".into()).is_retryable());
        assert!(FetchError::RateLimited.is_retryable());
        assert!(!FetchError::Client { status: 404, body: String::new() }.is_retryable());
        assert!(!FetchError::DataShape("x".into()).is_retryable());
    }

    #[test]
    fn test_provider_error_maps_to_bad_gateway() {
        let err = BrokerError::from(FetchFailure::new(FetchError::RateLimited, 5));
        let resp = err.into_response();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_missing_code_maps_to_bad_request() {
        let resp = BrokerError::BadRequest("code is required".into()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
