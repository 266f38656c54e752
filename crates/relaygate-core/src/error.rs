use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Error taxonomy for the gateway's core pipeline (§7). Each variant maps to
/// exactly one outward HTTP status; internal causes are logged, never echoed
/// verbatim to the client.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("auth: {0}")]
    Auth(#[from] AuthError),

    #[error("upstream returned {status}")]
    Upstream { status: StatusCode },

    #[error("first byte not received before deadline")]
    FirstByteTimeout,

    #[error("unsupported input: {0}")]
    UnsupportedInput(String),

    #[error("rate limited")]
    RateLimited,

    #[error("malformed upstream frame: {0}")]
    Parse(String),
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("no access credential available")]
    NoCredential,

    #[error("credential refresh failed: {0}")]
    RefreshFailed(String),

    #[error("failed to persist credentials file: {0}")]
    PersistFailed(String),
}

impl GatewayError {
    pub fn unsupported_input(message: impl Into<String>) -> Self {
        Self::UnsupportedInput(message.into())
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }

    fn status(&self) -> StatusCode {
        match self {
            GatewayError::Auth(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Upstream { status } => *status,
            GatewayError::FirstByteTimeout => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::UnsupportedInput(_) => StatusCode::BAD_REQUEST,
            GatewayError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::Parse(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn public_message(&self) -> String {
        match self {
            GatewayError::Auth(_) => "upstream authentication failed".to_string(),
            GatewayError::Upstream { .. } => "upstream request failed".to_string(),
            GatewayError::FirstByteTimeout => "upstream did not respond in time".to_string(),
            GatewayError::UnsupportedInput(message) => message.clone(),
            GatewayError::RateLimited => "rate limit exceeded".to_string(),
            GatewayError::Parse(_) => "internal error".to_string(),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        if matches!(self, GatewayError::Parse(_)) {
            tracing::warn!(error = %self, "malformed upstream frame");
        } else {
            tracing::error!(error = %self, "request failed");
        }
        let status = self.status();
        let body = Json(json!({
            "error": {
                "message": self.public_message(),
                "type": error_type(&self),
            }
        }));
        (status, body).into_response()
    }
}

fn error_type(error: &GatewayError) -> &'static str {
    match error {
        GatewayError::Auth(_) => "auth_error",
        GatewayError::Upstream { .. } => "upstream_error",
        GatewayError::FirstByteTimeout => "timeout_error",
        GatewayError::UnsupportedInput(_) => "invalid_request_error",
        GatewayError::RateLimited => "rate_limit_error",
        GatewayError::Parse(_) => "internal_error",
    }
}
