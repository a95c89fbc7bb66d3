use crate::llm::RouteError;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::json;

pub const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// API error types
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Bad request (400)
    #[error("{0}")]
    BadRequest(String),

    /// Unauthorized (401)
    #[error("{0}")]
    Unauthorized(String),

    /// Not found (404)
    #[error("{0}")]
    NotFound(String),

    /// Upstream unreachable (502)
    #[error("{0}")]
    BadGateway(String),

    /// Internal server error (500)
    #[error("{0}")]
    InternalError(String),
}

impl ApiError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadGateway(_) => StatusCode::BAD_GATEWAY,
            Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get error message
    pub fn message(&self) -> &str {
        match self {
            Self::BadRequest(msg)
            | Self::Unauthorized(msg)
            | Self::NotFound(msg)
            | Self::BadGateway(msg)
            | Self::InternalError(msg) => msg,
        }
    }

    pub fn local_unreachable(base: &str) -> Self {
        Self::BadGateway(format!("Failed to connect to local Ollama at {}", base))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({ "error": self.message() });
        let mut response = (self.status_code(), body.to_string()).into_response();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(JSON_CONTENT_TYPE),
        );
        response
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!("Internal error: {:?}", err);
        Self::InternalError("Internal server error".to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        tracing::warn!("JSON error: {}", err);
        Self::BadRequest("Invalid JSON".to_string())
    }
}

impl From<RouteError> for ApiError {
    fn from(err: RouteError) -> Self {
        let message = err.to_string();
        match err {
            RouteError::SyntheticModel => Self::BadRequest(message),
            RouteError::MissingApiKey => Self::Unauthorized(message),
            RouteError::NotWhitelisted(_) => Self::NotFound(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            ApiError::BadRequest("test".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Unauthorized("test".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::NotFound("test".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::BadGateway("test".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_route_errors_map_to_statuses() {
        let err: ApiError = RouteError::MissingApiKey.into();
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(err.message(), "OpenRouter API Key is not configured.");

        let err: ApiError = RouteError::NotWhitelisted("acme/bar".into()).into();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.message(), "Model 'acme/bar' is not in your whitelist.");

        let err: ApiError = RouteError::SyntheticModel.into();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_internal_error_is_sanitized() {
        let err: ApiError = anyhow::anyhow!("secret path /home/me/.key").into();
        assert_eq!(err.message(), "Internal server error");
    }

    #[tokio::test]
    async fn test_response_body_shape() {
        let response = ApiError::local_unreachable("http://localhost:11434").into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            JSON_CONTENT_TYPE
        );

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            value,
            json!({"error": "Failed to connect to local Ollama at http://localhost:11434"})
        );
    }
}
