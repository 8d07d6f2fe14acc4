//! Mapping of cache errors onto HTTP responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use cachetree_core::CacheError;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("Unknown node group: {0}")]
    UnknownGroup(String),
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::UnknownGroup(_) => StatusCode::NOT_FOUND,
            ApiError::Cache(error) => match error {
                CacheError::KeyNotFound { .. } | CacheError::UnknownNodeIdentity(_) => {
                    StatusCode::NOT_FOUND
                }
                CacheError::RequestTimedOut { .. } => StatusCode::GATEWAY_TIMEOUT,
                CacheError::UnsupportedControl { .. } => StatusCode::BAD_REQUEST,
                CacheError::ProtocolViolation(_) => StatusCode::BAD_GATEWAY,
                CacheError::NodeUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                CacheError::ConfigurationError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(ErrorResponse {
            error: self.to_string(),
        });
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cachetree_core::RequestKind;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::from(CacheError::KeyNotFound { key: 1 }).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(CacheError::RequestTimedOut {
                kind: RequestKind::Read,
                key: 1,
                timeout_ms: 10
            })
            .status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            ApiError::UnknownGroup("caches".to_string()).status(),
            StatusCode::NOT_FOUND
        );
    }
}
