use axum::Json;
use axum::response::{IntoResponse, Response};
use http::StatusCode;
use lectern_cache::CacheError;
use thiserror::Error;

use crate::admin::CLEAR_ALL_CONFIRMATION;

/// Errors returned by the admin endpoints
#[derive(Debug, Error)]
pub enum AdminError {
    /// Gateway secret missing or wrong
    #[error("invalid gateway credentials")]
    Unauthorized,

    /// Caller's role may not perform the operation
    #[error("role '{role}' may not perform this operation")]
    Forbidden { role: String },

    /// Full clear requested without the confirmation token
    #[error("confirmation required: set \"confirm\" to \"{token}\"", token = CLEAR_ALL_CONFIRMATION)]
    ConfirmationRequired,

    /// Request body missing, of the wrong content type or not the expected JSON
    #[error("{message}")]
    InvalidBody { status: StatusCode, message: String },

    /// Cache operation failed
    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl AdminError {
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::InvalidBody { status, .. } => *status,
            Self::ConfirmationRequired | Self::Cache(CacheError::InvalidInput(_)) => StatusCode::BAD_REQUEST,
            Self::Cache(CacheError::StoreUnavailable(_) | CacheError::AggregationUnavailable(_)) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::Cache(CacheError::Config(_) | CacheError::Serialization(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub const fn error_type(&self) -> &'static str {
        match self {
            Self::Unauthorized => "authentication_error",
            Self::Forbidden { .. } => "permission_error",
            Self::ConfirmationRequired | Self::InvalidBody { .. } | Self::Cache(CacheError::InvalidInput(_)) => {
                "invalid_request_error"
            }
            Self::Cache(CacheError::StoreUnavailable(_) | CacheError::AggregationUnavailable(_)) => {
                "store_unavailable_error"
            }
            Self::Cache(CacheError::Config(_) | CacheError::Serialization(_)) => "internal_error",
        }
    }

    /// Message safe to expose to API consumers
    pub fn client_message(&self) -> String {
        match self {
            Self::Cache(CacheError::StoreUnavailable(_) | CacheError::AggregationUnavailable(_)) => {
                "the cache store is unavailable".to_owned()
            }
            Self::Cache(CacheError::Config(_) | CacheError::Serialization(_)) => "an internal error occurred".to_owned(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "admin request failed");
        }

        let body = serde_json::json!({
            "error": {
                "type": self.error_type(),
                "message": self.client_message(),
            }
        });

        (status, Json(body)).into_response()
    }
}
