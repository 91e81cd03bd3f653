use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Everything a request handler can fail with. Variants map one-to-one onto
/// HTTP status codes in the `ResponseError` impl below; provider failures keep
/// the actionable message produced at the classification boundary.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("file too large: {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("invalid or missing Gemini API key. Check GEMINI_API_KEY in the environment: {0}")]
    ProviderAuth(String),

    #[error("API quota exceeded. Please try again later or upgrade your plan: {0}")]
    ProviderQuota(String),

    #[error("content was blocked by safety filters ({0}); try rephrasing your message")]
    ProviderSafety(String),

    #[error("{0}")]
    ProviderUnavailable(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Validation(_) | ApiError::ProviderSafety(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::ProviderQuota(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::ProviderUnavailable(_) => StatusCode::BAD_GATEWAY,
            ApiError::ProviderAuth(_)
            | ApiError::Storage(_)
            | ApiError::Database(_)
            | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        // Internal detail (SQL, file paths) stays in the logs; clients get a
        // generic message for those variants.
        let message = match self {
            ApiError::Database(e) => {
                error!(error = %e, "database error");
                "internal server error".to_string()
            }
            ApiError::Internal(m) => {
                error!(message = %m, "internal server error");
                "internal server error".to_string()
            }
            ApiError::Storage(m) => {
                error!(message = %m, "storage error");
                "failed to store attachment".to_string()
            }
            other => other.to_string(),
        };

        HttpResponse::build(self.status_code()).json(json!({ "error": message }))
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(e.to_string())
    }
}
