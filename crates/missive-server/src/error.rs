use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use missive_store::StoreError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid message: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Permission(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Persistence(#[from] StoreError),

    #[error("Blob storage error: {0}")]
    Blob(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::Validation(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, self.to_string()),
            ServerError::Permission(_) => (StatusCode::FORBIDDEN, self.to_string()),
            ServerError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            // Storage internals stay out of client responses.
            ServerError::Persistence(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Storage unavailable, try again".to_string(),
            ),
            ServerError::Blob(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Blob storage error".to_string(),
            ),
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
