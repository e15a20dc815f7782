use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use hearst_auth::AuthError;
use hearst_store::StoreError;

/// The five failure kinds of the HTTP surface, each with its own status.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Malformed(String),

    #[error("session token invalid")]
    Unauthenticated,

    #[error("access denied")]
    Forbidden,

    #[error("not found")]
    NotFound,

    #[error("internal error")]
    Internal,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Malformed(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthenticated | ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => ApiError::NotFound,
            StoreError::InvalidInput(reason) => ApiError::Malformed(reason.to_string()),
            other => {
                tracing::error!(err = %other, "store failure");
                ApiError::Internal
            }
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::SessionMalformed => ApiError::Malformed(err.to_string()),
            _ => ApiError::Unauthenticated,
        }
    }
}
