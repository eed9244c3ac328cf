//! HTTP handlers, one per user action.

pub mod chat;
pub mod documents;
pub mod session;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::index::IndexError;
use crate::session::SessionError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("Document not found: {0}")]
    DocumentNotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("Document '{filename}' is not ready: {reason}")]
    NotReady { filename: String, reason: String },
    #[error("Failed to build index: {0}")]
    Indexing(#[source] IndexError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Page rendering failed: {0}")]
    Render(#[from] minijinja::Error),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Session(_) | ApiError::DocumentNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotReady { .. } => StatusCode::CONFLICT,
            ApiError::Indexing(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Io(_) | ApiError::Render(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.to_string() }));
        (self.status_code(), body).into_response()
    }
}
