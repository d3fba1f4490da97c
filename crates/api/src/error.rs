use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Thin adapter error: every handler collapses whatever its call into
/// `store`/`task-core` returned into one of these, then into a bare status
/// code. The façade carries no error kind of its own beyond "not found",
/// "bad request" and "store failed".
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("task not found")]
    NotFound,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("store error: {0}")]
    Store(#[from] store::StoreError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Store(_) | ApiError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}
