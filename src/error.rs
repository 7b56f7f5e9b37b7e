//! Top-level `AppError`: unifies the bounded-context errors into the HTTP
//! status/body taxonomy the handlers return.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use tracing::error;

use crate::catalog::error::CatalogError;
use crate::realtime::feed::RealtimeError;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("upstream feed error: {0}")]
    Upstream(#[from] RealtimeError),
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Upstream(_) => {
                error!(error = %self, "request.upstream_failed");
                (StatusCode::SERVICE_UNAVAILABLE, "upstream feed unavailable".to_string())
            }
            AppError::Catalog(_) | AppError::Store(_) | AppError::Internal(_) => {
                error!(error = %self, "request.internal_failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };

        let body = Json(json!({
            "data": null,
            "meta": { "timestamp": chrono::Utc::now().to_rfc3339(), "version": "1.0" },
            "error": message,
        }));

        (status, body).into_response()
    }
}
