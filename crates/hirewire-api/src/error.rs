//! API error taxonomy and its [`axum::response::IntoResponse`] mapping.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::attachment::AttachmentViolation;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Bad or missing identity token.
    #[error("unauthenticated")]
    Unauthenticated,

    /// No application relationship between the two actors. Deliberately
    /// worded and coded like a missing resource so the response never
    /// reveals whether the counterpart id exists at all.
    #[error("no relationship found")]
    Unauthorized,

    #[error("{0}")]
    ValidationFailed(String),

    /// Attachment policy violation, naming the specific constraint.
    #[error(transparent)]
    AttachmentRejected(#[from] AttachmentViolation),

    #[error("{0} not found")]
    NotFound(&'static str),

    /// Persistence or relationship-store call failed. Transient: retrying
    /// the single operation is safe, but no side effect may be assumed to
    /// have been applied.
    #[error("store unavailable")]
    StoreUnavailable(#[source] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::StoreUnavailable(e) = &self {
            error!("store unavailable: {:#}", e);
        }

        let status = match &self {
            ApiError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ApiError::Unauthorized | ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::ValidationFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::AttachmentRejected(_) => StatusCode::BAD_REQUEST,
            ApiError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Store and `spawn_blocking` join failures both collapse into
/// [`ApiError::StoreUnavailable`].
pub(crate) fn store_err(e: impl Into<anyhow::Error>) -> ApiError {
    ApiError::StoreUnavailable(e.into())
}
