use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::stitching::{StitchFailure, StitchStatus};

#[derive(Error, Debug)]
pub enum AppError {
    /// Malformed or insufficient input.
    #[error("{0}")]
    BadRequest(String),

    /// The request body went over the configured upload limit.
    #[error("{0}")]
    PayloadTooLarge(String),

    /// A served path resolved outside the output directory.
    #[error("Path '{0}' is outside the files directory")]
    PathEscape(String),

    /// Every stitch attempt finished without a panorama.
    #[error("{}", .0.message())]
    Stitch(StitchStatus),

    #[error("{0:#}")]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        AppError::BadRequest(message.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) | AppError::PathEscape(_) => StatusCode::BAD_REQUEST,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Stitch(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StitchFailure> for AppError {
    fn from(failure: StitchFailure) -> Self {
        match failure {
            StitchFailure::Status(status) => AppError::Stitch(status),
            StitchFailure::Engine(err) => AppError::Internal(err),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.to_string();
        if status.is_server_error() {
            tracing::error!(error = %message, "request failed");
        } else {
            tracing::debug!(error = %message, "request rejected");
        }
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}
