use crate::engine::EngineError;
use crate::upload::UploadError;
use axum::extract::multipart::MultipartRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Every failure a handler can return.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("the uploaded image contains no detectable face")]
    NoFace,
    #[error("analysis result is missing `{0}`")]
    MissingAttribute(&'static str),
    #[error("not a multipart upload: {0}")]
    Rejected(#[from] MultipartRejection),
    #[error(transparent)]
    Upload(#[from] UploadError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// JSON error body: `{"error": ..., "details": ...}`.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub details: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NoFace => StatusCode::NOT_FOUND,
            ApiError::MissingAttribute(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Rejected(rejection) => rejection.status(),
            ApiError::Upload(UploadError::MissingField) => StatusCode::BAD_REQUEST,
            ApiError::Upload(UploadError::Multipart(e)) => e.status(),
            ApiError::Upload(UploadError::Io(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Engine(EngineError::NotReady | EngineError::LoadFailed(_)) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ApiError::Engine(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn title(&self) -> &'static str {
        match self {
            ApiError::NoFace => "No face detected",
            ApiError::Rejected(_)
            | ApiError::Upload(UploadError::MissingField | UploadError::Multipart(_)) => "Invalid upload",
            ApiError::Engine(EngineError::NotReady) => "Models are still loading",
            ApiError::Engine(EngineError::LoadFailed(_)) => "Models unavailable",
            _ => "Error processing image",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self, "request failed");
        } else {
            tracing::debug!(status = status.as_u16(), error = %self, "request rejected");
        }

        let body = ErrorBody {
            error: self.title(),
            details: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
