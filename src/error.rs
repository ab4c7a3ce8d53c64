use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Failures along the classification path, one variant per stage.
#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    /// Multipart body missing, empty or unreadable.
    #[error("bad upload: {0}")]
    Upload(String),

    /// Request body exceeded the configured upload limit.
    #[error("upload too large: {0}")]
    PayloadTooLarge(String),

    /// Uploaded bytes are not a parseable audio stream.
    #[error("audio decode error: {0}")]
    Decode(String),

    /// Invalid sample rate or resampler failure.
    #[error("resample error: {0}")]
    Resample(String),

    /// Model rejected the input or produced unusable scores.
    #[error("inference error: {0}")]
    Inference(String),

    /// Model or label table could not be loaded at startup.
    #[error("startup error: {0}")]
    Startup(String),
}

impl ClassifyError {
    pub fn kind(&self) -> &'static str {
        match self {
            ClassifyError::Upload(_) => "bad_upload",
            ClassifyError::PayloadTooLarge(_) => "payload_too_large",
            ClassifyError::Decode(_) => "decode_error",
            ClassifyError::Resample(_) => "resample_error",
            ClassifyError::Inference(_) => "inference_error",
            ClassifyError::Startup(_) => "startup_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ClassifyError::Upload(_) => StatusCode::BAD_REQUEST,
            ClassifyError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ClassifyError::Decode(_) | ClassifyError::Resample(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ClassifyError::Inference(_) | ClassifyError::Startup(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// True when the caller sent something we cannot work with.
    pub fn is_client_error(&self) -> bool {
        self.status().is_client_error()
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: String,
}

impl IntoResponse for ClassifyError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.kind(),
            message: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}
