//! Error taxonomy for the ingestion pipeline and its HTTP mapping.

use axum::{
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// The upload was rejected before any file was written (client fault).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Uploaded file is empty")]
    EmptyFile,

    #[error("File exceeds maximum size of {limit} bytes ({size} bytes received)")]
    FileTooLarge { size: usize, limit: usize },

    #[error("Unsupported file format: {0}. Accepted formats: {1}")]
    UnsupportedFormat(String, String),

    #[error("File content does not match its declared format: {0}")]
    ContentMismatch(String),

    #[error("Invalid extraction pattern '{name}': {reason}")]
    InvalidPattern { name: String, reason: String },
}

/// The upload could not be written to or removed from the upload directory.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to prepare upload directory {path}: {source}")]
    Directory {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write upload {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove upload {path}: {source}")]
    Remove {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// The OCR engine could not produce text for an otherwise valid upload.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OcrError {
    #[error("OCR engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("OCR engine could not read the image: {0}")]
    UnreadableImage(String),

    #[error("OCR engine failed: {0}")]
    EngineFailure(String),
}

/// Errors surfaced by request handlers.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Ocr(#[from] OcrError),

    #[error("Malformed multipart request: {}", .0.body_text())]
    Multipart(#[from] MultipartError),

    #[error("{0}")]
    BadRequest(String),
}

impl ApiError {
    fn kind(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "validation",
            ApiError::Storage(_) => "storage",
            ApiError::Ocr(_) => "ocr",
            ApiError::Multipart(_) | ApiError::BadRequest(_) => "request",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(ValidationError::FileTooLarge { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Validation(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Ocr(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Multipart(e) => e.status(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "detail": self.to_string(),
            "kind": self.kind(),
        }));

        (status, body).into_response()
    }
}
