//! Request and response types for the OCR endpoints.

use serde::{Deserialize, Serialize};

/// An uploaded file as received from a multipart request.
#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub filename: String,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

impl UploadedImage {
    pub fn new(filename: impl Into<String>, content_type: Option<String>, data: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            content_type,
            data,
        }
    }
}

/// Outcome of running one upload through the pipeline.
///
/// `error` is set when OCR (or, in a batch, validation or storage) failed;
/// `text` is then empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OcrResult {
    pub filename: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saved_as: Option<String>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OcrResult {
    pub fn extracted(filename: impl Into<String>, saved_as: impl Into<String>, text: String) -> Self {
        Self {
            filename: filename.into(),
            text,
            saved_as: Some(saved_as.into()),
            success: true,
            error: None,
        }
    }

    pub fn failed(filename: impl Into<String>, saved_as: Option<String>, error: impl ToString) -> Self {
        Self {
            filename: filename.into(),
            text: String::new(),
            saved_as,
            success: false,
            error: Some(error.to_string()),
        }
    }
}

/// Engine reachability as reported by the health endpoint.
#[derive(Debug, Clone)]
pub struct HealthStatus {
    pub engine: String,
    pub available: bool,
    pub version: Option<String>,
    pub error: Option<String>,
}

/// Body of `GET /`.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub message: String,
    pub status: String,
    pub ocr_engine: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ocr_engine_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<HealthStatus> for HealthResponse {
    fn from(health: HealthStatus) -> Self {
        if health.available {
            Self {
                message: "OCR Image Processing API is running".to_string(),
                status: "healthy".to_string(),
                ocr_engine: health.engine,
                ocr_engine_version: health.version,
                error: None,
            }
        } else {
            Self {
                message: format!(
                    "OCR Image Processing API is running but {} is not available",
                    health.engine
                ),
                status: "degraded".to_string(),
                ocr_engine: health.engine,
                ocr_engine_version: None,
                error: health.error,
            }
        }
    }
}

/// Body of a successful `POST /ocr/`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ExtractResponse {
    pub filename: String,
    pub saved_as: String,
    pub text: String,
    pub status: String,
}

/// One element of the `POST /ocr/batch/` array.
#[derive(Debug, Serialize, Deserialize)]
pub struct BatchItem {
    pub filename: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<OcrResult> for BatchItem {
    fn from(result: OcrResult) -> Self {
        Self {
            filename: result.filename,
            text: result.text,
            error: result.error,
        }
    }
}

/// A named regex to run over extracted text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionPattern {
    pub name: String,
    pub pattern: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// The `patterns` field of `POST /extract/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionRequest {
    pub patterns: Vec<ExtractionPattern>,
}

/// One regex match.
///
/// Serialized as a string for patterns with at most one capture group, and
/// as an array of every group (unmatched groups empty) when there are more.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PatternMatch {
    Text(String),
    Groups(Vec<String>),
}

/// Body of a successful `POST /extract/`.
#[derive(Debug, Serialize, Deserialize)]
pub struct PatternExtractResponse {
    pub filename: String,
    pub saved_as: String,
    pub extracted_info: std::collections::BTreeMap<String, Vec<PatternMatch>>,
    pub status: String,
}
