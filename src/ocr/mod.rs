//! OCR engine abstraction.
//!
//! Defines the [`OcrEngine`] trait so the pipeline never deals with how text
//! is actually recognized. Engines are selected by configuration: a local
//! Tesseract binary (default) or an HTTP OCR sidecar.

pub mod sidecar;
pub mod tesseract;

#[cfg(test)]
pub mod scripted;

use std::path::Path;
use std::sync::Arc;

use crate::config::ServiceConfig;
use crate::error::OcrError;

pub use sidecar::HttpOcrEngine;
pub use tesseract::TesseractEngine;

/// Async trait implemented by each OCR backend.
#[async_trait::async_trait]
pub trait OcrEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Recognize the text in the image at `path`.
    async fn extract(&self, path: &Path) -> Result<String, OcrError>;

    /// Version string reported by the engine.
    async fn version(&self) -> Result<String, OcrError>;

    async fn is_available(&self) -> bool {
        self.version().await.is_ok()
    }
}

/// Known engine identifiers used for configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OcrEngineKind {
    Tesseract,
    Http,
}

impl OcrEngineKind {
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "tesseract" => Some(Self::Tesseract),
            "http" | "sidecar" => Some(Self::Http),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tesseract => "tesseract",
            Self::Http => "http",
        }
    }
}

/// Build the engine named by the configuration.
pub fn build_engine(config: &ServiceConfig) -> anyhow::Result<Arc<dyn OcrEngine>> {
    let engine: Arc<dyn OcrEngine> = match config.ocr_engine {
        OcrEngineKind::Tesseract => Arc::new(TesseractEngine::from_config(config)),
        OcrEngineKind::Http => Arc::new(HttpOcrEngine::from_config(config)?),
    };
    Ok(engine)
}

/// Collapse engine diagnostics into one short line for error messages.
pub(crate) fn condense(raw: &str) -> String {
    const MAX_LEN: usize = 300;

    let line = raw
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("; ");

    if line.chars().count() > MAX_LEN {
        let mut short: String = line.chars().take(MAX_LEN).collect();
        short.push_str("...");
        short
    } else {
        line
    }
}
