//! Deterministic in-process engine for tests.
//!
//! Reads the stored file and "recognizes" whatever follows a `TEXT:` marker.
//! Files containing `CORRUPT` fail as unreadable images.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::OcrEngine;
use crate::error::OcrError;

pub const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";

/// PNG-signed bytes that the scripted engine reads back as `text`.
pub fn png_with_text(text: &str) -> Vec<u8> {
    let mut data = PNG_SIGNATURE.to_vec();
    data.extend_from_slice(b"TEXT:");
    data.extend_from_slice(text.as_bytes());
    data
}

/// PNG-signed bytes the scripted engine refuses to read.
pub fn corrupt_png() -> Vec<u8> {
    let mut data = PNG_SIGNATURE.to_vec();
    data.extend_from_slice(b"CORRUPT");
    data
}

pub struct ScriptedEngine {
    version: Option<String>,
    calls: AtomicUsize,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self {
            version: Some("5.3.4".to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    /// An engine whose version check fails, as with a bad binary path.
    pub fn unavailable() -> Self {
        Self {
            version: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of `extract` calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl OcrEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn extract(&self, path: &Path) -> Result<String, OcrError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.version.is_none() {
            return Err(OcrError::EngineUnavailable("scripted engine offline".into()));
        }

        let data = tokio::fs::read(path)
            .await
            .map_err(|e| OcrError::EngineFailure(e.to_string()))?;

        if data.windows(7).any(|w| w == b"CORRUPT") {
            return Err(OcrError::UnreadableImage(format!("{:?} is corrupt", path)));
        }

        let text = data
            .windows(5)
            .position(|w| w == b"TEXT:")
            .map(|i| String::from_utf8_lossy(&data[i + 5..]).trim().to_string())
            .unwrap_or_default();
        Ok(text)
    }

    async fn version(&self) -> Result<String, OcrError> {
        self.version
            .clone()
            .ok_or_else(|| OcrError::EngineUnavailable("scripted engine offline".into()))
    }
}
