//! Image ingestion pipeline: validate → store → OCR → release.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{error, info, warn};

use crate::config::ServiceConfig;
use crate::error::{ApiError, OcrError};
use crate::models::{HealthStatus, OcrResult, UploadedImage};
use crate::ocr::OcrEngine;
use crate::storage::StorageManager;
use crate::validation::{format_name, Validator};

/// One upload after it went through the engine.
///
/// `text` holds the engine outcome; OCR failures are data, not errors.
#[derive(Debug)]
pub struct Extraction {
    pub filename: String,
    pub saved_as: String,
    pub text: Result<String, OcrError>,
}

impl From<Extraction> for OcrResult {
    fn from(extraction: Extraction) -> Self {
        match extraction.text {
            Ok(text) => OcrResult::extracted(extraction.filename, extraction.saved_as, text),
            Err(e) => OcrResult::failed(extraction.filename, Some(extraction.saved_as), e),
        }
    }
}

/// One item of a batch request.
#[derive(Debug)]
pub enum BatchEntry {
    Upload(UploadedImage),
    /// Rejected while the request body was read; reported as-is.
    Rejected(OcrResult),
}

impl From<UploadedImage> for BatchEntry {
    fn from(upload: UploadedImage) -> Self {
        BatchEntry::Upload(upload)
    }
}

/// Orchestrates the per-upload pipeline and batch aggregation.
pub struct Pipeline {
    validator: Validator,
    storage: StorageManager,
    engine: Arc<dyn OcrEngine>,
    batch_parallelism: usize,
}

impl Pipeline {
    pub fn new(
        validator: Validator,
        storage: StorageManager,
        engine: Arc<dyn OcrEngine>,
        batch_parallelism: usize,
    ) -> Self {
        Self {
            validator,
            storage,
            engine,
            batch_parallelism: batch_parallelism.max(1),
        }
    }

    pub fn from_config(config: &ServiceConfig, engine: Arc<dyn OcrEngine>) -> Self {
        Self::new(
            Validator::new(config.accepted_formats.clone(), config.max_file_size),
            StorageManager::new(&config.upload_dir, config.retain_uploads),
            engine,
            config.batch_parallelism,
        )
    }

    pub fn storage(&self) -> &StorageManager {
        &self.storage
    }

    /// Largest accepted upload, in bytes.
    pub fn max_file_size(&self) -> usize {
        self.validator.max_file_size()
    }

    /// Check the engine. Never fails; an unreachable engine reports degraded.
    pub async fn health(&self) -> HealthStatus {
        let engine = self.engine.name().to_string();
        let version = if self.engine.is_available().await {
            self.engine.version().await
        } else {
            // Unavailable: ask once more for the reason.
            match self.engine.version().await {
                Ok(_) => Err(OcrError::EngineUnavailable(format!("{} reported unavailable", engine))),
                Err(e) => Err(e),
            }
        };

        match version {
            Ok(version) => HealthStatus {
                engine,
                available: true,
                version: Some(version),
                error: None,
            },
            Err(e) => {
                error!("Health check failed: {}", e);
                HealthStatus {
                    engine,
                    available: false,
                    version: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Run one upload through the pipeline.
    ///
    /// Validation and storage failures abort before OCR and are returned as
    /// errors. The stored file is released on every path after `store`.
    pub async fn process(&self, upload: &UploadedImage) -> Result<Extraction, ApiError> {
        info!("Processing file: {} ({} bytes)", upload.filename, upload.data.len());

        let format = self.validator.validate(upload).map_err(|e| {
            warn!("Rejected {}: {}", upload.filename, e);
            e
        })?;

        let stored = self.storage.store(&upload.data, &upload.filename).await?;
        let saved_as = stored.file().file_name();

        let text = self.engine.extract(stored.path()).await;
        match &text {
            Ok(t) => info!(
                "OCR completed for {} ({}, {} chars)",
                upload.filename,
                format_name(format),
                t.len()
            ),
            Err(e) => error!("OCR failed for {}: {}", upload.filename, e),
        }

        self.storage.release(stored).await;

        Ok(Extraction {
            filename: upload.filename.clone(),
            saved_as,
            text,
        })
    }

    /// Process every entry independently, preserving input order.
    ///
    /// A failure in one item never stops the rest; it is reported in that
    /// item's `error`.
    pub async fn process_batch(&self, entries: Vec<BatchEntry>) -> Vec<OcrResult> {
        let total = entries.len();
        info!("Processing batch of {} files (parallelism {})", total, self.batch_parallelism);

        let results: Vec<OcrResult> = stream::iter(entries)
            .map(|entry| async move {
                let upload = match entry {
                    BatchEntry::Upload(upload) => upload,
                    BatchEntry::Rejected(result) => return result,
                };
                match self.process(&upload).await {
                    Ok(extraction) => OcrResult::from(extraction),
                    Err(e) => OcrResult::failed(upload.filename, None, e),
                }
            })
            .buffered(self.batch_parallelism)
            .collect()
            .await;

        let failed = results.iter().filter(|r| !r.success).count();
        info!("Batch complete: {} succeeded, {} failed", total - failed, failed);
        results
    }
}
