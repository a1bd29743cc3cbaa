//! HTTP OCR sidecar engine.
//!
//! Forwards the stored image as multipart to `POST {url}/ocr` and expects
//! `{"text": "..."}` back; `GET {url}/version` answers `{"version": "..."}`.

use std::path::Path;
use std::time::Duration;

use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::info;

use super::{condense, OcrEngine};
use crate::config::ServiceConfig;
use crate::error::OcrError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Deserialize)]
struct SidecarText {
    text: String,
}

#[derive(Debug, Deserialize)]
struct SidecarVersion {
    version: String,
}

pub struct HttpOcrEngine {
    url: String,
    client: reqwest::Client,
}

impl HttpOcrEngine {
    pub fn new(url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            url: url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn from_config(config: &ServiceConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self::new(&config.ocr_sidecar_url, client))
    }

    fn transport_error(&self, e: reqwest::Error) -> OcrError {
        if e.is_connect() || e.is_timeout() {
            OcrError::EngineUnavailable(format!("OCR sidecar at {} unreachable: {}", self.url, e))
        } else {
            OcrError::EngineFailure(format!("OCR sidecar request failed: {}", e))
        }
    }
}

#[async_trait::async_trait]
impl OcrEngine for HttpOcrEngine {
    fn name(&self) -> &str {
        "http"
    }

    async fn extract(&self, path: &Path) -> Result<String, OcrError> {
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| OcrError::EngineFailure(format!("failed to read {:?}: {}", path, e)))?;

        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "upload".to_string());

        let part = Part::bytes(data).file_name(filename);
        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(format!("{}/ocr", self.url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = format!("sidecar returned {}: {}", status, condense(&body));
            return Err(if status.is_client_error() {
                OcrError::UnreadableImage(detail)
            } else {
                OcrError::EngineFailure(detail)
            });
        }

        let body: SidecarText = response
            .json()
            .await
            .map_err(|e| OcrError::EngineFailure(format!("invalid sidecar response: {}", e)))?;

        info!("OCR sidecar extracted {} chars from {:?}", body.text.len(), path);
        Ok(body.text.trim().to_string())
    }

    async fn version(&self) -> Result<String, OcrError> {
        let response = self
            .client
            .get(format!("{}/version", self.url))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(OcrError::EngineUnavailable(format!(
                "OCR sidecar version check returned {}",
                status
            )));
        }

        let body: SidecarVersion = response
            .json()
            .await
            .map_err(|e| OcrError::EngineFailure(format!("invalid sidecar response: {}", e)))?;
        Ok(body.version)
    }
}
