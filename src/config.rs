//! Service configuration.
//!
//! Built once at startup from an optional JSON file (`OCR_CONFIG_FILE`) with
//! environment variables layered on top, then handed to each component's
//! constructor. Nothing reads the environment after this point.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::ImageFormat;
use serde::Deserialize;
use tracing::info;

use crate::ocr::OcrEngineKind;
use crate::validation::SUPPORTED_FORMATS;

const DEFAULT_PORT: u16 = 8000;
const DEFAULT_MAX_FILE_SIZE: usize = 10 * 1024 * 1024;

/// Upper bound on files a single batch request may carry; sizes the body limit.
pub const MAX_BATCH_FILES: usize = 32;

/// Multipart framing overhead allowed on top of the raw file bytes.
const MULTIPART_SLACK: usize = 64 * 1024;

/// Runtime configuration shared by every component.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub ocr_engine: OcrEngineKind,
    /// Tesseract binary (name on `PATH` or absolute path).
    pub path_to_ocr_engine: PathBuf,
    pub ocr_lang: String,
    /// Tesseract page segmentation mode, passed as `--psm` when set.
    pub ocr_psm: Option<u8>,
    pub ocr_sidecar_url: String,
    pub upload_dir: PathBuf,
    /// Maximum accepted size of a single upload, in bytes.
    pub max_file_size: usize,
    pub accepted_formats: Vec<ImageFormat>,
    /// Keep stored uploads after processing instead of deleting them.
    pub retain_uploads: bool,
    /// Number of batch items processed at once (1 = sequential).
    pub batch_parallelism: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            ocr_engine: OcrEngineKind::Tesseract,
            path_to_ocr_engine: PathBuf::from("tesseract"),
            ocr_lang: "eng".to_string(),
            ocr_psm: None,
            ocr_sidecar_url: "http://localhost:8884".to_string(),
            upload_dir: PathBuf::from("uploads"),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            accepted_formats: vec![ImageFormat::Png],
            retain_uploads: false,
            batch_parallelism: 1,
        }
    }
}

/// On-disk shape of `OCR_CONFIG_FILE`. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    host: Option<String>,
    port: Option<u16>,
    ocr_engine: Option<String>,
    path_to_ocr_engine: Option<PathBuf>,
    ocr_lang: Option<String>,
    ocr_psm: Option<u8>,
    ocr_sidecar_url: Option<String>,
    upload_dir: Option<PathBuf>,
    max_file_size: Option<usize>,
    accepted_formats: Option<Vec<String>>,
    retain_uploads: Option<bool>,
    batch_parallelism: Option<usize>,
}

impl ServiceConfig {
    /// Load from the process environment (call `dotenvy::dotenv()` first).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path) = lookup("OCR_CONFIG_FILE") {
            let file = ConfigFile::load(Path::new(&path))?;
            config.apply_file(file)?;
            info!("Loaded config file: {}", path);
        }

        config.apply_env(&lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Address string for the TCP listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Request body limit for single-file routes.
    pub fn upload_body_limit(&self) -> usize {
        self.max_file_size.saturating_add(MULTIPART_SLACK)
    }

    /// Request body limit for the batch route: room for a full batch of maximum-size files.
    pub fn batch_body_limit(&self) -> usize {
        self.max_file_size
            .saturating_mul(MAX_BATCH_FILES)
            .saturating_add(MULTIPART_SLACK)
    }

    fn apply_file(&mut self, file: ConfigFile) -> Result<()> {
        if let Some(v) = file.host {
            self.host = v;
        }
        if let Some(v) = file.port {
            self.port = v;
        }
        if let Some(v) = file.ocr_engine {
            self.ocr_engine = parse_engine(&v)?;
        }
        if let Some(v) = file.path_to_ocr_engine {
            self.path_to_ocr_engine = v;
        }
        if let Some(v) = file.ocr_lang {
            self.ocr_lang = v;
        }
        if file.ocr_psm.is_some() {
            self.ocr_psm = file.ocr_psm;
        }
        if let Some(v) = file.ocr_sidecar_url {
            self.ocr_sidecar_url = v;
        }
        if let Some(v) = file.upload_dir {
            self.upload_dir = v;
        }
        if let Some(v) = file.max_file_size {
            self.max_file_size = v;
        }
        if let Some(v) = file.accepted_formats {
            self.accepted_formats = parse_formats(v.iter().map(String::as_str))?;
        }
        if let Some(v) = file.retain_uploads {
            self.retain_uploads = v;
        }
        if let Some(v) = file.batch_parallelism {
            self.batch_parallelism = v;
        }
        Ok(())
    }

    fn apply_env<F>(&mut self, lookup: &F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("HOST") {
            self.host = v;
        }
        if let Some(v) = lookup("PORT") {
            self.port = v.trim().parse().with_context(|| format!("Invalid PORT: {:?}", v))?;
        }
        if let Some(v) = lookup("OCR_ENGINE") {
            self.ocr_engine = parse_engine(&v)?;
        }
        // TESSERACT_PATH is the historical name; PATH_TO_OCR_ENGINE wins if both are set.
        if let Some(v) = lookup("PATH_TO_OCR_ENGINE").or_else(|| lookup("TESSERACT_PATH")) {
            self.path_to_ocr_engine = PathBuf::from(v);
        }
        if let Some(v) = lookup("OCR_LANG") {
            self.ocr_lang = v;
        }
        if let Some(v) = lookup("OCR_PSM") {
            let psm = v.trim().parse().with_context(|| format!("Invalid OCR_PSM: {:?}", v))?;
            self.ocr_psm = Some(psm);
        }
        if let Some(v) = lookup("OCR_SIDECAR_URL") {
            self.ocr_sidecar_url = v;
        }
        if let Some(v) = lookup("UPLOAD_DIR") {
            self.upload_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("MAX_FILE_SIZE") {
            self.max_file_size = v
                .trim()
                .parse()
                .with_context(|| format!("Invalid MAX_FILE_SIZE: {:?}", v))?;
        }
        if let Some(v) = lookup("ACCEPTED_FORMATS") {
            self.accepted_formats = parse_formats(v.split(','))?;
        }
        if let Some(v) = lookup("RETAIN_UPLOADS") {
            self.retain_uploads = parse_bool(&v)
                .with_context(|| format!("Invalid RETAIN_UPLOADS: {:?}", v))?;
        }
        if let Some(v) = lookup("BATCH_PARALLELISM") {
            self.batch_parallelism = v
                .trim()
                .parse()
                .with_context(|| format!("Invalid BATCH_PARALLELISM: {:?}", v))?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.max_file_size == 0 {
            anyhow::bail!("max_file_size must be greater than zero");
        }
        if self.batch_parallelism == 0 {
            anyhow::bail!("batch_parallelism must be at least 1");
        }
        if self.accepted_formats.is_empty() {
            anyhow::bail!("accepted_formats must name at least one image format");
        }
        Ok(())
    }
}

impl ConfigFile {
    fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {:?}", path))?;
        serde_json::from_str(&content).with_context(|| format!("Failed to parse config: {:?}", path))
    }
}

fn parse_engine(value: &str) -> Result<OcrEngineKind> {
    OcrEngineKind::from_name(value.trim())
        .with_context(|| format!("Unknown OCR engine: {:?} (expected tesseract or http)", value))
}

/// Parse format names (`png`, `jpg`, `tiff`, ...) into image formats, skipping blanks.
fn parse_formats<'a, I>(names: I) -> Result<Vec<ImageFormat>>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut formats = Vec::new();
    for name in names {
        let name = name.trim().trim_start_matches('.').to_ascii_lowercase();
        if name.is_empty() {
            continue;
        }
        let format = ImageFormat::from_extension(&name)
            .filter(|f| SUPPORTED_FORMATS.contains(f))
            .with_context(|| format!("Unsupported image format in accepted_formats: {:?}", name))?;
        if !formats.contains(&format) {
            formats.push(format);
        }
    }
    Ok(formats)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
