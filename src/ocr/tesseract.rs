//! Tesseract engine, run as a child process.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};

use tokio::process::Command;
use tracing::{debug, info};

use super::{condense, OcrEngine};
use crate::config::ServiceConfig;
use crate::error::OcrError;

/// Stderr fragments Tesseract/Leptonica emit when the input cannot be decoded.
const UNREADABLE_MARKERS: &[&str] = &[
    "pixread",
    "cannot be read",
    "image file",
    "unsupported image",
    "findfileformat",
    "unknown format",
    "read error",
    "corrupt",
];

/// Stderr fragments meaning the engine itself is not usable (e.g. missing traineddata).
const UNAVAILABLE_MARKERS: &[&str] = &["failed loading language", "could not initialize tesseract"];

pub struct TesseractEngine {
    binary: PathBuf,
    lang: String,
    psm: Option<u8>,
}

impl TesseractEngine {
    pub fn new(binary: impl Into<PathBuf>, lang: impl Into<String>, psm: Option<u8>) -> Self {
        Self {
            binary: binary.into(),
            lang: lang.into(),
            psm,
        }
    }

    pub fn from_config(config: &ServiceConfig) -> Self {
        Self::new(&config.path_to_ocr_engine, &config.ocr_lang, config.ocr_psm)
    }

    async fn run(&self, args: &[&OsStr]) -> Result<Output, OcrError> {
        Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                    OcrError::EngineUnavailable(format!(
                        "cannot execute {}: {}",
                        self.binary.display(),
                        e
                    ))
                }
                _ => OcrError::EngineFailure(format!(
                    "failed to run {}: {}",
                    self.binary.display(),
                    e
                )),
            })
    }
}

#[async_trait::async_trait]
impl OcrEngine for TesseractEngine {
    fn name(&self) -> &str {
        "tesseract"
    }

    async fn extract(&self, path: &Path) -> Result<String, OcrError> {
        let psm = self.psm.map(|p| p.to_string());
        let mut args = vec![
            path.as_os_str(),
            OsStr::new("stdout"),
            OsStr::new("-l"),
            OsStr::new(&self.lang),
        ];
        if let Some(psm) = psm.as_deref() {
            args.push(OsStr::new("--psm"));
            args.push(OsStr::new(psm));
        }

        debug!("Running {} on {:?}", self.binary.display(), path);
        let output = self.run(&args).await?;
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            return Err(classify_failure(&stderr, output.status.code()));
        }

        if !stderr.trim().is_empty() {
            debug!("tesseract: {}", condense(&stderr));
        }

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        info!("Tesseract extracted {} chars from {:?}", text.len(), path);
        Ok(text)
    }

    async fn version(&self) -> Result<String, OcrError> {
        let output = self.run(&[OsStr::new("--version")]).await?;

        // Tesseract 3.x prints the version banner on stderr, 4.x+ on stdout.
        let combined = format!(
            "{}\n{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );

        if !output.status.success() {
            return Err(OcrError::EngineUnavailable(format!(
                "{} --version exited with {}: {}",
                self.binary.display(),
                output.status,
                condense(&combined)
            )));
        }

        parse_version(&combined).ok_or_else(|| {
            OcrError::EngineFailure(format!("unexpected version output: {}", condense(&combined)))
        })
    }
}

/// Extract `5.3.4` from a banner such as `tesseract 5.3.4\n leptonica-1.84.1 ...`.
fn parse_version(output: &str) -> Option<String> {
    output
        .lines()
        .map(str::trim)
        .find_map(|l| l.strip_prefix("tesseract "))
        .map(|v| v.trim().trim_start_matches('v').to_string())
        .filter(|v| !v.is_empty())
}

fn classify_failure(stderr: &str, code: Option<i32>) -> OcrError {
    let lowered = stderr.to_ascii_lowercase();
    let detail = match condense(stderr) {
        d if d.is_empty() => format!("exit code {:?}", code),
        d => d,
    };

    if UNAVAILABLE_MARKERS.iter().any(|m| lowered.contains(m)) {
        OcrError::EngineUnavailable(detail)
    } else if UNREADABLE_MARKERS.iter().any(|m| lowered.contains(m)) {
        OcrError::UnreadableImage(detail)
    } else {
        OcrError::EngineFailure(detail)
    }
}
