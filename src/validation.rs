//! Upload validation.
//!
//! Pure checks, run before anything touches the disk: emptiness, size, the
//! filename extension, the declared content type, and finally the leading
//! bytes of the file itself.

use std::path::Path;

use image::ImageFormat;

use crate::error::ValidationError;
use crate::models::UploadedImage;

/// Accept/reject rules built from the service configuration.
#[derive(Debug, Clone)]
pub struct Validator {
    accepted: Vec<ImageFormat>,
    max_file_size: usize,
}

impl Validator {
    pub fn new(accepted: Vec<ImageFormat>, max_file_size: usize) -> Self {
        Self {
            accepted,
            max_file_size,
        }
    }

    pub fn max_file_size(&self) -> usize {
        self.max_file_size
    }

    /// Check an upload, returning the image format it was accepted as.
    pub fn validate(&self, upload: &UploadedImage) -> Result<ImageFormat, ValidationError> {
        if upload.data.is_empty() {
            return Err(ValidationError::EmptyFile);
        }

        if upload.data.len() > self.max_file_size {
            return Err(ValidationError::FileTooLarge {
                size: upload.data.len(),
                limit: self.max_file_size,
            });
        }

        let format = Path::new(&upload.filename)
            .extension()
            .and_then(ImageFormat::from_extension)
            .filter(|f| self.accepted.contains(f))
            .ok_or_else(|| self.unsupported(&upload.filename))?;

        if let Some(content_type) = upload.content_type.as_deref() {
            let essence = content_type
                .split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase();
            if !is_generic_content_type(&essence) && mime_format(&essence) != Some(format) {
                return Err(self.unsupported(&format!("{} ({})", upload.filename, essence)));
            }
        }

        match image::guess_format(&upload.data) {
            Ok(sniffed) if sniffed == format => Ok(format),
            Ok(sniffed) => Err(ValidationError::ContentMismatch(format!(
                "{} is named as {} but contains {}",
                upload.filename,
                format_name(format),
                format_name(sniffed)
            ))),
            Err(_) => Err(ValidationError::ContentMismatch(format!(
                "{} is not a recognizable {} image",
                upload.filename,
                format_name(format)
            ))),
        }
    }

    /// Comma-separated list of accepted format names, for error messages.
    pub fn accepted_names(&self) -> String {
        self.accepted
            .iter()
            .map(|f| format_name(*f))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn unsupported(&self, what: &str) -> ValidationError {
        ValidationError::UnsupportedFormat(what.to_string(), self.accepted_names())
    }
}

/// Content types that say nothing about the format; browsers and curl send these.
fn is_generic_content_type(essence: &str) -> bool {
    matches!(essence, "" | "application/octet-stream" | "binary/octet-stream")
}

fn mime_format(essence: &str) -> Option<ImageFormat> {
    match essence {
        "image/png" => Some(ImageFormat::Png),
        "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(ImageFormat::Jpeg),
        "image/tiff" | "image/tif" => Some(ImageFormat::Tiff),
        "image/bmp" | "image/x-bmp" | "image/x-ms-bmp" => Some(ImageFormat::Bmp),
        "image/gif" => Some(ImageFormat::Gif),
        "image/webp" => Some(ImageFormat::WebP),
        _ => None,
    }
}

/// Formats the service can validate and hand to an OCR engine.
pub const SUPPORTED_FORMATS: [ImageFormat; 6] = [
    ImageFormat::Png,
    ImageFormat::Jpeg,
    ImageFormat::Tiff,
    ImageFormat::Bmp,
    ImageFormat::Gif,
    ImageFormat::WebP,
];

pub fn format_name(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Png => "png",
        ImageFormat::Jpeg => "jpeg",
        ImageFormat::Tiff => "tiff",
        ImageFormat::Bmp => "bmp",
        ImageFormat::Gif => "gif",
        ImageFormat::WebP => "webp",
        _ => "other",
    }
}
