//! HTTP surface: health check, single and batch OCR, and pattern extraction.

use std::sync::Arc;

use axum::{
    extract::{multipart::Field, DefaultBodyLimit, Multipart, State},
    response::Json,
    routing::{get, post, MethodRouter},
    Router,
};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::MAX_BATCH_FILES;
use crate::error::{ApiError, ValidationError};
use crate::models::{
    BatchItem, ExtractResponse, ExtractionPattern, ExtractionRequest, HealthResponse, OcrResult,
    PatternExtractResponse, UploadedImage,
};
use crate::patterns::CompiledPatterns;
use crate::pipeline::{BatchEntry, Pipeline};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
}

/// Build the router. Single-file routes accept bodies up to `upload_limit`
/// bytes; the batch route up to `batch_limit`.
pub fn router(state: AppState, upload_limit: usize, batch_limit: usize) -> Router {
    let single = || -> MethodRouter<AppState> { post(extract_single).layer(DefaultBodyLimit::max(upload_limit)) };
    let batch = || -> MethodRouter<AppState> { post(extract_batch).layer(DefaultBodyLimit::max(batch_limit)) };
    let patterns = || -> MethodRouter<AppState> { post(extract_patterns).layer(DefaultBodyLimit::max(upload_limit)) };

    Router::new()
        .route("/", get(health))
        .route("/ocr/", single())
        .route("/ocr", single())
        .route("/ocr/batch/", batch())
        .route("/ocr/batch", batch())
        .route("/extract/", patterns())
        .route("/extract", patterns())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check that also reports OCR engine availability.
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(state.pipeline.health().await.into())
}

/// OCR a single uploaded image (multipart field `file`).
async fn extract_single(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ExtractResponse>, ApiError> {
    let mut upload = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some("file") {
            upload = Some(read_upload(field, state.pipeline.max_file_size()).await?);
            break;
        }
    }
    let upload = upload.ok_or_else(|| ApiError::BadRequest("No file uploaded (expected field 'file')".to_string()))?;

    let extraction = state.pipeline.process(&upload).await?;
    let text = extraction.text?;

    Ok(Json(ExtractResponse {
        filename: extraction.filename,
        saved_as: extraction.saved_as,
        text,
        status: "success".to_string(),
    }))
}

/// OCR every uploaded file; per-item failures are reported inline.
async fn extract_batch(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<Vec<BatchItem>>, ApiError> {
    let max_file_size = state.pipeline.max_file_size();
    let mut entries = Vec::new();
    while let Some(field) = multipart.next_field().await? {
        if field.file_name().is_none() {
            continue;
        }
        if entries.len() == MAX_BATCH_FILES {
            return Err(ApiError::BadRequest(format!(
                "Too many files: at most {} per batch",
                MAX_BATCH_FILES
            )));
        }
        let filename = upload_name(&field);
        match read_upload(field, max_file_size).await {
            Ok(upload) => entries.push(BatchEntry::Upload(upload)),
            // Oversized item: the rest of its field is skipped by next_field.
            Err(ApiError::Validation(e)) => {
                warn!("Rejected {}: {}", filename, e);
                entries.push(BatchEntry::Rejected(OcrResult::failed(filename, None, e)));
            }
            Err(e) => return Err(e),
        }
    }

    if entries.is_empty() {
        return Err(ApiError::BadRequest("No files uploaded".to_string()));
    }

    let results = state.pipeline.process_batch(entries).await;
    Ok(Json(results.into_iter().map(BatchItem::from).collect()))
}

/// OCR one image, then run caller-supplied regex patterns over the text.
async fn extract_patterns(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<PatternExtractResponse>, ApiError> {
    let mut upload = None;
    let mut patterns_raw = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => upload = Some(read_upload(field, state.pipeline.max_file_size()).await?),
            Some("patterns") | Some("extraction_request") => patterns_raw = Some(field.text().await?),
            _ => {}
        }
    }

    let upload = upload.ok_or_else(|| ApiError::BadRequest("No file uploaded (expected field 'file')".to_string()))?;
    let patterns_raw = patterns_raw.ok_or_else(|| ApiError::BadRequest("Missing 'patterns' field".to_string()))?;

    let patterns = parse_patterns(&patterns_raw)?;
    let compiled = CompiledPatterns::compile(&patterns)?;
    info!("Extracting {} patterns from {}", compiled.len(), upload.filename);

    let extraction = state.pipeline.process(&upload).await?;
    let text = extraction.text?;

    Ok(Json(PatternExtractResponse {
        filename: extraction.filename,
        saved_as: extraction.saved_as,
        extracted_info: compiled.extract(&text),
        status: "success".to_string(),
    }))
}

// ============================================================================
// Helper functions
// ============================================================================

fn upload_name(field: &Field<'_>) -> String {
    field
        .file_name()
        .filter(|n| !n.is_empty())
        .unwrap_or("upload")
        .to_string()
}

/// Read a file field chunk by chunk, stopping as soon as it exceeds `max_file_size`.
async fn read_upload(mut field: Field<'_>, max_file_size: usize) -> Result<UploadedImage, ApiError> {
    let filename = upload_name(&field);
    let content_type = field.content_type().map(str::to_string);

    let mut data = Vec::new();
    while let Some(chunk) = field.chunk().await? {
        let size = data.len() + chunk.len();
        if size > max_file_size {
            return Err(ValidationError::FileTooLarge {
                size,
                limit: max_file_size,
            }
            .into());
        }
        data.extend_from_slice(&chunk);
    }

    Ok(UploadedImage::new(filename, content_type, data))
}

/// Accept either `{"patterns": [...]}` or a bare array of patterns.
fn parse_patterns(raw: &str) -> Result<Vec<ExtractionPattern>, ApiError> {
    if let Ok(request) = serde_json::from_str::<ExtractionRequest>(raw) {
        return Ok(request.patterns);
    }
    serde_json::from_str::<Vec<ExtractionPattern>>(raw)
        .map_err(|e| ApiError::BadRequest(format!("Invalid patterns JSON: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::scripted::{corrupt_png, png_with_text, ScriptedEngine};
    use crate::storage::StorageManager;
    use crate::validation::Validator;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use image::ImageFormat;
    use serde_json::Value;
    use std::path::Path;
    use tower::ServiceExt;

    const BOUNDARY: &str = "X-REPORT-OCR-BOUNDARY";

    struct TestApp {
        router: Router,
        engine: Arc<ScriptedEngine>,
        _dir: tempfile::TempDir,
        upload_dir: std::path::PathBuf,
    }

    fn app_with(engine: ScriptedEngine) -> TestApp {
        app_with_limits(engine, 1024 * 1024, 4 * 1024 * 1024)
    }

    /// Per-file limit is 64 KiB; body limits as given.
    fn app_with_limits(engine: ScriptedEngine, upload_limit: usize, batch_limit: usize) -> TestApp {
        let dir = tempfile::tempdir().unwrap();
        let upload_dir = dir.path().join("uploads");
        let engine = Arc::new(engine);
        let pipeline = Pipeline::new(
            Validator::new(vec![ImageFormat::Png], 64 * 1024),
            StorageManager::new(&upload_dir, false),
            engine.clone(),
            2,
        );
        let state = AppState {
            pipeline: Arc::new(pipeline),
        };
        TestApp {
            router: router(state, upload_limit, batch_limit),
            engine,
            _dir: dir,
            upload_dir,
        }
    }

    fn app() -> TestApp {
        app_with(ScriptedEngine::new())
    }

    enum Part<'a> {
        File(&'a str, &'a str, &'a str, &'a [u8]),
        Text(&'a str, &'a str),
    }

    fn multipart_request(uri: &str, parts: &[Part]) -> Request<Body> {
        let mut body = Vec::new();
        for part in parts {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            match part {
                Part::File(name, filename, content_type, data) => {
                    body.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n\
                             Content-Type: {content_type}\r\n\r\n"
                        )
                        .as_bytes(),
                    );
                    body.extend_from_slice(data);
                }
                Part::Text(name, value) => {
                    body.extend_from_slice(
                        format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}").as_bytes(),
                    );
                }
            }
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(Body::from(body))
            .unwrap()
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn file_count(dir: &Path) -> usize {
        std::fs::read_dir(dir).map(|it| it.count()).unwrap_or(0)
    }

    #[tokio::test]
    async fn test_health_healthy() {
        let app = app();
        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let (status, body) = send(&app.router, request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["ocr_engine"], "scripted");
        assert_eq!(body["ocr_engine_version"], "5.3.4");
    }

    #[tokio::test]
    async fn test_health_degraded_is_not_an_error() {
        let app = app_with(ScriptedEngine::unavailable());
        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let (status, body) = send(&app.router, request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "degraded");
        assert!(body["error"].as_str().unwrap().contains("offline"));
        assert!(body.get("ocr_engine_version").is_none());
    }

    #[tokio::test]
    async fn test_single_extract() {
        let app = app();
        let data = png_with_text("Prothrombin Time 12.1 Seconds");
        let request = multipart_request("/ocr/", &[Part::File("file", "report.png", "image/png", &data)]);
        let (status, body) = send(&app.router, request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["filename"], "report.png");
        assert_eq!(body["text"], "Prothrombin Time 12.1 Seconds");
        assert_eq!(body["status"], "success");
        assert!(body["saved_as"].as_str().unwrap().ends_with(".png"));
        assert_eq!(file_count(&app.upload_dir), 0);
    }

    #[tokio::test]
    async fn test_single_rejects_text_renamed_png() {
        let app = app();
        let request = multipart_request(
            "/ocr/",
            &[Part::File("file", "notes.png", "image/png", b"this is not an image")],
        );
        let (status, body) = send(&app.router, request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "validation");
        assert_eq!(file_count(&app.upload_dir), 0);
        assert_eq!(app.engine.calls(), 0);
    }

    #[tokio::test]
    async fn test_single_rejects_empty_and_unsupported() {
        let app = app();

        let request = multipart_request("/ocr/", &[Part::File("file", "scan.png", "image/png", b"")]);
        let (status, body) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "Uploaded file is empty");

        let data = png_with_text("x");
        let request = multipart_request("/ocr/", &[Part::File("file", "scan.pdf", "application/pdf", &data)]);
        let (status, body) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].as_str().unwrap().starts_with("Unsupported file format"));
    }

    #[tokio::test]
    async fn test_single_missing_file_field() {
        let app = app();
        let request = multipart_request("/ocr/", &[Part::Text("note", "hello")]);
        let (status, body) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "request");
    }

    #[tokio::test]
    async fn test_single_ocr_failure() {
        let app = app();
        let data = corrupt_png();
        let request = multipart_request("/ocr/", &[Part::File("file", "scan.png", "image/png", &data)]);
        let (status, body) = send(&app.router, request).await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["kind"], "ocr");
        assert_eq!(file_count(&app.upload_dir), 0);
    }

    #[tokio::test]
    async fn test_batch_preserves_order_and_isolates_failures() {
        let app = app();
        let first = png_with_text("first page");
        let corrupt = corrupt_png();
        let third = png_with_text("third page");
        let request = multipart_request(
            "/ocr/batch/",
            &[
                Part::File("files", "1.png", "image/png", &first),
                Part::File("files", "2.png", "image/png", &corrupt),
                Part::Text("comment", "ignored"),
                Part::File("files", "3.png", "image/png", &third),
            ],
        );
        let (status, body) = send(&app.router, request).await;

        assert_eq!(status, StatusCode::OK);
        let items = body.as_array().unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0]["filename"], "1.png");
        assert_eq!(items[0]["text"], "first page");
        assert!(items[0].get("error").is_none());
        assert_eq!(items[1]["filename"], "2.png");
        assert!(items[1]["error"].as_str().unwrap().contains("could not read"));
        assert_eq!(items[2]["text"], "third page");
        assert_eq!(file_count(&app.upload_dir), 0);
    }

    #[tokio::test]
    async fn test_batch_requires_files() {
        let app = app();
        let request = multipart_request("/ocr/batch/", &[Part::Text("comment", "nothing")]);
        let (status, _) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_pattern_extract() {
        let app = app();
        let data = png_with_text("Haemoglobin 13.2 g/dl\nPCV 41.5 % 40 - 50");
        let patterns = r#"{"patterns": [
            {"name": "hb", "pattern": "Haemoglobin\\s+(\\d+\\.?\\d*)"},
            {"name": "pcv", "pattern": "PCV\\s+(\\d+\\.?\\d*)", "description": "packed cell volume"},
            {"name": "platelets", "pattern": "Platelets\\s+(\\d+)"},
            {"name": "range", "pattern": "(\\d+) - (\\d+)"}
        ]}"#;
        let request = multipart_request(
            "/extract/",
            &[
                Part::Text("patterns", patterns),
                Part::File("file", "report.png", "image/png", &data),
            ],
        );
        let (status, body) = send(&app.router, request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["extracted_info"]["hb"], serde_json::json!(["13.2"]));
        assert_eq!(body["extracted_info"]["pcv"], serde_json::json!(["41.5"]));
        assert_eq!(body["extracted_info"]["platelets"], serde_json::json!([]));
        assert_eq!(body["extracted_info"]["range"], serde_json::json!([["40", "50"]]));
        assert_eq!(file_count(&app.upload_dir), 0);
    }

    #[tokio::test]
    async fn test_pattern_extract_invalid_regex() {
        let app = app();
        let data = png_with_text("anything");
        let request = multipart_request(
            "/extract/",
            &[
                Part::File("file", "report.png", "image/png", &data),
                Part::Text("patterns", r#"[{"name": "broken", "pattern": "(\\d+"}]"#),
            ],
        );
        let (status, body) = send(&app.router, request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].as_str().unwrap().contains("broken"));
        assert_eq!(app.engine.calls(), 0);
        assert_eq!(file_count(&app.upload_dir), 0);
    }

    #[tokio::test]
    async fn test_single_oversized_file_rejected_while_reading() {
        let app = app();
        // Fits the body limit but not the 64 KiB per-file limit.
        let mut data = png_with_text("x");
        data.resize(200 * 1024, b'x');
        let request = multipart_request("/ocr/", &[Part::File("file", "big.png", "image/png", &data)]);
        let (status, body) = send(&app.router, request).await;

        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body["kind"], "validation");
        assert!(body["detail"].as_str().unwrap().contains("65536 bytes"));
        assert_eq!(app.engine.calls(), 0);
        assert_eq!(file_count(&app.upload_dir), 0);
    }

    #[tokio::test]
    async fn test_single_route_body_limit_smaller_than_batch() {
        let app = app_with_limits(ScriptedEngine::new(), 16 * 1024, 4 * 1024 * 1024);
        let mut data = png_with_text("x");
        data.resize(40 * 1024, b' ');

        let request = multipart_request("/ocr/", &[Part::File("file", "big.png", "image/png", &data)]);
        let response = app.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(app.engine.calls(), 0);

        let request = multipart_request("/ocr/batch/", &[Part::File("files", "big.png", "image/png", &data)]);
        let (status, body) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["text"], "x");
    }

    #[tokio::test]
    async fn test_batch_oversized_item_reported_inline() {
        let app = app();
        let mut big = png_with_text("x");
        big.resize(200 * 1024, b'x');
        let small = png_with_text("small page");
        let request = multipart_request(
            "/ocr/batch/",
            &[
                Part::File("files", "big.png", "image/png", &big),
                Part::File("files", "small.png", "image/png", &small),
            ],
        );
        let (status, body) = send(&app.router, request).await;

        assert_eq!(status, StatusCode::OK);
        let items = body.as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["filename"], "big.png");
        assert!(items[0]["error"].as_str().unwrap().contains("exceeds maximum size"));
        assert_eq!(items[1]["text"], "small page");
        assert_eq!(app.engine.calls(), 1);
    }

    #[tokio::test]
    async fn test_storage_failure_is_server_error() {
        let app = app();
        // A regular file where the upload directory should be.
        std::fs::write(&app.upload_dir, b"not a directory").unwrap();

        let data = png_with_text("HB 13.2");
        let request = multipart_request("/ocr/", &[Part::File("file", "report.png", "image/png", &data)]);
        let (status, body) = send(&app.router, request).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["kind"], "storage");
        assert_eq!(app.engine.calls(), 0);
    }

    #[test]
    fn test_parse_patterns_shapes() {
        assert_eq!(parse_patterns(r#"{"patterns": [{"name": "a", "pattern": "x"}]}"#).unwrap().len(), 1);
        assert_eq!(parse_patterns(r#"[{"name": "a", "pattern": "x"}, {"name": "b", "pattern": "y"}]"#).unwrap().len(), 2);
        assert!(parse_patterns("not json").is_err());
    }
}
