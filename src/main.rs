//! Report OCR - upload medical report scans and get their text back.

mod config;
mod error;
mod models;
mod ocr;
mod patterns;
mod pipeline;
mod routes;
mod storage;
mod validation;

use std::sync::Arc;

use anyhow::Context;
use config::ServiceConfig;
use pipeline::Pipeline;
use routes::AppState;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "report_ocr=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServiceConfig::from_env()?;
    info!(
        "Config: engine={} upload_dir={:?} max_file_size={} retain_uploads={}",
        config.ocr_engine.as_str(),
        config.upload_dir,
        config.max_file_size,
        config.retain_uploads
    );

    let engine = ocr::build_engine(&config)?;

    // Report engine availability at startup; a missing engine is not fatal.
    match engine.version().await {
        Ok(version) => info!("OCR engine {} available (version: {})", engine.name(), version),
        Err(e) => {
            error!("OCR engine {} not available: {}", engine.name(), e);
            if config.ocr_engine == ocr::OcrEngineKind::Tesseract {
                error!("Tesseract path is set to: {:?}", config.path_to_ocr_engine);
            }
        }
    }

    let pipeline = Pipeline::from_config(&config, engine);
    let upload_dir = pipeline.storage().dir();
    pipeline
        .storage()
        .ensure_dir()
        .await
        .with_context(|| format!("Cannot use upload directory {:?}", upload_dir))?;
    info!("Uploads are written to {:?}", upload_dir);

    let state = AppState {
        pipeline: Arc::new(pipeline),
    };
    let app = routes::router(state, config.upload_body_limit(), config.batch_body_limit());

    // Run server
    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Server listening on http://{}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}
