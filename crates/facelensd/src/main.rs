use anyhow::{Context, Result};
use facelens_core::FaceAnalyzer;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod error;
mod response;
mod server;
mod upload;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "facelensd starting");

    let config = config::Config::load()?;
    tracing::info!(
        model_dir = %config.model_dir.display(),
        upload_dir = %config.upload_dir.display(),
        max_upload_bytes = config.max_upload_bytes,
        intra_threads = config.intra_threads,
        "configuration loaded"
    );

    std::fs::create_dir_all(&config.upload_dir).with_context(|| {
        format!(
            "failed to create upload directory {}",
            config.upload_dir.display()
        )
    })?;

    let model_dir = config.model_dir.clone();
    let files = config.models.clone();
    let threads = config.intra_threads;
    let engine = engine::spawn_engine(config.max_image_pixels, move || {
        FaceAnalyzer::load(&model_dir, &files, threads)
    })?;

    if config.wait_for_models {
        tracing::info!("waiting for models before accepting connections");
        engine.wait_ready().await?;
    }

    server::serve(&config, engine).await
}
