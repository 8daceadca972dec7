use crate::config::Config;
use crate::engine::{EngineHandle, EngineStatus};
use crate::error::ApiError;
use crate::response::{AgeResponse, AnalysisResponse, DescriptorResponse, ReadyResponse};
use crate::upload::Upload;
use anyhow::Context;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use facelens_core::{AnalysisTask, Detection};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::Instrument;

#[derive(Clone)]
pub struct AppState {
    engine: EngineHandle,
    upload_dir: Arc<PathBuf>,
}

impl AppState {
    pub fn new(engine: EngineHandle, upload_dir: PathBuf) -> Self {
        Self {
            engine,
            upload_dir: Arc::new(upload_dir),
        }
    }
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/status", get(status_handler))
        .route("/ready", get(ready_handler))
        .route("/analyze", post(analyze_handler))
        .route("/analyze/age", post(age_handler))
        .route("/analyze/descriptor", post(descriptor_handler))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind the listener and serve until Ctrl-C.
pub async fn serve(config: &Config, engine: EngineHandle) -> anyhow::Result<()> {
    let app = router(
        AppState::new(engine, config.upload_dir.clone()),
        config.max_upload_bytes,
    );

    let addr = config.listen_addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "facelensd listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("facelensd shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "cannot listen for Ctrl-C; running until killed");
        std::future::pending::<()>().await;
    }
}

/// GET /status: liveness; never touches the engine.
async fn status_handler() -> &'static str {
    "operational"
}

/// GET /ready: 200 once all models are loaded, 503 otherwise.
async fn ready_handler(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let (code, status, details) = match state.engine.status() {
        EngineStatus::Ready => (StatusCode::OK, "ready", None),
        EngineStatus::Loading => (StatusCode::SERVICE_UNAVAILABLE, "loading", None),
        EngineStatus::Failed(message) => (StatusCode::SERVICE_UNAVAILABLE, "failed", Some(message)),
    };
    (code, Json(ReadyResponse { status, details }))
}

/// POST /analyze: expressions and age of the most confident face.
async fn analyze_handler(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<AnalysisResponse>, ApiError> {
    let detection = run_task(&state, multipart, AnalysisTask::Full).await?;
    Ok(Json(detection.try_into()?))
}

/// POST /analyze/age: age only.
async fn age_handler(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<AgeResponse>, ApiError> {
    let detection = run_task(&state, multipart, AnalysisTask::AgeOnly).await?;
    Ok(Json(detection.try_into()?))
}

/// POST /analyze/descriptor: 512-d face descriptor.
async fn descriptor_handler(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<DescriptorResponse>, ApiError> {
    let detection = run_task(&state, multipart, AnalysisTask::Descriptor).await?;
    Ok(Json(detection.try_into()?))
}

/// Store the upload, run `task` on it, remove the upload.
async fn run_task(
    state: &AppState,
    multipart: Result<Multipart, MultipartRejection>,
    task: AnalysisTask,
) -> Result<Detection, ApiError> {
    let mut multipart = multipart?;
    let upload = Upload::receive(&mut multipart, &state.upload_dir).await?;
    let span = tracing::info_span!("analysis", request_id = %upload.request_id(), ?task, bytes = upload.size());

    let result = state
        .engine
        .analyze(upload.path().to_path_buf(), task)
        .instrument(span)
        .await;
    upload.discard();

    result?.ok_or(ApiError::NoFace)
}
