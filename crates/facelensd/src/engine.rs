use facelens_core::{AnalysisTask, Analyzer, DecodeError, Detection, ModelError, PixelBuffer};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};

const ENGINE_QUEUE_DEPTH: usize = 4;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("image decode failed: {0}")]
    Decode(#[from] DecodeError),
    #[error("inference failed: {0}")]
    Model(#[from] ModelError),
    #[error("models are still loading")]
    NotReady,
    #[error("model loading failed: {0}")]
    LoadFailed(String),
    #[error("engine thread exited")]
    ChannelClosed,
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Model loading state published by the engine thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineStatus {
    Loading,
    Ready,
    Failed(String),
}

/// One analysis job sent from an HTTP handler to the engine thread.
struct EngineRequest {
    path: PathBuf,
    task: AnalysisTask,
    reply: oneshot::Sender<Result<Option<Detection>, EngineError>>,
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    status: watch::Receiver<EngineStatus>,
}

impl EngineHandle {
    pub fn status(&self) -> EngineStatus {
        self.status.borrow().clone()
    }

    /// Wait until loading finishes. Errors if it failed.
    pub async fn wait_ready(&self) -> Result<(), EngineError> {
        let mut status = self.status.clone();
        let settled = status
            .wait_for(|s| *s != EngineStatus::Loading)
            .await
            .map_err(|_| EngineError::ChannelClosed)?
            .clone();
        ready_or_err(settled)
    }

    /// Decode the image at `path` and run `task` on it.
    ///
    /// Rejected immediately unless the models are loaded. `Ok(None)` means no face.
    pub async fn analyze(&self, path: PathBuf, task: AnalysisTask) -> Result<Option<Detection>, EngineError> {
        ready_or_err(self.status())?;

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest {
                path,
                task,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

fn ready_or_err(status: EngineStatus) -> Result<(), EngineError> {
    match status {
        EngineStatus::Ready => Ok(()),
        EngineStatus::Loading => Err(EngineError::NotReady),
        EngineStatus::Failed(message) => Err(EngineError::LoadFailed(message)),
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The thread runs `loader` first and only then starts serving requests.
/// Returns immediately; loading progress is observable through
/// [`EngineHandle::status`] and [`EngineHandle::wait_ready`].
pub fn spawn_engine<A, F>(max_image_pixels: u64, loader: F) -> Result<EngineHandle, EngineError>
where
    A: Analyzer,
    F: FnOnce() -> Result<A, ModelError> + Send + 'static,
{
    let (status_tx, status_rx) = watch::channel(EngineStatus::Loading);
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(ENGINE_QUEUE_DEPTH);

    std::thread::Builder::new()
        .name("facelens-engine".into())
        .spawn(move || {
            let started = Instant::now();
            let mut analyzer = match loader() {
                Ok(analyzer) => analyzer,
                Err(e) => {
                    tracing::error!(error = %e, "model loading failed");
                    status_tx.send_replace(EngineStatus::Failed(e.to_string()));
                    return;
                }
            };
            tracing::info!(elapsed_ms = started.elapsed().as_millis() as u64, "models loaded");
            status_tx.send_replace(EngineStatus::Ready);

            while let Some(req) = rx.blocking_recv() {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    run_analysis(&mut analyzer, &req.path, req.task, max_image_pixels)
                }));
                match outcome {
                    Ok(result) => {
                        // Receiver is gone if the client disconnected
                        let _ = req.reply.send(result);
                    }
                    Err(payload) => {
                        // The analyzer may be left half-updated; stop serving with it.
                        let message = format!("analyzer panicked: {}", panic_message(&*payload));
                        tracing::error!(path = %req.path.display(), "{message}");
                        status_tx.send_replace(EngineStatus::Failed(message.clone()));
                        let _ = req
                            .reply
                            .send(Err(EngineError::Model(ModelError::InferenceFailed(message))));
                        break;
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle {
        tx,
        status: status_rx,
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

fn run_analysis<A: Analyzer>(
    analyzer: &mut A,
    path: &Path,
    task: AnalysisTask,
    max_image_pixels: u64,
) -> Result<Option<Detection>, EngineError> {
    let started = Instant::now();

    let image = PixelBuffer::open(path, max_image_pixels)?;
    tracing::debug!(width = image.width(), height = image.height(), "decoded upload");

    let detection = analyzer.analyze(&image, task)?;
    tracing::info!(
        ?task,
        face_found = detection.is_some(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "analysis complete"
    );

    Ok(detection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use facelens_core::BoundingBox;
    use image::{ImageFormat, Rgb, RgbImage};

    struct FixedAnalyzer;

    impl Analyzer for FixedAnalyzer {
        fn analyze(&mut self, image: &PixelBuffer, _task: AnalysisTask) -> Result<Option<Detection>, ModelError> {
            Ok(Some(Detection::new(BoundingBox {
                x: 0.0,
                y: 0.0,
                width: image.width() as f32,
                height: image.height() as f32,
                confidence: 1.0,
                landmarks: None,
            })))
        }
    }

    fn write_png(dir: &Path) -> PathBuf {
        let path = dir.join("face.png");
        RgbImage::from_pixel(6, 4, Rgb([90, 90, 90]))
            .save_with_format(&path, ImageFormat::Png)
            .unwrap();
        path
    }

    #[tokio::test]
    async fn test_analyze_after_ready() {
        let dir = tempfile::tempdir().unwrap();
        let engine = spawn_engine(u64::MAX, || Ok(FixedAnalyzer)).unwrap();
        engine.wait_ready().await.unwrap();
        assert_eq!(engine.status(), EngineStatus::Ready);

        let detection = engine
            .analyze(write_png(dir.path()), AnalysisTask::Full)
            .await
            .unwrap()
            .expect("face");
        assert_eq!(detection.bbox.width, 6.0);
        assert_eq!(detection.bbox.height, 4.0);
    }

    #[tokio::test]
    async fn test_rejects_while_loading() {
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let engine = spawn_engine(u64::MAX, move || {
            let _ = release_rx.recv();
            Ok(FixedAnalyzer)
        })
        .unwrap();

        assert_eq!(engine.status(), EngineStatus::Loading);
        let err = engine
            .analyze(PathBuf::from("unused.png"), AnalysisTask::AgeOnly)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotReady), "got {err:?}");

        release_tx.send(()).unwrap();
        engine.wait_ready().await.unwrap();
    }

    #[tokio::test]
    async fn test_load_failure_is_reported() {
        let engine = spawn_engine(u64::MAX, || -> Result<FixedAnalyzer, ModelError> {
            Err(ModelError::ModelNotFound("models/det_10g.onnx".into()))
        })
        .unwrap();

        let err = engine.wait_ready().await.unwrap_err();
        assert!(matches!(err, EngineError::LoadFailed(ref m) if m.contains("det_10g.onnx")));

        let err = engine
            .analyze(PathBuf::from("unused.png"), AnalysisTask::Full)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::LoadFailed(_)));
    }

    #[tokio::test]
    async fn test_decode_error_for_non_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"hello").unwrap();

        let engine = spawn_engine(u64::MAX, || Ok(FixedAnalyzer)).unwrap();
        engine.wait_ready().await.unwrap();
        let err = engine.analyze(path, AnalysisTask::Full).await.unwrap_err();
        assert!(matches!(err, EngineError::Decode(_)), "got {err:?}");
    }

    struct PanickingAnalyzer;

    impl Analyzer for PanickingAnalyzer {
        fn analyze(&mut self, _image: &PixelBuffer, _task: AnalysisTask) -> Result<Option<Detection>, ModelError> {
            panic!("tensor shape mismatch");
        }
    }

    #[tokio::test]
    async fn test_analyzer_panic_marks_engine_failed() {
        let dir = tempfile::tempdir().unwrap();
        let engine = spawn_engine(u64::MAX, || Ok(PanickingAnalyzer)).unwrap();
        engine.wait_ready().await.unwrap();

        let err = engine
            .analyze(write_png(dir.path()), AnalysisTask::Full)
            .await
            .unwrap_err();
        assert!(
            matches!(err, EngineError::Model(ModelError::InferenceFailed(ref m)) if m.contains("tensor shape mismatch")),
            "got {err:?}"
        );
        assert!(matches!(engine.status(), EngineStatus::Failed(ref m) if m.contains("panicked")));

        let err = engine
            .analyze(write_png(dir.path()), AnalysisTask::Full)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::LoadFailed(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_pixel_limit_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let engine = spawn_engine(10, || Ok(FixedAnalyzer)).unwrap();
        engine.wait_ready().await.unwrap();
        let err = engine
            .analyze(write_png(dir.path()), AnalysisTask::Full)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Decode(DecodeError::TooLarge { .. })));
    }
}
