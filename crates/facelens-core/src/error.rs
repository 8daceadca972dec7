use thiserror::Error;

/// Errors raised while loading or running one of the ONNX networks.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("model file not found: {0}; place the ONNX file in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face has no landmarks; detector must return landmarks for alignment")]
    NoLandmarks,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}
