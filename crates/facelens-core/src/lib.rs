//! facelens-core: face detection and attribute inference.
//!
//! Uses SCRFD for face detection, FER+ for expression classification,
//! InsightFace genderage for age/gender estimation and ArcFace for face
//! descriptors, all running via ONNX Runtime for CPU inference.

pub mod age_gender;
pub mod alignment;
pub mod analyzer;
pub mod detector;
pub mod error;
pub mod expression;
pub mod pixels;
pub mod recognizer;
pub mod types;

mod session;

pub use analyzer::{AnalysisTask, Analyzer, FaceAnalyzer, ModelFiles};
pub use detector::FaceDetector;
pub use error::ModelError;
pub use pixels::{DecodeError, PixelBuffer};
pub use types::{AgeGender, BoundingBox, Detection, Embedding, Expressions, Gender};

use std::path::PathBuf;

/// Default directory holding the ONNX model files.
///
/// `$XDG_DATA_HOME/facelens/models`, falling back to `~/.local/share/facelens/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facelens")
        .join("models")
}
