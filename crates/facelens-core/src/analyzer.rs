//! Composition of the four networks behind a single `Analyzer` seam.

use crate::age_gender::AgeGenderEstimator;
use crate::detector::FaceDetector;
use crate::error::ModelError;
use crate::expression::ExpressionClassifier;
use crate::pixels::PixelBuffer;
use crate::recognizer::FaceRecognizer;
use crate::types::Detection;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Which attribute networks run on the detected face.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisTask {
    /// Expressions plus age and gender.
    Full,
    /// Age and gender only.
    AgeOnly,
    /// Aligned face descriptor.
    Descriptor,
}

/// Runs face analysis on a decoded image.
///
/// Returns `Ok(None)` when no face is found. Only the highest-confidence face
/// is analyzed.
pub trait Analyzer {
    fn analyze(&mut self, image: &PixelBuffer, task: AnalysisTask) -> Result<Option<Detection>, ModelError>;
}

/// File names of the four networks inside a model directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelFiles {
    pub detector: String,
    pub expression: String,
    pub age_gender: String,
    pub recognizer: String,
}

impl Default for ModelFiles {
    fn default() -> Self {
        Self {
            detector: "det_10g.onnx".into(),
            expression: "emotion-ferplus-8.onnx".into(),
            age_gender: "genderage.onnx".into(),
            recognizer: "w600k_r50.onnx".into(),
        }
    }
}

/// ONNX-backed analyzer owning all four sessions.
pub struct FaceAnalyzer {
    detector: FaceDetector,
    expressions: ExpressionClassifier,
    age_gender: AgeGenderEstimator,
    recognizer: FaceRecognizer,
}

impl FaceAnalyzer {
    /// Load every network from `model_dir`. Fails on the first missing or invalid model.
    pub fn load(model_dir: &Path, files: &ModelFiles, intra_threads: usize) -> Result<Self, ModelError> {
        let path = |name: &str| -> PathBuf { model_dir.join(name) };

        let detector = FaceDetector::load(&path(&files.detector), intra_threads)?;
        let expressions = ExpressionClassifier::load(&path(&files.expression), intra_threads)?;
        let age_gender = AgeGenderEstimator::load(&path(&files.age_gender), intra_threads)?;
        let recognizer = FaceRecognizer::load(&path(&files.recognizer), intra_threads)?;

        Ok(Self {
            detector,
            expressions,
            age_gender,
            recognizer,
        })
    }
}

impl Analyzer for FaceAnalyzer {
    fn analyze(&mut self, image: &PixelBuffer, task: AnalysisTask) -> Result<Option<Detection>, ModelError> {
        let Some(face) = self.detector.detect(image)?.into_iter().next() else {
            tracing::debug!(width = image.width(), height = image.height(), "no face detected");
            return Ok(None);
        };
        tracing::debug!(confidence = face.confidence, ?task, "face selected");

        let mut detection = Detection::new(face);
        match task {
            AnalysisTask::Full => {
                detection.expressions = Some(self.expressions.classify(image, &detection.bbox)?);
                detection.age_gender = Some(self.age_gender.estimate(image, &detection.bbox)?);
            }
            AnalysisTask::AgeOnly => {
                detection.age_gender = Some(self.age_gender.estimate(image, &detection.bbox)?);
            }
            AnalysisTask::Descriptor => {
                detection.descriptor = Some(self.recognizer.extract(image, &detection.bbox)?);
            }
        }

        Ok(Some(detection))
    }
}
