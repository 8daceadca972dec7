//! FER+ expression classifier via ONNX Runtime.
//!
//! The network takes a 64×64 grayscale face crop with raw 0–255 intensities
//! and emits eight unnormalized scores, converted here with a softmax.

use crate::alignment;
use crate::error::ModelError;
use crate::pixels::{self, PixelBuffer};
use crate::session;
use crate::types::{BoundingBox, Expressions};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const FERPLUS_INPUT_SIZE: usize = 64;
const FERPLUS_NUM_CLASSES: usize = 8;
/// Crop side relative to the longer box edge.
const FERPLUS_CROP_SCALE: f32 = 1.1;

pub struct ExpressionClassifier {
    session: Session,
}

impl ExpressionClassifier {
    pub fn load(model_path: &Path, intra_threads: usize) -> Result<Self, ModelError> {
        let session = session::load(model_path, intra_threads, "FER+")?;
        Ok(Self { session })
    }

    /// Classify the expression of the face inside `face`.
    pub fn classify(&mut self, image: &PixelBuffer, face: &BoundingBox) -> Result<Expressions, ModelError> {
        let input = preprocess(image, face);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, logits) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::InferenceFailed(format!("expression scores: {e}")))?;

        let logits: [f32; FERPLUS_NUM_CLASSES] = logits.try_into().map_err(|_| {
            ModelError::InferenceFailed(format!(
                "expected {FERPLUS_NUM_CLASSES} expression scores, got {}",
                logits.len()
            ))
        })?;

        Ok(Expressions::from_array(softmax(logits)))
    }
}

/// Square grayscale crop around the face as a 1×1×64×64 tensor.
fn preprocess(image: &PixelBuffer, face: &BoundingBox) -> Array4<f32> {
    let side = face.width.max(face.height) * FERPLUS_CROP_SCALE;
    let crop = alignment::crop_square(image, face.center(), side, FERPLUS_INPUT_SIZE);

    Array4::from_shape_fn((1, 1, FERPLUS_INPUT_SIZE, FERPLUS_INPUT_SIZE), |(_, _, y, x)| {
        pixels::luma(crop.rgb(x, y))
    })
}

/// Numerically stable softmax.
pub(crate) fn softmax<const N: usize>(logits: [f32; N]) -> [f32; N] {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exp = logits.map(|v| (v - max).exp());
    let sum: f32 = exp.iter().sum();
    exp.map(|v| v / sum)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_softmax_sums_to_one() {
        let p = softmax([1.0, 2.0, 3.0, -1.0, 0.0, 0.5, 4.0, -2.0]);
        let total: f32 = p.iter().sum();
        assert!((total - 1.0).abs() < 1e-5, "sum = {total}");
        assert!(p.iter().all(|&v| v > 0.0));
    }

    #[test]
    fn test_softmax_large_logits_stable() {
        let p = softmax([1000.0, 1000.0]);
        assert!((p[0] - 0.5).abs() < 1e-6);
        assert!(p.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_softmax_preserves_argmax() {
        let p = softmax([0.1, 5.0, 0.2]);
        assert!(p[1] > p[0] && p[1] > p[2]);
    }

    #[test]
    fn test_preprocess_shape_and_raw_intensity() {
        let image = PixelBuffer::from_rgb(100, 100, vec![200; 100 * 100 * 3]).unwrap();
        let face = BoundingBox {
            x: 25.0, y: 25.0, width: 50.0, height: 50.0, confidence: 0.9, landmarks: None,
        };
        let tensor = preprocess(&image, &face);
        assert_eq!(tensor.shape(), &[1, 1, FERPLUS_INPUT_SIZE, FERPLUS_INPUT_SIZE]);
        // Not normalized: FER+ consumes raw intensities
        assert!((tensor[[0, 0, 32, 32]] - 200.0).abs() < 0.5);
    }
}
