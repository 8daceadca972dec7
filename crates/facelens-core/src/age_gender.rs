//! InsightFace genderage estimator via ONNX Runtime.
//!
//! Input is a 96×96 RGB crop of side 1.5× the longer box edge, centred on the
//! face, with raw 0–255 values. Output is `[female, male, age / 100]`.

use crate::alignment;
use crate::error::ModelError;
use crate::expression::softmax;
use crate::pixels::PixelBuffer;
use crate::session;
use crate::types::{AgeGender, BoundingBox, Gender};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const GENDERAGE_INPUT_SIZE: usize = 96;
const GENDERAGE_CROP_SCALE: f32 = 1.5;
const GENDERAGE_AGE_SCALE: f32 = 100.0;

pub struct AgeGenderEstimator {
    session: Session,
}

impl AgeGenderEstimator {
    pub fn load(model_path: &Path, intra_threads: usize) -> Result<Self, ModelError> {
        let session = session::load(model_path, intra_threads, "genderage")?;
        Ok(Self { session })
    }

    pub fn estimate(&mut self, image: &PixelBuffer, face: &BoundingBox) -> Result<AgeGender, ModelError> {
        let input = preprocess(image, face);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::InferenceFailed(format!("age/gender output: {e}")))?;

        decode_output(raw)
    }
}

fn preprocess(image: &PixelBuffer, face: &BoundingBox) -> Array4<f32> {
    let side = face.width.max(face.height) * GENDERAGE_CROP_SCALE;
    let crop = alignment::crop_square(image, face.center(), side, GENDERAGE_INPUT_SIZE);

    Array4::from_shape_fn((1, 3, GENDERAGE_INPUT_SIZE, GENDERAGE_INPUT_SIZE), |(_, c, y, x)| {
        crop.rgb(x, y)[c] as f32
    })
}

fn decode_output(raw: &[f32]) -> Result<AgeGender, ModelError> {
    let &[female, male, age] = raw else {
        return Err(ModelError::InferenceFailed(format!(
            "expected 3 age/gender values, got {}",
            raw.len()
        )));
    };

    let [p_female, p_male] = softmax([female, male]);
    let (gender, gender_probability) = if p_male > p_female {
        (Gender::Male, p_male)
    } else {
        (Gender::Female, p_female)
    };

    Ok(AgeGender {
        age: (age * GENDERAGE_AGE_SCALE).max(0.0),
        gender,
        gender_probability,
    })
}
