//! Per-endpoint projections of a [`Detection`].

use crate::error::ApiError;
use facelens_core::{Detection, Expressions};
use serde::Serialize;

/// `POST /analyze`
#[derive(Debug, Serialize)]
pub struct AnalysisResponse {
    pub expressions: Expressions,
    pub age: f32,
}

/// `POST /analyze/age`
#[derive(Debug, Serialize)]
pub struct AgeResponse {
    pub age: f32,
}

/// `POST /analyze/descriptor`
#[derive(Debug, Serialize)]
pub struct DescriptorResponse {
    pub descriptor: Vec<f32>,
}

/// `GET /ready`
#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl TryFrom<Detection> for AnalysisResponse {
    type Error = ApiError;

    fn try_from(detection: Detection) -> Result<Self, ApiError> {
        Ok(Self {
            expressions: detection
                .expressions
                .ok_or(ApiError::MissingAttribute("expressions"))?,
            age: detection
                .age_gender
                .ok_or(ApiError::MissingAttribute("age"))?
                .age,
        })
    }
}

impl TryFrom<Detection> for AgeResponse {
    type Error = ApiError;

    fn try_from(detection: Detection) -> Result<Self, ApiError> {
        let age_gender = detection.age_gender.ok_or(ApiError::MissingAttribute("age"))?;
        Ok(Self { age: age_gender.age })
    }
}

impl TryFrom<Detection> for DescriptorResponse {
    type Error = ApiError;

    fn try_from(detection: Detection) -> Result<Self, ApiError> {
        let descriptor = detection
            .descriptor
            .ok_or(ApiError::MissingAttribute("descriptor"))?;
        Ok(Self {
            descriptor: descriptor.values,
        })
    }
}
