use serde::Serialize;

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// Center of the box in image coordinates.
    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// Expression scores for one face. Values are softmax probabilities summing to ~1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Expressions {
    pub neutral: f32,
    pub happy: f32,
    pub surprised: f32,
    pub sad: f32,
    pub angry: f32,
    pub disgusted: f32,
    pub fearful: f32,
    pub contempt: f32,
}

impl Expressions {
    /// Category names in classifier output order.
    pub const LABELS: [&'static str; 8] = [
        "neutral",
        "happy",
        "surprised",
        "sad",
        "angry",
        "disgusted",
        "fearful",
        "contempt",
    ];

    /// Build from probabilities ordered like [`Expressions::LABELS`].
    pub fn from_array(p: [f32; 8]) -> Self {
        Self {
            neutral: p[0],
            happy: p[1],
            surprised: p[2],
            sad: p[3],
            angry: p[4],
            disgusted: p[5],
            fearful: p[6],
            contempt: p[7],
        }
    }

    pub fn to_array(&self) -> [f32; 8] {
        [
            self.neutral,
            self.happy,
            self.surprised,
            self.sad,
            self.angry,
            self.disgusted,
            self.fearful,
            self.contempt,
        ]
    }

    /// `(label, probability)` pairs in classifier order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, f32)> {
        Self::LABELS.into_iter().zip(self.to_array())
    }

    /// Highest-scoring expression.
    pub fn dominant(&self) -> (&'static str, f32) {
        self.iter()
            .fold(("neutral", f32::NEG_INFINITY), |best, (label, p)| {
                if p > best.1 { (label, p) } else { best }
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gender {
    Female,
    Male,
}

/// Age and gender estimate for one face.
#[derive(Debug, Clone, Copy)]
pub struct AgeGender {
    /// Estimated age in years.
    pub age: f32,
    pub gender: Gender,
    /// Probability of `gender` in [0.5, 1].
    pub gender_probability: f32,
}

/// Face descriptor vector (512-dimensional for ArcFace).
#[derive(Debug, Clone)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    /// Compute cosine similarity between two embeddings.
    ///
    /// Returns a value in [-1, 1]. Higher = more similar.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }

    /// Compute Euclidean distance between two embeddings.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// One detected face plus whichever attribute estimates the task computed.
#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub expressions: Option<Expressions>,
    pub age_gender: Option<AgeGender>,
    pub descriptor: Option<Embedding>,
}

impl Detection {
    pub fn new(bbox: BoundingBox) -> Self {
        Self {
            bbox,
            expressions: None,
            age_gender: None,
            descriptor: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_identical() {
        let a = Embedding { values: vec![1.0, 0.0, 0.0], model_version: None };
        let b = Embedding { values: vec![1.0, 0.0, 0.0], model_version: None };
        assert!((a.similarity(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = Embedding { values: vec![1.0, 0.0], model_version: None };
        let b = Embedding { values: vec![0.0, 1.0], model_version: None };
        assert!(a.similarity(&b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        let a = Embedding { values: vec![0.0, 0.0], model_version: None };
        let b = Embedding { values: vec![1.0, 0.0], model_version: None };
        assert_eq!(a.similarity(&b), 0.0);
    }

    #[test]
    fn test_euclidean_distance() {
        let a = Embedding { values: vec![0.0, 0.0], model_version: None };
        let b = Embedding { values: vec![3.0, 4.0], model_version: None };
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_expressions_serialize_as_named_map() {
        let e = Expressions::from_array([0.5, 0.2, 0.1, 0.1, 0.05, 0.05, 0.0, 0.0]);
        let json = serde_json::to_value(e).unwrap();
        let map = json.as_object().unwrap();
        assert_eq!(map.len(), 8);
        for label in Expressions::LABELS {
            assert!(map.contains_key(label), "missing {label}");
        }
        assert!((map["neutral"].as_f64().unwrap() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_expressions_dominant() {
        let e = Expressions::from_array([0.1, 0.1, 0.6, 0.1, 0.05, 0.05, 0.0, 0.0]);
        assert_eq!(e.dominant().0, "surprised");
    }

    #[test]
    fn test_bbox_center() {
        let b = BoundingBox {
            x: 10.0, y: 20.0, width: 40.0, height: 60.0, confidence: 0.9, landmarks: None,
        };
        assert_eq!(b.center(), (30.0, 50.0));
    }
}
