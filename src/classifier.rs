use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::normalize::NormalizedImage;

/// Free-form model metadata, e.g. `model_name`, `framework`, `num_classes`.
pub type ModelInfo = BTreeMap<String, String>;

/// A single class prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub class_name: String,
    pub probability: f32,
    pub class_id: u32,
}

/// Reasons a classifier output cannot become a [`PredictionSet`].
#[derive(Debug, thiserror::Error)]
pub enum InvalidPredictions {
    #[error("expected {expected} predictions, classifier returned {got}")]
    TooFew { expected: usize, got: usize },
    #[error("probability {probability} of class {class_id} is outside [0, 1]")]
    ProbabilityOutOfRange { class_id: u32, probability: f32 },
}

/// Predictions sorted by descending probability, exactly `top_k` long.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct PredictionSet(Vec<Prediction>);

impl PredictionSet {
    /// Validates and orders raw classifier output.
    ///
    /// Extra predictions beyond `top_k` are dropped after sorting. Fewer than
    /// `top_k`, or any probability outside `[0, 1]` (NaN included), is an error.
    pub fn new(mut predictions: Vec<Prediction>, top_k: usize) -> Result<Self, InvalidPredictions> {
        if predictions.len() < top_k {
            return Err(InvalidPredictions::TooFew {
                expected: top_k,
                got: predictions.len(),
            });
        }
        if let Some(bad) = predictions
            .iter()
            .find(|p| !(0.0..=1.0).contains(&p.probability))
        {
            return Err(InvalidPredictions::ProbabilityOutOfRange {
                class_id: bad.class_id,
                probability: bad.probability,
            });
        }
        // stable sort keeps the classifier's order for equal probabilities
        predictions.sort_by(|a, b| b.probability.total_cmp(&a.probability));
        predictions.truncate(top_k);
        Ok(Self(predictions))
    }

    /// Predictions, most probable first.
    pub fn as_slice(&self) -> &[Prediction] {
        &self.0
    }

    /// Number of predictions, equal to the requested `top_k`.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true when the set holds no predictions.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The highest-probability prediction.
    pub fn top(&self) -> Option<&Prediction> {
        self.0.first()
    }

    /// Iterates the predictions, most probable first.
    pub fn iter(&self) -> std::slice::Iter<'_, Prediction> {
        self.0.iter()
    }

    /// Consumes the set into its predictions.
    pub fn into_vec(self) -> Vec<Prediction> {
        self.0
    }
}

/// Trait for image classification models served by the pipeline.
///
/// Implementations are loaded once at startup and then shared, read-only,
/// between the inference engine's worker threads. Any synchronization a model
/// needs internally is its own responsibility.
pub trait Classifier: Send + Sync + 'static {
    /// The error type returned when inference fails.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Returns the `top_k` most likely classes for `image`.
    ///
    /// The output does not need to be sorted: the pipeline orders and
    /// validates it before use.
    fn predict(&self, image: &NormalizedImage, top_k: usize) -> Result<Vec<Prediction>, Self::Error>;

    /// Metadata describing the loaded model.
    fn model_info(&self) -> ModelInfo;

    /// Name used to label metrics.
    fn model_name(&self) -> String {
        self.model_info()
            .get("model_name")
            .cloned()
            .unwrap_or_else(|| "unknown".to_string())
    }
}
