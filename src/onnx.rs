//! ImageNet classifier backed by a pure-Rust ONNX runtime.
//!
//! Any torchvision-style ImageNet export works (ResNet, MobileNet,
//! EfficientNet) as long as it takes a `1x3x224x224` float input and returns
//! one score per class. Inputs are prepared the torchvision way: resize the
//! shorter side to 256, center crop 224, scale to `[0, 1]` and normalize with
//! the ImageNet mean and standard deviation.

use std::{
    path::{Path, PathBuf},
    time::Instant,
};

use image::{RgbImage, imageops::FilterType};
use tract_onnx::prelude::*;

use crate::{
    classifier::{Classifier, ModelInfo, Prediction},
    normalize::NormalizedImage,
};

const RESIZE_SHORTER_SIDE: u32 = 256;
const CROP_SIZE: u32 = 224;
const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const STD: [f32; 3] = [0.229, 0.224, 0.225];

type RunFn = Box<dyn Fn(TVec<TValue>) -> TractResult<TVec<TValue>> + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum OnnxClassifierError {
    #[error("failed to load model {path}: {message}")]
    Load { path: PathBuf, message: String },
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("top_k {top_k} exceeds the {num_classes} classes of the model")]
    TopKTooLarge { top_k: usize, num_classes: usize },
}

/// Classifier running an ONNX ImageNet model on the CPU.
pub struct OnnxClassifier {
    run: RunFn,
    labels: Vec<String>,
    model_name: String,
    model_path: PathBuf,
}

impl OnnxClassifier {
    /// Loads and optimizes the model at `model_path`.
    ///
    /// Class names are read from `labels_path`, one per line. When that file
    /// is missing, names fall back to `class_{id}`.
    pub fn load(model_path: &Path, labels_path: &Path) -> Result<Self, OnnxClassifierError> {
        let start_time = Instant::now();
        let load_error = |e: TractError| OnnxClassifierError::Load {
            path: model_path.to_path_buf(),
            message: format!("{e:#}"),
        };

        let plan = tract_onnx::onnx()
            .model_for_path(model_path)
            .map_err(load_error)?
            .with_input_fact(
                0,
                f32::fact([1, 3, CROP_SIZE as usize, CROP_SIZE as usize]).into(),
            )
            .map_err(load_error)?
            .into_optimized()
            .map_err(load_error)?
            .into_runnable()
            .map_err(load_error)?;

        let labels = load_labels(labels_path);
        let model_name = model_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "onnx-model".to_string());

        log::info!(
            "Loaded {} from {} in {:?} ({} class names)",
            model_name,
            model_path.display(),
            start_time.elapsed(),
            labels.len()
        );

        Ok(Self {
            run: Box::new(move |inputs| plan.run(inputs)),
            labels,
            model_name,
            model_path: model_path.to_path_buf(),
        })
    }

    fn class_name(&self, class_id: usize) -> String {
        self.labels
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| format!("class_{class_id}"))
    }
}

impl Classifier for OnnxClassifier {
    type Error = OnnxClassifierError;

    fn predict(&self, image: &NormalizedImage, top_k: usize) -> Result<Vec<Prediction>, Self::Error> {
        let input: Tensor = preprocess(image.pixels()).into();
        let outputs = (self.run)(tvec!(input.into()))
            .map_err(|e| OnnxClassifierError::Inference(format!("{e:#}")))?;
        let output = outputs
            .first()
            .ok_or_else(|| OnnxClassifierError::Inference("model produced no outputs".to_string()))?;
        let scores: Vec<f32> = output
            .to_array_view::<f32>()
            .map_err(|e| OnnxClassifierError::Inference(format!("{e:#}")))?
            .iter()
            .copied()
            .collect();

        if top_k > scores.len() {
            return Err(OnnxClassifierError::TopKTooLarge {
                top_k,
                num_classes: scores.len(),
            });
        }

        let probabilities = to_probabilities(scores);
        Ok(top_k_indices(&probabilities, top_k)
            .into_iter()
            .map(|class_id| Prediction {
                class_name: self.class_name(class_id),
                probability: probabilities[class_id],
                class_id: class_id as u32,
            })
            .collect())
    }

    fn model_info(&self) -> ModelInfo {
        let num_classes = if self.labels.is_empty() {
            "1000".to_string()
        } else {
            self.labels.len().to_string()
        };
        ModelInfo::from([
            ("model_name".to_string(), self.model_name.clone()),
            ("framework".to_string(), "tract-onnx".to_string()),
            ("device".to_string(), "cpu".to_string()),
            ("num_classes".to_string(), num_classes),
            ("input_size".to_string(), CROP_SIZE.to_string()),
            (
                "model_path".to_string(),
                self.model_path.display().to_string(),
            ),
        ])
    }
}

fn load_labels(path: &Path) -> Vec<String> {
    match std::fs::read_to_string(path) {
        Ok(contents) => contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect(),
        Err(e) => {
            log::warn!(
                "Failed to load class names from {}: {e}, using numeric names",
                path.display()
            );
            Vec::new()
        }
    }
}

/// Resize, center crop and normalize into a `1x3x224x224` NCHW array.
fn preprocess(image: &RgbImage) -> tract_ndarray::Array4<f32> {
    let (width, height) = image.dimensions();
    let shorter = width.min(height).max(1);
    let scale = |side: u32| -> u32 {
        ((side as u64 * RESIZE_SHORTER_SIDE as u64 + shorter as u64 / 2) / shorter as u64)
            .max(CROP_SIZE as u64) as u32
    };
    let (resized_w, resized_h) = (scale(width), scale(height));
    let resized = image::imageops::resize(image, resized_w, resized_h, FilterType::Triangle);

    let left = (resized_w - CROP_SIZE) / 2;
    let top = (resized_h - CROP_SIZE) / 2;

    tract_ndarray::Array4::from_shape_fn(
        (1, 3, CROP_SIZE as usize, CROP_SIZE as usize),
        |(_, c, y, x)| {
            let pixel = resized.get_pixel(left + x as u32, top + y as u32);
            (pixel[c] as f32 / 255.0 - MEAN[c]) / STD[c]
        },
    )
}

/// Applies softmax unless the scores already form a probability distribution.
fn to_probabilities(scores: Vec<f32>) -> Vec<f32> {
    let sum: f32 = scores.iter().sum();
    let already_normalized =
        scores.iter().all(|s| (0.0..=1.0).contains(s)) && (sum - 1.0).abs() < 1e-3;
    if already_normalized {
        return scores;
    }

    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = scores.iter().map(|s| (s - max).exp()).collect();
    let total: f32 = exps.iter().sum();
    exps.into_iter().map(|e| (e / total).clamp(0.0, 1.0)).collect()
}

/// Indices of the `k` largest values, largest first.
fn top_k_indices(values: &[f32], k: usize) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..values.len()).collect();
    indices.sort_by(|&a, &b| values[b].total_cmp(&values[a]));
    indices.truncate(k);
    indices
}
