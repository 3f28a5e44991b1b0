//! Test fixtures shared by the unit tests.

use std::{
    io::Cursor,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

use crate::{
    classifier::{Classifier, ModelInfo, Prediction},
    normalize::{NormalizedImage, Normalizer},
};

const STUB_CLASSES: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StubMode {
    Normal,
    Fail,
    Panic,
    /// Returns probabilities above one.
    Malformed,
}

#[derive(Debug, thiserror::Error)]
#[error("stub failure")]
pub struct StubError;

/// Deterministic classifier deriving scores from the image's mean color.
pub struct StubClassifier {
    mode: StubMode,
    calls: Arc<AtomicUsize>,
}

impl StubClassifier {
    pub fn new() -> Self {
        Self::with_mode(StubMode::Normal)
    }

    pub fn with_mode(mode: StubMode) -> Self {
        Self {
            mode,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Handle to the invocation counter, still readable after the stub moves into an engine.
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

impl Classifier for StubClassifier {
    type Error = StubError;

    fn predict(&self, image: &NormalizedImage, top_k: usize) -> Result<Vec<Prediction>, StubError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            StubMode::Fail => return Err(StubError),
            StubMode::Panic => panic!("stub classifier exploded"),
            StubMode::Malformed => {
                return Ok(vec![
                    Prediction {
                        class_name: "broken".into(),
                        probability: 3.0,
                        class_id: 0,
                    };
                    top_k
                ]);
            }
            StubMode::Normal => {}
        }

        let raw = image.pixels().as_raw();
        let mean = raw.iter().map(|&v| v as u64).sum::<u64>() / raw.len().max(1) as u64;
        let logits: Vec<f32> = (0..STUB_CLASSES)
            .map(|i| ((mean as u32 + i * 37) % 97) as f32 / 10.0)
            .collect();
        let max = logits.iter().cloned().fold(f32::MIN, f32::max);
        let exps: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
        let sum: f32 = exps.iter().sum();

        let mut predictions: Vec<Prediction> = exps
            .iter()
            .enumerate()
            .map(|(i, e)| Prediction {
                class_name: format!("stub_{i}"),
                probability: e / sum,
                class_id: i as u32,
            })
            .collect();
        predictions.sort_by(|a, b| b.probability.total_cmp(&a.probability));
        predictions.truncate(top_k);
        Ok(predictions)
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo::from([
            ("model_name".to_string(), "stub".to_string()),
            ("framework".to_string(), "test".to_string()),
            ("num_classes".to_string(), STUB_CLASSES.to_string()),
        ])
    }
}

pub fn solid_jpeg(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    let image = RgbImage::from_pixel(width, height, Rgb(color));
    encode(&DynamicImage::ImageRgb8(image), ImageFormat::Jpeg)
}

pub fn encode_png(image: &DynamicImage) -> Vec<u8> {
    encode(image, ImageFormat::Png)
}

fn encode(image: &DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut buf = Vec::new();
    image.write_to(&mut Cursor::new(&mut buf), format).unwrap();
    buf
}

pub fn normalized(width: u32, height: u32) -> NormalizedImage {
    Normalizer::default()
        .normalize_decoded(DynamicImage::new_rgb8(width, height))
        .unwrap()
}
