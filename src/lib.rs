//! Image classification service with a content-addressed result cache.
//!
//! An upload goes through validation, a SHA-256 fingerprint and a TTL-bounded
//! result cache before it reaches the classifier. Misses are normalized and
//! handed to an [`InferenceEngine`], a small pool of worker threads that owns
//! the model. Any [`Classifier`] implementation can back the service. The
//! bundled one is [`OnnxClassifier`], which runs ImageNet ONNX exports on the
//! CPU.
//!
//! ```no_run
//! use std::{path::Path, sync::Arc};
//!
//! use infernum_classifier::{ClassificationService, OnnxClassifier, ServiceConfig, ServiceMetrics};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ServiceConfig::from_env()?;
//! let classifier = OnnxClassifier::load(&config.model_path, &config.labels_path)?;
//! let service = ClassificationService::from_config(classifier, &config, ServiceMetrics::new()?)?;
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8000").await?;
//! axum::serve(listener, infernum_classifier::router(Arc::new(service))).await?;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod cache;
pub mod classifier;
pub mod config;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod logging;
pub mod metrics;
pub mod normalize;
pub mod onnx;
pub mod pipeline;

#[cfg(test)]
mod testing;

pub use api::router;
pub use cache::{CacheStats, ResultCache};
pub use classifier::{Classifier, ModelInfo, Prediction, PredictionSet};
pub use config::ServiceConfig;
pub use engine::{EngineState, InferenceEngine};
pub use error::ClassifyError;
pub use fingerprint::{CacheKey, fingerprint};
pub use metrics::ServiceMetrics;
pub use normalize::{ImageInput, NormalizedImage, Normalizer};
pub use onnx::OnnxClassifier;
pub use pipeline::{BatchItemOutcome, Classification, ClassificationService};
