//! Request validation, caching and classification.
//!
//! A single request runs a strict linear sequence:
//!
//! ```text
//! validate -> fingerprint -> cache lookup -> hit:  return cached result
//!                                         -> miss: normalize -> infer -> cache store -> return
//! ```
//!
//! Any failing step ends the request with its [`ClassifyError`]. Cache faults
//! are the exception: they are logged and the request continues as a miss.

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::{
    cache::{CacheFault, CacheStats, ResultCache},
    classifier::{Classifier, ModelInfo, PredictionSet},
    config::ServiceConfig,
    engine::{EngineState, InferenceEngine},
    error::ClassifyError,
    fingerprint::{CacheKey, fingerprint},
    metrics::ServiceMetrics,
    normalize::{ImageInput, Normalizer},
};

/// Smallest accepted `top_k`.
pub const MIN_TOP_K: usize = 1;
/// Largest accepted `top_k`.
pub const MAX_TOP_K: usize = 10;
/// `top_k` used when a request does not set one.
pub const DEFAULT_TOP_K: usize = 5;

/// Default maximum number of files in a batch request.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 10;

/// Value stored in the result cache.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CachedResult {
    pub predictions: PredictionSet,
    pub model_info: ModelInfo,
}

/// Result of a single classification.
#[derive(Debug, Clone)]
pub struct Classification {
    pub predictions: PredictionSet,
    pub model_info: ModelInfo,
    /// Wall-clock time of the request. Always zero on a cache hit: the
    /// value reports the cost of computing the result, and a hit computes
    /// nothing.
    pub processing_time: Duration,
    pub cache_hit: bool,
}

/// Outcome of one batch item.
#[derive(Debug)]
pub enum BatchItemOutcome {
    Success {
        predictions: PredictionSet,
        model_info: ModelInfo,
    },
    Failure {
        error: ClassifyError,
    },
}

#[derive(Debug)]
pub struct BatchItem {
    pub file_index: usize,
    pub filename: Option<String>,
    pub outcome: BatchItemOutcome,
}

impl BatchItem {
    /// Returns true when the item was classified.
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, BatchItemOutcome::Success { .. })
    }
}

#[derive(Debug)]
pub struct BatchClassification {
    pub items: Vec<BatchItem>,
    pub total_files: usize,
    pub successful_files: usize,
    pub processing_time: Duration,
}

/// Health snapshot for the `/health` endpoint.
#[derive(Debug, Clone)]
pub struct Health {
    pub model_loaded: bool,
    pub model_info: Option<ModelInfo>,
    pub engine_state: EngineState,
}

/// The classification service: one per process, shared by every request handler.
pub struct ClassificationService<C: Classifier> {
    engine: InferenceEngine<C>,
    cache: ResultCache<CachedResult>,
    normalizer: Normalizer,
    max_batch_size: usize,
    metrics: ServiceMetrics,
    model_name: String,
}

/// Rejects `top_k` values outside `[MIN_TOP_K, MAX_TOP_K]`.
pub fn check_top_k(top_k: usize) -> Result<(), ClassifyError> {
    if !(MIN_TOP_K..=MAX_TOP_K).contains(&top_k) {
        return Err(ClassifyError::InvalidTopK {
            value: top_k,
            min: MIN_TOP_K,
            max: MAX_TOP_K,
        });
    }
    Ok(())
}

impl<C: Classifier> ClassificationService<C> {
    /// Assembles a service from its parts and publishes the model metadata metric.
    pub fn new(
        engine: InferenceEngine<C>,
        cache: ResultCache<CachedResult>,
        normalizer: Normalizer,
        max_batch_size: usize,
        metrics: ServiceMetrics,
    ) -> Self {
        let model_name = engine.classifier().model_name();
        metrics.set_model_info(&engine.classifier().model_info());
        Self {
            engine,
            cache,
            normalizer,
            max_batch_size,
            metrics,
            model_name,
        }
    }

    /// Builds the engine, cache and normalizer from `config`.
    pub fn from_config(
        classifier: C,
        config: &ServiceConfig,
        metrics: ServiceMetrics,
    ) -> std::io::Result<Self> {
        let engine = InferenceEngine::new(classifier, config.inference_workers)?;
        let cache = ResultCache::new(config.cache_max_size, config.cache_ttl);
        let normalizer = Normalizer::new(config.max_upload_bytes, config.max_image_dimension);
        Ok(Self::new(
            engine,
            cache,
            normalizer,
            config.max_batch_size,
            metrics,
        ))
    }

    /// Metrics shared with the HTTP layer.
    pub fn metrics(&self) -> &ServiceMetrics {
        &self.metrics
    }

    /// Upload limits and image normalization settings.
    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    /// Largest accepted batch.
    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    /// Metadata of the loaded model.
    pub fn model_info(&self) -> ModelInfo {
        self.engine.classifier().model_info()
    }

    /// Current state of the inference engine.
    pub fn engine_state(&self) -> EngineState {
        self.engine.state()
    }

    /// Model and engine status for health checks.
    pub fn health(&self) -> Health {
        let model_loaded = self.engine.is_running();
        Health {
            model_loaded,
            model_info: model_loaded.then(|| self.model_info()),
            engine_state: self.engine.state(),
        }
    }

    /// Counters of the result cache.
    pub fn cache_stats(&self) -> Result<CacheStats, CacheFault> {
        self.cache.stats()
    }

    /// Drops every cached result.
    pub fn clear_cache(&self) -> Result<(), CacheFault> {
        self.cache.clear()?;
        self.metrics.set_cache_size(0);
        log::info!("Cache cleared");
        Ok(())
    }

    /// Classifies one upload, serving repeated requests from the cache.
    pub async fn classify(&self, input: ImageInput, top_k: usize) -> Result<Classification, ClassifyError> {
        let start_time = Instant::now();

        check_top_k(top_k)?;
        self.validate(&input)?;
        self.metrics.record_request_params(top_k, input.bytes.len());

        let key = fingerprint(&input.bytes, top_k);
        if let Some(cached) = self.cache_lookup(&key) {
            return Ok(Classification {
                predictions: cached.predictions,
                model_info: cached.model_info,
                processing_time: Duration::ZERO,
                cache_hit: true,
            });
        }

        let predictions = self.run(input, top_k).await?;
        let model_info = self.model_info();
        self.cache_store(
            key,
            CachedResult {
                predictions: predictions.clone(),
                model_info: model_info.clone(),
            },
        );

        Ok(Classification {
            predictions,
            model_info,
            processing_time: start_time.elapsed(),
            cache_hit: false,
        })
    }

    /// Classifies up to `max_batch_size` uploads independently.
    ///
    /// A failing item is reported in place and does not affect the others.
    /// Batches bypass the cache in both directions.
    pub async fn classify_batch(
        &self,
        inputs: Vec<ImageInput>,
        top_k: usize,
    ) -> Result<BatchClassification, ClassifyError> {
        let start_time = Instant::now();

        check_top_k(top_k)?;
        if inputs.is_empty() {
            return Err(ClassifyError::EmptyBatch);
        }
        if inputs.len() > self.max_batch_size {
            return Err(ClassifyError::BatchTooLarge {
                size: inputs.len(),
                limit: self.max_batch_size,
            });
        }

        let total_files = inputs.len();
        let mut items = Vec::with_capacity(total_files);
        for (file_index, input) in inputs.into_iter().enumerate() {
            let filename = input.filename.clone();
            let outcome = match self.classify_uncached(input, top_k).await {
                Ok(predictions) => BatchItemOutcome::Success {
                    predictions,
                    model_info: self.model_info(),
                },
                Err(error) => {
                    log::warn!("Batch item {file_index} failed: {error}");
                    BatchItemOutcome::Failure { error }
                }
            };
            items.push(BatchItem {
                file_index,
                filename,
                outcome,
            });
        }

        let successful_files = items.iter().filter(|item| item.is_success()).count();
        log::info!("Batch classified {successful_files}/{total_files} files");

        Ok(BatchClassification {
            items,
            total_files,
            successful_files,
            processing_time: start_time.elapsed(),
        })
    }

    async fn classify_uncached(&self, input: ImageInput, top_k: usize) -> Result<PredictionSet, ClassifyError> {
        self.validate(&input)?;
        self.metrics.record_request_params(top_k, input.bytes.len());
        self.run(input, top_k).await
    }

    fn validate(&self, input: &ImageInput) -> Result<(), ClassifyError> {
        if !input.has_image_content_type() {
            return Err(ClassifyError::InvalidInput(input.content_type.clone()));
        }
        self.normalizer.check_payload(&input.bytes)
    }

    /// Normalizes the upload and runs it through the engine.
    async fn run(&self, input: ImageInput, top_k: usize) -> Result<PredictionSet, ClassifyError> {
        let normalizer = self.normalizer;
        let bytes = input.bytes;
        let image = tokio::task::spawn_blocking(move || normalizer.normalize(&bytes))
            .await
            .map_err(|e| ClassifyError::Classification(format!("normalization task failed: {e}")))??;

        let start_time = Instant::now();
        let result = self
            .engine
            .infer(image, top_k)
            .await
            .and_then(|output| {
                PredictionSet::new(output.predictions, top_k)
                    .map_err(|e| ClassifyError::Classification(e.to_string()))
            });
        let duration = start_time.elapsed();

        match &result {
            Ok(predictions) => {
                let confidence = predictions.top().map_or(0.0, |p| p.probability);
                self.metrics
                    .record_classification(&self.model_name, duration, confidence, true);
                log::info!(
                    "Classified image with {} (top_k={top_k}, confidence={confidence:.3}, {:?})",
                    self.model_name,
                    duration
                );
            }
            Err(e) => {
                self.metrics
                    .record_classification(&self.model_name, duration, 0.0, false);
                log::error!("Classification with {} failed: {e}", self.model_name);
            }
        }
        result
    }

    fn cache_lookup(&self, key: &CacheKey) -> Option<CachedResult> {
        match self.cache.get(key) {
            Ok(Some(cached)) => {
                log::debug!("Cache hit for key: {}...", key.short());
                self.metrics.record_cache_lookup(true);
                Some(cached)
            }
            Ok(None) => {
                log::debug!("Cache miss for key: {}...", key.short());
                self.metrics.record_cache_lookup(false);
                // a miss may have dropped an expired entry
                if let Ok(size) = self.cache.len() {
                    self.metrics.set_cache_size(size);
                }
                None
            }
            Err(fault) => {
                log::warn!("Cache get failed, treating as miss: {fault}");
                self.metrics.record_cache_lookup(false);
                None
            }
        }
    }

    fn cache_store(&self, key: CacheKey, value: CachedResult) {
        let short = key.short().to_string();
        match self.cache.put(key, value).and_then(|()| self.cache.len()) {
            Ok(size) => {
                self.metrics.set_cache_size(size);
                log::debug!("Cached result for key: {short}... (cache size: {size})");
            }
            Err(fault) => log::warn!("Cache set failed: {fault}"),
        }
    }
}
