use std::collections::BTreeMap;

use serde::Serialize;

use crate::{
    api::error::ErrorBody,
    cache::CacheStats,
    classifier::{ModelInfo, PredictionSet},
    pipeline::{BatchClassification, BatchItem, BatchItemOutcome, Classification, Health},
};

fn millis(duration: std::time::Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

#[derive(Debug, Serialize)]
pub struct RootResponse {
    pub service: &'static str,
    pub version: &'static str,
    pub endpoints: BTreeMap<&'static str, &'static str>,
}

#[derive(Debug, Serialize)]
pub struct ClassificationResponse {
    pub predictions: PredictionSet,
    pub model_info: ModelInfo,
    pub processing_time_ms: f64,
    pub cache_hit: bool,
}

impl From<Classification> for ClassificationResponse {
    fn from(result: Classification) -> Self {
        Self {
            predictions: result.predictions,
            model_info: result.model_info,
            processing_time_ms: millis(result.processing_time),
            cache_hit: result.cache_hit,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BatchItemResponse {
    pub file_index: usize,
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predictions: Option<PredictionSet>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_info: Option<ModelInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl From<BatchItem> for BatchItemResponse {
    fn from(item: BatchItem) -> Self {
        let (predictions, model_info, error) = match item.outcome {
            BatchItemOutcome::Success {
                predictions,
                model_info,
            } => (Some(predictions), Some(model_info), None),
            BatchItemOutcome::Failure { error } => {
                (None, None, Some(ErrorBody::from_classify(&error)))
            }
        };
        Self {
            file_index: item.file_index,
            filename: item.filename,
            predictions,
            model_info,
            error,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BatchClassificationResponse {
    pub results: Vec<BatchItemResponse>,
    pub total_files: usize,
    pub successful_files: usize,
    pub processing_time_ms: f64,
}

impl From<BatchClassification> for BatchClassificationResponse {
    fn from(batch: BatchClassification) -> Self {
        Self {
            results: batch.items.into_iter().map(Into::into).collect(),
            total_files: batch.total_files,
            successful_files: batch.successful_files,
            processing_time_ms: millis(batch.processing_time),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub model_loaded: bool,
    pub model_info: Option<ModelInfo>,
    pub engine_state: &'static str,
}

impl From<Health> for HealthResponse {
    fn from(health: Health) -> Self {
        Self {
            status: if health.model_loaded {
                "healthy"
            } else {
                "unhealthy"
            },
            model_loaded: health.model_loaded,
            model_info: health.model_info,
            engine_state: health.engine_state.as_str(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CacheStatsResponse {
    #[serde(flatten)]
    pub stats: CacheStats,
    pub hit_rate: f64,
}

impl From<CacheStats> for CacheStatsResponse {
    fn from(stats: CacheStats) -> Self {
        let lookups = stats.hits + stats.misses;
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            stats.hits as f64 / lookups as f64
        };
        Self { stats, hit_rate }
    }
}

#[derive(Debug, Serialize)]
pub struct CacheClearedResponse {
    pub status: &'static str,
}
