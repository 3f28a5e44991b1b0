use std::{path::PathBuf, str::FromStr, time::Duration};

use crate::{
    cache::{DEFAULT_MAX_SIZE, DEFAULT_TTL},
    logging::LogFormat,
    normalize::{DEFAULT_MAX_DIMENSION, DEFAULT_MAX_UPLOAD_BYTES},
    pipeline::DEFAULT_MAX_BATCH_SIZE,
};

/// A configuration value that could not be used.
#[derive(Debug, thiserror::Error)]
#[error("invalid value {value:?} for {var}: {reason}")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
    pub reason: String,
}

/// Service settings, read from the environment at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub cache_max_size: usize,
    pub cache_ttl: Duration,
    pub max_upload_bytes: usize,
    pub max_image_dimension: u32,
    pub max_batch_size: usize,
    pub inference_workers: usize,
    pub model_path: PathBuf,
    pub labels_path: PathBuf,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            cache_max_size: DEFAULT_MAX_SIZE,
            cache_ttl: DEFAULT_TTL,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            max_image_dimension: DEFAULT_MAX_DIMENSION,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            inference_workers: 1,
            model_path: PathBuf::from("models/resnet50.onnx"),
            labels_path: PathBuf::from("models/imagenet_classes.txt"),
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
        }
    }
}

impl ServiceConfig {
    /// Reads the configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Reads the configuration through `lookup`, falling back to defaults for unset variables.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let cache_ttl_secs: u64 = positive(&lookup, "CACHE_TTL_SECONDS", defaults.cache_ttl.as_secs())?;

        Ok(Self {
            cache_max_size: positive(&lookup, "CACHE_MAX_SIZE", defaults.cache_max_size)?,
            cache_ttl: Duration::from_secs(cache_ttl_secs),
            max_upload_bytes: positive(&lookup, "MAX_UPLOAD_BYTES", defaults.max_upload_bytes)?,
            max_image_dimension: positive(&lookup, "MAX_IMAGE_DIMENSION", defaults.max_image_dimension)?,
            max_batch_size: positive(&lookup, "MAX_BATCH_SIZE", defaults.max_batch_size)?,
            inference_workers: positive(&lookup, "INFERENCE_WORKERS", defaults.inference_workers)?,
            model_path: lookup("MODEL_PATH").map_or(defaults.model_path, PathBuf::from),
            labels_path: lookup("LABELS_PATH").map_or(defaults.labels_path, PathBuf::from),
            log_level: lookup("LOG_LEVEL").unwrap_or(defaults.log_level),
            log_format: parsed(&lookup, "LOG_FORMAT", defaults.log_format)?,
        })
    }
}

fn parsed<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(value) = lookup(var) else {
        return Ok(default);
    };
    let result = value.trim().parse::<T>();
    match result {
        Ok(parsed) => Ok(parsed),
        Err(e) => Err(ConfigError {
            var,
            reason: e.to_string(),
            value,
        }),
    }
}

fn positive<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + PartialOrd + Default,
    T::Err: std::fmt::Display,
{
    let value = parsed(lookup, var, default)?;
    if value <= T::default() {
        return Err(ConfigError {
            var,
            value: lookup(var).unwrap_or_default(),
            reason: "must be at least 1".to_string(),
        });
    }
    Ok(value)
}
