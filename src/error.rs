/// Errors produced by the classification pipeline.
///
/// Every variant is either a client error (the request itself is bad) or a
/// server error (the classifier or the engine failed). Cache faults are not
/// part of this taxonomy: the pipeline degrades them to a cache miss.
#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    /// The upload does not declare an image content type.
    #[error("file must be an image, got content type {0:?}")]
    InvalidInput(Option<String>),

    /// The upload exceeds the configured size limit.
    #[error("payload of {size} bytes exceeds the limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    /// The bytes could not be decoded as an image.
    #[error("failed to decode image: {0}")]
    Decode(String),

    /// The decoded image has a zero width or height.
    #[error("invalid image dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    /// `top_k` is outside the accepted range.
    #[error("top_k must be between {min} and {max}, got {value}")]
    InvalidTopK { value: usize, min: usize, max: usize },

    /// A batch request carried no files.
    #[error("batch must contain at least one file")]
    EmptyBatch,

    /// A batch request carried more files than allowed.
    #[error("batch of {size} files exceeds the limit of {limit}")]
    BatchTooLarge { size: usize, limit: usize },

    /// The classifier failed or returned a malformed result.
    #[error("classification failed: {0}")]
    Classification(String),

    /// The inference engine is not accepting work.
    #[error("inference engine unavailable")]
    EngineUnavailable,
}

impl ClassifyError {
    /// Stable machine-readable name of the error category.
    pub fn kind(&self) -> &'static str {
        match self {
            ClassifyError::InvalidInput(_) => "invalid_input",
            ClassifyError::PayloadTooLarge { .. } => "payload_too_large",
            ClassifyError::Decode(_) => "decode_error",
            ClassifyError::InvalidDimensions { .. } => "invalid_dimensions",
            ClassifyError::InvalidTopK { .. } => "invalid_top_k",
            ClassifyError::EmptyBatch => "empty_batch",
            ClassifyError::BatchTooLarge { .. } => "batch_too_large",
            ClassifyError::Classification(_) => "classification_error",
            ClassifyError::EngineUnavailable => "engine_unavailable",
        }
    }

    /// Returns true when the request, not the service, is at fault.
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            ClassifyError::Classification(_) | ClassifyError::EngineUnavailable
        )
    }
}
