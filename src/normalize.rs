use image::{DynamicImage, RgbImage, imageops::FilterType};

use crate::error::ClassifyError;

/// Default upload size limit in bytes.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10_000_000;

/// Default limit for the longest side of a normalized image.
pub const DEFAULT_MAX_DIMENSION: u32 = 1024;

/// Raw upload as received from the transport, not yet validated.
#[derive(Debug, Clone)]
pub struct ImageInput {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    pub filename: Option<String>,
}

impl ImageInput {
    /// Wraps an upload with its declared content type.
    pub fn new(bytes: impl Into<Vec<u8>>, content_type: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            content_type: Some(content_type.into()),
            filename: None,
        }
    }

    /// Attaches the client-side file name.
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// Returns true when the declared content type is an `image/*` type.
    pub fn has_image_content_type(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.trim().to_ascii_lowercase().starts_with("image/"))
    }
}

/// Decoded 8-bit RGB image with non-zero dimensions and a bounded longest side.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedImage {
    pixels: RgbImage,
}

impl NormalizedImage {
    /// Width in pixels, never zero.
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    /// Height in pixels, never zero.
    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// The 8-bit RGB pixel grid.
    pub fn pixels(&self) -> &RgbImage {
        &self.pixels
    }

    /// Size of the decoded pixel buffer in bytes.
    pub fn byte_len(&self) -> usize {
        self.pixels.as_raw().len()
    }
}

/// Validates uploads and turns them into [`NormalizedImage`]s.
#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    max_upload_bytes: usize,
    max_dimension: u32,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_UPLOAD_BYTES, DEFAULT_MAX_DIMENSION)
    }
}

impl Normalizer {
    /// Creates a normalizer with the given upload and dimension limits.
    pub fn new(max_upload_bytes: usize, max_dimension: u32) -> Self {
        Self {
            max_upload_bytes,
            max_dimension: max_dimension.max(1),
        }
    }

    /// Largest accepted upload, in bytes.
    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_bytes
    }

    /// Longest side of a normalized image, in pixels.
    pub fn max_dimension(&self) -> u32 {
        self.max_dimension
    }

    /// Rejects payloads over the size limit without looking at their content.
    pub fn check_payload(&self, raw_bytes: &[u8]) -> Result<(), ClassifyError> {
        if raw_bytes.len() > self.max_upload_bytes {
            return Err(ClassifyError::PayloadTooLarge {
                size: raw_bytes.len(),
                limit: self.max_upload_bytes,
            });
        }
        Ok(())
    }

    /// Decodes, converts to RGB and downscales `raw_bytes`.
    pub fn normalize(&self, raw_bytes: &[u8]) -> Result<NormalizedImage, ClassifyError> {
        self.check_payload(raw_bytes)?;
        let decoded =
            image::load_from_memory(raw_bytes).map_err(|e| ClassifyError::Decode(e.to_string()))?;
        self.normalize_decoded(decoded)
    }

    /// Normalizes an already decoded image.
    pub fn normalize_decoded(&self, decoded: DynamicImage) -> Result<NormalizedImage, ClassifyError> {
        let (width, height) = (decoded.width(), decoded.height());
        if width == 0 || height == 0 {
            return Err(ClassifyError::InvalidDimensions { width, height });
        }

        // palette and grayscale decode into luma/rgba variants; alpha is dropped
        let rgb = match decoded {
            DynamicImage::ImageRgb8(rgb) => rgb,
            other => other.to_rgb8(),
        };

        let longest = width.max(height);
        if longest <= self.max_dimension {
            return Ok(NormalizedImage { pixels: rgb });
        }

        let (new_w, new_h) = scaled_dimensions(width, height, self.max_dimension);
        log::debug!("Downscaling {width}x{height} image to {new_w}x{new_h}");
        let pixels = image::imageops::resize(&rgb, new_w, new_h, FilterType::Triangle);
        Ok(NormalizedImage { pixels })
    }
}

/// Scales `(width, height)` so the longest side equals `max_side`, keeping the aspect ratio.
fn scaled_dimensions(width: u32, height: u32, max_side: u32) -> (u32, u32) {
    let scale = |side: u32, longest: u32| -> u32 {
        let scaled = (side as u64 * max_side as u64 + longest as u64 / 2) / longest as u64;
        (scaled as u32).max(1)
    };
    if width >= height {
        (max_side, scale(height, width))
    } else {
        (scale(width, height), max_side)
    }
}
