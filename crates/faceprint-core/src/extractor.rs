//! Feature derivation from one still image.
//!
//! An extractor runs the detector, crops the primary face region, and
//! normalizes the crop to its strategy's fixed-length vector. "No usable
//! face" is a value (`Ok(None)`), not an error, so per-frame callers can
//! simply try the next frame.

use crate::detector::FaceDetector;
use crate::embedder::{EmbedderError, FaceEmbedder};
use crate::types::{FaceRegion, FeatureVector, Strategy, VectorError, RAW_PATCH_SIDE};
use image::{imageops, GrayImage, RgbImage};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractorError {
    /// The embedding backend errored or went away mid-operation. The
    /// operation fails closed; there is no fallback to the patch metric.
    #[error("embedding backend unavailable: {0}")]
    EmbeddingUnavailable(String),
    /// The embedder returned a malformed vector: wrong length, or values
    /// the snapshot format cannot carry.
    #[error(transparent)]
    Vector(#[from] VectorError),
}

/// A derived feature vector plus the face region it came from, so callers
/// can render overlays without a second detection pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub vector: FeatureVector,
    pub region: FaceRegion,
}

/// Turns a grayscale image into a strategy-specific feature vector.
pub trait FeatureExtractor: Send + Sync {
    /// The strategy this extractor produces vectors for.
    fn strategy(&self) -> Strategy;

    /// Derive a vector from the primary face in `image`.
    ///
    /// `Ok(None)` means no usable face was found. Pure with respect to its
    /// inputs and the injected capabilities.
    fn extract(&self, image: &GrayImage) -> Result<Option<Extraction>, ExtractorError>;
}

/// Raw-normalized-patch strategy: crop the detected region, resize it to
/// 100x100, flatten the intensities to f32. Needs no model capability
/// beyond the detector.
pub struct PatchExtractor<D> {
    detector: D,
}

impl<D: FaceDetector> PatchExtractor<D> {
    pub fn new(detector: D) -> Self {
        Self { detector }
    }
}

impl<D: FaceDetector> FeatureExtractor for PatchExtractor<D> {
    fn strategy(&self) -> Strategy {
        Strategy::RawPatch
    }

    fn extract(&self, image: &GrayImage) -> Result<Option<Extraction>, ExtractorError> {
        let Some(region) = primary_region(&self.detector, image) else {
            return Ok(None);
        };

        let crop =
            imageops::crop_imm(image, region.x, region.y, region.width, region.height).to_image();
        let patch = imageops::resize(
            &crop,
            RAW_PATCH_SIDE,
            RAW_PATCH_SIDE,
            imageops::FilterType::Triangle,
        );
        let values: Vec<f32> = patch.pixels().map(|p| p.0[0] as f32).collect();
        let vector = FeatureVector::new(Strategy::RawPatch, values)?;

        Ok(Some(Extraction { vector, region }))
    }
}

/// Deep-embedding strategy: crop the detected region and hand it to the
/// injected embedding model.
pub struct EmbeddingExtractor<D, E> {
    detector: D,
    embedder: E,
}

impl<D: FaceDetector, E: FaceEmbedder> EmbeddingExtractor<D, E> {
    pub fn new(detector: D, embedder: E) -> Self {
        Self { detector, embedder }
    }
}

impl<D: FaceDetector, E: FaceEmbedder> FeatureExtractor for EmbeddingExtractor<D, E> {
    fn strategy(&self) -> Strategy {
        Strategy::DeepEmbedding
    }

    fn extract(&self, image: &GrayImage) -> Result<Option<Extraction>, ExtractorError> {
        let Some(region) = primary_region(&self.detector, image) else {
            return Ok(None);
        };

        let crop =
            imageops::crop_imm(image, region.x, region.y, region.width, region.height).to_image();
        let face = gray_to_rgb(&crop);

        match self.embedder.embed(&face) {
            Ok(raw) => {
                let vector = FeatureVector::new(Strategy::DeepEmbedding, raw)?;
                Ok(Some(Extraction { vector, region }))
            }
            Err(EmbedderError::NoFaceFound) => {
                tracing::debug!(?region, "embedder found no usable face in crop");
                Ok(None)
            }
            Err(EmbedderError::Unavailable(reason)) => {
                Err(ExtractorError::EmbeddingUnavailable(reason))
            }
        }
    }
}

/// First region in the detector's native order, clipped to the frame.
///
/// A region that clips to nothing counts as no detection.
fn primary_region<D: FaceDetector>(detector: &D, image: &GrayImage) -> Option<FaceRegion> {
    let regions = detector.detect(image);
    let raw = *regions.first()?;
    match raw.clip_to(image.width(), image.height()) {
        Some(region) => Some(region),
        None => {
            tracing::warn!(
                ?raw,
                width = image.width(),
                height = image.height(),
                "detector returned a region outside the frame"
            );
            None
        }
    }
}

/// Grayscale to RGB by replicating the Y channel, the input form embedding
/// models take.
fn gray_to_rgb(gray: &GrayImage) -> RgbImage {
    RgbImage::from_fn(gray.width(), gray.height(), |x, y| {
        let v = gray.get_pixel(x, y).0[0];
        image::Rgb([v, v, v])
    })
}
