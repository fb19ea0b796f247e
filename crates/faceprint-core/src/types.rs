use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// --- Strategy constants ---
/// Side length of the normalized face patch, in pixels.
pub const RAW_PATCH_SIDE: u32 = 100;
/// Element count of a raw-patch feature vector (100 x 100 intensities).
pub const RAW_PATCH_DIM: usize = (RAW_PATCH_SIDE * RAW_PATCH_SIDE) as usize;
/// Element count of a deep-embedding feature vector.
pub const DEEP_EMBEDDING_DIM: usize = 128;

/// Default acceptance threshold for [`Strategy::RawPatch`].
///
/// Units: mean squared error between two 10,000-element patches of 0..255
/// grayscale intensities. Identical crops score 0; unrelated portraits
/// typically land an order of magnitude above this value. Treat it as a
/// starting point: measure genuine and impostor pairs on held-out labeled
/// data and move the threshold to an acceptable false-accept rate.
pub const RAW_PATCH_THRESHOLD: f32 = 2000.0;

/// Default acceptance threshold for [`Strategy::DeepEmbedding`].
///
/// Units: Euclidean distance between L2-normalized 128-vectors, so the
/// usable range is [0, 2]. Calibrate the same way as the raw-patch value.
pub const DEEP_EMBEDDING_THRESHOLD: f32 = 0.6;

/// Feature derivation strategy.
///
/// A strategy fixes the vector length, the distance metric, and the default
/// acceptance threshold as one unit. Stores are tagged with the strategy
/// that populated them, so vectors produced under one strategy are never
/// compared under another's metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Grayscale patch resized to 100x100 and flattened, compared by MSE.
    RawPatch,
    /// 128-dimensional semantic embedding, compared by Euclidean distance.
    DeepEmbedding,
}

impl Strategy {
    /// Fixed feature-vector length for this strategy.
    pub fn vector_len(self) -> usize {
        match self {
            Strategy::RawPatch => RAW_PATCH_DIM,
            Strategy::DeepEmbedding => DEEP_EMBEDDING_DIM,
        }
    }

    /// Default acceptance threshold, in this strategy's distance units.
    pub fn default_threshold(self) -> f32 {
        match self {
            Strategy::RawPatch => RAW_PATCH_THRESHOLD,
            Strategy::DeepEmbedding => DEEP_EMBEDDING_THRESHOLD,
        }
    }

    /// Distance between two equal-length vectors under this strategy's
    /// metric: mean squared error for patches, Euclidean for embeddings.
    /// Equal lengths are the caller's contract; debug builds assert it.
    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        debug_assert_eq!(a.len(), b.len(), "vector lengths must match");
        match self {
            Strategy::RawPatch => mean_squared_error(a, b),
            Strategy::DeepEmbedding => euclidean_distance(a, b),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::RawPatch => f.write_str("raw-patch"),
            Strategy::DeepEmbedding => f.write_str("deep-embedding"),
        }
    }
}

/// Strategy name not recognized when parsing configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown strategy {0:?}, expected \"raw-patch\" or \"deep-embedding\"")]
pub struct UnknownStrategy(pub String);

impl FromStr for Strategy {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "raw-patch" => Ok(Strategy::RawPatch),
            "deep-embedding" => Ok(Strategy::DeepEmbedding),
            other => Err(UnknownStrategy(other.to_string())),
        }
    }
}

/// Integer pixel rectangle locating a face within a source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceRegion {
    /// Intersect with a `frame_width` x `frame_height` frame.
    ///
    /// Returns `None` when the region is degenerate or lies entirely
    /// outside the frame.
    pub fn clip_to(self, frame_width: u32, frame_height: u32) -> Option<FaceRegion> {
        if self.x >= frame_width || self.y >= frame_height {
            return None;
        }
        let width = self.width.min(frame_width - self.x);
        let height = self.height.min(frame_height - self.y);
        if width == 0 || height == 0 {
            return None;
        }
        Some(FaceRegion { x: self.x, y: self.y, width, height })
    }
}

/// Vector length does not match what a strategy or an existing store
/// requires.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("dimension mismatch for {strategy}: expected {expected} elements, got {actual}")]
pub struct DimensionMismatch {
    pub strategy: Strategy,
    pub expected: usize,
    pub actual: usize,
}

/// Raw values rejected at [`FeatureVector`] construction.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VectorError {
    #[error(transparent)]
    Dimension(#[from] DimensionMismatch),
    /// JSON has no representation for NaN or infinity; a snapshot holding
    /// one would fail every later load.
    #[error("non-finite value at index {index} in a {strategy} vector")]
    NonFinite { strategy: Strategy, index: usize },
}

/// A capability's backing model or service could not be initialized.
///
/// Returned by detector/embedder constructors so a bad deployment fails at
/// startup, not on the first frame.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("model load failed: {reason}")]
pub struct ModelLoadError {
    pub reason: String,
}

impl ModelLoadError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

/// Fixed-length feature vector derived from one face sample.
///
/// Construction validates the length against the strategy and rejects
/// non-finite values, so a vector of the wrong shape, or one the snapshot
/// format cannot round-trip, can never enter a store or a comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    strategy: Strategy,
    values: Vec<f32>,
}

impl FeatureVector {
    /// Wrap raw values produced under `strategy`.
    ///
    /// Fails when the length does not match the strategy, or when any
    /// value is NaN or infinite. The finiteness check runs here, before a
    /// vector can reach a store, so one bad embedder output can never
    /// overwrite a good snapshot with an unloadable one.
    pub fn new(strategy: Strategy, values: Vec<f32>) -> Result<Self, VectorError> {
        let expected = strategy.vector_len();
        if values.len() != expected {
            return Err(DimensionMismatch { strategy, expected, actual: values.len() }.into());
        }
        if let Some(index) = values.iter().position(|v| !v.is_finite()) {
            return Err(VectorError::NonFinite { strategy, index });
        }
        Ok(Self { strategy, values })
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Distance to `other` under this vector's strategy metric.
    ///
    /// Both vectors must carry the same strategy; the store and the matcher
    /// enforce that before any comparison happens, and debug builds assert
    /// it here.
    pub fn distance(&self, other: &FeatureVector) -> f32 {
        debug_assert_eq!(
            self.strategy, other.strategy,
            "vector strategies must match"
        );
        self.strategy.distance(&self.values, &other.values)
    }
}

/// Outcome of matching one query vector against the identity store.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Accepted identity. `None` when the store is empty, no face was
    /// found, or the best candidate sits at or above the threshold.
    pub identity: Option<String>,
    /// Distance of the best candidate, `f32::INFINITY` when there was
    /// nothing to compare against.
    pub distance: f32,
    /// True iff `distance < threshold` for the best candidate.
    pub accepted: bool,
}

impl MatchResult {
    /// The result used whenever there is no candidate at all.
    pub fn no_match() -> Self {
        Self { identity: None, distance: f32::INFINITY, accepted: false }
    }

    /// Presentation mapping for callers that want larger-is-better:
    /// `max(0, 1 - distance / threshold)`. An exact match scores 1.0 and
    /// anything at or beyond the threshold scores 0.0.
    pub fn confidence(&self, threshold: f32) -> f32 {
        (1.0 - self.distance / threshold).max(0.0)
    }
}

/// Mean squared error: per-element squared difference averaged over the
/// vector length.
fn mean_squared_error(a: &[f32], b: &[f32]) -> f32 {
    let sum: f32 = a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum();
    sum / a.len() as f32
}

/// Euclidean distance between two equal-length vectors.
fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt()
}
