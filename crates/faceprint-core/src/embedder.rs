//! Deep-embedding capability boundary.
//!
//! The embedding model is an external service or library injected by the
//! platform; this crate only defines the contract the deep-embedding
//! strategy builds on.

use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbedderError {
    /// The crop contains nothing the model recognizes as a face. A soft
    /// condition, handled like a zero-region detection.
    #[error("no usable face in crop")]
    NoFaceFound,
    /// The backend is unreachable or failed. Operations using it fail
    /// closed; there is no fallback to another metric.
    #[error("embedding backend unavailable: {0}")]
    Unavailable(String),
}

/// Maps a cropped RGB face to a fixed-length semantic feature vector.
///
/// Implementations return exactly [`DEEP_EMBEDDING_DIM`] values; the
/// extractor validates the length before the vector goes anywhere.
///
/// [`DEEP_EMBEDDING_DIM`]: crate::types::DEEP_EMBEDDING_DIM
pub trait FaceEmbedder: Send + Sync {
    fn embed(&self, face: &RgbImage) -> Result<Vec<f32>, EmbedderError>;
}
