//! faceprint-core: face identity enrollment and matching engine.
//!
//! Turns a still image into a feature vector through a pluggable
//! detector/extractor pipeline, keeps enrolled identities in a
//! JSON-snapshot-backed gallery, and answers nearest-match queries
//! with a threshold-gated accept decision.

pub mod detector;
pub mod embedder;
pub mod engine;
pub mod extractor;
pub mod matcher;
pub mod store;
pub mod types;

pub use detector::{FaceDetector, FullFrameDetector};
pub use embedder::{EmbedderError, FaceEmbedder};
pub use engine::{Engine, EngineError, IdentitySummary, Recognition};
pub use extractor::{
    EmbeddingExtractor, Extraction, ExtractorError, FeatureExtractor, PatchExtractor,
};
pub use matcher::find_best;
pub use store::{IdentityRecord, IdentityStore, StoreError};
pub use types::{
    DimensionMismatch, FaceRegion, FeatureVector, MatchResult, ModelLoadError, Strategy,
    UnknownStrategy, VectorError,
};
