//! Enrollment and recognition orchestration.
//!
//! One `Engine` owns the extractor, the acceptance threshold, and the
//! snapshot-backed identity gallery. Mutations run as read-modify-write
//! cycles under a single lock: clone the gallery, apply the change, persist
//! the clone, then commit it, so a failed save changes nothing anywhere.

use crate::extractor::{ExtractorError, FeatureExtractor};
use crate::matcher;
use crate::store::{IdentityStore, StoreError};
use crate::types::{FaceRegion, MatchResult, Strategy};
use chrono::{DateTime, Utc};
use image::GrayImage;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// No usable face in the supplied image. Soft; try another frame.
    #[error("no face detected in the supplied image")]
    NoFaceDetected,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Extractor(#[from] ExtractorError),
}

/// Outcome of one recognition call: the decision plus the face region used,
/// when one was found, for overlay rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct Recognition {
    pub result: MatchResult,
    pub region: Option<FaceRegion>,
}

/// Read-only view of one enrolled identity.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentitySummary {
    pub name: String,
    pub samples: usize,
    pub enrolled_at: DateTime<Utc>,
}

/// Identity enrollment and recognition over one snapshot file.
pub struct Engine {
    extractor: Box<dyn FeatureExtractor>,
    store_path: PathBuf,
    threshold: f32,
    store: Mutex<IdentityStore>,
}

impl Engine {
    /// Open the engine over the snapshot at `store_path`, starting with an
    /// empty gallery when the file does not exist yet.
    ///
    /// A corrupt or strategy-mismatched snapshot fails here, at startup,
    /// rather than on first use. `threshold` is in the extractor strategy's
    /// distance units; [`Strategy::default_threshold`] gives the documented
    /// default.
    pub fn open(
        extractor: Box<dyn FeatureExtractor>,
        store_path: impl Into<PathBuf>,
        threshold: f32,
    ) -> Result<Self, EngineError> {
        let store_path = store_path.into();
        let store = IdentityStore::load(&store_path, extractor.strategy())?;
        tracing::info!(
            path = %store_path.display(),
            strategy = %extractor.strategy(),
            identities = store.len(),
            threshold,
            "engine ready"
        );
        Ok(Self { extractor, store_path, threshold, store: Mutex::new(store) })
    }

    pub fn strategy(&self) -> Strategy {
        self.extractor.strategy()
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    /// Number of enrolled identities.
    pub fn identity_count(&self) -> usize {
        self.lock_store().len()
    }

    /// Enroll `name` from one still image, overwriting any previous record.
    ///
    /// Returns the face region used, for caller feedback. No face means
    /// [`EngineError::NoFaceDetected`] with the gallery untouched; a failed
    /// save leaves both the snapshot and the in-memory gallery unchanged.
    pub fn enroll(&self, name: &str, image: &GrayImage) -> Result<FaceRegion, EngineError> {
        let extraction = self
            .extractor
            .extract(image)?
            .ok_or(EngineError::NoFaceDetected)?;

        let mut store = self.lock_store();
        let mut updated = store.clone();
        updated.upsert(name, extraction.vector)?;
        updated.save(&self.store_path)?;
        *store = updated;

        tracing::info!(identity = name, "identity enrolled");
        Ok(extraction.region)
    }

    /// Identify the face in one still image against the enrolled gallery.
    ///
    /// No face yields a no-match result with no region rather than an
    /// error, so per-frame callers simply move on to the next frame.
    pub fn recognize(&self, image: &GrayImage) -> Result<Recognition, EngineError> {
        let Some(extraction) = self.extractor.extract(image)? else {
            tracing::debug!("no face in query image");
            return Ok(Recognition { result: MatchResult::no_match(), region: None });
        };

        let store = self.lock_store();
        let result = matcher::find_best(&store, &extraction.vector, self.threshold);
        Ok(Recognition { result, region: Some(extraction.region) })
    }

    /// Enrolled identities in name order.
    pub fn list(&self) -> Vec<IdentitySummary> {
        self.lock_store()
            .iter()
            .map(|(name, record)| IdentitySummary {
                name: name.clone(),
                samples: record.vectors.len(),
                enrolled_at: record.enrolled_at,
            })
            .collect()
    }

    /// Remove one identity and persist. `Ok(false)` when the name is not
    /// enrolled; nothing is written in that case.
    pub fn remove(&self, name: &str) -> Result<bool, EngineError> {
        let mut store = self.lock_store();
        if store.get(name).is_none() {
            return Ok(false);
        }
        let mut updated = store.clone();
        updated.remove(name);
        updated.save(&self.store_path)?;
        *store = updated;

        tracing::info!(identity = name, "identity removed");
        Ok(true)
    }

    /// The gallery is swapped wholesale under the lock and never left
    /// mid-edit, so a poisoned lock still guards consistent data.
    fn lock_store(&self) -> MutexGuard<'_, IdentityStore> {
        self.store.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::{FaceDetector, FullFrameDetector};
    use crate::embedder::{EmbedderError, FaceEmbedder};
    use crate::extractor::{EmbeddingExtractor, PatchExtractor};
    use crate::types::VectorError;
    use image::{Luma, RgbImage};
    use std::path::PathBuf;
    use tempfile::TempDir;

    struct NoFaceDetector;

    impl FaceDetector for NoFaceDetector {
        fn detect(&self, _image: &GrayImage) -> Vec<FaceRegion> {
            Vec::new()
        }
    }

    struct DownEmbedder;

    impl FaceEmbedder for DownEmbedder {
        fn embed(&self, _face: &RgbImage) -> Result<Vec<f32>, EmbedderError> {
            Err(EmbedderError::Unavailable("bridge offline".into()))
        }
    }

    struct FixedEmbedder(f32);

    impl FaceEmbedder for FixedEmbedder {
        fn embed(&self, _face: &RgbImage) -> Result<Vec<f32>, EmbedderError> {
            Ok(vec![self.0; 128])
        }
    }

    struct NanEmbedder;

    impl FaceEmbedder for NanEmbedder {
        fn embed(&self, _face: &RgbImage) -> Result<Vec<f32>, EmbedderError> {
            let mut values = vec![0.0; 128];
            values[0] = f32::NAN;
            Ok(values)
        }
    }

    fn gradient_face() -> GrayImage {
        GrayImage::from_fn(120, 120, |x, y| Luma([(x + y) as u8]))
    }

    fn inverted_face() -> GrayImage {
        GrayImage::from_fn(120, 120, |x, y| Luma([255u32.saturating_sub(x + y) as u8]))
    }

    fn raw_patch_engine(dir: &TempDir) -> (Engine, PathBuf) {
        let path = dir.path().join("identities.json");
        let engine = Engine::open(
            Box::new(PatchExtractor::new(FullFrameDetector)),
            &path,
            Strategy::RawPatch.default_threshold(),
        )
        .unwrap();
        (engine, path)
    }

    #[test]
    fn test_enroll_then_recognize_accepts() {
        let dir = TempDir::new().unwrap();
        let (engine, _path) = raw_patch_engine(&dir);

        let region = engine.enroll("alice", &gradient_face()).unwrap();
        assert_eq!(region, FaceRegion { x: 0, y: 0, width: 120, height: 120 });

        let recognition = engine.recognize(&gradient_face()).unwrap();
        assert!(recognition.result.accepted);
        assert_eq!(recognition.result.identity.as_deref(), Some("alice"));
        assert_eq!(recognition.result.distance, 0.0);
        assert_eq!(recognition.result.confidence(engine.threshold()), 1.0);
        assert_eq!(recognition.region, Some(region));
    }

    #[test]
    fn test_unknown_face_rejected() {
        let dir = TempDir::new().unwrap();
        let (engine, _path) = raw_patch_engine(&dir);

        engine.enroll("alice", &gradient_face()).unwrap();
        let recognition = engine.recognize(&inverted_face()).unwrap();

        assert!(!recognition.result.accepted);
        assert_eq!(recognition.result.identity, None);
        assert!(recognition.result.distance >= engine.threshold());
    }

    #[test]
    fn test_recognize_against_empty_store() {
        let dir = TempDir::new().unwrap();
        let (engine, _path) = raw_patch_engine(&dir);

        let recognition = engine.recognize(&gradient_face()).unwrap();
        assert!(!recognition.result.accepted);
        assert_eq!(recognition.result.identity, None);
        assert!(recognition.result.distance.is_infinite());
        // A face was still detected, so the region is reported.
        assert!(recognition.region.is_some());
    }

    #[test]
    fn test_no_face_mutates_nothing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("identities.json");
        let engine = Engine::open(
            Box::new(PatchExtractor::new(NoFaceDetector)),
            &path,
            Strategy::RawPatch.default_threshold(),
        )
        .unwrap();

        let err = engine.enroll("alice", &gradient_face()).unwrap_err();
        assert!(matches!(err, EngineError::NoFaceDetected));
        assert!(!path.exists());
        assert_eq!(engine.identity_count(), 0);

        let recognition = engine.recognize(&gradient_face()).unwrap();
        assert_eq!(recognition.result, MatchResult::no_match());
        assert_eq!(recognition.region, None);
    }

    #[test]
    fn test_enroll_twice_keeps_one_record() {
        let dir = TempDir::new().unwrap();
        let (engine, _path) = raw_patch_engine(&dir);

        engine.enroll("alice", &gradient_face()).unwrap();
        engine.enroll("alice", &gradient_face()).unwrap();

        let summaries = engine.list();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].name, "alice");
        assert_eq!(summaries[0].samples, 1);
    }

    #[test]
    fn test_enroll_empty_name_rejected() {
        let dir = TempDir::new().unwrap();
        let (engine, path) = raw_patch_engine(&dir);

        let err = engine.enroll("", &gradient_face()).unwrap_err();
        assert!(matches!(err, EngineError::Store(StoreError::EmptyName)));
        assert!(!path.exists());
    }

    #[test]
    fn test_gallery_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("identities.json");

        {
            let engine = Engine::open(
                Box::new(PatchExtractor::new(FullFrameDetector)),
                &path,
                Strategy::RawPatch.default_threshold(),
            )
            .unwrap();
            engine.enroll("alice", &gradient_face()).unwrap();
        }

        let engine = Engine::open(
            Box::new(PatchExtractor::new(FullFrameDetector)),
            &path,
            Strategy::RawPatch.default_threshold(),
        )
        .unwrap();
        assert_eq!(engine.identity_count(), 1);

        let recognition = engine.recognize(&gradient_face()).unwrap();
        assert!(recognition.result.accepted);
        assert_eq!(recognition.result.identity.as_deref(), Some("alice"));
    }

    #[test]
    fn test_corrupt_snapshot_fails_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("identities.json");
        std::fs::write(&path, b"{not a snapshot").unwrap();

        let result = Engine::open(
            Box::new(PatchExtractor::new(FullFrameDetector)),
            &path,
            Strategy::RawPatch.default_threshold(),
        );
        assert!(matches!(
            result,
            Err(EngineError::Store(StoreError::Corrupt { .. }))
        ));
    }

    #[test]
    fn test_strategy_mismatch_fails_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("identities.json");

        {
            let engine = Engine::open(
                Box::new(PatchExtractor::new(FullFrameDetector)),
                &path,
                Strategy::RawPatch.default_threshold(),
            )
            .unwrap();
            engine.enroll("alice", &gradient_face()).unwrap();
        }

        let result = Engine::open(
            Box::new(EmbeddingExtractor::new(FullFrameDetector, FixedEmbedder(0.5))),
            &path,
            Strategy::DeepEmbedding.default_threshold(),
        );
        assert!(matches!(
            result,
            Err(EngineError::Store(StoreError::StrategyMismatch { .. }))
        ));
    }

    #[test]
    fn test_embedder_outage_fails_enroll_closed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("identities.json");
        let engine = Engine::open(
            Box::new(EmbeddingExtractor::new(FullFrameDetector, DownEmbedder)),
            &path,
            Strategy::DeepEmbedding.default_threshold(),
        )
        .unwrap();

        let err = engine.enroll("alice", &gradient_face()).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Extractor(ExtractorError::EmbeddingUnavailable(_))
        ));
        assert!(!path.exists());
    }

    #[test]
    fn test_non_finite_embedding_fails_enroll_without_write() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("identities.json");
        let engine = Engine::open(
            Box::new(EmbeddingExtractor::new(FullFrameDetector, NanEmbedder)),
            &path,
            Strategy::DeepEmbedding.default_threshold(),
        )
        .unwrap();

        let err = engine.enroll("alice", &gradient_face()).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Extractor(ExtractorError::Vector(VectorError::NonFinite { .. }))
        ));
        assert!(!path.exists());
        assert_eq!(engine.identity_count(), 0);
    }

    #[test]
    fn test_failed_save_leaves_gallery_and_snapshot_intact() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("identities.json");
        let engine = Engine::open(
            Box::new(PatchExtractor::new(FullFrameDetector)),
            &path,
            Strategy::RawPatch.default_threshold(),
        )
        .unwrap();
        engine.enroll("alice", &gradient_face()).unwrap();

        // A directory squatting on the temp sibling makes the next save fail.
        std::fs::create_dir(path.with_extension("tmp")).unwrap();
        let err = engine.enroll("bob", &inverted_face()).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Store(StoreError::Persistence { .. })
        ));

        let names: Vec<String> = engine.list().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["alice"]);

        let on_disk = IdentityStore::load(&path, Strategy::RawPatch).unwrap();
        assert_eq!(on_disk.len(), 1);
        assert!(on_disk.get("alice").is_some());
    }

    #[test]
    fn test_remove_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("identities.json");

        {
            let engine = Engine::open(
                Box::new(PatchExtractor::new(FullFrameDetector)),
                &path,
                Strategy::RawPatch.default_threshold(),
            )
            .unwrap();
            engine.enroll("alice", &gradient_face()).unwrap();
            engine.enroll("bob", &inverted_face()).unwrap();

            assert!(engine.remove("alice").unwrap());
            assert!(!engine.remove("carol").unwrap());
        }

        let engine = Engine::open(
            Box::new(PatchExtractor::new(FullFrameDetector)),
            &path,
            Strategy::RawPatch.default_threshold(),
        )
        .unwrap();
        let summaries = engine.list();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].name, "bob");
    }

    #[test]
    fn test_list_is_name_ordered() {
        let dir = TempDir::new().unwrap();
        let (engine, _path) = raw_patch_engine(&dir);

        engine.enroll("bob", &gradient_face()).unwrap();
        engine.enroll("alice", &inverted_face()).unwrap();

        let names: Vec<String> = engine.list().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["alice", "bob"]);
    }
}
