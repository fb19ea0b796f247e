//! Durable identity snapshot.
//!
//! Every enrolled identity lives in one JSON document, rewritten in full
//! after each mutation. Writes land in a temp sibling first and are renamed
//! over the final path, so readers never observe a torn snapshot and a
//! failed write leaves the previous one intact.

use crate::types::{DimensionMismatch, FeatureVector, Strategy};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Snapshot schema version this build reads and writes.
const SNAPSHOT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum StoreError {
    /// Snapshot exists but cannot be read or validated. Never treated as an
    /// empty store; requires operator intervention or an explicit reset.
    #[error("corrupt identity snapshot at {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
    /// Snapshot was written under a different extraction strategy.
    #[error("snapshot at {path} was built with strategy {found}, configured strategy is {expected}")]
    StrategyMismatch {
        path: PathBuf,
        expected: Strategy,
        found: Strategy,
    },
    #[error(transparent)]
    Dimension(#[from] DimensionMismatch),
    #[error("identity name must be non-empty")]
    EmptyName,
    /// I/O failure while writing. The previous snapshot stays intact.
    #[error("failed to persist identity snapshot to {path}: {reason}")]
    Persistence { path: PathBuf, reason: String },
}

/// One enrolled identity.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityRecord {
    /// Feature vectors captured for this identity. Always non-empty;
    /// re-enrollment replaces the whole list rather than appending.
    pub vectors: Vec<FeatureVector>,
    /// When the record was last written.
    pub enrolled_at: DateTime<Utc>,
}

/// In-memory identity gallery, keyed by name.
///
/// Backed by a `BTreeMap` so iteration is lexicographic by name, which is
/// what makes matching tie-breaks reproducible.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityStore {
    strategy: Strategy,
    identities: BTreeMap<String, IdentityRecord>,
}

/// On-disk form, decoupled from the in-memory types so every read passes
/// through explicit validation. Unknown top-level keys are tolerated.
#[derive(Serialize, Deserialize)]
struct SnapshotDoc {
    version: u32,
    strategy: Strategy,
    identities: BTreeMap<String, RecordDoc>,
}

#[derive(Serialize, Deserialize)]
struct RecordDoc {
    vectors: Vec<Vec<f32>>,
    enrolled_at: DateTime<Utc>,
}

impl IdentityStore {
    /// Empty store for `strategy`.
    pub fn new(strategy: Strategy) -> Self {
        Self { strategy, identities: BTreeMap::new() }
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&IdentityRecord> {
        self.identities.get(name)
    }

    /// Records in lexicographic name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &IdentityRecord)> {
        self.identities.iter()
    }

    /// Insert or replace the record for `name`.
    ///
    /// Re-enrollment overwrites: afterwards the record holds exactly the
    /// vector given here, stamped with the current time. The vector's
    /// strategy must match the store's.
    pub fn upsert(&mut self, name: &str, vector: FeatureVector) -> Result<(), StoreError> {
        if name.is_empty() {
            return Err(StoreError::EmptyName);
        }
        if vector.strategy() != self.strategy {
            return Err(StoreError::Dimension(DimensionMismatch {
                strategy: self.strategy,
                expected: self.strategy.vector_len(),
                actual: vector.values().len(),
            }));
        }
        self.identities.insert(
            name.to_owned(),
            IdentityRecord { vectors: vec![vector], enrolled_at: Utc::now() },
        );
        Ok(())
    }

    /// Remove the record for `name`. Returns whether it existed.
    pub fn remove(&mut self, name: &str) -> bool {
        self.identities.remove(name).is_some()
    }

    /// Read the snapshot at `path`, or an empty store when the file does
    /// not exist yet.
    ///
    /// Every record is validated against `strategy`: unreadable data, a
    /// wrong schema or version, non-numeric entries, and wrong vector
    /// lengths all surface as [`StoreError::Corrupt`], never as an empty
    /// store. A snapshot written under the other strategy surfaces as
    /// [`StoreError::StrategyMismatch`].
    pub fn load(path: &Path, strategy: Strategy) -> Result<Self, StoreError> {
        let raw = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::info!(
                    path = %path.display(),
                    %strategy,
                    "no identity snapshot yet, starting empty"
                );
                return Ok(Self::new(strategy));
            }
            Err(e) => return Err(corrupt(path, e.to_string())),
        };

        let doc: SnapshotDoc =
            serde_json::from_slice(&raw).map_err(|e| corrupt(path, e.to_string()))?;

        if doc.version != SNAPSHOT_VERSION {
            return Err(corrupt(
                path,
                format!(
                    "unsupported snapshot version {} (this build reads {SNAPSHOT_VERSION})",
                    doc.version
                ),
            ));
        }
        if doc.strategy != strategy {
            return Err(StoreError::StrategyMismatch {
                path: path.to_owned(),
                expected: strategy,
                found: doc.strategy,
            });
        }

        let mut identities = BTreeMap::new();
        for (name, record) in doc.identities {
            if name.is_empty() {
                return Err(corrupt(path, "empty identity name".to_string()));
            }
            if record.vectors.is_empty() {
                return Err(corrupt(path, format!("identity {name:?} has no vectors")));
            }
            let vectors = record
                .vectors
                .into_iter()
                .map(|values| FeatureVector::new(strategy, values))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| corrupt(path, format!("identity {name:?}: {e}")))?;
            identities.insert(name, IdentityRecord { vectors, enrolled_at: record.enrolled_at });
        }

        tracing::info!(
            path = %path.display(),
            identities = identities.len(),
            %strategy,
            "identity snapshot loaded"
        );
        Ok(Self { strategy, identities })
    }

    /// Write the full snapshot atomically.
    ///
    /// The document goes to a `.tmp` sibling first and is renamed over
    /// `path`; a crash or I/O failure anywhere in between leaves the
    /// previous snapshot untouched.
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| persistence(path, e))?;
            }
        }

        let doc = SnapshotDoc {
            version: SNAPSHOT_VERSION,
            strategy: self.strategy,
            identities: self
                .identities
                .iter()
                .map(|(name, record)| {
                    let vectors = record.vectors.iter().map(|v| v.values().to_vec()).collect();
                    (name.clone(), RecordDoc { vectors, enrolled_at: record.enrolled_at })
                })
                .collect(),
        };

        let json = serde_json::to_vec_pretty(&doc).map_err(|e| persistence(path, e))?;

        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &json).map_err(|e| persistence(path, e))?;
        if let Err(e) = fs::rename(&tmp, path) {
            let _ = fs::remove_file(&tmp);
            return Err(persistence(path, e));
        }

        tracing::info!(
            path = %path.display(),
            identities = self.identities.len(),
            "identity snapshot saved"
        );
        Ok(())
    }
}

fn corrupt(path: &Path, reason: String) -> StoreError {
    StoreError::Corrupt { path: path.to_owned(), reason }
}

fn persistence(path: &Path, e: impl std::fmt::Display) -> StoreError {
    StoreError::Persistence { path: path.to_owned(), reason: e.to_string() }
}
