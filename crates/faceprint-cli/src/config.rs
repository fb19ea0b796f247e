use faceprint_core::{Strategy, UnknownStrategy};
use std::path::PathBuf;

/// CLI configuration, loaded from environment variables.
pub struct Config {
    /// Path to the identity snapshot file.
    pub store_path: PathBuf,
    /// Feature derivation strategy for this run.
    pub strategy: Strategy,
    /// Acceptance threshold, in the strategy's distance units.
    pub threshold: f32,
}

impl Config {
    /// Load configuration from `FACEPRINT_*` environment variables with
    /// defaults.
    ///
    /// An unrecognized `FACEPRINT_STRATEGY` is an error rather than a
    /// silent fallback: the strategy decides which store a run opens and
    /// which metric it matches with.
    pub fn from_env() -> Result<Self, UnknownStrategy> {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("faceprint");

        let store_path = std::env::var("FACEPRINT_STORE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("identities.json"));

        let strategy = match std::env::var("FACEPRINT_STRATEGY") {
            Ok(name) => name.parse()?,
            Err(_) => Strategy::RawPatch,
        };

        Ok(Self {
            store_path,
            strategy,
            threshold: env_f32("FACEPRINT_THRESHOLD", strategy.default_threshold()),
        })
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
