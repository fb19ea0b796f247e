use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use faceprint_core::{
    Engine, EngineError, FeatureExtractor, FullFrameDetector, ModelLoadError, PatchExtractor,
    Strategy,
};
use image::GrayImage;
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "faceprint", about = "Faceprint identity enrollment and recognition CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll an identity from a still image
    Enroll {
        /// Name to store the face under
        #[arg(short, long)]
        name: String,
        /// Path to the image file
        image: PathBuf,
    },
    /// Identify the face in a still image
    Recognize {
        /// Path to the image file
        image: PathBuf,
    },
    /// List enrolled identities
    List,
    /// Remove an enrolled identity
    Remove {
        /// Name to remove
        name: String,
    },
    /// Show store location, strategy, and gallery size
    Status,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    tracing::debug!(
        store = %config.store_path.display(),
        strategy = %config.strategy,
        threshold = config.threshold,
        "configuration resolved"
    );
    let extractor = build_extractor(config.strategy)?;
    let engine = Engine::open(extractor, &config.store_path, config.threshold)?;

    match cli.command {
        Commands::Enroll { name, image } => {
            let frame = load_gray(&image)?;
            match engine.enroll(&name, &frame) {
                Ok(_region) => {
                    println!("{}", json!({ "accepted": true }));
                }
                Err(EngineError::NoFaceDetected) => {
                    println!("{}", json!({ "accepted": false }));
                    std::process::exit(1);
                }
                Err(err) => return Err(err.into()),
            }
        }
        Commands::Recognize { image } => {
            let frame = load_gray(&image)?;
            let recognition = engine.recognize(&frame)?;
            println!(
                "{}",
                json!({
                    "accepted": recognition.result.accepted,
                    "identity": recognition.result.identity,
                    "confidence": recognition.result.confidence(engine.threshold()),
                })
            );
        }
        Commands::List => {
            let summaries = engine.list();
            if summaries.is_empty() {
                println!("no identities enrolled");
            }
            for identity in summaries {
                println!(
                    "{}  {} sample(s)  enrolled {}",
                    identity.name, identity.samples, identity.enrolled_at
                );
            }
        }
        Commands::Remove { name } => {
            if engine.remove(&name)? {
                println!("removed: {name}");
            } else {
                println!("no such identity: {name}");
                std::process::exit(1);
            }
        }
        Commands::Status => {
            println!("store: {}", engine.store_path().display());
            println!("strategy: {}", engine.strategy());
            println!("threshold: {}", engine.threshold());
            println!("identities: {}", engine.identity_count());
        }
    }

    Ok(())
}

/// Assemble the feature extractor for `strategy`.
///
/// The deep-embedding strategy needs an external embedding backend wired in
/// through [`faceprint_core::FaceEmbedder`]; this binary ships none, so
/// selecting it fails here, at startup.
fn build_extractor(strategy: Strategy) -> Result<Box<dyn FeatureExtractor>, ModelLoadError> {
    match strategy {
        Strategy::RawPatch => Ok(Box::new(PatchExtractor::new(FullFrameDetector))),
        Strategy::DeepEmbedding => Err(ModelLoadError::new(
            "no embedding backend bundled with this binary; use FACEPRINT_STRATEGY=raw-patch",
        )),
    }
}

fn load_gray(path: &Path) -> Result<GrayImage> {
    let image = image::open(path)
        .with_context(|| format!("failed to read image {}", path.display()))?;
    Ok(image.into_luma8())
}
