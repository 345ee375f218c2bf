use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facematch_core::{
    pairwise_distance, Descriptor, EuclideanMatcher, FaceEngine, Gallery, Recognition,
    RecognitionPolicy, DEFAULT_MATCH_THRESHOLD,
};
use facematch_vision::OnnxEngine;
use serde_json::json;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "facematch", about = "Local face recognition without the daemon")]
struct Cli {
    /// Directory containing the ONNX models
    #[arg(long, global = true, default_value = "models")]
    model_dir: PathBuf,

    /// Reference images of known people
    #[arg(long, global = true, default_value = "known_faces")]
    known_faces: PathBuf,

    /// Maximum distance for a positive recognition
    #[arg(long, global = true, default_value_t = DEFAULT_MATCH_THRESHOLD)]
    threshold: f32,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Identify the closest known person in an image
    Recognize {
        image: PathBuf,
    },
    /// Distance between the most confident faces of two images
    Compare {
        first: PathBuf,
        second: PathBuf,
    },
    /// List the labels loaded from the reference directory
    Gallery,
    /// Print every detected face with its bounding box
    Detect {
        image: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut engine = OnnxEngine::load(&cli.model_dir)
        .with_context(|| format!("loading models from {}", cli.model_dir.display()))?;
    tracing::info!(
        model_dir = %cli.model_dir.display(),
        expressions = engine.supports_expressions(),
        "models loaded"
    );

    let output = match &cli.command {
        Commands::Recognize { image } => {
            let gallery = Gallery::load(&cli.known_faces, &mut engine)?;
            tracing::info!(known = gallery.len(), threshold = cli.threshold, "gallery ready");
            let policy = RecognitionPolicy::new(cli.threshold);
            let recognition = recognize(&mut engine, &gallery, &policy, image)?;
            json!({
                "name": recognition.label(),
                "distance": recognition.distance(),
                "known": recognition.is_known(),
            })
        }
        Commands::Compare { first, second } => {
            let a = most_confident(&mut engine, first)?;
            let b = most_confident(&mut engine, second)?;
            tracing::debug!(first_face = a.is_some(), second_face = b.is_some(), "faces extracted");
            let distance = pairwise_distance(a.as_ref(), b.as_ref())?;
            json!({ "distance": distance })
        }
        Commands::Gallery => {
            let gallery = Gallery::load(&cli.known_faces, &mut engine)?;
            json!({
                "size": gallery.len(),
                "labels": gallery.labels().collect::<Vec<_>>(),
            })
        }
        Commands::Detect { image } => {
            let faces = engine.detect_all(&open(image)?)?;
            tracing::info!(faces = faces.len(), "detection finished");
            let boxes: Vec<_> = faces.into_iter().map(|f| f.bbox).collect();
            json!({ "faces": boxes })
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn open(path: &Path) -> Result<image::DynamicImage> {
    image::open(path).with_context(|| format!("failed to read image {}", path.display()))
}

fn recognize(
    engine: &mut dyn FaceEngine,
    gallery: &Gallery,
    policy: &RecognitionPolicy,
    path: &Path,
) -> Result<Recognition> {
    let faces = engine.detect_all(&open(path)?)?;
    let descriptors: Vec<Descriptor> = faces.into_iter().map(|f| f.descriptor).collect();
    Ok(policy.decide(&descriptors, gallery, &EuclideanMatcher))
}

fn most_confident(engine: &mut dyn FaceEngine, path: &Path) -> Result<Option<Descriptor>> {
    Ok(engine.detect_single(&open(path)?)?.map(|f| f.descriptor))
}
