//! Classification CLI: load a checkpoint and classify waste images.
//!
//! Usage:
//!   cargo run --bin classify -- --model saved_sessions/final.ckpt photo.jpg
//!   cargo run --bin classify -- --model final.ckpt --labels metal,paper,plastic,brown-glass dir/*.jpg

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use wastegraph_train::Classifier;

/// Classify waste-item images with a trained model
#[derive(Parser, Debug)]
#[command(name = "classify")]
#[command(about = "Classify waste images with a trained wastegraph model", long_about = None)]
struct Args {
    /// Path to a trained checkpoint
    #[arg(short, long)]
    model: PathBuf,

    /// Comma-separated class names overriding the defaults
    #[arg(long)]
    labels: Option<String>,

    /// Images to classify
    #[arg(required = true)]
    images: Vec<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut classifier = Classifier::from_checkpoint(&args.model)
        .with_context(|| format!("Failed to load model from {}", args.model.display()))?;
    if let Some(labels) = &args.labels {
        let labels: Vec<String> = labels.split(',').map(|s| s.trim().to_string()).collect();
        classifier = classifier.with_labels(labels);
    }

    for path in &args.images {
        match classifier.classify_image(path) {
            Ok(output) => {
                let name = output
                    .label
                    .unwrap_or_else(|| output.predicted_class.to_string());
                print!(
                    "{}: {} ({:.1}%)",
                    path.display(),
                    name,
                    output.confidence * 100.0
                );
                let detail: Vec<String> = output
                    .probabilities
                    .iter()
                    .enumerate()
                    .map(|(i, p)| {
                        format!(
                            "{}={:.3}",
                            classifier.label(i).unwrap_or(&i.to_string()),
                            p
                        )
                    })
                    .collect();
                println!("  [{}]", detail.join(" "));
            }
            Err(err) => eprintln!("{}: failed to classify: {}", path.display(), err),
        }
    }
    Ok(())
}
