//! Training CLI for the wastegraph GCN.
//!
//! Builds labeled region graphs from a class-per-subdirectory image tree,
//! trains the model, and writes a final checkpoint.
//!
//! Usage:
//!   cargo run --bin train -- --data ./waste-images --epochs 50
//!   cargo run --bin train -- --config train.toml --resume saved_sessions/session_epoch12.ckpt

use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use wastegraph_train::dataset::{build_graphs, collect_labeled_paths, split_dataset};
use wastegraph_train::{ConfigFile, GcnModel, Trainer, TrainerConfig};
use wastegraph_vision::{SlicConfig, ENHANCED_DIM};

/// Train the waste-image GCN classifier
#[derive(Parser, Debug)]
#[command(name = "train")]
#[command(about = "Train the wastegraph GCN classifier", long_about = None)]
struct Args {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Training image tree (one subdirectory per class; overrides config)
    #[arg(short, long)]
    data: Option<PathBuf>,

    /// Separate validation image tree (overrides config)
    #[arg(long)]
    val: Option<PathBuf>,

    /// Fraction of training data held out when no --val tree is given
    #[arg(long, default_value_t = 0.2)]
    val_ratio: f64,

    /// Checkpoint output directory (overrides config)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Number of epochs (overrides config)
    #[arg(short, long)]
    epochs: Option<usize>,

    /// Batch size (overrides config)
    #[arg(short, long)]
    batch_size: Option<usize>,

    /// Learning rate (overrides config)
    #[arg(long)]
    lr: Option<f32>,

    /// Hidden embedding size (overrides config)
    #[arg(long)]
    hidden: Option<usize>,

    /// RNG seed for weight init and shuffling (overrides config)
    #[arg(long)]
    seed: Option<u64>,

    /// Resume from a checkpoint
    #[arg(short, long)]
    resume: Option<PathBuf>,
}

fn progress_bar(len: u64, message: &'static str) -> ProgressBar {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("##-"),
    );
    pb.set_message(message);
    pb
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ConfigFile::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ConfigFile::default(),
    };

    if let Some(data) = &args.data {
        config.paths.data_dir = data.to_string_lossy().into_owned();
    }
    if let Some(val) = &args.val {
        config.paths.val_dir = val.to_string_lossy().into_owned();
    }
    if let Some(output) = &args.output {
        config.paths.output_dir = output.to_string_lossy().into_owned();
    }
    if let Some(epochs) = args.epochs {
        config.training.epochs = epochs;
    }
    if let Some(batch_size) = args.batch_size {
        config.training.batch_size = batch_size;
    }
    if let Some(lr) = args.lr {
        config.training.learning_rate = lr;
    }
    if let Some(hidden) = args.hidden {
        config.training.hidden_size = hidden;
    }
    if let Some(seed) = args.seed {
        config.training.seed = Some(seed);
    }
    if config.paths.data_dir.is_empty() {
        bail!("Must specify a training image tree via --data or the config file");
    }

    let slic = SlicConfig::default()
        .with_superpixels(config.vision.superpixels)
        .with_compactness(config.vision.compactness);

    // Assemble the training graphs
    let (class_names, entries) = collect_labeled_paths(&config.paths.data_dir)?;
    println!(
        "Found {} images across {} classes: {}",
        entries.len(),
        class_names.len(),
        class_names.join(", ")
    );
    let pb = progress_bar(entries.len() as u64, "building graphs");
    let graphs = build_graphs(&entries, class_names.len(), &slic, || pb.inc(1));
    pb.finish_and_clear();
    if graphs.is_empty() {
        bail!("No usable training images under {}", config.paths.data_dir);
    }

    // Validation: a separate tree, or a held-out split of the training set
    let (mut train_graphs, val_graphs) = if config.paths.val_dir.is_empty() {
        let mut rng: rand::rngs::StdRng = match config.training.seed {
            Some(seed) => rand::SeedableRng::seed_from_u64(seed),
            None => rand::SeedableRng::from_entropy(),
        };
        split_dataset(graphs, args.val_ratio, &mut rng)
    } else {
        let (val_classes, val_entries) = collect_labeled_paths(&config.paths.val_dir)?;
        if val_classes != class_names {
            bail!(
                "Validation classes {:?} do not match training classes {:?}",
                val_classes,
                class_names
            );
        }
        let pb = progress_bar(val_entries.len() as u64, "building validation graphs");
        let val = build_graphs(&val_entries, val_classes.len(), &slic, || pb.inc(1));
        pb.finish_and_clear();
        (graphs, val)
    };
    println!(
        "Training on {} graphs, validating on {}",
        train_graphs.len(),
        val_graphs.len()
    );

    let model = match config.training.seed {
        Some(seed) => GcnModel::seeded(
            ENHANCED_DIM,
            config.training.hidden_size,
            class_names.len(),
            seed,
        ),
        None => GcnModel::new(ENHANCED_DIM, config.training.hidden_size, class_names.len()),
    };

    let trainer_config = TrainerConfig {
        learning_rate: config.training.learning_rate,
        output_dir: PathBuf::from(&config.paths.output_dir),
        ..Default::default()
    };
    let mut trainer = match config.training.seed {
        Some(seed) => Trainer::seeded(model, trainer_config, seed),
        None => Trainer::new(model, trainer_config),
    };

    if let Some(resume) = &args.resume {
        trainer
            .resume_checkpoint(resume)
            .with_context(|| format!("Failed to resume from {}", resume.display()))?;
        println!(
            "Resumed from {} at epoch {}",
            resume.display(),
            trainer.current_epoch()
        );
    }

    let history = trainer.train(
        &mut train_graphs,
        &val_graphs,
        config.training.epochs,
        config.training.batch_size,
    )?;

    std::fs::create_dir_all(&config.paths.output_dir)?;
    let final_path = PathBuf::from(&config.paths.output_dir).join("final.ckpt");
    trainer.save_checkpoint(&final_path)?;
    println!("Final checkpoint saved to {}", final_path.display());

    if let (Some(loss), Some(accuracy)) =
        (history.final_train_loss(), history.final_val_accuracy())
    {
        println!(
            "Finished {} epochs: train loss {:.6}, validation accuracy {:.2}%",
            history.epochs.len(),
            loss,
            accuracy * 100.0
        );
    }
    Ok(())
}
