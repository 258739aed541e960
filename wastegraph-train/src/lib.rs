//! # wastegraph-train
//!
//! Training infrastructure for the wastegraph GCN.
//!
//! This crate provides:
//! - `GcnModel` - two stacked graph convolutions, global pooling, dense
//!   classifier, and the fully hand-derived backward pass (no autodiff)
//! - `Adam` - per-parameter-group optimizer with lazily allocated moments
//! - `Trainer` - shuffled minibatch loop with gradient clipping, validation,
//!   cooperative stop, and checkpoint/resume
//! - `Checkpoint` - binary snapshot of weights, optimizer state, learning
//!   rate and epoch in a fixed field order
//! - `Classifier` - an explicit inference handle over a loaded model
//! - Dataset assembly from class-per-directory image trees
//!
//! The numeric core is one sequential computation per training invocation;
//! the only cross-thread channel is the trainer's atomic stop flag.

use thiserror::Error;
use wastegraph_core::{GraphError, PersistError};
use wastegraph_vision::VisionError;

pub mod checkpoint;
pub mod classify;
pub mod config;
pub mod dataset;
pub mod model;
pub mod optimizer;
pub mod trainer;

pub use checkpoint::Checkpoint;
pub use classify::{ClassificationOutput, Classifier, DEFAULT_CLASS_NAMES};
pub use config::ConfigFile;
pub use dataset::LabeledDataset;
pub use model::{
    argmax, leaky_relu, leaky_relu_gradient, DenseLayer, GcnLayer, GcnModel, LayerNorm,
    ModelGradients, WeightInit, LEAKY_RELU_ALPHA,
};
pub use optimizer::{clip_gradients, Adam, AdamState};
pub use trainer::{
    cross_entropy, EpochMetrics, StopHandle, Trainer, TrainerConfig, TrainingHistory, DEFAULT_LR,
};

/// Training errors
#[derive(Error, Debug)]
pub enum TrainError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Vision(#[from] VisionError),
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error("Shape mismatch in {context}: expected {expected}, got {actual}")]
    ShapeMismatch {
        context: &'static str,
        expected: String,
        actual: String,
    },
    #[error("Backward called without a cached forward pass")]
    MissingForwardCache,
    #[error("Batch size must be at least 1")]
    InvalidBatchSize,
    #[error("No class directories found under {0}")]
    EmptyDataset(String),
    #[error("Config error: {0}")]
    Config(String),
}

/// Result type for training operations
pub type TrainResult<T> = Result<T, TrainError>;
