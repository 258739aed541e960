//! Minibatch trainer with gradient clipping, validation, cooperative stop,
//! and checkpoint/resume.
//!
//! One training invocation is a single sequential computation: forward and
//! backward strictly alternate against the model's one-slot activation
//! cache. The stop flag is the only cross-thread channel; it is checked at
//! epoch boundaries only, so no mid-batch interruption is possible.

use crate::checkpoint::Checkpoint;
use crate::model::{argmax, GcnModel};
use crate::optimizer::{clip_gradients, Adam};
use crate::{TrainError, TrainResult};
use ndarray::Array1;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use wastegraph_core::{save_graph_list, RegionGraph};

/// Default Adam learning rate
pub const DEFAULT_LR: f32 = 0.001;

/// Clamp applied when cross-entropy probabilities are logged
const LOSS_EPS: f32 = 1e-9;

/// Categorical cross-entropy of a probability vector against a one-hot
/// label, with probabilities clamped away from 0 and 1.
pub fn cross_entropy(predicted: &Array1<f32>, label: &Array1<f32>) -> f32 {
    let mut loss = 0.0;
    for (p, y) in predicted.iter().zip(label.iter()) {
        let p = p.clamp(LOSS_EPS, 1.0 - LOSS_EPS);
        loss -= y * p.ln();
    }
    loss
}

// ============================================================================
// Configuration and Metrics
// ============================================================================

/// Trainer configuration; epochs and batch size are `train()` arguments
#[derive(Debug, Clone)]
pub struct TrainerConfig {
    /// Adam learning rate, shared by all three parameter groups
    pub learning_rate: f32,
    /// Elementwise gradient clamp applied before every optimizer step
    pub clip_threshold: f32,
    /// Directory for checkpoints written on a stop request
    pub output_dir: PathBuf,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            learning_rate: DEFAULT_LR,
            clip_threshold: 1.0,
            output_dir: PathBuf::from("saved_sessions"),
        }
    }
}

/// Metrics for a single training epoch
#[derive(Debug, Clone, Default)]
pub struct EpochMetrics {
    /// Epoch number
    pub epoch: usize,
    /// Average training loss per graph
    pub train_loss: f32,
    /// Average validation loss per graph
    pub val_loss: f32,
    /// Top-1 validation accuracy in 0.0-1.0
    pub val_accuracy: f32,
    /// Learning rate in effect this epoch
    pub learning_rate: f32,
}

/// Complete training history
#[derive(Debug, Clone, Default)]
pub struct TrainingHistory {
    /// Metrics for each completed epoch
    pub epochs: Vec<EpochMetrics>,
}

impl TrainingHistory {
    /// Final training loss, if any epoch completed
    pub fn final_train_loss(&self) -> Option<f32> {
        self.epochs.last().map(|e| e.train_loss)
    }

    /// Final validation accuracy, if any epoch completed
    pub fn final_val_accuracy(&self) -> Option<f32> {
        self.epochs.last().map(|e| e.val_accuracy)
    }
}

// ============================================================================
// Stop Handle
// ============================================================================

/// Cloneable handle for requesting a cooperative stop from another thread.
///
/// The trainer checks the flag at epoch boundaries only; when set it writes
/// a full checkpoint plus the training graph list and returns.
#[derive(Debug, Clone)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    /// Request that training stop at the next epoch boundary
    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether a stop has been requested
    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Trainer
// ============================================================================

/// Minibatch trainer owning the model and one Adam instance per parameter
/// group. Forward/backward borrow the model; nothing else aliases it.
pub struct Trainer {
    model: GcnModel,
    config: TrainerConfig,
    learning_rate: f32,
    current_epoch: usize,
    opt_gcn1: Adam,
    opt_gcn2: Adam,
    opt_dense: Adam,
    stop_flag: Arc<AtomicBool>,
    history: TrainingHistory,
    rng: StdRng,
}

impl Trainer {
    /// Create a trainer with an entropy-seeded shuffle RNG
    pub fn new(model: GcnModel, config: TrainerConfig) -> Self {
        Self::with_rng(model, config, StdRng::from_entropy())
    }

    /// Create a trainer with a fixed shuffle seed (reproducible epochs)
    pub fn seeded(model: GcnModel, config: TrainerConfig, seed: u64) -> Self {
        Self::with_rng(model, config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(model: GcnModel, config: TrainerConfig, rng: StdRng) -> Self {
        let lr = config.learning_rate;
        Self {
            model,
            config,
            learning_rate: lr,
            current_epoch: 0,
            opt_gcn1: Adam::new(lr),
            opt_gcn2: Adam::new(lr),
            opt_dense: Adam::new(lr),
            stop_flag: Arc::new(AtomicBool::new(false)),
            history: TrainingHistory::default(),
            rng,
        }
    }

    /// Borrow the model
    pub fn model(&self) -> &GcnModel {
        &self.model
    }

    /// Mutably borrow the model (forward passes need the cache slot)
    pub fn model_mut(&mut self) -> &mut GcnModel {
        &mut self.model
    }

    /// Consume the trainer and keep the trained model
    pub fn into_model(self) -> GcnModel {
        self.model
    }

    /// Epoch the next `train` call starts from
    pub fn current_epoch(&self) -> usize {
        self.current_epoch
    }

    /// Current learning rate
    pub fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    /// Set the learning rate for all parameter groups
    pub fn set_learning_rate(&mut self, lr: f32) {
        self.learning_rate = lr;
        self.opt_gcn1.set_learning_rate(lr);
        self.opt_gcn2.set_learning_rate(lr);
        self.opt_dense.set_learning_rate(lr);
    }

    /// Training history so far
    pub fn history(&self) -> &TrainingHistory {
        &self.history
    }

    /// Request a stop from this thread
    pub fn request_stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
    }

    /// Cloneable stop handle for a controlling thread
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(Arc::clone(&self.stop_flag))
    }

    /// Run the training loop from the current epoch up to `epochs`.
    ///
    /// Per epoch: shuffle, iterate contiguous minibatches, accumulate each
    /// sample's per-group gradients, scale by the batch sample count, clamp
    /// to the clip threshold, take one Adam step per group, then run a
    /// forward-only validation pass and log metrics.
    pub fn train(
        &mut self,
        graphs: &mut Vec<RegionGraph>,
        validation: &[RegionGraph],
        epochs: usize,
        batch_size: usize,
    ) -> TrainResult<TrainingHistory> {
        if batch_size == 0 {
            return Err(TrainError::InvalidBatchSize);
        }

        for epoch in self.current_epoch..epochs {
            if self.stop_flag.load(Ordering::SeqCst) {
                self.checkpoint_on_stop(graphs)?;
                println!("Training stopped at epoch {epoch}");
                return Ok(self.history.clone());
            }

            graphs.shuffle(&mut self.rng);
            let mut epoch_loss = 0.0;

            for batch in graphs.chunks(batch_size) {
                let mut acc = self.model.zero_gradients();

                for graph in batch {
                    let a = graph.normalized_adjacency()?;
                    let x = graph.feature_matrix()?;
                    let label = graph.graph_level_label()?;

                    let probs = self.model.forward(&a, &x)?;
                    epoch_loss += cross_entropy(&probs, &label);

                    let d_output = &probs - &label;
                    let grads = self.model.backward(&a, &x, &d_output)?;
                    acc.gcn1 += &grads.gcn1;
                    acc.gcn2 += &grads.gcn2;
                    acc.dense += &grads.dense;
                }

                let scale = batch.len() as f32;
                acc.gcn1 /= scale;
                acc.gcn2 /= scale;
                acc.dense /= scale;

                clip_gradients(&mut acc.gcn1, self.config.clip_threshold);
                clip_gradients(&mut acc.gcn2, self.config.clip_threshold);
                clip_gradients(&mut acc.dense, self.config.clip_threshold);

                self.opt_gcn1.step(&mut self.model.gcn1.weights, &acc.gcn1)?;
                self.opt_gcn2.step(&mut self.model.gcn2.weights, &acc.gcn2)?;
                self.opt_dense.step(&mut self.model.dense.weights, &acc.dense)?;
            }

            let (val_loss, val_accuracy) = self.evaluate(validation)?;
            let train_loss = epoch_loss / graphs.len().max(1) as f32;

            println!(
                "Epoch {} avg loss: {:.6} validation loss: {:.6} validation accuracy: {:.2}% learning rate: {}",
                epoch,
                train_loss,
                val_loss,
                val_accuracy * 100.0,
                self.learning_rate
            );

            self.history.epochs.push(EpochMetrics {
                epoch,
                train_loss,
                val_loss,
                val_accuracy,
                learning_rate: self.learning_rate,
            });
            self.current_epoch = epoch + 1;
        }
        Ok(self.history.clone())
    }

    /// Forward-only pass over `graphs`: (average loss, top-1 accuracy).
    /// Returns (0, 0) for an empty slice.
    pub fn evaluate(&mut self, graphs: &[RegionGraph]) -> TrainResult<(f32, f32)> {
        if graphs.is_empty() {
            return Ok((0.0, 0.0));
        }

        let mut total_loss = 0.0;
        let mut correct = 0usize;
        for graph in graphs {
            let a = graph.normalized_adjacency()?;
            let x = graph.feature_matrix()?;
            let label = graph.graph_level_label()?;

            let probs = self.model.forward(&a, &x)?;
            total_loss += cross_entropy(&probs, &label);
            if argmax(&probs) == argmax(&label) {
                correct += 1;
            }
        }
        let n = graphs.len() as f32;
        Ok((total_loss / n, correct as f32 / n))
    }

    /// Write a full checkpoint to `path`
    pub fn save_checkpoint<P: AsRef<Path>>(&self, path: P) -> TrainResult<()> {
        self.make_checkpoint().save(path)
    }

    /// Restore weights, optimizer state, learning rate, and epoch counter
    /// from a checkpoint. The file is fully decoded and validated before
    /// anything is applied.
    pub fn resume_checkpoint<P: AsRef<Path>>(&mut self, path: P) -> TrainResult<()> {
        let ckpt = Checkpoint::load(path)?;
        ckpt.apply_to_model(&mut self.model)?;

        self.set_learning_rate(ckpt.learning_rate);
        self.current_epoch = ckpt.epoch;
        self.opt_gcn1.restore(ckpt.gcn1_optimizer);
        self.opt_gcn2.restore(ckpt.gcn2_optimizer);
        self.opt_dense.restore(ckpt.dense_optimizer);
        Ok(())
    }

    fn make_checkpoint(&self) -> Checkpoint {
        Checkpoint {
            gcn1_weights: self.model.gcn1.weights.clone(),
            gcn1_bias: self.model.gcn1.bias.clone(),
            gcn2_weights: self.model.gcn2.weights.clone(),
            gcn2_bias: self.model.gcn2.bias.clone(),
            dense_weights: self.model.dense.weights.clone(),
            dense_bias: self.model.dense.biases.clone(),
            learning_rate: self.learning_rate,
            epoch: self.current_epoch,
            gcn1_optimizer: self.opt_gcn1.state(),
            gcn2_optimizer: self.opt_gcn2.state(),
            dense_optimizer: self.opt_dense.state(),
        }
    }

    fn checkpoint_on_stop(&self, graphs: &[RegionGraph]) -> TrainResult<()> {
        std::fs::create_dir_all(&self.config.output_dir)?;
        let epoch = self.current_epoch;

        let ckpt_path = self
            .config
            .output_dir
            .join(format!("session_epoch{epoch}.ckpt"));
        self.save_checkpoint(&ckpt_path)?;

        let graphs_path = self
            .config
            .output_dir
            .join(format!("session_epoch{epoch}_graphs.bin"));
        save_graph_list(&graphs_path, graphs)?;

        println!("Session saved to {}", ckpt_path.display());
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
