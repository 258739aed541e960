//! Checkpoint snapshot for the model, optimizer state, and trainer position.
//!
//! Field declaration order on `Checkpoint` IS the serialized order (bincode
//! writes struct fields in declaration sequence); existing checkpoint files
//! depend on it. Keep it stable:
//! layer-1 weights, layer-1 bias, layer-2 weights, layer-2 bias, dense
//! weights, dense bias, learning rate, epoch, then for each of
//! {layer-1, layer-2, dense}: first moment, second moment, timestep.

use crate::model::GcnModel;
use crate::optimizer::AdamState;
use crate::{TrainError, TrainResult};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::path::Path;
use wastegraph_core::persist::{read_envelope, write_envelope};

/// Magic bytes identifying a checkpoint file
pub const CHECKPOINT_MAGIC: [u8; 4] = *b"WGCK";

/// Checkpoint format version
pub const CHECKPOINT_VERSION: u32 = 1;

/// A full training snapshot. See module docs for the field-order contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub gcn1_weights: Array2<f32>,
    pub gcn1_bias: Array1<f32>,
    pub gcn2_weights: Array2<f32>,
    pub gcn2_bias: Array1<f32>,
    pub dense_weights: Array2<f32>,
    pub dense_bias: Array1<f32>,
    pub learning_rate: f32,
    pub epoch: usize,
    pub gcn1_optimizer: AdamState,
    pub gcn2_optimizer: AdamState,
    pub dense_optimizer: AdamState,
}

impl Checkpoint {
    /// Write this checkpoint to disk
    pub fn save<P: AsRef<Path>>(&self, path: P) -> TrainResult<()> {
        write_envelope(path, CHECKPOINT_MAGIC, CHECKPOINT_VERSION, self)?;
        Ok(())
    }

    /// Read a checkpoint from disk.
    ///
    /// The whole payload is decoded before returning; a missing or corrupt
    /// file yields an error and no state anywhere is touched.
    pub fn load<P: AsRef<Path>>(path: P) -> TrainResult<Self> {
        Ok(read_envelope(path, CHECKPOINT_MAGIC, CHECKPOINT_VERSION)?)
    }

    /// Model dimensions implied by the stored weight shapes:
    /// (input, hidden, classes)
    pub fn model_dims(&self) -> (usize, usize, usize) {
        let (input, hidden) = self.gcn1_weights.dim();
        (input, hidden, self.dense_weights.nrows())
    }

    /// Copy the stored weights and biases into `model`.
    ///
    /// Every shape is validated against the model before anything is
    /// assigned, so a mismatched checkpoint never applies partially.
    pub fn apply_to_model(&self, model: &mut GcnModel) -> TrainResult<()> {
        let checks: [(&'static str, (usize, usize), (usize, usize)); 3] = [
            (
                "checkpoint gcn1 weights",
                model.gcn1.weights.dim(),
                self.gcn1_weights.dim(),
            ),
            (
                "checkpoint gcn2 weights",
                model.gcn2.weights.dim(),
                self.gcn2_weights.dim(),
            ),
            (
                "checkpoint dense weights",
                model.dense.weights.dim(),
                self.dense_weights.dim(),
            ),
        ];
        for (context, expected, actual) in checks {
            if expected != actual {
                return Err(TrainError::ShapeMismatch {
                    context,
                    expected: format!("{expected:?}"),
                    actual: format!("{actual:?}"),
                });
            }
        }

        model.gcn1.weights = self.gcn1_weights.clone();
        model.gcn1.bias = self.gcn1_bias.clone();
        model.gcn2.weights = self.gcn2_weights.clone();
        model.gcn2.bias = self.gcn2_bias.clone();
        model.dense.weights = self.dense_weights.clone();
        model.dense.biases = self.dense_bias.clone();
        Ok(())
    }
}
