//! Adam optimizer and gradient clipping.
//!
//! One `Adam` instance serves one parameter group; the trainer keeps an
//! independent instance per weight matrix so moment estimates never mix.

use crate::{TrainError, TrainResult};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Clamp every gradient element to [-threshold, threshold] in place.
pub fn clip_gradients(grads: &mut Array2<f32>, threshold: f32) {
    grads.mapv_inplace(|g| g.clamp(-threshold, threshold));
}

/// Persisted optimizer state: both moment buffers and the timestep.
///
/// Field declaration order matches the checkpoint serialization sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdamState {
    /// First-moment buffer, absent until the first step
    pub first_moment: Option<Array2<f32>>,
    /// Second-moment buffer, absent until the first step
    pub second_moment: Option<Array2<f32>>,
    /// Number of steps taken
    pub timestep: u64,
}

/// Adam optimizer for a single parameter group.
///
/// Moment buffers are allocated lazily and reallocated whenever the weight
/// shape changes. `step` mutates the weight matrix in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Adam {
    lr: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    m: Option<Array2<f32>>,
    v: Option<Array2<f32>>,
    t: u64,
}

impl Adam {
    /// Create an Adam optimizer with default betas and epsilon
    pub fn new(lr: f32) -> Self {
        Self {
            lr,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            m: None,
            v: None,
            t: 0,
        }
    }

    /// Set beta1
    pub fn with_beta1(mut self, beta1: f32) -> Self {
        self.beta1 = beta1;
        self
    }

    /// Set beta2
    pub fn with_beta2(mut self, beta2: f32) -> Self {
        self.beta2 = beta2;
        self
    }

    /// Current learning rate
    pub fn learning_rate(&self) -> f32 {
        self.lr
    }

    /// Set the learning rate
    pub fn set_learning_rate(&mut self, lr: f32) {
        self.lr = lr;
    }

    /// Number of steps taken
    pub fn timestep(&self) -> u64 {
        self.t
    }

    /// Perform one Adam update, mutating `weights` in place.
    ///
    /// Fails before any mutation if the gradient shape does not match the
    /// weight shape.
    pub fn step(&mut self, weights: &mut Array2<f32>, grads: &Array2<f32>) -> TrainResult<()> {
        if weights.raw_dim() != grads.raw_dim() {
            return Err(TrainError::ShapeMismatch {
                context: "Adam step",
                expected: format!("{:?}", weights.dim()),
                actual: format!("{:?}", grads.dim()),
            });
        }

        self.t += 1;

        // (Re)allocate moments on first use or when the weight shape changes
        let needs_alloc = match &self.m {
            Some(m) => m.raw_dim() != weights.raw_dim(),
            None => true,
        };
        if needs_alloc {
            self.m = Some(Array2::zeros(weights.raw_dim()));
            self.v = Some(Array2::zeros(weights.raw_dim()));
        }

        if let Some(ref mut m) = self.m {
            *m = &*m * self.beta1 + &(grads * (1.0 - self.beta1));
        }
        if let Some(ref mut v) = self.v {
            let grads_sq = grads.mapv(|g| g * g);
            *v = &*v * self.beta2 + &(grads_sq * (1.0 - self.beta2));
        }

        let bias_correction1 = 1.0 - self.beta1.powi(self.t as i32);
        let bias_correction2 = 1.0 - self.beta2.powi(self.t as i32);

        if let (Some(m), Some(v)) = (&self.m, &self.v) {
            let m_hat = m / bias_correction1;
            let v_hat = v / bias_correction2;
            let denom = v_hat.mapv(|x| x.sqrt() + self.epsilon);
            *weights = &*weights - &(m_hat / denom * self.lr);
        }
        Ok(())
    }

    /// Snapshot the optimizer state for checkpointing
    pub fn state(&self) -> AdamState {
        AdamState {
            first_moment: self.m.clone(),
            second_moment: self.v.clone(),
            timestep: self.t,
        }
    }

    /// Restore optimizer state from a checkpoint
    pub fn restore(&mut self, state: AdamState) {
        self.m = state.first_moment;
        self.v = state.second_moment;
        self.t = state.timestep;
    }
}
