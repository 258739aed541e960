//! GCN layers, dense classifier, and the hand-derived backward pass.
//!
//! Forward: gcn1 -> leaky-ReLU -> gcn2 -> leaky-ReLU -> mean/max pooling ->
//! dense -> softmax. The nonlinearity is a standalone function applied by
//! the caller of each layer, never fused into `GcnLayer::forward`, so the
//! backward pass can use each layer's pre-activation output directly.
//!
//! The backward pass treats each layer as if forward computed A·X·W alone:
//! it does NOT differentiate through the layer normalization or the
//! residual addition that forward applies. This forward/backward mismatch
//! is deliberate and documented in DESIGN.md; do not "fix" it here without
//! revisiting every gradient test.

use crate::{TrainError, TrainResult};
use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use wastegraph_core::softmax;

/// Negative slope of the leaky-ReLU nonlinearity
pub const LEAKY_RELU_ALPHA: f32 = 0.01;

/// Elementwise leaky-ReLU
pub fn leaky_relu(x: &Array2<f32>) -> Array2<f32> {
    x.mapv(|v| if v > 0.0 { v } else { LEAKY_RELU_ALPHA * v })
}

/// Elementwise leaky-ReLU derivative: 1.0 where positive, alpha elsewhere
pub fn leaky_relu_gradient(x: &Array2<f32>) -> Array2<f32> {
    x.mapv(|v| if v > 0.0 { 1.0 } else { LEAKY_RELU_ALPHA })
}

/// Index of the largest element
pub fn argmax(values: &Array1<f32>) -> usize {
    let mut best = 0;
    for i in 1..values.len() {
        if values[i] > values[best] {
            best = i;
        }
    }
    best
}

// ============================================================================
// Layer Normalization
// ============================================================================

/// Per-node layer normalization over the feature axis.
///
/// Scale and shift are learnable in principle but are never touched by the
/// backward pass (see module docs); they stay at their 1/0 initialization.
#[derive(Debug, Clone)]
pub struct LayerNorm {
    gamma: Array1<f32>,
    beta: Array1<f32>,
    eps: f32,
}

impl LayerNorm {
    /// Create with gamma = 1, beta = 0
    pub fn new(features: usize) -> Self {
        Self {
            gamma: Array1::ones(features),
            beta: Array1::zeros(features),
            eps: 1e-5,
        }
    }

    /// Normalize each row to zero mean and unit variance, then scale/shift
    pub fn forward(&self, x: &Array2<f32>) -> Array2<f32> {
        let d = x.ncols();
        let mut out = Array2::zeros(x.raw_dim());
        for (i, row) in x.outer_iter().enumerate() {
            let mean = row.sum() / d as f32;
            let var = row.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / d as f32;
            let denom = (var + self.eps).sqrt();
            for j in 0..d {
                out[[i, j]] = self.gamma[j] * (row[j] - mean) / denom + self.beta[j];
            }
        }
        out
    }
}

// ============================================================================
// Weight Initialization
// ============================================================================

/// Selectable weight initialization scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightInit {
    /// std = sqrt(2 / in)
    He,
    /// std = sqrt(2 / (in + out))
    Xavier,
    /// std = sqrt(1 / in)
    LeCun,
}

impl WeightInit {
    /// Half-width of the uniform initialization interval
    pub fn std(self, input: usize, output: usize) -> f32 {
        match self {
            WeightInit::He => (2.0 / input as f32).sqrt(),
            WeightInit::Xavier => (2.0 / (input + output) as f32).sqrt(),
            WeightInit::LeCun => (1.0 / input as f32).sqrt(),
        }
    }
}

// ============================================================================
// GCN Layer
// ============================================================================

/// One graph convolution: H' = A_norm . X . W with residual and layer norm.
///
/// The bias vector is allocated and checkpointed but not read by forward;
/// it stays so the checkpoint layout remains stable (see DESIGN.md).
#[derive(Debug, Clone)]
pub struct GcnLayer {
    /// Weight matrix [in x out]
    pub weights: Array2<f32>,
    /// Bias vector [out]; dormant (see struct docs)
    pub bias: Array1<f32>,
    layer_norm: LayerNorm,
}

impl GcnLayer {
    /// Create a layer with uniformly initialized weights in [-std, std]
    pub fn new(input: usize, output: usize, init: WeightInit, rng: &mut impl Rng) -> Self {
        let std = init.std(input, output);
        let weights = Array2::from_shape_fn((input, output), |_| rng.gen_range(-std..std));
        Self {
            weights,
            bias: Array1::zeros(output),
            layer_norm: LayerNorm::new(output),
        }
    }

    /// H' = A . X . W; residual added when shapes match; per-node layer
    /// norm applied last. The nonlinearity is the caller's responsibility.
    pub fn forward(&self, a: &Array2<f32>, x: &Array2<f32>) -> Array2<f32> {
        let ax = a.dot(x);
        let mut axw = ax.dot(&self.weights);
        if axw.raw_dim() == x.raw_dim() {
            axw += x;
        }
        self.layer_norm.forward(&axw)
    }
}

// ============================================================================
// Dense Layer
// ============================================================================

/// Fully connected output layer mapping pooled features to class logits
#[derive(Debug, Clone)]
pub struct DenseLayer {
    /// Weight matrix [out x in]
    pub weights: Array2<f32>,
    /// Bias vector [out]
    pub biases: Array1<f32>,
}

impl DenseLayer {
    /// Create with Xavier-uniform weights in [-limit, limit],
    /// limit = sqrt(6 / (in + out))
    pub fn new(input: usize, output: usize, rng: &mut impl Rng) -> Self {
        let limit = (6.0 / (input + output) as f32).sqrt();
        let weights = Array2::from_shape_fn((output, input), |_| rng.gen_range(-limit..limit));
        Self {
            weights,
            biases: Array1::zeros(output),
        }
    }

    /// logits = W . input + b
    pub fn forward(&self, input: &Array1<f32>) -> TrainResult<Array1<f32>> {
        if input.len() != self.weights.ncols() {
            return Err(TrainError::ShapeMismatch {
                context: "dense forward",
                expected: self.weights.ncols().to_string(),
                actual: input.len().to_string(),
            });
        }
        Ok(self.weights.dot(input) + &self.biases)
    }
}

// ============================================================================
// Pooling
// ============================================================================

/// Arithmetic mean of every feature across nodes
fn mean_pool(features: &Array2<f32>) -> Array1<f32> {
    features.sum_axis(Axis(0)) / features.nrows() as f32
}

/// Per-feature maximum plus the contributing node index, needed for
/// backward routing
fn max_pool_with_indices(features: &Array2<f32>) -> (Array1<f32>, Vec<usize>) {
    let d = features.ncols();
    let mut max = Array1::from_elem(d, f32::NEG_INFINITY);
    let mut indices = vec![0usize; d];
    for (i, row) in features.outer_iter().enumerate() {
        for j in 0..d {
            if row[j] > max[j] {
                max[j] = row[j];
                indices[j] = i;
            }
        }
    }
    (max, indices)
}

/// Backward through the concatenated mean+max pooling.
///
/// The first half of `d_combined` (mean) is split equally across all nodes;
/// the second half (max) is routed only to the node recorded as argmax for
/// each feature.
fn pool_backward(d_combined: &Array1<f32>, n: usize, max_indices: &[usize]) -> Array2<f32> {
    let h = d_combined.len() / 2;
    let mut d_nodes = Array2::<f32>::zeros((n, h));
    for i in 0..n {
        for j in 0..h {
            d_nodes[[i, j]] += d_combined[j] / n as f32;
        }
    }
    for j in 0..h {
        d_nodes[[max_indices[j], j]] += d_combined[h + j];
    }
    d_nodes
}

// ============================================================================
// GCN Model
// ============================================================================

/// Activations cached by forward for the immediately following backward.
/// A second forward overwrites the slot; the model is not reentrant.
#[derive(Debug, Clone)]
struct ForwardCache {
    z1: Array2<f32>,
    h1: Array2<f32>,
    z2: Array2<f32>,
    h2: Array2<f32>,
    combined: Array1<f32>,
    max_indices: Vec<usize>,
}

/// Per-parameter-group weight gradients produced by one backward pass
#[derive(Debug, Clone)]
pub struct ModelGradients {
    /// Gradient for gcn1 weights [in x hidden]
    pub gcn1: Array2<f32>,
    /// Gradient for gcn2 weights [hidden x hidden]
    pub gcn2: Array2<f32>,
    /// Gradient for dense weights [classes x 2*hidden]
    pub dense: Array2<f32>,
}

/// Two stacked GCN layers, global mean+max pooling, dense classifier
#[derive(Debug, Clone)]
pub struct GcnModel {
    /// First graph convolution (in -> hidden)
    pub gcn1: GcnLayer,
    /// Second graph convolution (hidden -> hidden)
    pub gcn2: GcnLayer,
    /// Dense classifier (2*hidden -> classes)
    pub dense: DenseLayer,
    input_dim: usize,
    hidden_dim: usize,
    num_classes: usize,
    cache: Option<ForwardCache>,
}

impl GcnModel {
    /// Create a model with He-initialized GCN layers from a fresh RNG
    pub fn new(input_dim: usize, hidden_dim: usize, num_classes: usize) -> Self {
        Self::from_rng(input_dim, hidden_dim, num_classes, &mut rand::thread_rng())
    }

    /// Create a model seeded for reproducible initialization
    pub fn seeded(input_dim: usize, hidden_dim: usize, num_classes: usize, seed: u64) -> Self {
        Self::from_rng(
            input_dim,
            hidden_dim,
            num_classes,
            &mut StdRng::seed_from_u64(seed),
        )
    }

    /// Create a model drawing initial weights from the given RNG
    pub fn from_rng(
        input_dim: usize,
        hidden_dim: usize,
        num_classes: usize,
        rng: &mut impl Rng,
    ) -> Self {
        Self {
            gcn1: GcnLayer::new(input_dim, hidden_dim, WeightInit::He, rng),
            gcn2: GcnLayer::new(hidden_dim, hidden_dim, WeightInit::He, rng),
            dense: DenseLayer::new(hidden_dim * 2, num_classes, rng),
            input_dim,
            hidden_dim,
            num_classes,
            cache: None,
        }
    }

    /// Input feature dimensionality
    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    /// Hidden embedding dimensionality
    pub fn hidden_dim(&self) -> usize {
        self.hidden_dim
    }

    /// Number of output classes
    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Run the forward pass and return class probabilities.
    ///
    /// Caches every intermediate activation for the next backward call.
    pub fn forward(&mut self, a: &Array2<f32>, x: &Array2<f32>) -> TrainResult<Array1<f32>> {
        let n = x.nrows();
        if n == 0 {
            return Err(TrainError::Graph(wastegraph_core::GraphError::EmptyGraph));
        }
        if x.ncols() != self.input_dim {
            return Err(TrainError::ShapeMismatch {
                context: "model forward features",
                expected: self.input_dim.to_string(),
                actual: x.ncols().to_string(),
            });
        }
        if a.dim() != (n, n) {
            return Err(TrainError::ShapeMismatch {
                context: "model forward adjacency",
                expected: format!("({n}, {n})"),
                actual: format!("{:?}", a.dim()),
            });
        }

        let z1 = self.gcn1.forward(a, x);
        let h1 = leaky_relu(&z1);
        let z2 = self.gcn2.forward(a, &h1);
        let h2 = leaky_relu(&z2);

        let mean = mean_pool(&h2);
        let (max, max_indices) = max_pool_with_indices(&h2);

        let mut combined = Array1::zeros(self.hidden_dim * 2);
        for j in 0..self.hidden_dim {
            combined[j] = mean[j];
            combined[self.hidden_dim + j] = max[j];
        }

        let logits = self.dense.forward(&combined)?;
        let probs = softmax(&logits.insert_axis(Axis(0)));
        let probs = probs.row(0).to_owned();

        self.cache = Some(ForwardCache {
            z1,
            h1,
            z2,
            h2,
            combined,
            max_indices,
        });
        Ok(probs)
    }

    /// Hand-derived backward pass over the cached forward activations.
    ///
    /// `d_output` is the output-layer gradient (predicted minus one-hot for
    /// softmax + cross-entropy). Returns one weight gradient per parameter
    /// group; the caller owns accumulation, scaling, clipping and the
    /// optimizer step.
    pub fn backward(
        &self,
        a: &Array2<f32>,
        x: &Array2<f32>,
        d_output: &Array1<f32>,
    ) -> TrainResult<ModelGradients> {
        let cache = self.cache.as_ref().ok_or(TrainError::MissingForwardCache)?;
        if d_output.len() != self.num_classes {
            return Err(TrainError::ShapeMismatch {
                context: "backward output gradient",
                expected: self.num_classes.to_string(),
                actual: d_output.len().to_string(),
            });
        }

        // Dense layer: weight gradient and gradient into the pooled vector
        let grad_dense = Array2::from_shape_fn(
            (self.num_classes, self.hidden_dim * 2),
            |(i, j)| d_output[i] * cache.combined[j],
        );
        let d_combined = self.dense.weights.t().dot(d_output);

        // Pooling backward: mean half split equally, max half argmax-routed
        let d_h2 = pool_backward(&d_combined, cache.h2.nrows(), &cache.max_indices);

        // Layer 2
        let d_z2 = &d_h2 * &leaky_relu_gradient(&cache.z2);
        let grad_gcn2 = cache.h1.t().dot(&a.dot(&d_z2));
        let d_h1 = a.dot(&d_z2.dot(&self.gcn2.weights.t()));

        // Layer 1
        let d_z1 = &d_h1 * &leaky_relu_gradient(&cache.z1);
        let grad_gcn1 = x.t().dot(&a.dot(&d_z1));

        Ok(ModelGradients {
            gcn1: grad_gcn1,
            gcn2: grad_gcn2,
            dense: grad_dense,
        })
    }

    /// Zeroed gradient buffers shaped like this model's parameter groups
    pub fn zero_gradients(&self) -> ModelGradients {
        ModelGradients {
            gcn1: Array2::zeros(self.gcn1.weights.raw_dim()),
            gcn2: Array2::zeros(self.gcn2.weights.raw_dim()),
            dense: Array2::zeros(self.dense.weights.raw_dim()),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;
    use wastegraph_core::normalize_adjacency;

    fn test_inputs(n: usize, d: usize) -> (Array2<f32>, Array2<f32>) {
        let mut a = Array2::zeros((n, n));
        for i in 0..n {
            a[[i, i]] = 1.0;
            a[[i, (i + 1) % n]] = 1.0;
            a[[(i + 1) % n, i]] = 1.0;
        }
        let a = normalize_adjacency(&a);
        let x = Array2::from_shape_fn((n, d), |(i, j)| ((i * d + j) as f32 * 0.7).sin());
        (a, x)
    }

    #[test]
    fn test_leaky_relu() {
        let x = arr2(&[[2.0, -1.0], [0.0, -100.0]]);
        let y = leaky_relu(&x);
        assert_eq!(y[[0, 0]], 2.0);
        assert!((y[[0, 1]] + 0.01).abs() < 1e-6);
        assert_eq!(y[[1, 0]], 0.0);
        assert!((y[[1, 1]] + 1.0).abs() < 1e-6);

        let g = leaky_relu_gradient(&x);
        assert_eq!(g[[0, 0]], 1.0);
        assert_eq!(g[[0, 1]], 0.01);
        assert_eq!(g[[1, 0]], 0.01);
    }

    #[test]
    fn test_argmax() {
        let v = Array1::from_vec(vec![0.1, 0.7, 0.2]);
        assert_eq!(argmax(&v), 1);
        let tie = Array1::from_vec(vec![0.5, 0.5]);
        assert_eq!(argmax(&tie), 0);
    }

    #[test]
    fn test_layer_norm_normalizes_rows() {
        let ln = LayerNorm::new(4);
        let x = arr2(&[[1.0, 2.0, 3.0, 4.0], [10.0, 10.0, 20.0, 20.0]]);
        let y = ln.forward(&x);

        for row in y.outer_iter() {
            let mean: f32 = row.sum() / 4.0;
            let var: f32 = row.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / 4.0;
            assert!(mean.abs() < 1e-4);
            assert!((var - 1.0).abs() < 1e-2);
        }
    }

    #[test]
    fn test_weight_init_std() {
        assert!((WeightInit::He.std(8, 4) - 0.5).abs() < 1e-6);
        assert!((WeightInit::Xavier.std(8, 8) - 0.5).abs() < 1e-6);
        assert!((WeightInit::LeCun.std(4, 8) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_gcn_layer_init_within_bounds() {
        let mut rng = StdRng::seed_from_u64(1);
        let layer = GcnLayer::new(6, 4, WeightInit::He, &mut rng);
        let std = WeightInit::He.std(6, 4);
        assert!(layer.weights.iter().all(|w| w.abs() <= std));
        assert!(layer.bias.iter().all(|&b| b == 0.0));
    }

    #[test]
    fn test_mean_pool() {
        let x = arr2(&[[1.0, 4.0], [3.0, 0.0]]);
        let m = mean_pool(&x);
        assert!((m[0] - 2.0).abs() < 1e-6);
        assert!((m[1] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_max_pool_records_indices() {
        let x = arr2(&[[1.0, 4.0], [3.0, 0.0], [2.0, -1.0]]);
        let (m, idx) = max_pool_with_indices(&x);
        assert_eq!(m[0], 3.0);
        assert_eq!(m[1], 4.0);
        assert_eq!(idx, vec![1, 0]);
    }

    #[test]
    fn test_forward_probabilities_sum_to_one() {
        let mut model = GcnModel::seeded(5, 4, 3, 42);
        let (a, x) = test_inputs(6, 5);
        let probs = model.forward(&a, &x).unwrap();

        assert_eq!(probs.len(), 3);
        let sum: f32 = probs.sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!(probs.iter().all(|&p| p >= 0.0 && p.is_finite()));
    }

    #[test]
    fn test_forward_rejects_bad_shapes() {
        let mut model = GcnModel::seeded(5, 4, 3, 42);

        let empty = Array2::<f32>::zeros((0, 5));
        let a0 = Array2::<f32>::zeros((0, 0));
        assert!(model.forward(&a0, &empty).is_err());

        let (a, _) = test_inputs(6, 5);
        let wrong_dim = Array2::<f32>::zeros((6, 7));
        assert!(matches!(
            model.forward(&a, &wrong_dim).unwrap_err(),
            TrainError::ShapeMismatch { .. }
        ));

        let x = Array2::<f32>::zeros((6, 5));
        let bad_a = Array2::<f32>::zeros((4, 4));
        assert!(matches!(
            model.forward(&bad_a, &x).unwrap_err(),
            TrainError::ShapeMismatch { .. }
        ));
    }

    #[test]
    fn test_backward_requires_forward() {
        let model = GcnModel::seeded(5, 4, 3, 42);
        let (a, x) = test_inputs(6, 5);
        let d_out = Array1::zeros(3);
        assert!(matches!(
            model.backward(&a, &x, &d_out).unwrap_err(),
            TrainError::MissingForwardCache
        ));
    }

    #[test]
    fn test_backward_gradient_shapes() {
        let mut model = GcnModel::seeded(5, 4, 3, 42);
        let (a, x) = test_inputs(6, 5);
        let probs = model.forward(&a, &x).unwrap();

        let mut label = Array1::zeros(3);
        label[1] = 1.0;
        let d_out = &probs - &label;
        let grads = model.backward(&a, &x, &d_out).unwrap();

        assert_eq!(grads.gcn1.dim(), (5, 4));
        assert_eq!(grads.gcn2.dim(), (4, 4));
        assert_eq!(grads.dense.dim(), (3, 8));
        assert!(grads.gcn1.iter().all(|g| g.is_finite()));
        assert!(grads.gcn2.iter().all(|g| g.is_finite()));
        assert!(grads.dense.iter().all(|g| g.is_finite()));
    }

    #[test]
    fn test_backward_dense_gradient_is_outer_product() {
        let mut model = GcnModel::seeded(5, 4, 3, 7);
        let (a, x) = test_inputs(5, 5);
        let probs = model.forward(&a, &x).unwrap();

        let mut label = Array1::zeros(3);
        label[0] = 1.0;
        let d_out = &probs - &label;
        let grads = model.backward(&a, &x, &d_out).unwrap();

        let combined = model.cache.as_ref().unwrap().combined.clone();
        for i in 0..3 {
            for j in 0..8 {
                assert!((grads.dense[[i, j]] - d_out[i] * combined[j]).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_pool_backward_mean_split_and_max_routing() {
        // hidden = 2, nodes = 4: mean half [0.8, -0.4], max half [1.0, 2.0]
        let d_combined = Array1::from_vec(vec![0.8, -0.4, 1.0, 2.0]);
        let max_indices = vec![3, 1];
        let d_nodes = pool_backward(&d_combined, 4, &max_indices);

        // Every node gets the equal mean share
        for i in 0..4 {
            let mut expected0 = 0.2;
            let mut expected1 = -0.1;
            if i == 3 {
                expected0 += 1.0;
            }
            if i == 1 {
                expected1 += 2.0;
            }
            assert!((d_nodes[[i, 0]] - expected0).abs() < 1e-6);
            assert!((d_nodes[[i, 1]] - expected1).abs() < 1e-6);
        }
    }

    #[test]
    fn test_seeded_models_identical() {
        let mut m1 = GcnModel::seeded(5, 4, 3, 99);
        let mut m2 = GcnModel::seeded(5, 4, 3, 99);
        assert_eq!(m1.gcn1.weights, m2.gcn1.weights);
        assert_eq!(m1.dense.weights, m2.dense.weights);

        let (a, x) = test_inputs(6, 5);
        let p1 = m1.forward(&a, &x).unwrap();
        let p2 = m2.forward(&a, &x).unwrap();
        assert_eq!(p1, p2);
    }

    #[test]
    fn test_forward_overwrites_cache() {
        let mut model = GcnModel::seeded(5, 4, 3, 42);
        let (a, x) = test_inputs(6, 5);
        model.forward(&a, &x).unwrap();
        let first = model.cache.as_ref().unwrap().combined.clone();

        let (a2, x2) = test_inputs(4, 5);
        model.forward(&a2, &x2).unwrap();
        let second = model.cache.as_ref().unwrap().combined.clone();
        assert_ne!(first, second);
        assert_eq!(model.cache.as_ref().unwrap().h2.nrows(), 4);
    }
}
