//! # wastegraph-core
//!
//! Region graph data model for waste-image classification.
//!
//! This crate provides:
//! - `RegionGraph` - one image's superpixel regions as an undirected graph
//! - Feature / label matrix extraction for the GCN
//! - Degree-normalized adjacency construction (Kipf-Welling rule)
//! - Row-wise numerically stable softmax
//! - Binary persistence for graph lists (training replay)
//!
//! A `RegionGraph` is produced once by the vision pipeline and consumed
//! read-only by the model. Self-loops are never stored as edges; they are
//! introduced only when the adjacency matrix is built.

use ndarray::{Array1, Array2};
use petgraph::graph::{NodeIndex, UnGraph};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod persist;

pub use persist::{load_graph_list, save_graph_list, PersistError, PersistResult};

// ============================================================================
// Error Types
// ============================================================================

/// Errors in region graph construction and matrix extraction
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Graph has no nodes")]
    EmptyGraph,
    #[error("Label length mismatch: expected {expected}, got {actual}")]
    LabelLength { expected: usize, actual: usize },
    #[error("Feature length mismatch: expected {expected}, got {actual}")]
    FeatureLength { expected: usize, actual: usize },
    #[error("Invalid node index: {0}")]
    InvalidNode(usize),
    #[error("Self-loop edges are not stored (node {0})")]
    SelfLoop(usize),
    #[error("Invalid class index: {0}")]
    InvalidClass(usize),
}

/// Result type for graph operations
pub type GraphResult<T> = Result<T, GraphError>;

/// Epsilon added to normalization denominators
pub const NORM_EPS: f32 = 1e-8;

// ============================================================================
// Region Node
// ============================================================================

/// One superpixel region: a feature vector plus a one-hot class label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionNode {
    /// Region feature vector (24-dim in the standard pipeline)
    pub features: Vec<f32>,
    /// One-hot label, length equals the graph's class count
    pub label: Vec<f32>,
}

// ============================================================================
// Region Graph
// ============================================================================

/// An image represented as an undirected graph of superpixel regions.
///
/// Nodes are ordered by insertion; matrix rows follow that order. All node
/// feature vectors in one graph share the same dimensionality and every
/// label has length `num_classes` (checked on insert).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionGraph {
    graph: UnGraph<RegionNode, ()>,
    num_classes: usize,
}

impl RegionGraph {
    /// Create an empty graph for the given class count
    pub fn new(num_classes: usize) -> Self {
        Self {
            graph: UnGraph::new_undirected(),
            num_classes,
        }
    }

    /// Number of classes this graph's labels are sized for
    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Number of nodes
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of stored edges (each undirected link counted once)
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Add a node; returns its index.
    ///
    /// The label must have length `num_classes` and the feature vector must
    /// match the dimensionality of the first node.
    pub fn add_node(&mut self, features: Vec<f32>, label: Vec<f32>) -> GraphResult<usize> {
        if label.len() != self.num_classes {
            return Err(GraphError::LabelLength {
                expected: self.num_classes,
                actual: label.len(),
            });
        }
        if let Some(first) = self.graph.node_weight(NodeIndex::new(0)) {
            if features.len() != first.features.len() {
                return Err(GraphError::FeatureLength {
                    expected: first.features.len(),
                    actual: features.len(),
                });
            }
        }
        let idx = self.graph.add_node(RegionNode { features, label });
        Ok(idx.index())
    }

    /// Add an undirected edge between node indices `i` and `j`.
    ///
    /// Self-loops are rejected: they belong to the adjacency-matrix stage.
    pub fn add_edge(&mut self, i: usize, j: usize) -> GraphResult<()> {
        let n = self.node_count();
        if i >= n {
            return Err(GraphError::InvalidNode(i));
        }
        if j >= n {
            return Err(GraphError::InvalidNode(j));
        }
        if i == j {
            return Err(GraphError::SelfLoop(i));
        }
        self.graph
            .add_edge(NodeIndex::new(i), NodeIndex::new(j), ());
        Ok(())
    }

    /// Borrow a node by index
    pub fn node(&self, i: usize) -> Option<&RegionNode> {
        self.graph.node_weight(NodeIndex::new(i))
    }

    /// Set the one-hot label of a single node
    pub fn set_node_label(&mut self, i: usize, label: Vec<f32>) -> GraphResult<()> {
        if label.len() != self.num_classes {
            return Err(GraphError::LabelLength {
                expected: self.num_classes,
                actual: label.len(),
            });
        }
        match self.graph.node_weight_mut(NodeIndex::new(i)) {
            Some(node) => {
                node.label = label;
                Ok(())
            }
            None => Err(GraphError::InvalidNode(i)),
        }
    }

    /// Set every node's label to the one-hot vector for `class`.
    ///
    /// The trainer reads the graph-level label from node 0; writing the same
    /// label everywhere keeps that convention sound.
    pub fn set_uniform_label(&mut self, class: usize) -> GraphResult<()> {
        if class >= self.num_classes {
            return Err(GraphError::InvalidClass(class));
        }
        let mut one_hot = vec![0.0; self.num_classes];
        one_hot[class] = 1.0;
        for node in self.graph.node_weights_mut() {
            node.label = one_hot.clone();
        }
        Ok(())
    }

    /// Feature matrix of shape [n x d], rows in node order
    pub fn feature_matrix(&self) -> GraphResult<Array2<f32>> {
        let n = self.node_count();
        if n == 0 {
            return Err(GraphError::EmptyGraph);
        }
        let d = self.graph[NodeIndex::new(0)].features.len();
        let mut x = Array2::zeros((n, d));
        for (i, node) in self.graph.node_weights().enumerate() {
            for (j, &v) in node.features.iter().enumerate() {
                x[[i, j]] = v;
            }
        }
        Ok(x)
    }

    /// Label matrix of shape [n x num_classes]
    pub fn label_matrix(&self) -> GraphResult<Array2<f32>> {
        let n = self.node_count();
        if n == 0 {
            return Err(GraphError::EmptyGraph);
        }
        let mut l = Array2::zeros((n, self.num_classes));
        for (i, node) in self.graph.node_weights().enumerate() {
            for (j, &v) in node.label.iter().enumerate() {
                l[[i, j]] = v;
            }
        }
        Ok(l)
    }

    /// Graph-level one-hot label: by convention, the label of node 0
    pub fn graph_level_label(&self) -> GraphResult<Array1<f32>> {
        match self.graph.node_weight(NodeIndex::new(0)) {
            Some(node) => Ok(Array1::from_vec(node.label.clone())),
            None => Err(GraphError::EmptyGraph),
        }
    }

    /// Degree-normalized adjacency matrix with self-loops.
    ///
    /// A[i][j] = 1 for every stored edge (both directions), A[i][i] = 1,
    /// then A_norm[i][j] = A[i][j] / (sqrt(D[i]*D[j]) + eps) where D is the
    /// row sum taken after the self-loop is in place.
    pub fn normalized_adjacency(&self) -> GraphResult<Array2<f32>> {
        let n = self.node_count();
        if n == 0 {
            return Err(GraphError::EmptyGraph);
        }
        let mut a = Array2::zeros((n, n));
        for edge in self.graph.edge_indices() {
            if let Some((s, t)) = self.graph.edge_endpoints(edge) {
                a[[s.index(), t.index()]] = 1.0;
                a[[t.index(), s.index()]] = 1.0;
            }
        }
        for i in 0..n {
            a[[i, i]] = 1.0;
        }
        Ok(normalize_adjacency(&a))
    }
}

// ============================================================================
// Numeric Utilities
// ============================================================================

/// Symmetric renormalization of an adjacency matrix that already carries
/// self-loops: A_norm[i][j] = A[i][j] / (sqrt(D[i]*D[j]) + eps).
pub fn normalize_adjacency(a: &Array2<f32>) -> Array2<f32> {
    let n = a.nrows();
    let mut degree = Array1::<f32>::zeros(n);
    for i in 0..n {
        degree[i] = a.row(i).sum();
    }
    let mut norm = Array2::zeros((n, n));
    for i in 0..n {
        for j in 0..n {
            norm[[i, j]] = a[[i, j]] / ((degree[i] * degree[j]).sqrt() + NORM_EPS);
        }
    }
    norm
}

/// Row-wise softmax with the row maximum subtracted before exponentiation.
pub fn softmax(x: &Array2<f32>) -> Array2<f32> {
    let mut out = Array2::zeros(x.raw_dim());
    for (i, row) in x.outer_iter().enumerate() {
        let max = row.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        let mut sum = 0.0;
        for (j, &v) in row.iter().enumerate() {
            let e = (v - max).exp();
            out[[i, j]] = e;
            sum += e;
        }
        for j in 0..row.len() {
            out[[i, j]] /= sum;
        }
    }
    out
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    fn ring_graph(n: usize, classes: usize) -> RegionGraph {
        let mut g = RegionGraph::new(classes);
        for i in 0..n {
            let mut label = vec![0.0; classes];
            label[i % classes] = 1.0;
            g.add_node(vec![i as f32; 4], label).unwrap();
        }
        for i in 0..n {
            g.add_edge(i, (i + 1) % n).unwrap();
        }
        g
    }

    #[test]
    fn test_add_node_label_length_checked() {
        let mut g = RegionGraph::new(3);
        let err = g.add_node(vec![0.0; 4], vec![1.0, 0.0]).unwrap_err();
        assert!(matches!(
            err,
            GraphError::LabelLength {
                expected: 3,
                actual: 2
            }
        ));
    }

    #[test]
    fn test_add_node_feature_length_checked() {
        let mut g = RegionGraph::new(2);
        g.add_node(vec![0.0; 4], vec![1.0, 0.0]).unwrap();
        let err = g.add_node(vec![0.0; 5], vec![0.0, 1.0]).unwrap_err();
        assert!(matches!(err, GraphError::FeatureLength { expected: 4, .. }));
    }

    #[test]
    fn test_add_edge_bounds_and_self_loop() {
        let mut g = ring_graph(3, 2);
        assert!(matches!(
            g.add_edge(0, 9).unwrap_err(),
            GraphError::InvalidNode(9)
        ));
        assert!(matches!(
            g.add_edge(1, 1).unwrap_err(),
            GraphError::SelfLoop(1)
        ));
    }

    #[test]
    fn test_feature_matrix_shape() {
        let g = ring_graph(5, 2);
        let x = g.feature_matrix().unwrap();
        assert_eq!(x.dim(), (5, 4));
        assert!((x[[3, 0]] - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_empty_graph_rejected() {
        let g = RegionGraph::new(4);
        assert!(matches!(
            g.feature_matrix().unwrap_err(),
            GraphError::EmptyGraph
        ));
        assert!(matches!(
            g.normalized_adjacency().unwrap_err(),
            GraphError::EmptyGraph
        ));
        assert!(matches!(
            g.graph_level_label().unwrap_err(),
            GraphError::EmptyGraph
        ));
    }

    #[test]
    fn test_graph_level_label_is_first_node() {
        let g = ring_graph(4, 2);
        let label = g.graph_level_label().unwrap();
        assert_eq!(label.to_vec(), vec![1.0, 0.0]);
    }

    #[test]
    fn test_set_uniform_label() {
        let mut g = ring_graph(4, 3);
        g.set_uniform_label(2).unwrap();
        for i in 0..4 {
            assert_eq!(g.node(i).unwrap().label, vec![0.0, 0.0, 1.0]);
        }
        assert!(matches!(
            g.set_uniform_label(3).unwrap_err(),
            GraphError::InvalidClass(3)
        ));
    }

    #[test]
    fn test_set_node_label() {
        let mut g = ring_graph(3, 2);
        g.set_node_label(1, vec![0.0, 1.0]).unwrap();
        assert_eq!(g.node(1).unwrap().label, vec![0.0, 1.0]);

        assert!(matches!(
            g.set_node_label(9, vec![0.0, 1.0]).unwrap_err(),
            GraphError::InvalidNode(9)
        ));
        assert!(matches!(
            g.set_node_label(0, vec![1.0]).unwrap_err(),
            GraphError::LabelLength {
                expected: 2,
                actual: 1
            }
        ));
    }

    #[test]
    fn test_normalized_adjacency_symmetric() {
        let g = ring_graph(6, 2);
        let a = g.normalized_adjacency().unwrap();
        assert_eq!(a.dim(), (6, 6));
        for i in 0..6 {
            for j in 0..6 {
                assert!((a[[i, j]] - a[[j, i]]).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_normalized_adjacency_diagonal_reflects_self_loop() {
        // Ring node degree = 2 neighbors + 1 self-loop = 3
        let g = ring_graph(6, 2);
        let a = g.normalized_adjacency().unwrap();
        for i in 0..6 {
            assert!((a[[i, i]] - 1.0 / 3.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_normalize_adjacency_isolated_node() {
        // Single node with only its self-loop: degree 1, diagonal 1
        let a = arr2(&[[1.0]]);
        let norm = normalize_adjacency(&a);
        assert!((norm[[0, 0]] - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let x = arr2(&[[1.0, 2.0, 3.0], [0.0, 0.0, 0.0]]);
        let s = softmax(&x);
        for row in s.outer_iter() {
            let sum: f32 = row.sum();
            assert!((sum - 1.0).abs() < 1e-5);
        }
        assert!(s[[0, 2]] > s[[0, 1]] && s[[0, 1]] > s[[0, 0]]);
    }

    #[test]
    fn test_softmax_extreme_logits() {
        let x = arr2(&[[1000.0, 999.0, -1000.0], [-500.0, -501.0, -502.0]]);
        let s = softmax(&x);
        for row in s.outer_iter() {
            let sum: f32 = row.sum();
            assert!((sum - 1.0).abs() < 1e-5);
            assert!(row.iter().all(|v| v.is_finite()));
        }
        assert!(s[[0, 0]] > s[[0, 1]]);
    }

    #[test]
    fn test_label_matrix() {
        let g = ring_graph(4, 2);
        let l = g.label_matrix().unwrap();
        assert_eq!(l.dim(), (4, 2));
        assert!((l.row(0)[0] - 1.0).abs() < 1e-6);
        assert!((l.row(1)[1] - 1.0).abs() < 1e-6);
    }
}
