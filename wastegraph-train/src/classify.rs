//! Inference entry point: an explicit handle over a loaded model.
//!
//! The handle owns the model and its class names; there is no process-wide
//! shared model. Construct one per consumer and pass it where inference is
//! needed.

use crate::checkpoint::Checkpoint;
use crate::model::{argmax, GcnModel};
use crate::TrainResult;
use std::path::Path;
use wastegraph_core::RegionGraph;
use wastegraph_vision::{graph_from_raw, RawImage, SlicConfig};

/// Default waste material class names, in label order
pub const DEFAULT_CLASS_NAMES: [&str; 4] = ["metal", "paper", "plastic", "brown-glass"];

/// Result of classifying one image
#[derive(Debug, Clone)]
pub struct ClassificationOutput {
    /// Predicted class index
    pub predicted_class: usize,
    /// Probability of the predicted class
    pub confidence: f32,
    /// Full class probability vector
    pub probabilities: Vec<f32>,
    /// Class name for the prediction, when one is configured
    pub label: Option<String>,
}

/// Classifier handle owning a loaded model plus class names.
#[derive(Debug)]
pub struct Classifier {
    model: GcnModel,
    labels: Vec<String>,
    slic: SlicConfig,
}

impl Classifier {
    /// Wrap an already-built model.
    ///
    /// Four-class models get the default waste material names; other class
    /// counts get numeric names until `with_labels` overrides them.
    pub fn new(model: GcnModel) -> Self {
        let labels = if model.num_classes() == DEFAULT_CLASS_NAMES.len() {
            DEFAULT_CLASS_NAMES.iter().map(|s| s.to_string()).collect()
        } else {
            (0..model.num_classes()).map(|i| i.to_string()).collect()
        };
        Self {
            model,
            labels,
            slic: SlicConfig::default(),
        }
    }

    /// Load a model from a checkpoint; dimensions are read from the stored
    /// weight shapes.
    pub fn from_checkpoint<P: AsRef<Path>>(path: P) -> TrainResult<Self> {
        let ckpt = Checkpoint::load(path)?;
        let (input_dim, hidden_dim, num_classes) = ckpt.model_dims();
        let mut model = GcnModel::new(input_dim, hidden_dim, num_classes);
        ckpt.apply_to_model(&mut model)?;
        Ok(Self::new(model))
    }

    /// Override the class names (ignored unless the length matches)
    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        if labels.len() == self.model.num_classes() {
            self.labels = labels;
        }
        self
    }

    /// Override the segmentation parameters used for incoming images
    pub fn with_slic_config(mut self, slic: SlicConfig) -> Self {
        self.slic = slic;
        self
    }

    /// Class names in label order
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Class name for an index
    pub fn label(&self, class: usize) -> Option<&str> {
        self.labels.get(class).map(|s| s.as_str())
    }

    /// Decode an image file, run the pipeline, and classify the graph
    pub fn classify_image<P: AsRef<Path>>(&mut self, path: P) -> TrainResult<ClassificationOutput> {
        let image = RawImage::open(path)?;
        let graph = graph_from_raw(&image, self.model.num_classes(), &self.slic)?;
        self.classify_graph(&graph)
    }

    /// Classify an already-built region graph
    pub fn classify_graph(&mut self, graph: &RegionGraph) -> TrainResult<ClassificationOutput> {
        let a = graph.normalized_adjacency()?;
        let x = graph.feature_matrix()?;
        let probs = self.model.forward(&a, &x)?;

        let predicted_class = argmax(&probs);
        Ok(ClassificationOutput {
            predicted_class,
            confidence: probs[predicted_class],
            probabilities: probs.to_vec(),
            label: self.labels.get(predicted_class).cloned(),
        })
    }
}
