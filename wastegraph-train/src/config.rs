//! TOML configuration file for the training CLI.
//!
//! Every section and field has a default, so a partial file (or none at
//! all) is valid; CLI flags override whatever the file provides.

use crate::trainer::DEFAULT_LR;
use crate::{TrainError, TrainResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level config file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Training loop parameters
    #[serde(default)]
    pub training: TrainingSection,
    /// Segmentation parameters
    #[serde(default)]
    pub vision: VisionSection,
    /// Input and output locations
    #[serde(default)]
    pub paths: PathsSection,
}

/// `[training]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSection {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f32,
    pub hidden_size: usize,
    /// Seed for weight init and shuffling; absent means entropy-seeded
    pub seed: Option<u64>,
}

impl Default for TrainingSection {
    fn default() -> Self {
        Self {
            epochs: 50,
            batch_size: 8,
            learning_rate: DEFAULT_LR,
            hidden_size: 16,
            seed: None,
        }
    }
}

/// `[vision]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionSection {
    pub superpixels: usize,
    pub compactness: f32,
}

impl Default for VisionSection {
    fn default() -> Self {
        Self {
            superpixels: 75,
            compactness: 10.0,
        }
    }
}

/// `[paths]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsSection {
    /// Class-per-subdirectory image tree
    pub data_dir: String,
    /// Optional separate validation tree; empty means split from data_dir
    pub val_dir: String,
    /// Checkpoint output directory
    pub output_dir: String,
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            data_dir: String::new(),
            val_dir: String::new(),
            output_dir: "saved_sessions".to_string(),
        }
    }
}

impl ConfigFile {
    /// Load and parse a TOML config file
    pub fn load<P: AsRef<Path>>(path: P) -> TrainResult<Self> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| TrainError::Config(e.to_string()))
    }
}
