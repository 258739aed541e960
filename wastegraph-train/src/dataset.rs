//! Dataset assembly from a class-per-subdirectory image tree.
//!
//! Every image under `<root>/<class-name>/` becomes one region graph with
//! all node labels set to the class one-hot, which keeps the graph-level
//! "label of node 0" convention sound for every graph this module produces.
//! Graph construction is parallelized per image; it happens before training
//! starts and never overlaps the sequential training core.

use crate::{TrainError, TrainResult};
use rand::Rng;
use rand::seq::SliceRandom;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use wastegraph_core::RegionGraph;
use wastegraph_vision::{graph_from_raw, RawImage, SlicConfig};

/// Graphs plus the class names they were labeled with
#[derive(Debug, Clone)]
pub struct LabeledDataset {
    /// One graph per successfully converted image
    pub graphs: Vec<RegionGraph>,
    /// Class names in label order (sorted subdirectory names)
    pub class_names: Vec<String>,
}

/// Enumerate `<root>/<class>/<image>` paths.
///
/// Returns the sorted class names and one `(class index, path)` entry per
/// regular file.
pub fn collect_labeled_paths<P: AsRef<Path>>(
    root: P,
) -> TrainResult<(Vec<String>, Vec<(usize, PathBuf)>)> {
    let root = root.as_ref();
    let mut class_names = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            class_names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    class_names.sort();
    if class_names.is_empty() {
        return Err(TrainError::EmptyDataset(root.display().to_string()));
    }

    let mut entries = Vec::new();
    for (class, name) in class_names.iter().enumerate() {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(root.join(name))? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
        entries.extend(files.into_iter().map(|p| (class, p)));
    }
    Ok((class_names, entries))
}

/// Convert images to labeled graphs in parallel.
///
/// Unreadable or unconvertible files are reported to stderr and skipped;
/// `progress` is invoked once per attempted file.
pub fn build_graphs<F>(
    entries: &[(usize, PathBuf)],
    num_classes: usize,
    slic: &SlicConfig,
    progress: F,
) -> Vec<RegionGraph>
where
    F: Fn() + Sync,
{
    let results: Vec<Option<RegionGraph>> = entries
        .par_iter()
        .map(|(class, path)| {
            let graph = RawImage::open(path)
                .and_then(|image| graph_from_raw(&image, num_classes, slic))
                .and_then(|mut graph| {
                    graph.set_uniform_label(*class)?;
                    Ok(graph)
                });
            progress();
            match graph {
                Ok(graph) => Some(graph),
                Err(err) => {
                    eprintln!("Skipping {}: {}", path.display(), err);
                    None
                }
            }
        })
        .collect();
    results.into_iter().flatten().collect()
}

/// Build a labeled dataset from a class-per-subdirectory image tree
pub fn build_dataset<P: AsRef<Path>>(root: P, slic: &SlicConfig) -> TrainResult<LabeledDataset> {
    let (class_names, entries) = collect_labeled_paths(root)?;
    let graphs = build_graphs(&entries, class_names.len(), slic, || {});
    Ok(LabeledDataset {
        graphs,
        class_names,
    })
}

/// Shuffle and split graphs into (training, validation) by ratio
pub fn split_dataset(
    mut graphs: Vec<RegionGraph>,
    val_ratio: f64,
    rng: &mut impl Rng,
) -> (Vec<RegionGraph>, Vec<RegionGraph>) {
    graphs.shuffle(rng);
    let val_len = (graphs.len() as f64 * val_ratio) as usize;
    let validation = graphs.split_off(graphs.len() - val_len);
    (graphs, validation)
}
