//! # wastegraph-vision
//!
//! Image-to-graph pipeline for waste classification.
//!
//! This crate provides:
//! - `RawImage` - validated RGB raster, decoded and resized to 64x64
//! - SLIC superpixel segmentation in CIELAB space
//! - Per-region feature extraction with a background mask
//! - KNN graph construction over enhanced 24-dim region features
//! - `graph_from_image` - the full file-to-`RegionGraph` pipeline
//!
//! ```text
//! Image file -> RawImage -> Segmentation -> RegionFeatures -> RegionGraph
//!             (decode+resize)   (SLIC)      (stats+mask)     (16-NN edges)
//! ```
//!
//! The pipeline is deterministic: the same image always produces the same
//! graph.

use image::imageops::FilterType;
use ndarray::{Array1, Array2};
use std::collections::BinaryHeap;
use std::path::Path;
use thiserror::Error;
use wastegraph_core::{GraphError, RegionGraph};

// ============================================================================
// Error Types
// ============================================================================

/// Errors in the image-to-graph pipeline
#[derive(Error, Debug)]
pub enum VisionError {
    #[error("Invalid image dimensions: {0}x{1}")]
    InvalidDimensions(usize, usize),
    #[error("Pixel count mismatch: expected {expected}, got {actual}")]
    PixelCountMismatch { expected: usize, actual: usize },
    #[error("Invalid superpixel count {0} for this image size")]
    InvalidSuperpixelCount(usize),
    #[error("Image produced no regions")]
    NoRegions,
    #[error("Image decode error: {0}")]
    Decode(#[from] image::ImageError),
    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Result type for vision operations
pub type VisionResult<T> = Result<T, VisionError>;

// ============================================================================
// Raw Image
// ============================================================================

/// Side length every input image is resized to before segmentation
pub const INPUT_SIZE: usize = 64;

/// Raw RGB image with pixel values normalized to 0.0-1.0.
///
/// Pixels are interleaved row-major: `[r, g, b, r, g, b, ...]`.
#[derive(Debug, Clone)]
pub struct RawImage {
    /// Interleaved RGB values in 0.0-1.0
    pub pixels: Vec<f32>,
    /// Image width in pixels
    pub width: usize,
    /// Image height in pixels
    pub height: usize,
}

impl RawImage {
    /// Create an RGB image from an interleaved buffer
    pub fn rgb(width: usize, height: usize, pixels: Vec<f32>) -> VisionResult<Self> {
        if width == 0 || height == 0 {
            return Err(VisionError::InvalidDimensions(width, height));
        }
        let expected = width * height * 3;
        if pixels.len() != expected {
            return Err(VisionError::PixelCountMismatch {
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            pixels,
            width,
            height,
        })
    }

    /// Decode an image file and resize it to the standard 64x64 input
    pub fn open<P: AsRef<Path>>(path: P) -> VisionResult<Self> {
        let decoded = image::open(path)?;
        let resized = decoded
            .resize_exact(INPUT_SIZE as u32, INPUT_SIZE as u32, FilterType::Triangle)
            .to_rgb8();
        let mut pixels = Vec::with_capacity(INPUT_SIZE * INPUT_SIZE * 3);
        for p in resized.pixels() {
            pixels.push(p[0] as f32 / 255.0);
            pixels.push(p[1] as f32 / 255.0);
            pixels.push(p[2] as f32 / 255.0);
        }
        Self::rgb(INPUT_SIZE, INPUT_SIZE, pixels)
    }

    /// RGB triple at (x, y)
    pub fn get_rgb(&self, x: usize, y: usize) -> [f32; 3] {
        let base = (y * self.width + x) * 3;
        [self.pixels[base], self.pixels[base + 1], self.pixels[base + 2]]
    }

    /// Total pixel count
    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }
}

// ============================================================================
// Color Conversion
// ============================================================================

/// Convert sRGB in 0.0-1.0 to CIELAB (D65 white point).
pub fn rgb_to_lab(rgb: [f32; 3]) -> [f32; 3] {
    fn linearize(c: f32) -> f32 {
        if c > 0.04045 {
            ((c + 0.055) / 1.055).powf(2.4)
        } else {
            c / 12.92
        }
    }
    fn lab_f(t: f32) -> f32 {
        if t > 0.008856 {
            t.powf(1.0 / 3.0)
        } else {
            7.787 * t + 16.0 / 116.0
        }
    }

    let r = linearize(rgb[0]);
    let g = linearize(rgb[1]);
    let b = linearize(rgb[2]);

    let x = (r * 0.4124 + g * 0.3576 + b * 0.1805) / 0.95047;
    let y = r * 0.2126 + g * 0.7152 + b * 0.0722;
    let z = (r * 0.0193 + g * 0.1192 + b * 0.9505) / 1.08883;

    let fx = lab_f(x);
    let fy = lab_f(y);
    let fz = lab_f(z);

    [116.0 * fy - 16.0, 500.0 * (fx - fy), 200.0 * (fy - fz)]
}

/// Convert RGB in 0.0-1.0 to hue/saturation/brightness, each in 0.0-1.0.
pub fn rgb_to_hsb(rgb: [f32; 3]) -> [f32; 3] {
    let [r, g, b] = rgb;
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);

    let brightness = max;
    let saturation = if max > 0.0 { (max - min) / max } else { 0.0 };

    let hue = if saturation == 0.0 {
        0.0
    } else {
        let d = max - min;
        let redc = (max - r) / d;
        let greenc = (max - g) / d;
        let bluec = (max - b) / d;
        let mut h = if r == max {
            bluec - greenc
        } else if g == max {
            2.0 + redc - bluec
        } else {
            4.0 + greenc - redc
        };
        h /= 6.0;
        if h < 0.0 {
            h += 1.0;
        }
        h
    };

    [hue, saturation, brightness]
}

// ============================================================================
// SLIC Superpixel Segmentation
// ============================================================================

/// Configuration for SLIC segmentation
#[derive(Debug, Clone)]
pub struct SlicConfig {
    /// Target superpixel count
    pub num_superpixels: usize,
    /// Compactness weight: higher favors spatially tight regions
    pub compactness: f32,
    /// Fixed assignment/update iterations
    pub iterations: usize,
}

impl Default for SlicConfig {
    fn default() -> Self {
        Self {
            num_superpixels: 75,
            compactness: 10.0,
            iterations: 10,
        }
    }
}

impl SlicConfig {
    /// Set the target superpixel count
    pub fn with_superpixels(mut self, count: usize) -> Self {
        self.num_superpixels = count;
        self
    }

    /// Set the compactness weight
    pub fn with_compactness(mut self, compactness: f32) -> Self {
        self.compactness = compactness;
        self
    }
}

/// Per-pixel region labels produced by SLIC
#[derive(Debug, Clone)]
pub struct Segmentation {
    /// One region label per pixel, row-major
    pub labels: Vec<usize>,
    /// Image width
    pub width: usize,
    /// Image height
    pub height: usize,
    /// Region count (max label + 1)
    pub num_regions: usize,
}

#[derive(Debug, Clone, Copy)]
struct ClusterCenter {
    l: f32,
    a: f32,
    b: f32,
    x: i64,
    y: i64,
}

fn color_spatial_distance(lab: [f32; 3], x: i64, y: i64, c: &ClusterCenter, s: f32, m: f32) -> f32 {
    let dc2 = (lab[0] - c.l).powi(2) + (lab[1] - c.a).powi(2) + (lab[2] - c.b).powi(2);
    let dx = (x - c.x) as f32;
    let dy = (y - c.y) as f32;
    let ds2 = dx * dx + dy * dy;
    (dc2 + ds2 * m * m / (s * s)).sqrt()
}

/// Cluster image pixels into superpixel regions.
///
/// Cluster centers are seeded on a grid spaced S = sqrt(pixels / K). Each of
/// the fixed iterations scans a window of radius S around every center and
/// assigns pixels to the center minimizing the combined color+spatial
/// distance, then recomputes centers as the mean color and position of their
/// assigned pixels. Centers that attracted no pixels are left zeroed rather
/// than divided by zero.
pub fn generate_superpixels(image: &RawImage, config: &SlicConfig) -> VisionResult<Segmentation> {
    let width = image.width;
    let height = image.height;
    if config.num_superpixels == 0 {
        return Err(VisionError::InvalidSuperpixelCount(0));
    }
    let s = ((width * height) as f64 / config.num_superpixels as f64).sqrt() as usize;
    if s == 0 {
        return Err(VisionError::InvalidSuperpixelCount(config.num_superpixels));
    }

    let mut lab = Vec::with_capacity(width * height);
    for y in 0..height {
        for x in 0..width {
            lab.push(rgb_to_lab(image.get_rgb(x, y)));
        }
    }

    let mut centers = Vec::new();
    let mut y = s / 2;
    while y < height {
        let mut x = s / 2;
        while x < width {
            let color = lab[y * width + x];
            centers.push(ClusterCenter {
                l: color[0],
                a: color[1],
                b: color[2],
                x: x as i64,
                y: y as i64,
            });
            x += s;
        }
        y += s;
    }

    let mut labels = vec![0usize; width * height];
    let mut distances = vec![f32::INFINITY; width * height];
    let radius = s as i64;
    let s_f = s as f32;

    for _ in 0..config.iterations {
        // Assignment: each center claims pixels in its local window
        for (k, center) in centers.iter().enumerate() {
            for dy in -radius..=radius {
                for dx in -radius..=radius {
                    let x = center.x + dx;
                    let y = center.y + dy;
                    if x < 0 || x >= width as i64 || y < 0 || y >= height as i64 {
                        continue;
                    }
                    let idx = y as usize * width + x as usize;
                    let d =
                        color_spatial_distance(lab[idx], x, y, center, s_f, config.compactness);
                    if d < distances[idx] {
                        distances[idx] = d;
                        labels[idx] = k;
                    }
                }
            }
        }

        // Update: recompute centers as the mean of their assigned pixels
        let mut sums = vec![(0.0f32, 0.0f32, 0.0f32, 0i64, 0i64); centers.len()];
        let mut counts = vec![0usize; centers.len()];
        for y in 0..height {
            for x in 0..width {
                let idx = y * width + x;
                let k = labels[idx];
                let c = lab[idx];
                sums[k].0 += c[0];
                sums[k].1 += c[1];
                sums[k].2 += c[2];
                sums[k].3 += x as i64;
                sums[k].4 += y as i64;
                counts[k] += 1;
            }
        }
        for (k, center) in centers.iter_mut().enumerate() {
            let count = counts[k];
            if count > 0 {
                center.l = sums[k].0 / count as f32;
                center.a = sums[k].1 / count as f32;
                center.b = sums[k].2 / count as f32;
                center.x = sums[k].3 / count as i64;
                center.y = sums[k].4 / count as i64;
            } else {
                *center = ClusterCenter {
                    l: 0.0,
                    a: 0.0,
                    b: 0.0,
                    x: 0,
                    y: 0,
                };
            }
        }
    }

    let num_regions = labels.iter().copied().max().unwrap_or(0) + 1;
    Ok(Segmentation {
        labels,
        width,
        height,
        num_regions,
    })
}

// ============================================================================
// Region Feature Extraction
// ============================================================================

/// Raw per-region feature dimensionality
pub const FEATURE_DIM: usize = 8;

/// Enhanced dimensionality after concatenating corpus mean and max
pub const ENHANCED_DIM: usize = FEATURE_DIM * 3;

/// Per-region features plus the background mask
#[derive(Debug, Clone)]
pub struct RegionFeatures {
    /// [regions x 8] matrix: mean R,G,B, hue, saturation, brightness,
    /// normalized x, normalized y
    pub features: Array2<f32>,
    /// true where a region is near-white and texture-less
    pub background: Vec<bool>,
}

/// Accumulate per-region color/position statistics and flag background.
///
/// A region is background iff all three RGB means exceed 0.96 and the
/// average RGB standard deviation is below 0.01. Regions with zero assigned
/// pixels keep zeroed features and are never flagged.
pub fn extract_region_features(image: &RawImage, seg: &Segmentation) -> RegionFeatures {
    let n = seg.num_regions;
    let mut features = Array2::<f32>::zeros((n, FEATURE_DIM));
    let mut sum_sq_rgb = vec![[0.0f32; 3]; n];
    let mut counts = vec![0usize; n];

    for y in 0..image.height {
        for x in 0..image.width {
            let label = seg.labels[y * seg.width + x];
            let rgb = image.get_rgb(x, y);
            let hsb = rgb_to_hsb(rgb);

            features[[label, 0]] += rgb[0];
            features[[label, 1]] += rgb[1];
            features[[label, 2]] += rgb[2];
            features[[label, 3]] += hsb[0];
            features[[label, 4]] += hsb[1];
            features[[label, 5]] += hsb[2];
            features[[label, 6]] += x as f32 / image.width as f32;
            features[[label, 7]] += y as f32 / image.height as f32;

            sum_sq_rgb[label][0] += rgb[0] * rgb[0];
            sum_sq_rgb[label][1] += rgb[1] * rgb[1];
            sum_sq_rgb[label][2] += rgb[2] * rgb[2];
            counts[label] += 1;
        }
    }

    let mut background = vec![false; n];
    for i in 0..n {
        if counts[i] == 0 {
            continue;
        }
        let count = counts[i] as f32;
        for j in 0..FEATURE_DIM {
            features[[i, j]] /= count;
        }

        let std_of = |channel: usize| -> f32 {
            let mean = features[[i, channel]];
            (sum_sq_rgb[i][channel] / count - mean * mean).max(0.0).sqrt()
        };
        let avg_std = (std_of(0) + std_of(1) + std_of(2)) / 3.0;

        let is_bright =
            features[[i, 0]] > 0.96 && features[[i, 1]] > 0.96 && features[[i, 2]] > 0.96;
        background[i] = is_bright && avg_std < 0.01;
    }

    RegionFeatures {
        features,
        background,
    }
}

/// Concatenate each row with the corpus-wide column mean and max: [n x d]
/// becomes [n x 3d].
pub fn enhance_features(base: &Array2<f32>) -> Array2<f32> {
    let n = base.nrows();
    let d = base.ncols();
    let mut mean = Array1::<f32>::zeros(d);
    let mut max = Array1::<f32>::from_elem(d, f32::NEG_INFINITY);

    for row in base.outer_iter() {
        for j in 0..d {
            mean[j] += row[j];
            if row[j] > max[j] {
                max[j] = row[j];
            }
        }
    }
    for j in 0..d {
        mean[j] /= n as f32;
    }

    let mut enhanced = Array2::<f32>::zeros((n, d * 3));
    for (i, row) in base.outer_iter().enumerate() {
        for j in 0..d {
            enhanced[[i, j]] = row[j];
            enhanced[[i, d + j]] = mean[j];
            enhanced[[i, 2 * d + j]] = max[j];
        }
    }
    enhanced
}

// ============================================================================
// KNN Graph Construction
// ============================================================================

/// Neighbors retained per node
pub const KNN_NEIGHBORS: usize = 16;

/// Scale applied to combined distances to form integer heap keys
const DISTANCE_KEY_SCALE: f32 = 1e6;

/// Connect every node to its 16 nearest neighbors by combined
/// spatial+color distance.
///
/// Spatial distance is Euclidean over dims 6..8 (normalized position),
/// color distance is Euclidean over dims 0..6. A bounded max-heap of
/// capacity 16 keeps the nearest candidates: once full, the current worst
/// is evicted only for a strictly smaller key. Emits one (i, j) pair per
/// surviving entry, exactly min(16, n-1) per node.
pub fn knn_edges(features: &Array2<f32>) -> Vec<(usize, usize)> {
    let n = features.nrows();
    let mut edges = Vec::with_capacity(n * KNN_NEIGHBORS);

    for i in 0..n {
        // Max-heap keyed by scaled distance: the root is the worst neighbor
        let mut nearest: BinaryHeap<(i64, usize)> = BinaryHeap::with_capacity(KNN_NEIGHBORS + 1);

        let fi = features.row(i);
        for j in 0..n {
            if i == j {
                continue;
            }
            let fj = features.row(j);

            let spatial = (fi[6] - fj[6]).hypot(fi[7] - fj[7]);
            let mut color = 0.0f32;
            for d in 0..6 {
                let diff = fi[d] - fj[d];
                color += diff * diff;
            }
            let combined = spatial + color.sqrt();
            let key = (combined * DISTANCE_KEY_SCALE) as i64;

            if nearest.len() < KNN_NEIGHBORS {
                nearest.push((key, j));
            } else if let Some(&(worst, _)) = nearest.peek() {
                if key < worst {
                    nearest.pop();
                    nearest.push((key, j));
                }
            }
        }

        for (_, j) in nearest {
            edges.push((i, j));
        }
    }
    edges
}

// ============================================================================
// Image to Graph Pipeline
// ============================================================================

/// Decode an image file and convert it to a region graph.
///
/// Node labels are zero-initialized; callers assign the class one-hot after
/// construction.
pub fn graph_from_image<P: AsRef<Path>>(path: P, num_classes: usize) -> VisionResult<RegionGraph> {
    let image = RawImage::open(path)?;
    graph_from_raw(&image, num_classes, &SlicConfig::default())
}

/// Convert an in-memory image to a region graph.
///
/// Steps: SLIC segmentation, per-region features, 24-dim enhancement,
/// background muting (feature vectors zeroed, nodes kept so matrix shapes
/// stay stable), then 16-NN edge construction over the muted features.
pub fn graph_from_raw(
    image: &RawImage,
    num_classes: usize,
    config: &SlicConfig,
) -> VisionResult<RegionGraph> {
    let seg = generate_superpixels(image, config)?;
    if seg.num_regions == 0 {
        return Err(VisionError::NoRegions);
    }
    let regions = extract_region_features(image, &seg);

    let mut enhanced = enhance_features(&regions.features);
    for (i, &is_background) in regions.background.iter().enumerate() {
        if is_background {
            enhanced.row_mut(i).fill(0.0);
        }
    }

    let mut graph = RegionGraph::new(num_classes);
    for row in enhanced.outer_iter() {
        graph.add_node(row.to_vec(), vec![0.0; num_classes])?;
    }
    for (i, j) in knn_edges(&enhanced) {
        graph.add_edge(i, j)?;
    }
    Ok(graph)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_image(width: usize, height: usize, rgb: [f32; 3]) -> RawImage {
        let mut pixels = Vec::with_capacity(width * height * 3);
        for _ in 0..width * height {
            pixels.extend_from_slice(&rgb);
        }
        RawImage::rgb(width, height, pixels).unwrap()
    }

    /// Left half dark red, right half bright green
    fn split_image(width: usize, height: usize) -> RawImage {
        let mut pixels = Vec::with_capacity(width * height * 3);
        for _ in 0..height {
            for x in 0..width {
                if x < width / 2 {
                    pixels.extend_from_slice(&[0.6, 0.1, 0.1]);
                } else {
                    pixels.extend_from_slice(&[0.1, 0.9, 0.2]);
                }
            }
        }
        RawImage::rgb(width, height, pixels).unwrap()
    }

    #[test]
    fn test_raw_image_validation() {
        assert!(matches!(
            RawImage::rgb(0, 4, vec![]).unwrap_err(),
            VisionError::InvalidDimensions(0, 4)
        ));
        assert!(matches!(
            RawImage::rgb(2, 2, vec![0.0; 5]).unwrap_err(),
            VisionError::PixelCountMismatch {
                expected: 12,
                actual: 5
            }
        ));
    }

    #[test]
    fn test_rgb_to_lab_reference_points() {
        let white = rgb_to_lab([1.0, 1.0, 1.0]);
        assert!((white[0] - 100.0).abs() < 0.5);
        assert!(white[1].abs() < 0.5);
        assert!(white[2].abs() < 0.5);

        let black = rgb_to_lab([0.0, 0.0, 0.0]);
        assert!(black[0].abs() < 1e-3);
    }

    #[test]
    fn test_rgb_to_hsb() {
        let red = rgb_to_hsb([1.0, 0.0, 0.0]);
        assert!(red[0].abs() < 1e-6);
        assert!((red[1] - 1.0).abs() < 1e-6);
        assert!((red[2] - 1.0).abs() < 1e-6);

        let gray = rgb_to_hsb([0.5, 0.5, 0.5]);
        assert!(gray[0].abs() < 1e-6);
        assert!(gray[1].abs() < 1e-6);

        let blue = rgb_to_hsb([0.0, 0.0, 1.0]);
        assert!((blue[0] - 2.0 / 3.0).abs() < 1e-5);
    }

    #[test]
    fn test_slic_labels_cover_image() {
        let image = split_image(16, 16);
        let config = SlicConfig::default().with_superpixels(4);
        let seg = generate_superpixels(&image, &config).unwrap();

        assert_eq!(seg.labels.len(), 256);
        assert!(seg.num_regions >= 1);
        assert!(seg.labels.iter().all(|&l| l < seg.num_regions));
    }

    #[test]
    fn test_slic_deterministic() {
        let image = split_image(16, 16);
        let config = SlicConfig::default().with_superpixels(4);
        let a = generate_superpixels(&image, &config).unwrap();
        let b = generate_superpixels(&image, &config).unwrap();
        assert_eq!(a.labels, b.labels);
    }

    #[test]
    fn test_slic_separates_color_halves() {
        let image = split_image(16, 16);
        let config = SlicConfig::default().with_superpixels(4);
        let seg = generate_superpixels(&image, &config).unwrap();

        let left = seg.labels[8 * 16 + 1];
        let right = seg.labels[8 * 16 + 14];
        assert_ne!(left, right);
    }

    #[test]
    fn test_slic_rejects_oversized_count() {
        let image = solid_image(4, 4, [0.5, 0.5, 0.5]);
        let config = SlicConfig::default().with_superpixels(100);
        assert!(matches!(
            generate_superpixels(&image, &config).unwrap_err(),
            VisionError::InvalidSuperpixelCount(100)
        ));
    }

    #[test]
    fn test_extract_features_means() {
        // Two hand-made regions: left half red, right half green
        let image = split_image(8, 8);
        let labels: Vec<usize> = (0..64).map(|i| if i % 8 < 4 { 0 } else { 1 }).collect();
        let seg = Segmentation {
            labels,
            width: 8,
            height: 8,
            num_regions: 2,
        };

        let result = extract_region_features(&image, &seg);
        assert_eq!(result.features.dim(), (2, FEATURE_DIM));

        // Region 0 mean red channel
        assert!((result.features[[0, 0]] - 0.6).abs() < 1e-4);
        // Region 1 mean green channel
        assert!((result.features[[1, 1]] - 0.9).abs() < 1e-4);
        // Mean normalized x: region 0 covers x in 0..4 -> (0+1+2+3)/4/8
        assert!((result.features[[0, 6]] - 1.5 / 8.0).abs() < 1e-4);
        // Solid-color regions are not background (not near-white)
        assert!(!result.background[0]);
        assert!(!result.background[1]);
    }

    #[test]
    fn test_background_mask_near_white_flat() {
        let image = solid_image(8, 8, [0.98, 0.98, 0.98]);
        let seg = Segmentation {
            labels: vec![0; 64],
            width: 8,
            height: 8,
            num_regions: 1,
        };
        let result = extract_region_features(&image, &seg);
        assert!(result.background[0]);
    }

    #[test]
    fn test_background_mask_textured_not_flagged() {
        // Bright but textured: alternate white and light gray
        let mut pixels = Vec::new();
        for i in 0..64 {
            let v = if i % 2 == 0 { 1.0 } else { 0.9 };
            pixels.extend_from_slice(&[v, v, v]);
        }
        let image = RawImage::rgb(8, 8, pixels).unwrap();
        let seg = Segmentation {
            labels: vec![0; 64],
            width: 8,
            height: 8,
            num_regions: 1,
        };
        let result = extract_region_features(&image, &seg);
        assert!(!result.background[0]);
    }

    #[test]
    fn test_empty_region_skipped() {
        let image = solid_image(4, 4, [0.5, 0.5, 0.5]);
        // Region 1 never appears in the labels
        let seg = Segmentation {
            labels: vec![0; 16],
            width: 4,
            height: 4,
            num_regions: 2,
        };
        let result = extract_region_features(&image, &seg);
        assert!(result.features.row(1).iter().all(|&v| v == 0.0));
        assert!(!result.background[1]);
    }

    #[test]
    fn test_enhance_features_dims_and_values() {
        let base = ndarray::arr2(&[[1.0, 4.0], [3.0, 2.0]]);
        let enhanced = enhance_features(&base);
        assert_eq!(enhanced.dim(), (2, 6));
        // Row 0: raw | mean | max
        assert_eq!(enhanced[[0, 0]], 1.0);
        assert!((enhanced[[0, 2]] - 2.0).abs() < 1e-6); // mean of 1,3
        assert!((enhanced[[0, 3]] - 3.0).abs() < 1e-6); // mean of 4,2
        assert_eq!(enhanced[[0, 4]], 3.0); // max of 1,3
        assert_eq!(enhanced[[0, 5]], 4.0); // max of 4,2
    }

    /// Deterministic pseudo-random features for KNN tests
    fn scattered_features(n: usize) -> Array2<f32> {
        Array2::from_shape_fn((n, ENHANCED_DIM), |(i, j)| {
            let seed = (i * 31 + j * 17) as f32;
            (seed * 12.9898).sin().abs()
        })
    }

    #[test]
    fn test_knn_neighbor_count_small_graph() {
        // Fewer than 17 nodes: every node links to all others
        let features = scattered_features(5);
        let edges = knn_edges(&features);
        for i in 0..5 {
            let count = edges.iter().filter(|&&(a, _)| a == i).count();
            assert_eq!(count, 4);
        }
    }

    #[test]
    fn test_knn_neighbor_count_large_graph() {
        let features = scattered_features(25);
        let edges = knn_edges(&features);
        for i in 0..25 {
            let count = edges.iter().filter(|&&(a, _)| a == i).count();
            assert_eq!(count, KNN_NEIGHBORS);
        }
    }

    #[test]
    fn test_knn_keeps_nearest() {
        let features = scattered_features(25);
        let edges = knn_edges(&features);

        // Recompute all scaled distances from node 0
        let fi = features.row(0);
        let mut keys: Vec<(i64, usize)> = (1..25)
            .map(|j| {
                let fj = features.row(j);
                let spatial = (fi[6] - fj[6]).hypot(fi[7] - fj[7]);
                let mut color = 0.0f32;
                for d in 0..6 {
                    let diff = fi[d] - fj[d];
                    color += diff * diff;
                }
                ((((spatial + color.sqrt()) * 1e6) as i64), j)
            })
            .collect();
        keys.sort();

        let retained: Vec<usize> = edges
            .iter()
            .filter(|&&(a, _)| a == 0)
            .map(|&(_, b)| b)
            .collect();
        let max_retained = keys
            .iter()
            .filter(|(_, j)| retained.contains(j))
            .map(|(k, _)| *k)
            .max()
            .unwrap();
        let min_excluded = keys
            .iter()
            .filter(|(_, j)| !retained.contains(j))
            .map(|(k, _)| *k)
            .min()
            .unwrap();
        assert!(max_retained <= min_excluded);
    }

    #[test]
    fn test_graph_from_raw_shapes() {
        let image = split_image(16, 16);
        let config = SlicConfig::default().with_superpixels(4);
        let graph = graph_from_raw(&image, 4, &config).unwrap();

        assert!(graph.node_count() >= 2);
        assert_eq!(graph.num_classes(), 4);
        let node = graph.node(0).unwrap();
        assert_eq!(node.features.len(), ENHANCED_DIM);
        assert_eq!(node.label, vec![0.0; 4]);
        assert!(graph.edge_count() > 0);
    }

    #[test]
    fn test_graph_from_raw_deterministic() {
        let image = split_image(16, 16);
        let config = SlicConfig::default().with_superpixels(4);
        let a = graph_from_raw(&image, 4, &config).unwrap();
        let b = graph_from_raw(&image, 4, &config).unwrap();
        assert_eq!(a.node_count(), b.node_count());
        assert_eq!(a.node(0).unwrap().features, b.node(0).unwrap().features);
    }

    #[test]
    fn test_graph_from_image_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("item.png");

        // 32x32 two-tone image, saved and re-decoded through the full path
        let img = image::RgbImage::from_fn(32, 32, |x, _| {
            if x < 16 {
                image::Rgb([150u8, 40, 40])
            } else {
                image::Rgb([40u8, 140, 60])
            }
        });
        img.save(&path).unwrap();

        let graph = graph_from_image(&path, 4).unwrap();
        assert!(graph.node_count() >= 1);
        assert_eq!(graph.node(0).unwrap().features.len(), ENHANCED_DIM);

        assert!(matches!(
            graph_from_image(dir.path().join("missing.png"), 4).unwrap_err(),
            VisionError::Decode(_)
        ));
    }

    #[test]
    fn test_background_nodes_zeroed() {
        // All-white image: every region is background, every vector zeroed
        let image = solid_image(16, 16, [1.0, 1.0, 1.0]);
        let config = SlicConfig::default().with_superpixels(4);
        let graph = graph_from_raw(&image, 4, &config).unwrap();

        for i in 0..graph.node_count() {
            let node = graph.node(i).unwrap();
            assert!(node.features.iter().all(|&v| v == 0.0));
        }
    }
}
