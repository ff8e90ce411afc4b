//! Tunable parameters for the colony tracking pipeline.
//!
//! Every knob the pipeline reads lives in [`PipelineParams`]. Values come from
//! the built-in defaults, optionally overlaid by a TOML parameter file and then
//! by individual CLI flags (see `config::ParamArgs`).

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// How a dish crop is turned into colony instances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SegmentationMode {
    /// Adaptive threshold followed by an area-band filter
    Threshold,
    /// Distance transform and marker watershed to split touching colonies
    Separate,
}

/// Image channel used for segmentation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ColorChannel {
    Red,
    Green,
    Blue,
    Luma,
    /// Pick the channel with the largest intensity spread inside the dish
    Auto,
}

/// Whether colonies appear darker or brighter than the agar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ColonyPolarity {
    Dark,
    Bright,
}

/// Local mean estimator for adaptive thresholding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AdaptiveMethod {
    /// Unweighted mean of the block
    Mean,
    /// Gaussian-weighted mean of the block
    Gaussian,
}

/// Parameters for the gradient Hough circle detector used to locate dishes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorParams {
    /// Inverse accumulator resolution: 1.0 votes at full resolution, 2.0 at half (default: 1.2)
    pub resolution_factor: f32,

    /// Minimum distance in pixels between two detected dish centers (default: 900)
    pub min_center_distance: f32,

    /// Upper Canny threshold; the lower one is half of it (default: 100)
    pub edge_threshold: f32,

    /// Minimum accumulator votes for a center and edge support for its radius (default: 30)
    pub center_threshold: f32,

    /// Smallest dish radius in pixels (default: 400)
    pub min_radius: u32,

    /// Largest dish radius in pixels (default: 1000)
    pub max_radius: u32,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            resolution_factor: 1.2,
            min_center_distance: 900.0,
            edge_threshold: 100.0,
            center_threshold: 30.0,
            min_radius: 400,
            max_radius: 1000,
        }
    }
}

/// Parameters for per-frame segmentation and for the calibration artifact pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationParams {
    /// Threshold with area filtering, or split touching colonies (default: threshold)
    pub mode: SegmentationMode,

    /// Channel fed to the thresholds (default: green)
    pub channel: ColorChannel,

    /// Colony appearance relative to the agar (default: dark)
    pub polarity: ColonyPolarity,

    /// Local mean estimator (default: gaussian)
    pub adaptive_method: AdaptiveMethod,

    /// Side of the adaptive threshold neighbourhood, odd (default: 121)
    pub block_size: u32,

    /// Offset subtracted from the local mean (default: 11)
    pub bias: f32,

    /// Smallest colony area in pixels (default: 100)
    pub min_area: u32,

    /// Largest colony area in pixels (default: 1000)
    pub max_area: u32,

    /// Side of the square structuring element for erosion and opening (default: 3)
    pub kernel_size: u32,

    /// Opening iterations applied to calibration artifact masks (default: 2)
    pub opening_iterations: u32,
}

impl Default for SegmentationParams {
    fn default() -> Self {
        Self {
            mode: SegmentationMode::Threshold,
            channel: ColorChannel::Green,
            polarity: ColonyPolarity::Dark,
            adaptive_method: AdaptiveMethod::Gaussian,
            block_size: 121,
            bias: 11.0,
            min_area: 100,
            max_area: 1000,
            kernel_size: 3,
            opening_iterations: 2,
        }
    }
}

/// Parameters for the maximal-sensitivity foreground pass on the last frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForegroundParams {
    /// Median filter window side, odd (default: 5)
    pub median_size: u32,

    /// Structuring element side of the top-hat filter (default: 500)
    pub tophat_size: u32,
}

impl Default for ForegroundParams {
    fn default() -> Self {
        Self {
            median_size: 5,
            tophat_size: 500,
        }
    }
}

/// Parameters for splitting touching colonies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeparatorParams {
    /// Minimum distance in pixels between two colony markers (default: 10)
    pub min_distance: f32,
}

impl Default for SeparatorParams {
    fn default() -> Self {
        Self { min_distance: 10.0 }
    }
}

/// Every tunable of the pipeline in one record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineParams {
    /// Maximum number of dishes kept from the detector (default: 6)
    pub n_dishes: usize,

    /// Number of leading frames stacked into the background mask (default: 5)
    pub stack_depth: usize,

    pub detector: DetectorParams,
    pub segmentation: SegmentationParams,
    pub foreground: ForegroundParams,
    pub separator: SeparatorParams,
}

impl Default for PipelineParams {
    fn default() -> Self {
        Self {
            n_dishes: 6,
            stack_depth: 5,
            detector: DetectorParams::default(),
            segmentation: SegmentationParams::default(),
            foreground: ForegroundParams::default(),
            separator: SeparatorParams::default(),
        }
    }
}

impl PipelineParams {
    /// Load parameters from a TOML file. Missing keys keep their defaults.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read parameter file {}", path.display()))?;
        let params: PipelineParams = toml::from_str(&content)
            .with_context(|| format!("Invalid parameter file {}", path.display()))?;
        Ok(params)
    }

    /// Reject combinations the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.n_dishes == 0 {
            bail!("n_dishes must be at least 1");
        }
        if self.stack_depth == 0 {
            bail!("stack_depth must be at least 1");
        }

        let d = &self.detector;
        if !(d.resolution_factor >= 1.0) {
            bail!(
                "resolution_factor must be at least 1.0, got {}",
                d.resolution_factor
            );
        }
        if d.min_radius == 0 || d.min_radius > d.max_radius {
            bail!(
                "Radius range is empty: min_radius={} max_radius={}",
                d.min_radius,
                d.max_radius
            );
        }
        if !(d.edge_threshold > 0.0) || !(d.center_threshold > 0.0) {
            bail!("edge_threshold and center_threshold must be positive");
        }
        if !(d.min_center_distance >= 0.0) {
            bail!("min_center_distance must not be negative");
        }

        let s = &self.segmentation;
        if s.block_size < 3 || s.block_size % 2 == 0 {
            bail!("block_size must be odd and at least 3, got {}", s.block_size);
        }
        if !s.bias.is_finite() {
            bail!("bias must be a finite number");
        }
        if s.min_area > s.max_area {
            bail!(
                "Area band is empty: min_area={} max_area={}",
                s.min_area,
                s.max_area
            );
        }
        if s.kernel_size == 0 {
            bail!("kernel_size must be at least 1");
        }

        let f = &self.foreground;
        if f.median_size == 0 || f.median_size % 2 == 0 {
            bail!("median_size must be odd, got {}", f.median_size);
        }
        if f.tophat_size == 0 {
            bail!("tophat_size must be at least 1");
        }

        if !(self.separator.min_distance >= 0.0) {
            bail!("min_distance must not be negative");
        }

        Ok(())
    }
}
