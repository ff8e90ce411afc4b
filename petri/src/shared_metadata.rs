use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::colony_counting::ColonyObservation;
use crate::dish_detection::{CropRect, DishRegion};
use crate::frames::SkippedFile;
use crate::params::PipelineParams;
use crate::time_series::SeriesPoint;

/// Metadata document written next to each input, one section per command
#[derive(Serialize, Deserialize, Default, Debug)]
pub struct PetriMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track: Option<TrackSections>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<CountSections>,
}

/// Results of one time-lapse run
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TrackSections {
    /// Debug rasters, relative to the metadata file
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub debug_images: Vec<String>,
    pub execution: ExecutionContext,
    pub input: RunInput,
    pub config: PipelineParams,
    #[serde(default)]
    pub dishes: Vec<DishRecord>,
}

/// Results of counting one still image
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CountSections {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub debug_images: Vec<String>,
    pub execution: ExecutionContext,
    pub input: StillInput,
    pub config: PipelineParams,
    #[serde(default)]
    pub dishes: Vec<StillDishRecord>,
}

/// Execution context for a command invocation
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ExecutionContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub petri_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_line: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub petri_env_vars: Option<HashMap<String, String>>,
}

impl ExecutionContext {
    /// Context for the current process, stamped now
    pub fn current(processing_time_ms: f64) -> Self {
        Self {
            timestamp: Some(Utc::now()),
            petri_version: Some(env!("CARGO_PKG_VERSION").to_string()),
            command_line: Some(std::env::args().collect()),
            processing_time_ms: Some(processing_time_ms),
            petri_env_vars: collect_petri_env_vars(),
        }
    }
}

/// A frame or (frame, dish) unit that was left out of the series
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SkippedUnit {
    pub path: String,
    /// Missing when the whole frame was unusable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dish_id: Option<usize>,
    pub reason: String,
}

/// Input statistics of a time-lapse run
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct RunInput {
    pub directory: String,
    pub strict_mode: bool,
    pub images_found: usize,
    pub frames_processed: usize,
    pub calibration_frames: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_frame: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped_files: Vec<SkippedFile>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped_units: Vec<SkippedUnit>,
}

/// Input description of a still image
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct StillInput {
    pub image_path: String,
    pub source: String,
    pub strict_mode: bool,
}

/// Geometry and time series of one dish
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DishRecord {
    pub id: usize,
    pub center: [i64; 2],
    pub radius: u32,
    pub crop: CropRect,
    #[serde(default)]
    pub series: Vec<SeriesPoint>,
}

impl DishRecord {
    pub fn new(dish: &DishRegion, series: Vec<SeriesPoint>) -> Self {
        Self {
            id: dish.id,
            center: [dish.center.0, dish.center.1],
            radius: dish.radius,
            crop: dish.crop,
            series,
        }
    }
}

/// Geometry and colony count of one dish in a still image
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StillDishRecord {
    pub id: usize,
    pub center: [i64; 2],
    pub radius: u32,
    pub count: usize,
    pub crop: CropRect,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observations: Option<Vec<ColonyObservation>>,
}

/// Load existing metadata from a file, or create new empty metadata
pub fn load_or_create_metadata(path: &Path) -> Result<PetriMetadata> {
    if !path.exists() {
        return Ok(PetriMetadata::default());
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read metadata {}", path.display()))?;
    match toml::from_str::<PetriMetadata>(&content) {
        Ok(metadata) => Ok(metadata),
        Err(e) => {
            let colored_error = crate::color_utils::colors::warning_level(&e.to_string());
            warn!(
                "{}Dropping existing metadata from {}:\n{}",
                crate::color_utils::symbols::warning(),
                path.display(),
                colored_error
            );
            Ok(PetriMetadata::default())
        }
    }
}

/// Save metadata to a file
pub fn save_metadata(metadata: &PetriMetadata, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let toml_content = toml::to_string_pretty(metadata).map_err(|e| {
        log::debug!("About to serialize metadata: {metadata:#?}");
        anyhow!(
            "Failed to serialize metadata to TOML: {e}. This usually means a field contains a value that cannot be represented in TOML format."
        )
    })?;

    fs::write(path, toml_content)
        .with_context(|| format!("Failed to write metadata {}", path.display()))?;
    Ok(())
}

/// Name used for outputs derived from `input_path`: the file stem of an image,
/// the full name of a run directory (dots in directory names are not extensions).
pub fn output_stem(input_path: &Path) -> Option<&str> {
    let name = if input_path.is_dir() {
        input_path.file_name()
    } else {
        input_path.file_stem()
    };
    name.and_then(|s| s.to_str())
}

/// Generate the metadata file path for an input image or run directory
pub fn get_metadata_path(input_path: &Path, output_dir: Option<&str>) -> Result<PathBuf> {
    let input_stem =
        output_stem(input_path).ok_or_else(|| anyhow!("Invalid input filename"))?;

    let metadata_filename = format!("{input_stem}.petri.toml");

    let metadata_path = if let Some(output_dir) = output_dir {
        Path::new(output_dir).join(metadata_filename)
    } else {
        input_path
            .parent()
            .unwrap_or(Path::new("."))
            .join(metadata_filename)
    };

    Ok(metadata_path)
}

/// Collect all PETRI_* environment variables that are present and non-empty
pub fn collect_petri_env_vars() -> Option<HashMap<String, String>> {
    let petri_vars: HashMap<String, String> = std::env::vars()
        .filter(|(key, value)| key.starts_with("PETRI_") && !value.is_empty())
        .collect();

    if petri_vars.is_empty() {
        None
    } else {
        Some(petri_vars)
    }
}
