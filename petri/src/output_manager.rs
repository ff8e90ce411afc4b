//! Output path management shared by all commands.
//!
//! Every input (a still image or a run directory) gets:
//! - a metadata file `<stem>.petri.toml`
//! - optionally a debug directory `<stem>_debug/` holding inspection rasters
//!
//! Both live in `--output-dir` when given, otherwise next to the input.

use anyhow::{Context, Result};
use log::debug;
use std::path::{Path, PathBuf};

use crate::config::RunConfig;
use crate::shared_metadata::{
    get_metadata_path, load_or_create_metadata, output_stem, save_metadata, CountSections,
    TrackSections,
};

/// Unified output path management for one input
pub struct OutputManager<'a> {
    config: &'a dyn RunConfig,
    input_path: &'a Path,
}

impl<'a> OutputManager<'a> {
    pub fn new(config: &'a dyn RunConfig, input_path: &'a Path) -> Self {
        Self { config, input_path }
    }

    fn input_stem(&self) -> &str {
        output_stem(self.input_path).unwrap_or("output")
    }

    /// Directory that receives outputs for this input
    fn output_root(&self) -> Result<PathBuf> {
        match &self.config.base().output_dir {
            Some(output_dir) => {
                let output_dir = Path::new(output_dir);
                std::fs::create_dir_all(output_dir).with_context(|| {
                    format!("Failed to create output directory {}", output_dir.display())
                })?;
                Ok(output_dir.to_path_buf())
            }
            None => Ok(self
                .input_path
                .parent()
                .unwrap_or(Path::new("."))
                .to_path_buf()),
        }
    }

    pub fn metadata_path(&self) -> Result<PathBuf> {
        get_metadata_path(self.input_path, self.config.base().output_dir.as_deref())
    }

    /// `<stem>_debug/`, created on first use
    pub fn debug_output_dir(&self) -> Result<PathBuf> {
        let dir = self
            .output_root()?
            .join(format!("{}_debug", self.input_stem()));
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create debug directory {}", dir.display()))?;
        Ok(dir)
    }

    /// Path of a debug artifact, e.g. `("dish1_foreground", "png")`
    pub fn generate_debug_output(&self, name: &str, extension: &str) -> Result<PathBuf> {
        Ok(self.debug_output_dir()?.join(format!("{name}.{extension}")))
    }

    /// Make a file path relative to the metadata file location
    pub fn make_relative_to_metadata(&self, path: &Path) -> Result<String> {
        make_path_relative_to_toml(path, &self.metadata_path()?)
    }

    /// Write the sections produced by this command, keeping the other command's section
    pub fn save_complete_metadata(
        &self,
        track_sections: Option<TrackSections>,
        count_sections: Option<CountSections>,
    ) -> Result<PathBuf> {
        let metadata_path = self.metadata_path()?;
        let mut metadata = load_or_create_metadata(&metadata_path)?;

        if let Some(track) = track_sections {
            metadata.track = Some(track);
        }
        if let Some(count) = count_sections {
            metadata.count = Some(count);
        }

        save_metadata(&metadata, &metadata_path)?;
        debug!(
            "📋 Saved {} metadata to: {}",
            self.config.tool_name(),
            metadata_path.display()
        );
        Ok(metadata_path)
    }
}

/// Make a file path relative to a TOML file (used for metadata)
pub fn make_path_relative_to_toml(file_path: &Path, toml_path: &Path) -> Result<String> {
    if let Some(toml_dir) = toml_path.parent() {
        if let Ok(rel_path) = file_path.strip_prefix(toml_dir) {
            // Forward slashes on every platform
            return Ok(rel_path.to_string_lossy().replace('\\', "/"));
        }
    }
    Ok(file_path.to_string_lossy().to_string())
}
