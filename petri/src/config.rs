//! Configuration layer providing clean separation between CLI arguments and internal run configurations.
//!
//! This module defines the configuration structures used throughout petri:
//! - `BaseConfig`: options shared by all commands
//! - Command-specific configurations that embed the base config and the resolved
//!   [`PipelineParams`]
//! - Conversions from CLI commands to internal configurations
//!
//! The design separates CLI concerns (argument parsing, help text, value parsing) from
//! processing (pipeline parameters, output switches). Pipeline parameters are resolved
//! in three layers: built-in defaults, then an optional `--params` TOML file, then
//! individual flags.

use clap::{Args, Parser};
use clap_verbosity_flag::Verbosity;
use serde::Serialize;
use std::path::Path;

use crate::params::{
    AdaptiveMethod, ColonyPolarity, ColorChannel, PipelineParams, SegmentationMode,
};

/// Parse an adaptive-threshold block size (odd, at least 3)
pub fn parse_block_size(s: &str) -> Result<u32, String> {
    let val = s
        .parse::<u32>()
        .map_err(|_| format!("Invalid block size: '{s}'"))?;
    if val < 3 || val % 2 == 0 {
        return Err(format!("Block size must be odd and at least 3, got {val}"));
    }
    Ok(val)
}

/// Parse a strictly positive number
pub fn parse_positive(s: &str) -> Result<f32, String> {
    let val = s
        .parse::<f32>()
        .map_err(|_| format!("Invalid number: '{s}'"))?;
    if !(val > 0.0) || !val.is_finite() {
        return Err(format!("Must be a positive number, got {val}"));
    }
    Ok(val)
}

/// Global CLI arguments that apply to all petri commands
#[derive(Parser, Debug, Clone)]
pub struct GlobalArgs {
    /// Global output directory (overrides default placement next to input)
    #[arg(long, global = true)]
    pub output_dir: Option<String>,

    /// Verbosity level (-q/--quiet, -v/-vv/-vvv for info/debug/trace)
    #[command(flatten)]
    pub verbosity: Verbosity,

    /// Use permissive mode for input validation (warn instead of error for
    /// unsupported files and out-of-order frame names)
    #[arg(long, global = true)]
    pub permissive: bool,

    /// Disable colored output (also respects NO_COLOR and PETRI_NO_COLOR env vars)
    #[arg(long, global = true)]
    pub no_color: bool,
}

/// Pipeline parameter overrides shared by the processing commands
#[derive(Args, Debug, Clone, Default)]
pub struct ParamArgs {
    /// TOML file with pipeline parameters; flags below override its values
    #[arg(long = "params", value_name = "FILE")]
    pub params_file: Option<String>,

    /// Maximum number of dishes to track
    #[arg(long)]
    pub n_dishes: Option<usize>,

    /// Number of leading colony-free frames stacked into the background mask
    #[arg(long)]
    pub stack_depth: Option<usize>,

    /// Inverse accumulator resolution of the dish detector
    #[arg(long, value_parser = parse_positive)]
    pub resolution_factor: Option<f32>,

    /// Minimum distance between dish centers, in pixels
    #[arg(long)]
    pub min_center_distance: Option<f32>,

    /// Upper Canny threshold of the dish detector
    #[arg(long, value_parser = parse_positive)]
    pub edge_threshold: Option<f32>,

    /// Minimum votes for a dish center
    #[arg(long, value_parser = parse_positive)]
    pub center_threshold: Option<f32>,

    /// Smallest dish radius, in pixels
    #[arg(long)]
    pub min_radius: Option<u32>,

    /// Largest dish radius, in pixels
    #[arg(long)]
    pub max_radius: Option<u32>,

    /// Segmentation mode
    #[arg(long, value_enum)]
    pub mode: Option<SegmentationMode>,

    /// Image channel to segment
    #[arg(long, value_enum)]
    pub channel: Option<ColorChannel>,

    /// Whether colonies are darker or brighter than the agar
    #[arg(long, value_enum)]
    pub polarity: Option<ColonyPolarity>,

    /// Local mean used by the adaptive threshold
    #[arg(long, value_enum)]
    pub adaptive_method: Option<AdaptiveMethod>,

    /// Adaptive threshold block size (odd)
    #[arg(long, value_parser = parse_block_size)]
    pub block_size: Option<u32>,

    /// Adaptive threshold bias, in gray levels
    #[arg(long, allow_negative_numbers = true)]
    pub bias: Option<f32>,

    /// Smallest colony area, in pixels
    #[arg(long)]
    pub min_area: Option<u32>,

    /// Largest colony area, in pixels
    #[arg(long)]
    pub max_area: Option<u32>,

    /// Erosion/opening kernel size
    #[arg(long)]
    pub kernel_size: Option<u32>,

    /// Opening iterations for background artifacts
    #[arg(long)]
    pub opening_iterations: Option<u32>,

    /// Median filter size of the foreground pass
    #[arg(long)]
    pub median_size: Option<u32>,

    /// Top-hat element size of the foreground pass
    #[arg(long)]
    pub tophat_size: Option<u32>,

    /// Minimum distance between colony markers in separate mode
    #[arg(long, value_parser = parse_positive)]
    pub min_distance: Option<f32>,
}

impl ParamArgs {
    /// Defaults, overlaid by the parameter file, overlaid by flags. The result is validated.
    pub fn resolve(&self) -> anyhow::Result<PipelineParams> {
        let mut params = match &self.params_file {
            Some(path) => PipelineParams::from_toml_file(Path::new(path))?,
            None => PipelineParams::default(),
        };

        fn set<T: Clone>(slot: &mut T, value: &Option<T>) {
            if let Some(v) = value {
                *slot = v.clone();
            }
        }

        set(&mut params.n_dishes, &self.n_dishes);
        set(&mut params.stack_depth, &self.stack_depth);

        let d = &mut params.detector;
        set(&mut d.resolution_factor, &self.resolution_factor);
        set(&mut d.min_center_distance, &self.min_center_distance);
        set(&mut d.edge_threshold, &self.edge_threshold);
        set(&mut d.center_threshold, &self.center_threshold);
        set(&mut d.min_radius, &self.min_radius);
        set(&mut d.max_radius, &self.max_radius);

        let s = &mut params.segmentation;
        set(&mut s.mode, &self.mode);
        set(&mut s.channel, &self.channel);
        set(&mut s.polarity, &self.polarity);
        set(&mut s.adaptive_method, &self.adaptive_method);
        set(&mut s.block_size, &self.block_size);
        set(&mut s.bias, &self.bias);
        set(&mut s.min_area, &self.min_area);
        set(&mut s.max_area, &self.max_area);
        set(&mut s.kernel_size, &self.kernel_size);
        set(&mut s.opening_iterations, &self.opening_iterations);

        set(&mut params.foreground.median_size, &self.median_size);
        set(&mut params.foreground.tophat_size, &self.tophat_size);
        set(&mut params.separator.min_distance, &self.min_distance);

        params.validate()?;
        Ok(params)
    }
}

/// Base configuration common to all commands
#[derive(Debug, Clone, Serialize)]
pub struct BaseConfig {
    /// Input sources (images, run directories or globs)
    pub sources: Vec<String>,
    /// Optional output directory override
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<String>,
    /// Use strict mode (fail on unsupported inputs and out-of-order frames). Opposite of `--permissive`.
    pub strict: bool,
}

/// CLI command for time-lapse tracking (only command-specific arguments)
#[derive(Parser, Debug, Clone)]
pub struct TrackCommand {
    /// Directories holding one time-lapse each. Supports glob patterns like runs/*
    #[arg(value_name = "RUN_DIRS", required = true)]
    pub sources: Vec<String>,

    #[command(flatten)]
    pub params: ParamArgs,

    /// Record centroid and size of every colony in every frame
    #[arg(long)]
    pub observations: bool,

    /// Dump dish crops, temporal masks and annotated frames for inspection
    #[arg(long)]
    pub debug_dump_images: bool,
}

/// CLI command for counting colonies in independent still images
#[derive(Parser, Debug, Clone)]
pub struct CountCommand {
    /// Path(s) to input images or directories. Supports glob patterns like *.jpg
    #[arg(value_name = "IMAGES_OR_DIRS", required = true)]
    pub sources: Vec<String>,

    #[command(flatten)]
    pub params: ParamArgs,

    /// Record centroid and size of every colony
    #[arg(long)]
    pub observations: bool,

    /// Dump annotated dish crops for inspection
    #[arg(long)]
    pub debug_dump_images: bool,
}

/// Internal configuration for time-lapse tracking
#[derive(Debug, Clone, Serialize)]
pub struct TrackConfig {
    #[serde(skip)]
    pub base: BaseConfig,
    pub params: PipelineParams,
    pub observations: bool,
    pub debug_dump_images: bool,
}

/// Internal configuration for still-image counting
#[derive(Debug, Clone, Serialize)]
pub struct CountConfig {
    #[serde(skip)]
    pub base: BaseConfig,
    pub params: PipelineParams,
    pub observations: bool,
    pub debug_dump_images: bool,
}

impl From<GlobalArgs> for BaseConfig {
    fn from(global: GlobalArgs) -> Self {
        Self {
            sources: Vec::new(), // Sources come from the command
            output_dir: global.output_dir,
            strict: !global.permissive,
        }
    }
}

impl TrackConfig {
    /// Create configuration from global args and command-specific args
    pub fn from_args(global: GlobalArgs, cmd: TrackCommand) -> Result<Self, String> {
        let params = cmd.params.resolve().map_err(|e| format!("{e:#}"))?;

        let mut base: BaseConfig = global.into();
        base.sources = cmd.sources;

        Ok(Self {
            base,
            params,
            observations: cmd.observations,
            debug_dump_images: cmd.debug_dump_images,
        })
    }
}

impl CountConfig {
    /// Create configuration from global args and command-specific args
    pub fn from_args(global: GlobalArgs, cmd: CountCommand) -> Result<Self, String> {
        let params = cmd.params.resolve().map_err(|e| format!("{e:#}"))?;

        let mut base: BaseConfig = global.into();
        base.sources = cmd.sources;

        Ok(Self {
            base,
            params,
            observations: cmd.observations,
            debug_dump_images: cmd.debug_dump_images,
        })
    }
}

/// What output placement and metadata writing need to know about a command
pub trait RunConfig {
    fn base(&self) -> &BaseConfig;
    fn tool_name(&self) -> &'static str;
}

impl RunConfig for TrackConfig {
    fn base(&self) -> &BaseConfig {
        &self.base
    }

    fn tool_name(&self) -> &'static str {
        "track"
    }
}

impl RunConfig for CountConfig {
    fn base(&self) -> &BaseConfig {
        &self.base
    }

    fn tool_name(&self) -> &'static str {
        "count"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn global(permissive: bool) -> GlobalArgs {
        GlobalArgs {
            output_dir: None,
            verbosity: Verbosity::new(0, 0),
            permissive,
            no_color: false,
        }
    }

    fn track_cmd(params: ParamArgs) -> TrackCommand {
        TrackCommand {
            sources: vec!["run1".to_string()],
            params,
            observations: false,
            debug_dump_images: false,
        }
    }

    #[test]
    fn test_global_args_conversion() {
        let global_args = GlobalArgs {
            output_dir: Some("/tmp".to_string()),
            verbosity: Verbosity::new(2, 0),
            permissive: true,
            no_color: false,
        };

        let config: BaseConfig = global_args.into();

        assert_eq!(config.sources, Vec::<String>::new());
        assert_eq!(config.output_dir, Some("/tmp".to_string()));
        assert!(!config.strict); // permissive=true -> strict=false
    }

    #[test]
    fn test_track_command_defaults() {
        let config = TrackConfig::from_args(global(false), track_cmd(ParamArgs::default())).unwrap();
        assert_eq!(config.base.sources, vec!["run1"]);
        assert!(config.base.strict);
        assert_eq!(config.params, PipelineParams::default());
        assert_eq!(config.tool_name(), "track");
    }

    #[test]
    fn test_flags_override_params_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("params.toml");
        fs::write(
            &path,
            "n_dishes = 2\n\n[segmentation]\nblock_size = 51\nmin_area = 50\n",
        )
        .unwrap();

        let args = ParamArgs {
            params_file: Some(path.to_string_lossy().to_string()),
            min_area: Some(80),
            mode: Some(SegmentationMode::Separate),
            ..Default::default()
        };
        let config = TrackConfig::from_args(global(false), track_cmd(args)).unwrap();

        assert_eq!(config.params.n_dishes, 2);
        assert_eq!(config.params.segmentation.block_size, 51);
        assert_eq!(config.params.segmentation.min_area, 80);
        assert_eq!(config.params.segmentation.mode, SegmentationMode::Separate);
        // untouched keys keep their defaults
        assert_eq!(config.params.stack_depth, 5);
    }

    #[test]
    fn test_inconsistent_params_are_rejected() {
        let args = ParamArgs {
            min_area: Some(500),
            max_area: Some(100),
            ..Default::default()
        };
        let err = TrackConfig::from_args(global(false), track_cmd(args)).unwrap_err();
        assert!(err.contains("Area band"), "{err}");
    }

    #[test]
    fn test_missing_params_file_is_an_error() {
        let args = ParamArgs {
            params_file: Some("/definitely/not/here.toml".to_string()),
            ..Default::default()
        };
        let cmd = CountCommand {
            sources: vec!["a.png".to_string()],
            params: args,
            observations: true,
            debug_dump_images: false,
        };
        assert!(CountConfig::from_args(global(true), cmd).is_err());
    }

    #[test]
    fn test_track_command_parses_negative_bias_and_enums() {
        let cmd = TrackCommand::try_parse_from([
            "track",
            "runs/a",
            "--bias",
            "-4",
            "--channel",
            "auto",
            "--adaptive-method",
            "mean",
            "--observations",
        ])
        .unwrap();
        assert_eq!(cmd.params.bias, Some(-4.0));
        assert_eq!(cmd.params.channel, Some(ColorChannel::Auto));
        assert_eq!(cmd.params.adaptive_method, Some(AdaptiveMethod::Mean));
        assert!(cmd.observations);
    }

    #[test]
    fn test_parse_block_size() {
        assert_eq!(parse_block_size("121"), Ok(121));
        assert_eq!(parse_block_size("3"), Ok(3));
        assert!(parse_block_size("120").is_err());
        assert!(parse_block_size("1").is_err());
        assert!(parse_block_size("abc").is_err());
    }

    #[test]
    fn test_parse_positive() {
        assert_eq!(parse_positive("1.2"), Ok(1.2));
        assert!(parse_positive("0").is_err());
        assert!(parse_positive("-3").is_err());
        assert!(parse_positive("nan").is_err());
    }
}
