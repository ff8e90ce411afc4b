//! The `track` pipeline: one time-lapse directory in, one colony series per dish out.
//!
//! 1. Frames are discovered and ordered by their filename timestamps.
//! 2. Dishes are located once, on the latest readable frame.
//! 3. Stage 1 builds the temporal masks: foreground from the reference frame,
//!    background from the first `stack_depth` frames. Nothing in stage 2 starts
//!    before both are complete.
//! 4. Stage 2 segments every (frame, dish) unit in parallel. A unit that fails
//!    is logged and left out of its series.
//! 5. The outcomes are folded into per-dish series ordered by timestamp.

use anyhow::{bail, Context, Result};
use image::RgbImage;
use log::{debug, error, info, warn};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::color_utils::{progress, symbols};
use crate::config::TrackConfig;
use crate::dish_detection::{locate_dishes, DishRegion};
use crate::frames::{check_chronological, collect_frames, sort_chronologically, FrameEntry, SkippedFile};
use crate::image_input::{collect_run_directories, find_images_in_directory, FrameSource, ImageInputConfig};
use crate::output_manager::OutputManager;
use crate::segmentation::FrameSegmenter;
use crate::shared_metadata::{DishRecord, ExecutionContext, RunInput, SkippedUnit, TrackSections};
use crate::temporal_masks::TemporalMaskModel;
use crate::time_series::{aggregate, DishSeries, UnitOutcome};
use crate::visualization::{annotate_colonies, annotate_dishes, save_mask, save_rgb};

/// Everything learned from one time-lapse directory
#[derive(Debug, Clone)]
pub struct TimelapseRun {
    pub directory: PathBuf,
    pub dishes: Vec<DishRegion>,
    /// One series per dish, in dish id order
    pub series: Vec<DishSeries>,
    pub images_found: usize,
    /// Frames that decoded in stage 2
    pub frames_processed: usize,
    pub reference_frame: Option<PathBuf>,
    pub calibration_frames: usize,
    pub skipped_files: Vec<SkippedFile>,
    pub skipped_units: Vec<SkippedUnit>,
    pub debug_images: Vec<PathBuf>,
    pub processing_time_ms: f64,
}

impl TimelapseRun {
    pub fn series_for(&self, dish_id: usize) -> Option<&DishSeries> {
        self.series.iter().find(|s| s.dish_id == dish_id)
    }
}

/// Stage 2 result of one frame
#[derive(Default)]
struct FrameOutcome {
    decoded: bool,
    units: Vec<UnitOutcome>,
    skipped: Vec<SkippedUnit>,
    debug_images: Vec<PathBuf>,
}

fn skipped_unit(path: &Path, dish_id: Option<usize>, reason: impl ToString) -> SkippedUnit {
    SkippedUnit {
        path: path.to_string_lossy().to_string(),
        dish_id,
        reason: reason.to_string(),
    }
}

fn frame_label(frame: &FrameEntry) -> String {
    frame
        .path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| format!("frame{:04}", frame.sequence))
}

/// Save a debug raster, logging instead of failing the run
fn keep_debug_image(result: Result<()>, path: PathBuf, saved: &mut Vec<PathBuf>) {
    match result {
        Ok(()) => saved.push(path),
        Err(e) => warn!("{}Debug image not written: {e:#}", symbols::warning()),
    }
}

/// Latest frame that decodes, searching backwards from the end
fn load_reference(frames: &[FrameEntry]) -> Result<(usize, RgbImage)> {
    for (index, frame) in frames.iter().enumerate().rev() {
        match FrameSource::from(frame.path.as_path()).resolve(None) {
            Ok(image) => {
                if index + 1 != frames.len() {
                    warn!(
                        "{}Latest frame is unreadable; using {} as reference",
                        symbols::warning(),
                        frame.path.display()
                    );
                }
                return Ok((index, image));
            }
            Err(e) => warn!(
                "{}Reference candidate {} unreadable: {e:#}",
                symbols::frame_skipped(),
                frame.path.display()
            ),
        }
    }
    bail!("None of the {} frames could be decoded", frames.len())
}

/// Process a single time-lapse directory.
///
/// `debug_dir` receives inspection rasters when given.
pub fn process_timelapse(
    directory: &Path,
    config: &TrackConfig,
    debug_dir: Option<&Path>,
) -> Result<TimelapseRun> {
    let start = Instant::now();
    let params = &config.params;

    let images = find_images_in_directory(directory)?;
    let images_found = images.len();
    let collection = collect_frames(&images);
    let mut frames = collection.frames;
    if frames.is_empty() {
        bail!(
            "No timestamped frames in {} ({} image files found)",
            directory.display(),
            images_found
        );
    }

    if let Err(e) = check_chronological(&frames) {
        if config.base.strict {
            return Err(e.context(format!(
                "Frames in {} are not in capture order (use --permissive to sort them)",
                directory.display()
            )));
        }
        warn!("{}{e}; ordering frames by timestamp", symbols::warning());
        sort_chronologically(&mut frames);
    }

    info!(
        "{}Tracking {} frames in {}",
        symbols::tracking_start(),
        frames.len(),
        directory.display()
    );

    let (reference_index, reference) = load_reference(&frames)?;
    let reference_path = frames[reference_index].path.clone();
    let dims = reference.dimensions();

    let dishes = locate_dishes(
        &image::imageops::grayscale(&reference),
        params.n_dishes,
        &params.detector,
    );
    info!(
        "{}Located {} dish(es) on {}",
        symbols::dish_found(),
        dishes.len(),
        reference_path.display()
    );

    let mut debug_images = Vec::new();
    if let Some(dir) = debug_dir {
        let path = dir.join("reference_dishes.png");
        keep_debug_image(save_rgb(&annotate_dishes(&reference, &dishes), &path), path, &mut debug_images);
    }

    if dishes.is_empty() {
        return Ok(TimelapseRun {
            directory: directory.to_path_buf(),
            dishes,
            series: Vec::new(),
            images_found,
            frames_processed: 0,
            reference_frame: Some(reference_path),
            calibration_frames: 0,
            skipped_files: collection.skipped,
            skipped_units: Vec::new(),
            debug_images,
            processing_time_ms: start.elapsed().as_secs_f64() * 1000.0,
        });
    }

    // Stage 1
    let calibration = frames
        .iter()
        .take(params.stack_depth)
        .filter_map(|frame| match FrameSource::from(frame.path.as_path()).resolve(Some(dims)) {
            Ok(image) => Some(image),
            Err(e) => {
                warn!(
                    "{}Calibration frame {} left out of the background mask: {e:#}",
                    symbols::frame_skipped(),
                    frame.path.display()
                );
                None
            }
        });
    let model = TemporalMaskModel::build(&dishes, &reference, calibration, params);
    info!(
        "{}Built temporal masks for {} dish(es) from {} calibration frame(s)",
        symbols::masks_built(),
        model.masks().len(),
        model.calibration_frames()
    );
    if model.calibration_frames() < params.stack_depth.min(frames.len()) {
        warn!(
            "{}Background mask stacked from {} of {} calibration frames",
            symbols::warning(),
            model.calibration_frames(),
            params.stack_depth.min(frames.len())
        );
    }

    if let Some(dir) = debug_dir {
        for dish in &dishes {
            if let Ok(crop) = dish.crop_from(&reference) {
                let path = dir.join(format!("dish{}_reference.png", dish.id));
                keep_debug_image(save_rgb(&crop, &path), path, &mut debug_images);
            }
            if let Some(masks) = model.masks_for(dish.id) {
                let path = dir.join(format!("dish{}_foreground.png", dish.id));
                keep_debug_image(save_mask(&masks.foreground, &path), path, &mut debug_images);
                let path = dir.join(format!("dish{}_background.png", dish.id));
                keep_debug_image(save_mask(&masks.background, &path), path, &mut debug_images);
            }
        }
    }

    // Stage 2
    let segmenter = FrameSegmenter::new(params);
    let pb = progress::create_batch_progress_bar(frames.len());

    let outcomes: Vec<FrameOutcome> = frames
        .par_iter()
        .map(|frame| {
            let outcome = process_frame(frame, dims, &dishes, &model, &segmenter, config, debug_dir);
            if let Some(pb) = &pb {
                pb.inc(1);
            }
            outcome
        })
        .collect();

    progress::finish_batch_progress_bar(pb, "frames done");

    let mut units = Vec::new();
    let mut skipped_units = Vec::new();
    let mut frames_processed = 0;
    for outcome in outcomes {
        if outcome.decoded {
            frames_processed += 1;
        }
        units.extend(outcome.units);
        skipped_units.extend(outcome.skipped);
        debug_images.extend(outcome.debug_images);
    }

    let series = aggregate(dishes.iter().map(|d| d.id), units);

    Ok(TimelapseRun {
        directory: directory.to_path_buf(),
        dishes,
        series,
        images_found,
        frames_processed,
        reference_frame: Some(reference_path),
        calibration_frames: model.calibration_frames(),
        skipped_files: collection.skipped,
        skipped_units,
        debug_images,
        processing_time_ms: start.elapsed().as_secs_f64() * 1000.0,
    })
}

/// Segment every dish of one frame
fn process_frame(
    frame: &FrameEntry,
    dims: (u32, u32),
    dishes: &[DishRegion],
    model: &TemporalMaskModel,
    segmenter: &FrameSegmenter,
    config: &TrackConfig,
    debug_dir: Option<&Path>,
) -> FrameOutcome {
    let mut outcome = FrameOutcome::default();

    let image = match FrameSource::from(frame.path.as_path()).resolve(Some(dims)) {
        Ok(image) => image,
        Err(e) => {
            warn!(
                "{}Skipping frame {}: {e:#}",
                symbols::frame_skipped(),
                frame.path.display()
            );
            outcome.skipped.push(skipped_unit(&frame.path, None, format!("{e:#}")));
            return outcome;
        }
    };
    outcome.decoded = true;

    for dish in dishes {
        let crop = match dish.crop_from(&image) {
            Ok(crop) => crop,
            Err(e) => {
                warn!(
                    "{}Skipping dish {} in {}: {e:#}",
                    symbols::frame_skipped(),
                    dish.id,
                    frame.path.display()
                );
                outcome
                    .skipped
                    .push(skipped_unit(&frame.path, Some(dish.id), format!("{e:#}")));
                continue;
            }
        };

        let segmentation = segmenter.segment(&crop, dish, model.masks_for(dish.id));
        let count = segmentation.colony_count();
        debug!(
            "{} dish {}: {} colonies",
            frame.path.display(),
            dish.id,
            count
        );

        if let Some(dir) = debug_dir {
            let path = dir.join(format!("{}_dish{}.png", frame_label(frame), dish.id));
            let annotated = annotate_colonies(&crop, dish, &segmentation);
            keep_debug_image(save_rgb(&annotated, &path), path, &mut outcome.debug_images);
        }

        outcome.units.push(UnitOutcome {
            sequence: frame.sequence,
            timestamp: frame.timestamp,
            dish_id: dish.id,
            count,
            observations: config
                .observations
                .then(|| segmentation.observations(dish)),
        });
    }

    outcome
}

/// Track one directory and write its metadata
fn track_directory(directory: &Path, config: &TrackConfig) -> Result<TimelapseRun> {
    let output_manager = OutputManager::new(config, directory);
    let debug_dir = if config.debug_dump_images {
        Some(output_manager.debug_output_dir()?)
    } else {
        None
    };

    let run = process_timelapse(directory, config, debug_dir.as_deref())?;

    let debug_images = run
        .debug_images
        .iter()
        .map(|p| output_manager.make_relative_to_metadata(p))
        .collect::<Result<Vec<_>>>()?;

    let dishes = run
        .dishes
        .iter()
        .map(|dish| {
            let points = run
                .series_for(dish.id)
                .map(|s| s.points.clone())
                .unwrap_or_default();
            DishRecord::new(dish, points)
        })
        .collect();

    let sections = TrackSections {
        debug_images,
        execution: ExecutionContext::current(run.processing_time_ms),
        input: RunInput {
            directory: directory.to_string_lossy().to_string(),
            strict_mode: config.base.strict,
            images_found: run.images_found,
            frames_processed: run.frames_processed,
            calibration_frames: run.calibration_frames,
            reference_frame: run
                .reference_frame
                .as_deref()
                .and_then(|p| p.file_name())
                .map(|n| n.to_string_lossy().to_string()),
            skipped_files: run.skipped_files.clone(),
            skipped_units: run.skipped_units.clone(),
        },
        config: config.params.clone(),
        dishes,
    };

    let metadata_path = output_manager
        .save_complete_metadata(Some(sections), None)
        .with_context(|| format!("Failed to write results for {}", directory.display()))?;
    debug!("Results for {} in {}", directory.display(), metadata_path.display());

    Ok(run)
}

/// Run the `track` command over every directory named by the configuration.
///
/// Directories are independent: a failing one is logged and the rest continue.
/// Returns the number of directories tracked; errors only when all of them failed.
pub fn run_timelapse_tracking(config: TrackConfig) -> Result<usize> {
    let start = Instant::now();
    let input_config = ImageInputConfig::from_strict_flag(config.base.strict);
    let directories = collect_run_directories(&config.base.sources, &input_config)?;

    if directories.is_empty() {
        warn!("{}No time-lapse directories found to process", symbols::warning());
        return Ok(0);
    }

    let mut succeeded = 0;
    let mut failed = 0;

    for (index, directory) in directories.iter().enumerate() {
        match track_directory(directory, &config) {
            Ok(run) => {
                succeeded += 1;
                info!(
                    "{}Tracked {} ({}/{}) in {:.1}ms: {} frames, {} dish(es)",
                    symbols::completed_successfully(),
                    directory.display(),
                    index + 1,
                    directories.len(),
                    run.processing_time_ms,
                    run.frames_processed,
                    run.dishes.len()
                );
                for series in &run.series {
                    let counts = series.counts();
                    info!(
                        "  dish {}: {} point(s), final count {}",
                        series.dish_id,
                        counts.len(),
                        counts.last().map_or("-".to_string(), |c| c.to_string())
                    );
                }
                if !run.skipped_units.is_empty() {
                    warn!(
                        "{}{} unit(s) skipped in {}",
                        symbols::completed_partially_successfully(),
                        run.skipped_units.len(),
                        directory.display()
                    );
                }
            }
            Err(e) => {
                failed += 1;
                error!(
                    "{}Failed to track {}: {e:#}",
                    symbols::operation_failed(),
                    directory.display()
                );
            }
        }
    }

    let elapsed = start.elapsed().as_secs_f64();
    if failed > 0 && succeeded > 0 {
        warn!(
            "{}{} of {} time-lapse runs failed",
            symbols::completed_partially_successfully(),
            failed,
            directories.len()
        );
    } else if succeeded > 0 {
        info!(
            "{}Tracked {} time-lapse run(s) in {:.1}s",
            symbols::completed_successfully(),
            succeeded,
            elapsed
        );
    }

    if succeeded == 0 {
        bail!("All {} time-lapse runs failed", directories.len());
    }
    Ok(succeeded)
}
