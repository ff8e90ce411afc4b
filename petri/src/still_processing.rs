//! The `count` pipeline: independent still images, each with its own dishes.
//!
//! Without a time series there are no temporal masks, so segmentation falls
//! back to restricting candidates to the disk and eroding them.

use anyhow::{bail, Result};
use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::color_utils::{progress, symbols};
use crate::config::CountConfig;
use crate::dish_detection::locate_dishes;
use crate::image_input::{collect_images_from_sources, FrameSource, ImageInputConfig};
use crate::output_manager::OutputManager;
use crate::segmentation::FrameSegmenter;
use crate::shared_metadata::{CountSections, ExecutionContext, StillDishRecord, StillInput};
use crate::visualization::{annotate_colonies, annotate_dishes, save_rgb};

/// Colony counts of one still image
#[derive(Debug, Clone)]
pub struct StillCount {
    pub image_path: PathBuf,
    pub dishes: Vec<StillDishRecord>,
    pub debug_images: Vec<PathBuf>,
    pub processing_time_ms: f64,
}

impl StillCount {
    pub fn total_colonies(&self) -> usize {
        self.dishes.iter().map(|d| d.count).sum()
    }
}

/// Locate dishes in `image_path` and count the colonies of each.
pub fn count_still_image(
    image_path: &Path,
    config: &CountConfig,
    debug_dir: Option<&Path>,
) -> Result<StillCount> {
    let start = Instant::now();
    let params = &config.params;

    let image = FrameSource::from(image_path).resolve(None)?;
    let dishes = locate_dishes(
        &image::imageops::grayscale(&image),
        params.n_dishes,
        &params.detector,
    );
    debug!(
        "{}{} dish(es) in {}",
        symbols::dish_found(),
        dishes.len(),
        image_path.display()
    );

    let mut debug_images = Vec::new();
    let mut save_debug = |result: Result<()>, path: PathBuf| match result {
        Ok(()) => debug_images.push(path),
        Err(e) => warn!("{}Debug image not written: {e:#}", symbols::warning()),
    };

    if let Some(dir) = debug_dir {
        let path = dir.join("dishes.png");
        save_debug(save_rgb(&annotate_dishes(&image, &dishes), &path), path);
    }

    let segmenter = FrameSegmenter::new(params);
    let mut records = Vec::with_capacity(dishes.len());
    for dish in &dishes {
        let crop = dish.crop_from(&image)?;
        let segmentation = segmenter.segment(&crop, dish, None);

        if let Some(dir) = debug_dir {
            let path = dir.join(format!("dish{}_colonies.png", dish.id));
            save_debug(
                save_rgb(&annotate_colonies(&crop, dish, &segmentation), &path),
                path,
            );
        }

        records.push(StillDishRecord {
            id: dish.id,
            center: [dish.center.0, dish.center.1],
            radius: dish.radius,
            count: segmentation.colony_count(),
            crop: dish.crop,
            observations: config
                .observations
                .then(|| segmentation.observations(dish)),
        });
    }

    Ok(StillCount {
        image_path: image_path.to_path_buf(),
        dishes: records,
        debug_images,
        processing_time_ms: start.elapsed().as_secs_f64() * 1000.0,
    })
}

fn source_kind(image_path: &Path, sources: &[String]) -> &'static str {
    if sources.iter().any(|s| Path::new(s) == image_path) {
        "file"
    } else if sources.iter().any(|s| image_path.starts_with(s)) {
        "directory"
    } else {
        "glob"
    }
}

fn count_and_record(image_path: &Path, config: &CountConfig) -> Result<StillCount> {
    let output_manager = OutputManager::new(config, image_path);
    let debug_dir = if config.debug_dump_images {
        Some(output_manager.debug_output_dir()?)
    } else {
        None
    };

    let result = count_still_image(image_path, config, debug_dir.as_deref())?;

    let debug_images = result
        .debug_images
        .iter()
        .map(|p| output_manager.make_relative_to_metadata(p))
        .collect::<Result<Vec<_>>>()?;

    let sections = CountSections {
        debug_images,
        execution: ExecutionContext::current(result.processing_time_ms),
        input: StillInput {
            image_path: image_path.to_string_lossy().to_string(),
            source: source_kind(image_path, &config.base.sources).to_string(),
            strict_mode: config.base.strict,
        },
        config: config.params.clone(),
        dishes: result.dishes.clone(),
    };
    output_manager.save_complete_metadata(None, Some(sections))?;

    Ok(result)
}

/// Run the `count` command over every image named by the configuration.
///
/// Returns the number of images counted; errors only when every image failed.
pub fn run_still_counting(config: CountConfig) -> Result<usize> {
    let start = Instant::now();
    let input_config = ImageInputConfig::from_strict_flag(config.base.strict);
    let image_files = collect_images_from_sources(&config.base.sources, &input_config)?;

    if image_files.is_empty() {
        warn!("{}No valid images found to process", symbols::warning());
        return Ok(0);
    }

    info!(
        "{}Counting colonies in {} image(s)",
        symbols::counting_start(),
        image_files.len()
    );

    let pb = progress::create_batch_progress_bar(image_files.len());
    let mut succeeded = 0;
    let mut failed = 0;

    for (index, image_path) in image_files.iter().enumerate() {
        match count_and_record(image_path, &config) {
            Ok(result) => {
                succeeded += 1;
                let counts: Vec<String> = result
                    .dishes
                    .iter()
                    .map(|d| format!("dish {}: {}", d.id, d.count))
                    .collect();
                info!(
                    "{}Processed {} ({}/{}) in {:.1}ms: {} colonies [{}]",
                    symbols::completed_successfully(),
                    image_path.display(),
                    index + 1,
                    image_files.len(),
                    result.processing_time_ms,
                    result.total_colonies(),
                    counts.join(", ")
                );
            }
            Err(e) => {
                failed += 1;
                error!(
                    "{}Failed to process {} ({}/{}): {e:#}",
                    symbols::operation_failed(),
                    image_path.display(),
                    index + 1,
                    image_files.len()
                );
            }
        }
        if let Some(pb) = &pb {
            pb.inc(1);
        }
    }

    progress::finish_batch_progress_bar(pb, "images done");

    if failed > 0 && succeeded > 0 {
        warn!(
            "{}{} of {} images failed to process",
            symbols::completed_partially_successfully(),
            failed,
            image_files.len()
        );
    } else if succeeded > 0 {
        info!(
            "{}Counted {} image(s) in {:.1}s",
            symbols::completed_successfully(),
            succeeded,
            start.elapsed().as_secs_f64()
        );
    }

    if succeeded == 0 {
        bail!("All {} images failed to process", image_files.len());
    }
    Ok(succeeded)
}
