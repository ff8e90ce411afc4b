//! Synthetic plates shared by the integration tests.
#![allow(dead_code)]

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_filled_circle_mut;
use petri::config::{BaseConfig, TrackConfig};
use petri::params::{AdaptiveMethod, PipelineParams};
use std::path::{Path, PathBuf};

pub const BACKGROUND: u8 = 40;
pub const AGAR: u8 = 180;
pub const COLONY: u8 = 60;

/// Dark backdrop with bright agar disks `(x, y, radius)`
pub fn plate(width: u32, height: u32, dishes: &[(i32, i32, i32)]) -> RgbImage {
    let mut img = RgbImage::from_pixel(width, height, Rgb([BACKGROUND; 3]));
    for &(x, y, r) in dishes {
        draw_filled_circle_mut(&mut img, (x, y), r, Rgb([AGAR; 3]));
    }
    img
}

pub fn add_colony(img: &mut RgbImage, center: (i32, i32), radius: i32) {
    draw_filled_circle_mut(img, center, radius, Rgb([COLONY; 3]));
}

pub fn write_frame(dir: &Path, name: &str, img: &RgbImage) -> PathBuf {
    let path = dir.join(name);
    img.save(&path).unwrap();
    path
}

/// Two r=450 dishes on a 2000x1000 frame
pub const LARGE_DISHES: [(i32, i32, i32); 2] = [(520, 500, 450), (1480, 500, 450)];

/// Two r=80 dishes on a 400x200 frame
pub const SMALL_DISHES: [(i32, i32, i32); 2] = [(100, 100, 80), (300, 100, 80)];

/// Parameters for full-size plates
pub fn large_params() -> PipelineParams {
    let mut params = PipelineParams::default();
    params.n_dishes = 2;
    params.segmentation.adaptive_method = AdaptiveMethod::Mean;
    params.segmentation.block_size = 51;
    params
}

/// Parameters scaled down to [`SMALL_DISHES`]
pub fn small_params() -> PipelineParams {
    let mut params = PipelineParams::default();
    params.n_dishes = 2;
    params.detector.resolution_factor = 1.0;
    params.detector.min_center_distance = 150.0;
    params.detector.center_threshold = 20.0;
    params.detector.min_radius = 60;
    params.detector.max_radius = 100;
    params.segmentation.adaptive_method = AdaptiveMethod::Mean;
    params.segmentation.block_size = 31;
    params.segmentation.min_area = 20;
    // Keeps the clipped rim pieces of a 160 px crop out of the colony band
    params.segmentation.max_area = 600;
    params.foreground.tophat_size = 61;
    params
}

pub fn track_config(sources: Vec<String>, params: PipelineParams) -> TrackConfig {
    TrackConfig {
        base: BaseConfig {
            sources,
            output_dir: None,
            strict: true,
        },
        params,
        observations: false,
        debug_dump_images: false,
    }
}
