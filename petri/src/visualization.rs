//! Debug rasters: dish outlines on a frame and circled colonies on dish crops.

use anyhow::{Context, Result};
use image::{GrayImage, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_circle_mut;
use std::path::Path;

use crate::colony_counting::colony_observations;
use crate::dish_detection::DishRegion;
use crate::segmentation::Segmentation;

const DISH_COLOR: Rgb<u8> = Rgb([0, 100, 255]);
const COLONY_COLOR: Rgb<u8> = Rgb([255, 40, 40]);

fn draw_thick_circle(
    image: &mut RgbImage,
    center: (i64, i64),
    radius: i64,
    thickness: i64,
    color: Rgb<u8>,
) {
    let center = (center.0 as i32, center.1 as i32);
    for offset in 0..thickness {
        let r = (radius + offset).max(1) as i32;
        draw_hollow_circle_mut(image, center, r, color);
    }
}

/// Copy of `frame` with every dish outlined
pub fn annotate_dishes(frame: &RgbImage, dishes: &[DishRegion]) -> RgbImage {
    let mut out = frame.clone();
    let thickness = (frame.width().max(frame.height()) as i64 / 500).max(2);
    for dish in dishes {
        draw_thick_circle(&mut out, dish.center, dish.radius as i64, thickness, DISH_COLOR);
    }
    out
}

/// Copy of a dish crop with the dish outline and a circle around every colony
pub fn annotate_colonies(crop: &RgbImage, dish: &DishRegion, segmentation: &Segmentation) -> RgbImage {
    let mut out = crop.clone();
    draw_thick_circle(&mut out, dish.local_center, dish.radius as i64 - 2, 2, DISH_COLOR);

    for colony in colony_observations(&segmentation.labels, (0, 0)) {
        let center = (colony.x.round() as i64, colony.y.round() as i64);
        let radius = (colony.size / 2.0).ceil() as i64 + 3;
        draw_thick_circle(&mut out, center, radius, 2, COLONY_COLOR);
    }
    out
}

/// Save an RGB debug raster, creating the parent directory
pub fn save_rgb(image: &RgbImage, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    image
        .save(path)
        .with_context(|| format!("Failed to save debug image {}", path.display()))
}

/// Save a binary or grayscale debug raster, creating the parent directory
pub fn save_mask(mask: &GrayImage, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    mask.save(path)
        .with_context(|| format!("Failed to save debug mask {}", path.display()))
}
