//! Dish localization on a reference frame.
//!
//! Circles found by the Hough detector are truncated to the expected dish
//! count in the detector's own output order and turned into [`DishRegion`]s:
//! integer crop geometry plus the disk mask in crop coordinates. The regions
//! are computed once per run and reused unchanged for every frame.

use anyhow::{bail, Result};
use image::{GrayImage, Luma, RgbImage};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::binary_mask::FOREGROUND;
use crate::circle_detection::detect_circles;
use crate::color_utils::symbols;
use crate::params::DetectorParams;

/// Axis-aligned crop window in image coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// One located petri dish
#[derive(Debug, Clone)]
pub struct DishRegion {
    /// 1-based identifier, stable for the whole run
    pub id: usize,
    /// Disk center in image pixels
    pub center: (i64, i64),
    pub radius: u32,
    /// Bounding square of the disk, clipped to the image
    pub crop: CropRect,
    /// Disk center in crop pixels
    pub local_center: (i64, i64),
    /// Disk mask aligned to the crop
    pub local_mask: GrayImage,
    /// Size of the image the dish was found in
    pub image_size: (u32, u32),
}

fn inside_disk(x: i64, y: i64, center: (i64, i64), radius: u32) -> bool {
    let dx = x - center.0;
    let dy = y - center.1;
    let r = radius as i64;
    dx * dx + dy * dy <= r * r
}

impl DishRegion {
    /// Build the geometry for a disk at `center` with `radius` inside an image of `image_size`.
    pub fn from_circle(
        id: usize,
        center: (i64, i64),
        radius: u32,
        image_size: (u32, u32),
    ) -> Self {
        let (w, h) = (image_size.0 as i64, image_size.1 as i64);
        let r = radius as i64;
        let x1 = (center.0 - r).clamp(0, w);
        let x2 = (center.0 + r).clamp(0, w);
        let y1 = (center.1 - r).clamp(0, h);
        let y2 = (center.1 + r).clamp(0, h);

        let crop = CropRect {
            x: x1 as u32,
            y: y1 as u32,
            width: (x2 - x1) as u32,
            height: (y2 - y1) as u32,
        };
        let local_center = (center.0 - x1, center.1 - y1);
        let local_mask = GrayImage::from_fn(crop.width, crop.height, |x, y| {
            if inside_disk(x as i64, y as i64, local_center, radius) {
                Luma([FOREGROUND])
            } else {
                Luma([0])
            }
        });

        Self {
            id,
            center,
            radius,
            crop,
            local_center,
            local_mask,
            image_size,
        }
    }

    /// Full-size mask of the disk in image coordinates
    pub fn circular_mask(&self) -> GrayImage {
        GrayImage::from_fn(self.image_size.0, self.image_size.1, |x, y| {
            if inside_disk(x as i64, y as i64, self.center, self.radius) {
                Luma([FOREGROUND])
            } else {
                Luma([0])
            }
        })
    }

    /// Cut the dish out of `frame` and blank everything outside the disk.
    pub fn crop_from(&self, frame: &RgbImage) -> Result<RgbImage> {
        if frame.dimensions() != self.image_size {
            bail!(
                "Frame is {}x{} but dish {} was located in a {}x{} image",
                frame.width(),
                frame.height(),
                self.id,
                self.image_size.0,
                self.image_size.1
            );
        }

        let mut crop = image::imageops::crop_imm(
            frame,
            self.crop.x,
            self.crop.y,
            self.crop.width,
            self.crop.height,
        )
        .to_image();
        for (px, m) in crop.pixels_mut().zip(self.local_mask.iter()) {
            if *m == 0 {
                px.0 = [0, 0, 0];
            }
        }
        Ok(crop)
    }
}

/// Locate up to `n_dishes` dishes in a grayscale reference image.
///
/// Circles are kept in the detector's output order; ids follow that order
/// starting at 1. No circles yields an empty list and a warning.
pub fn locate_dishes(
    gray: &GrayImage,
    n_dishes: usize,
    params: &DetectorParams,
) -> Vec<DishRegion> {
    let circles = detect_circles(gray, params);
    if circles.is_empty() {
        warn!(
            "{}No dishes detected (radius {}..{} px)",
            symbols::warning(),
            params.min_radius,
            params.max_radius
        );
        return Vec::new();
    }
    if circles.len() > n_dishes {
        debug!(
            "Detector found {} circles, keeping the first {}",
            circles.len(),
            n_dishes
        );
    }

    let dishes: Vec<DishRegion> = circles
        .iter()
        .take(n_dishes)
        .enumerate()
        .map(|(i, c)| {
            DishRegion::from_circle(
                i + 1,
                (c.x.round() as i64, c.y.round() as i64),
                c.radius.round().max(1.0) as u32,
                gray.dimensions(),
            )
        })
        .collect();

    for dish in &dishes {
        info!(
            "{}Dish {} at ({}, {}) radius {}",
            symbols::dish_found(),
            dish.id,
            dish.center.0,
            dish.center.1,
            dish.radius
        );
    }
    dishes
}
