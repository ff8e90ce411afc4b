//! Set operations on 0/255 masks and the connected-component area filter.

use image::{GrayImage, ImageBuffer, Luma};
use imageproc::region_labelling::{connected_components, Connectivity};

/// Per-pixel component labels; 0 is background
pub type LabelImage = ImageBuffer<Luma<u32>, Vec<u32>>;

pub const FOREGROUND: u8 = 255;

/// Which side of the `[min_area, max_area]` band survives the filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AreaBand {
    /// Keep components whose area lies inside the band (colony candidates)
    Inside,
    /// Keep components whose area lies outside the band (artifacts)
    Outside,
}

fn combine(a: &GrayImage, b: &GrayImage, op: impl Fn(bool, bool) -> bool) -> GrayImage {
    debug_assert_eq!(a.dimensions(), b.dimensions(), "mask dimensions differ");
    let mut out = GrayImage::new(a.width(), a.height());
    for ((dst, &pa), &pb) in out.iter_mut().zip(a.iter()).zip(b.iter()) {
        if op(pa != 0, pb != 0) {
            *dst = FOREGROUND;
        }
    }
    out
}

pub fn and(a: &GrayImage, b: &GrayImage) -> GrayImage {
    combine(a, b, |x, y| x && y)
}

/// Pixels set in `a` and clear in `b`
pub fn and_not(a: &GrayImage, b: &GrayImage) -> GrayImage {
    combine(a, b, |x, y| x && !y)
}

pub fn or(a: &GrayImage, b: &GrayImage) -> GrayImage {
    combine(a, b, |x, y| x || y)
}

pub fn count_foreground(mask: &GrayImage) -> usize {
    mask.iter().filter(|&&v| v != 0).count()
}

/// 8-connected labelling of the non-zero pixels of `mask`
pub fn label_components(mask: &GrayImage) -> LabelImage {
    let binary = binarize(mask);
    connected_components(&binary, Connectivity::Eight, Luma([0u8]))
}

/// Pixel count per label, indexed by label value
pub fn label_areas(labels: &LabelImage) -> Vec<u32> {
    let max_label = labels.iter().copied().max().unwrap_or(0) as usize;
    let mut areas = vec![0u32; max_label + 1];
    for &label in labels.iter() {
        areas[label as usize] += 1;
    }
    areas
}

/// Keep the connected components whose pixel area lies on the requested side
/// of `[min_area, max_area]` (bounds inclusive).
pub fn area_band_filter(
    mask: &GrayImage,
    min_area: u32,
    max_area: u32,
    keep: AreaBand,
) -> GrayImage {
    let labels = label_components(mask);
    let areas = label_areas(&labels);
    let kept: Vec<bool> = areas
        .iter()
        .enumerate()
        .map(|(label, &area)| {
            let inside = (min_area..=max_area).contains(&area);
            label != 0
                && match keep {
                    AreaBand::Inside => inside,
                    AreaBand::Outside => !inside,
                }
        })
        .collect();

    let mut out = GrayImage::new(mask.width(), mask.height());
    for (dst, &label) in out.iter_mut().zip(labels.iter()) {
        if kept[label as usize] {
            *dst = FOREGROUND;
        }
    }
    out
}

/// Map every non-zero pixel to 255
pub fn binarize(mask: &GrayImage) -> GrayImage {
    let mut out = mask.clone();
    for v in out.iter_mut() {
        if *v != 0 {
            *v = FOREGROUND;
        }
    }
    out
}
