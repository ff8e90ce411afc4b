//! Morphological filters on 8-bit rasters.
//!
//! Grayscale erosion and dilation use a square structuring element and are
//! separable: a horizontal pass over rows followed by the same pass over the
//! transposed image. Each pass keeps a monotonic window of candidates, so the
//! cost per pixel does not depend on the element size. This matters for the
//! foreground top-hat, whose element spans hundreds of pixels.
//!
//! Binary operations on 0/255 masks delegate to `imageproc::morphology`.

use image::GrayImage;
use imageproc::distance_transform::Norm;
use rayon::prelude::*;
use std::collections::VecDeque;

use crate::params::ColonyPolarity;

#[derive(Clone, Copy)]
enum Extremum {
    Min,
    Max,
}

impl Extremum {
    /// True when `candidate` makes `held` obsolete inside the window
    #[inline]
    fn supersedes(self, candidate: u8, held: u8) -> bool {
        match self {
            Extremum::Min => candidate <= held,
            Extremum::Max => candidate >= held,
        }
    }
}

/// Offsets of a window of `size` pixels around its anchor.
/// Even sizes reach one pixel further back than forward.
fn window_reach(size: u32) -> (usize, usize) {
    let size = size.max(1) as usize;
    let before = size / 2;
    (before, size - 1 - before)
}

/// Sliding minimum or maximum of `line` over `[i - before, i + after]`,
/// with the window clipped to the line.
fn sliding_extremum(line: &[u8], out: &mut [u8], before: usize, after: usize, kind: Extremum) {
    let n = line.len();
    let mut window: VecDeque<usize> = VecDeque::new();
    let mut next = 0;

    for (i, slot) in out.iter_mut().enumerate() {
        let end = (i + after).min(n - 1);
        while next <= end {
            while let Some(&back) = window.back() {
                if kind.supersedes(line[next], line[back]) {
                    window.pop_back();
                } else {
                    break;
                }
            }
            window.push_back(next);
            next += 1;
        }

        let start = i.saturating_sub(before);
        while let Some(&front) = window.front() {
            if front < start {
                window.pop_front();
            } else {
                break;
            }
        }

        // The window always holds at least index `end`
        *slot = window.front().map(|&idx| line[idx]).unwrap_or(line[i]);
    }
}

fn transpose(data: &[u8], width: usize, height: usize) -> Vec<u8> {
    let mut out = vec![0u8; data.len()];
    for y in 0..height {
        for x in 0..width {
            out[x * height + y] = data[y * width + x];
        }
    }
    out
}

fn rows_pass(data: &[u8], width: usize, size: u32, kind: Extremum) -> Vec<u8> {
    let (before, after) = window_reach(size);
    let mut out = vec![0u8; data.len()];
    out.par_chunks_mut(width)
        .zip(data.par_chunks(width))
        .for_each(|(dst, src)| sliding_extremum(src, dst, before, after, kind));
    out
}

fn square_filter(image: &GrayImage, size: u32, kind: Extremum) -> GrayImage {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 || size <= 1 {
        return image.clone();
    }
    let (w, h) = (width as usize, height as usize);

    let horizontal = rows_pass(image.as_raw(), w, size, kind);
    let columns = rows_pass(&transpose(&horizontal, w, h), h, size, kind);

    // transpose() returns exactly width * height bytes
    GrayImage::from_raw(width, height, transpose(&columns, h, w))
        .unwrap_or_else(|| GrayImage::new(width, height))
}

/// Grayscale dilation with a `size` x `size` square
pub fn dilate_square(image: &GrayImage, size: u32) -> GrayImage {
    square_filter(image, size, Extremum::Max)
}

/// Grayscale erosion with a `size` x `size` square
pub fn erode_square(image: &GrayImage, size: u32) -> GrayImage {
    square_filter(image, size, Extremum::Min)
}

pub fn open_square(image: &GrayImage, size: u32) -> GrayImage {
    dilate_square(&erode_square(image, size), size)
}

pub fn close_square(image: &GrayImage, size: u32) -> GrayImage {
    erode_square(&dilate_square(image, size), size)
}

/// White top-hat: structures brighter than their surroundings and smaller than the element
pub fn top_hat(image: &GrayImage, size: u32) -> GrayImage {
    let opened = open_square(image, size);
    saturating_difference(image, &opened)
}

/// Black top-hat: structures darker than their surroundings and smaller than the element
pub fn black_hat(image: &GrayImage, size: u32) -> GrayImage {
    let closed = close_square(image, size);
    saturating_difference(&closed, image)
}

/// Top-hat that makes colonies of the given polarity bright
pub fn colony_hat(image: &GrayImage, size: u32, polarity: ColonyPolarity) -> GrayImage {
    match polarity {
        ColonyPolarity::Dark => black_hat(image, size),
        ColonyPolarity::Bright => top_hat(image, size),
    }
}

fn saturating_difference(a: &GrayImage, b: &GrayImage) -> GrayImage {
    let mut out = a.clone();
    for (dst, &sub) in out.iter_mut().zip(b.iter()) {
        *dst = dst.saturating_sub(sub);
    }
    out
}

/// Chebyshev radius of a square element of side `kernel_size`
fn kernel_radius(kernel_size: u32) -> u8 {
    (kernel_size / 2).min(u8::MAX as u32) as u8
}

/// Binary erosion of a 0/255 mask with a square element
pub fn binary_erode(mask: &GrayImage, kernel_size: u32) -> GrayImage {
    let radius = kernel_radius(kernel_size);
    if radius == 0 {
        return mask.clone();
    }
    imageproc::morphology::erode(mask, Norm::LInf, radius)
}

/// Binary opening with `iterations` erosions followed by as many dilations.
///
/// `n` erosions by a square of radius `k` equal one erosion by a square of
/// radius `n * k` (likewise for dilation), so a single wider opening is used.
pub fn binary_open(mask: &GrayImage, kernel_size: u32, iterations: u32) -> GrayImage {
    let radius = kernel_radius(kernel_size) as u32 * iterations;
    if radius == 0 {
        return mask.clone();
    }
    imageproc::morphology::open(mask, Norm::LInf, radius.min(u8::MAX as u32) as u8)
}
