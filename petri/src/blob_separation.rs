//! Marker-controlled splitting of merged colonies.
//!
//! The mask is turned into a distance map (distance of every foreground pixel
//! to the nearest background pixel). Peaks of that map at least `min_distance`
//! apart seed one region each, and regions grow downhill from their seeds
//! through the mask. Pixels where two regions meet stay unlabelled, so a
//! boundary never contributes a region of its own.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use image::{GrayImage, ImageBuffer, Luma};
use imageproc::distance_transform::euclidean_squared_distance_transform;
use log::trace;

use crate::binary_mask::{label_areas, label_components, LabelImage, FOREGROUND};

/// Squared distance of every pixel of `mask` to the nearest background pixel.
/// Pixels outside the image count as background.
fn distance_map(mask: &GrayImage) -> Vec<f64> {
    let (w, h) = mask.dimensions();
    let padded = GrayImage::from_fn(w + 2, h + 2, |x, y| {
        let inside = x >= 1 && y >= 1 && x <= w && y <= h;
        if inside && mask.get_pixel(x - 1, y - 1)[0] != 0 {
            Luma([0])
        } else {
            Luma([FOREGROUND])
        }
    });
    let dt = euclidean_squared_distance_transform(&padded);

    let mut out = Vec::with_capacity((w * h) as usize);
    for y in 0..h {
        for x in 0..w {
            out.push(dt.get_pixel(x + 1, y + 1)[0]);
        }
    }
    out
}

/// Seeds for the flood: distance peaks that dominate a window of radius
/// `min_distance`, thinned so that no two are closer than `min_distance`.
/// Every connected component of the mask receives at least one seed.
fn find_markers(mask: &GrayImage, dist: &[f64], min_distance: f32) -> Vec<usize> {
    let (w, h) = (mask.width() as usize, mask.height() as usize);
    let reach = min_distance.max(1.0).ceil() as usize;

    let dominates = |idx: usize| {
        let (x, y) = (idx % w, idx / w);
        let v = dist[idx];
        for ny in y.saturating_sub(reach)..=(y + reach).min(h - 1) {
            for nx in x.saturating_sub(reach)..=(x + reach).min(w - 1) {
                if dist[ny * w + nx] > v {
                    return false;
                }
            }
        }
        true
    };

    let mut peaks: Vec<usize> = (0..w * h)
        .filter(|&idx| dist[idx] > 0.0 && dominates(idx))
        .collect();
    peaks.sort_by(|&a, &b| dist[b].total_cmp(&dist[a]).then(a.cmp(&b)));

    let min_sq = (min_distance * min_distance) as f64;
    let mut markers: Vec<usize> = Vec::new();
    for idx in peaks {
        let (x, y) = ((idx % w) as f64, (idx / w) as f64);
        let crowded = markers.iter().any(|&m| {
            let (dx, dy) = ((m % w) as f64 - x, (m / w) as f64 - y);
            dx * dx + dy * dy < min_sq
        });
        if !crowded {
            markers.push(idx);
        }
    }

    // A component dominated by a larger neighbour still gets its own seed
    let components = label_components(mask);
    let labels = components.as_raw();
    let n_components = label_areas(&components).len();
    let mut seeded = vec![false; n_components];
    seeded[0] = true;
    for &m in &markers {
        seeded[labels[m] as usize] = true;
    }
    let mut best: Vec<Option<usize>> = vec![None; n_components];
    for (idx, &label) in labels.iter().enumerate() {
        let label = label as usize;
        if seeded[label] {
            continue;
        }
        if best[label].map_or(true, |b| dist[idx] > dist[b]) {
            best[label] = Some(idx);
        }
    }
    markers.extend(best.into_iter().flatten());
    markers
}

#[derive(PartialEq)]
struct FloodItem {
    dist: f64,
    order: u64,
    idx: usize,
    label: u32,
}

impl Eq for FloodItem {}

impl Ord for FloodItem {
    fn cmp(&self, other: &Self) -> Ordering {
        // Deepest first, then first come first served
        self.dist
            .total_cmp(&other.dist)
            .then_with(|| other.order.cmp(&self.order))
    }
}

impl PartialOrd for FloodItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Split the foreground of `mask` into labelled regions, one per seed.
///
/// Labels start at 1 in seed order; 0 marks background and boundaries.
pub fn separate_blobs(mask: &GrayImage, min_distance: f32) -> LabelImage {
    let (width, height) = mask.dimensions();
    let (w, h) = (width as usize, height as usize);
    let mut labels = vec![0u32; w * h];
    if w == 0 || h == 0 || mask.iter().all(|&v| v == 0) {
        return LabelImage::new(width, height);
    }

    let dist = distance_map(mask);
    let markers = find_markers(mask, &dist, min_distance);
    trace!("Blob separation: {} markers", markers.len());

    let mut done = vec![false; w * h];
    let mut is_marker = vec![false; w * h];
    let mut heap = BinaryHeap::new();
    let mut order = 0u64;

    for (i, &idx) in markers.iter().enumerate() {
        is_marker[idx] = true;
        heap.push(FloodItem {
            dist: dist[idx],
            order,
            idx,
            label: i as u32 + 1,
        });
        order += 1;
    }

    while let Some(item) = heap.pop() {
        if done[item.idx] {
            continue;
        }
        done[item.idx] = true;

        // 8-connected, like the components the seeds were placed in
        let (x, y) = (item.idx % w, item.idx / w);
        let mut neighbours = [None; 8];
        let mut k = 0;
        for ny in y.saturating_sub(1)..=(y + 1).min(h - 1) {
            for nx in x.saturating_sub(1)..=(x + 1).min(w - 1) {
                if nx != x || ny != y {
                    neighbours[k] = Some(ny * w + nx);
                    k += 1;
                }
            }
        }

        let touches_other = neighbours
            .iter()
            .flatten()
            .any(|&n| done[n] && labels[n] != 0 && labels[n] != item.label);
        if touches_other && !is_marker[item.idx] {
            continue;
        }
        labels[item.idx] = item.label;

        for &n in neighbours.iter().flatten() {
            if !done[n] && mask.as_raw()[n] != 0 {
                heap.push(FloodItem {
                    dist: dist[n],
                    order,
                    idx: n,
                    label: item.label,
                });
                order += 1;
            }
        }
    }

    ImageBuffer::from_raw(width, height, labels).unwrap_or_else(|| LabelImage::new(width, height))
}

/// Drop regions smaller than `min_area` pixels and renumber the rest 1..n.
pub fn remove_small_regions(labels: &LabelImage, min_area: u32) -> LabelImage {
    let areas = label_areas(labels);
    let mut remap = vec![0u32; areas.len()];
    let mut next = 0u32;
    for (label, &area) in areas.iter().enumerate().skip(1) {
        if area >= min_area && area > 0 {
            next += 1;
            remap[label] = next;
        }
    }
    let mut out = labels.clone();
    for v in out.iter_mut() {
        *v = remap[*v as usize];
    }
    out
}
