//! Counting and describing colony regions in a labelled dish mask.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::binary_mask::LabelImage;

/// One detected colony in one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColonyObservation {
    /// Centroid in image coordinates
    pub x: f32,
    pub y: f32,
    /// Pixel area
    pub area: u32,
    /// Diameter of a disk with the same area
    pub size: f32,
}

/// Number of distinct regions with a positive label. Boundary pixels carry
/// label 0 and are never counted.
pub fn count_colonies(labels: &LabelImage) -> usize {
    let mut seen = BTreeSet::new();
    for &label in labels.iter() {
        if label > 0 {
            seen.insert(label);
        }
    }
    seen.len()
}

/// Centroid and size of every region, ordered by label.
///
/// `offset` is the position of the labelled crop inside the full image.
pub fn colony_observations(labels: &LabelImage, offset: (u32, u32)) -> Vec<ColonyObservation> {
    let mut sums: BTreeMap<u32, (u64, u64, u32)> = BTreeMap::new();
    for (x, y, label) in labels.enumerate_pixels() {
        let label = label[0];
        if label == 0 {
            continue;
        }
        let entry = sums.entry(label).or_insert((0, 0, 0));
        entry.0 += x as u64;
        entry.1 += y as u64;
        entry.2 += 1;
    }

    sums.into_values()
        .map(|(sx, sy, area)| ColonyObservation {
            x: offset.0 as f32 + sx as f32 / area as f32,
            y: offset.1 as f32 + sy as f32 / area as f32,
            area,
            size: 2.0 * (area as f32 / std::f32::consts::PI).sqrt(),
        })
        .collect()
}
