//! Per-frame colony segmentation of one dish.
//!
//! In threshold mode a frame is segmented by an adaptive threshold followed by
//! an area-band filter that keeps colony-sized components. When the temporal
//! masks of the run are available the result is restricted to the foreground
//! mask and cleared of background artifacts; without them (single images) a
//! light erosion cleans component borders instead.
//!
//! Separate mode skips the area filter and splits merged colonies with
//! [`separate_blobs`].

use anyhow::{Context, Result};
use image::{GrayImage, Luma, RgbImage};
use log::trace;

use crate::binary_mask::{self, count_foreground, AreaBand, LabelImage, FOREGROUND};
use crate::blob_separation::{remove_small_regions, separate_blobs};
use crate::colony_counting::{colony_observations, count_colonies, ColonyObservation};
use crate::dish_detection::DishRegion;
use crate::image_input::FrameSource;
use crate::morphology::binary_erode;
use crate::params::{PipelineParams, SegmentationMode, SegmentationParams, SeparatorParams};
use crate::temporal_masks::DishMasks;
use crate::threshold::{adaptive_threshold, extract_channel};

/// Result of segmenting one dish in one frame
#[derive(Debug, Clone)]
pub struct Segmentation {
    /// Final binary mask in crop coordinates
    pub mask: GrayImage,
    /// Colony regions of `mask`; 0 is background
    pub labels: LabelImage,
}

impl Segmentation {
    pub fn colony_count(&self) -> usize {
        count_colonies(&self.labels)
    }

    /// Observations in image coordinates
    pub fn observations(&self, dish: &DishRegion) -> Vec<ColonyObservation> {
        colony_observations(&self.labels, (dish.crop.x, dish.crop.y))
    }
}

/// Segments dish crops with a fixed set of parameters
#[derive(Debug, Clone)]
pub struct FrameSegmenter {
    segmentation: SegmentationParams,
    separator: SeparatorParams,
}

impl FrameSegmenter {
    pub fn new(params: &PipelineParams) -> Self {
        Self {
            segmentation: params.segmentation.clone(),
            separator: params.separator.clone(),
        }
    }

    /// Segment a masked dish crop produced by [`DishRegion::crop_from`].
    pub fn segment(
        &self,
        crop: &RgbImage,
        dish: &DishRegion,
        masks: Option<&DishMasks>,
    ) -> Segmentation {
        let seg = &self.segmentation;
        let channel = extract_channel(crop, seg.channel, Some(&dish.local_mask));
        let candidates = adaptive_threshold(
            &channel,
            seg.adaptive_method,
            seg.block_size,
            seg.bias,
            seg.polarity,
        );

        match seg.mode {
            SegmentationMode::Threshold => {
                let sized = binary_mask::area_band_filter(
                    &candidates,
                    seg.min_area,
                    seg.max_area,
                    AreaBand::Inside,
                );
                let cleaned = match masks {
                    Some(_) => sized,
                    None => binary_erode(&sized, seg.kernel_size),
                };
                let mask = restrict(&cleaned, dish, masks);
                let labels = binary_mask::label_components(&mask);
                trace!(
                    "Dish {}: {} candidate px, {} after masks",
                    dish.id,
                    count_foreground(&candidates),
                    count_foreground(&mask)
                );
                Segmentation { mask, labels }
            }
            SegmentationMode::Separate => {
                let restricted = restrict(&candidates, dish, masks);
                let split = separate_blobs(&restricted, self.separator.min_distance);
                let labels = remove_small_regions(&split, seg.min_area);
                let mask = GrayImage::from_fn(labels.width(), labels.height(), |x, y| {
                    if labels.get_pixel(x, y)[0] > 0 {
                        Luma([FOREGROUND])
                    } else {
                        Luma([0])
                    }
                });
                Segmentation { mask, labels }
            }
        }
    }
}

/// `mask AND foreground AND NOT background`, or `mask AND disk` without temporal masks
fn restrict(mask: &GrayImage, dish: &DishRegion, masks: Option<&DishMasks>) -> GrayImage {
    match masks {
        Some(m) => binary_mask::and_not(&binary_mask::and(mask, &m.foreground), &m.background),
        None => binary_mask::and(mask, &dish.local_mask),
    }
}

/// Colony count of one dish in one frame.
///
/// Accepts anything convertible to a [`FrameSource`]; the source must decode
/// to an image of the size the dish was located in.
pub fn count_dish_colonies(
    source: impl Into<FrameSource>,
    dish: &DishRegion,
    masks: Option<&DishMasks>,
    params: &PipelineParams,
) -> Result<usize> {
    let source = source.into();
    let description = source.describe();
    let frame = source
        .resolve(Some(dish.image_size))
        .with_context(|| format!("Rejected input {description}"))?;
    let crop = dish.crop_from(&frame)?;
    Ok(FrameSegmenter::new(params)
        .segment(&crop, dish, masks)
        .colony_count())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::AdaptiveMethod;
    use image::{DynamicImage, Rgb};
    use imageproc::drawing::draw_filled_circle_mut;

    fn test_params(mode: SegmentationMode) -> PipelineParams {
        let mut params = PipelineParams::default();
        params.segmentation.mode = mode;
        params.segmentation.adaptive_method = AdaptiveMethod::Mean;
        params.segmentation.block_size = 31;
        params.segmentation.min_area = 100;
        params.segmentation.max_area = 1000;
        params.separator.min_distance = 5.0;
        params
    }

    fn plate() -> (RgbImage, DishRegion) {
        let mut frame = RgbImage::from_pixel(200, 200, Rgb([40, 40, 40]));
        draw_filled_circle_mut(&mut frame, (100, 100), 80, Rgb([180, 180, 180]));
        let dish = DishRegion::from_circle(1, (100, 100), 78, (200, 200));
        (frame, dish)
    }

    fn empty_masks(dish: &DishRegion) -> DishMasks {
        DishMasks {
            dish_id: dish.id,
            foreground: dish.local_mask.clone(),
            background: GrayImage::new(dish.crop.width, dish.crop.height),
        }
    }

    #[test]
    fn test_counts_colony_sized_spots_without_masks() {
        let (mut frame, dish) = plate();
        draw_filled_circle_mut(&mut frame, (70, 90), 8, Rgb([60, 60, 60]));
        draw_filled_circle_mut(&mut frame, (130, 110), 8, Rgb([60, 60, 60]));
        // too small for the band
        draw_filled_circle_mut(&mut frame, (100, 60), 2, Rgb([60, 60, 60]));

        let crop = dish.crop_from(&frame).unwrap();
        let segmenter = FrameSegmenter::new(&test_params(SegmentationMode::Threshold));
        let result = segmenter.segment(&crop, &dish, None);
        assert_eq!(result.colony_count(), 2);

        let obs = result.observations(&dish);
        assert_eq!(obs.len(), 2);
        assert!(obs.iter().any(|o| (o.x - 70.0).abs() < 1.5 && (o.y - 90.0).abs() < 1.5));
    }

    #[test]
    fn test_uniform_dish_counts_zero() {
        let (frame, dish) = plate();
        let crop = dish.crop_from(&frame).unwrap();
        for mode in [SegmentationMode::Threshold, SegmentationMode::Separate] {
            let segmenter = FrameSegmenter::new(&test_params(mode));
            assert_eq!(segmenter.segment(&crop, &dish, None).colony_count(), 0);
            let masks = empty_masks(&dish);
            assert_eq!(
                segmenter.segment(&crop, &dish, Some(&masks)).colony_count(),
                0
            );
        }
    }

    #[test]
    fn test_temporal_masks_exclude_colonies() {
        let (mut frame, dish) = plate();
        draw_filled_circle_mut(&mut frame, (70, 90), 8, Rgb([60, 60, 60]));
        draw_filled_circle_mut(&mut frame, (130, 110), 8, Rgb([60, 60, 60]));
        let crop = dish.crop_from(&frame).unwrap();
        let segmenter = FrameSegmenter::new(&test_params(SegmentationMode::Threshold));

        let mut masks = empty_masks(&dish);
        assert_eq!(segmenter.segment(&crop, &dish, Some(&masks)).colony_count(), 2);

        // Background artifact over the first spot (crop origin is 22, 22)
        draw_filled_circle_mut(&mut masks.background, (48, 68), 12, Luma([FOREGROUND]));
        assert_eq!(segmenter.segment(&crop, &dish, Some(&masks)).colony_count(), 1);

        // Foreground envelope that misses the second spot too
        masks.foreground = GrayImage::new(dish.crop.width, dish.crop.height);
        draw_filled_circle_mut(&mut masks.foreground, (48, 68), 12, Luma([FOREGROUND]));
        assert_eq!(segmenter.segment(&crop, &dish, Some(&masks)).colony_count(), 0);
    }

    #[test]
    fn test_separate_mode_splits_touching_colonies() {
        let (mut frame, dish) = plate();
        draw_filled_circle_mut(&mut frame, (90, 100), 9, Rgb([60, 60, 60]));
        draw_filled_circle_mut(&mut frame, (106, 100), 9, Rgb([60, 60, 60]));
        let crop = dish.crop_from(&frame).unwrap();

        let separate = FrameSegmenter::new(&test_params(SegmentationMode::Separate));
        let masks = empty_masks(&dish);
        assert_eq!(separate.segment(&crop, &dish, Some(&masks)).colony_count(), 2);

        let threshold = FrameSegmenter::new(&test_params(SegmentationMode::Threshold));
        assert_eq!(threshold.segment(&crop, &dish, Some(&masks)).colony_count(), 1);
    }

    #[test]
    fn test_count_dish_colonies_accepts_rasters_and_rejects_wrong_shape() {
        let (mut frame, dish) = plate();
        draw_filled_circle_mut(&mut frame, (70, 90), 8, Rgb([60, 60, 60]));
        let params = test_params(SegmentationMode::Threshold);

        let count = count_dish_colonies(frame.clone(), &dish, None, &params).unwrap();
        assert_eq!(count, 1);

        let wrong = DynamicImage::ImageRgb8(RgbImage::new(100, 100));
        assert!(count_dish_colonies(wrong, &dish, None, &params).is_err());
    }
}
