//! Per-dish masks built once per run before any frame is counted.
//!
//! The foreground mask comes from the last frame of the sequence: by then every
//! colony that will ever appear is visible, so it bounds where colonies may be
//! counted. The background mask is the union of the artifact masks of the
//! calibration frames at the start of the sequence, which must be free of
//! colonies; anything flagged there stays excluded for the whole run.

use image::{GrayImage, RgbImage};
use imageproc::filter::median_filter;
use log::{debug, warn};
use rayon::prelude::*;

use crate::binary_mask::{self, count_foreground, AreaBand};
use crate::color_utils::symbols;
use crate::dish_detection::DishRegion;
use crate::morphology::{binary_open, colony_hat};
use crate::params::PipelineParams;
use crate::threshold::{adaptive_threshold, extract_channel, masked_otsu_level, threshold_above};

/// Foreground and background masks of one dish, aligned to its crop
#[derive(Debug, Clone)]
pub struct DishMasks {
    pub dish_id: usize,
    pub foreground: GrayImage,
    pub background: GrayImage,
}

/// Maximal-sensitivity segmentation of a masked dish crop.
///
/// Median denoise, top-hat toward the colony polarity, then Otsu's level over
/// the disk pixels.
pub fn foreground_mask(crop: &RgbImage, dish: &DishRegion, params: &PipelineParams) -> GrayImage {
    let seg = &params.segmentation;
    let fg = &params.foreground;

    let channel = extract_channel(crop, seg.channel, Some(&dish.local_mask));
    let radius = fg.median_size / 2;
    let denoised = median_filter(&channel, radius, radius);
    let hat = colony_hat(&denoised, fg.tophat_size, seg.polarity);

    let level = masked_otsu_level(&hat, &dish.local_mask);
    threshold_above(&hat, level, &dish.local_mask)
}

/// Artifacts of one calibration frame: locally anomalous components whose area
/// lies outside the colony size band, cleaned by opening.
pub fn artifact_mask(crop: &RgbImage, dish: &DishRegion, params: &PipelineParams) -> GrayImage {
    let seg = &params.segmentation;

    let channel = extract_channel(crop, seg.channel, Some(&dish.local_mask));
    let anomalies = adaptive_threshold(
        &channel,
        seg.adaptive_method,
        seg.block_size,
        seg.bias,
        seg.polarity,
    );
    let artifacts =
        binary_mask::area_band_filter(&anomalies, seg.min_area, seg.max_area, AreaBand::Outside);
    let cleaned = binary_open(&artifacts, seg.kernel_size, seg.opening_iterations);
    binary_mask::and(&cleaned, &dish.local_mask)
}

/// Foreground and background masks for every dish of a run
#[derive(Debug, Clone, Default)]
pub struct TemporalMaskModel {
    masks: Vec<DishMasks>,
    calibration_frames: usize,
}

impl TemporalMaskModel {
    /// Build all masks from the reference frame and the calibration frames.
    ///
    /// `calibration` is consumed one frame at a time; each frame contributes
    /// its artifact masks to a running union per dish. Dishes are processed in
    /// parallel within each step.
    pub fn build<I>(
        dishes: &[DishRegion],
        reference: &RgbImage,
        calibration: I,
        params: &PipelineParams,
    ) -> Self
    where
        I: IntoIterator<Item = RgbImage>,
    {
        let foregrounds: Vec<GrayImage> = dishes
            .par_iter()
            .map(|dish| match dish.crop_from(reference) {
                Ok(crop) => foreground_mask(&crop, dish, params),
                Err(e) => {
                    // The reference frame defines the geometry, so this only
                    // happens when dishes come from elsewhere
                    warn!(
                        "{}Foreground mask for dish {} left empty: {e}",
                        symbols::warning(),
                        dish.id
                    );
                    GrayImage::new(dish.crop.width, dish.crop.height)
                }
            })
            .collect();

        let empty: Vec<GrayImage> = dishes
            .iter()
            .map(|d| GrayImage::new(d.crop.width, d.crop.height))
            .collect();

        let (backgrounds, calibration_frames) =
            calibration
                .into_iter()
                .fold((empty, 0usize), |(stacked, count), frame| {
                    let stacked = dishes
                        .par_iter()
                        .zip(stacked.into_par_iter())
                        .map(|(dish, acc)| match dish.crop_from(&frame) {
                            Ok(crop) => binary_mask::or(&acc, &artifact_mask(&crop, dish, params)),
                            Err(e) => {
                                warn!(
                                    "{}Calibration frame ignored for dish {}: {e}",
                                    symbols::warning(),
                                    dish.id
                                );
                                acc
                            }
                        })
                        .collect();
                    (stacked, count + 1)
                });

        let masks: Vec<DishMasks> = dishes
            .iter()
            .zip(foregrounds)
            .zip(backgrounds)
            .map(|((dish, foreground), background)| {
                debug!(
                    "Dish {} masks: foreground {} px, background {} px",
                    dish.id,
                    count_foreground(&foreground),
                    count_foreground(&background)
                );
                DishMasks {
                    dish_id: dish.id,
                    foreground,
                    background,
                }
            })
            .collect();

        Self {
            masks,
            calibration_frames,
        }
    }

    pub fn masks_for(&self, dish_id: usize) -> Option<&DishMasks> {
        self.masks.iter().find(|m| m.dish_id == dish_id)
    }

    pub fn masks(&self) -> &[DishMasks] {
        &self.masks
    }

    /// Calibration frames that were stacked into the background masks
    pub fn calibration_frames(&self) -> usize {
        self.calibration_frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::AdaptiveMethod;
    use image::{Luma, Rgb};
    use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut};
    use imageproc::rect::Rect;

    fn test_params() -> PipelineParams {
        let mut params = PipelineParams::default();
        params.segmentation.adaptive_method = AdaptiveMethod::Mean;
        params.segmentation.block_size = 31;
        params.segmentation.min_area = 20;
        params.segmentation.max_area = 200;
        params.foreground.tophat_size = 41;
        params
    }

    fn dish_frame() -> (RgbImage, DishRegion) {
        let mut frame = RgbImage::from_pixel(200, 200, Rgb([40, 40, 40]));
        draw_filled_circle_mut(&mut frame, (100, 100), 80, Rgb([180, 180, 180]));
        let dish = DishRegion::from_circle(1, (100, 100), 78, (200, 200));
        (frame, dish)
    }

    #[test]
    fn test_foreground_mask_finds_dark_colony() {
        let (mut frame, dish) = dish_frame();
        draw_filled_circle_mut(&mut frame, (90, 110), 6, Rgb([60, 60, 60]));

        let crop = dish.crop_from(&frame).unwrap();
        let fg = foreground_mask(&crop, &dish, &test_params());

        // crop origin is (22, 22)
        assert_eq!(fg.get_pixel(68, 88)[0], 255);
        assert_eq!(fg.get_pixel(78, 40)[0], 0);
        assert!(count_foreground(&fg) < 400);
    }

    #[test]
    fn test_artifact_mask_keeps_large_streak_drops_colony_sized_spot() {
        let (mut frame, dish) = dish_frame();
        // colony-sized spot: inside the band, not an artifact
        draw_filled_circle_mut(&mut frame, (80, 100), 4, Rgb([60, 60, 60]));
        // long scratch: larger than the band
        draw_filled_rect_mut(&mut frame, Rect::at(90, 60).of_size(40, 10), Rgb([60, 60, 60]));

        let crop = dish.crop_from(&frame).unwrap();
        let artifacts = artifact_mask(&crop, &dish, &test_params());

        assert_eq!(artifacts.get_pixel(58, 78)[0], 0);
        assert_eq!(artifacts.get_pixel(88, 43)[0], 255);
    }

    #[test]
    fn test_background_union_ignores_frame_order() {
        let (frame, dish) = dish_frame();
        let mut a = frame.clone();
        draw_filled_rect_mut(&mut a, Rect::at(70, 70).of_size(40, 8), Rgb([60, 60, 60]));
        let mut b = frame.clone();
        draw_filled_rect_mut(&mut b, Rect::at(100, 120).of_size(8, 40), Rgb([60, 60, 60]));
        let params = test_params();

        let forward = TemporalMaskModel::build(
            std::slice::from_ref(&dish),
            &frame,
            vec![a.clone(), b.clone(), frame.clone()],
            &params,
        );
        let backward = TemporalMaskModel::build(
            std::slice::from_ref(&dish),
            &frame,
            vec![frame.clone(), b, a],
            &params,
        );

        assert_eq!(forward.calibration_frames(), 3);
        let fwd = &forward.masks_for(1).unwrap().background;
        let bwd = &backward.masks_for(1).unwrap().background;
        assert_eq!(fwd, bwd);
        assert!(count_foreground(fwd) > 0);
    }

    #[test]
    fn test_build_without_calibration_frames_gives_empty_background() {
        let (frame, dish) = dish_frame();
        let model = TemporalMaskModel::build(
            std::slice::from_ref(&dish),
            &frame,
            Vec::<RgbImage>::new(),
            &test_params(),
        );
        let masks = model.masks_for(1).unwrap();
        assert_eq!(count_foreground(&masks.background), 0);
        assert_eq!(masks.background.dimensions(), (156, 156));
        assert!(model.masks_for(2).is_none());
    }

    #[test]
    fn test_uniform_dish_has_no_foreground() {
        let (frame, dish) = dish_frame();
        let crop = dish.crop_from(&frame).unwrap();
        let fg = foreground_mask(&crop, &dish, &test_params());
        // Only the disk rim may respond
        let interior = GrayImage::from_fn(fg.width(), fg.height(), |x, y| {
            let dx = x as i64 - dish.local_center.0;
            let dy = y as i64 - dish.local_center.1;
            Luma([if dx * dx + dy * dy < 60 * 60 { 255 } else { 0 }])
        });
        assert_eq!(count_foreground(&binary_mask::and(&fg, &interior)), 0);
    }
}
