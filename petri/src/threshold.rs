//! Channel selection and thresholding.

use image::{GrayImage, Luma, RgbImage};
use imageproc::filter::{box_filter, gaussian_blur_f32};

use crate::binary_mask::FOREGROUND;
use crate::params::{AdaptiveMethod, ColonyPolarity, ColorChannel};

/// Extract one channel of `image`.
///
/// [`ColorChannel::Auto`] picks the RGB channel with the largest standard
/// deviation over the pixels selected by `mask` (all pixels without one).
pub fn extract_channel(
    image: &RgbImage,
    channel: ColorChannel,
    mask: Option<&GrayImage>,
) -> GrayImage {
    match channel {
        ColorChannel::Red => plane(image, 0),
        ColorChannel::Green => plane(image, 1),
        ColorChannel::Blue => plane(image, 2),
        ColorChannel::Luma => image::DynamicImage::ImageRgb8(image.clone()).to_luma8(),
        ColorChannel::Auto => {
            let best = (0..3)
                .map(|c| (c, channel_spread(image, c, mask)))
                // Ties resolve to the earlier channel
                .fold((1usize, f64::NEG_INFINITY), |best, (c, spread)| {
                    if spread > best.1 {
                        (c, spread)
                    } else {
                        best
                    }
                })
                .0;
            log::trace!("Auto channel selected index {best}");
            plane(image, best)
        }
    }
}

fn plane(image: &RgbImage, c: usize) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        Luma([image.get_pixel(x, y)[c]])
    })
}

fn channel_spread(image: &RgbImage, c: usize, mask: Option<&GrayImage>) -> f64 {
    let mut n = 0f64;
    let mut sum = 0f64;
    let mut sum_sq = 0f64;
    for (x, y, px) in image.enumerate_pixels() {
        if let Some(mask) = mask {
            if mask.get_pixel(x, y)[0] == 0 {
                continue;
            }
        }
        let v = px[c] as f64;
        n += 1.0;
        sum += v;
        sum_sq += v * v;
    }
    if n == 0.0 {
        return 0.0;
    }
    let mean = sum / n;
    (sum_sq / n - mean * mean).max(0.0).sqrt()
}

/// Sigma of the Gaussian window for a block of the given size
fn gaussian_sigma(block_size: u32) -> f32 {
    0.3 * ((block_size as f32 - 1.0) * 0.5 - 1.0) + 0.8
}

/// Local mean of every pixel over a `block_size` neighbourhood
pub fn local_mean(gray: &GrayImage, method: AdaptiveMethod, block_size: u32) -> GrayImage {
    match method {
        AdaptiveMethod::Mean => {
            let radius = block_size / 2;
            box_filter(gray, radius, radius)
        }
        AdaptiveMethod::Gaussian => gaussian_blur_f32(gray, gaussian_sigma(block_size).max(0.1)),
    }
}

/// Adaptive threshold that marks colony-like pixels as foreground.
///
/// For dark colonies a pixel is set when it is at least `bias` below its
/// local mean; for bright colonies when it is at least `bias` above it.
pub fn adaptive_threshold(
    gray: &GrayImage,
    method: AdaptiveMethod,
    block_size: u32,
    bias: f32,
    polarity: ColonyPolarity,
) -> GrayImage {
    let mean = local_mean(gray, method, block_size);
    let mut out = GrayImage::new(gray.width(), gray.height());
    for ((dst, &src), &m) in out.iter_mut().zip(gray.iter()).zip(mean.iter()) {
        let (src, m) = (src as f32, m as f32);
        let hit = match polarity {
            ColonyPolarity::Dark => src <= m - bias,
            ColonyPolarity::Bright => src >= m + bias,
        };
        if hit {
            *dst = FOREGROUND;
        }
    }
    out
}

/// Otsu's threshold computed over the pixels selected by `mask` only.
///
/// Pixels strictly above the returned level belong to the bright class.
pub fn masked_otsu_level(gray: &GrayImage, mask: &GrayImage) -> u8 {
    let mut histogram = [0u64; 256];
    for (&v, &m) in gray.iter().zip(mask.iter()) {
        if m != 0 {
            histogram[v as usize] += 1;
        }
    }
    otsu_from_histogram(&histogram)
}

fn otsu_from_histogram(histogram: &[u64; 256]) -> u8 {
    let total: u64 = histogram.iter().sum();
    if total == 0 {
        return 0;
    }
    let weighted_total: f64 = histogram
        .iter()
        .enumerate()
        .map(|(v, &n)| v as f64 * n as f64)
        .sum();

    let mut best_level = 0u8;
    let mut best_variance = -1.0f64;
    let mut below = 0u64;
    let mut weighted_below = 0f64;

    for level in 0..256usize {
        below += histogram[level];
        weighted_below += level as f64 * histogram[level] as f64;
        let above = total - below;
        if below == 0 || above == 0 {
            continue;
        }
        let mean_below = weighted_below / below as f64;
        let mean_above = (weighted_total - weighted_below) / above as f64;
        let diff = mean_below - mean_above;
        let variance = below as f64 * above as f64 * diff * diff;
        if variance > best_variance {
            best_variance = variance;
            best_level = level as u8;
        }
    }
    best_level
}

/// Pixels strictly brighter than `level`, restricted to `mask`
pub fn threshold_above(gray: &GrayImage, level: u8, mask: &GrayImage) -> GrayImage {
    let mut out = GrayImage::new(gray.width(), gray.height());
    for ((dst, &v), &m) in out.iter_mut().zip(gray.iter()).zip(mask.iter()) {
        if m != 0 && v > level {
            *dst = FOREGROUND;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary_mask::count_foreground;
    use image::Rgb;

    #[test]
    fn test_extract_fixed_channels() {
        let image = RgbImage::from_pixel(4, 4, Rgb([10, 20, 30]));
        assert_eq!(extract_channel(&image, ColorChannel::Red, None).get_pixel(0, 0)[0], 10);
        assert_eq!(extract_channel(&image, ColorChannel::Green, None).get_pixel(0, 0)[0], 20);
        assert_eq!(extract_channel(&image, ColorChannel::Blue, None).get_pixel(0, 0)[0], 30);
    }

    #[test]
    fn test_auto_channel_prefers_largest_spread_inside_mask() {
        // Blue varies everywhere, red varies only in the masked left half
        let image = RgbImage::from_fn(20, 10, |x, y| {
            let red = if x < 10 && y % 2 == 0 { 200 } else { 0 };
            let blue = if x >= 10 && y % 2 == 0 { 250 } else { 0 };
            Rgb([red, 50, blue])
        });
        let left = GrayImage::from_fn(20, 10, |x, _| Luma([if x < 10 { 255 } else { 0 }]));

        let picked = extract_channel(&image, ColorChannel::Auto, Some(&left));
        assert_eq!(picked.get_pixel(0, 0)[0], 200);

        let picked = extract_channel(&image, ColorChannel::Auto, None);
        assert_eq!(picked.get_pixel(10, 0)[0], 250);
    }

    #[test]
    fn test_adaptive_threshold_marks_dark_spot() {
        let mut gray = GrayImage::from_pixel(60, 60, Luma([180]));
        for y in 28..32 {
            for x in 28..32 {
                gray.put_pixel(x, y, Luma([60]));
            }
        }

        for method in [AdaptiveMethod::Mean, AdaptiveMethod::Gaussian] {
            let dark = adaptive_threshold(&gray, method, 21, 11.0, ColonyPolarity::Dark);
            assert_eq!(count_foreground(&dark), 16, "{method:?}");
            assert_eq!(dark.get_pixel(29, 29)[0], FOREGROUND);

            let bright = adaptive_threshold(&gray, method, 21, 11.0, ColonyPolarity::Bright);
            assert_eq!(bright.get_pixel(29, 29)[0], 0);
        }
    }

    #[test]
    fn test_uniform_image_has_no_foreground() {
        let gray = GrayImage::from_pixel(30, 30, Luma([90]));
        let out = adaptive_threshold(&gray, AdaptiveMethod::Mean, 11, 5.0, ColonyPolarity::Dark);
        assert_eq!(count_foreground(&out), 0);
    }

    #[test]
    fn test_masked_otsu_ignores_pixels_outside_mask() {
        let gray = GrayImage::from_fn(20, 20, |x, _| {
            Luma([match x {
                0..=4 => 10,
                5..=9 => 200,
                _ => 255,
            }])
        });
        let mask = GrayImage::from_fn(20, 20, |x, _| Luma([if x < 10 { 255 } else { 0 }]));

        let level = masked_otsu_level(&gray, &mask);
        assert!((10..200).contains(&level));

        let fg = threshold_above(&gray, level, &mask);
        assert_eq!(count_foreground(&fg), 5 * 20);
        assert_eq!(fg.get_pixel(15, 0)[0], 0);
    }

    #[test]
    fn test_masked_otsu_on_empty_mask() {
        let gray = GrayImage::from_pixel(5, 5, Luma([77]));
        let mask = GrayImage::new(5, 5);
        assert_eq!(masked_otsu_level(&gray, &mask), 0);
    }
}
