mod common;

use common::*;
use petri::dish_detection::locate_dishes;
use petri::params::PipelineParams;

#[test]
fn test_two_large_dishes_found_at_known_centers() {
    let frame = plate(2000, 1000, &LARGE_DISHES);
    let gray = image::imageops::grayscale(&frame);
    let params = PipelineParams::default();

    let dishes = locate_dishes(&gray, 6, &params.detector);
    assert_eq!(dishes.len(), 2, "{dishes:?}");

    for &(x, y, r) in &LARGE_DISHES {
        let dish = dishes
            .iter()
            .find(|d| (d.center.0 - x as i64).abs() <= 5 && (d.center.1 - y as i64).abs() <= 5)
            .unwrap_or_else(|| panic!("no dish near ({x}, {y})"));
        assert!((dish.radius as i64 - r as i64).abs() <= 5);
        // Fully inside the frame, so the crop-local center sits at (r, r)
        assert_eq!(dish.local_center, (dish.radius as i64, dish.radius as i64));
    }
}

#[test]
fn test_dish_count_never_exceeds_limit() {
    let frame = plate(600, 200, &[(100, 100, 80), (300, 100, 80), (500, 100, 80)]);
    let gray = image::imageops::grayscale(&frame);
    let params = small_params();

    let all = locate_dishes(&gray, 6, &params.detector);
    assert_eq!(all.len(), 3);

    for limit in 1..=3 {
        let dishes = locate_dishes(&gray, limit, &params.detector);
        assert_eq!(dishes.len(), limit);
        // Truncation keeps the detector's order
        for (kept, first) in dishes.iter().zip(&all) {
            assert_eq!(kept.center, first.center);
            assert_eq!(kept.id, first.id);
        }
    }
}

#[test]
fn test_dish_at_border_is_clipped() {
    let frame = plate(300, 200, &[(70, 100, 80)]);
    let gray = image::imageops::grayscale(&frame);
    let mut params = small_params();
    params.n_dishes = 1;

    let dishes = locate_dishes(&gray, 1, &params.detector);
    assert_eq!(dishes.len(), 1);
    let dish = &dishes[0];
    assert_eq!(dish.crop.x, 0);
    assert!(dish.local_center.0 < dish.radius as i64);
    assert_eq!(dish.local_mask.dimensions(), (dish.crop.width, dish.crop.height));
}
