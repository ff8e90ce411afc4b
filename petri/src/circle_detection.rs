//! Gradient Hough transform for large circles.
//!
//! Every Canny edge pixel votes for centers along its gradient direction, in
//! both senses, at every distance in `[min_radius, max_radius]`. The vote
//! accumulator has `1 / resolution_factor` of the image resolution. Smoothed
//! accumulator peaks above `center_threshold` become center candidates, strongest
//! first; a candidate closer than `min_center_distance` to an accepted circle is
//! dropped. Each surviving center gets the radius that best explains the edge
//! pixels around it, and center and radius are then refitted by least squares
//! to the edge pixels of that ring. Accumulator peaks of large circles are
//! broad, so the peak alone can sit several pixels off the true center.
//!
//! Output order is the order circles were accepted: by decreasing center votes.

use image::{GrayImage, ImageBuffer, Luma};
use imageproc::edges::canny;
use imageproc::filter::gaussian_blur_f32;
use imageproc::gradients::{horizontal_sobel, vertical_sobel};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::params::DetectorParams;

/// Blur applied before gradients, matching the one inside `canny`
const EDGE_SIGMA: f32 = 1.4;

/// Smoothing of the vote accumulator, in accumulator cells
const ACCUMULATOR_SIGMA: f32 = 1.0;

/// Half-width in pixels of the radius window counted as edge support
const RADIUS_TOLERANCE: usize = 1;

/// Ring half-widths of the refit passes, as fractions of the radius
const REFIT_BANDS: [f32; 3] = [0.04, 0.015, 0.0];

/// A detected circle in image coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Circle {
    pub x: f32,
    pub y: f32,
    pub radius: f32,
    /// Smoothed accumulator value at the center
    pub votes: f32,
    /// Edge pixels within the radius tolerance
    pub support: u32,
}

type Accumulator = ImageBuffer<Luma<f32>, Vec<f32>>;

struct EdgePoint {
    x: f32,
    y: f32,
}

/// Find circles in a grayscale image. See the module docs for the ordering contract.
pub fn detect_circles(gray: &GrayImage, params: &DetectorParams) -> Vec<Circle> {
    let (width, height) = gray.dimensions();
    if width < 3 || height < 3 || params.min_radius > params.max_radius {
        return Vec::new();
    }

    let edges = canny(gray, params.edge_threshold / 2.0, params.edge_threshold);
    let smoothed = gaussian_blur_f32(gray, EDGE_SIGMA);
    let gx = horizontal_sobel(&smoothed);
    let gy = vertical_sobel(&smoothed);

    let mut points = Vec::new();
    let dp = params.resolution_factor.max(1.0);
    let acc_w = (width as f32 / dp).ceil() as usize;
    let acc_h = (height as f32 / dp).ceil() as usize;
    let mut accumulator = vec![0f32; acc_w * acc_h];

    // No circle in the image can be wider than its diagonal
    let diagonal = (width as f32).hypot(height as f32).ceil() as u32;
    let r_min = params.min_radius as f32 / dp;
    let r_max = params.max_radius.min(diagonal) as f32 / dp;

    for (x, y, edge) in edges.enumerate_pixels() {
        if edge[0] == 0 {
            continue;
        }
        points.push(EdgePoint {
            x: x as f32,
            y: y as f32,
        });

        let dx = gx.get_pixel(x, y)[0] as f32;
        let dy = gy.get_pixel(x, y)[0] as f32;
        let magnitude = (dx * dx + dy * dy).sqrt();
        if magnitude < f32::EPSILON {
            continue;
        }
        let (ux, uy) = (dx / magnitude, dy / magnitude);
        // Center of the pixel in accumulator coordinates
        let ax = (x as f32 + 0.5) / dp;
        let ay = (y as f32 + 0.5) / dp;

        for sign in [1.0f32, -1.0] {
            let mut r = r_min;
            while r <= r_max {
                let cx = ax + sign * ux * r;
                let cy = ay + sign * uy * r;
                if cx < 0.0 || cy < 0.0 || cx >= acc_w as f32 || cy >= acc_h as f32 {
                    break;
                }
                accumulator[cy as usize * acc_w + cx as usize] += 1.0;
                r += 1.0;
            }
        }
    }

    debug!(
        "Circle voting: {} edge pixels, accumulator {}x{}",
        points.len(),
        acc_w,
        acc_h
    );
    if points.is_empty() {
        return Vec::new();
    }

    let accumulator = Accumulator::from_raw(acc_w as u32, acc_h as u32, accumulator)
        .map(|acc| gaussian_blur_f32(&acc, ACCUMULATOR_SIGMA));
    let Some(accumulator) = accumulator else {
        return Vec::new();
    };

    let candidates = center_candidates(&accumulator, params.center_threshold);
    debug!("Circle voting: {} center candidates", candidates.len());

    let min_dist_sq = params.min_center_distance * params.min_center_distance;
    let mut circles: Vec<Circle> = Vec::new();

    for (idx, votes) in candidates {
        let (cx, cy) = refine_center(&accumulator, idx % acc_w, idx / acc_w);
        let (cx, cy) = (cx * dp, cy * dp);

        let crowded = circles.iter().any(|c| {
            let (ddx, ddy) = (c.x - cx, c.y - cy);
            ddx * ddx + ddy * ddy < min_dist_sq
        });
        if crowded {
            continue;
        }

        if let Some((radius, _)) = estimate_radius(&points, cx, cy, params, diagonal) {
            let (cx, cy, radius, support) = refit_circle(&points, cx, cy, radius);
            debug!(
                "Accepted circle at ({cx:.1}, {cy:.1}) r={radius:.1} votes={votes:.1} support={support}"
            );
            circles.push(Circle {
                x: cx,
                y: cy,
                radius,
                votes,
                support,
            });
        }
    }

    circles
}

/// Local maxima of the accumulator at or above `threshold`, strongest first.
/// Equal neighbours are resolved toward the lower index.
fn center_candidates(acc: &Accumulator, threshold: f32) -> Vec<(usize, f32)> {
    let (w, h) = (acc.width() as usize, acc.height() as usize);
    let data = acc.as_raw();
    let mut candidates = Vec::new();

    for y in 0..h {
        for x in 0..w {
            let idx = y * w + x;
            let val = data[idx];
            if val < threshold {
                continue;
            }
            let mut is_max = true;
            'neighbours: for ny in y.saturating_sub(1)..=(y + 1).min(h - 1) {
                for nx in x.saturating_sub(1)..=(x + 1).min(w - 1) {
                    let nidx = ny * w + nx;
                    if nidx == idx {
                        continue;
                    }
                    if data[nidx] > val || (data[nidx] == val && nidx < idx) {
                        is_max = false;
                        break 'neighbours;
                    }
                }
            }
            if is_max {
                candidates.push((idx, val));
            }
        }
    }

    candidates.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    candidates
}

/// Sub-cell center from the 3x3 weighted centroid, in accumulator units
fn refine_center(acc: &Accumulator, x: usize, y: usize) -> (f32, f32) {
    let (w, h) = (acc.width() as usize, acc.height() as usize);
    let mut sum = 0f32;
    let mut sx = 0f32;
    let mut sy = 0f32;
    for ny in y.saturating_sub(1)..=(y + 1).min(h - 1) {
        for nx in x.saturating_sub(1)..=(x + 1).min(w - 1) {
            let v = acc.get_pixel(nx as u32, ny as u32)[0];
            sum += v;
            sx += v * (nx as f32 + 0.5);
            sy += v * (ny as f32 + 0.5);
        }
    }
    if sum <= 0.0 {
        return (x as f32 + 0.5, y as f32 + 0.5);
    }
    (sx / sum, sy / sum)
}

/// Pick the radius whose ring collects the most edge pixels per unit of
/// circumference. Returns `None` when the best ring is too sparse.
fn estimate_radius(
    points: &[EdgePoint],
    cx: f32,
    cy: f32,
    params: &DetectorParams,
    diagonal: u32,
) -> Option<(f32, u32)> {
    let r_min = params.min_radius as usize;
    let r_max = params.max_radius.min(diagonal) as usize;
    if r_min > r_max {
        return None;
    }
    let mut histogram = vec![0u32; r_max + RADIUS_TOLERANCE + 2];

    for p in points {
        // Edge pixel centers
        let dx = p.x + 0.5 - cx;
        let dy = p.y + 0.5 - cy;
        let d = (dx * dx + dy * dy).sqrt().round() as usize;
        if d + RADIUS_TOLERANCE >= r_min && d <= r_max + RADIUS_TOLERANCE {
            histogram[d] += 1;
        }
    }

    let mut best: Option<(usize, u32, f32)> = None;
    for r in r_min.max(1)..=r_max {
        let lo = r.saturating_sub(RADIUS_TOLERANCE);
        let hi = r + RADIUS_TOLERANCE;
        let support: u32 = histogram[lo..=hi].iter().sum();
        let score = support as f32 / r as f32;
        if best.map_or(true, |(_, _, s)| score > s) {
            best = Some((r, support, score));
        }
    }

    let (r, support, _) = best?;
    if (support as f32) < params.center_threshold {
        return None;
    }

    // Mean distance of the supporting pixels for a sub-pixel radius
    let lo = r.saturating_sub(RADIUS_TOLERANCE);
    let weighted: f32 = (lo..=r + RADIUS_TOLERANCE)
        .map(|d| d as f32 * histogram[d] as f32)
        .sum();
    Some((weighted / support as f32, support))
}

/// Least-squares refit of a circle to the edge pixels near its ring.
///
/// Each pass keeps the pixels within a band around the current circle and
/// solves the algebraic fit `x² + y² + Dx + Ey + F = 0`. A pass whose result
/// leaves the band is discarded. Returns the circle and its edge support.
fn refit_circle(points: &[EdgePoint], cx: f32, cy: f32, radius: f32) -> (f32, f32, f32, u32) {
    let min_band = RADIUS_TOLERANCE as f32 + 1.0;
    let (mut cx, mut cy, mut radius) = (cx, cy, radius);

    for fraction in REFIT_BANDS {
        let band = (fraction * radius).max(min_band);
        let Some((fx, fy, fr)) = fit_circle(points, cx, cy, radius, band) else {
            continue;
        };
        let shift = (fx - cx).hypot(fy - cy);
        if shift <= band && (fr - radius).abs() <= band {
            (cx, cy, radius) = (fx, fy, fr);
        }
    }

    let tolerance = RADIUS_TOLERANCE as f32 + 0.5;
    let support = points
        .iter()
        .filter(|p| ((p.x + 0.5 - cx).hypot(p.y + 0.5 - cy) - radius).abs() <= tolerance)
        .count() as u32;
    (cx, cy, radius, support)
}

/// Algebraic circle fit over the edge pixels within `band` of a circle
fn fit_circle(
    points: &[EdgePoint],
    cx: f32,
    cy: f32,
    radius: f32,
    band: f32,
) -> Option<(f32, f32, f32)> {
    // Coordinates relative to the current center keep the sums well scaled
    let (ox, oy) = (cx as f64, cy as f64);
    let (radius, band) = (radius as f64, band as f64);
    let mut m = [[0f64; 3]; 3];
    let mut rhs = [0f64; 3];

    for p in points {
        let u = (p.x + 0.5) as f64 - ox;
        let v = (p.y + 0.5) as f64 - oy;
        let z = u * u + v * v;
        if (z.sqrt() - radius).abs() > band {
            continue;
        }
        let row = [u, v, 1.0];
        for i in 0..3 {
            for j in 0..3 {
                m[i][j] += row[i] * row[j];
            }
            rhs[i] -= row[i] * z;
        }
    }
    if m[2][2] < 3.0 {
        return None;
    }

    let [d, e, f] = solve3(m, rhs)?;
    let (a, b) = (-d / 2.0, -e / 2.0);
    let r_sq = a * a + b * b - f;
    if !r_sq.is_finite() || r_sq <= 0.0 {
        return None;
    }
    Some(((ox + a) as f32, (oy + b) as f32, r_sq.sqrt() as f32))
}

/// Cramer's rule for a 3x3 system
fn solve3(m: [[f64; 3]; 3], rhs: [f64; 3]) -> Option<[f64; 3]> {
    let det = |m: &[[f64; 3]; 3]| {
        m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
            - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
            + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
    };
    let base = det(&m);
    if !base.is_normal() {
        return None;
    }
    let mut out = [0f64; 3];
    for (col, slot) in out.iter_mut().enumerate() {
        let mut replaced = m;
        for row in 0..3 {
            replaced[row][col] = rhs[row];
        }
        *slot = det(&replaced) / base;
    }
    Some(out)
}
