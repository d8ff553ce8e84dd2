//! Detection overlays written to disk for visual inspection.

use camcal_core::{CameraMatrix, Distortion, PatternSize, Pose};
use camcal_intrinsics::project_points;
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use nalgebra::{Point2, Point3, Vector2};

/// One color per board row, cycled.
const ROW_COLORS: [[u8; 3]; 7] = [
    [255, 0, 0],
    [255, 128, 0],
    [200, 200, 0],
    [0, 255, 0],
    [0, 200, 200],
    [0, 0, 255],
    [255, 0, 255],
];

const MISSING_COLOR: [u8; 3] = [255, 0, 0];

/// Board axes: x red, y green, z blue.
const AXIS_COLORS: [[u8; 3]; 3] = [[255, 0, 0], [0, 255, 0], [0, 0, 255]];
const ORIGIN_COLOR: [u8; 3] = [255, 255, 0];

/// Comparison images are scaled down so both halves fit this width.
pub const COMPARE_MAX_WIDTH: u32 = 800;
const ORIGINAL_TAG: [u8; 3] = [255, 0, 0];
const CORRECTED_TAG: [u8; 3] = [0, 255, 0];

#[inline]
fn put(img: &mut RgbImage, x: i64, y: i64, color: [u8; 3]) {
    if x >= 0 && y >= 0 && x < img.width() as i64 && y < img.height() as i64 {
        img.put_pixel(x as u32, y as u32, Rgb(color));
    }
}

fn draw_line(img: &mut RgbImage, a: Point2<f32>, b: Point2<f32>, color: [u8; 3]) {
    let steps = (b - a).abs().max().ceil().max(1.0) as usize;
    for s in 0..=steps {
        let t = s as f32 / steps as f32;
        let p = a + (b - a) * t;
        put(img, p.x.round() as i64, p.y.round() as i64, color);
    }
}

fn draw_circle(img: &mut RgbImage, c: Point2<f32>, radius: f32, color: [u8; 3]) {
    let n = ((radius * 8.0).ceil() as usize).max(8);
    for k in 0..n {
        let a = k as f32 / n as f32 * std::f32::consts::TAU;
        let x = c.x + radius * a.cos();
        let y = c.y + radius * a.sin();
        put(img, x.round() as i64, y.round() as i64, color);
    }
}

fn draw_thick_line(img: &mut RgbImage, a: Point2<f32>, b: Point2<f32>, color: [u8; 3]) {
    for dy in -1..=1 {
        for dx in -1..=1 {
            let d = Vector2::new(dx as f32, dy as f32);
            draw_line(img, a + d, b + d, color);
        }
    }
}

/// Draw the board frame of `pose`: three axes of `length` board units from
/// the first corner, with z pointing out of the board towards the camera.
///
/// Returns `false` when the origin projects outside the image.
pub fn draw_axes(
    img: &mut RgbImage,
    pose: &Pose,
    camera: &CameraMatrix,
    distortion: &Distortion,
    length: f64,
) -> bool {
    let frame = [
        Point3::origin(),
        Point3::new(length, 0.0, 0.0),
        Point3::new(0.0, length, 0.0),
        Point3::new(0.0, 0.0, -length),
    ];
    let px: Vec<Point2<f32>> = project_points(&frame, pose, camera, distortion)
        .iter()
        .map(|p| Point2::new(p.x as f32, p.y as f32))
        .collect();
    if px.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
        return false;
    }
    for (end, color) in px[1..].iter().zip(AXIS_COLORS) {
        draw_thick_line(img, px[0], *end, color);
    }
    draw_circle(img, px[0], 5.0, ORIGIN_COLOR);
    let o = px[0];
    o.x >= 0.0 && o.y >= 0.0 && o.x < img.width() as f32 && o.y < img.height() as f32
}

/// `original` and `corrected` next to each other, with a red strip over
/// the original and a green one over the corrected half.
///
/// The corrected image is resized to the original's size first, so a
/// cropped correction reads as a zoom. Inputs wider than
/// [`COMPARE_MAX_WIDTH`] are scaled so the pair fits that width.
pub fn side_by_side(original: &RgbImage, corrected: &RgbImage) -> RgbImage {
    let (w, h) = original.dimensions();
    let corrected = if corrected.dimensions() == (w, h) {
        corrected.clone()
    } else {
        imageops::resize(corrected, w, h, FilterType::Triangle)
    };
    let (left, right) = if w > COMPARE_MAX_WIDTH {
        let scale = COMPARE_MAX_WIDTH as f64 / (2 * w) as f64;
        let sw = ((w as f64 * scale).round() as u32).max(1);
        let sh = ((h as f64 * scale).round() as u32).max(1);
        (
            imageops::resize(original, sw, sh, FilterType::Triangle),
            imageops::resize(&corrected, sw, sh, FilterType::Triangle),
        )
    } else {
        (original.clone(), corrected)
    };

    let (pw, ph) = left.dimensions();
    let mut out = RgbImage::new(2 * pw, ph);
    imageops::replace(&mut out, &left, 0, 0);
    imageops::replace(&mut out, &right, pw as i64, 0);
    let strip = (ph / 40).max(2).min(ph);
    for y in 0..strip {
        for x in 0..pw {
            out.put_pixel(x, y, Rgb(ORIGINAL_TAG));
            out.put_pixel(pw + x, y, Rgb(CORRECTED_TAG));
        }
    }
    out
}

/// Draw detected corners the way OpenCV's `drawChessboardCorners` does.
///
/// A complete detection (`found`) is drawn with one color per board row and
/// a polyline through the corners in order; otherwise each corner gets a red
/// circle.
pub fn draw_chessboard_corners(
    img: &mut RgbImage,
    corners: &[Point2<f32>],
    pattern: PatternSize,
    found: bool,
) {
    let radius = 4.0;
    let cols = pattern.cols.max(1) as usize;
    let complete = found && corners.len() == pattern.corner_count();

    let mut prev: Option<Point2<f32>> = None;
    for (k, &p) in corners.iter().enumerate() {
        let color = if complete {
            ROW_COLORS[(k / cols) % ROW_COLORS.len()]
        } else {
            MISSING_COLOR
        };
        if complete {
            if let Some(q) = prev {
                draw_line(img, q, p, color);
            }
            let d = radius * std::f32::consts::FRAC_1_SQRT_2;
            draw_line(img, p - Vector2::new(d, d), p + Vector2::new(d, d), color);
            draw_line(img, p + Vector2::new(-d, d), p + Vector2::new(d, -d), color);
        }
        draw_circle(img, p, radius, color);
        prev = Some(p);
    }
}
