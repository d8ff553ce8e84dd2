#![allow(dead_code)]

use camcal::core::{object_points, CameraMatrix, Distortion, ImageSize, PatternSize, Pose};
use camcal::intrinsics::project_points;
use camcal::{DetectionSet, ImageDetection};
use image::{GrayImage, Luma};
use nalgebra::{Point2, Point3, Vector3};
use std::path::{Path, PathBuf};

pub const PATTERN: PatternSize = PatternSize { cols: 7, rows: 5 };
pub const SQUARE: f64 = 0.03;
pub const SIZE: ImageSize = ImageSize {
    width: 640,
    height: 480,
};

pub fn truth() -> (CameraMatrix, Distortion) {
    (
        CameraMatrix::new(600.0, 600.0, 319.5, 239.5),
        Distortion {
            k1: -0.08,
            ..Distortion::none()
        },
    )
}

/// Pose with rotation `rvec` that puts the board centre at `centre` in the
/// camera frame.
fn pose_at(rvec: Vector3<f64>, centre: Vector3<f64>) -> Pose {
    let mid = Point3::new(
        (PATTERN.cols - 1) as f64 * SQUARE / 2.0,
        (PATTERN.rows - 1) as f64 * SQUARE / 2.0,
        0.0,
    );
    let pose = Pose::new(rvec, Vector3::zeros());
    Pose::new(rvec, centre - pose.transform(&mid))
}

pub fn poses() -> Vec<Pose> {
    vec![
        pose_at(Vector3::new(0.3, -0.1, 0.0), Vector3::new(0.0, 0.0, 0.55)),
        pose_at(Vector3::new(-0.3, 0.2, 0.05), Vector3::new(0.02, -0.01, 0.6)),
        pose_at(Vector3::new(0.1, 0.35, -0.1), Vector3::new(-0.02, 0.01, 0.55)),
        pose_at(Vector3::new(-0.25, -0.3, 0.1), Vector3::new(0.01, 0.02, 0.6)),
        pose_at(Vector3::new(0.05, 0.05, 0.4), Vector3::new(0.0, 0.0, 0.5)),
        pose_at(Vector3::new(0.35, 0.3, 0.0), Vector3::new(-0.01, 0.0, 0.65)),
    ]
}

/// Gray level of board point `(u, v)` given in squares.
fn shade(u: f64, v: f64) -> f64 {
    let (cols, rows) = (PATTERN.cols as f64, PATTERN.rows as f64);
    if u >= -1.0 && u < cols && v >= -1.0 && v < rows {
        if (u.floor() as i64 + v.floor() as i64).rem_euclid(2) == 0 {
            25.0
        } else {
            230.0
        }
    } else if u >= -2.0 && u < cols + 1.0 && v >= -2.0 && v < rows + 1.0 {
        230.0
    } else {
        110.0
    }
}

/// Ray-trace the board through the distorted camera with 2x2 supersampling.
pub fn render_board(pose: &Pose) -> GrayImage {
    let (camera, dist) = truth();
    let rot_t = pose.rotation().inverse();
    let t_board = rot_t * pose.tvec;
    let offsets = [-0.25, 0.25];

    GrayImage::from_fn(SIZE.width, SIZE.height, |x, y| {
        let mut acc = 0.0;
        for dy in offsets {
            for dx in offsets {
                let (xd, yd) = camera.to_normalized(Point2::new(x as f64 + dx, y as f64 + dy));
                let (xn, yn) = dist.undistort(xd, yd);
                let ray = rot_t * Vector3::new(xn, yn, 1.0);
                let value = if ray.z.abs() < 1e-12 {
                    110.0
                } else {
                    let lambda = t_board.z / ray.z;
                    if lambda <= 0.0 {
                        110.0
                    } else {
                        let p = ray * lambda - t_board;
                        shade(p.x / SQUARE, p.y / SQUARE)
                    }
                };
                acc += value;
            }
        }
        Luma([(acc / 4.0).round() as u8])
    })
}

/// Render every pose into `dir` as `view_NN.png`.
pub fn write_board_images(dir: &Path) -> Vec<PathBuf> {
    poses()
        .iter()
        .enumerate()
        .map(|(k, pose)| {
            let path = dir.join(format!("view_{k:02}.png"));
            render_board(pose).save(&path).expect("save png");
            path
        })
        .collect()
}

/// Deterministic pseudo-noise in [-amp, amp].
pub fn jitter(seed: usize, amp: f64) -> f64 {
    let x = ((seed as f64 * 12.9898).sin() * 43758.5453).rem_euclid(1.0);
    (x * 2.0 - 1.0) * amp
}

/// Detections obtained by projecting the board, with optional pixel noise.
pub fn projected_detections(noise: f64) -> DetectionSet {
    let (camera, dist) = truth();
    let board = object_points(PATTERN, SQUARE);
    let mut set = DetectionSet::new(PATTERN, SIZE);
    for (v, pose) in poses().iter().enumerate() {
        let corners = project_points(&board, pose, &camera, &dist)
            .into_iter()
            .enumerate()
            .map(|(k, p)| {
                let s = 1000 * v + 2 * k;
                Point2::new(
                    (p.x + jitter(s, noise)) as f32,
                    (p.y + jitter(s + 1, noise)) as f32,
                )
            })
            .collect();
        set.detections.push(ImageDetection {
            name: format!("view_{v:02}.png"),
            corners,
        });
    }
    set
}
