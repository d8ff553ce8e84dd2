//! Core types and utilities for camera calibration.
//!
//! This crate is intentionally small and purely geometric. It does *not*
//! depend on any concrete corner detector or image type: images are passed
//! around as borrowed row-major byte views, points as `nalgebra` types.
//!
//! - [`CameraMatrix`], [`Distortion`] and [`Pose`] describe the pinhole camera
//!   with the five-coefficient Brown–Conrady lens model (OpenCV order
//!   `k1, k2, p1, p2, k3`).
//! - [`PatternSize`] and [`object_points`] describe the planar chessboard.
//! - [`Homography`] provides a normalized DLT used for planar initialization.

mod camera;
mod corner;
mod homography;
mod image;
mod logger;
mod pattern;

pub use camera::{CameraMatrix, Distortion, Pose};
pub use corner::Corner;
pub use homography::{estimate_homography, Homography};
pub use image::{sample_bilinear, GrayImage, GrayImageView, ImageSize, InterleavedImage};
pub use pattern::{object_points, PatternSize};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::{default_directives, init_with_level};
