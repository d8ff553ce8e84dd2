//! Camera calibration from chessboard images.
//!
//! This crate provides:
//! - re-exports of the `camcal-*` crates,
//! - (feature `image`) image-level chessboard detection built on the
//!   `chess-corners` ChESS detector, and batch helpers that detect, calibrate
//!   and undistort whole directories of images,
//! - (feature `cli`) the `camcal` command-line tool.
//!
//! ## Quickstart
//!
//! ```no_run
//! use camcal::{calibrate_detections, pipeline};
//! use camcal::chessboard::ChessboardParams;
//! use camcal::core::PatternSize;
//! use camcal::intrinsics::{CalibrationFlags, SolverOptions};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let images = pipeline::list_images(Path::new("images"), &["jpg".to_string()])?;
//! let chess = camcal::detect::default_chess_config();
//! let set = pipeline::detect_batch(&images, PatternSize::new(7, 6), &ChessboardParams::default(), &chess, true)?;
//! let calib = calibrate_detections(&set, 0.025, &CalibrationFlags::default(), &SolverOptions::default())?;
//! calib.write_json("calibration.json")?;
//! let summary = pipeline::correct_images(
//!     &images,
//!     &calib,
//!     Path::new("corrected_images"),
//!     &pipeline::CorrectionOptions::default(),
//! )?;
//! println!("corrected {} of {} images", summary.written.len(), images.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `camcal::core`: camera model, pattern geometry, homographies, image views.
//! - `camcal::chessboard`: chessboard grid assembly from ChESS corners.
//! - `camcal::intrinsics`: calibration, reprojection error, undistortion, JSON files.
//! - `camcal::detect` (feature `image`): end-to-end corner detection on `image::GrayImage`.
//! - `camcal::pipeline` (feature `image`): directory-level detection and undistortion.

pub use camcal_chessboard as chessboard;
pub use camcal_core as core;
pub use camcal_intrinsics as intrinsics;

pub use camcal_chessboard::{ChessboardDetection, ChessboardParams};
pub use camcal_core::{CameraMatrix, Distortion, ImageSize, PatternSize, Pose};
pub use camcal_intrinsics::{CalibrationFile, ReprojectionReport};

mod config;
mod dataset;
mod error;

pub use config::PipelineConfig;
pub use dataset::{
    calibrate_detections, estimate_image_poses, evaluate_detections, DetectionSet, ImageDetection,
    ImagePose,
};
pub use error::PipelineError;

#[cfg(feature = "image")]
pub mod detect;
#[cfg(feature = "image")]
pub mod draw;
#[cfg(feature = "image")]
pub mod pipeline;
