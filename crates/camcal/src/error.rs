use camcal_core::ImageSize;
use camcal_intrinsics::{CalibError, IoError};
use std::path::PathBuf;

/// Errors produced by the batch pipeline.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "image")]
    #[error(transparent)]
    Image(#[from] ::image::ImageError),

    #[error(transparent)]
    Calibration(#[from] CalibError),

    #[error(transparent)]
    CalibrationFile(#[from] IoError),

    #[error("no images found in {0}")]
    NoImages(PathBuf),

    #[error("calibration impossible: no pattern detected in any image")]
    NoDetections,

    #[error("{path}: image is {found:?}, expected {expected:?}")]
    SizeMismatch {
        path: PathBuf,
        expected: ImageSize,
        found: ImageSize,
    },

    #[error("detections are {found:?} but the calibration was made for {calibrated:?}")]
    CalibrationSizeMismatch {
        calibrated: ImageSize,
        found: ImageSize,
    },

    #[error("no image could be corrected ({failed} failed)")]
    NothingCorrected { failed: usize },

    #[error("invalid square size {0}")]
    InvalidSquareSize(f64),
}
