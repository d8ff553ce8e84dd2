//! Planar camera calibration.
//!
//! Given chessboard views (board points with `z = 0` and their detected
//! pixels), [`calibrate_camera`] estimates the pinhole intrinsics and the
//! five Brown–Conrady distortion coefficients by Levenberg-Marquardt on the
//! reprojection residuals. The result can be checked with
//! [`ReprojectionReport`], stored as a [`CalibrationFile`] and applied to
//! images through an [`UndistortMap`].
//!
//! ```
//! use camcal_core::{object_points, CameraMatrix, Distortion, ImageSize, PatternSize, Pose};
//! use camcal_intrinsics::{
//!     calibrate_camera, project_points, CalibrationFlags, CalibrationView, SolverOptions,
//! };
//! use nalgebra::Vector3;
//!
//! let truth = CameraMatrix::new(800.0, 800.0, 319.5, 239.5);
//! let board = object_points(PatternSize::new(7, 6), 0.03);
//! let views: Vec<CalibrationView> = [
//!     Pose::new(Vector3::new(0.3, -0.2, 0.0), Vector3::new(-0.1, -0.08, 0.6)),
//!     Pose::new(Vector3::new(-0.25, 0.3, 0.1), Vector3::new(-0.08, -0.06, 0.7)),
//!     Pose::new(Vector3::new(0.1, 0.35, -0.2), Vector3::new(-0.09, -0.07, 0.65)),
//! ]
//! .iter()
//! .map(|pose| {
//!     let image = project_points(&board, pose, &truth, &Distortion::none());
//!     CalibrationView::new(board.clone(), image)
//! })
//! .collect();
//!
//! let flags = CalibrationFlags {
//!     zero_tangent_dist: true,
//!     fix_k3: true,
//!     ..Default::default()
//! };
//! let calib = calibrate_camera(&views, ImageSize::new(640, 480), &flags, &SolverOptions::default())
//!     .expect("calibration");
//! assert!(calib.rms < 1e-6);
//! assert!((calib.camera.fx - 800.0).abs() < 1e-3);
//! ```

mod calibrate;
mod error;
mod init;
mod io;
mod projection;
mod reprojection;
mod solver;
mod undistort;

pub use calibrate::{calibrate_camera, Calibration, CalibrationFlags, CalibrationView};
pub use error::CalibError;
pub use io::{CalibrationFile, IoError, ViewPose, CALIBRATION_FILE_VERSION};
pub use projection::project_points;
pub use reprojection::{
    estimate_view_pose, Assessment, ReprojectionReport, ViewError, IDEAL_MEAN_ERROR, POOR_MEAN_ERROR,
};
pub use solver::SolverOptions;
pub use undistort::{
    optimal_new_camera_matrix, undistort_image, undistort_points, Roi, UndistortMap,
};
