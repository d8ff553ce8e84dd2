//! JSON persistence of calibration results.

use crate::calibrate::Calibration;
use crate::reprojection::ReprojectionReport;
use camcal_core::{CameraMatrix, Distortion, ImageSize, PatternSize, Pose};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

pub const CALIBRATION_FILE_VERSION: u32 = 1;

#[derive(thiserror::Error, Debug)]
pub enum IoError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("unsupported calibration file version {0}")]
    UnsupportedVersion(u32),
    #[error("invalid calibration file: {0}")]
    Invalid(String),
}

/// Board pose of one calibration image.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ViewPose {
    pub name: String,
    pub rvec: [f64; 3],
    pub tvec: [f64; 3],
}

impl ViewPose {
    pub fn new(name: impl Into<String>, pose: &Pose) -> Self {
        Self {
            name: name.into(),
            rvec: pose.rvec.into(),
            tvec: pose.tvec.into(),
        }
    }

    pub fn pose(&self) -> Pose {
        Pose::new(Vector3::from(self.rvec), Vector3::from(self.tvec))
    }
}

/// Everything needed to undistort images from one camera, plus how well the
/// calibration fit its data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationFile {
    pub version: u32,
    pub image_size: ImageSize,
    pub pattern: PatternSize,
    /// Chessboard square side in board units.
    pub square_size: f64,
    /// 3×3 row-major intrinsic matrix.
    pub camera_matrix: [[f64; 3]; 3],
    /// `[k1, k2, p1, p2, k3]`.
    pub dist_coeffs: [f64; 5],
    pub rms: f64,
    #[serde(default)]
    pub report: Option<ReprojectionReport>,
    #[serde(default)]
    pub views: Vec<ViewPose>,
}

impl CalibrationFile {
    /// Package a calibration. `names` label the views in input order.
    pub fn from_calibration<S: AsRef<str>>(
        calibration: &Calibration,
        image_size: ImageSize,
        pattern: PatternSize,
        square_size: f64,
        names: &[S],
        report: Option<ReprojectionReport>,
    ) -> Self {
        let views = calibration
            .poses
            .iter()
            .enumerate()
            .map(|(i, pose)| {
                let name = names
                    .get(i)
                    .map(|s| s.as_ref().to_string())
                    .unwrap_or_else(|| format!("view_{i}"));
                ViewPose::new(name, pose)
            })
            .collect();
        Self {
            version: CALIBRATION_FILE_VERSION,
            image_size,
            pattern,
            square_size,
            camera_matrix: calibration.camera.to_array(),
            dist_coeffs: calibration.distortion.to_array(),
            rms: calibration.rms,
            report,
            views,
        }
    }

    pub fn camera(&self) -> Result<CameraMatrix, IoError> {
        let k = self.camera_matrix;
        if k[1][0] != 0.0 || k[2][0] != 0.0 || k[2][1] != 0.0 {
            return Err(IoError::Invalid(
                "camera matrix must be upper triangular".into(),
            ));
        }
        let camera = CameraMatrix::from_array(k)
            .ok_or_else(|| IoError::Invalid("camera matrix has K[2][2] = 0".into()))?;
        if !camera.is_valid() || camera.fx <= 0.0 || camera.fy <= 0.0 {
            return Err(IoError::Invalid(format!(
                "focal lengths must be positive and finite (fx {}, fy {})",
                camera.fx, camera.fy
            )));
        }
        Ok(camera)
    }

    pub fn distortion(&self) -> Result<Distortion, IoError> {
        let d = Distortion::from_array(self.dist_coeffs);
        if !d.is_finite() {
            return Err(IoError::Invalid("non-finite distortion coefficient".into()));
        }
        Ok(d)
    }

    /// Check version and numeric sanity.
    pub fn validate(&self) -> Result<(), IoError> {
        if self.version != CALIBRATION_FILE_VERSION {
            return Err(IoError::UnsupportedVersion(self.version));
        }
        if self.image_size.is_empty() {
            return Err(IoError::Invalid("empty image size".into()));
        }
        self.camera()?;
        self.distortion()?;
        if !self.rms.is_finite() || self.rms < 0.0 {
            return Err(IoError::Invalid(format!("bad rms {}", self.rms)));
        }
        Ok(())
    }

    /// Load and validate a calibration file.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, IoError> {
        let raw = fs::read_to_string(path)?;
        let file: Self = serde_json::from_str(&raw)?;
        file.validate()?;
        Ok(file)
    }

    /// Write this calibration to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), IoError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CalibrationFile {
        let calibration = Calibration {
            camera: CameraMatrix::new(812.5, 809.0, 321.0, 238.5),
            distortion: Distortion {
                k1: -0.21,
                k2: 0.07,
                p1: 0.001,
                p2: -0.002,
                k3: 0.0,
            },
            poses: vec![Pose::new(Vector3::new(0.1, 0.2, 0.3), Vector3::new(0.0, 0.0, 0.5))],
            rms: 0.21,
            iterations: 12,
            converged: true,
        };
        CalibrationFile::from_calibration(
            &calibration,
            ImageSize::new(640, 480),
            PatternSize::new(7, 6),
            0.025,
            &["left01.jpg"],
            None,
        )
    }

    #[test]
    fn write_then_load_keeps_parameters() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("calibration.json");
        let file = sample();
        file.write_json(&path).expect("write");
        let back = CalibrationFile::load_json(&path).expect("load");
        assert_eq!(back, file);
        assert_eq!(back.camera().expect("camera").fx, 812.5);
        assert_eq!(back.views[0].name, "left01.jpg");
        assert_eq!(back.views[0].pose().tvec.z, 0.5);
    }

    #[test]
    fn rejects_broken_files() {
        let mut file = sample();
        file.camera_matrix[0][0] = -1.0;
        assert!(matches!(file.validate(), Err(IoError::Invalid(_))));

        let mut file = sample();
        file.version = 7;
        assert!(matches!(file.validate(), Err(IoError::UnsupportedVersion(7))));

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ \"version\": 1 }").expect("write");
        assert!(matches!(
            CalibrationFile::load_json(&path),
            Err(IoError::Json(_))
        ));
    }

    #[test]
    fn missing_views_default_to_empty() {
        let mut value = serde_json::to_value(sample()).expect("to value");
        let obj = value.as_object_mut().expect("object");
        obj.remove("views");
        obj.remove("report");
        let file: CalibrationFile = serde_json::from_value(value).expect("parse");
        assert!(file.views.is_empty());
        assert!(file.report.is_none());
    }
}
