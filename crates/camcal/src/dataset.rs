//! Detected corners of an image batch and their calibration.

use crate::error::PipelineError;
use camcal_core::{object_points, CameraMatrix, Distortion, ImageSize, PatternSize, Pose};
use camcal_intrinsics::{
    calibrate_camera, estimate_view_pose, CalibrationFile, CalibrationFlags, CalibrationView,
    ReprojectionReport, SolverOptions,
};
use log::{debug, info};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

/// Ordered chessboard corners found in one image.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImageDetection {
    /// File name of the image.
    pub name: String,
    /// `pattern.cols * pattern.rows` pixels, row-major.
    pub corners: Vec<Point2<f32>>,
}

/// Corners detected across a batch of images of one camera.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionSet {
    pub pattern: PatternSize,
    pub image_size: ImageSize,
    pub detections: Vec<ImageDetection>,
    /// Images in which no board was found.
    #[serde(default)]
    pub rejected: Vec<String>,
}

impl DetectionSet {
    pub fn new(pattern: PatternSize, image_size: ImageSize) -> Self {
        Self {
            pattern,
            image_size,
            detections: Vec::new(),
            rejected: Vec::new(),
        }
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), PipelineError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Pair every detection with the board's object points.
    pub fn calibration_views(&self, square_size: f64) -> Vec<CalibrationView> {
        let object = object_points(self.pattern, square_size);
        self.detections
            .iter()
            .map(|d| {
                let image = d
                    .corners
                    .iter()
                    .map(|p| Point2::new(p.x as f64, p.y as f64))
                    .collect();
                CalibrationView::new(object.clone(), image)
            })
            .collect()
    }
}

/// Board pose in one image under a known calibration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImagePose {
    pub name: String,
    /// Board-to-camera transform.
    pub pose: Pose,
    /// Camera centre in board units, `-Rᵀ t`.
    pub camera_position: [f64; 3],
    /// Row-major rotation matrix of `pose`.
    pub rotation: [[f64; 3]; 3],
}

impl ImagePose {
    fn new(name: &str, pose: Pose) -> Self {
        let r = pose.rotation();
        let m = r.matrix();
        let c = pose.camera_position();
        Self {
            name: name.to_string(),
            pose,
            camera_position: [c.x, c.y, c.z],
            rotation: [
                [m[(0, 0)], m[(0, 1)], m[(0, 2)]],
                [m[(1, 0)], m[(1, 1)], m[(1, 2)]],
                [m[(2, 0)], m[(2, 1)], m[(2, 2)]],
            ],
        }
    }
}

/// Calibrate from a detection set and package the result with its
/// per-view reprojection report.
pub fn calibrate_detections(
    set: &DetectionSet,
    square_size: f64,
    flags: &CalibrationFlags,
    options: &SolverOptions,
) -> Result<CalibrationFile, PipelineError> {
    if !(square_size.is_finite() && square_size > 0.0) {
        return Err(PipelineError::InvalidSquareSize(square_size));
    }
    if set.detections.is_empty() {
        return Err(PipelineError::NoDetections);
    }

    let views = set.calibration_views(square_size);
    let calibration = calibrate_camera(&views, set.image_size, flags, options)?;
    let report = calibration.report(&views)?;
    info!(
        "reprojection: rms {:.4}px, mean error {:.5}",
        report.rms, report.mean_error
    );
    if let Some((idx, worst)) = report.worst_view() {
        info!(
            "worst view {} ({}): rms {:.4}px",
            idx, set.detections[idx].name, worst.rms
        );
    }

    let names: Vec<&str> = set.detections.iter().map(|d| d.name.as_str()).collect();
    Ok(CalibrationFile::from_calibration(
        &calibration,
        set.image_size,
        set.pattern,
        square_size,
        &names,
        Some(report),
    ))
}

/// Reprojection error of a detection set under an existing calibration.
///
/// Each view's board pose is estimated with the stored intrinsics, so the
/// detections need not be the ones the calibration was computed from.
pub fn evaluate_detections(
    set: &DetectionSet,
    calibration: &CalibrationFile,
) -> Result<ReprojectionReport, PipelineError> {
    let (views, poses, camera, distortion) = view_poses(set, calibration)?;
    Ok(ReprojectionReport::compute(
        &views,
        &poses,
        &camera,
        &distortion,
    )?)
}

/// Board pose of every detection under an existing calibration.
pub fn estimate_image_poses(
    set: &DetectionSet,
    calibration: &CalibrationFile,
) -> Result<Vec<ImagePose>, PipelineError> {
    let (_, poses, _, _) = view_poses(set, calibration)?;
    Ok(set
        .detections
        .iter()
        .zip(poses)
        .map(|(d, pose)| {
            let pose = ImagePose::new(&d.name, pose);
            let c = pose.camera_position;
            debug!(
                "{}: camera at ({:.3}, {:.3}, {:.3})",
                pose.name, c[0], c[1], c[2]
            );
            pose
        })
        .collect())
}

type ViewPoses = (Vec<CalibrationView>, Vec<Pose>, CameraMatrix, Distortion);

fn view_poses(set: &DetectionSet, calibration: &CalibrationFile) -> Result<ViewPoses, PipelineError> {
    if set.detections.is_empty() {
        return Err(PipelineError::NoDetections);
    }
    if set.image_size != calibration.image_size {
        return Err(PipelineError::CalibrationSizeMismatch {
            calibrated: calibration.image_size,
            found: set.image_size,
        });
    }
    let camera = calibration.camera()?;
    let distortion = calibration.distortion()?;
    let views = set.calibration_views(calibration.square_size);
    let poses = views
        .iter()
        .map(|v| estimate_view_pose(&v.object, &v.image, &camera, &distortion))
        .collect::<Result<Vec<_>, _>>()?;
    Ok((views, poses, camera, distortion))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_set_cannot_be_calibrated() {
        let set = DetectionSet::new(PatternSize::default(), ImageSize::new(640, 480));
        let res = calibrate_detections(
            &set,
            0.025,
            &CalibrationFlags::default(),
            &SolverOptions::default(),
        );
        assert!(matches!(res, Err(PipelineError::NoDetections)));
        let res = calibrate_detections(
            &set,
            -1.0,
            &CalibrationFlags::default(),
            &SolverOptions::default(),
        );
        assert!(matches!(res, Err(PipelineError::InvalidSquareSize(_))));
    }

    fn calibration_for(image_size: ImageSize) -> CalibrationFile {
        let json = format!(
            r#"{{
                "version": {},
                "image_size": {{ "width": {}, "height": {} }},
                "pattern": {{ "cols": 3, "rows": 2 }},
                "square_size": 1.0,
                "camera_matrix": [[500.0, 0.0, 50.0], [0.0, 500.0, 50.0], [0.0, 0.0, 1.0]],
                "dist_coeffs": [0.0, 0.0, 0.0, 0.0, 0.0],
                "rms": 0.1,
                "views": []
            }}"#,
            camcal_intrinsics::CALIBRATION_FILE_VERSION,
            image_size.width,
            image_size.height
        );
        serde_json::from_str(&json).expect("calibration json")
    }

    fn board_at(z: f64, camera: &CameraMatrix) -> ImageDetection {
        let pose = Pose::new(nalgebra::Vector3::zeros(), nalgebra::Vector3::new(-1.0, -0.5, z));
        let object = object_points(PatternSize::new(3, 2), 1.0);
        let corners = camcal_intrinsics::project_points(&object, &pose, camera, &Distortion::default())
            .iter()
            .map(|p| Point2::new(p.x as f32, p.y as f32))
            .collect();
        ImageDetection {
            name: format!("z{z}.png"),
            corners,
        }
    }

    #[test]
    fn size_mismatch_names_both_sizes() {
        let calib = calibration_for(ImageSize::new(100, 100));
        let camera = calib.camera().expect("camera");
        let mut set = DetectionSet::new(PatternSize::new(3, 2), ImageSize::new(640, 480));
        set.detections.push(board_at(10.0, &camera));

        let err = evaluate_detections(&set, &calib).expect_err("size mismatch");
        assert!(matches!(
            err,
            PipelineError::CalibrationSizeMismatch { calibrated, found }
                if calibrated == ImageSize::new(100, 100) && found == ImageSize::new(640, 480)
        ));
        let msg = err.to_string();
        assert!(msg.contains("640") && msg.contains("100"), "{msg}");
        assert!(estimate_image_poses(&set, &calib).is_err());
    }

    #[test]
    fn poses_locate_the_camera_in_board_coordinates() {
        let calib = calibration_for(ImageSize::new(100, 100));
        let camera = calib.camera().expect("camera");
        let mut set = DetectionSet::new(PatternSize::new(3, 2), ImageSize::new(100, 100));
        set.detections.push(board_at(10.0, &camera));
        set.detections.push(board_at(20.0, &camera));

        let poses = estimate_image_poses(&set, &calib).expect("poses");
        assert_eq!(poses.len(), 2);
        assert_eq!(poses[1].name, "z20.png");
        for (p, z) in poses.iter().zip([10.0, 20.0]) {
            let c = p.camera_position;
            assert!((c[0] - 1.0).abs() < 1e-3, "{c:?}");
            assert!((c[1] - 0.5).abs() < 1e-3, "{c:?}");
            assert!((c[2] + z).abs() < 1e-3, "{c:?}");
            assert!((p.rotation[0][0] - 1.0).abs() < 1e-6);
            assert!((p.rotation[2][2] - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn views_follow_pattern_order() {
        let mut set = DetectionSet::new(PatternSize::new(3, 2), ImageSize::new(100, 100));
        set.detections.push(ImageDetection {
            name: "a.png".into(),
            corners: (0..6)
                .map(|k| Point2::new((k % 3) as f32 * 10.0, (k / 3) as f32 * 10.0))
                .collect(),
        });
        let views = set.calibration_views(2.0);
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].object[4].x, 2.0);
        assert_eq!(views[0].object[4].y, 2.0);
        assert_eq!(views[0].image[4], Point2::new(10.0, 10.0));
    }
}
