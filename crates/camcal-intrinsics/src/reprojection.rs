use crate::calibrate::{validate_view, view_homography, CalibrationView};
use crate::error::CalibError;
use crate::init::pose_from_homography;
use crate::projection::{project_points, project_with};
use crate::solver::{levenberg_marquardt, LeastSquares, SolverOptions};
use camcal_core::{CameraMatrix, Distortion, Pose};
use log::debug;
use nalgebra::{DVector, Matrix3, Point2, Point3, Vector3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Reprojection error of one view.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ViewError {
    /// `sqrt(Σ‖e‖² / n)`.
    pub rms: f64,
    /// `‖e‖₂ / n` with all residuals stacked in one vector.
    pub l2_per_point: f64,
    /// Largest single-point distance.
    pub max: f64,
    pub num_points: usize,
}

/// Mean error below which a calibration is considered ideal, in pixels.
pub const IDEAL_MEAN_ERROR: f64 = 0.5;
/// Mean error above which a calibration is considered poor, in pixels.
pub const POOR_MEAN_ERROR: f64 = 1.0;
/// Views recommended for a stable calibration.
pub const RECOMMENDED_VIEWS: usize = 10;
/// Spread of the per-view errors that hints at inconsistent views.
const INCONSISTENT_STD: f64 = 0.5;

/// Verdict on a calibration, from its mean per-view error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Assessment {
    /// Mean error up to [`IDEAL_MEAN_ERROR`].
    Ideal,
    /// Usable but could be improved.
    Acceptable,
    /// Mean error above [`POOR_MEAN_ERROR`].
    Poor,
}

impl std::fmt::Display for Assessment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Assessment::Ideal => "ideal",
            Assessment::Acceptable => "acceptable, could be improved",
            Assessment::Poor => "poor",
        })
    }
}

/// Reprojection error over a set of views.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReprojectionReport {
    pub views: Vec<ViewError>,
    /// `sqrt(Σ‖e‖² / N)` over all points of all views.
    pub rms: f64,
    /// Mean of the per-view `l2_per_point` values.
    pub mean_error: f64,
    /// Population standard deviation of the per-view `l2_per_point`
    /// values; 0 for a single view.
    #[serde(default)]
    pub std_error: f64,
    /// Largest per-view `l2_per_point`.
    #[serde(default)]
    pub max_view_error: f64,
}

impl ReprojectionReport {
    /// Reproject every view with its pose and compare with the observations.
    pub fn compute(
        views: &[CalibrationView],
        poses: &[Pose],
        camera: &CameraMatrix,
        distortion: &Distortion,
    ) -> Result<Self, CalibError> {
        if views.is_empty() {
            return Err(CalibError::NoViews);
        }
        if views.len() != poses.len() {
            return Err(CalibError::PoseCountMismatch(poses.len(), views.len()));
        }
        for (i, v) in views.iter().enumerate() {
            if v.object.len() != v.image.len() {
                return Err(CalibError::PointCountMismatch {
                    view: i,
                    object: v.object.len(),
                    image: v.image.len(),
                });
            }
        }

        let per_view: Vec<(ViewError, f64)> = views
            .par_iter()
            .zip(poses.par_iter())
            .map(|(view, pose)| {
                let projected = project_points(&view.object, pose, camera, distortion);
                let mut sq_sum = 0.0;
                let mut max: f64 = 0.0;
                for (p, o) in projected.iter().zip(&view.image) {
                    let d2 = (p - o).norm_squared();
                    sq_sum += d2;
                    max = max.max(d2.sqrt());
                }
                let n = view.object.len().max(1) as f64;
                let err = ViewError {
                    rms: (sq_sum / n).sqrt(),
                    l2_per_point: sq_sum.sqrt() / n,
                    max,
                    num_points: view.object.len(),
                };
                (err, sq_sum)
            })
            .collect();

        let total_points: usize = per_view.iter().map(|(e, _)| e.num_points).sum();
        let total_sq: f64 = per_view.iter().map(|(_, s)| s).sum();
        let n_views = per_view.len() as f64;
        let mean_error = per_view.iter().map(|(e, _)| e.l2_per_point).sum::<f64>() / n_views;
        let std_error = if per_view.len() > 1 {
            (per_view
                .iter()
                .map(|(e, _)| (e.l2_per_point - mean_error).powi(2))
                .sum::<f64>()
                / n_views)
                .sqrt()
        } else {
            0.0
        };
        let max_view_error = per_view
            .iter()
            .map(|(e, _)| e.l2_per_point)
            .fold(0.0, f64::max);
        let rms = (total_sq / total_points.max(1) as f64).sqrt();

        Ok(Self {
            views: per_view.into_iter().map(|(e, _)| e).collect(),
            rms,
            mean_error,
            std_error,
            max_view_error,
        })
    }

    pub fn assessment(&self) -> Assessment {
        if self.mean_error <= IDEAL_MEAN_ERROR {
            Assessment::Ideal
        } else if self.mean_error <= POOR_MEAN_ERROR {
            Assessment::Acceptable
        } else {
            Assessment::Poor
        }
    }

    /// What to try when the calibration is [`Assessment::Poor`]; empty
    /// otherwise.
    pub fn suggestions(&self) -> Vec<&'static str> {
        if self.assessment() != Assessment::Poor {
            return Vec::new();
        }
        let mut out = Vec::new();
        if self.views.len() < RECOMMENDED_VIEWS {
            out.push("add more images (at least 10 are recommended)");
        }
        if self.std_error > INCONSISTENT_STD {
            out.push("check that the images are consistent (viewing angles, lighting)");
        }
        out.push("check the corner detection in every image");
        out.push("use a sharper or better lit target");
        out
    }

    /// Quality gate: fail when the overall RMS exceeds `max_rms` pixels.
    pub fn check(&self, max_rms: f64) -> Result<(), CalibError> {
        if self.rms.is_finite() && self.rms <= max_rms {
            Ok(())
        } else {
            Err(CalibError::QualityGate {
                rms: self.rms,
                max_rms,
            })
        }
    }

    /// Index and error of the worst view by RMS.
    pub fn worst_view(&self) -> Option<(usize, &ViewError)> {
        self.views
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.rms.total_cmp(&b.1.rms))
    }
}

struct PoseProblem<'a> {
    object: &'a [Point3<f64>],
    image: &'a [Point2<f64>],
    camera: &'a CameraMatrix,
    distortion: &'a Distortion,
}

impl LeastSquares for PoseProblem<'_> {
    fn residuals(&self, x: &DVector<f64>) -> DVector<f64> {
        let pose = Pose::new(Vector3::new(x[0], x[1], x[2]), Vector3::new(x[3], x[4], x[5]));
        let rot = pose.rotation();
        let mut r = DVector::zeros(2 * self.object.len());
        for (k, (obj, img)) in self.object.iter().zip(self.image).enumerate() {
            let p = project_with(&rot, &pose, self.camera, self.distortion, obj);
            r[2 * k] = p.x - img.x;
            r[2 * k + 1] = p.y - img.y;
        }
        r
    }
}

/// Board pose of one view under a known calibration (OpenCV's
/// `solvePnP` for a planar target).
///
/// The observations are undistorted to normalized coordinates for a
/// homography-based start, then the pose alone is refined on pixel residuals.
pub fn estimate_view_pose(
    object: &[Point3<f64>],
    image: &[Point2<f64>],
    camera: &CameraMatrix,
    distortion: &Distortion,
) -> Result<Pose, CalibError> {
    let normalized: Vec<Point2<f64>> = image
        .iter()
        .map(|&p| {
            let (xd, yd) = camera.to_normalized(p);
            let (x, y) = distortion.undistort(xd, yd);
            Point2::new(x, y)
        })
        .collect();
    let view = CalibrationView::new(object.to_vec(), normalized);
    validate_view(0, &view)?;

    let h = view_homography(&view)
        .ok_or_else(|| CalibError::DegenerateInit("no homography".into()))?;
    let pose0 = pose_from_homography(&Matrix3::identity(), &h)
        .ok_or_else(|| CalibError::DegenerateInit("no pose".into()))?;

    let problem = PoseProblem {
        object,
        image,
        camera,
        distortion,
    };
    let x0 = DVector::from_iterator(6, pose0.rvec.iter().chain(pose0.tvec.iter()).copied());
    let outcome = levenberg_marquardt(&problem, x0, &[true; 6], &SolverOptions::default());
    let x = outcome.x;
    let pose = Pose::new(Vector3::new(x[0], x[1], x[2]), Vector3::new(x[3], x[4], x[5]));
    if !pose.is_finite() {
        return Err(CalibError::NonFinite);
    }
    debug!(
        "pose refined in {} iterations, residual {:.3e}",
        outcome.iterations, outcome.cost
    );
    Ok(pose)
}
