use crate::error::CalibError;
use crate::init::{camera_from, init_focal, pose_from_homography};
use crate::projection::project_with;
use crate::reprojection::ReprojectionReport;
use crate::solver::{diff_step, levenberg_marquardt, LeastSquares, SolverOptions};
use camcal_core::{estimate_homography, CameraMatrix, Distortion, Homography, ImageSize, Pose};
use log::{debug, info, warn};
use nalgebra::{DMatrix, DVector, Point2, Point3, Vector3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

const NUM_INTRINSICS: usize = 9;
const POSE_PARAMS: usize = 6;

/// Board points and their detected image positions for one image.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationView {
    /// Board-frame points, all with `z = 0`.
    pub object: Vec<Point3<f64>>,
    /// Pixel observations, same length and order as `object`.
    pub image: Vec<Point2<f64>>,
}

impl CalibrationView {
    pub fn new(object: Vec<Point3<f64>>, image: Vec<Point2<f64>>) -> Self {
        Self { object, image }
    }
}

/// Which parameters the solver keeps fixed. Mirrors OpenCV's
/// `CALIB_FIX_PRINCIPAL_POINT`, `CALIB_FIX_ASPECT_RATIO`,
/// `CALIB_ZERO_TANGENT_DIST` and `CALIB_FIX_K1..K3`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationFlags {
    /// Keep the principal point at the image centre.
    pub fix_principal_point: bool,
    /// Enforce `fx = ratio · fy`.
    pub fix_aspect_ratio: Option<f64>,
    /// Force `p1 = p2 = 0`.
    pub zero_tangent_dist: bool,
    pub fix_k1: bool,
    pub fix_k2: bool,
    pub fix_k3: bool,
}

impl CalibrationFlags {
    fn free_intrinsics(&self) -> [bool; NUM_INTRINSICS] {
        [
            self.fix_aspect_ratio.is_none(),
            true,
            !self.fix_principal_point,
            !self.fix_principal_point,
            !self.fix_k1,
            !self.fix_k2,
            !self.zero_tangent_dist,
            !self.zero_tangent_dist,
            !self.fix_k3,
        ]
    }
}

/// Result of [`calibrate_camera`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub camera: CameraMatrix,
    pub distortion: Distortion,
    /// One board pose per input view.
    pub poses: Vec<Pose>,
    /// `sqrt(Σ‖observed − projected‖² / N)` over all points, the figure
    /// OpenCV's `calibrateCamera` returns.
    pub rms: f64,
    pub iterations: usize,
    pub converged: bool,
}

impl Calibration {
    /// Per-view reprojection error for the views this calibration came from.
    pub fn report(&self, views: &[CalibrationView]) -> Result<ReprojectionReport, CalibError> {
        ReprojectionReport::compute(views, &self.poses, &self.camera, &self.distortion)
    }
}

pub(crate) fn validate_view(view_idx: usize, view: &CalibrationView) -> Result<(), CalibError> {
    if view.object.len() != view.image.len() {
        return Err(CalibError::PointCountMismatch {
            view: view_idx,
            object: view.object.len(),
            image: view.image.len(),
        });
    }
    if view.object.len() < 4 {
        return Err(CalibError::TooFewPoints {
            view: view_idx,
            found: view.object.len(),
        });
    }
    if view.object.iter().any(|p| p.z.abs() > 1e-9) {
        return Err(CalibError::NonPlanarObject { view: view_idx });
    }
    Ok(())
}

/// Homography board plane -> image for one validated view.
pub(crate) fn view_homography(view: &CalibrationView) -> Option<Homography> {
    let src: Vec<Point2<f64>> = view.object.iter().map(|p| Point2::new(p.x, p.y)).collect();
    estimate_homography(&src, &view.image)
}

struct CalibrationProblem<'a> {
    views: &'a [CalibrationView],
    aspect_ratio: Option<f64>,
    row_offsets: Vec<usize>,
    num_residuals: usize,
}

impl<'a> CalibrationProblem<'a> {
    fn new(views: &'a [CalibrationView], aspect_ratio: Option<f64>) -> Self {
        let mut row_offsets = Vec::with_capacity(views.len());
        let mut rows = 0;
        for v in views {
            row_offsets.push(rows);
            rows += 2 * v.object.len();
        }
        Self {
            views,
            aspect_ratio,
            row_offsets,
            num_residuals: rows,
        }
    }

    fn intrinsics(&self, x: &DVector<f64>) -> (CameraMatrix, Distortion) {
        let fy = x[1];
        let fx = match self.aspect_ratio {
            Some(ratio) => ratio * fy,
            None => x[0],
        };
        let camera = CameraMatrix::new(fx, fy, x[2], x[3]);
        let distortion = Distortion::from_array([x[4], x[5], x[6], x[7], x[8]]);
        (camera, distortion)
    }

    fn pose(x: &DVector<f64>, view: usize) -> Pose {
        let o = NUM_INTRINSICS + POSE_PARAMS * view;
        Pose::new(
            Vector3::new(x[o], x[o + 1], x[o + 2]),
            Vector3::new(x[o + 3], x[o + 4], x[o + 5]),
        )
    }

    fn view_residuals(
        &self,
        view: usize,
        camera: &CameraMatrix,
        distortion: &Distortion,
        pose: &Pose,
        out: &mut [f64],
    ) {
        let v = &self.views[view];
        let rot = pose.rotation();
        for (k, (obj, img)) in v.object.iter().zip(&v.image).enumerate() {
            let p = project_with(&rot, pose, camera, distortion, obj);
            out[2 * k] = p.x - img.x;
            out[2 * k + 1] = p.y - img.y;
        }
    }
}

impl LeastSquares for CalibrationProblem<'_> {
    fn residuals(&self, x: &DVector<f64>) -> DVector<f64> {
        let (camera, distortion) = self.intrinsics(x);
        let mut r = DVector::zeros(self.num_residuals);
        for view in 0..self.views.len() {
            let start = self.row_offsets[view];
            let len = 2 * self.views[view].object.len();
            let pose = Self::pose(x, view);
            self.view_residuals(
                view,
                &camera,
                &distortion,
                &pose,
                &mut r.as_mut_slice()[start..start + len],
            );
        }
        r
    }

    /// Intrinsic columns are dense; each view's pose only touches that view's
    /// rows, so its 6 columns are differentiated on the view alone.
    fn jacobian(&self, x: &DVector<f64>, free: &[bool]) -> DMatrix<f64> {
        let mut jac = DMatrix::zeros(self.num_residuals, x.len());

        let mut xp = x.clone();
        for j in 0..NUM_INTRINSICS {
            if !free[j] {
                continue;
            }
            let h = diff_step(x[j]);
            xp[j] = x[j] + h;
            let rp = self.residuals(&xp);
            xp[j] = x[j] - h;
            let rm = self.residuals(&xp);
            xp[j] = x[j];
            jac.set_column(j, &((rp - rm) / (2.0 * h)));
        }

        let (camera, distortion) = self.intrinsics(x);
        let blocks: Vec<DMatrix<f64>> = (0..self.views.len())
            .into_par_iter()
            .map(|view| {
                let rows = 2 * self.views[view].object.len();
                let mut block = DMatrix::zeros(rows, POSE_PARAMS);
                let mut plus = vec![0.0; rows];
                let mut minus = vec![0.0; rows];
                let base = Self::pose(x, view);
                for k in 0..POSE_PARAMS {
                    let mut params = [
                        base.rvec.x,
                        base.rvec.y,
                        base.rvec.z,
                        base.tvec.x,
                        base.tvec.y,
                        base.tvec.z,
                    ];
                    let h = diff_step(params[k]);
                    let v0 = params[k];
                    params[k] = v0 + h;
                    let pose_p = pose_from_params(&params);
                    params[k] = v0 - h;
                    let pose_m = pose_from_params(&params);
                    self.view_residuals(view, &camera, &distortion, &pose_p, &mut plus);
                    self.view_residuals(view, &camera, &distortion, &pose_m, &mut minus);
                    for r in 0..rows {
                        block[(r, k)] = (plus[r] - minus[r]) / (2.0 * h);
                    }
                }
                block
            })
            .collect();

        for (view, block) in blocks.into_iter().enumerate() {
            let row = self.row_offsets[view];
            let col = NUM_INTRINSICS + POSE_PARAMS * view;
            jac.view_mut((row, col), (block.nrows(), POSE_PARAMS))
                .copy_from(&block);
        }
        jac
    }
}

fn pose_from_params(p: &[f64; POSE_PARAMS]) -> Pose {
    Pose::new(Vector3::new(p[0], p[1], p[2]), Vector3::new(p[3], p[4], p[5]))
}

/// Estimate intrinsics, distortion and per-view board poses from planar
/// views.
///
/// Initialization fixes the principal point at the image centre and solves
/// the focal lengths in closed form from the view homographies, then poses
/// from `K⁻¹H`. Levenberg-Marquardt refines everything jointly on the
/// pixel reprojection residuals.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip(views, flags, options), fields(num_views = views.len()))
)]
pub fn calibrate_camera(
    views: &[CalibrationView],
    image_size: ImageSize,
    flags: &CalibrationFlags,
    options: &SolverOptions,
) -> Result<Calibration, CalibError> {
    if views.is_empty() {
        return Err(CalibError::NoViews);
    }
    if image_size.is_empty() {
        return Err(CalibError::EmptyImage {
            width: image_size.width,
            height: image_size.height,
        });
    }
    for (i, view) in views.iter().enumerate() {
        validate_view(i, view)?;
    }
    if let Some(ratio) = flags.fix_aspect_ratio {
        if !(ratio.is_finite() && ratio > 0.0) {
            return Err(CalibError::DegenerateInit(format!(
                "aspect ratio {ratio} must be positive"
            )));
        }
    }

    let principal = Point2::new(
        (image_size.width as f64 - 1.0) * 0.5,
        (image_size.height as f64 - 1.0) * 0.5,
    );

    let homographies = views
        .iter()
        .enumerate()
        .map(|(i, v)| {
            view_homography(v)
                .ok_or_else(|| CalibError::DegenerateInit(format!("view {i}: no homography")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let (fx, fy) = match init_focal(&homographies, principal, flags.fix_aspect_ratio) {
        Some(f) => f,
        None => {
            let f = image_size.width.max(image_size.height) as f64;
            warn!("focal length initialization failed, starting from {f:.1}px");
            let ratio = flags.fix_aspect_ratio.unwrap_or(1.0);
            (ratio * f, f)
        }
    };
    let camera0 = camera_from(fx, fy, principal);
    debug!("initial intrinsics: fx {fx:.2} fy {fy:.2} cx {:.2} cy {:.2}", principal.x, principal.y);

    let k_inv = camera0
        .matrix()
        .try_inverse()
        .ok_or_else(|| CalibError::DegenerateInit("singular camera matrix".into()))?;
    let poses0 = homographies
        .iter()
        .enumerate()
        .map(|(i, h)| {
            pose_from_homography(&k_inv, h)
                .ok_or_else(|| CalibError::DegenerateInit(format!("view {i}: no pose")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let n_params = NUM_INTRINSICS + POSE_PARAMS * views.len();
    let mut x0 = DVector::zeros(n_params);
    x0[0] = camera0.fx;
    x0[1] = camera0.fy;
    x0[2] = camera0.cx;
    x0[3] = camera0.cy;
    for (v, pose) in poses0.iter().enumerate() {
        let o = NUM_INTRINSICS + POSE_PARAMS * v;
        x0.rows_mut(o, 3).copy_from(&pose.rvec);
        x0.rows_mut(o + 3, 3).copy_from(&pose.tvec);
    }

    let mut free = vec![true; n_params];
    free[..NUM_INTRINSICS].copy_from_slice(&flags.free_intrinsics());

    let problem = CalibrationProblem::new(views, flags.fix_aspect_ratio);
    let outcome = levenberg_marquardt(&problem, x0, &free, options);

    let (camera, distortion) = problem.intrinsics(&outcome.x);
    let poses: Vec<Pose> = (0..views.len())
        .map(|v| CalibrationProblem::pose(&outcome.x, v))
        .collect();
    if !camera.is_valid() || !distortion.is_finite() || poses.iter().any(|p| !p.is_finite()) {
        return Err(CalibError::NonFinite);
    }

    let total_points: usize = views.iter().map(|v| v.object.len()).sum();
    let rms = (outcome.cost / total_points as f64).sqrt();
    if !rms.is_finite() {
        return Err(CalibError::NonFinite);
    }

    info!(
        "calibrated {} views: rms {:.4}px after {} iterations{}",
        views.len(),
        rms,
        outcome.iterations,
        if outcome.converged { "" } else { " (not converged)" }
    );

    Ok(Calibration {
        camera,
        distortion,
        poses,
        rms,
        iterations: outcome.iterations,
        converged: outcome.converged,
    })
}
