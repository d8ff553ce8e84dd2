//! Closed-form starting point for calibration from plane homographies.

use camcal_core::{CameraMatrix, Homography, Pose};
use nalgebra::{Matrix2, Matrix3, Point2, Vector2, Vector3};

/// Focal lengths from the orthogonality of the board axes, with the
/// principal point held at `principal`.
///
/// Each homography yields two linear constraints on `(1/fx², 1/fy²)`: the
/// images of the board x and y axes are orthogonal, and so are their
/// diagonals. With `aspect_ratio = Some(r)`, `fx = r·fy` and a single unknown
/// remains.
pub(crate) fn init_focal(
    homographies: &[Homography],
    principal: Point2<f64>,
    aspect_ratio: Option<f64>,
) -> Option<(f64, f64)> {
    let shift = Matrix3::new(
        1.0, 0.0, -principal.x, //
        0.0, 1.0, -principal.y, //
        0.0, 0.0, 1.0,
    );

    let mut rows: Vec<([f64; 2], f64)> = Vec::with_capacity(2 * homographies.len());
    for h in homographies {
        let hc = shift * h.h;
        let a = hc.column(0).into_owned();
        let b = hc.column(1).into_owned();
        let d1 = (a + b) * 0.5;
        let d2 = (a - b) * 0.5;
        for (u, v) in [(a, b), (d1, d2)] {
            let (nu, nv) = (u.norm(), v.norm());
            if nu < 1e-12 || nv < 1e-12 {
                continue;
            }
            let u = u / nu;
            let v = v / nv;
            rows.push(([u.x * v.x, u.y * v.y], -u.z * v.z));
        }
    }
    if rows.is_empty() {
        return None;
    }

    let (inv_fx2, inv_fy2) = match aspect_ratio {
        Some(ratio) => {
            let r2 = ratio * ratio;
            let (mut ata, mut atb) = (0.0, 0.0);
            for ([ax, ay], b) in &rows {
                let c = ax / r2 + ay;
                ata += c * c;
                atb += c * b;
            }
            if ata.abs() < 1e-18 {
                return None;
            }
            let inv_fy2 = atb / ata;
            (inv_fy2 / r2, inv_fy2)
        }
        None => {
            let mut ata = Matrix2::zeros();
            let mut atb = Vector2::zeros();
            for ([ax, ay], b) in &rows {
                let a = Vector2::new(*ax, *ay);
                ata += a * a.transpose();
                atb += a * *b;
            }
            let f = ata.try_inverse()? * atb;
            (f.x, f.y)
        }
    };

    // Signs can flip on noisy, nearly fronto-parallel views.
    let fx = (1.0 / inv_fx2.abs()).sqrt();
    let fy = (1.0 / inv_fy2.abs()).sqrt();
    (fx.is_finite() && fy.is_finite() && fx > 0.0 && fy > 0.0).then_some((fx, fy))
}

/// Board pose from a plane homography `H ~ K [r1 r2 t]`.
///
/// `k_inv` is the inverse camera matrix (identity when `H` maps to normalized
/// coordinates). The rotation is projected onto SO(3) and the board is put in
/// front of the camera.
pub(crate) fn pose_from_homography(k_inv: &Matrix3<f64>, h: &Homography) -> Option<Pose> {
    let m = k_inv * h.h;
    let m1: Vector3<f64> = m.column(0).into_owned();
    let m2: Vector3<f64> = m.column(1).into_owned();
    let m3: Vector3<f64> = m.column(2).into_owned();

    let norm = 0.5 * (m1.norm() + m2.norm());
    if norm < 1e-12 {
        return None;
    }
    let mut lambda = 1.0 / norm;
    if m3.z * lambda < 0.0 {
        lambda = -lambda;
    }

    let r1 = m1 * lambda;
    let r2 = m2 * lambda;
    let r3 = r1.cross(&r2);
    let t = m3 * lambda;

    let r = Matrix3::from_columns(&[r1, r2, r3]);
    let svd = r.svd(true, true);
    let (u, v_t) = (svd.u?, svd.v_t?);
    let mut rot = u * v_t;
    if rot.determinant() < 0.0 {
        let mut u = u;
        u.column_mut(2).neg_mut();
        rot = u * v_t;
    }

    let pose = Pose::from_rotation_matrix(&rot, t);
    pose.is_finite().then_some(pose)
}

/// Camera matrix with the given focal lengths and principal point.
pub(crate) fn camera_from(fx: f64, fy: f64, principal: Point2<f64>) -> CameraMatrix {
    CameraMatrix::new(fx, fy, principal.x, principal.y)
}
