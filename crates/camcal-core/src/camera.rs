use nalgebra::{Matrix3, Point2, Point3, Rotation3, Vector3};
use serde::{Deserialize, Serialize};

/// Pinhole intrinsics.
///
/// ```text
///     | fx  skew cx |
/// K = |  0   fy  cy |
///     |  0    0   1 |
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraMatrix {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    #[serde(default)]
    pub skew: f64,
}

impl CameraMatrix {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self {
            fx,
            fy,
            cx,
            cy,
            skew: 0.0,
        }
    }

    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.fx, self.skew, self.cx, //
            0.0, self.fy, self.cy, //
            0.0, 0.0, 1.0,
        )
    }

    /// Read intrinsics from a 3×3 matrix, normalizing by `K[2][2]`.
    pub fn from_matrix(k: &Matrix3<f64>) -> Option<Self> {
        let s = k[(2, 2)];
        if s.abs() < 1e-12 {
            return None;
        }
        let k = k / s;
        Some(Self {
            fx: k[(0, 0)],
            fy: k[(1, 1)],
            cx: k[(0, 2)],
            cy: k[(1, 2)],
            skew: k[(0, 1)],
        })
    }

    pub fn to_array(&self) -> [[f64; 3]; 3] {
        [
            [self.fx, self.skew, self.cx],
            [0.0, self.fy, self.cy],
            [0.0, 0.0, 1.0],
        ]
    }

    pub fn from_array(rows: [[f64; 3]; 3]) -> Option<Self> {
        Self::from_matrix(&Matrix3::from_row_slice(&[
            rows[0][0], rows[0][1], rows[0][2], rows[1][0], rows[1][1], rows[1][2], rows[2][0],
            rows[2][1], rows[2][2],
        ]))
    }

    /// Normalized image coordinates -> pixels.
    #[inline]
    pub fn to_pixel(&self, x: f64, y: f64) -> Point2<f64> {
        Point2::new(self.fx * x + self.skew * y + self.cx, self.fy * y + self.cy)
    }

    /// Pixels -> normalized image coordinates.
    #[inline]
    pub fn to_normalized(&self, p: Point2<f64>) -> (f64, f64) {
        let y = (p.y - self.cy) / self.fy;
        let x = (p.x - self.cx - self.skew * y) / self.fx;
        (x, y)
    }

    /// Finite values and non-degenerate focal lengths.
    pub fn is_valid(&self) -> bool {
        [self.fx, self.fy, self.cx, self.cy, self.skew]
            .iter()
            .all(|v| v.is_finite())
            && self.fx.abs() > 1e-12
            && self.fy.abs() > 1e-12
    }
}

/// Brown–Conrady lens distortion with OpenCV's five coefficients.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Distortion {
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
    pub k3: f64,
}

impl Distortion {
    pub fn none() -> Self {
        Self::default()
    }

    /// `[k1, k2, p1, p2, k3]`, the order OpenCV uses for `distCoeffs`.
    pub fn to_array(&self) -> [f64; 5] {
        [self.k1, self.k2, self.p1, self.p2, self.k3]
    }

    pub fn from_array(c: [f64; 5]) -> Self {
        Self {
            k1: c[0],
            k2: c[1],
            p1: c[2],
            p2: c[3],
            k3: c[4],
        }
    }

    pub fn is_zero(&self) -> bool {
        self.to_array().iter().all(|c| *c == 0.0)
    }

    pub fn is_finite(&self) -> bool {
        self.to_array().iter().all(|c| c.is_finite())
    }

    /// Apply the distortion model to ideal normalized coordinates.
    #[inline]
    pub fn distort(&self, x: f64, y: f64) -> (f64, f64) {
        let r2 = x * x + y * y;
        let radial = 1.0 + r2 * (self.k1 + r2 * (self.k2 + r2 * self.k3));
        let xy2 = 2.0 * x * y;
        let xd = x * radial + self.p1 * xy2 + self.p2 * (r2 + 2.0 * x * x);
        let yd = y * radial + self.p1 * (r2 + 2.0 * y * y) + self.p2 * xy2;
        (xd, yd)
    }

    /// Invert [`Distortion::distort`] by fixed-point iteration.
    ///
    /// Returns the input unchanged when the model folds over at this radius.
    pub fn undistort(&self, xd: f64, yd: f64) -> (f64, f64) {
        const MAX_ITERS: usize = 20;
        const EPS: f64 = 1e-14;

        if self.is_zero() {
            return (xd, yd);
        }

        let (mut x, mut y) = (xd, yd);
        for _ in 0..MAX_ITERS {
            let r2 = x * x + y * y;
            let radial = 1.0 + r2 * (self.k1 + r2 * (self.k2 + r2 * self.k3));
            if !radial.is_finite() || radial <= 0.0 {
                return (xd, yd);
            }
            let xy2 = 2.0 * x * y;
            let dx = self.p1 * xy2 + self.p2 * (r2 + 2.0 * x * x);
            let dy = self.p1 * (r2 + 2.0 * y * y) + self.p2 * xy2;
            let nx = (xd - dx) / radial;
            let ny = (yd - dy) / radial;
            let step = (nx - x).powi(2) + (ny - y).powi(2);
            x = nx;
            y = ny;
            if step < EPS * EPS {
                break;
            }
        }
        (x, y)
    }
}

/// Board-to-camera rigid transform: `X_cam = R(rvec) * X_board + tvec`.
///
/// `rvec` is a Rodrigues (axis × angle) vector, as returned by OpenCV's
/// `calibrateCamera`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub rvec: Vector3<f64>,
    pub tvec: Vector3<f64>,
}

impl Pose {
    pub fn new(rvec: Vector3<f64>, tvec: Vector3<f64>) -> Self {
        Self { rvec, tvec }
    }

    pub fn identity() -> Self {
        Self::new(Vector3::zeros(), Vector3::zeros())
    }

    /// Build from a rotation matrix; the matrix is projected onto SO(3) first.
    pub fn from_rotation_matrix(r: &Matrix3<f64>, tvec: Vector3<f64>) -> Self {
        let rot = Rotation3::from_matrix(r);
        Self::new(rot.scaled_axis(), tvec)
    }

    pub fn rotation(&self) -> Rotation3<f64> {
        Rotation3::from_scaled_axis(self.rvec)
    }

    #[inline]
    pub fn transform(&self, p: &Point3<f64>) -> Vector3<f64> {
        self.rotation() * p.coords + self.tvec
    }

    /// Camera centre in board coordinates, `-Rᵀ t`.
    pub fn camera_position(&self) -> Vector3<f64> {
        -(self.rotation().inverse() * self.tvec)
    }

    pub fn is_finite(&self) -> bool {
        self.rvec.iter().chain(self.tvec.iter()).all(|v| v.is_finite())
    }
}
