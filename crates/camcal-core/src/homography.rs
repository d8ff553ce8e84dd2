use nalgebra::{DMatrix, Matrix3, Point2, Vector3};

/// Plane-to-plane projective map, `dst ~ H * src`, scaled so `h33 = 1`.
///
/// In calibration the source plane is the board (`z = 0` object points) and
/// the destination is the image, so `H ~ K [r1 r2 t]`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Homography {
    pub h: Matrix3<f64>,
}

impl Homography {
    pub fn new(h: Matrix3<f64>) -> Self {
        Self { h }
    }

    #[inline]
    pub fn apply(&self, p: Point2<f64>) -> Point2<f64> {
        let v = self.h * Vector3::new(p.x, p.y, 1.0);
        Point2::new(v.x / v.z, v.y / v.z)
    }

    pub fn inverse(&self) -> Option<Self> {
        self.h.try_inverse().map(Self::new)
    }

    /// Column `i` of `H`.
    pub fn column(&self, i: usize) -> Vector3<f64> {
        self.h.column(i).into_owned()
    }

    /// RMS distance between `H * src` and `dst`.
    pub fn transfer_rms(&self, src: &[Point2<f64>], dst: &[Point2<f64>]) -> f64 {
        if src.is_empty() {
            return 0.0;
        }
        let sum: f64 = src
            .iter()
            .zip(dst)
            .map(|(&s, d)| (self.apply(s) - d).norm_squared())
            .sum();
        (sum / src.len() as f64).sqrt()
    }
}

/// Similarity moving the centroid to the origin with mean distance `sqrt(2)`.
fn conditioning(points: &[Point2<f64>]) -> Matrix3<f64> {
    let n = points.len() as f64;
    let centroid = points
        .iter()
        .fold(Vector3::zeros(), |acc: Vector3<f64>, p| {
            acc + Vector3::new(p.x, p.y, 0.0)
        })
        / n;
    let spread = points
        .iter()
        .map(|p| ((p.x - centroid.x).powi(2) + (p.y - centroid.y).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    let s = if spread > 1e-12 {
        std::f64::consts::SQRT_2 / spread
    } else {
        1.0
    };
    Matrix3::new(
        s,
        0.0,
        -s * centroid.x,
        0.0,
        s,
        -s * centroid.y,
        0.0,
        0.0,
        1.0,
    )
}

#[inline]
fn transform(t: &Matrix3<f64>, p: Point2<f64>) -> Point2<f64> {
    let v = t * Vector3::new(p.x, p.y, 1.0);
    Point2::new(v.x, v.y)
}

/// Estimate H such that `dst ~ H * src` from four or more correspondences
/// by the conditioned direct linear transform.
///
/// Returns `None` for mismatched inputs, fewer than four points, or a
/// degenerate configuration (e.g. collinear points) where the null space of
/// the DLT system is not one-dimensional.
pub fn estimate_homography(src: &[Point2<f64>], dst: &[Point2<f64>]) -> Option<Homography> {
    const RANK_TOL: f64 = 1e-10;

    if src.len() != dst.len() || src.len() < 4 {
        return None;
    }

    let t_src = conditioning(src);
    let t_dst = conditioning(dst);

    // Pad to at least 9 rows so the SVD keeps the full right basis.
    let rows = (2 * src.len()).max(9);
    let mut a = DMatrix::<f64>::zeros(rows, 9);
    for (k, (&s, &d)) in src.iter().zip(dst).enumerate() {
        let p = transform(&t_src, s);
        let q = transform(&t_dst, d);
        let r = 2 * k;
        a[(r, 0)] = p.x;
        a[(r, 1)] = p.y;
        a[(r, 2)] = 1.0;
        a[(r, 6)] = -q.x * p.x;
        a[(r, 7)] = -q.x * p.y;
        a[(r, 8)] = -q.x;
        a[(r + 1, 3)] = p.x;
        a[(r + 1, 4)] = p.y;
        a[(r + 1, 5)] = 1.0;
        a[(r + 1, 6)] = -q.y * p.x;
        a[(r + 1, 7)] = -q.y * p.y;
        a[(r + 1, 8)] = -q.y;
    }

    let svd = a.svd(false, true);
    let v_t = svd.v_t?;
    let mut order: Vec<usize> = (0..svd.singular_values.len()).collect();
    order.sort_by(|&i, &j| svd.singular_values[i].total_cmp(&svd.singular_values[j]));
    let largest = svd.singular_values[order[order.len() - 1]];
    if svd.singular_values[order[1]] <= RANK_TOL * largest {
        return None;
    }

    let h = v_t.row(order[0]);
    let hn = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);
    let full = t_dst.try_inverse()? * hn * t_src;
    let scale = full[(2, 2)];
    if scale.abs() < 1e-12 {
        return None;
    }
    let full = full / scale;
    full.iter()
        .all(|v| v.is_finite())
        .then(|| Homography::new(full))
}
