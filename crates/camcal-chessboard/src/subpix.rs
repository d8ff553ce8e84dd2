use crate::params::SubpixParams;
use camcal_core::{sample_bilinear, GrayImageView};
use nalgebra::{Matrix2, Point2, Vector2};

/// Refine corner positions to sub-pixel accuracy in place.
///
/// Every pixel `q` of the window around the estimate `c` contributes the
/// constraint `∇I(q) · (q - c) = 0`: at a saddle, the gradient along an edge
/// is perpendicular to the edge direction. The Gaussian-weighted normal
/// equations are re-solved around each new estimate. A corner that drifts
/// further than the window radius from its start keeps its original position.
pub fn refine_corners_subpix(
    view: &GrayImageView<'_>,
    corners: &mut [Point2<f32>],
    params: &SubpixParams,
) {
    let r = params.window_radius.max(1) as i32;
    let sigma = r as f32 / 2.0;
    let inv_two_sigma2 = 1.0 / (2.0 * sigma * sigma);
    let eps2 = params.eps * params.eps;

    // Gaussian window, row-major over [-r, r]².
    let side = (2 * r + 1) as usize;
    let mut weights = Vec::with_capacity(side * side);
    for dy in -r..=r {
        for dx in -r..=r {
            weights.push((-((dx * dx + dy * dy) as f32) * inv_two_sigma2).exp());
        }
    }

    for corner in corners.iter_mut() {
        let start = *corner;
        let mut c = start;

        for _ in 0..params.max_iters.max(1) {
            let mut a = Matrix2::<f32>::zeros();
            let mut b = Vector2::<f32>::zeros();

            let mut k = 0;
            for dy in -r..=r {
                for dx in -r..=r {
                    let w = weights[k];
                    k += 1;
                    let qx = c.x + dx as f32;
                    let qy = c.y + dy as f32;
                    let gx = 0.5
                        * (sample_bilinear(view, qx + 1.0, qy) - sample_bilinear(view, qx - 1.0, qy));
                    let gy = 0.5
                        * (sample_bilinear(view, qx, qy + 1.0) - sample_bilinear(view, qx, qy - 1.0));

                    let gxx = w * gx * gx;
                    let gxy = w * gx * gy;
                    let gyy = w * gy * gy;
                    a[(0, 0)] += gxx;
                    a[(0, 1)] += gxy;
                    a[(1, 0)] += gxy;
                    a[(1, 1)] += gyy;
                    b.x += gxx * qx + gxy * qy;
                    b.y += gxy * qx + gyy * qy;
                }
            }

            let Some(inv) = a.try_inverse() else {
                break;
            };
            let next = inv * b;
            let next = Point2::new(next.x, next.y);
            let step2 = (next - c).norm_squared();
            c = next;
            if step2 <= eps2 {
                break;
            }
        }

        let drift = c - start;
        if c.x.is_finite() && c.y.is_finite() && drift.x.abs() <= r as f32 && drift.y.abs() <= r as f32
        {
            *corner = c;
        }
    }
}
