use nalgebra::Vector2;

/// Angle in `[0, π/2]` between two undirected axes given modulo π.
pub fn axis_angle(a: f32, b: f32) -> f32 {
    use std::f32::consts::PI;
    let d = (b - a).rem_euclid(PI);
    d.min(PI - d)
}

/// Whether two axes (modulo π) are perpendicular within `tolerance` radians.
pub fn is_orthogonal(a: f32, b: f32, tolerance: f32) -> bool {
    (std::f32::consts::FRAC_PI_2 - axis_angle(a, b)).abs() <= tolerance.abs()
}

/// |cos| of the angle between two vectors; 0 when either is degenerate.
pub fn abs_cos(a: &Vector2<f32>, b: &Vector2<f32>) -> f32 {
    let na = a.norm();
    let nb = b.norm();
    if na <= f32::EPSILON || nb <= f32::EPSILON {
        return 0.0;
    }
    (a.dot(b) / (na * nb)).abs()
}

/// z-component of the 2D cross product.
pub fn cross(a: &Vector2<f32>, b: &Vector2<f32>) -> f32 {
    a.x * b.y - a.y * b.x
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::{FRAC_PI_2, FRAC_PI_4, PI};

    #[test]
    fn orthogonality_respects_modulo_pi() {
        let tol = 1e-3;
        assert!(is_orthogonal(0.0, FRAC_PI_2, tol));
        assert!(is_orthogonal(FRAC_PI_4, 3.0 * FRAC_PI_4, tol));
        // 45° and -45° + π describe orthogonal axes as well.
        assert!(is_orthogonal(FRAC_PI_4, -FRAC_PI_4 + PI, tol));
        assert!(!is_orthogonal(0.0, 0.25, 0.05));
        assert!(!is_orthogonal(0.1, PI + 0.1, 0.05));
    }

    #[test]
    fn axis_angle_folds_into_quarter_turn() {
        assert!(axis_angle(0.1, PI + 0.1) < 1e-5);
        assert!((axis_angle(0.0, 3.0 * FRAC_PI_4) - FRAC_PI_4).abs() < 1e-5);
        assert!((axis_angle(-0.2, 0.3) - 0.5).abs() < 1e-5);
    }

    #[test]
    fn abs_cos_and_cross() {
        let x = Vector2::new(2.0, 0.0);
        let y = Vector2::new(0.0, 3.0);
        assert!(abs_cos(&x, &y) < 1e-6);
        assert!((abs_cos(&x, &-x) - 1.0).abs() < 1e-6);
        assert!(cross(&x, &y) > 0.0);
        assert!(cross(&y, &x) < 0.0);
    }
}
