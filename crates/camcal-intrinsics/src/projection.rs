use camcal_core::{CameraMatrix, Distortion, Pose};
use nalgebra::{Point2, Point3, Rotation3};

/// Project one board point into the image.
#[inline]
pub(crate) fn project_with(
    rot: &Rotation3<f64>,
    pose: &Pose,
    camera: &CameraMatrix,
    distortion: &Distortion,
    p: &Point3<f64>,
) -> Point2<f64> {
    let pc = rot * p.coords + pose.tvec;
    let x = pc.x / pc.z;
    let y = pc.y / pc.z;
    let (xd, yd) = distortion.distort(x, y);
    camera.to_pixel(xd, yd)
}

/// Project board points through a posed, distorted pinhole camera.
///
/// Points on or behind the camera plane come out non-finite or mirrored;
/// callers feeding residuals to the solver rely on that to reject bad steps.
pub fn project_points(
    object: &[Point3<f64>],
    pose: &Pose,
    camera: &CameraMatrix,
    distortion: &Distortion,
) -> Vec<Point2<f64>> {
    let rot = pose.rotation();
    object
        .iter()
        .map(|p| project_with(&rot, pose, camera, distortion, p))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    #[test]
    fn principal_axis_point_lands_on_principal_point() {
        let camera = CameraMatrix::new(800.0, 780.0, 320.0, 240.0);
        let pose = Pose::new(Vector3::zeros(), Vector3::new(0.0, 0.0, 2.0));
        let dist = Distortion {
            k1: -0.3,
            ..Distortion::default()
        };
        let px = project_points(&[Point3::origin()], &pose, &camera, &dist);
        assert_relative_eq!(px[0], Point2::new(320.0, 240.0), epsilon = 1e-12);
    }

    #[test]
    fn matches_manual_pinhole_projection() {
        let camera = CameraMatrix::new(500.0, 500.0, 100.0, 50.0);
        let pose = Pose::new(Vector3::new(0.0, 0.0, 0.1), Vector3::new(0.1, -0.2, 4.0));
        let dist = Distortion {
            k1: 0.05,
            p1: 0.001,
            ..Distortion::default()
        };
        let p = Point3::new(0.3, 0.2, 0.0);
        let pc = pose.transform(&p);
        let (xd, yd) = dist.distort(pc.x / pc.z, pc.y / pc.z);
        let expected = Point2::new(500.0 * xd + 100.0, 500.0 * yd + 50.0);
        let px = project_points(&[p], &pose, &camera, &dist);
        assert_relative_eq!(px[0], expected, epsilon = 1e-10);
    }
}
