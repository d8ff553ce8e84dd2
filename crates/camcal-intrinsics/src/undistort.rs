//! Point and image undistortion.

use crate::error::CalibError;
use camcal_core::{CameraMatrix, Distortion, ImageSize, InterleavedImage};
use log::debug;
use nalgebra::Point2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Pixel rectangle inside an image.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roi {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Roi {
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Crop `image` to this rectangle (clipped to the image bounds).
    pub fn crop(&self, image: &InterleavedImage) -> InterleavedImage {
        image.crop(
            self.x as usize,
            self.y as usize,
            self.width as usize,
            self.height as usize,
        )
    }
}

/// Remove lens distortion from pixel observations.
///
/// The result is expressed in `new_camera` pixels, or in normalized image
/// coordinates when `new_camera` is `None`.
pub fn undistort_points(
    points: &[Point2<f64>],
    camera: &CameraMatrix,
    distortion: &Distortion,
    new_camera: Option<&CameraMatrix>,
) -> Vec<Point2<f64>> {
    points
        .iter()
        .map(|&p| {
            let (xd, yd) = camera.to_normalized(p);
            let (x, y) = distortion.undistort(xd, yd);
            match new_camera {
                Some(k) => k.to_pixel(x, y),
                None => Point2::new(x, y),
            }
        })
        .collect()
}

/// Inner and outer rectangles, in normalized coordinates, of the undistorted
/// image border sampled on a 9×9 grid.
fn undistorted_rectangles(
    camera: &CameraMatrix,
    distortion: &Distortion,
    size: ImageSize,
) -> ([f64; 4], [f64; 4]) {
    const N: usize = 9;
    let w = (size.width as f64 - 1.0).max(0.0);
    let h = (size.height as f64 - 1.0).max(0.0);

    let (mut ox0, mut oy0, mut ox1, mut oy1) = (f64::MAX, f64::MAX, f64::MIN, f64::MIN);
    let (mut ix0, mut iy0, mut ix1, mut iy1) = (f64::MIN, f64::MIN, f64::MAX, f64::MAX);
    for row in 0..N {
        for col in 0..N {
            let p = Point2::new(
                col as f64 * w / (N - 1) as f64,
                row as f64 * h / (N - 1) as f64,
            );
            let (xd, yd) = camera.to_normalized(p);
            let (x, y) = distortion.undistort(xd, yd);
            ox0 = ox0.min(x);
            ox1 = ox1.max(x);
            oy0 = oy0.min(y);
            oy1 = oy1.max(y);
            if col == 0 {
                ix0 = ix0.max(x);
            }
            if col == N - 1 {
                ix1 = ix1.min(x);
            }
            if row == 0 {
                iy0 = iy0.max(y);
            }
            if row == N - 1 {
                iy1 = iy1.min(y);
            }
        }
    }
    ([ix0, iy0, ix1, iy1], [ox0, oy0, ox1, oy1])
}

/// Camera matrix for the undistorted image, following OpenCV's
/// `getOptimalNewCameraMatrix`.
///
/// `alpha = 0` zooms so that every output pixel is valid, `alpha = 1` keeps
/// every source pixel (with black borders); values in between interpolate.
/// The returned [`Roi`] bounds the all-valid region of the output.
pub fn optimal_new_camera_matrix(
    camera: &CameraMatrix,
    distortion: &Distortion,
    image_size: ImageSize,
    alpha: f64,
    new_size: Option<ImageSize>,
) -> (CameraMatrix, Roi) {
    let alpha = alpha.clamp(0.0, 1.0);
    let new_size = new_size.unwrap_or(image_size);
    let nw = (new_size.width as f64 - 1.0).max(0.0);
    let nh = (new_size.height as f64 - 1.0).max(0.0);

    let (inner, outer) = undistorted_rectangles(camera, distortion, image_size);
    let fit = |r: [f64; 4]| {
        let fx = nw / (r[2] - r[0]);
        let fy = nh / (r[3] - r[1]);
        (fx, fy, -fx * r[0], -fy * r[1])
    };
    let (fx0, fy0, cx0, cy0) = fit(inner);
    let (fx1, fy1, cx1, cy1) = fit(outer);
    let lerp = |a: f64, b: f64| a * (1.0 - alpha) + b * alpha;
    let new_camera = CameraMatrix::new(
        lerp(fx0, fx1),
        lerp(fy0, fy1),
        lerp(cx0, cx1),
        lerp(cy0, cy1),
    );

    // Valid region: the inner rectangle seen through the new camera.
    let tl = new_camera.to_pixel(inner[0], inner[1]);
    let br = new_camera.to_pixel(inner[2], inner[3]);
    const SNAP: f64 = 1e-6;
    let x0 = (tl.x - SNAP).ceil().clamp(0.0, nw);
    let y0 = (tl.y - SNAP).ceil().clamp(0.0, nh);
    let x1 = (br.x + SNAP).floor().clamp(0.0, nw);
    let y1 = (br.y + SNAP).floor().clamp(0.0, nh);
    let roi = if x1 >= x0 && y1 >= y0 && new_camera.is_valid() {
        Roi {
            x: x0 as u32,
            y: y0 as u32,
            width: (x1 - x0) as u32 + 1,
            height: (y1 - y0) as u32 + 1,
        }
    } else {
        Roi::default()
    };

    debug!(
        "new camera (alpha {alpha}): fx {:.2} fy {:.2} cx {:.2} cy {:.2}, roi {:?}",
        new_camera.fx, new_camera.fy, new_camera.cx, new_camera.cy, roi
    );
    (new_camera, roi)
}

/// Per-pixel source coordinates for undistorting whole images.
///
/// Entry `(u, v)` holds the distorted source pixel that lands on output
/// pixel `(u, v)` of an ideal camera `new_camera`.
#[derive(Clone, Debug)]
pub struct UndistortMap {
    pub width: usize,
    pub height: usize,
    pub map_x: Vec<f32>,
    pub map_y: Vec<f32>,
}

impl UndistortMap {
    /// Build the map row by row in parallel.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(camera, distortion, new_camera))
    )]
    pub fn new(
        camera: &CameraMatrix,
        distortion: &Distortion,
        new_camera: &CameraMatrix,
        size: ImageSize,
    ) -> Self {
        let width = size.width as usize;
        let height = size.height as usize;
        let mut map_x = vec![0.0f32; width * height];
        let mut map_y = vec![0.0f32; width * height];
        if width == 0 || height == 0 {
            return Self {
                width,
                height,
                map_x,
                map_y,
            };
        }

        map_x
            .par_chunks_mut(width)
            .zip(map_y.par_chunks_mut(width))
            .enumerate()
            .for_each(|(v, (row_x, row_y))| {
                for u in 0..width {
                    let (x, y) = new_camera.to_normalized(Point2::new(u as f64, v as f64));
                    let (xd, yd) = distortion.distort(x, y);
                    let src = camera.to_pixel(xd, yd);
                    row_x[u] = src.x as f32;
                    row_y[u] = src.y as f32;
                }
            });

        Self {
            width,
            height,
            map_x,
            map_y,
        }
    }

    pub fn size(&self) -> ImageSize {
        ImageSize::new(self.width as u32, self.height as u32)
    }

    /// Resample `src` through the map: bilinear, pixels outside `src` read
    /// as zero.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip_all))]
    pub fn remap(&self, src: &InterleavedImage) -> Result<InterleavedImage, CalibError> {
        let ch = src.channels;
        if !(1..=4).contains(&ch) {
            return Err(CalibError::UnsupportedChannels(ch));
        }
        let mut out = InterleavedImage::new(self.width, self.height, ch);
        if self.width == 0 || self.height == 0 {
            return Ok(out);
        }

        out.data
            .par_chunks_mut(self.width * ch)
            .enumerate()
            .for_each(|(v, row)| {
                for u in 0..self.width {
                    let idx = v * self.width + u;
                    let px = sample_interleaved(src, self.map_x[idx], self.map_y[idx]);
                    row[u * ch..(u + 1) * ch].copy_from_slice(&px[..ch]);
                }
            });
        Ok(out)
    }
}

#[inline]
fn texel(src: &InterleavedImage, x: i64, y: i64, c: usize) -> f32 {
    if x < 0 || y < 0 || x >= src.width as i64 || y >= src.height as i64 {
        return 0.0;
    }
    src.data[(y as usize * src.width + x as usize) * src.channels + c] as f32
}

#[inline]
fn sample_interleaved(src: &InterleavedImage, x: f32, y: f32) -> [u8; 4] {
    let mut out = [0u8; 4];
    if !x.is_finite() || !y.is_finite() {
        return out;
    }
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;
    let (x0, y0) = (x0 as i64, y0 as i64);
    if x0 < -1 || y0 < -1 || x0 >= src.width as i64 || y0 >= src.height as i64 {
        return out;
    }
    for (c, o) in out.iter_mut().enumerate().take(src.channels) {
        let p00 = texel(src, x0, y0, c);
        let p10 = texel(src, x0 + 1, y0, c);
        let p01 = texel(src, x0, y0 + 1, c);
        let p11 = texel(src, x0 + 1, y0 + 1, c);
        let a = p00 + fx * (p10 - p00);
        let b = p01 + fx * (p11 - p01);
        *o = (a + fy * (b - a)).round().clamp(0.0, 255.0) as u8;
    }
    out
}

/// Undistort a whole image into `new_camera`'s view, same size as `src`.
pub fn undistort_image(
    src: &InterleavedImage,
    camera: &CameraMatrix,
    distortion: &Distortion,
    new_camera: &CameraMatrix,
) -> Result<InterleavedImage, CalibError> {
    UndistortMap::new(camera, distortion, new_camera, src.size()).remap(src)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn barrel() -> (CameraMatrix, Distortion) {
        (
            CameraMatrix::new(500.0, 500.0, 319.5, 239.5),
            Distortion {
                k1: -0.25,
                k2: 0.06,
                ..Distortion::default()
            },
        )
    }

    #[test]
    fn undistort_points_inverts_projection() {
        let (camera, dist) = barrel();
        let ideal = [(0.1, -0.2), (-0.3, 0.25), (0.0, 0.0)];
        let distorted: Vec<Point2<f64>> = ideal
            .iter()
            .map(|&(x, y)| {
                let (xd, yd) = dist.distort(x, y);
                camera.to_pixel(xd, yd)
            })
            .collect();
        let out = undistort_points(&distorted, &camera, &dist, Some(&camera));
        for (p, &(x, y)) in out.iter().zip(&ideal) {
            assert_relative_eq!(*p, camera.to_pixel(x, y), epsilon = 1e-7);
        }
        let norm = undistort_points(&distorted, &camera, &dist, None);
        assert_relative_eq!(norm[0], Point2::new(0.1, -0.2), epsilon = 1e-10);
    }

    #[test]
    fn zero_distortion_keeps_camera_at_full_alpha() {
        let camera = CameraMatrix::new(600.0, 600.0, 319.5, 239.5);
        let size = ImageSize::new(640, 480);
        let (k, roi) = optimal_new_camera_matrix(&camera, &Distortion::none(), size, 1.0, None);
        assert_relative_eq!(k.fx, 600.0, epsilon = 1e-9);
        assert_relative_eq!(k.cy, 239.5, epsilon = 1e-9);
        assert_eq!(
            roi,
            Roi {
                x: 0,
                y: 0,
                width: 640,
                height: 480
            }
        );
    }

    #[test]
    fn alpha_trades_field_of_view() {
        let (camera, dist) = barrel();
        let size = ImageSize::new(640, 480);
        let (k0, roi0) = optimal_new_camera_matrix(&camera, &dist, size, 0.0, None);
        let (k1, roi1) = optimal_new_camera_matrix(&camera, &dist, size, 1.0, None);
        // Barrel distortion: keeping every source pixel needs a wider view.
        assert!(k1.fx < k0.fx);
        assert!(roi0.width >= roi1.width);
        assert!(!roi1.is_empty());
        assert!(roi0.x + roi0.width <= 640 && roi0.y + roi0.height <= 480);
    }

    #[test]
    fn identity_map_copies_image() {
        let camera = CameraMatrix::new(100.0, 100.0, 3.5, 2.5);
        let mut src = InterleavedImage::new(8, 6, 3);
        for (i, v) in src.data.iter_mut().enumerate() {
            *v = (i * 7 % 251) as u8;
        }
        let out = undistort_image(&src, &camera, &Distortion::none(), &camera).expect("remap");
        assert_eq!(out, src);
    }

    #[test]
    fn samples_outside_source_are_black() {
        let camera = CameraMatrix::new(100.0, 100.0, 3.5, 2.5);
        let shifted = CameraMatrix::new(100.0, 100.0, 3.5 + 50.0, 2.5);
        let src = InterleavedImage {
            width: 8,
            height: 6,
            channels: 1,
            data: vec![200; 48],
        };
        let out = undistort_image(&src, &camera, &Distortion::none(), &shifted).expect("remap");
        assert!(out.data.iter().all(|&v| v == 0));
    }

    #[test]
    fn rejects_unsupported_channels() {
        let map = UndistortMap::new(
            &CameraMatrix::new(1.0, 1.0, 0.0, 0.0),
            &Distortion::none(),
            &CameraMatrix::new(1.0, 1.0, 0.0, 0.0),
            ImageSize::new(2, 2),
        );
        let src = InterleavedImage::new(2, 2, 5);
        assert_eq!(map.remap(&src), Err(CalibError::UnsupportedChannels(5)));
    }

    #[test]
    fn roi_crop_clips_to_image() {
        let img = InterleavedImage::new(10, 8, 1);
        let roi = Roi {
            x: 6,
            y: 2,
            width: 10,
            height: 3,
        };
        let out = roi.crop(&img);
        assert_eq!((out.width, out.height), (4, 3));
    }
}
