//! Batch processing over image files: detection and undistortion.

use crate::dataset::{DetectionSet, ImageDetection};
use crate::detect::find_chessboard_corners;
use crate::draw::side_by_side;
use crate::error::PipelineError;
use camcal_chessboard::ChessboardParams;
use camcal_core::{ImageSize, InterleavedImage, PatternSize};
use camcal_intrinsics::{optimal_new_camera_matrix, CalibrationFile, Roi, UndistortMap};
use chess_corners::ChessConfig;
use image::DynamicImage;
use log::{info, warn};
use nalgebra::Point2;
use rayon::prelude::*;
use std::{
    fs,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Files in `dir` whose extension is in `extensions` (case-insensitive),
/// sorted by path.
pub fn list_images(dir: &Path, extensions: &[String]) -> Result<Vec<PathBuf>, PipelineError> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let matches = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)));
        if matches {
            paths.push(path);
        }
    }
    if paths.is_empty() {
        return Err(PipelineError::NoImages(dir.to_path_buf()));
    }
    paths.sort();
    Ok(paths)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn map_paths<T, F>(paths: &[PathBuf], parallel: bool, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(&PathBuf) -> T + Sync + Send,
{
    if parallel {
        paths.par_iter().map(f).collect()
    } else {
        paths.iter().map(f).collect()
    }
}

enum Outcome {
    Found(ImageSize, Vec<Point2<f32>>),
    NotFound(ImageSize),
    Unreadable,
}

/// Find the chessboard in every image.
///
/// Images without a board, or that cannot be decoded, are logged and listed
/// in [`DetectionSet::rejected`]. The first decodable image fixes the image
/// size; any other size is an error.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip(paths, params, chess_cfg), fields(num_images = paths.len()))
)]
pub fn detect_batch(
    paths: &[PathBuf],
    pattern: PatternSize,
    params: &ChessboardParams,
    chess_cfg: &ChessConfig,
    parallel: bool,
) -> Result<DetectionSet, PipelineError> {
    let outcomes = map_paths(paths, parallel, |path| {
        let img = match image::open(path) {
            Ok(img) => img.to_luma8(),
            Err(err) => {
                warn!("{}: cannot read image: {err}", path.display());
                return Outcome::Unreadable;
            }
        };
        let size = ImageSize::new(img.width(), img.height());
        match find_chessboard_corners(&img, pattern, params, chess_cfg) {
            Ok(det) => Outcome::Found(size, det.corners),
            Err(err) => {
                warn!(
                    "{}: no chessboard detected ({err}), check the viewing angle and lighting",
                    file_name(path)
                );
                Outcome::NotFound(size)
            }
        }
    });

    let mut image_size: Option<ImageSize> = None;
    let mut detections = Vec::new();
    let mut rejected = Vec::new();
    for (path, outcome) in paths.iter().zip(outcomes) {
        let size = match &outcome {
            Outcome::Found(size, _) | Outcome::NotFound(size) => *size,
            Outcome::Unreadable => {
                rejected.push(file_name(path));
                continue;
            }
        };
        match image_size {
            None => image_size = Some(size),
            Some(expected) if expected != size => {
                return Err(PipelineError::SizeMismatch {
                    path: path.clone(),
                    expected,
                    found: size,
                });
            }
            Some(_) => {}
        }
        match outcome {
            Outcome::Found(_, corners) => {
                info!("{}: chessboard found", file_name(path));
                detections.push(ImageDetection {
                    name: file_name(path),
                    corners,
                });
            }
            _ => rejected.push(file_name(path)),
        }
    }

    let image_size = image_size.ok_or_else(|| {
        PipelineError::NoImages(
            paths
                .first()
                .and_then(|p| p.parent())
                .map(Path::to_path_buf)
                .unwrap_or_default(),
        )
    })?;
    info!(
        "chessboard found in {} of {} images",
        detections.len(),
        paths.len()
    );
    Ok(DetectionSet {
        pattern,
        image_size,
        detections,
        rejected,
    })
}

/// Interleaved 8-bit copy of a decoded image, keeping gray and alpha.
pub fn to_interleaved(img: &DynamicImage) -> InterleavedImage {
    let (width, height) = (img.width() as usize, img.height() as usize);
    let color = img.color();
    let (channels, data) = match (color.has_color(), color.has_alpha()) {
        (false, false) => (1, img.to_luma8().into_raw()),
        (false, true) => (2, img.to_luma_alpha8().into_raw()),
        (true, false) => (3, img.to_rgb8().into_raw()),
        (true, true) => (4, img.to_rgba8().into_raw()),
    };
    InterleavedImage {
        width,
        height,
        channels,
        data,
    }
}

/// Inverse of [`to_interleaved`].
pub fn from_interleaved(img: InterleavedImage) -> Result<DynamicImage, PipelineError> {
    let (w, h) = (img.width as u32, img.height as u32);
    let bad_buffer = || {
        PipelineError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "pixel buffer does not match the image size",
        ))
    };
    Ok(match img.channels {
        1 => DynamicImage::ImageLuma8(image::GrayImage::from_raw(w, h, img.data).ok_or_else(bad_buffer)?),
        2 => DynamicImage::ImageLumaA8(
            image::GrayAlphaImage::from_raw(w, h, img.data).ok_or_else(bad_buffer)?,
        ),
        3 => DynamicImage::ImageRgb8(image::RgbImage::from_raw(w, h, img.data).ok_or_else(bad_buffer)?),
        _ => DynamicImage::ImageRgba8(
            image::RgbaImage::from_raw(w, h, img.data).ok_or_else(bad_buffer)?,
        ),
    })
}

/// How [`correct_images`] renders its output.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CorrectionOptions {
    /// Free scaling passed to [`optimal_new_camera_matrix`].
    pub alpha: f64,
    /// Cut the output to its all-valid region.
    pub crop: bool,
    /// Also write `compare_<stem>.png`, see [`side_by_side`].
    pub compare: bool,
    pub parallel: bool,
}

impl Default for CorrectionOptions {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            crop: false,
            compare: false,
            parallel: true,
        }
    }
}

/// Outcome of a [`correct_images`] batch.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CorrectionSummary {
    /// Undistorted images, in input order.
    pub written: Vec<PathBuf>,
    /// Side-by-side comparisons, when requested.
    pub comparisons: Vec<PathBuf>,
    /// File names of the images that could not be corrected.
    pub failed: Vec<String>,
    pub elapsed: Duration,
}

impl CorrectionSummary {
    pub fn total(&self) -> usize {
        self.written.len() + self.failed.len()
    }

    /// Corrected share of the batch, in percent.
    pub fn success_rate(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            n => 100.0 * self.written.len() as f64 / n as f64,
        }
    }
}

struct Corrector<'a> {
    map: &'a UndistortMap,
    roi: Roi,
    size: ImageSize,
    out_dir: &'a Path,
    options: &'a CorrectionOptions,
}

impl Corrector<'_> {
    fn correct(&self, path: &Path) -> Result<(PathBuf, Option<PathBuf>), PipelineError> {
        let original = image::open(path)?;
        let src = to_interleaved(&original);
        if src.size() != self.size {
            return Err(PipelineError::SizeMismatch {
                path: path.to_path_buf(),
                expected: self.size,
                found: src.size(),
            });
        }
        let mut out = self.map.remap(&src)?;
        if self.options.crop && !self.roi.is_empty() {
            out = self.roi.crop(&out);
        }
        let corrected = from_interleaved(out)?;
        let target = self.out_dir.join(file_name(path));
        corrected.save(&target)?;

        let comparison = if self.options.compare {
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let compare = self.out_dir.join(format!("compare_{stem}.png"));
            side_by_side(&original.to_rgb8(), &corrected.to_rgb8()).save(&compare)?;
            Some(compare)
        } else {
            None
        };
        Ok((target, comparison))
    }
}

/// Undistort every image with `calibration` and write it under `out_dir`
/// with its original file name.
///
/// An image that cannot be read, has the wrong size or cannot be written is
/// logged and listed in [`CorrectionSummary::failed`]; the rest of the batch
/// still runs. Only an invalid calibration or an unusable `out_dir` is an
/// error.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip(paths, calibration, options), fields(num_images = paths.len()))
)]
pub fn correct_images(
    paths: &[PathBuf],
    calibration: &CalibrationFile,
    out_dir: &Path,
    options: &CorrectionOptions,
) -> Result<CorrectionSummary, PipelineError> {
    let started = Instant::now();
    let camera = calibration.camera()?;
    let distortion = calibration.distortion()?;
    let size = calibration.image_size;
    let (new_camera, roi) =
        optimal_new_camera_matrix(&camera, &distortion, size, options.alpha, None);
    let map = UndistortMap::new(&camera, &distortion, &new_camera, size);
    fs::create_dir_all(out_dir)?;

    let corrector = Corrector {
        map: &map,
        roi,
        size,
        out_dir,
        options,
    };
    let results = map_paths(paths, options.parallel, |path| corrector.correct(path));

    let mut summary = CorrectionSummary::default();
    for (path, result) in paths.iter().zip(results) {
        match result {
            Ok((target, comparison)) => {
                summary.written.push(target);
                summary.comparisons.extend(comparison);
            }
            Err(err) => {
                warn!("{}: not corrected: {err}", file_name(path));
                summary.failed.push(file_name(path));
            }
        }
    }
    summary.elapsed = started.elapsed();
    info!(
        "corrected {}/{} images ({:.1}%) into {} in {:.2?}",
        summary.written.len(),
        summary.total(),
        summary.success_rate(),
        out_dir.display(),
        summary.elapsed
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_only_matching_extensions_sorted() {
        let dir = tempfile::tempdir().expect("tempdir");
        for name in ["b.PNG", "a.jpg", "notes.txt", "c.png"] {
            fs::write(dir.path().join(name), b"x").expect("write");
        }
        fs::create_dir(dir.path().join("sub.png")).expect("mkdir");
        let exts = vec!["png".to_string(), "jpg".to_string()];
        let paths = list_images(dir.path(), &exts).expect("list");
        let names: Vec<String> = paths.iter().map(|p| file_name(p)).collect();
        assert_eq!(names, ["a.jpg", "b.PNG", "c.png"]);

        let empty = tempfile::tempdir().expect("tempdir");
        assert!(matches!(
            list_images(empty.path(), &exts),
            Err(PipelineError::NoImages(_))
        ));
    }

    #[test]
    fn interleaved_conversion_keeps_channels() {
        let rgb = DynamicImage::ImageRgb8(image::RgbImage::from_pixel(3, 2, image::Rgb([1, 2, 3])));
        let il = to_interleaved(&rgb);
        assert_eq!((il.width, il.height, il.channels), (3, 2, 3));
        assert_eq!(&il.data[..3], &[1, 2, 3]);
        let back = from_interleaved(il).expect("back");
        assert_eq!(back.to_rgb8(), rgb.to_rgb8());

        let gray = DynamicImage::ImageLuma8(image::GrayImage::from_pixel(2, 2, image::Luma([9])));
        assert_eq!(to_interleaved(&gray).channels, 1);
    }

    #[test]
    fn unreadable_files_are_rejected_not_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let bad = dir.path().join("broken.png");
        fs::write(&bad, b"not a png").expect("write");
        let good = dir.path().join("flat.png");
        image::GrayImage::from_pixel(40, 30, image::Luma([200]))
            .save(&good)
            .expect("save");

        let set = detect_batch(
            &[bad, good],
            PatternSize::new(4, 3),
            &ChessboardParams::default(),
            &crate::detect::default_chess_config(),
            false,
        )
        .expect("batch");
        assert_eq!(set.image_size, ImageSize::new(40, 30));
        assert!(set.detections.is_empty());
        assert_eq!(set.rejected, ["broken.png", "flat.png"]);
    }

    fn small_calibration(image_size: ImageSize) -> CalibrationFile {
        let json = format!(
            r#"{{
                "version": {},
                "image_size": {{ "width": {}, "height": {} }},
                "pattern": {{ "cols": 4, "rows": 3 }},
                "square_size": 1.0,
                "camera_matrix": [[100.0, 0.0, 20.0], [0.0, 100.0, 15.0], [0.0, 0.0, 1.0]],
                "dist_coeffs": [-0.1, 0.0, 0.0, 0.0, 0.0],
                "rms": 0.1
            }}"#,
            camcal_intrinsics::CALIBRATION_FILE_VERSION,
            image_size.width,
            image_size.height
        );
        serde_json::from_str(&json).expect("calibration json")
    }

    #[test]
    fn broken_images_do_not_stop_the_correction_batch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let good = dir.path().join("good.png");
        image::RgbImage::from_pixel(40, 30, image::Rgb([90, 120, 150]))
            .save(&good)
            .expect("save");
        let broken = dir.path().join("broken.png");
        fs::write(&broken, b"not a png").expect("write");
        let resized = dir.path().join("other.png");
        image::GrayImage::new(20, 20).save(&resized).expect("save");

        let out = dir.path().join("out");
        let options = CorrectionOptions {
            compare: true,
            parallel: false,
            ..CorrectionOptions::default()
        };
        let summary = correct_images(
            &[broken, good, resized],
            &small_calibration(ImageSize::new(40, 30)),
            &out,
            &options,
        )
        .expect("batch");

        assert_eq!(summary.written, [out.join("good.png")]);
        assert_eq!(summary.failed, ["broken.png", "other.png"]);
        assert_eq!(summary.comparisons, [out.join("compare_good.png")]);
        assert_eq!(summary.total(), 3);
        assert!((summary.success_rate() - 100.0 / 3.0).abs() < 1e-9);

        let corrected = image::open(out.join("good.png")).expect("open");
        assert_eq!((corrected.width(), corrected.height()), (40, 30));
        let pair = image::open(out.join("compare_good.png")).expect("open");
        assert_eq!((pair.width(), pair.height()), (80, 30));
    }

    #[test]
    fn invalid_calibration_is_still_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut calib = small_calibration(ImageSize::new(40, 30));
        calib.camera_matrix[0][0] = -1.0;
        let res = correct_images(&[], &calib, dir.path(), &CorrectionOptions::default());
        assert!(matches!(res, Err(PipelineError::CalibrationFile(_))));
    }
}
