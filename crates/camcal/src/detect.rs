use crate::{chessboard, core};
use chess_corners::{
    find_chess_corners_image, ChessConfig, ChessError, CornerDescriptor, ThresholdMode,
};
use nalgebra::Point2;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Smallest image side the ChESS ring and the grid search can work with.
pub const MIN_SIDE: u32 = 16;

/// Errors produced by the image-level detection helpers.
#[derive(thiserror::Error, Debug)]
pub enum DetectError {
    #[error("image {width}x{height} is smaller than the {MIN_SIDE}px detector window")]
    ImageTooSmall { width: u32, height: u32 },

    #[error("ChESS detector: {0}")]
    Chess(#[from] ChessError),

    #[error(transparent)]
    Chessboard(#[from] chessboard::ChessboardError),
}

pub use crate::config::DEFAULT_THRESHOLD_REL;

/// Single-scale ChESS settings used for calibration images.
///
/// A relative threshold of [`DEFAULT_THRESHOLD_REL`] keeps the X-junctions
/// of a printed board filling a fair part of the frame; lower it (see
/// [`crate::PipelineConfig::chess_threshold_rel`]) for small or
/// low-contrast boards.
pub fn default_chess_config() -> ChessConfig {
    chess_config(DEFAULT_THRESHOLD_REL)
}

/// Single-scale ChESS settings keeping responses above `threshold_rel`
/// times the strongest one.
pub fn chess_config(threshold_rel: f32) -> ChessConfig {
    let mut cfg = ChessConfig::single_scale();
    cfg.threshold_mode = ThresholdMode::Relative;
    cfg.threshold_value = threshold_rel;
    cfg.nms_radius = 2;
    cfg
}

/// Borrow an `image::GrayImage` as a `camcal-core` view.
pub fn gray_view(img: &::image::GrayImage) -> core::GrayImageView<'_> {
    core::GrayImageView {
        width: img.width() as usize,
        height: img.height() as usize,
        data: img.as_raw(),
    }
}

/// Detect ChESS corners and adapt them into `camcal-core::Corner`.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip(img, cfg), fields(width = img.width(), height = img.height()))
)]
pub fn detect_corners(
    img: &::image::GrayImage,
    cfg: &ChessConfig,
) -> Result<Vec<core::Corner>, DetectError> {
    Ok(find_chess_corners_image(img, cfg)?
        .iter()
        .map(to_corner)
        .collect())
}

/// Find the inner corners of a `pattern` chessboard: ChESS corners, grid
/// assembly, then gradient sub-pixel refinement when `params.subpix` is set.
///
/// Corners come back row-major in the order of [`core::object_points`].
#[cfg_attr(
    feature = "tracing",
    instrument(
        level = "info",
        skip(img, params, chess_cfg),
        fields(width = img.width(), height = img.height())
    )
)]
pub fn find_chessboard_corners(
    img: &::image::GrayImage,
    pattern: core::PatternSize,
    params: &chessboard::ChessboardParams,
    chess_cfg: &ChessConfig,
) -> Result<chessboard::ChessboardDetection, DetectError> {
    if img.width() < MIN_SIDE || img.height() < MIN_SIDE {
        return Err(DetectError::ImageTooSmall {
            width: img.width(),
            height: img.height(),
        });
    }
    let corners = detect_corners(img, chess_cfg)?;
    log::debug!("{} ChESS corners", corners.len());
    let detector = chessboard::ChessboardDetector::new(params.clone());
    let mut detection = detector.detect(&corners, pattern)?;
    if let Some(subpix) = &params.subpix {
        chessboard::refine_corners_subpix(&gray_view(img), &mut detection.corners, subpix);
    }
    Ok(detection)
}

fn to_corner(c: &CornerDescriptor) -> core::Corner {
    core::Corner {
        position: Point2::new(c.x, c.y),
        // First grid axis, folded to an undirected angle.
        orientation: c.axes[0].angle.rem_euclid(std::f32::consts::PI),
        strength: c.response,
    }
}
