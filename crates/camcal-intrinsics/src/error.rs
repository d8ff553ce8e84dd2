/// Errors returned by calibration, pose estimation and undistortion.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CalibError {
    #[error("no calibration views")]
    NoViews,
    #[error("view {view}: {object} object points but {image} image points")]
    PointCountMismatch {
        view: usize,
        object: usize,
        image: usize,
    },
    #[error("view {view}: {found} points, need at least 4")]
    TooFewPoints { view: usize, found: usize },
    #[error("view {view}: object points must lie on the z = 0 plane")]
    NonPlanarObject { view: usize },
    #[error("image size {width}x{height} is empty")]
    EmptyImage { width: u32, height: u32 },
    #[error("degenerate initialization: {0}")]
    DegenerateInit(String),
    #[error("solver produced a non-finite solution")]
    NonFinite,
    #[error("{0} poses for {1} views")]
    PoseCountMismatch(usize, usize),
    #[error("reprojection rms {rms:.4}px exceeds the limit {max_rms:.4}px")]
    QualityGate { rms: f64, max_rms: f64 },
    #[error("unsupported channel count {0} (expected 1 to 4)")]
    UnsupportedChannels(usize),
}
