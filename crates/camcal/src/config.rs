//! JSON configuration for the end-to-end pipeline.

use crate::error::PipelineError;
use camcal_chessboard::ChessboardParams;
use camcal_core::PatternSize;
use camcal_intrinsics::{CalibrationFlags, SolverOptions};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Relative ChESS response threshold used when nothing else is configured.
pub const DEFAULT_THRESHOLD_REL: f32 = 0.2;

fn default_chess_threshold() -> f32 {
    DEFAULT_THRESHOLD_REL
}

fn default_square_size() -> f64 {
    1.0
}

fn default_extensions() -> Vec<String> {
    vec!["jpg".into(), "jpeg".into(), "png".into()]
}

fn default_alpha() -> f64 {
    1.0
}

fn default_max_rms() -> f64 {
    1.0
}

/// Everything the `camcal run` command needs. Every field has a default,
/// so `{}` is a valid config.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub pattern: PatternSize,
    /// Side of one chessboard square, in the unit the poses should use.
    #[serde(default = "default_square_size")]
    pub square_size: f64,
    /// ChESS responses below this fraction of the strongest one are
    /// dropped before grid assembly.
    #[serde(default = "default_chess_threshold")]
    pub chess_threshold_rel: f32,
    #[serde(default)]
    pub chessboard: ChessboardParams,
    #[serde(default)]
    pub flags: CalibrationFlags,
    #[serde(default)]
    pub solver: SolverOptions,
    /// Free scaling for the undistorted view, see
    /// [`camcal_intrinsics::optimal_new_camera_matrix`].
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    /// Crop undistorted images to the all-valid region.
    #[serde(default)]
    pub crop: bool,
    /// Also write a side-by-side `compare_<stem>.png` per corrected image.
    #[serde(default)]
    pub compare: bool,
    /// Process images on the rayon thread pool.
    #[serde(default)]
    pub parallel: bool,
    /// Quality gate on the overall reprojection RMS, in pixels.
    #[serde(default = "default_max_rms")]
    pub max_rms: f64,
    /// Calibration images.
    #[serde(default)]
    pub images_dir: Option<PathBuf>,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    /// Where undistorted images are written.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    /// Where the calibration JSON is written.
    #[serde(default)]
    pub calibration_path: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pattern: PatternSize::default(),
            square_size: default_square_size(),
            chess_threshold_rel: default_chess_threshold(),
            chessboard: ChessboardParams::default(),
            flags: CalibrationFlags::default(),
            solver: SolverOptions::default(),
            alpha: default_alpha(),
            crop: false,
            compare: false,
            parallel: false,
            max_rms: default_max_rms(),
            images_dir: None,
            extensions: default_extensions(),
            output_dir: None,
            calibration_path: None,
        }
    }
}

impl PipelineConfig {
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), PipelineError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// ChESS detector settings for this config's threshold.
    #[cfg(feature = "image")]
    pub fn chess_config(&self) -> chess_corners::ChessConfig {
        crate::detect::chess_config(self.chess_threshold_rel)
    }

    /// Undistortion settings for [`crate::pipeline::correct_images`].
    #[cfg(feature = "image")]
    pub fn correction_options(&self) -> crate::pipeline::CorrectionOptions {
        crate::pipeline::CorrectionOptions {
            alpha: self.alpha,
            crop: self.crop,
            compare: self.compare,
            parallel: self.parallel,
        }
    }

    pub fn images_dir(&self) -> PathBuf {
        self.images_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("images"))
    }

    pub fn output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("corrected_images"))
    }

    pub fn calibration_path(&self) -> PathBuf {
        self.calibration_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("calibration.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_uses_defaults() {
        let cfg: PipelineConfig = serde_json::from_str("{}").expect("parse");
        assert_eq!(cfg, PipelineConfig::default());
        assert_eq!(cfg.pattern, PatternSize::new(7, 6));
        assert_eq!(cfg.output_dir(), PathBuf::from("corrected_images"));
    }

    #[test]
    fn nested_overrides_keep_other_defaults() {
        let cfg: PipelineConfig = serde_json::from_str(
            r#"{
                "pattern": { "cols": 9, "rows": 6 },
                "flags": { "zero_tangent_dist": true },
                "solver": { "max_iters": 10 },
                "max_rms": 0.4
            }"#,
        )
        .expect("parse");
        assert_eq!(cfg.pattern, PatternSize::new(9, 6));
        assert!(cfg.flags.zero_tangent_dist);
        assert!(!cfg.flags.fix_k3);
        assert_eq!(cfg.solver.max_iters, 10);
        assert_eq!(cfg.solver.ftol, SolverOptions::default().ftol);
        assert_eq!(cfg.max_rms, 0.4);
        assert_eq!(cfg.alpha, 1.0);
        assert_eq!(cfg.chess_threshold_rel, DEFAULT_THRESHOLD_REL);
    }

    #[test]
    fn chess_threshold_reaches_the_detector() {
        let cfg: PipelineConfig =
            serde_json::from_str(r#"{ "chess_threshold_rel": 0.05, "compare": true }"#)
                .expect("parse");
        assert_eq!(cfg.chess_threshold_rel, 0.05);
        #[cfg(feature = "image")]
        {
            assert_eq!(cfg.chess_config().threshold_value, 0.05);
            assert!(cfg.correction_options().compare);
        }
    }
}
