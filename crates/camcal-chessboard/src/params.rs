use serde::{Deserialize, Serialize};

/// Parameters of the gradient-based sub-pixel corner refinement.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SubpixParams {
    /// Half side of the square search window, in pixels.
    pub window_radius: u32,
    pub max_iters: usize,
    /// Stop once the corner moves less than this many pixels.
    pub eps: f32,
}

impl Default for SubpixParams {
    fn default() -> Self {
        Self {
            window_radius: 5,
            max_iters: 30,
            eps: 0.01,
        }
    }
}

/// Parameters specific to the chessboard detector.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ChessboardParams {
    /// Minimal corner strength to consider.
    pub min_strength: f32,

    /// Neighbors fetched from the k-d tree when picking the seed basis.
    pub k_neighbors: usize,

    /// Acceptance radius around a predicted corner, relative to the local
    /// grid spacing.
    pub search_radius_rel: f32,

    /// Maximal number of seed corners tried, strongest first.
    pub max_seeds: usize,

    /// When set, neighboring corners must have orientations orthogonal within
    /// this tolerance (degrees). Requires detector orientations defined
    /// modulo π that alternate between adjacent chessboard corners.
    pub orientation_tolerance_deg: Option<f32>,

    /// Gradient-based sub-pixel refinement applied to the ordered corners.
    /// Only used by callers that have access to the image.
    pub subpix: Option<SubpixParams>,
}

impl Default for ChessboardParams {
    fn default() -> Self {
        Self {
            min_strength: 0.0,
            k_neighbors: 8,
            search_radius_rel: 0.35,
            max_seeds: 24,
            orientation_tolerance_deg: None,
            subpix: Some(SubpixParams::default()),
        }
    }
}
