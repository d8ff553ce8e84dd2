use crate::geom::cross;
use crate::lattice::{Lattice, LatticeGrower};
use crate::params::ChessboardParams;
use camcal_core::{Corner, PatternSize};
use log::{debug, info};
use nalgebra::{Point2, Vector2};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Errors returned by the chessboard detector.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ChessboardError {
    #[error("invalid pattern size {cols}x{rows} (need at least 2x2 inner corners)")]
    InvalidPattern { cols: u32, rows: u32 },
    #[error("not enough corners: found {found}, need {needed}")]
    NotEnoughCorners { found: usize, needed: usize },
    #[error("no seed corner has two perpendicular neighbors")]
    NoGridBasis,
    #[error("chessboard grid not found (largest lattice had {largest} corners, expected {expected})")]
    GridNotFound { largest: usize, expected: usize },
}

/// Ordered inner corners of one chessboard.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChessboardDetection {
    pub pattern: PatternSize,
    /// `cols * rows` corners, row-major (columns vary fastest), in the order
    /// of [`camcal_core::object_points`].
    pub corners: Vec<Point2<f32>>,
    /// Mean distance between horizontally/vertically adjacent corners.
    pub mean_spacing: f32,
}

/// Chessboard detector working on a cloud of raw ChESS corners.
pub struct ChessboardDetector {
    pub params: ChessboardParams,
}

impl ChessboardDetector {
    pub fn new(params: ChessboardParams) -> Self {
        Self { params }
    }

    /// Find the `pattern` inner corners among `corners`.
    ///
    /// Every inner corner must be found; a partially visible board is
    /// reported as [`ChessboardError::GridNotFound`].
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, corners), fields(num_corners = corners.len()))
    )]
    pub fn detect(
        &self,
        corners: &[Corner],
        pattern: PatternSize,
    ) -> Result<ChessboardDetection, ChessboardError> {
        if !pattern.is_valid() {
            return Err(ChessboardError::InvalidPattern {
                cols: pattern.cols,
                rows: pattern.rows,
            });
        }
        let expected = pattern.corner_count();

        // 1. Filter by strength.
        let strong: Vec<Corner> = corners
            .iter()
            .filter(|c| c.strength >= self.params.min_strength)
            .cloned()
            .collect();
        debug!("{} of {} corners pass the strength filter", strong.len(), corners.len());
        if strong.len() < expected {
            return Err(ChessboardError::NotEnoughCorners {
                found: strong.len(),
                needed: expected,
            });
        }

        let grower = LatticeGrower::new(
            &strong,
            self.params.k_neighbors,
            self.params.search_radius_rel,
            self.params.orientation_tolerance_deg,
        );

        // 2. Seeds, strongest first.
        let mut seeds: Vec<usize> = (0..strong.len()).collect();
        seeds.sort_by(|&a, &b| strong[b].strength.total_cmp(&strong[a].strength));
        seeds.truncate(self.params.max_seeds.max(1));

        let mut largest = 0usize;
        let mut any_basis = false;
        for &seed in &seeds {
            let Some(lattice) = grower.grow(seed) else {
                continue;
            };
            any_basis = true;
            largest = largest.max(lattice.len());

            let Some((w, h)) = lattice.full_rect_dims() else {
                debug!("seed {seed}: lattice of {} corners is not a rectangle", lattice.len());
                continue;
            };
            let fits = (w, h) == (pattern.cols as usize, pattern.rows as usize)
                || (w, h) == (pattern.rows as usize, pattern.cols as usize);
            if !fits {
                debug!("seed {seed}: lattice {w}x{h} does not match the pattern");
                continue;
            }

            if let Some(corners) = canonical_order(&lattice, &grower, (w, h), pattern) {
                let mean_spacing = mean_spacing(&corners, pattern);
                info!(
                    "chessboard {}x{} found from seed {} (spacing {:.1}px)",
                    pattern.cols, pattern.rows, seed, mean_spacing
                );
                return Ok(ChessboardDetection {
                    pattern,
                    corners,
                    mean_spacing,
                });
            }
        }

        if !any_basis {
            return Err(ChessboardError::NoGridBasis);
        }
        Err(ChessboardError::GridNotFound { largest, expected })
    }
}

/// Map `(i, j)` on a `w × h` lattice through one of the 8 symmetries of the
/// rectangle. Symmetries 4..8 swap the axes.
fn apply_symmetry(sym: usize, i: usize, j: usize, w: usize, h: usize) -> (usize, usize) {
    match sym {
        0 => (i, j),
        1 => (w - 1 - i, h - 1 - j),
        2 => (w - 1 - i, j),
        3 => (i, h - 1 - j),
        4 => (j, i),
        5 => (h - 1 - j, w - 1 - i),
        6 => (h - 1 - j, i),
        _ => (j, w - 1 - i),
    }
}

/// Sign of the board's axes in the image: positive when the column axis
/// turns clockwise (y down) onto the row axis, as for an upright board.
fn handedness(ordered: &[Point2<f32>], pattern: PatternSize) -> f32 {
    let cols = pattern.cols as usize;
    let rows = pattern.rows as usize;
    let mut du = Vector2::zeros();
    let mut dv = Vector2::zeros();
    for j in 0..rows {
        for i in 0..cols {
            let p = ordered[j * cols + i];
            if i + 1 < cols {
                du += ordered[j * cols + i + 1] - p;
            }
            if j + 1 < rows {
                dv += ordered[(j + 1) * cols + i] - p;
            }
        }
    }
    cross(&du, &dv)
}

/// Row-major, right-handed ordering with the first corner closest to the
/// image's top-left.
fn canonical_order(
    lattice: &Lattice,
    grower: &LatticeGrower<'_>,
    (w, h): (usize, usize),
    pattern: PatternSize,
) -> Option<Vec<Point2<f32>>> {
    let (min_i, min_j, _, _) = lattice.bounds()?;
    let cols = pattern.cols as usize;
    let rows = pattern.rows as usize;

    let mut best: Option<(f32, Vec<Point2<f32>>)> = None;
    for sym in 0..8 {
        let dims = if sym < 4 { (w, h) } else { (h, w) };
        if dims != (cols, rows) {
            continue;
        }
        let mut ordered = vec![Point2::origin(); cols * rows];
        for (&(i, j), &idx) in &lattice.cells {
            let (ni, nj) = apply_symmetry(
                sym,
                (i - min_i) as usize,
                (j - min_j) as usize,
                w,
                h,
            );
            ordered[nj * cols + ni] = grower.position(idx);
        }
        if handedness(&ordered, pattern) <= 0.0 {
            continue;
        }
        let score = ordered[0].x + ordered[0].y;
        if best.as_ref().is_none_or(|(s, _)| score < *s) {
            best = Some((score, ordered));
        }
    }
    best.map(|(_, ordered)| ordered)
}

fn mean_spacing(ordered: &[Point2<f32>], pattern: PatternSize) -> f32 {
    let cols = pattern.cols as usize;
    let rows = pattern.rows as usize;
    let mut sum = 0.0f32;
    let mut n = 0usize;
    for j in 0..rows {
        for i in 0..cols {
            let p = ordered[j * cols + i];
            if i + 1 < cols {
                sum += (ordered[j * cols + i + 1] - p).norm();
                n += 1;
            }
            if j + 1 < rows {
                sum += (ordered[(j + 1) * cols + i] - p).norm();
                n += 1;
            }
        }
    }
    if n == 0 {
        0.0
    } else {
        sum / n as f32
    }
}
