use nalgebra::Point3;
use serde::{Deserialize, Serialize};

/// Number of *inner* corners of a chessboard.
///
/// `cols` counts corners along a board row, `rows` along a board column.
/// A board printed with 8 × 7 squares has 7 × 6 inner corners.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PatternSize {
    pub cols: u32,
    pub rows: u32,
}

impl PatternSize {
    pub fn new(cols: u32, rows: u32) -> Self {
        Self { cols, rows }
    }

    pub fn corner_count(&self) -> usize {
        self.cols as usize * self.rows as usize
    }

    /// Flat index of the corner at column `i`, row `j` (columns vary fastest).
    pub fn index(&self, i: u32, j: u32) -> usize {
        j as usize * self.cols as usize + i as usize
    }

    pub fn is_valid(&self) -> bool {
        self.cols >= 2 && self.rows >= 2
    }
}

impl Default for PatternSize {
    fn default() -> Self {
        Self { cols: 7, rows: 6 }
    }
}

/// 3D board coordinates of every inner corner, row-major, on the `z = 0` plane.
///
/// Corner `(i, j)` lands at `(i * square_size, j * square_size, 0)`, in the
/// same order the chessboard detector emits image points.
pub fn object_points(pattern: PatternSize, square_size: f64) -> Vec<Point3<f64>> {
    let mut points = Vec::with_capacity(pattern.corner_count());
    for j in 0..pattern.rows {
        for i in 0..pattern.cols {
            points.push(Point3::new(
                i as f64 * square_size,
                j as f64 * square_size,
                0.0,
            ));
        }
    }
    points
}
