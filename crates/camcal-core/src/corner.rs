use nalgebra::{Point2, Vector2};
use serde::{Deserialize, Serialize};

/// Raw X-junction produced by a corner detector, before grid assembly.
///
/// This is the thing you obtain by adapting the output of your ChESS crate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Corner {
    /// Corner position in pixel coordinates.
    pub position: Point2<f32>,

    /// Dominant orientation at the corner, in radians.
    ///
    /// Defined modulo π, because chessboard axes are undirected.
    pub orientation: f32,

    /// Strength / response of the corner detector.
    pub strength: f32,
}

impl Corner {
    pub fn new(x: f32, y: f32, orientation: f32, strength: f32) -> Self {
        Self {
            position: Point2::new(x, y),
            orientation,
            strength,
        }
    }

    /// Convenience accessor for (x, y) as a vector.
    pub fn as_vec2(&self) -> Vector2<f32> {
        Vector2::new(self.position.x, self.position.y)
    }
}
