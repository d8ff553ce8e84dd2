//! Chessboard inner-corner detection on top of `camcal-core`.
//!
//! ## Quickstart
//!
//! ```
//! use camcal_chessboard::{ChessboardDetector, ChessboardParams};
//! use camcal_core::{Corner, PatternSize};
//!
//! let detector = ChessboardDetector::new(ChessboardParams::default());
//! let corners: Vec<Corner> = Vec::new();
//! let result = detector.detect(&corners, PatternSize::new(7, 6));
//! assert!(result.is_err());
//! ```
//!
//! Algorithm (lattice growing, perspective-aware):
//! 1. Filter ChESS corners by strength and index them in a k-d tree.
//! 2. For a seed corner, take its nearest neighbor as the first grid step and
//!    the nearest roughly perpendicular neighbor as the second.
//! 3. Grow a 4-connected integer lattice: predict the position of every
//!    missing neighbor by linear extrapolation or parallelogram completion and
//!    accept the closest unused corner within a radius relative to the local
//!    spacing.
//! 4. Accept the lattice only if it fills exactly `cols × rows` cells (in
//!    either orientation).
//! 5. Reorder it row-major (columns vary fastest), right-handed, starting at
//!    the corner nearest the image's top-left.

mod detector;
mod geom;
mod lattice;
mod params;
mod subpix;

pub use detector::{ChessboardDetection, ChessboardDetector, ChessboardError};
pub use params::{ChessboardParams, SubpixParams};
pub use subpix::refine_corners_subpix;
