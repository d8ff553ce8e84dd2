use crate::geom::{abs_cos, is_orthogonal};
use camcal_core::Corner;
use kiddo::{KdTree, SquaredEuclidean};
use nalgebra::{Point2, Vector2};
use std::collections::{HashMap, VecDeque};

const DIRECTIONS: [(i32, i32); 4] = [(1, 0), (-1, 0), (0, 1), (0, -1)];

/// Integer lattice grown over a corner cloud: `(i, j) -> corner index`.
#[derive(Clone, Debug, Default)]
pub(crate) struct Lattice {
    pub cells: HashMap<(i32, i32), usize>,
}

impl Lattice {
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Inclusive bounds `(min_i, min_j, max_i, max_j)`.
    pub fn bounds(&self) -> Option<(i32, i32, i32, i32)> {
        let mut it = self.cells.keys();
        let &(i0, j0) = it.next()?;
        let mut b = (i0, j0, i0, j0);
        for &(i, j) in it {
            b.0 = b.0.min(i);
            b.1 = b.1.min(j);
            b.2 = b.2.max(i);
            b.3 = b.3.max(j);
        }
        Some(b)
    }

    /// `(width, height)` of the lattice when it is a completely filled
    /// rectangle, `None` otherwise.
    pub fn full_rect_dims(&self) -> Option<(usize, usize)> {
        let (min_i, min_j, max_i, max_j) = self.bounds()?;
        let w = (max_i - min_i + 1) as usize;
        let h = (max_j - min_j + 1) as usize;
        (w * h == self.cells.len()).then_some((w, h))
    }
}

/// Spatial index plus the bookkeeping needed to grow lattices.
pub(crate) struct LatticeGrower<'a> {
    corners: &'a [Corner],
    tree: KdTree<f32, 2>,
    k_neighbors: usize,
    search_radius_rel: f32,
    orientation_tol_rad: Option<f32>,
}

impl<'a> LatticeGrower<'a> {
    pub fn new(
        corners: &'a [Corner],
        k_neighbors: usize,
        search_radius_rel: f32,
        orientation_tol_deg: Option<f32>,
    ) -> Self {
        let coords = corners
            .iter()
            .map(|c| [c.position.x, c.position.y])
            .collect::<Vec<_>>();
        let tree: KdTree<f32, 2> = (&coords).into();
        Self {
            corners,
            tree,
            k_neighbors: k_neighbors.max(2),
            search_radius_rel,
            orientation_tol_rad: orientation_tol_deg.map(f32::to_radians),
        }
    }

    fn pos(&self, idx: usize) -> Vector2<f32> {
        self.corners[idx].as_vec2()
    }

    fn orientation_ok(&self, a: usize, b: usize) -> bool {
        match self.orientation_tol_rad {
            None => true,
            Some(tol) => is_orthogonal(
                self.corners[a].orientation,
                self.corners[b].orientation,
                tol,
            ),
        }
    }

    /// Pick the two grid steps at `seed`: the nearest neighbor, then the
    /// nearest neighbor that is roughly perpendicular with a similar spacing.
    pub fn seed_basis(&self, seed: usize) -> Option<(usize, usize)> {
        let p = self.pos(seed);
        let mut nn: Vec<(usize, f32)> = self
            .tree
            .nearest_n::<SquaredEuclidean>(&[p.x, p.y], self.k_neighbors + 1)
            .into_iter()
            .map(|n| (n.item as usize, n.distance))
            .filter(|&(idx, d2)| idx != seed && d2 > 0.0)
            .collect();
        nn.sort_by(|a, b| a.1.total_cmp(&b.1));

        let (first, d_first) = nn
            .iter()
            .copied()
            .find(|&(idx, _)| self.orientation_ok(seed, idx))?;
        let u = self.pos(first) - p;
        let len_u = d_first.sqrt();

        let second = nn.iter().copied().find(|&(idx, d2)| {
            if idx == first || !self.orientation_ok(seed, idx) {
                return false;
            }
            let v = self.pos(idx) - p;
            let ratio = d2.sqrt() / len_u;
            abs_cos(&u, &v) < 0.5 && (0.5..=2.0).contains(&ratio)
        })?;

        Some((first, second.0))
    }

    /// Grow a lattice from `seed` using the basis from [`Self::seed_basis`].
    pub fn grow(&self, seed: usize) -> Option<Lattice> {
        let (first, second) = self.seed_basis(seed)?;
        let step_u = self.pos(first) - self.pos(seed);
        let step_v = self.pos(second) - self.pos(seed);

        let mut used = vec![false; self.corners.len()];
        let mut lattice = Lattice::default();
        let mut queue = VecDeque::new();
        for (cell, idx) in [((0, 0), seed), ((1, 0), first), ((0, 1), second)] {
            lattice.cells.insert(cell, idx);
            used[idx] = true;
            queue.push_back(cell);
        }

        while let Some((ci, cj)) = queue.pop_front() {
            let Some(&from_idx) = lattice.cells.get(&(ci, cj)) else {
                continue;
            };
            for (di, dj) in DIRECTIONS {
                let target = (ci + di, cj + dj);
                if lattice.cells.contains_key(&target) {
                    continue;
                }
                let Some((predicted, spacing)) =
                    self.predict(&lattice, target, step_u, step_v)
                else {
                    continue;
                };
                let radius = self.search_radius_rel * spacing;
                if let Some(idx) = self.closest_unused(predicted, radius, &used) {
                    if !self.orientation_ok(from_idx, idx) {
                        continue;
                    }
                    lattice.cells.insert(target, idx);
                    used[idx] = true;
                    queue.push_back(target);
                }
            }
        }

        Some(lattice)
    }

    /// Predict where the corner of cell `t` should be, together with the
    /// local grid spacing.
    fn predict(
        &self,
        lattice: &Lattice,
        t: (i32, i32),
        step_u: Vector2<f32>,
        step_v: Vector2<f32>,
    ) -> Option<(Vector2<f32>, f32)> {
        let at = |i: i32, j: i32| lattice.cells.get(&(i, j)).map(|&idx| self.pos(idx));

        let mut sum = Vector2::zeros();
        let mut spacing = 0.0f32;
        let mut n = 0usize;

        // Linear extrapolation along each axis.
        for (di, dj) in DIRECTIONS {
            if let (Some(p1), Some(p2)) = (
                at(t.0 - di, t.1 - dj),
                at(t.0 - 2 * di, t.1 - 2 * dj),
            ) {
                sum += p1 * 2.0 - p2;
                spacing += (p1 - p2).norm();
                n += 1;
            }
        }

        // Parallelogram completion from an L-shaped triple.
        for (ai, aj) in [(1, 0), (-1, 0)] {
            for (bi, bj) in [(0, 1), (0, -1)] {
                if let (Some(pa), Some(pb), Some(pab)) = (
                    at(t.0 - ai, t.1 - aj),
                    at(t.0 - bi, t.1 - bj),
                    at(t.0 - ai - bi, t.1 - aj - bj),
                ) {
                    sum += pa + pb - pab;
                    spacing += 0.5 * ((pa - pab).norm() + (pb - pab).norm());
                    n += 1;
                }
            }
        }

        if n == 0 {
            // Only a single neighbor is known: fall back to the seed steps.
            for (di, dj) in DIRECTIONS {
                if let Some(p) = at(t.0 - di, t.1 - dj) {
                    let step = step_u * di as f32 + step_v * dj as f32;
                    sum += p + step;
                    spacing += step.norm();
                    n += 1;
                }
            }
        }

        if n == 0 {
            return None;
        }
        let n = n as f32;
        Some((sum / n, spacing / n))
    }

    fn closest_unused(&self, p: Vector2<f32>, radius: f32, used: &[bool]) -> Option<usize> {
        let r2 = radius * radius;
        self.tree
            .nearest_n::<SquaredEuclidean>(&[p.x, p.y], 4)
            .into_iter()
            .filter(|n| n.distance <= r2)
            .map(|n| n.item as usize)
            .find(|&idx| !used[idx])
    }

    pub fn position(&self, idx: usize) -> Point2<f32> {
        self.corners[idx].position
    }
}
