//! # Uniform spatial hash grid
//!
//! Answers "which points lie within `r` of this point" in amortised O(1)
//! per query. The grid covers the bounding box of the current points and is
//! rebuilt from scratch every step, since positions change continuously.
//!
//! ## Layout
//!
//! There are no per-cell containers. A build is a counting sort of point
//! indices by cell id:
//!
//! 1. count points per cell,
//! 2. prefix-sum the counts into start offsets,
//! 3. scatter point indices into one flat `order` array.
//!
//! Cell `c` then owns `order[cell_start[c]..cell_start[c + 1]]`.
//!
//! A query scans the 3×3×3 block around the query point's cell, so the cell
//! size must be at least the largest query radius.

use crate::simulation::error::SimError;
use crate::simulation::states::NVec3;

/// Upper bound on the number of cells; the cell size doubles until under it.
pub const MAX_GRID_CELLS: usize = 1 << 21;

#[derive(Debug, Clone)]
pub struct SpatialHash {
    origin: NVec3,
    cell_size: f64,
    inv_cell: f64,
    dims: [usize; 3],
    cell_start: Vec<u32>,
    order: Vec<u32>,
    point_cell: Vec<u32>,
}

impl Default for SpatialHash {
    fn default() -> Self {
        Self::new()
    }
}

impl SpatialHash {
    pub fn new() -> Self {
        Self {
            origin: NVec3::zeros(),
            cell_size: 1.0,
            inv_cell: 1.0,
            dims: [1, 1, 1],
            cell_start: Vec::new(),
            order: Vec::new(),
            point_cell: Vec::new(),
        }
    }

    /// Rebuild the grid over `points` with cells no smaller than `min_cell_size`.
    ///
    /// Buffers are reused between builds; growing them goes through
    /// `try_reserve` so an allocation failure comes back as an error instead
    /// of aborting.
    pub fn build(&mut self, points: &[NVec3], min_cell_size: f64) -> Result<(), SimError> {
        self.cell_start.clear();
        self.order.clear();
        self.point_cell.clear();

        let (min, max) = bounds(points);
        self.origin = min;

        let mut cell = if min_cell_size.is_finite() && min_cell_size > 0.0 {
            min_cell_size
        } else {
            1.0
        };
        let extent = max - min;
        let dims = loop {
            let dims = [
                (extent.x / cell).floor() as usize + 1,
                (extent.y / cell).floor() as usize + 1,
                (extent.z / cell).floor() as usize + 1,
            ];
            let total = dims[0] as u128 * dims[1] as u128 * dims[2] as u128;
            if total <= MAX_GRID_CELLS as u128 {
                break dims;
            }
            cell *= 2.0;
        };
        self.dims = dims;
        self.cell_size = cell;
        self.inv_cell = 1.0 / cell;

        let cells = self.cell_count();
        self.cell_start.try_reserve(cells + 1)?;
        self.order.try_reserve(points.len())?;
        self.point_cell.try_reserve(points.len())?;
        self.cell_start.resize(cells + 1, 0);
        self.order.resize(points.len(), 0);

        // count
        for p in points {
            let c = self.cell_id(self.coords(p));
            self.point_cell.push(c as u32);
            self.cell_start[c + 1] += 1;
        }
        // prefix sum -> start offsets
        for c in 0..cells {
            self.cell_start[c + 1] += self.cell_start[c];
        }
        // scatter, using cell_start as a cursor
        for (k, &c) in self.point_cell.iter().enumerate() {
            let slot = &mut self.cell_start[c as usize];
            self.order[*slot as usize] = k as u32;
            *slot += 1;
        }
        // cursors now hold end offsets; shift back to start offsets
        for c in (1..=cells).rev() {
            self.cell_start[c] = self.cell_start[c - 1];
        }
        self.cell_start[0] = 0;

        Ok(())
    }

    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    pub fn cell_count(&self) -> usize {
        self.dims[0] * self.dims[1] * self.dims[2]
    }

    /// Point indices stored in cell `c`.
    pub fn cell(&self, c: usize) -> &[u32] {
        let start = self.cell_start[c] as usize;
        let end = self.cell_start[c + 1] as usize;
        &self.order[start..end]
    }

    /// Integer cell coordinates of `p`, clamped to the grid.
    pub fn coords(&self, p: &NVec3) -> [usize; 3] {
        let rel = (p - self.origin) * self.inv_cell;
        let clamp = |v: f64, dim: usize| -> usize {
            if v <= 0.0 || !v.is_finite() {
                0
            } else {
                (v as usize).min(dim - 1)
            }
        };
        [clamp(rel.x, self.dims[0]), clamp(rel.y, self.dims[1]), clamp(rel.z, self.dims[2])]
    }

    pub fn cell_id(&self, c: [usize; 3]) -> usize {
        c[0] + self.dims[0] * (c[1] + self.dims[1] * c[2])
    }

    /// Call `f` with every point index in the 27 cells around `p`.
    pub fn for_each_nearby(&self, p: &NVec3, mut f: impl FnMut(usize)) {
        if self.cell_start.is_empty() {
            return;
        }
        let [cx, cy, cz] = self.coords(p);
        let span = |c: usize, dim: usize| c.saturating_sub(1)..=(c + 1).min(dim - 1);

        for z in span(cz, self.dims[2]) {
            for y in span(cy, self.dims[1]) {
                for x in span(cx, self.dims[0]) {
                    for &k in self.cell(self.cell_id([x, y, z])) {
                        f(k as usize);
                    }
                }
            }
        }
    }

    /// Collect indices of `points` within `radius` of `p` into `out`.
    ///
    /// `out` is cleared first. The query point itself is included when it is
    /// one of `points`; callers filter it out by index.
    pub fn query_radius(&self, points: &[NVec3], p: &NVec3, radius: f64, out: &mut Vec<u32>) {
        debug_assert!(radius <= self.cell_size * (1.0 + 1e-9), "query radius exceeds cell size");
        out.clear();
        let r2 = radius * radius;
        self.for_each_nearby(p, |k| {
            if (points[k] - p).norm_squared() <= r2 {
                out.push(k as u32);
            }
        });
    }
}

/// Axis-aligned bounds of a point set; a single zero box when empty.
pub(crate) fn bounds(points: &[NVec3]) -> (NVec3, NVec3) {
    if points.is_empty() {
        return (NVec3::zeros(), NVec3::zeros());
    }
    let mut min = NVec3::repeat(f64::INFINITY);
    let mut max = NVec3::repeat(f64::NEG_INFINITY);
    for p in points {
        min = min.inf(p);
        max = max.sup(p);
    }
    (min, max)
}
