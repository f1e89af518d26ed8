//! Overlap relaxation pre-pass.
//!
//! Pushes initially overlapping particles apart before a run starts. Works
//! on flat host buffers (`positions` as xyz triples, one radius per
//! particle) and owns its own grid and worker pool, so it can be called
//! without a [`Simulation`](crate::simulation::engine::Simulation).
//!
//! Each iteration is a Jacobi sweep: every particle sums the displacement
//! its overlapping neighbours ask for, reading only the previous positions,
//! and all displacements are applied together.

use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use tracing::debug;

use crate::simulation::error::SimError;
use crate::simulation::spatial_hash::SpatialHash;
use crate::simulation::states::NVec3;

/// Pushes aim slightly past the required separation so pairs leave the
/// overlap band in a bounded number of sweeps.
pub const PUSH_MARGIN: f64 = 1e-3;

/// Squared distances below this count as coincident.
const DEGENERATE_DIST2: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq)]
pub struct RelaxOptions {
    pub max_iterations: usize,
    pub min_separation: f64, // required distance as a multiple of r_i + r_j
    pub strength: f64,       // fraction of the missing gap closed per sweep, (0, 1]
    pub workers: usize,
}

impl Default for RelaxOptions {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            min_separation: 1.001,
            strength: 0.8,
            workers: 4,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelaxReport {
    pub iterations: usize,
    pub initial_overlaps: usize,
    pub final_overlaps: usize,
    pub history: Vec<usize>, // overlap count after each sweep
}

impl RelaxReport {
    pub fn converged(&self) -> bool {
        self.final_overlaps == 0
    }
}

/// Separate overlapping particles in place.
///
/// A pair overlaps when `|p_i - p_j| < min_separation · (r_i + r_j)`.
/// Stops as soon as a sweep finds no overlaps, or after `max_iterations`
/// sweeps.
///
/// # Parameters
/// - `positions`: Flat xyz triples, updated in place.
/// - `radii`    : One radius per particle.
/// - `opts`     : Sweep limit, required separation, step strength and worker count.
///
/// # Returns
/// A [`RelaxReport`] with the overlap counts before, during and after the
/// sweeps, or [`SimError::InvalidArgument`] for mismatched buffers or
/// out-of-range options.
pub fn relax_overlaps(positions: &mut [f64], radii: &[f64], opts: &RelaxOptions) -> Result<RelaxReport, SimError> {
    if positions.len() != radii.len() * 3 {
        return Err(SimError::InvalidArgument("positions must hold three values per radius"));
    }
    if !(opts.strength > 0.0 && opts.strength <= 1.0) {
        return Err(SimError::InvalidArgument("strength must be in (0, 1]"));
    }
    if !(opts.min_separation > 0.0 && opts.min_separation.is_finite()) {
        return Err(SimError::InvalidArgument("min_separation must be positive"));
    }

    let n = radii.len();
    let mut points: Vec<NVec3> = Vec::new();
    let mut shifts: Vec<NVec3> = Vec::new();
    let mut overlaps: Vec<usize> = Vec::new();
    points.try_reserve_exact(n)?;
    shifts.try_reserve_exact(n)?;
    overlaps.try_reserve_exact(n)?;
    points.extend(positions.chunks_exact(3).map(|c| NVec3::new(c[0], c[1], c[2])));
    shifts.resize(n, NVec3::zeros());
    overlaps.resize(n, 0);

    let max_radius = radii.iter().copied().filter(|r| r.is_finite()).fold(0.0, f64::max);
    let reach = 2.0 * max_radius * opts.min_separation * (1.0 + PUSH_MARGIN);

    let pool = ThreadPoolBuilder::new().num_threads(opts.workers.max(1)).build()?;
    let mut grid = SpatialHash::new();
    let mut report = RelaxReport::default();

    pool.install(|| -> Result<(), SimError> {
        let mut count = sweep(&mut grid, &points, radii, reach, opts, &mut shifts, &mut overlaps)?;
        report.initial_overlaps = count;

        while count > 0 && report.iterations < opts.max_iterations {
            points.par_iter_mut().zip(shifts.par_iter()).for_each(|(p, s)| *p += s);
            report.iterations += 1;
            count = sweep(&mut grid, &points, radii, reach, opts, &mut shifts, &mut overlaps)?;
            report.history.push(count);
            debug!(iteration = report.iterations, overlaps = count, "relax sweep");
        }
        report.final_overlaps = count;
        Ok(())
    })?;

    for (c, p) in positions.chunks_exact_mut(3).zip(points.iter()) {
        c.copy_from_slice(p.as_slice());
    }
    Ok(report)
}

/// Rebuild the grid, fill `shifts` with each particle's displacement and
/// return the number of overlapping pairs.
fn sweep(
    grid: &mut SpatialHash,
    points: &[NVec3],
    radii: &[f64],
    reach: f64,
    opts: &RelaxOptions,
    shifts: &mut [NVec3],
    overlaps: &mut [usize],
) -> Result<usize, SimError> {
    grid.build(points, reach)?;
    let grid = &*grid;

    shifts
        .par_iter_mut()
        .zip(overlaps.par_iter_mut())
        .enumerate()
        .for_each(|(i, (shift, count))| {
            *shift = NVec3::zeros();
            *count = 0;
            let p = points[i];
            grid.for_each_nearby(&p, |j| {
                if j == i {
                    return;
                }
                let target = opts.min_separation * (radii[i] + radii[j]);
                let d = p - points[j];
                let dist2 = d.norm_squared();
                if dist2 >= target * target {
                    return;
                }
                if j > i {
                    *count += 1;
                }
                let goal = target * (1.0 + PUSH_MARGIN);
                if dist2 < DEGENERATE_DIST2 {
                    // coincident: split along x by index so the pair separates in one sweep
                    let side = if i < j { -1.0 } else { 1.0 };
                    *shift += NVec3::x() * (side * 0.5 * goal);
                } else {
                    let dist = dist2.sqrt();
                    *shift += d * (0.5 * opts.strength * (goal - dist) / dist);
                }
            });
        });

    Ok(overlaps.iter().sum())
}
