//! Checkerboard partition for lock-free parallel resolution.
//!
//! Active particles are binned along whichever axis has the largest extent.
//! Every bin is at least twice the widest interaction radius in the scene,
//! so a particle in bin `k` can only touch particles in bins `k-1..=k+1`,
//! and bins `k` and `k+2` touch disjoint halves of bin `k+1`. All even bins
//! can therefore run at once, then all odd bins.
//!
//! The interaction radius has to cover everything a resolver may write to:
//! neighbour query radius and the current length of every link. It is
//! measured from the live state each step, never assumed.

use std::marker::PhantomData;
use std::ops::Add;

use rayon::prelude::*;

use crate::simulation::states::Particle;

/// Upper bound on the number of bins; wider bins only strengthen the invariant.
pub const MAX_BINS: usize = 1 << 20;

/// Relative padding so that bins of equal parity never touch at their edges.
const WIDTH_PAD: f64 = 1e-6;

#[derive(Debug, Clone, Default)]
pub struct Checkerboard {
    axis: usize,
    origin: f64,
    bin_width: f64,
    interaction_radius: f64,
    bin_start: Vec<u32>,
    order: Vec<u32>,
    particle_bin: Vec<u32>,
}

impl Checkerboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bin every active particle given the widest interaction radius.
    ///
    /// # Parameters
    /// - `particles`         : Whole particle store; inactive particles are left unbinned.
    /// - `interaction_radius`: Largest distance at which two particles can touch
    ///   each other this step. Bins are at least twice this wide along the
    ///   dominant axis.
    pub fn build(&mut self, particles: &[Particle], interaction_radius: f64) {
        self.bin_start.clear();
        self.order.clear();
        self.particle_bin.clear();

        let mut min = [f64::INFINITY; 3];
        let mut max = [f64::NEG_INFINITY; 3];
        let mut active = 0usize;
        for p in particles.iter().filter(|p| p.state.is_active()) {
            for a in 0..3 {
                min[a] = min[a].min(p.position[a]);
                max[a] = max[a].max(p.position[a]);
            }
            active += 1;
        }
        if active == 0 {
            self.axis = 0;
            self.origin = 0.0;
            self.bin_width = f64::INFINITY;
            self.interaction_radius = interaction_radius;
            self.bin_start.push(0);
            return;
        }

        // dominant axis
        let extents = [max[0] - min[0], max[1] - min[1], max[2] - min[2]];
        let axis = (0..3).fold(0, |best, a| if extents[a] > extents[best] { a } else { best });
        let extent = extents[axis];

        let radius = if interaction_radius.is_finite() { interaction_radius.max(0.0) } else { f64::INFINITY };
        let mut width = 2.0 * radius * (1.0 + WIDTH_PAD) + f64::MIN_POSITIVE;
        if !width.is_finite() || width <= 0.0 {
            width = extent + 1.0;
        }
        if extent / width >= (MAX_BINS - 1) as f64 {
            width = extent / (MAX_BINS - 2) as f64;
        }
        assert!(width >= 2.0 * radius, "checkerboard bin width {width} is below twice the interaction radius {radius}");

        let bins = (extent / width).floor() as usize + 1;
        self.axis = axis;
        self.origin = min[axis];
        self.bin_width = width;
        self.interaction_radius = radius;
        self.bin_start.resize(bins + 1, 0);

        // counting sort by bin, particle ids ascending within a bin
        self.particle_bin.resize(particles.len(), u32::MAX);
        for p in particles.iter().filter(|p| p.state.is_active()) {
            let bin = (((p.position[axis] - self.origin) / width) as usize).min(bins - 1);
            self.particle_bin[p.id] = bin as u32;
            self.bin_start[bin + 1] += 1;
        }
        for b in 0..bins {
            self.bin_start[b + 1] += self.bin_start[b];
        }
        self.order.resize(active, 0);
        let mut cursor = self.bin_start.clone();
        for (id, &bin) in self.particle_bin.iter().enumerate() {
            if bin != u32::MAX {
                let slot = &mut cursor[bin as usize];
                self.order[*slot as usize] = id as u32;
                *slot += 1;
            }
        }
    }

    pub fn axis(&self) -> usize {
        self.axis
    }

    pub fn bin_width(&self) -> f64 {
        self.bin_width
    }

    pub fn interaction_radius(&self) -> f64 {
        self.interaction_radius
    }

    pub fn bin_count(&self) -> usize {
        self.bin_start.len().saturating_sub(1)
    }

    /// Particle ids in bin `k`, ascending.
    pub fn bin(&self, k: usize) -> &[u32] {
        &self.order[self.bin_start[k] as usize..self.bin_start[k + 1] as usize]
    }

    /// Bin of particle `id`, if it was binned.
    pub fn bin_of(&self, id: usize) -> Option<usize> {
        self.particle_bin.get(id).filter(|&&b| b != u32::MAX).map(|&b| b as usize)
    }

    pub fn parity(k: usize) -> usize {
        k % 2
    }

    /// Run `work` on every bin: all even bins in parallel, then all odd bins.
    ///
    /// Per-bin results are summed. Call from inside the worker pool.
    pub fn run<T, F>(&self, work: F) -> T
    where
        T: Send + Default + Add<Output = T>,
        F: Fn(&[u32]) -> T + Sync + Send,
    {
        let mut total = T::default();
        for parity in 0..2 {
            let part = (0..self.bin_count())
                .into_par_iter()
                .filter(|&k| Self::parity(k) == parity)
                .map(|k| work(self.bin(k)))
                .reduce(T::default, |a, b| a + b);
            total = total + part;
        }
        total
    }
}

/// Shared mutable view of the particle array for checkerboard passes.
///
/// Hands out `&mut Particle` from several threads at once. Sound only while
/// the caller keeps every live reference on a distinct particle, which the
/// checkerboard guarantees: concurrently running bins never reach the same
/// particle, and within a bin particles are handled one after another.
pub(crate) struct ParticleCells<'a> {
    base: *mut Particle,
    len: usize,
    _marker: PhantomData<&'a mut [Particle]>,
}

// SAFETY: `Particle` is `Send`; aliasing is excluded by the contract of `get`.
unsafe impl Send for ParticleCells<'_> {}
unsafe impl Sync for ParticleCells<'_> {}

impl<'a> ParticleCells<'a> {
    pub fn new(particles: &'a mut [Particle]) -> Self {
        Self {
            base: particles.as_mut_ptr(),
            len: particles.len(),
            _marker: PhantomData,
        }
    }

    /// # Safety
    ///
    /// No other reference to particle `i` may be live on any thread while the
    /// returned one is.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn get(&self, i: usize) -> &mut Particle {
        assert!(i < self.len, "particle {i} out of range ({})", self.len);
        // SAFETY: in bounds; exclusivity is the caller's obligation.
        unsafe { &mut *self.base.add(i) }
    }
}
