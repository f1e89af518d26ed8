use std::time::Instant;

use crate::configuration::config::{DiskConfig, GroupConfig};
use crate::simulation::barnes_hut::GravityBody;
use crate::simulation::engine::Simulation;
use crate::simulation::error::SimError;
use crate::simulation::forces::{Acceleration, BarnesHutGravity, DirectGravity};
use crate::simulation::params::{GroupParams, SimContext};
use crate::simulation::scenario::group_init;
use crate::simulation::states::NVec3;

/// Helper to build `n` deterministic bodies, no rand needed
fn make_bodies(n: usize) -> Vec<GravityBody> {
    (0..n)
        .map(|i| {
            let i_f = i as f64;
            GravityBody {
                id: i,
                position: NVec3::new((i_f * 0.37).sin() * 5.0, (i_f * 0.13).cos() * 5.0, (i_f * 0.07).sin() * 5.0),
                mass: 1.0,
            }
        })
        .collect()
}

/// Direct O(N²) gravity against the Barnes–Hut tree for growing N.
pub fn bench_gravity() {
    let ns = [200, 400, 800, 1600, 3200, 6400];

    for n in ns {
        let bodies = make_bodies(n);
        let mut out = vec![NVec3::zeros(); n];

        let direct = DirectGravity { g: 0.1, softening: 0.01 };
        let bh = BarnesHutGravity { g: 0.1, softening: 0.01, theta: 0.7 };

        // Warm up
        direct.acceleration(&bodies, &mut out);
        bh.acceleration(&bodies, &mut out);

        let t0 = Instant::now();
        direct.acceleration(&bodies, &mut out);
        let dt_direct = t0.elapsed().as_secs_f64();

        let t1 = Instant::now();
        bh.acceleration(&bodies, &mut out);
        let dt_bh = t1.elapsed().as_secs_f64();

        println!("N = {n:5}, direct = {:8.6} s, BH = {:8.6} s", dt_direct, dt_bh);
    }
}

/// Full step time for a colliding, self-gravitating disk over worker counts.
/// Output is CSV so it can be pasted into a spreadsheet.
pub fn bench_step(n: usize, steps: usize) -> Result<(), SimError> {
    let mut params = GroupParams::default();
    params.collision.self_collision = true;
    params.gravity.active = true;
    params.gravity.initial_rotation = 1.0;

    let group = GroupConfig {
        params,
        bodies: Vec::new(),
        disk: Some(DiskConfig { count: n, radius: 20.0, thickness: 1.0, mass: 1.0, size: 0.05, seed: 3 }),
    };

    println!("workers,ms_per_step");
    let max_workers = std::thread::available_parallelism().map(|p| p.get()).unwrap_or(1);
    let mut workers = 1;
    while workers <= max_workers {
        let ctx = SimContext::new(0.01, workers, 0);
        let mut sim = Simulation::new(ctx, vec![group_init(group.clone())])?;

        // Warm-up one step (also seeds rotation)
        sim.step()?;

        let t0 = Instant::now();
        for _ in 0..steps {
            sim.step()?;
        }
        let ms = t0.elapsed().as_secs_f64() * 1000.0 / steps.max(1) as f64;
        println!("{},{:.3}", workers, ms);

        workers *= 2;
    }
    Ok(())
}
