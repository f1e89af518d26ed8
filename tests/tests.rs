use molsim::simulation::barnes_hut::{GravityBody, GravitySolver, Octree, ARENA_FACTOR};
use molsim::simulation::forces::{Acceleration, BarnesHutGravity, DirectGravity};
use molsim::simulation::rotation::center_of_mass;
use molsim::simulation::scenario::disk_bodies;
use molsim::{
    relax_overlaps, seed_rotation, DiskConfig, FrameInput, GroupFrame, GroupInit, GroupParams, Link, NVec3,
    ParticleState, ParticleStore, RelaxOptions, Scenario, ScenarioConfig, SimContext, SimError, Simulation,
    HOST_PARAM_COUNT,
};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Two bodies on the x axis, `dist` apart, centered on the origin
pub fn two_bodies(dist: f64, m1: f64, m2: f64) -> Vec<GravityBody> {
    vec![
        GravityBody { id: 0, position: NVec3::new(-dist / 2.0, 0.0, 0.0), mass: m1 },
        GravityBody { id: 1, position: NVec3::new(dist / 2.0, 0.0, 0.0), mass: m2 },
    ]
}

/// `n` bodies with random positions in a cube of half-width `half` and masses in [0.5, 2)
pub fn random_bodies(n: usize, half: f64, seed: u64) -> Vec<GravityBody> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..n)
        .map(|id| GravityBody {
            id,
            position: NVec3::new(rng.gen_range(-half..half), rng.gen_range(-half..half), rng.gen_range(-half..half)),
            mass: rng.gen_range(0.5..2.0),
        })
        .collect()
}

/// Gravity-only group parameters
pub fn gravity_params(g: f64, softening: f64, theta: f64) -> GroupParams {
    let mut p = GroupParams::default();
    p.gravity.active = true;
    p.gravity.strength = g;
    p.gravity.softening = softening;
    p.gravity.theta = theta;
    p
}

/// Alive particles at rest with the given positions, radius and mass
pub fn group(params: GroupParams, positions: &[NVec3], size: f64, mass: f64) -> GroupInit {
    let n = positions.len();
    GroupInit {
        params,
        positions: positions.iter().flat_map(|p| [p.x, p.y, p.z]).collect(),
        velocities: vec![0.0; n * 3],
        sizes: vec![size; n],
        masses: vec![mass; n],
        states: vec![ParticleState::Alive; n],
    }
}

/// Jittered cubic lattice of `side³` points
pub fn lattice(side: usize, spacing: f64, jitter: f64, seed: u64) -> Vec<NVec3> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut out = Vec::with_capacity(side * side * side);
    for x in 0..side {
        for y in 0..side {
            for z in 0..side {
                let j = NVec3::new(rng.gen_range(-jitter..=jitter), rng.gen_range(-jitter..=jitter), rng.gen_range(-jitter..=jitter));
                out.push(NVec3::new(x as f64, y as f64, z as f64) * spacing + j);
            }
        }
    }
    out
}

fn accels(term: &impl Acceleration, bodies: &[GravityBody]) -> Vec<NVec3> {
    let mut out = vec![NVec3::zeros(); bodies.len()];
    term.acceleration(bodies, &mut out);
    out
}

fn mean_relative_error(approx: &[NVec3], exact: &[NVec3]) -> f64 {
    let sum: f64 = approx.iter().zip(exact).map(|(a, e)| (a - e).norm() / e.norm()).sum();
    sum / exact.len() as f64
}

// ==================================================================================
// Gravity tests
// ==================================================================================

#[test]
fn gravity_newton_third_law() {
    let bodies = two_bodies(1.0, 2.0, 3.0);
    let acc = accels(&DirectGravity { g: 0.1, softening: 0.0 }, &bodies);

    let net = acc[0] * bodies[0].mass + acc[1] * bodies[1].mass;
    assert!(net.norm() < 1e-12, "Net momentum not zero: {:?}", net);
}

#[test]
fn gravity_points_toward_other_body() {
    let bodies = two_bodies(2.0, 1.0, 1.0);
    let acc = accels(&DirectGravity { g: 0.1, softening: 0.0 }, &bodies);

    let dx = bodies[1].position - bodies[0].position;
    assert!(acc[0].dot(&dx) > 0.0, "Acceleration is not toward second body");
    assert!(acc[1].dot(&dx) < 0.0, "Acceleration is not toward first body");
}

#[test]
fn gravity_inverse_square_law() {
    let term = DirectGravity { g: 0.1, softening: 0.0 };
    let acc_r = accels(&term, &two_bodies(1.0, 1.0, 1.0));
    let acc_2r = accels(&term, &two_bodies(2.0, 1.0, 1.0));

    let ratio = acc_r[0].norm() / acc_2r[0].norm();
    assert!((ratio - 4.0).abs() < 1e-3, "Expected ~4x, got {}", ratio);
}

#[test]
fn gravity_softening_prevents_blowup() {
    let acc = accels(&DirectGravity { g: 0.1, softening: 0.3 }, &two_bodies(1e-9, 1.0, 1.0));
    assert!(acc[0].norm() < 1e9, "Softening failed; acceleration too large");
}

#[test]
fn two_body_step_changes_velocity_toward_partner() {
    let (m1, m2, d, eps, g, dt) = (1.0, 2.0, 10.0, 0.01, 1.0, 0.01);
    let params = gravity_params(g, eps, 0.5);

    let init = GroupInit {
        params,
        positions: vec![-d / 2.0, 0.0, 0.0, d / 2.0, 0.0, 0.0],
        velocities: vec![0.0; 6],
        sizes: vec![0.1, 0.1],
        masses: vec![m1, m2],
        states: vec![ParticleState::Alive; 2],
    };
    let mut sim = Simulation::new(SimContext::new(dt, 2, 0), vec![init]).unwrap();
    let stats = sim.step().unwrap();
    assert_eq!(stats.octree.map(|o| o.inserted), Some(2));

    let p = sim.particles();
    let expected_1 = g * m2 / (d * d + eps * eps) * dt;
    let expected_2 = g * m1 / (d * d + eps * eps) * dt;

    assert!(p[0].velocity.x > 0.0 && p[1].velocity.x < 0.0, "bodies must move toward each other");
    assert!((p[0].velocity.norm() - expected_1).abs() / expected_1 < 1e-4, "dv1 = {}", p[0].velocity.norm());
    assert!((p[1].velocity.norm() - expected_2).abs() / expected_2 < 1e-4, "dv2 = {}", p[1].velocity.norm());
    assert!(p[0].velocity.yz().norm() < 1e-15);

    let momentum = p[0].velocity * m1 + p[1].velocity * m2;
    assert!(momentum.norm() < 1e-12);
}

#[test]
fn massless_particle_feels_no_gravity() {
    let init = GroupInit {
        params: gravity_params(1.0, 0.01, 0.5),
        positions: vec![0.0, 0.0, 0.0, 10.0, 0.0, 0.0],
        velocities: vec![0.0; 6],
        sizes: vec![0.1, 0.1],
        masses: vec![5.0, 0.0],
        states: vec![ParticleState::Alive; 2],
    };
    let mut sim = Simulation::new(SimContext::new(0.1, 2, 0), vec![init]).unwrap();
    let stats = sim.step().unwrap();
    assert_eq!(stats.octree.map(|o| o.inserted), Some(1));

    let p = sim.particles();
    assert_eq!(p[1].velocity, NVec3::zeros(), "massless particle was kicked");
    assert_eq!(p[0].velocity, NVec3::zeros());
    assert_eq!(p[1].position, NVec3::new(10.0, 0.0, 0.0));
}

// ==================================================================================
// Barnes-Hut tests
// ==================================================================================

#[test]
fn barnes_hut_matches_direct_as_theta_goes_to_zero() {
    let bodies = random_bodies(300, 10.0, 21);
    let exact = accels(&DirectGravity { g: 1.0, softening: 0.01 }, &bodies);

    let mut tree = Octree::new();
    let stats = tree.build(&bodies, 64 * bodies.len());
    assert_eq!(stats.dropped, 0);

    for (b, e) in bodies.iter().zip(&exact) {
        let a = tree.acceleration(b.id, &b.position, 1.0, 0.01, 1e-3);
        let rel = (a - e).norm() / e.norm();
        assert!(rel < 1e-3, "body {} relative error {}", b.id, rel);
    }
}

#[test]
fn barnes_hut_error_grows_with_theta() {
    let thetas = [0.0, 0.25, 0.5, 0.75, 1.0];
    let mut errors = [0.0; 5];

    for seed in 0..5 {
        let bodies = random_bodies(400, 10.0, 100 + seed);
        let exact = accels(&DirectGravity { g: 1.0, softening: 0.01 }, &bodies);
        for (k, &theta) in thetas.iter().enumerate() {
            let approx = accels(&BarnesHutGravity { g: 1.0, softening: 0.01, theta }, &bodies);
            errors[k] += mean_relative_error(&approx, &exact) / 5.0;
        }
    }

    assert!(errors[0] < 1e-9, "theta = 0 should be exact, got {}", errors[0]);
    for k in 1..thetas.len() {
        assert!(errors[k] + 1e-12 >= errors[k - 1], "error dropped between theta {} and {}: {:?}", thetas[k - 1], thetas[k], errors);
    }
    assert!(errors[4] > errors[0]);
}

#[test]
fn root_holds_total_mass_and_center_of_mass() {
    let bodies = random_bodies(100, 5.0, 9);
    let mut tree = Octree::new();
    tree.build(&bodies, 8 * bodies.len());

    let total: f64 = bodies.iter().map(|b| b.mass).sum();
    let com = bodies.iter().fold(NVec3::zeros(), |acc, b| acc + b.position * b.mass) / total;

    let root = tree.root().unwrap();
    assert!((root.mass - total).abs() < 1e-9);
    assert!((root.com - com).norm() < 1e-9);
}

#[test]
fn exhausted_arena_is_reported_not_fatal() {
    let bodies = random_bodies(50, 5.0, 2);
    let mut tree = Octree::new();
    let stats = tree.build(&bodies, 3);

    assert!(stats.capacity_exceeded());
    assert!(stats.dropped > 0);
    assert_eq!(stats.inserted + stats.dropped, 50);
    assert!(tree.nodes().len() <= 3);

    // ancestors visited before the arena ran out still carry the mass
    let total: f64 = bodies.iter().map(|b| b.mass).sum();
    assert!((tree.root().unwrap().mass - total).abs() < 1e-9);
}

#[test]
fn solver_grows_arena_until_every_body_fits() {
    // a near-coincident pair far from a third body needs a deep, narrow tree
    let bodies = vec![
        GravityBody { id: 0, position: NVec3::new(0.0, 0.0, 0.0), mass: 1.0 },
        GravityBody { id: 1, position: NVec3::new(1e-6, 1e-6, 1e-6), mass: 1.0 },
        GravityBody { id: 2, position: NVec3::new(1000.0, 1000.0, 1000.0), mass: 1.0 },
    ];
    let mut solver = GravitySolver::new();
    let stats = solver.build_bodies(&bodies);

    assert_eq!(stats.dropped, 0);
    assert_eq!(stats.inserted, 3);
    assert!(solver.arena_factor() > ARENA_FACTOR);
}

#[test]
fn coincident_bodies_terminate_at_depth_cap() {
    let bodies: Vec<GravityBody> =
        (0..5).map(|id| GravityBody { id, position: NVec3::new(1.0, 2.0, 3.0), mass: 1.0 }).collect();
    let mut tree = Octree::new();
    let stats = tree.build(&bodies, 1000);
    assert_eq!(stats.dropped, 0);

    let a = tree.acceleration(0, &bodies[0].position, 1.0, 0.01, 0.5);
    assert!(a.iter().all(|c| c.is_finite()));
}

// ==================================================================================
// Rotation seeding tests
// ==================================================================================

#[test]
fn seeded_speed_follows_enclosed_mass() {
    let disk = DiskConfig { count: 400, radius: 10.0, thickness: 0.0, mass: 1.0, size: 0.05, seed: 17 };
    let bodies = disk_bodies(&disk);

    let mut params = gravity_params(1.0, 0.01, 0.5);
    params.gravity.initial_rotation = 0.8;
    params.gravity.rotation_falloff = 0.3;

    let mut store = ParticleStore::new();
    store.push_group(bodies.iter().map(|b| {
        (NVec3::from(b.x), NVec3::zeros(), b.radius, b.m, ParticleState::Alive)
    }));
    let mut ctx = SimContext::new(0.01, 1, 0);

    let center = center_of_mass(store.particles.iter());
    let planar = |p: &NVec3| {
        let d = p - center;
        (d.x * d.x + d.y * d.y).sqrt()
    };
    let radii: Vec<f64> = store.particles.iter().map(|p| planar(&p.position)).collect();
    let r_max = radii.iter().copied().fold(0.0, f64::max);
    let r_core = 0.3 * r_max;

    let seeded = seed_rotation(&mut ctx, &mut store.particles, &[params.clone()]);
    assert_eq!(seeded, 400);
    assert!(ctx.rotation_seeded);

    for (p, &r) in store.particles.iter().zip(&radii) {
        let enclosed: f64 = radii.iter().filter(|&&q| q <= r).count() as f64;
        let speed = 0.8 * (1.0 * enclosed / (r * r + r_core * r_core).sqrt()).sqrt();
        let d = p.position - center;
        let expected = NVec3::new(-d.y, d.x, 0.0) * (speed / r);
        assert!((p.velocity - expected).norm() <= 1e-9 * speed.max(1.0), "particle {} off the rotation curve", p.id);
    }

    // a second call is a no-op
    let before: Vec<NVec3> = store.particles.iter().map(|p| p.velocity).collect();
    assert_eq!(seed_rotation(&mut ctx, &mut store.particles, &[params]), 0);
    for (p, v) in store.particles.iter().zip(&before) {
        assert_eq!(p.velocity, *v);
    }
}

#[test]
fn rotation_is_seeded_once_per_run() {
    let disk = DiskConfig { count: 50, radius: 5.0, thickness: 0.0, mass: 1.0, size: 0.05, seed: 3 };
    let mut params = gravity_params(1.0, 0.01, 0.5);
    params.gravity.initial_rotation = 1.0;
    params.gravity.active = false; // no kicks, so velocity only changes through seeding
    let positions: Vec<NVec3> = disk_bodies(&disk).iter().map(|b| NVec3::from(b.x)).collect();

    let mut sim = Simulation::new(SimContext::new(0.01, 2, 0), vec![group(params, &positions, 0.05, 1.0)]).unwrap();
    sim.step().unwrap();
    assert!(sim.context().rotation_seeded);
    // gravity off for the group: nothing to seed
    assert!(sim.particles().iter().all(|p| p.velocity == NVec3::zeros()));

    let mut params = gravity_params(1e-6, 0.01, 0.5);
    params.gravity.initial_rotation = 1.0;
    let mut sim = Simulation::new(SimContext::new(1e-9, 2, 0), vec![group(params, &positions, 0.05, 1.0)]).unwrap();
    sim.step().unwrap();
    let after_first: Vec<f64> = sim.particles().iter().map(|p| p.velocity.norm()).collect();
    sim.step().unwrap();
    sim.step().unwrap();
    for (p, v) in sim.particles().iter().zip(&after_first) {
        // later steps add only a tiny gravity kick, never a second rotation
        assert!((p.velocity.norm() - v).abs() < 1e-6 * v.max(1.0));
    }
}

// ==================================================================================
// Overlap relaxation tests
// ==================================================================================

#[test]
fn relaxation_separates_overlapping_pairs() {
    let mut rng = ChaCha8Rng::seed_from_u64(5);
    let mut positions = Vec::new();
    let sites = lattice(5, 1.0, 0.0, 0);
    for s in &sites {
        let dir = NVec3::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0)).normalize();
        let q = s + dir * 0.1;
        positions.extend_from_slice(&[s.x, s.y, s.z, q.x, q.y, q.z]);
    }
    let radii = vec![0.1; sites.len() * 2];

    let opts = RelaxOptions { max_iterations: 50, min_separation: 1.001, strength: 0.8, workers: 3 };
    let report = relax_overlaps(&mut positions, &radii, &opts).unwrap();

    assert_eq!(report.initial_overlaps, sites.len());
    assert_eq!(report.final_overlaps, 0);
    assert!(report.converged());
    assert!(report.iterations <= 50);
    assert_eq!(report.history.len(), report.iterations);

    for i in 0..radii.len() {
        for j in (i + 1)..radii.len() {
            let a = NVec3::new(positions[3 * i], positions[3 * i + 1], positions[3 * i + 2]);
            let b = NVec3::new(positions[3 * j], positions[3 * j + 1], positions[3 * j + 2]);
            assert!((a - b).norm() >= 1.001 * 0.2);
        }
    }
}

#[test]
fn relaxation_converges_for_sparse_random_cloud() {
    let mut rng = ChaCha8Rng::seed_from_u64(8);
    let n = 200;
    let mut positions: Vec<f64> = (0..n * 3).map(|_| rng.gen_range(0.0..5.0)).collect();
    let radii: Vec<f64> = (0..n).map(|_| rng.gen_range(0.05..0.15)).collect();

    let report = relax_overlaps(&mut positions, &radii, &RelaxOptions { max_iterations: 50, ..Default::default() }).unwrap();
    assert_eq!(report.final_overlaps, 0);
    assert!(report.iterations <= 50);
}

#[test]
fn coincident_particles_separate_every_iteration() {
    let k = 6;
    let mut positions = vec![0.0; k * 3];
    let radii = vec![0.5; k];

    let opts = RelaxOptions { max_iterations: 50, min_separation: 1.0, strength: 0.8, workers: 2 };
    let report = relax_overlaps(&mut positions, &radii, &opts).unwrap();

    assert_eq!(report.initial_overlaps, k * (k - 1) / 2);
    let mut previous = report.initial_overlaps;
    for &count in &report.history {
        assert!(count < previous || count == 0, "overlaps went from {previous} to {count}");
        previous = count;
    }
    assert_eq!(report.final_overlaps, 0);
}

#[test]
fn relaxation_rejects_bad_arguments() {
    let mut positions = vec![0.0; 6];
    let radii = vec![0.5; 2];

    let bad_strength = RelaxOptions { strength: 1.5, ..Default::default() };
    assert!(matches!(relax_overlaps(&mut positions, &radii, &bad_strength), Err(SimError::InvalidArgument(_))));

    let bad_separation = RelaxOptions { min_separation: 0.0, ..Default::default() };
    assert!(matches!(relax_overlaps(&mut positions, &radii, &bad_separation), Err(SimError::InvalidArgument(_))));

    assert!(matches!(relax_overlaps(&mut positions, &radii[..1], &RelaxOptions::default()), Err(SimError::InvalidArgument(_))));
}

// ==================================================================================
// Collision and link tests
// ==================================================================================

fn granular_params() -> GroupParams {
    let mut p = GroupParams::default();
    p.collision.self_collision = true;
    p.collision.damping = 0.1;
    p.links.active = true;
    p.links.length = 1.0;
    p.links.max = 6;
    p.links.expansion.broken = 0.05;
    p.links.compression.broken = 0.05;
    p.relink.chance = 50.0;
    p.relink.max = 6;
    p
}

fn run_granular(workers: usize, steps: usize) -> (Vec<(u64, u64)>, Simulation) {
    let positions = lattice(9, 0.18, 0.03, 42);
    let mut sim = Simulation::new(SimContext::new(0.02, workers, 7), vec![group(granular_params(), &positions, 0.1, 1.0)]).unwrap();
    let tallies = (0..steps)
        .map(|_| {
            let s = sim.step().unwrap();
            (s.new_links, s.dead_links)
        })
        .collect();
    (tallies, sim)
}

#[test]
fn worker_count_does_not_change_link_outcomes() {
    let (serial, serial_sim) = run_granular(1, 4);
    let (parallel, parallel_sim) = run_granular(4, 4);

    assert!(serial[0].0 > 0, "scene should form initial links");
    assert_eq!(serial, parallel);
    assert_eq!(serial_sim.store().link_count(), parallel_sim.store().link_count());
    for (a, b) in serial_sim.particles().iter().zip(parallel_sim.particles()) {
        assert!((a.position - b.position).norm() < 1e-12);
    }
}

#[test]
fn link_counts_stay_consistent() {
    let (tallies, sim) = run_granular(3, 5);
    let created: u64 = tallies.iter().map(|t| t.0).sum();
    let destroyed: u64 = tallies.iter().map(|t| t.1).sum();

    assert_eq!(created - destroyed, sim.store().link_count() as u64);
    assert_eq!(sim.context().total_new_links, created);
    assert_eq!(sim.context().total_dead_links, destroyed);
    for p in sim.particles() {
        assert!(p.link_count() <= 6);
    }
}

fn spring(start: usize, end: usize, rest_length: f64, broken: f64) -> Link {
    Link {
        start,
        end,
        rest_length,
        friction: 0.0,
        stiffness: 1.0,
        exponent: 1,
        damping: 0.0,
        broken,
        e_stiffness: 1.0,
        e_exponent: 1,
        e_damping: 0.0,
        e_broken: broken,
    }
}

#[test]
fn overstretched_link_breaks_once() {
    let positions = [NVec3::zeros(), NVec3::new(2.0, 0.0, 0.0)];
    let mut sim = Simulation::new(SimContext::new(0.01, 2, 0), vec![group(GroupParams::default(), &positions, 0.1, 1.0)]).unwrap();
    assert!(sim.store_mut().add_link(spring(0, 1, 1.0, 0.1)));
    assert!(!sim.store_mut().add_link(spring(1, 0, 1.0, 0.1)), "pair is already linked");
    assert!(!sim.store_mut().add_link(spring(0, 7, 1.0, 0.1)), "unknown id");
    assert!(!sim.store_mut().add_link(spring(9, 1, 1.0, 0.1)), "unknown id");
    assert_eq!(sim.store().link_count(), 1);

    let stats = sim.step().unwrap();
    assert_eq!(stats.dead_links, 1);
    assert_eq!(stats.live_links, 0);
    assert_eq!(sim.particles()[0].link_count(), 0);
    assert_eq!(sim.particles()[1].link_count(), 0);
}

#[test]
fn stretched_link_pulls_particles_together() {
    let positions = [NVec3::zeros(), NVec3::new(1.2, 0.0, 0.0)];
    let mut sim = Simulation::new(SimContext::new(0.01, 1, 0), vec![group(GroupParams::default(), &positions, 0.1, 1.0)]).unwrap();
    sim.store_mut().add_link(spring(0, 1, 1.0, 0.5));

    let stats = sim.step().unwrap();
    assert_eq!(stats.dead_links, 0);
    let p = sim.particles();
    assert!(p[0].velocity.x > 0.0 && p[1].velocity.x < 0.0);
}

#[test]
fn link_to_dead_particle_is_pruned() {
    let positions = [NVec3::zeros(), NVec3::new(1.0, 0.0, 0.0)];
    let mut init = group(GroupParams::default(), &positions, 0.1, 1.0);
    init.states[1] = ParticleState::Dead;
    let mut sim = Simulation::new(SimContext::new(0.01, 1, 0), vec![init]).unwrap();
    sim.store_mut().add_link(spring(0, 1, 1.0, 0.5));

    let stats = sim.step().unwrap();
    assert_eq!(stats.dead_links, 1);
    assert_eq!(sim.store().link_count(), 0);
}

#[test]
fn contact_relinks_up_to_the_limit() {
    let mut params = GroupParams::default();
    params.collision.self_collision = true;
    params.relink.chance = 100.0;
    params.relink.max = 1;

    let pair = [NVec3::zeros(), NVec3::new(0.15, 0.0, 0.0)];
    let mut sim = Simulation::new(SimContext::new(0.01, 2, 0), vec![group(params.clone(), &pair, 0.1, 1.0)]).unwrap();
    let stats = sim.step().unwrap();
    assert_eq!(stats.new_links, 1);
    assert_eq!(stats.live_links, 1);

    params.relink.max = 2;
    let cluster = lattice(3, 0.12, 0.01, 4);
    let mut sim = Simulation::new(SimContext::new(0.01, 2, 0), vec![group(params, &cluster, 0.1, 1.0)]).unwrap();
    let stats = sim.step().unwrap();
    assert!(stats.new_links > 0);
    assert!(stats.new_links <= (cluster.len() * 2 / 2) as u64);
    for p in sim.particles() {
        assert!(p.link_count() <= 2);
    }
}

#[test]
fn overlapping_pair_is_pushed_apart() {
    let mut params = GroupParams::default();
    params.collision.self_collision = true;
    let pair = [NVec3::zeros(), NVec3::new(0.1, 0.0, 0.0)];
    let mut sim = Simulation::new(SimContext::new(0.01, 1, 0), vec![group(params, &pair, 0.1, 1.0)]).unwrap();

    sim.step().unwrap();
    let p = sim.particles();
    assert!(p[0].velocity.x < 0.0 && p[1].velocity.x > 0.0);
    assert!((p[1].position.x - p[0].position.x) > 0.1);
}

#[test]
fn disabled_collision_leaves_pair_alone() {
    let pair = [NVec3::zeros(), NVec3::new(0.1, 0.0, 0.0)];
    let mut sim = Simulation::new(SimContext::new(0.01, 1, 0), vec![group(GroupParams::default(), &pair, 0.1, 1.0)]).unwrap();
    sim.step().unwrap();
    assert!(sim.particles().iter().all(|p| p.velocity == NVec3::zeros()));
}

// ==================================================================================
// Host interface tests
// ==================================================================================

#[test]
fn host_array_maps_to_group_params() {
    let mut p = vec![0.0; HOST_PARAM_COUNT];
    p[0] = 1.0; // self collision
    p[3] = 0.2; // friction
    p[5] = 1.0; // links active
    p[7] = 4.0; // link max
    p[12] = 2.0; // compression exponent
    p[25] = 30.0; // relink chance
    p[31] = 3.0; // relink compression exponent
    p[32] = 0.4; // relink compression stiffness variance
    p[47] = 1.0; // relative link length
    p[49] = 0.5; // adhesion factor
    p[50] = 1.0; // gravity
    p[52] = 0.7; // theta
    p[54] = -1.0; // initial rotation

    let g = GroupParams::from_host_array(&p).unwrap();
    assert!(g.collision.self_collision && !g.collision.other_collision);
    assert_eq!(g.collision.friction, 0.2);
    assert!(g.links.active && g.links.relative_length);
    assert_eq!(g.links.max, 4);
    assert_eq!(g.links.compression.exponent, 2);
    assert_eq!(g.relink.chance, 30.0);
    assert_eq!(g.relink.compression.exponent, 3);
    assert_eq!(g.relink.compression.stiffness_rand, 0.4);
    assert_eq!(g.collision.adhesion_factor, 0.5);
    assert!(g.gravity.active);
    assert_eq!(g.gravity.theta, 0.7);
    assert_eq!(g.gravity.initial_rotation, -1.0);

    assert!(matches!(
        GroupParams::from_host_array(&p[..40]),
        Err(SimError::HostParams { expected: HOST_PARAM_COUNT, found: 40 })
    ));
}

#[test]
fn host_state_codes_round_trip() {
    for code in 0..4u8 {
        assert_eq!(ParticleState::from_code(code).code(), code);
    }
    assert_eq!(ParticleState::from_code(9), ParticleState::Dead);
    assert!(ParticleState::from_code(2).is_active());
    assert!(!ParticleState::from_code(3).is_active());
}

#[test]
fn mismatched_buffers_are_rejected() {
    let mut init = group(GroupParams::default(), &[NVec3::zeros(), NVec3::x()], 0.1, 1.0);
    init.positions.pop();
    assert!(matches!(
        Simulation::new(SimContext::new(0.01, 1, 0), vec![init]),
        Err(SimError::FrameShape { group: 0, field: "positions", expected: 6, found: 5 })
    ));

    let init = group(GroupParams::default(), &[NVec3::zeros(), NVec3::x()], 0.1, 1.0);
    let mut sim = Simulation::new(SimContext::new(0.01, 1, 0), vec![init]).unwrap();
    assert!(matches!(sim.ingest(&FrameInput { groups: vec![] }), Err(SimError::GroupCount { expected: 1, found: 0 })));

    let short = FrameInput {
        groups: vec![GroupFrame { positions: vec![0.0; 6], velocities: vec![0.0; 6], states: vec![ParticleState::Alive] }],
    };
    assert!(matches!(sim.ingest(&short), Err(SimError::FrameShape { field: "states", .. })));
}

#[test]
fn step_frame_moves_only_alive_particles() {
    let init = group(GroupParams::default(), &[NVec3::zeros(), NVec3::new(5.0, 0.0, 0.0)], 0.1, 1.0);
    let mut sim = Simulation::new(SimContext::new(0.5, 2, 0), vec![init]).unwrap();

    let frame = FrameInput {
        groups: vec![GroupFrame {
            positions: vec![0.0, 0.0, 0.0, 5.0, 0.0, 0.0],
            velocities: vec![1.0, 0.0, 0.0, 1.0, 0.0, 0.0],
            states: vec![ParticleState::Alive, ParticleState::Dying],
        }],
    };
    let out = sim.step_frame(&frame).unwrap();

    assert_eq!(out.groups.len(), 1);
    assert_eq!(out.groups[0].positions, vec![0.5, 0.0, 0.0, 5.0, 0.0, 0.0]);
    assert_eq!(out.groups[0].velocities, vec![1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);
    assert_eq!(out.stats.octree, None);
    assert_eq!(sim.context().step, 1);
}

#[test]
fn scenario_builds_from_yaml() {
    let yaml = r#"
engine:
  threads: 2
  dt: 0.01
  steps: 3
  seed: 7
  relax:
    iterations: 20
groups:
  - params:
      gravity:
        active: true
        initial_rotation: 1.0
    disk:
      count: 120
      radius: 5.0
      thickness: 0.2
      mass: 1.0
      size: 0.05
      seed: 1
  - params:
      collision:
        self_collision: true
    bodies:
      - x: [0.0, 0.0, 3.0]
        m: 1.0
        radius: 0.2
"#;
    let cfg: ScenarioConfig = serde_yaml::from_str(yaml).unwrap();
    let mut scenario = Scenario::build_scenario(cfg).unwrap();

    assert_eq!(scenario.steps, 3);
    assert_eq!(scenario.simulation.particles().len(), 121);
    assert_eq!(scenario.simulation.groups()[0].collision.friction, 0.005);

    let opts = scenario.relax.clone().unwrap();
    assert_eq!(opts.max_iterations, 20);
    assert_eq!(opts.strength, 0.8);
    scenario.simulation.relax(&opts).unwrap();

    for _ in 0..scenario.steps {
        scenario.simulation.step().unwrap();
    }
    assert!(scenario.simulation.context().rotation_seeded);
    assert_eq!(scenario.simulation.context().step, 3);
}
