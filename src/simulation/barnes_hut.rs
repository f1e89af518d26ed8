//! # Barnes–Hut Octree (3D)
//!
//! This module implements a **3D Barnes–Hut octree** for approximating
//! gravitational acceleration over every massive particle. It replaces the
//! naive `O(N²)` all-pairs sum with an approximate `O(N log N)` walk.
//!
//! ## Core Concepts
//!
//! A group of distant bodies is treated as a single pseudo-body located at
//! its center of mass. For sufficiently far clusters one interaction is far
//! cheaper than many.
//!
//! - Space is recursively subdivided into 8 octants.
//! - Each region becomes a node of the octree.
//! - A leaf holds at most one body; a second arrival pushes the resident
//!   one level down and both continue from there.
//! - Each node stores:
//!   - its cube (`center`, `half_size`)
//!   - total mass of its subtree
//!   - center of mass (COM)
//!
//! ## Arena
//!
//! Nodes live in a `Vec` whose capacity is fixed before the build, and
//! children are indices into it. Nothing outlives the build; the next step
//! clears the vector and starts over.
//!
//! If the arena runs out mid-insert the body is dropped from the tree (its
//! mass still counts in the ancestors already visited) and the build carries
//! on. `OctreeStats::dropped` reports how many bodies were affected;
//! [`GravitySolver`] reacts by doubling the arena and rebuilding.

use tracing::warn;

use crate::simulation::params::GroupParams;
use crate::simulation::states::{NVec3, Particle};

/// Safety bound on tree depth for coincident or near-coincident bodies.
pub const MAX_DEPTH: usize = 50;

/// Default arena size as a multiple of the body count.
pub const ARENA_FACTOR: usize = 2;

/// Largest arena multiple the solver will grow to.
pub const MAX_ARENA_FACTOR: usize = 64;

/// Minimal body record the tree is built from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GravityBody {
    pub id: usize,
    pub position: NVec3,
    pub mass: f64,
}

/// A single octree node.
///
/// A node is either
/// - an empty leaf (`is_leaf`, `body == None`),
/// - an occupied leaf (`is_leaf`, `body == Some(id)`), or
/// - internal (`!is_leaf`) with up to 8 allocated children.
///
/// An occupied leaf at `MAX_DEPTH` may aggregate several coincident bodies;
/// `body` then names the first one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OctreeNode {
    pub center: NVec3,
    pub half_size: f64,
    pub mass: f64,
    pub com: NVec3,
    pub is_leaf: bool,
    pub children: [Option<u32>; 8],
    pub body: Option<u32>,
}

impl OctreeNode {
    fn leaf(center: NVec3, half_size: f64) -> Self {
        Self {
            center,
            half_size,
            mass: 0.0,
            com: NVec3::zeros(),
            is_leaf: true,
            children: [None; 8],
            body: None,
        }
    }

    /// Running-mean update: `com' = (com·m + p·mp) / (m + mp)`.
    fn accumulate(&mut self, position: &NVec3, mass: f64) {
        let total = self.mass + mass;
        if total > 0.0 {
            self.com = (self.com * self.mass + position * mass) / total;
        }
        self.mass = total;
    }

    /// Edge length of the node's cube.
    pub fn size(&self) -> f64 {
        2.0 * self.half_size
    }
}

/// Outcome of one tree build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OctreeStats {
    pub inserted: usize,
    pub dropped: usize,
    pub nodes: usize,
    pub capacity: usize,
}

impl OctreeStats {
    pub fn capacity_exceeded(&self) -> bool {
        self.dropped > 0
    }
}

#[derive(Debug, Clone, Default)]
pub struct Octree {
    nodes: Vec<OctreeNode>,
    capacity: usize,
}

impl Octree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nodes(&self) -> &[OctreeNode] {
        &self.nodes
    }

    pub fn root(&self) -> Option<&OctreeNode> {
        self.nodes.first()
    }

    /// Build the tree over `bodies` using at most `capacity` nodes.
    ///
    /// This:
    /// 1. Computes a cubic bounding volume around all bodies.
    /// 2. Creates the root node covering it.
    /// 3. Inserts bodies one at a time, updating mass and COM on every node
    ///    visited on the way down (no separate bottom-up pass).
    ///
    /// # Parameters
    /// - `bodies`  : Bodies to insert; `id` is what [`Octree::acceleration`] skips as self.
    /// - `capacity`: Upper bound on the node arena for this build.
    ///
    /// # Returns
    /// [`OctreeStats`] for the build. A nonzero `dropped` means the arena ran
    /// out and the tree under-represents the mass; the caller decides whether
    /// to rebuild with more room.
    pub fn build(&mut self, bodies: &[GravityBody], capacity: usize) -> OctreeStats {
        self.nodes.clear();
        self.capacity = capacity.max(1);
        if self.nodes.capacity() < self.capacity {
            self.nodes.reserve(self.capacity - self.nodes.len());
        }

        let mut stats = OctreeStats { capacity: self.capacity, ..Default::default() };
        if bodies.is_empty() {
            return stats;
        }

        let (center, half) = bounding_cube(bodies);
        self.nodes.push(OctreeNode::leaf(center, half));

        for body in bodies {
            if self.insert(body) {
                stats.inserted += 1;
            } else {
                stats.dropped += 1;
            }
        }
        stats.nodes = self.nodes.len();
        stats
    }

    /// Net gravitational acceleration at `position` for body `target`.
    ///
    /// - Leaves are summed directly, except the leaf holding `target`.
    /// - Internal nodes whose `size / distance < theta` are taken as a point
    ///   mass at their COM; otherwise the walk descends into their children.
    /// - `softening` is ε (not squared): `a += G·m·r / (|r|² + ε²)^{3/2}`.
    ///
    /// Read-only, so any number of particles can be evaluated concurrently.
    pub fn acceleration(&self, target: usize, position: &NVec3, g: f64, softening: f64, theta: f64) -> NVec3 {
        let mut acc = NVec3::zeros();
        if !self.nodes.is_empty() {
            self.walk(0, target as u32, position, softening * softening, theta, 0, &mut acc);
        }
        acc * g
    }

    // helpers ==============================================================================

    fn alloc(&mut self, node: OctreeNode) -> Option<u32> {
        if self.nodes.len() >= self.capacity {
            return None;
        }
        self.nodes.push(node);
        Some((self.nodes.len() - 1) as u32)
    }

    /// Insert one body; false if the arena ran out before it reached a leaf.
    fn insert(&mut self, body: &GravityBody) -> bool {
        let mut idx = 0usize;
        let mut depth = 0usize;

        loop {
            let before = self.nodes[idx];
            self.nodes[idx].accumulate(&body.position, body.mass);

            if before.is_leaf {
                let Some(resident) = before.body else {
                    // empty leaf: store the body here
                    self.nodes[idx].body = Some(body.id as u32);
                    return true;
                };
                if depth >= MAX_DEPTH {
                    // coincident bodies: keep aggregating in this leaf
                    return true;
                }

                // occupied leaf: push the resident body one level down.
                // A single-body leaf's COM is that body's position.
                let octant = octant_of(&before.center, &before.com);
                let mut child = OctreeNode::leaf(child_center(&before.center, before.half_size, octant), before.half_size * 0.5);
                child.accumulate(&before.com, before.mass);
                child.body = Some(resident);
                let Some(child_idx) = self.alloc(child) else {
                    return false;
                };
                let node = &mut self.nodes[idx];
                node.body = None;
                node.is_leaf = false;
                node.children[octant] = Some(child_idx);
            }

            // internal node: descend into the body's octant
            let node = self.nodes[idx];
            let octant = octant_of(&node.center, &body.position);
            let next = match node.children[octant] {
                Some(c) => c,
                None => {
                    let leaf = OctreeNode::leaf(child_center(&node.center, node.half_size, octant), node.half_size * 0.5);
                    let Some(c) = self.alloc(leaf) else {
                        return false;
                    };
                    self.nodes[idx].children[octant] = Some(c);
                    c
                }
            };
            idx = next as usize;
            depth += 1;
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn walk(&self, idx: usize, target: u32, pos: &NVec3, eps2: f64, theta: f64, depth: usize, acc: &mut NVec3) {
        let node = &self.nodes[idx];

        // Skip empty nodes
        if node.mass <= 0.0 {
            return;
        }

        if node.is_leaf {
            if node.body == Some(target) {
                return; // don't self-interact
            }
            *acc += point_mass(node.mass, &node.com, pos, eps2);
            return;
        }

        let r = node.com - pos;
        let dist = r.norm();
        if (dist > 0.0 && node.size() / dist < theta) || depth >= MAX_DEPTH {
            // Far enough away: approximate this node as a single mass at COM
            *acc += point_mass(node.mass, &node.com, pos, eps2);
        } else {
            for child in node.children.iter().flatten() {
                self.walk(*child as usize, target, pos, eps2, theta, depth + 1, acc);
            }
        }
    }
}

/// Acceleration (without G) from a point mass at `at` felt at `pos`.
fn point_mass(mass: f64, at: &NVec3, pos: &NVec3, eps2: f64) -> NVec3 {
    let r = at - pos;
    let d2 = r.norm_squared() + eps2;
    if d2 <= 0.0 {
        return NVec3::zeros();
    }
    let inv_r = d2.sqrt().recip();
    r * (mass * inv_r * inv_r * inv_r)
}

/// Cube enclosing every body: center of the AABB, half-size of its longest axis.
fn bounding_cube(bodies: &[GravityBody]) -> (NVec3, f64) {
    let mut min = NVec3::repeat(f64::INFINITY);
    let mut max = NVec3::repeat(f64::NEG_INFINITY);
    for b in bodies {
        min = min.inf(&b.position);
        max = max.sup(&b.position);
    }
    let center = (min + max) * 0.5;
    let half = (max - min).max() * 0.5;
    // keep a nonzero cube for a lone body; pad so boundary bodies stay inside
    (center, if half > 0.0 { half * (1.0 + 1e-9) } else { 1.0 })
}

/// 3-bit octant code: bit 0 = x, bit 1 = y, bit 2 = z (set when `p >= center`).
fn octant_of(center: &NVec3, p: &NVec3) -> usize {
    let mut idx = 0;
    if p.x >= center.x { idx |= 1; }
    if p.y >= center.y { idx |= 2; }
    if p.z >= center.z { idx |= 4; }
    idx
}

fn child_center(center: &NVec3, half: f64, octant: usize) -> NVec3 {
    let q = half * 0.5;
    let sign = |bit: usize| if octant & bit != 0 { q } else { -q };
    center + NVec3::new(sign(1), sign(2), sign(4))
}

// =========================================================================================
// Per-step solver
// =========================================================================================

/// Owns the octree between steps and sizes its arena.
///
/// The arena starts at `ARENA_FACTOR × bodies`. When a build drops bodies
/// the factor doubles and the tree is rebuilt, up to `MAX_ARENA_FACTOR`;
/// the larger factor is kept for later steps.
#[derive(Debug, Clone)]
pub struct GravitySolver {
    tree: Octree,
    bodies: Vec<GravityBody>,
    arena_factor: usize,
}

impl Default for GravitySolver {
    fn default() -> Self {
        Self::new()
    }
}

impl GravitySolver {
    pub fn new() -> Self {
        Self {
            tree: Octree::new(),
            bodies: Vec::new(),
            arena_factor: ARENA_FACTOR,
        }
    }

    pub fn tree(&self) -> &Octree {
        &self.tree
    }

    pub fn arena_factor(&self) -> usize {
        self.arena_factor
    }

    /// Build over every massive particle whose group has gravity enabled.
    pub fn build(&mut self, particles: &[Particle], groups: &[GroupParams]) -> OctreeStats {
        let mut bodies = std::mem::take(&mut self.bodies);
        bodies.clear();
        bodies.extend(
            particles
                .iter()
                .filter(|p| p.is_massive() && groups[p.group].gravity.active)
                .map(|p| GravityBody { id: p.id, position: p.position, mass: p.mass }),
        );
        let stats = self.build_bodies(&bodies);
        self.bodies = bodies;
        stats
    }

    pub fn build_bodies(&mut self, bodies: &[GravityBody]) -> OctreeStats {
        loop {
            let stats = self.tree.build(bodies, self.arena_factor * bodies.len() + 1);
            if !stats.capacity_exceeded() {
                return stats;
            }
            if self.arena_factor >= MAX_ARENA_FACTOR {
                warn!(dropped = stats.dropped, capacity = stats.capacity, "octree arena exhausted, tree is under-populated");
                return stats;
            }
            self.arena_factor *= 2;
            warn!(dropped = stats.dropped, factor = self.arena_factor, "octree arena exhausted, rebuilding with a larger arena");
        }
    }
}
