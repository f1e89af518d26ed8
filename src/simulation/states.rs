//! Core state types for the particle engine.
//!
//! Defines the per-particle record and the store that owns them:
//! - `Particle` – position, velocity, radius, mass, lifecycle state and group
//! - `Link`     – spring edge owned by its start particle
//! - `ParticleStore` – the flat array every engine phase operates on
//!
//! Per-step scratch (neighbour and collided-with lists) lives on each
//! particle and keeps its allocation across steps; `linked_with` mirrors the
//! links touching the particle from either end.

use nalgebra::Vector3;
pub type NVec3 = Vector3<f64>;

/// Lifecycle state as reported by the host particle system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParticleState {
    #[default]
    Dead,
    Initializing,
    Alive,
    Dying,
}

impl ParticleState {
    /// Decode the host's integer state (0 dead, 1 unborn, 2 alive, 3 dying).
    /// Unknown codes are treated as dead.
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => ParticleState::Initializing,
            2 => ParticleState::Alive,
            3 => ParticleState::Dying,
            _ => ParticleState::Dead,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            ParticleState::Dead => 0,
            ParticleState::Initializing => 1,
            ParticleState::Alive => 2,
            ParticleState::Dying => 3,
        }
    }

    /// Only alive particles take part in gravity, collisions and links.
    pub fn is_active(self) -> bool {
        self == ParticleState::Alive
    }
}

/// Spring edge between two particles.
///
/// A link lives in the `links` list of its `start` particle; both endpoints
/// record each other in `linked_with` so collisions between them are skipped.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Link {
    pub start: usize,
    pub end: usize,
    pub rest_length: f64,
    pub friction: f64,
    // compression side (length below rest)
    pub stiffness: f64,
    pub exponent: i32,
    pub damping: f64,
    pub broken: f64,
    // expansion side (length above rest)
    pub e_stiffness: f64,
    pub e_exponent: i32,
    pub e_damping: f64,
    pub e_broken: f64,
}

impl Link {
    /// Signed strain `(length - rest) / rest`.
    pub fn strain(&self, length: f64) -> f64 {
        if self.rest_length > 0.0 {
            (length - self.rest_length) / self.rest_length
        } else {
            0.0
        }
    }

    /// True when the link has been stretched or squashed past its threshold.
    pub fn is_broken_at(&self, length: f64) -> bool {
        let strain = self.strain(length);
        strain > self.e_broken || strain < -self.broken
    }

    /// Longest length at which the link still holds.
    pub fn max_length(&self) -> f64 {
        self.rest_length * (1.0 + self.e_broken)
    }
}

#[derive(Debug, Clone)]
pub struct Particle {
    pub id: usize,         // stable index into the store
    pub position: NVec3,   // position
    pub velocity: NVec3,   // velocity
    pub size: f64,         // radius
    pub mass: f64,         // mass
    pub state: ParticleState,
    pub group: usize,      // index of the owning group's params
    pub links: Vec<Link>,  // links started by this particle

    pub(crate) neighbors: Vec<u32>,
    pub(crate) collided_with: Vec<u32>,
    pub(crate) linked_with: Vec<u32>,
}

impl Particle {
    pub fn new(id: usize, group: usize, position: NVec3, velocity: NVec3, size: f64, mass: f64, state: ParticleState) -> Self {
        Self {
            id,
            position,
            velocity,
            size,
            mass,
            state,
            group,
            links: Vec::new(),
            neighbors: Vec::new(),
            collided_with: Vec::new(),
            linked_with: Vec::new(),
        }
    }

    /// Participates in gravity (tree insertion and rotation seeding).
    pub fn is_massive(&self) -> bool {
        self.state.is_active() && self.mass > 0.0
    }

    pub fn is_linked_with(&self, other: usize) -> bool {
        self.linked_with.contains(&(other as u32))
    }

    /// Number of links touching this particle, in either direction.
    pub fn link_count(&self) -> usize {
        self.linked_with.len()
    }

    pub fn neighbors(&self) -> &[u32] {
        &self.neighbors
    }

    pub(crate) fn forget_link(&mut self, other: usize) {
        if let Some(k) = self.linked_with.iter().position(|&o| o == other as u32) {
            self.linked_with.swap_remove(k);
        }
    }
}

/// Range of store slots belonging to one host group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupSpan {
    pub offset: usize,
    pub len: usize,
}

/// Owns every particle of every group for the duration of a run.
#[derive(Debug, Clone, Default)]
pub struct ParticleStore {
    pub particles: Vec<Particle>,
    pub spans: Vec<GroupSpan>,
}

impl ParticleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a group's particles; returns the group index.
    pub fn push_group(&mut self, particles: impl IntoIterator<Item = (NVec3, NVec3, f64, f64, ParticleState)>) -> usize {
        let group = self.spans.len();
        let offset = self.particles.len();
        for (position, velocity, size, mass, state) in particles {
            let id = self.particles.len();
            self.particles.push(Particle::new(id, group, position, velocity, size, mass, state));
        }
        self.spans.push(GroupSpan { offset, len: self.particles.len() - offset });
        group
    }

    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    pub fn group(&self, group: usize) -> &[Particle] {
        let span = self.spans[group];
        &self.particles[span.offset..span.offset + span.len]
    }

    pub fn group_mut(&mut self, group: usize) -> &mut [Particle] {
        let span = self.spans[group];
        &mut self.particles[span.offset..span.offset + span.len]
    }

    /// Total number of live links.
    pub fn link_count(&self) -> usize {
        self.particles.iter().map(|p| p.links.len()).sum()
    }

    /// Create a link and register it on both endpoints.
    ///
    /// Returns false for self-links, unknown ids and pairs that are already
    /// linked.
    pub fn add_link(&mut self, link: Link) -> bool {
        let n = self.particles.len();
        if link.start >= n || link.end >= n || link.start == link.end {
            return false;
        }
        if self.particles[link.start].is_linked_with(link.end) {
            return false;
        }
        self.particles[link.end].linked_with.push(link.start as u32);
        let start = &mut self.particles[link.start];
        start.linked_with.push(link.end as u32);
        start.links.push(link);
        true
    }
}
