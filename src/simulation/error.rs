//! Error type for the engine.
//!
//! Only host-contract violations and allocation failures surface here.
//! Degenerate geometry is clamped in place and tree-arena exhaustion is
//! reported through `OctreeStats`, so neither aborts a step.

use std::collections::TryReserveError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("group {group}: `{field}` has {found} values, expected {expected}")]
    FrameShape {
        group: usize,
        field: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("frame carries {found} groups, expected {expected}")]
    GroupCount { expected: usize, found: usize },

    #[error("host parameter array has {found} values, expected at least {expected}")]
    HostParams { expected: usize, found: usize },

    #[error("buffer allocation failed: {0}")]
    Allocation(#[from] TryReserveError),

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}
