//! Error types for flow complex computation.

use thiserror::Error;

/// Geometric failures reported by a single task.
///
/// Both variants indicate a non-generic input. They abort the task that hit them and are
/// surfaced as the run error once the scheduler has drained.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FlowError {
    /// More points reached the sphere at the same ray parameter than the caller can hold,
    /// e.g. exactly cospherical input points.
    #[error("too many simultaneous nearest neighbors (capacity {capacity})")]
    TooManyNeighbors { capacity: usize },

    /// The least-squares system of an affine hull was singular, which happens when its
    /// members are affinely dependent.
    #[error("affinely dependent simplex {members:?}")]
    AffinelyDependent { members: Vec<usize> },
}
