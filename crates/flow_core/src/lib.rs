//! The `flow_core` crate computes the flow complex of a finite point cloud: the critical points
//! of its distance function together with the Hasse diagram that links each critical point to
//! the higher-index critical points its unstable manifold flows into.
//!
//! Key components:
//! - **Traits**: `SpatialIndex` (radius queries over the cloud).
//! - **Linalg**: `DynamicQr`, a QR factorization updated with Givens rotations.
//! - **Affine hull**: barycentric projection onto the affine span of up to `dim + 1` points.
//! - **Ray search**: candidate filters and the nearest-neighbor-along-ray primitive.
//! - **Tasks**: ascend and descend flow tasks plus a walk over the Delaunay cells, run
//!   sequentially or on a rayon pool by `compute`.
pub mod affine_hull;
pub mod compute;
pub mod error;
pub mod flow_complex;
pub mod linalg;
pub mod point_cloud;
pub mod ray_search;
pub mod tasks;
pub mod traits;

pub use compute::{compute_flow_complex, compute_with_index, FlowComplexSettings, Strategy};
pub use error::FlowError;
pub use flow_complex::{CriticalPoint, CriticalPointId, FlowComplex, SimplexKey};
pub use point_cloud::PointCloud;
pub use traits::SpatialIndex;
