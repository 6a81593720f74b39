use super::{
    point_vector, positive_positions, reach_critical, spawn_sub_descends, TaskContext, TaskSink,
};
use crate::affine_hull::AffineHull;
use crate::error::FlowError;
use crate::flow_complex::{CriticalPointId, SimplexKey};
use crate::ray_search::{nearest_neighbor_along_ray, VertexFilter};
use crate::traits::SpatialIndex;
use nalgebra::DVector;
use tracing::{trace, warn};

/// Searches the lower-index critical points of the stable manifold of `successor`.
///
/// The sphere centered at `x` passes through every member of `hull` and holds no point inside.
/// It shrinks toward the hull's driver; if another point lands on it first, the search continues
/// on every face the flow line can come from, otherwise the driver is a critical point.
///
/// The squared radius drops with every step, so a chain of descents is finite.
#[derive(Debug, Clone)]
pub struct DescendTask {
    hull: AffineHull,
    x: DVector<f64>,
    successor: CriticalPointId,
    /// Member removed from the parent hull; it lies on the sphere and must not stop it.
    dropped: Option<usize>,
}

impl DescendTask {
    pub fn new(
        hull: AffineHull,
        x: DVector<f64>,
        successor: CriticalPointId,
        dropped: Option<usize>,
    ) -> Self {
        Self {
            hull,
            x,
            successor,
            dropped,
        }
    }

    pub fn hull(&self) -> &AffineHull {
        &self.hull
    }

    pub fn location(&self) -> &DVector<f64> {
        &self.x
    }

    pub fn successor(&self) -> CriticalPointId {
        self.successor
    }

    pub fn dropped(&self) -> Option<usize> {
        self.dropped
    }

    pub fn execute<S, K>(self, ctx: &TaskContext<'_, S>, sink: &mut K) -> Result<(), FlowError>
    where
        S: SpatialIndex,
        K: TaskSink,
    {
        // The segment toward a known critical driver cannot capture anything.
        let key = SimplexKey::new(self.hull.members());
        if ctx.is_known_critical(&key) && ctx.link_existing(&key, self.successor) {
            trace!(members = ?self.hull.members(), "descent reaches a known critical point");
            return Ok(());
        }

        let cloud = ctx.cloud();
        let lambda = self.hull.project(cloud, &self.x)?;
        if lambda.iter().any(|&l| l < 0.0) {
            trace!(members = ?self.hull.members(), "driver outside the face, no flow line");
            return Ok(());
        }

        let driver = self.hull.combine(cloud, &lambda);
        let on_sphere = point_vector(cloud, self.hull.members()[0]);
        let hull = &self.hull;
        let dropped = self.dropped;
        let filter = VertexFilter::descend(cloud, &driver, &on_sphere, |idx| {
            hull.contains(idx) || Some(idx) == dropped
        });
        if filter.is_empty() {
            reach_critical(ctx, sink, self.hull, driver, Some(self.successor));
            return Ok(());
        }

        let v = &driver - &self.x;
        if v.norm_squared() == 0.0 {
            warn!(members = ?self.hull.members(), "driver holds points but has no approach");
            return Ok(());
        }
        let capacity = cloud.dim() + 1 - self.hull.len();
        let hit = nearest_neighbor_along_ray(cloud, &self.x, &v, &on_sphere, filter, capacity)?;
        let Some(hit) = hit else {
            warn!(members = ?self.hull.members(), "descent captured nothing, dropping task");
            return Ok(());
        };

        trace!(captured = ?hit.indices, t = hit.t, "descent captures");
        let x = &self.x + v * hit.t;
        for &idx in &hit.indices {
            let mut next = self.hull.clone();
            next.add_point(cloud, idx);
            // Backward, the flow arrives through a facet that keeps `idx` and misses a member
            // with a positive coordinate.
            let lambda = next.project(cloud, &x)?;
            let captured = next.len() - 1;
            let positions: Vec<usize> = positive_positions(&lambda)
                .into_iter()
                .filter(|&pos| pos != captured)
                .collect();
            spawn_sub_descends(cloud, sink, &positions, x.clone(), next, self.successor);
        }
        Ok(())
    }
}
