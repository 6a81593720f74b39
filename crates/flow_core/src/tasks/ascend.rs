use super::{point_vector, reach_critical, TaskContext, TaskSink, SPAN_TOLERANCE};
use crate::affine_hull::AffineHull;
use crate::error::FlowError;
use crate::flow_complex::{CriticalPointId, SimplexKey};
use crate::ray_search::{nearest_neighbor_along_ray, VertexFilter};
use crate::traits::SpatialIndex;
use nalgebra::DVector;
use tracing::{debug, trace, warn};

/// What an ascending sphere is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AscendMode {
    /// Follows the unstable flow line of the index `dim - 1` critical point `origin`.
    Flow { origin: CriticalPointId },
    /// Walks the Delaunay cells of the cloud. `left` is the vertex the walk just stepped away
    /// from; it still lies on the sphere.
    Explore { left: Option<usize> },
}

/// Moves a sphere through every member of `hull` upward from `x`.
///
/// A flow ascent ends at a maximum or escapes to infinity. An exploring ascent grows its hull
/// into a Delaunay cell, tests every face of the cell for criticality and crosses each facet
/// into the neighboring cell. Walking the whole triangulation finds the critical points that no
/// flow line from a maximum reaches.
#[derive(Debug, Clone)]
pub struct AscendTask {
    hull: AffineHull,
    x: DVector<f64>,
    /// Overrides the default direction of the first step.
    direction: Option<DVector<f64>>,
    mode: AscendMode,
}

impl AscendTask {
    /// Starts the walk at cloud point `start`.
    pub fn seed<S: SpatialIndex>(cloud: &S, start: usize) -> Self {
        let mut hull = AffineHull::new(cloud.dim());
        hull.add_point(cloud, start);
        Self {
            hull,
            x: point_vector(cloud, start),
            direction: None,
            mode: AscendMode::Explore { left: None },
        }
    }

    /// Leaves the index `dim - 1` critical point `origin` at `x` along `direction`.
    pub fn from_saddle(
        hull: AffineHull,
        x: DVector<f64>,
        direction: DVector<f64>,
        origin: CriticalPointId,
    ) -> Self {
        Self {
            hull,
            x,
            direction: Some(direction),
            mode: AscendMode::Flow { origin },
        }
    }

    /// Crosses the facet `hull` of a Delaunay cell, away from the cell's vertex `left`.
    pub fn across(hull: AffineHull, x: DVector<f64>, direction: DVector<f64>, left: usize) -> Self {
        Self {
            hull,
            x,
            direction: Some(direction),
            mode: AscendMode::Explore { left: Some(left) },
        }
    }

    fn continued(hull: AffineHull, x: DVector<f64>, mode: AscendMode) -> Self {
        Self {
            hull,
            x,
            direction: None,
            mode,
        }
    }

    pub fn hull(&self) -> &AffineHull {
        &self.hull
    }

    pub fn location(&self) -> &DVector<f64> {
        &self.x
    }

    pub fn mode(&self) -> AscendMode {
        self.mode
    }

    pub fn execute<S, K>(self, ctx: &TaskContext<'_, S>, sink: &mut K) -> Result<(), FlowError>
    where
        S: SpatialIndex,
        K: TaskSink,
    {
        match self.mode {
            AscendMode::Flow { origin } => self.flow(ctx, sink, origin),
            AscendMode::Explore { left } => self.explore(ctx, sink, left),
        }
    }

    fn flow<S, K>(
        self,
        ctx: &TaskContext<'_, S>,
        sink: &mut K,
        origin: CriticalPointId,
    ) -> Result<(), FlowError>
    where
        S: SpatialIndex,
        K: TaskSink,
    {
        let cloud = ctx.cloud();
        // The sphere moves away from the closest point of the hull's simplex; members off
        // the closest face leave the sphere.
        let (face, direction) = match &self.direction {
            Some(direction) => (self.hull.clone(), direction.clone()),
            None => {
                let (face, lambda) = self.hull.closest_face(cloud, &self.x)?;
                if face.len() == self.hull.len() && self.hull.is_full() {
                    let id = reach_critical(ctx, sink, self.hull, self.x, None);
                    ctx.link(origin, id);
                    return Ok(());
                }
                let direction = &self.x - face.combine(cloud, &lambda);
                (face, direction)
            }
        };
        if direction.norm_squared() == 0.0 {
            warn!(members = ?face.members(), "ascent has no direction, dropping task");
            return Ok(());
        }

        let on_sphere = point_vector(cloud, face.members()[0]);
        let hull = &self.hull;
        let filter = VertexFilter::ascend(cloud, &self.x, &direction, &on_sphere, |idx| {
            hull.contains(idx)
        });
        let capacity = cloud.dim() + 1 - face.len();
        let hit =
            nearest_neighbor_along_ray(cloud, &self.x, &direction, &on_sphere, filter, capacity)?;
        let Some(hit) = hit else {
            trace!(?origin, "flow escapes to infinity");
            ctx.link(origin, ctx.infinity());
            return Ok(());
        };

        trace!(stoppers = ?hit.indices, t = hit.t, "ascent continues");
        let x = &self.x + direction * hit.t;
        for &idx in &hit.indices {
            let mut next = face.clone();
            next.add_point(cloud, idx);
            sink.push_ascend(Self::continued(next, x.clone(), self.mode));
        }
        Ok(())
    }

    fn explore<S, K>(
        self,
        ctx: &TaskContext<'_, S>,
        sink: &mut K,
        left: Option<usize>,
    ) -> Result<(), FlowError>
    where
        S: SpatialIndex,
        K: TaskSink,
    {
        let cloud = ctx.cloud();
        let cell_size = ctx.rank() + 1;
        if self.hull.len() >= cell_size {
            return visit_cell(ctx, sink, self.hull, self.x);
        }
        let direction = match &self.direction {
            Some(direction) => direction.clone(),
            None => match grow_direction(cloud, &self.hull)? {
                Some(direction) => direction,
                None => {
                    warn!(members = ?self.hull.members(), "walk cannot grow, dropping task");
                    return Ok(());
                }
            },
        };

        let on_sphere = point_vector(cloud, self.hull.members()[0]);
        let hull = &self.hull;
        let filter = VertexFilter::ascend(cloud, &self.x, &direction, &on_sphere, |idx| {
            hull.contains(idx) || Some(idx) == left
        });
        let capacity = cell_size - self.hull.len();
        let hit =
            nearest_neighbor_along_ray(cloud, &self.x, &direction, &on_sphere, filter, capacity)?;
        let Some(hit) = hit else {
            return reach_hull_facet(ctx, sink, &self.hull, &self.x);
        };

        let x = &self.x + direction * hit.t;
        for &idx in &hit.indices {
            let mut next = self.hull.clone();
            next.add_point(cloud, idx);
            if next.len() < cell_size {
                let mode = AscendMode::Explore { left: None };
                sink.push_ascend(Self::continued(next, x.clone(), mode));
            } else {
                visit_cell(ctx, sink, next, x.clone())?;
            }
        }
        Ok(())
    }
}

/// Direction toward the first point off the affine span of `hull`.
fn grow_direction<S: SpatialIndex>(
    cloud: &S,
    hull: &AffineHull,
) -> Result<Option<DVector<f64>>, FlowError> {
    let min_offset = SPAN_TOLERANCE * cloud.diameter();
    for idx in (0..cloud.len()).filter(|&idx| !hull.contains(idx)) {
        let offset = hull.offset(cloud, &point_vector(cloud, idx))?;
        if offset.norm() > min_offset {
            return Ok(Some(offset));
        }
    }
    Ok(None)
}

/// Enters the Delaunay cell `cell` whose circumcenter is `x`.
///
/// On the first visit every face of the cell is tested for criticality and the walk crosses
/// every facet.
fn visit_cell<S, K>(
    ctx: &TaskContext<'_, S>,
    sink: &mut K,
    cell: AffineHull,
    x: DVector<f64>,
) -> Result<(), FlowError>
where
    S: SpatialIndex,
    K: TaskSink,
{
    if !ctx.first_cell_visit(SimplexKey::new(cell.members())) {
        return Ok(());
    }
    trace!(members = ?cell.members(), "entering cell");
    let cloud = ctx.cloud();
    for face in cell.faces(cloud) {
        if let Some(z) = critical_location(cloud, &face, &x)? {
            reach_critical(ctx, sink, face, z, None);
        }
    }
    if cell.len() == 1 {
        return Ok(());
    }
    for pos in 0..cell.len() {
        let mut facet = cell.clone();
        let left = cell.members()[pos];
        facet.drop_position(cloud, pos);
        let direction = -facet.offset(cloud, &point_vector(cloud, left))?;
        sink.push_ascend(AscendTask::across(facet, x.clone(), direction, left));
    }
    Ok(())
}

/// The walk left the triangulation through the facet `hull`, a facet of the convex hull of the
/// cloud. Its critical faces flow straight to infinity.
fn reach_hull_facet<S, K>(
    ctx: &TaskContext<'_, S>,
    sink: &mut K,
    hull: &AffineHull,
    x: &DVector<f64>,
) -> Result<(), FlowError>
where
    S: SpatialIndex,
    K: TaskSink,
{
    if !ctx.spans_space() {
        return Ok(());
    }
    debug!(members = ?hull.members(), "walk reaches the convex hull");
    let cloud = ctx.cloud();
    let infinity = ctx.infinity();
    for face in hull.faces(cloud) {
        if let Some(z) = critical_location(cloud, &face, x)? {
            reach_critical(ctx, sink, face, z, Some(infinity));
        }
    }
    Ok(())
}

/// Circumcenter of `face` if it is a critical point. `x` is any point equidistant from the
/// members of `face`, so its projection is the circumcenter.
fn critical_location<S: SpatialIndex>(
    cloud: &S,
    face: &AffineHull,
    x: &DVector<f64>,
) -> Result<Option<DVector<f64>>, FlowError> {
    let lambda = face.project(cloud, x)?;
    if lambda.iter().any(|&l| l <= 0.0) {
        return Ok(None);
    }
    let z = face.combine(cloud, &lambda);
    let on_sphere = point_vector(cloud, face.members()[0]);
    let inside = VertexFilter::descend(cloud, &z, &on_sphere, |idx| face.contains(idx));
    Ok(inside.is_empty().then_some(z))
}
