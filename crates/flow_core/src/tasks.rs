pub mod ascend;
pub mod descend;

pub use ascend::{AscendMode, AscendTask};
pub use descend::DescendTask;

use crate::affine_hull::{affine_rank, AffineHull};
use crate::error::FlowError;
use crate::flow_complex::{CriticalPoint, CriticalPointId, FlowComplex, SimplexKey};
use crate::traits::SpatialIndex;
use dashmap::DashSet;
use nalgebra::DVector;
use rustc_hash::FxBuildHasher;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace};

/// Offsets shorter than this fraction of the diameter lie inside an affine span.
pub(crate) const SPAN_TOLERANCE: f64 = 1e-9;

/// Concurrent insert-if-absent set of simplices.
pub type SimplexSet = DashSet<SimplexKey, FxBuildHasher>;

/// A unit of work. Tasks own all of their geometric state and never block.
#[derive(Debug, Clone)]
pub enum Task {
    Ascend(AscendTask),
    Descend(DescendTask),
}

impl Task {
    pub fn execute<S, K>(self, ctx: &TaskContext<'_, S>, sink: &mut K) -> Result<(), FlowError>
    where
        S: SpatialIndex,
        K: TaskSink,
    {
        ctx.executed.fetch_add(1, Ordering::Relaxed);
        match self {
            Task::Ascend(task) => task.execute(ctx, sink),
            Task::Descend(task) => task.execute(ctx, sink),
        }
    }
}

/// Receives the child tasks a task spawns.
pub trait TaskSink {
    fn push_ascend(&mut self, task: AscendTask);
    fn push_descend(&mut self, task: DescendTask);
}

impl TaskSink for Vec<Task> {
    fn push_ascend(&mut self, task: AscendTask) {
        self.push(Task::Ascend(task));
    }

    fn push_descend(&mut self, task: DescendTask) {
        self.push(Task::Descend(task));
    }
}

/// State shared by every task of one run.
///
/// `cells` holds the Delaunay cells the walk has entered, `critical` the critical points whose
/// children have been spawned. Both are insert-if-absent; the complex is guarded by a single lock.
pub struct TaskContext<'a, S> {
    cloud: &'a S,
    rank: usize,
    complex: Mutex<FlowComplex>,
    infinity: CriticalPointId,
    cells: SimplexSet,
    critical: SimplexSet,
    executed: AtomicUsize,
}

impl<'a, S: SpatialIndex> TaskContext<'a, S> {
    pub fn new(cloud: &'a S) -> Result<Self, FlowError> {
        let rank = affine_rank(cloud, SPAN_TOLERANCE)?;
        let complex = FlowComplex::new(cloud.dim());
        let infinity = complex.infinity();
        Ok(Self {
            cloud,
            rank,
            complex: Mutex::new(complex),
            infinity,
            cells: SimplexSet::with_hasher(FxBuildHasher),
            critical: SimplexSet::with_hasher(FxBuildHasher),
            executed: AtomicUsize::new(0),
        })
    }

    pub fn cloud(&self) -> &'a S {
        self.cloud
    }

    /// Dimension of the affine span of the cloud.
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Whether the cloud spans the ambient space. Flow lines only exist in that case.
    pub fn spans_space(&self) -> bool {
        self.rank == self.cloud.dim()
    }

    pub fn infinity(&self) -> CriticalPointId {
        self.infinity
    }

    /// Number of tasks executed so far.
    pub fn executed(&self) -> usize {
        self.executed.load(Ordering::Relaxed)
    }

    fn complex(&self) -> MutexGuard<'_, FlowComplex> {
        self.complex.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts `cp` (or finds its existing twin) and links it to `successor`.
    pub fn record(&self, cp: CriticalPoint, successor: Option<CriticalPointId>) -> CriticalPointId {
        let mut complex = self.complex();
        let (inserted, id) = complex.insert(cp);
        if inserted {
            trace!(?id, "new critical point");
        }
        if let Some(succ) = successor {
            complex.add_successor(id, succ);
        }
        id
    }

    pub fn link(&self, from: CriticalPointId, to: CriticalPointId) {
        self.complex().add_successor(from, to);
    }

    /// Links the stored critical point `key` to `successor`. False if `key` is not stored.
    pub fn link_existing(&self, key: &SimplexKey, successor: CriticalPointId) -> bool {
        let mut complex = self.complex();
        match complex.find(key) {
            Some(id) => {
                complex.add_successor(id, successor);
                true
            }
            None => false,
        }
    }

    /// True for the first caller that enters the Delaunay cell `key`.
    pub fn first_cell_visit(&self, key: SimplexKey) -> bool {
        self.cells.insert(key)
    }

    /// True for the first caller that reports `key` as a critical point.
    pub fn first_critical_visit(&self, key: SimplexKey) -> bool {
        self.critical.insert(key)
    }

    /// Whether the children of critical point `key` have been spawned.
    pub fn is_known_critical(&self, key: &SimplexKey) -> bool {
        self.critical.contains(key)
    }

    pub fn into_complex(self) -> FlowComplex {
        self.complex
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

pub(crate) fn point_vector<S: SpatialIndex>(cloud: &S, idx: usize) -> DVector<f64> {
    DVector::from_column_slice(cloud.point(idx))
}

/// Positions with a positive coordinate, in descending order.
pub(crate) fn positive_positions(lambda: &DVector<f64>) -> Vec<usize> {
    (0..lambda.len()).rev().filter(|&i| lambda[i] > 0.0).collect()
}

/// Records the critical point of `hull` at `location` and links it to `successor`.
///
/// Every route to a critical point ends here. The first visit spawns its children: the two
/// ascents of an index `dim - 1` point and one descent per facet. Clouds that do not span the
/// space have no finite maxima, so their critical points also flow to infinity.
pub(crate) fn reach_critical<S, K>(
    ctx: &TaskContext<'_, S>,
    sink: &mut K,
    hull: AffineHull,
    location: DVector<f64>,
    successor: Option<CriticalPointId>,
) -> CriticalPointId
where
    S: SpatialIndex,
    K: TaskSink,
{
    let id = ctx.record(
        CriticalPoint::new(hull.members(), location.as_slice().to_vec()),
        successor,
    );
    if !ctx.first_critical_visit(SimplexKey::new(hull.members())) {
        return id;
    }
    debug!(members = ?hull.members(), "found critical point");

    if !ctx.spans_space() {
        ctx.link(id, ctx.infinity());
    } else if let Some(normal) = hull.normal() {
        sink.push_ascend(AscendTask::from_saddle(
            hull.clone(),
            location.clone(),
            normal.clone(),
            id,
        ));
        sink.push_ascend(AscendTask::from_saddle(hull.clone(), location.clone(), -normal, id));
    }
    if hull.len() > 1 {
        let every: Vec<usize> = (0..hull.len()).rev().collect();
        spawn_sub_descends(ctx.cloud(), sink, &every, location, hull, id);
    }
    id
}

/// Spawns one descend task per position in `drop_positions`, each working on `hull` with that
/// member removed, starting at `x` and linking to `successor`.
///
/// The first position reuses `hull` and `x`; every other child gets its own copy.
pub(crate) fn spawn_sub_descends<S, K>(
    cloud: &S,
    sink: &mut K,
    drop_positions: &[usize],
    x: DVector<f64>,
    hull: AffineHull,
    successor: CriticalPointId,
) where
    S: SpatialIndex,
    K: TaskSink,
{
    let Some((&first, rest)) = drop_positions.split_first() else {
        return;
    };
    for &pos in rest {
        let mut sub = hull.clone();
        let dropped = hull.members()[pos];
        sub.drop_position(cloud, pos);
        trace!(dropped, "descend takes dropped index");
        sink.push_descend(DescendTask::new(sub, x.clone(), successor, Some(dropped)));
    }
    let mut hull = hull;
    let dropped = hull.members()[first];
    hull.drop_position(cloud, first);
    trace!(dropped, "descend takes dropped index");
    sink.push_descend(DescendTask::new(hull, x, successor, Some(dropped)));
}
