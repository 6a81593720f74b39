use crate::error::FlowError;
use crate::flow_complex::FlowComplex;
use crate::point_cloud::PointCloud;
use crate::tasks::{AscendTask, Task, TaskContext};
use crate::traits::SpatialIndex;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strategy {
    /// One thread; pending descents run before pending ascents.
    Sequential,
    /// A pool of `num_threads` workers sharing one scope of tasks.
    Parallel,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FlowComplexSettings {
    pub num_threads: usize,
    pub strategy: Strategy,
}

impl Default for FlowComplexSettings {
    fn default() -> Self {
        Self {
            num_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            strategy: Strategy::Parallel,
        }
    }
}

impl FlowComplexSettings {
    pub fn sequential() -> Self {
        Self {
            num_threads: 1,
            strategy: Strategy::Sequential,
        }
    }
}

/// Computes the flow complex of `points`, each of which has `dim` coordinates.
pub fn compute_flow_complex<I, P>(
    points: I,
    dim: usize,
    settings: FlowComplexSettings,
) -> Result<FlowComplex>
where
    I: IntoIterator<Item = P>,
    P: AsRef<[f64]>,
{
    let cloud = PointCloud::from_points(points, dim).context("Invalid point cloud.")?;
    compute_with_index(&cloud, settings)
}

/// Computes the flow complex of the points held by `cloud`.
pub fn compute_with_index<S: SpatialIndex>(
    cloud: &S,
    settings: FlowComplexSettings,
) -> Result<FlowComplex> {
    let (complex, _) = run(cloud, settings)?;
    Ok(complex)
}

/// Runs every task to completion. Returns the complex and the number of tasks executed.
fn run<S: SpatialIndex>(
    cloud: &S,
    settings: FlowComplexSettings,
) -> Result<(FlowComplex, usize)> {
    if cloud.dim() == 0 {
        bail!("Point cloud has zero dimension.");
    }
    if cloud.is_empty() {
        bail!("Point cloud must contain at least one point.");
    }
    if settings.num_threads == 0 {
        bail!("num_threads must be greater than zero.");
    }

    info!(
        points = cloud.len(),
        dim = cloud.dim(),
        threads = settings.num_threads,
        strategy = ?settings.strategy,
        "computing flow complex"
    );
    let ctx = TaskContext::new(cloud).context("Failed to measure the span of the point cloud.")?;
    if !ctx.spans_space() {
        info!(rank = ctx.rank(), "point cloud is flat, every critical point flows to infinity");
    }
    let seed = AscendTask::seed(cloud, 0);
    let failures = match settings.strategy {
        Strategy::Sequential => run_sequential(&ctx, seed),
        Strategy::Parallel => run_parallel(&ctx, &seed, settings.num_threads)?,
    };
    let tasks = ctx.executed();
    let mut complex = finish(ctx.into_complex(), failures)?;
    let orphans = complex.link_orphans_to_infinity();
    info!(
        critical_points = complex.len(),
        by_index = ?complex.count_by_index(),
        tasks,
        orphans,
        "flow complex computed"
    );
    Ok((complex, tasks))
}

fn finish(complex: FlowComplex, failures: Vec<FlowError>) -> Result<FlowComplex> {
    let count = failures.len();
    match failures.into_iter().next() {
        None => Ok(complex),
        Some(first) => {
            Err(anyhow::Error::new(first).context(format!("{} flow complex task(s) failed.", count)))
        }
    }
}

fn run_sequential<S: SpatialIndex>(ctx: &TaskContext<'_, S>, seed: AscendTask) -> Vec<FlowError> {
    let mut ascents = vec![seed];
    let mut descents = Vec::new();
    let mut spawned: Vec<Task> = Vec::new();
    let mut failures = Vec::new();

    loop {
        let task = match descents.pop() {
            Some(task) => Task::Descend(task),
            None => match ascents.pop() {
                Some(task) => Task::Ascend(task),
                None => break,
            },
        };
        if let Err(err) = task.execute(ctx, &mut spawned) {
            warn!(%err, "task failed");
            failures.push(err);
        }
        for child in spawned.drain(..) {
            match child {
                Task::Ascend(task) => ascents.push(task),
                Task::Descend(task) => descents.push(task),
            }
        }
    }
    failures
}

fn run_parallel<S: SpatialIndex>(
    ctx: &TaskContext<'_, S>,
    seed: &AscendTask,
    num_threads: usize,
) -> Result<Vec<FlowError>> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build()
        .context("Failed to build worker pool.")?;
    let failures = Mutex::new(Vec::new());
    pool.scope(|scope| {
        // Identical seeds; the dedup sets absorb the repeats.
        for _ in 0..num_threads {
            let task = Task::Ascend(seed.clone());
            let failures = &failures;
            scope.spawn(move |scope| run_scoped(scope, ctx, task, failures));
        }
    });
    Ok(failures.into_inner().unwrap_or_else(PoisonError::into_inner))
}

fn run_scoped<'s, S: SpatialIndex>(
    scope: &rayon::Scope<'s>,
    ctx: &'s TaskContext<'_, S>,
    task: Task,
    failures: &'s Mutex<Vec<FlowError>>,
) {
    let mut spawned: Vec<Task> = Vec::new();
    if let Err(err) = task.execute(ctx, &mut spawned) {
        warn!(%err, "task failed");
        failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(err);
    }
    for child in spawned {
        scope.spawn(move |scope| run_scoped(scope, ctx, child, failures));
    }
}
