//! Candidate filtering and the nearest-neighbor-along-ray primitive.
//!
//! A sphere is grown along the ray `x + t v` while keeping a reference point `p` on its
//! boundary. `nearest_neighbor_along_ray` returns the points that reach the boundary first,
//! `VertexFilter` narrows down which points have to be looked at.

use crate::error::FlowError;
use crate::traits::SpatialIndex;
use nalgebra::DVector;
use tracing::trace;

/// Candidate point indices produced by one of the two search modes.
#[derive(Debug, Clone, Default)]
pub struct VertexFilter {
    candidates: Vec<usize>,
}

impl VertexFilter {
    /// Points inside the ball around `driver` that passes through `member`.
    pub fn descend<S, F>(
        cloud: &S,
        driver: &DVector<f64>,
        member: &DVector<f64>,
        ignore: F,
    ) -> Self
    where
        S: SpatialIndex,
        F: Fn(usize) -> bool,
    {
        let mut candidates = Vec::new();
        cloud.radius_search(
            driver.as_slice(),
            (member - driver).norm_squared(),
            &mut candidates,
        );
        candidates.retain(|&idx| !ignore(idx));
        trace!(?candidates, "descend filter");
        Self { candidates }
    }

    /// Points that can stop a sphere moving from `location` along `direction`.
    ///
    /// The search ball doubles its step along the ray until it catches a candidate or
    /// outgrows the cloud's diameter. An empty result at that size still falls back to the
    /// whole cloud, since a far away point can be hit by a very flat sphere.
    pub fn ascend<S, F>(
        cloud: &S,
        location: &DVector<f64>,
        direction: &DVector<f64>,
        point_on_sphere: &DVector<f64>,
        ignore: F,
    ) -> Self
    where
        S: SpatialIndex,
        F: Fn(usize) -> bool,
    {
        let sq_diameter = cloud.diameter() * cloud.diameter();
        let mut candidates = Vec::new();
        let mut num_iter = 0;
        loop {
            let center = location + direction * 2f64.powi(num_iter);
            let sq_radius = (&center - point_on_sphere).norm_squared();
            cloud.radius_search(center.as_slice(), sq_radius, &mut candidates);
            candidates.retain(|&idx| !ignore(idx));
            num_iter += 1;
            if !candidates.is_empty() || sq_radius >= sq_diameter {
                break;
            }
        }
        if candidates.is_empty() {
            trace!(num_iter, "ascend filter falls back to a full scan");
            candidates.extend((0..cloud.len()).filter(|&idx| !ignore(idx)));
        }
        Self { candidates }
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }
}

impl IntoIterator for VertexFilter {
    type Item = usize;
    type IntoIter = std::vec::IntoIter<usize>;

    fn into_iter(self) -> Self::IntoIter {
        self.candidates.into_iter()
    }
}

/// Points reaching the moving sphere first, together with their ray parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct RayHit {
    pub indices: Vec<usize>,
    pub t: f64,
}

/// For each candidate `q`, the sphere centered at `x + t v` through `p` has `q` on its
/// boundary at `t = (x·q - x·p + (p·p - q·q) / 2) / (v·p - v·q)`.
///
/// Returns the candidates with the smallest positive `t`. Exact ties are collected together;
/// more ties than `capacity` fail with [`FlowError::TooManyNeighbors`]. Candidates with a zero
/// denominator only reach the sphere at infinity and are skipped.
pub fn nearest_neighbor_along_ray<S, I>(
    cloud: &S,
    x: &DVector<f64>,
    v: &DVector<f64>,
    p: &DVector<f64>,
    candidates: I,
    capacity: usize,
) -> Result<Option<RayHit>, FlowError>
where
    S: SpatialIndex,
    I: IntoIterator<Item = usize>,
{
    trace!(sq_norm = v.norm_squared(), "ray search");
    let x_p = x.dot(p);
    let p_p = p.dot(p);
    let v_p = v.dot(p);

    let mut indices: Vec<usize> = Vec::new();
    let mut best_t = 0.0;
    for idx in candidates {
        let q = DVector::from_column_slice(cloud.point(idx));
        let denom = v_p - q.dot(v);
        if denom == 0.0 {
            continue;
        }
        let t = (x.dot(&q) - x_p + 0.5 * (p_p - q.dot(&q))) / denom;
        if t <= 0.0 || (!indices.is_empty() && t > best_t) {
            continue;
        }
        if indices.is_empty() || t < best_t {
            indices.clear();
            best_t = t;
        }
        if indices.len() == capacity {
            return Err(FlowError::TooManyNeighbors { capacity });
        }
        indices.push(idx);
    }

    if indices.is_empty() {
        Ok(None)
    } else {
        Ok(Some(RayHit { indices, t: best_t }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point_cloud::PointCloud;

    fn vector(values: &[f64]) -> DVector<f64> {
        DVector::from_column_slice(values)
    }

    fn cospherical_cloud() -> PointCloud {
        PointCloud::from_points(
            vec![[0.0, 0.0], [2.0, 0.0], [1.0, 1.0], [1.0, -1.0], [5.0, 3.0]],
            2,
        )
        .unwrap()
    }

    #[test]
    fn cospherical_ties_exceed_capacity() {
        let cloud = cospherical_cloud();
        let x = vector(&[0.0, 0.0]);
        let v = vector(&[1.0, 0.0]);
        let p = vector(&[0.0, 0.0]);
        let err = nearest_neighbor_along_ray(&cloud, &x, &v, &p, vec![1, 2, 3], 2)
            .expect_err("three ties cannot fit into two slots");
        assert_eq!(err, FlowError::TooManyNeighbors { capacity: 2 });
    }

    #[test]
    fn cospherical_ties_are_collected() {
        let cloud = cospherical_cloud();
        let x = vector(&[0.0, 0.0]);
        let v = vector(&[1.0, 0.0]);
        let p = vector(&[0.0, 0.0]);
        let hit = nearest_neighbor_along_ray(&cloud, &x, &v, &p, vec![1, 2, 3, 4], 3)
            .unwrap()
            .expect("ties should be found");
        assert_eq!(hit.indices, vec![1, 2, 3]);
        assert_eq!(hit.t, 1.0);
    }

    #[test]
    fn closer_candidate_replaces_ties() {
        let cloud = PointCloud::from_points(
            vec![[0.0, 0.0], [2.0, 0.0], [1.0, 1.0], [0.5, 0.0]],
            2,
        )
        .unwrap();
        let x = vector(&[0.0, 0.0]);
        let v = vector(&[1.0, 0.0]);
        let p = vector(&[0.0, 0.0]);
        let hit = nearest_neighbor_along_ray(&cloud, &x, &v, &p, vec![1, 2, 3], 2)
            .unwrap()
            .expect("a stopper exists");
        assert_eq!(hit.indices, vec![3]);
        assert!((hit.t - 0.25).abs() < 1e-12);
    }

    #[test]
    fn points_behind_or_parallel_are_skipped() {
        let cloud =
            PointCloud::from_points(vec![[0.0, 0.0], [-1.0, 0.0], [0.0, 1.0]], 2).unwrap();
        let x = vector(&[0.0, 0.0]);
        let v = vector(&[1.0, 0.0]);
        let p = vector(&[0.0, 0.0]);
        let hit = nearest_neighbor_along_ray(&cloud, &x, &v, &p, vec![1, 2], 2).unwrap();
        assert!(hit.is_none());
    }

    #[test]
    fn descend_filter_returns_points_inside_ball() {
        let cloud = cospherical_cloud();
        let filter = VertexFilter::descend(
            &cloud,
            &vector(&[1.0, 0.0]),
            &vector(&[0.0, 0.0]),
            |idx| idx == 0,
        );
        let mut found: Vec<usize> = filter.into_iter().collect();
        found.sort_unstable();
        assert_eq!(found, vec![1, 2, 3]);
    }

    #[test]
    fn ascend_filter_grows_ball_until_hit() {
        let cloud = PointCloud::from_points(
            vec![[0.0, 0.0], [1.0, 0.0], [0.5, 3.0], [-4.0, 0.0]],
            2,
        )
        .unwrap();
        // Sphere through points 0 and 1 moving up along the bisector.
        let filter = VertexFilter::ascend(
            &cloud,
            &vector(&[0.5, 0.0]),
            &vector(&[0.0, 1.0]),
            &vector(&[0.0, 0.0]),
            |idx| idx < 2,
        );
        assert_eq!(filter.len(), 1);
        assert_eq!(filter.into_iter().collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn ascend_filter_falls_back_to_full_scan() {
        let cloud =
            PointCloud::from_points(vec![[0.0, 0.0], [1.0, 0.0], [0.5, -3.0]], 2).unwrap();
        let filter = VertexFilter::ascend(
            &cloud,
            &vector(&[0.5, 0.0]),
            &vector(&[0.0, 1.0]),
            &vector(&[0.0, 0.0]),
            |idx| idx < 2,
        );
        assert_eq!(filter.into_iter().collect::<Vec<_>>(), vec![2]);
    }
}
