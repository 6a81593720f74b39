//! Incrementally maintained affine hull of up to `dim + 1` cloud points.
//!
//! The first member is the origin; the factorization holds one column `p_i - p_0` for every
//! other member, so `members.len() - 1 == qr.num_cols()` whenever the hull is non-empty.

use crate::error::FlowError;
use crate::linalg::DynamicQr;
use crate::traits::SpatialIndex;
use nalgebra::DVector;

#[derive(Debug, Clone)]
pub struct AffineHull {
    members: Vec<usize>,
    qr: DynamicQr,
}

impl AffineHull {
    pub fn new(dim: usize) -> Self {
        Self {
            members: Vec::with_capacity(dim + 1),
            qr: DynamicQr::new(dim),
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn members(&self) -> &[usize] {
        &self.members
    }

    pub fn contains(&self, idx: usize) -> bool {
        self.members.contains(&idx)
    }

    /// Whether the hull spans the whole ambient space.
    pub fn is_full(&self) -> bool {
        self.members.len() == self.qr.dim() + 1
    }

    pub fn add_point<S: SpatialIndex>(&mut self, cloud: &S, idx: usize) {
        assert!(!self.contains(idx), "point {} is already a member", idx);
        assert!(
            self.members.len() <= cloud.dim(),
            "affine hull already holds {} points",
            self.members.len()
        );
        if let Some(&origin) = self.members.first() {
            self.qr.append_column(&difference(cloud, idx, origin));
        }
        self.members.push(idx);
    }

    pub fn drop_point<S: SpatialIndex>(&mut self, cloud: &S, idx: usize) {
        let pos = self
            .members
            .iter()
            .position(|&m| m == idx)
            .unwrap_or_else(|| panic!("point {} is not a member", idx));
        self.drop_position(cloud, pos);
    }

    /// Drops the member stored at `pos`.
    pub fn drop_position<S: SpatialIndex>(&mut self, cloud: &S, pos: usize) {
        assert!(pos < self.members.len(), "position {} out of range", pos);
        if self.members.len() > 1 {
            let dropping_origin = pos == 0;
            self.qr.delete_column(if dropping_origin { 0 } else { pos - 1 });
            if dropping_origin && self.members.len() > 2 {
                // Re-express the remaining columns relative to the new origin.
                let shift = difference(cloud, self.members[0], self.members[1]);
                let ones = DVector::from_element(self.qr.num_cols(), 1.0);
                self.qr.rank_one_update(&shift, &ones);
            }
        }
        self.members.remove(pos);
        if self.members.is_empty() {
            self.qr.clear();
        }
        debug_assert!(
            (self.members.is_empty() && self.qr.num_cols() == 0)
                || self.members.len() == self.qr.num_cols() + 1
        );
    }

    /// Barycentric coordinates of the projection of `x` onto the hull, one per member.
    /// They sum to one.
    pub fn project<S: SpatialIndex>(
        &self,
        cloud: &S,
        x: &DVector<f64>,
    ) -> Result<DVector<f64>, FlowError> {
        assert!(!self.members.is_empty(), "cannot project onto an empty affine hull");
        let mut lambda = DVector::zeros(self.members.len());
        if self.members.len() > 1 {
            let rhs = x - DVector::from_column_slice(cloud.point(self.members[0]));
            let coefficients =
                self.qr
                    .solve(&rhs)
                    .ok_or_else(|| FlowError::AffinelyDependent {
                        members: self.members.clone(),
                    })?;
            lambda.rows_mut(1, coefficients.len()).copy_from(&coefficients);
        }
        lambda[0] = 1.0 - lambda.rows(1, self.members.len() - 1).sum();
        Ok(lambda)
    }

    /// The point with the given barycentric coordinates.
    pub fn combine<S: SpatialIndex>(&self, cloud: &S, lambda: &DVector<f64>) -> DVector<f64> {
        let mut point = DVector::zeros(cloud.dim());
        for (&m, &l) in self.members.iter().zip(lambda.iter()) {
            point += DVector::from_column_slice(cloud.point(m)) * l;
        }
        point
    }

    /// Unit normal of the hull when it is a hyperplane (`dim` members).
    pub fn normal(&self) -> Option<DVector<f64>> {
        let dim = self.qr.dim();
        if self.members.len() != dim {
            return None;
        }
        Some(self.qr.complement_column(dim - 1))
    }

    /// Component of `y` orthogonal to the hull: `y` minus its projection.
    pub fn offset<S: SpatialIndex>(
        &self,
        cloud: &S,
        y: &DVector<f64>,
    ) -> Result<DVector<f64>, FlowError> {
        let lambda = self.project(cloud, y)?;
        Ok(y - self.combine(cloud, &lambda))
    }

    /// Every non-empty face of the simplex spanned by the members, largest first.
    ///
    /// There are `2^len - 1` of them, so this is meant for the small hulls of low dimensions.
    pub fn faces<S: SpatialIndex>(&self, cloud: &S) -> Vec<AffineHull> {
        let len = self.members.len();
        (1u64..1 << len)
            .rev()
            .map(|mask| {
                let mut face = self.clone();
                for pos in (0..len).rev().filter(|pos| mask & (1 << pos) == 0) {
                    face.drop_position(cloud, pos);
                }
                face
            })
            .collect()
    }

    /// The face whose convex hull holds the point of the simplex closest to `x`, together with
    /// that point's barycentric coordinates. Among equally close faces the largest wins.
    pub fn closest_face<S: SpatialIndex>(
        &self,
        cloud: &S,
        x: &DVector<f64>,
    ) -> Result<(AffineHull, DVector<f64>), FlowError> {
        let mut best: Option<(f64, AffineHull, DVector<f64>)> = None;
        for face in self.faces(cloud) {
            let lambda = face.project(cloud, x)?;
            if lambda.iter().any(|&l| l < 0.0) {
                continue;
            }
            let sq_dist = (x - face.combine(cloud, &lambda)).norm_squared();
            if best.as_ref().map_or(true, |(d, _, _)| sq_dist < *d) {
                best = Some((sq_dist, face, lambda));
            }
        }
        // Some vertex always qualifies, its single coordinate is one.
        let (_, face, lambda) = best.ok_or_else(|| FlowError::AffinelyDependent {
            members: self.members.clone(),
        })?;
        Ok((face, lambda))
    }
}

/// Dimension of the affine span of the cloud.
///
/// Points whose offset from the span built so far is at most `tolerance` times the diameter
/// count as lying inside it.
pub fn affine_rank<S: SpatialIndex>(cloud: &S, tolerance: f64) -> Result<usize, FlowError> {
    if cloud.is_empty() {
        return Ok(0);
    }
    let mut span = AffineHull::new(cloud.dim());
    span.add_point(cloud, 0);
    let min_offset = tolerance * cloud.diameter();
    for idx in 1..cloud.len() {
        if span.is_full() {
            break;
        }
        let y = DVector::from_column_slice(cloud.point(idx));
        if span.offset(cloud, &y)?.norm() > min_offset {
            span.add_point(cloud, idx);
        }
    }
    Ok(span.len() - 1)
}

fn difference<S: SpatialIndex>(cloud: &S, a: usize, b: usize) -> DVector<f64> {
    DVector::from_column_slice(cloud.point(a)) - DVector::from_column_slice(cloud.point(b))
}
