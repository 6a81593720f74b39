use crate::traits::SpatialIndex;
use anyhow::{bail, Result};

/// Points stored as one flat, row-major coordinate buffer.
///
/// Radius queries scan every point; the diameter is computed once at construction.
#[derive(Debug, Clone)]
pub struct PointCloud {
    dim: usize,
    coords: Vec<f64>,
    diameter: f64,
}

impl PointCloud {
    pub fn new(coords: Vec<f64>, dim: usize) -> Result<Self> {
        if dim == 0 {
            bail!("Point cloud has zero dimension.");
        }
        if coords.is_empty() {
            bail!("Point cloud must contain at least one point.");
        }
        if coords.len() % dim != 0 {
            bail!(
                "Coordinate count {} is not a multiple of dimension {}.",
                coords.len(),
                dim
            );
        }
        if let Some(pos) = coords.iter().position(|v| !v.is_finite()) {
            bail!("Point {} has a non-finite coordinate.", pos / dim);
        }

        let diameter = max_pairwise_distance(&coords, dim);
        Ok(Self {
            dim,
            coords,
            diameter,
        })
    }

    /// Builds a cloud from an iterator of points that each have `dim` coordinates.
    pub fn from_points<I, P>(points: I, dim: usize) -> Result<Self>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<[f64]>,
    {
        let mut coords = Vec::new();
        for (i, point) in points.into_iter().enumerate() {
            let point = point.as_ref();
            if point.len() != dim {
                bail!(
                    "Point {} dimension mismatch. Expected {}, got {}.",
                    i,
                    dim,
                    point.len()
                );
            }
            coords.extend_from_slice(point);
        }
        Self::new(coords, dim)
    }
}

impl SpatialIndex for PointCloud {
    fn dim(&self) -> usize {
        self.dim
    }

    fn len(&self) -> usize {
        self.coords.len() / self.dim
    }

    fn point(&self, idx: usize) -> &[f64] {
        &self.coords[idx * self.dim..(idx + 1) * self.dim]
    }

    fn diameter(&self) -> f64 {
        self.diameter
    }

    fn radius_search(&self, center: &[f64], sq_radius: f64, out: &mut Vec<usize>) {
        out.clear();
        for (idx, point) in self.coords.chunks_exact(self.dim).enumerate() {
            if squared_distance(point, center) <= sq_radius {
                out.push(idx);
            }
        }
    }
}

pub(crate) fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn max_pairwise_distance(coords: &[f64], dim: usize) -> f64 {
    let points: Vec<&[f64]> = coords.chunks_exact(dim).collect();
    let mut max_sq = 0.0_f64;
    for i in 0..points.len() {
        for j in (i + 1)..points.len() {
            max_sq = max_sq.max(squared_distance(points[i], points[j]));
        }
    }
    max_sq.sqrt()
}
