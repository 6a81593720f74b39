/// A spatial index over an immutable point cloud.
/// Every query the flow complex algorithm issues against the input goes through this trait.
pub trait SpatialIndex: Sync {
    /// Returns the dimension of the ambient space.
    fn dim(&self) -> usize;

    /// Returns the number of points.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Coordinates of the point with the given index.
    fn point(&self, idx: usize) -> &[f64];

    /// Largest pairwise distance between two points of the cloud.
    fn diameter(&self) -> f64;

    /// Collects every index whose squared distance to `center` is at most `sq_radius`.
    /// center: query location
    /// sq_radius: squared search radius
    /// out: buffer that is cleared and then filled with the matching indices
    fn radius_search(&self, center: &[f64], sq_radius: f64, out: &mut Vec<usize>);
}
