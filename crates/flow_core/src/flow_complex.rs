//! Critical points and the append-only flow complex that owns them.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Order-independent identity of a point subset: its indices in ascending order.
///
/// The empty key identifies the maximum at infinity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SimplexKey(Vec<usize>);

impl SimplexKey {
    pub fn new(members: &[usize]) -> Self {
        let mut indices = members.to_vec();
        indices.sort_unstable();
        Self(indices)
    }

    pub fn infinity() -> Self {
        Self(Vec::new())
    }

    pub fn indices(&self) -> &[usize] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Handle of a critical point inside its [`FlowComplex`]. Stays valid for the complex's lifetime.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct CriticalPointId(pub usize);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriticalPoint {
    key: SimplexKey,
    index: usize,
    location: Vec<f64>,
    /// Critical points reached by ascending flow from this one.
    successors: BTreeSet<CriticalPointId>,
}

impl CriticalPoint {
    /// A finite critical point equidistant from `members`; its index is `members.len() - 1`.
    pub fn new(members: &[usize], location: Vec<f64>) -> Self {
        assert!(!members.is_empty(), "finite critical points need defining points");
        Self {
            key: SimplexKey::new(members),
            index: members.len() - 1,
            location,
            successors: BTreeSet::new(),
        }
    }

    pub fn at_infinity(dim: usize) -> Self {
        Self {
            key: SimplexKey::infinity(),
            index: dim,
            location: Vec::new(),
            successors: BTreeSet::new(),
        }
    }

    pub fn key(&self) -> &SimplexKey {
        &self.key
    }

    pub fn members(&self) -> &[usize] {
        self.key.indices()
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn location(&self) -> &[f64] {
        &self.location
    }

    pub fn successors(&self) -> &BTreeSet<CriticalPointId> {
        &self.successors
    }

    pub fn is_at_infinity(&self) -> bool {
        self.key.is_empty()
    }
}

impl PartialEq for CriticalPoint {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for CriticalPoint {}

/// Append-only store of critical points.
///
/// Points are never moved or removed, so a [`CriticalPointId`] handed out by `insert` keeps
/// referring to the same point. `insert` needs exclusive access; concurrent callers share the
/// complex behind a lock.
#[derive(Debug, Clone, Serialize)]
pub struct FlowComplex {
    dim: usize,
    points: Vec<CriticalPoint>,
    #[serde(skip)]
    lookup: FxHashMap<SimplexKey, CriticalPointId>,
}

impl FlowComplex {
    /// Creates a complex holding only the maximum at infinity.
    pub fn new(dim: usize) -> Self {
        let mut complex = Self {
            dim,
            points: Vec::new(),
            lookup: FxHashMap::default(),
        };
        complex.insert(CriticalPoint::at_infinity(dim));
        complex
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn infinity(&self) -> CriticalPointId {
        CriticalPointId(0)
    }

    /// Returns whether `cp` was new, and the id of the stored point with the same key.
    pub fn insert(&mut self, cp: CriticalPoint) -> (bool, CriticalPointId) {
        if let Some(&id) = self.lookup.get(cp.key()) {
            return (false, id);
        }
        let id = CriticalPointId(self.points.len());
        self.lookup.insert(cp.key().clone(), id);
        self.points.push(cp);
        (true, id)
    }

    /// Records `to` as a successor of `from`. Returns false if the link already existed.
    pub fn add_successor(&mut self, from: CriticalPointId, to: CriticalPointId) -> bool {
        self.points[from.0].successors.insert(to)
    }

    pub fn get(&self, id: CriticalPointId) -> &CriticalPoint {
        &self.points[id.0]
    }

    pub fn find(&self, key: &SimplexKey) -> Option<CriticalPointId> {
        self.lookup.get(key).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (CriticalPointId, &CriticalPoint)> {
        self.points
            .iter()
            .enumerate()
            .map(|(i, cp)| (CriticalPointId(i), cp))
    }

    /// Critical points whose successors include `id`.
    pub fn predecessors(&self, id: CriticalPointId) -> Vec<CriticalPointId> {
        self.iter()
            .filter(|(_, cp)| cp.successors.contains(&id))
            .map(|(pid, _)| pid)
            .collect()
    }

    /// All Hasse-diagram links as `(from, to)` keys, independent of insertion order.
    pub fn edges(&self) -> BTreeSet<(SimplexKey, SimplexKey)> {
        let mut edges = BTreeSet::new();
        for (_, cp) in self.iter() {
            for &succ in &cp.successors {
                edges.insert((cp.key.clone(), self.get(succ).key.clone()));
            }
        }
        edges
    }

    /// Links every finite critical point of index below `dim` that has no successor to the
    /// maximum at infinity. Such a point bounds no finite cell. Returns how many were linked.
    pub fn link_orphans_to_infinity(&mut self) -> usize {
        let infinity = self.infinity();
        let mut linked = 0;
        for cp in self.points.iter_mut() {
            if !cp.is_at_infinity() && cp.index < self.dim && cp.successors.is_empty() {
                cp.successors.insert(infinity);
                linked += 1;
            }
        }
        linked
    }

    /// Keys of all critical points, independent of insertion order.
    pub fn keys(&self) -> BTreeSet<SimplexKey> {
        self.points.iter().map(|cp| cp.key.clone()).collect()
    }

    /// Number of finite critical points per index.
    pub fn count_by_index(&self) -> Vec<usize> {
        let mut counts = vec![0; self.dim + 1];
        for cp in self.points.iter().filter(|cp| !cp.is_at_infinity()) {
            counts[cp.index] += 1;
        }
        counts
    }
}

impl<'a> IntoIterator for &'a FlowComplex {
    type Item = &'a CriticalPoint;
    type IntoIter = std::slice::Iter<'a, CriticalPoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_complex_holds_infinity() {
        let complex = FlowComplex::new(3);
        assert_eq!(complex.len(), 1);
        let inf = complex.get(complex.infinity());
        assert!(inf.is_at_infinity());
        assert_eq!(inf.index(), 3);
        assert!(inf.members().is_empty());
        assert_eq!(complex.count_by_index(), vec![0, 0, 0, 0]);
    }

    #[test]
    fn insert_deduplicates_by_member_set() {
        let mut complex = FlowComplex::new(2);
        let (first_new, first_id) = complex.insert(CriticalPoint::new(&[4, 1, 7], vec![0.0, 1.0]));
        let (second_new, second_id) =
            complex.insert(CriticalPoint::new(&[7, 4, 1], vec![0.0, 1.0]));
        assert!(first_new);
        assert!(!second_new);
        assert_eq!(first_id, second_id);
        assert_eq!(complex.len(), 2);
        assert_eq!(complex.get(first_id).members(), &[1, 4, 7]);
        assert_eq!(complex.get(first_id).index(), 2);
        assert_eq!(complex.find(&SimplexKey::new(&[1, 7, 4])), Some(first_id));
    }

    #[test]
    fn ids_stay_valid_after_growth() {
        let mut complex = FlowComplex::new(1);
        let (_, first) = complex.insert(CriticalPoint::new(&[0], vec![0.0]));
        for i in 1..100 {
            complex.insert(CriticalPoint::new(&[i], vec![i as f64]));
        }
        assert_eq!(complex.get(first).members(), &[0]);
        assert_eq!(complex.get(first).location(), &[0.0]);
    }

    #[test]
    fn successors_are_idempotent_and_reported_as_edges() {
        let mut complex = FlowComplex::new(1);
        let (_, a) = complex.insert(CriticalPoint::new(&[0], vec![0.0]));
        let (_, ab) = complex.insert(CriticalPoint::new(&[0, 1], vec![0.5]));
        assert!(complex.add_successor(a, ab));
        assert!(!complex.add_successor(a, ab));
        assert!(complex.add_successor(ab, complex.infinity()));

        assert_eq!(complex.predecessors(ab), vec![a]);
        let edges = complex.edges();
        assert_eq!(edges.len(), 2);
        assert!(edges.contains(&(SimplexKey::new(&[0]), SimplexKey::new(&[0, 1]))));
        assert!(edges.contains(&(SimplexKey::new(&[0, 1]), SimplexKey::infinity())));
        assert_eq!(complex.count_by_index(), vec![1, 1]);
    }

    #[test]
    fn orphans_are_linked_to_infinity() {
        let mut complex = FlowComplex::new(2);
        let (_, a) = complex.insert(CriticalPoint::new(&[0], vec![0.0, 0.0]));
        let (_, ab) = complex.insert(CriticalPoint::new(&[0, 1], vec![0.5, 0.0]));
        let (_, abc) = complex.insert(CriticalPoint::new(&[0, 1, 2], vec![0.5, 0.5]));
        let (_, cd) = complex.insert(CriticalPoint::new(&[2, 3], vec![1.0, 1.0]));
        complex.add_successor(a, ab);
        complex.add_successor(ab, abc);

        assert_eq!(complex.link_orphans_to_infinity(), 1);
        let inf = complex.infinity();
        assert!(complex.get(cd).successors().contains(&inf));
        // Maxima and points with successors keep their links.
        assert!(complex.get(abc).successors().is_empty());
        assert_eq!(complex.get(ab).successors().len(), 1);
        assert!(complex.get(inf).successors().is_empty());
        assert_eq!(complex.link_orphans_to_infinity(), 0);
    }

    #[test]
    fn critical_point_equality_ignores_insertion_order() {
        let a = CriticalPoint::new(&[3, 2], vec![1.0]);
        let b = CriticalPoint::new(&[2, 3], vec![5.0]);
        assert_eq!(a, b);
    }
}
