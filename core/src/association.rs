//! Landmark range queries and nearest-neighbor data association.
//!
//! Weighting a particle needs two spatial queries against the map: the landmarks within sensor range of the
//! particle, and for each transformed observation the closest of those candidates. The range query sits behind the
//! [LandmarkIndex] trait so that the naive scan over the whole map can be swapped for a spatial index without
//! touching the weighting code.
//!
//! # Implementations
//!
//! - [LandmarkMap]: O(m) linear scan, the reference behavior.
//! - [RTreeLandmarkIndex]: O(log m + k) range query using an R-tree, for large maps.
//!
//! Both return candidates in map enumeration order, so nearest-neighbor ties resolve identically.
use rstar::{AABB, PointDistance, RTree, RTreeObject};

use crate::map::{LandmarkMap, MapLandmark};
use crate::measurements::LandmarkObservation;

/// Spatial query capability over a static landmark map.
pub trait LandmarkIndex: Sync {
    /// All landmarks whose Euclidean distance to `(x, y)` is at most `range`, in map enumeration order.
    fn landmarks_in_range(&self, x: f64, y: f64, range: f64) -> Vec<MapLandmark>;
    /// Look up a landmark by its persistent id.
    fn landmark(&self, id: i32) -> Option<&MapLandmark>;
}

/// Inclusive sensor range test shared by every [LandmarkIndex] implementation.
pub fn in_range(landmark: &MapLandmark, x: f64, y: f64, range: f64) -> bool {
    (landmark.x - x).hypot(landmark.y - y) <= range
}

impl LandmarkIndex for LandmarkMap {
    fn landmarks_in_range(&self, x: f64, y: f64, range: f64) -> Vec<MapLandmark> {
        self.iter()
            .filter(|landmark| in_range(landmark, x, y, range))
            .copied()
            .collect()
    }
    fn landmark(&self, id: i32) -> Option<&MapLandmark> {
        self.get(id)
    }
}

/// Relative padding of R-tree range queries.
const RANGE_MARGIN: f64 = 1e-9;

/// A landmark position stored in the R-tree, tagged with its enumeration position in the map.
#[derive(Clone, Copy, Debug)]
struct IndexedLandmark {
    position: [f64; 2],
    order: usize,
}
impl RTreeObject for IndexedLandmark {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.position)
    }
}
impl PointDistance for IndexedLandmark {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dx = self.position[0] - point[0];
        let dy = self.position[1] - point[1];
        dx * dx + dy * dy
    }
}

/// R-tree backed landmark index.
///
/// # Example
/// ```rust
/// use mcl::association::{LandmarkIndex, RTreeLandmarkIndex};
/// use mcl::map::{LandmarkMap, MapLandmark};
///
/// let map = LandmarkMap::new(vec![
///     MapLandmark::new(1, 0.0, 0.0),
///     MapLandmark::new(2, 10.0, 0.0),
/// ]).unwrap();
/// let index = RTreeLandmarkIndex::new(map);
/// let nearby = index.landmarks_in_range(1.0, 0.0, 2.0);
/// assert_eq!(nearby.len(), 1);
/// assert_eq!(nearby[0].id, 1);
/// ```
#[derive(Clone)]
pub struct RTreeLandmarkIndex {
    map: LandmarkMap,
    tree: RTree<IndexedLandmark>,
}
impl RTreeLandmarkIndex {
    pub fn new(map: LandmarkMap) -> Self {
        let indexed: Vec<IndexedLandmark> = map
            .iter()
            .enumerate()
            .map(|(order, landmark)| IndexedLandmark {
                position: [landmark.x, landmark.y],
                order,
            })
            .collect();
        RTreeLandmarkIndex {
            map,
            tree: RTree::bulk_load(indexed),
        }
    }
    /// The map this index was built from.
    pub fn map(&self) -> &LandmarkMap {
        &self.map
    }
    pub fn len(&self) -> usize {
        self.tree.size()
    }
    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }
}
impl LandmarkIndex for RTreeLandmarkIndex {
    fn landmarks_in_range(&self, x: f64, y: f64, range: f64) -> Vec<MapLandmark> {
        if range < 0.0 {
            return Vec::new();
        }
        // Squared distances round differently from hypot, so the tree is searched with a margin and the hits are
        // filtered with the same test as the linear scan.
        let padded = range * (1.0 + RANGE_MARGIN) + RANGE_MARGIN;
        let landmarks = self.map.landmarks();
        let mut orders: Vec<usize> = self
            .tree
            .locate_within_distance([x, y], padded * padded)
            .map(|indexed| indexed.order)
            .filter(|&i| in_range(&landmarks[i], x, y, range))
            .collect();
        // Restore map order so tie-breaking matches the linear scan
        orders.sort_unstable();
        orders.into_iter().map(|i| landmarks[i]).collect()
    }
    fn landmark(&self, id: i32) -> Option<&MapLandmark> {
        self.map.get(id)
    }
}

/// Closest candidate to an observation, ties resolved to the first in enumeration order.
///
/// Returns `None` when there are no candidates.
pub fn nearest_landmark<'a>(
    candidates: &'a [MapLandmark],
    observation: &LandmarkObservation,
) -> Option<&'a MapLandmark> {
    let mut best: Option<(&MapLandmark, f64)> = None;
    for candidate in candidates {
        let distance = observation.distance_squared_to(candidate);
        match best {
            Some((_, best_distance)) if distance >= best_distance => {}
            _ => best = Some((candidate, distance)),
        }
    }
    best.map(|(landmark, _)| landmark)
}

/// Nearest-neighbor data association.
///
/// Assigns to every (map-frame) observation the id of the closest candidate landmark. With an empty candidate
/// set every observation is left unassigned. Cost is O(|observations| · |candidates|).
pub fn associate(candidates: &[MapLandmark], observations: &mut [LandmarkObservation]) {
    for observation in observations.iter_mut() {
        observation.id = nearest_landmark(candidates, observation).map(|landmark| landmark.id);
    }
}
