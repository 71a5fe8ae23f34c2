//! Temporal track graph over spots.
//!
//! # Representation
//! Spots live in an arena addressed by [`SpotId`]. Every spot keeps two sorted
//! adjacency maps: `forward` (neighbours in later frames) and `backward`
//! (neighbours in earlier frames). An edge is therefore always stored with
//! `frame(source) < frame(target)`; the graph is simple (no self loop, no
//! parallel edge).
//!
//! The graph is only ever mutated by one writer. Linking passes read it,
//! compute candidate links on worker threads and hand the accepted links back
//! to the owner, which commits them in spot-id order.

use crate::{
    error::{LinkError, Result},
    mapper::GraphObjectMapper,
    spot::{Dimensions, Spot},
    types::{Edge, Frame, SpotId},
};
use std::collections::{BTreeMap, BTreeSet};

/// Weighted simple graph over spots plus the key ↔ spot correspondence.
#[derive(Clone, Debug)]
pub struct ObjectGraph<K> {
    spots: Vec<Spot>,
    mapper: GraphObjectMapper<K>,
    forward: Vec<BTreeMap<SpotId, f64>>,
    backward: Vec<BTreeMap<SpotId, f64>>,
    by_frame: BTreeMap<Frame, Vec<SpotId>>,
    edge_count: usize,
}

impl<K> Default for ObjectGraph<K> {
    fn default() -> Self {
        Self {
            spots: Vec::new(),
            mapper: GraphObjectMapper::default(),
            forward: Vec::new(),
            backward: Vec::new(),
            by_frame: BTreeMap::new(),
            edge_count: 0,
        }
    }
}

impl<K: Clone + Ord> ObjectGraph<K> {
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // Vertices
    // -----------------------------------------------------------------------

    /// Insert a vertex for `key`. If the key is already mapped, the existing
    /// spot id is returned and `spot` is discarded.
    pub fn add_spot(&mut self, key: K, spot: Spot) -> SpotId {
        let (id, inserted) = self.mapper.insert(key);
        if inserted {
            self.by_frame.entry(spot.frame).or_default().push(id);
            self.spots.push(spot);
            self.forward.push(BTreeMap::new());
            self.backward.push(BTreeMap::new());
        }
        id
    }

    pub fn spot(&self, id: SpotId) -> &Spot {
        &self.spots[id.index()]
    }

    pub fn get_spot(&self, id: SpotId) -> Option<&Spot> {
        self.spots.get(id.index())
    }

    pub fn spots(&self) -> &[Spot] {
        &self.spots
    }

    pub fn spot_of(&self, key: &K) -> Option<SpotId> {
        self.mapper.spot(key)
    }

    pub fn object_of(&self, id: SpotId) -> Option<&K> {
        self.mapper.object(id)
    }

    pub fn mapper(&self) -> &GraphObjectMapper<K> {
        &self.mapper
    }

    /// Number of spots.
    pub fn len(&self) -> usize {
        self.spots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spots.is_empty()
    }

    pub fn spot_ids(&self) -> impl Iterator<Item = SpotId> {
        (0..self.spots.len()).map(SpotId)
    }

    pub fn frames(&self) -> impl Iterator<Item = Frame> + '_ {
        self.by_frame.keys().copied()
    }

    pub fn spots_by_frame(&self) -> &BTreeMap<Frame, Vec<SpotId>> {
        &self.by_frame
    }

    pub fn spots_in_frame(&self, frame: Frame) -> &[SpotId] {
        self.by_frame.get(&frame).map(Vec::as_slice).unwrap_or(&[])
    }

    // -----------------------------------------------------------------------
    // Edges
    // -----------------------------------------------------------------------

    /// Add an edge between `a` and `b`, oriented by frame order.
    ///
    /// Returns `Ok(false)` when the edge already exists.
    pub fn add_edge(&mut self, a: SpotId, b: SpotId, weight: f64) -> Result<bool> {
        let invalid = |reason: &str| LinkError::InvalidEdge {
            source_spot: a,
            target_spot: b,
            reason: reason.to_string(),
        };
        let (fa, fb) = match (self.get_spot(a), self.get_spot(b)) {
            (Some(sa), Some(sb)) => (sa.frame, sb.frame),
            _ => return Err(invalid("unknown spot")),
        };
        if fa == fb {
            return Err(invalid("both spots belong to the same frame"));
        }
        let (source, target) = if fa < fb { (a, b) } else { (b, a) };
        if self.forward[source.index()].contains_key(&target) {
            return Ok(false);
        }
        self.forward[source.index()].insert(target, weight);
        self.backward[target.index()].insert(source, weight);
        self.edge_count += 1;
        Ok(true)
    }

    /// Add an edge between two keyed spots, inserting whichever vertex is missing.
    pub fn add_object_edge(
        &mut self,
        key_a: K,
        spot_a: Spot,
        key_b: K,
        spot_b: Spot,
        weight: f64,
    ) -> Result<bool> {
        let a = self.add_spot(key_a, spot_a);
        let b = self.add_spot(key_b, spot_b);
        self.add_edge(a, b, weight)
    }

    /// Remove the edge between `a` and `b` (either orientation).
    pub fn remove_edge(&mut self, a: SpotId, b: SpotId) -> bool {
        let (source, target) = match (self.get_spot(a), self.get_spot(b)) {
            (Some(sa), Some(sb)) if sa.frame < sb.frame => (a, b),
            (Some(_), Some(_)) => (b, a),
            _ => return false,
        };
        if self.forward[source.index()].remove(&target).is_some() {
            self.backward[target.index()].remove(&source);
            self.edge_count -= 1;
            true
        } else {
            false
        }
    }

    pub fn contains_edge(&self, a: SpotId, b: SpotId) -> bool {
        self.edge_weight(a, b).is_some()
    }

    pub fn edge_weight(&self, a: SpotId, b: SpotId) -> Option<f64> {
        let fwd = self.forward.get(a.index())?;
        fwd.get(&b)
            .or_else(|| self.backward.get(a.index()).and_then(|bwd| bwd.get(&b)))
            .copied()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    /// All edges, sorted by (source, target).
    pub fn edges(&self) -> Vec<Edge> {
        self.forward
            .iter()
            .enumerate()
            .flat_map(|(s, targets)| {
                targets
                    .iter()
                    .map(move |(&t, &w)| Edge::new(SpotId(s), t, w))
            })
            .collect()
    }

    /// All edges expressed with object keys, sorted by (source, target) spot id.
    pub fn object_edges(&self) -> Vec<(K, K, f64)> {
        self.edges()
            .into_iter()
            .filter_map(|e| {
                let s = self.object_of(e.source)?.clone();
                let t = self.object_of(e.target)?.clone();
                Some((s, t, e.weight))
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Neighbour queries
    // -----------------------------------------------------------------------

    /// The unique predecessor of `spot`, or `None` if there are zero or several.
    pub fn previous(&self, spot: SpotId) -> Option<SpotId> {
        unique_key(&self.backward[spot.index()])
    }

    /// The unique successor of `spot`, or `None` if there are zero or several.
    pub fn next(&self, spot: SpotId) -> Option<SpotId> {
        unique_key(&self.forward[spot.index()])
    }

    pub fn all_previous(&self, spot: SpotId) -> Vec<SpotId> {
        self.backward[spot.index()].keys().copied().collect()
    }

    pub fn all_nexts(&self, spot: SpotId) -> Vec<SpotId> {
        self.forward[spot.index()].keys().copied().collect()
    }

    pub fn previous_count(&self, spot: SpotId) -> usize {
        self.backward[spot.index()].len()
    }

    pub fn next_count(&self, spot: SpotId) -> usize {
        self.forward[spot.index()].len()
    }

    /// True if `spot` already links forward to a spot of `frame`.
    pub fn has_next_in_frame(&self, spot: SpotId, frame: Frame) -> bool {
        self.forward[spot.index()]
            .keys()
            .any(|t| self.spots[t.index()].frame == frame)
    }

    /// True if `spot` already links backward to a spot of `frame`.
    pub fn has_previous_in_frame(&self, spot: SpotId, frame: Frame) -> bool {
        self.backward[spot.index()]
            .keys()
            .any(|s| self.spots[s.index()].frame == frame)
    }

    /// First spot of the unambiguous chain `spot` belongs to.
    ///
    /// Walks backward while each step is a 1-1 link: `spot` has exactly one
    /// predecessor and that predecessor has exactly one successor.
    pub fn track_head(&self, spot: SpotId) -> SpotId {
        let mut current = spot;
        while let Some(prev) = self.previous(current) {
            if self.next(prev) != Some(current) {
                break;
            }
            current = prev;
        }
        current
    }

    // -----------------------------------------------------------------------
    // Crossing links
    // -----------------------------------------------------------------------

    /// Remove pairs of edges that cross each other in space.
    ///
    /// Two edges with overlapping frame spans and no common endpoint cross
    /// when, on every tracked coordinate, the difference between their sources
    /// and the difference between their targets change sign or one of them is
    /// within `tolerance`. Both edges of a crossing pair are removed; several
    /// mutually crossing edges are handled as independent pairs.
    ///
    /// Returns the number of removed edges.
    pub fn remove_crossing_links(&mut self, tolerance: f64, dims: Dimensions) -> usize {
        let mut edges = self.edges();
        edges.sort_by_key(|e| (self.spots[e.source.index()].frame, e.source, e.target));

        let mut crossing: BTreeSet<(SpotId, SpotId)> = BTreeSet::new();
        for (i, e1) in edges.iter().enumerate() {
            let target_frame = self.spots[e1.target.index()].frame;
            for e2 in &edges[i + 1..] {
                // sorted by source frame: nothing further can overlap e1
                if self.spots[e2.source.index()].frame >= target_frame {
                    break;
                }
                if e1.source == e2.source
                    || e1.target == e2.target
                    || e1.source == e2.target
                    || e1.target == e2.source
                {
                    continue;
                }
                if self.edges_cross(e1, e2, tolerance, dims) {
                    crossing.insert((e1.source, e1.target));
                    crossing.insert((e2.source, e2.target));
                }
            }
        }

        for &(s, t) in &crossing {
            self.remove_edge(s, t);
        }
        if !crossing.is_empty() {
            tracing::debug!(removed = crossing.len(), "removed crossing links");
        }
        crossing.len()
    }

    fn edges_cross(&self, e1: &Edge, e2: &Edge, tolerance: f64, dims: Dimensions) -> bool {
        let (s1, t1) = (self.spot(e1.source), self.spot(e1.target));
        let (s2, t2) = (self.spot(e2.source), self.spot(e2.target));
        (0..dims.count()).all(|axis| {
            let d_source = s1.coord(axis) - s2.coord(axis);
            let d_target = t1.coord(axis) - t2.coord(axis);
            d_source * d_target < 0.0
                || d_source.abs() <= tolerance
                || d_target.abs() <= tolerance
        })
    }
}

fn unique_key(map: &BTreeMap<SpotId, f64>) -> Option<SpotId> {
    if map.len() == 1 {
        map.keys().next().copied()
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
