//! Projection of the track graph onto domain objects.
//!
//! Domain objects carry an optional previous, an optional next and a
//! trackhead. The graph is richer than that: a spot may have several
//! predecessors (merge) or successors (split). Such links cannot be written as
//! previous/next and are reported as [`AdditionalLinks`] instead.

use crate::{graph::ObjectGraph, types::Frame};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;

// ---------------------------------------------------------------------------
// Editor contract
// ---------------------------------------------------------------------------

/// Mutator applied to domain objects when links are projected.
pub trait TrackLinkEditor<K> {
    fn previous(&self, object: &K) -> Option<K>;
    fn next(&self, object: &K) -> Option<K>;
    fn trackhead(&self, object: &K) -> K;

    /// Link `prev` → `next`.
    ///
    /// `set_prev` writes `next.previous = prev`, `set_next` writes
    /// `prev.next = next`. With `set_trackhead`, if the two objects point at
    /// each other, `next` (and its 1-1 successors) inherit `prev`'s trackhead.
    fn set_track_links(
        &mut self,
        prev: &K,
        next: &K,
        set_prev: bool,
        set_next: bool,
        set_trackhead: bool,
    );

    /// Clear the previous and/or next pointer of `object` (and the reciprocal
    /// pointer of its counterpart). With `propagate_trackhead`, the trackhead
    /// of `object` is recomputed and pushed down its 1-1 successors.
    fn reset_track_links(
        &mut self,
        object: &K,
        reset_prev: bool,
        reset_next: bool,
        propagate_trackhead: bool,
    );
}

// ---------------------------------------------------------------------------
// Additional links
// ---------------------------------------------------------------------------

/// Unordered pairs of linked objects that could not be written as previous/next.
///
/// Stored as `(earlier, later)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdditionalLinks<K: Ord> {
    pairs: BTreeSet<(K, K)>,
}

impl<K: Ord> Default for AdditionalLinks<K> {
    fn default() -> Self {
        Self {
            pairs: BTreeSet::new(),
        }
    }
}

impl<K: Ord + Clone> AdditionalLinks<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, earlier: K, later: K) -> bool {
        self.pairs.insert((earlier, later))
    }

    /// Symmetric membership test.
    pub fn contains(&self, a: &K, b: &K) -> bool {
        self.pairs.contains(&(a.clone(), b.clone()))
            || self.pairs.contains(&(b.clone(), a.clone()))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(K, K)> {
        self.pairs.iter()
    }
}

// ---------------------------------------------------------------------------
// In-crate editor
// ---------------------------------------------------------------------------

/// Link state of one object. A `None` trackhead means the object is its own.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkState<K> {
    pub previous: Option<K>,
    pub next: Option<K>,
    pub trackhead: Option<K>,
}

impl<K> Default for LinkState<K> {
    fn default() -> Self {
        Self {
            previous: None,
            next: None,
            trackhead: None,
        }
    }
}

/// Map-backed [`TrackLinkEditor`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkStore<K: Ord> {
    states: BTreeMap<K, LinkState<K>>,
}

impl<K: Ord> Default for LinkStore<K> {
    fn default() -> Self {
        Self {
            states: BTreeMap::new(),
        }
    }
}

impl<K: Clone + Ord> LinkStore<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, object: &K) -> Option<&LinkState<K>> {
        self.states.get(object)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &LinkState<K>)> {
        self.states.iter()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    fn state_mut(&mut self, object: &K) -> &mut LinkState<K> {
        self.states.entry(object.clone()).or_default()
    }

    fn is_one_to_one(&self, prev: &K, next: &K) -> bool {
        let forward = self.states.get(prev).and_then(|s| s.next.as_ref()) == Some(next);
        let backward = self.states.get(next).and_then(|s| s.previous.as_ref()) == Some(prev);
        forward && backward
    }

    /// Set the trackhead of `start` and walk down its 1-1 successors.
    fn propagate_trackhead(&mut self, start: &K, head: &K) {
        let mut current = start.clone();
        // a chain cannot be longer than the store
        for _ in 0..=self.states.len() {
            let own = &current == head;
            self.state_mut(&current).trackhead = if own { None } else { Some(head.clone()) };
            match self.states.get(&current).and_then(|s| s.next.clone()) {
                Some(n) if self.is_one_to_one(&current, &n) => current = n,
                _ => break,
            }
        }
    }
}

impl<K: Clone + Ord> TrackLinkEditor<K> for LinkStore<K> {
    fn previous(&self, object: &K) -> Option<K> {
        self.states.get(object).and_then(|s| s.previous.clone())
    }

    fn next(&self, object: &K) -> Option<K> {
        self.states.get(object).and_then(|s| s.next.clone())
    }

    fn trackhead(&self, object: &K) -> K {
        self.states
            .get(object)
            .and_then(|s| s.trackhead.clone())
            .unwrap_or_else(|| object.clone())
    }

    fn set_track_links(
        &mut self,
        prev: &K,
        next: &K,
        set_prev: bool,
        set_next: bool,
        set_trackhead: bool,
    ) {
        if set_prev {
            self.state_mut(next).previous = Some(prev.clone());
        }
        if set_next {
            self.state_mut(prev).next = Some(next.clone());
        }
        if set_trackhead && self.is_one_to_one(prev, next) {
            let head = self.trackhead(prev);
            self.propagate_trackhead(next, &head);
        }
    }

    fn reset_track_links(
        &mut self,
        object: &K,
        reset_prev: bool,
        reset_next: bool,
        propagate_trackhead: bool,
    ) {
        if reset_prev {
            if let Some(p) = self.state_mut(object).previous.take() {
                let counterpart = self.state_mut(&p);
                if counterpart.next.as_ref() == Some(object) {
                    counterpart.next = None;
                }
            }
        }
        if reset_next {
            if let Some(n) = self.state_mut(object).next.take() {
                let counterpart = self.state_mut(&n);
                if counterpart.previous.as_ref() == Some(object) {
                    counterpart.previous = None;
                    if propagate_trackhead {
                        self.propagate_trackhead(&n, &n);
                    }
                }
            }
        }
        if propagate_trackhead {
            let head = match self.previous(object) {
                Some(p) if self.is_one_to_one(&p, object) => self.trackhead(&p),
                _ => object.clone(),
            };
            self.propagate_trackhead(object, &head);
        }
    }
}

// ---------------------------------------------------------------------------
// Projection
// ---------------------------------------------------------------------------

impl<K: Clone + Ord + Debug> ObjectGraph<K> {
    /// Write previous/next/trackhead of every object in `objects_by_frame`
    /// through `editor`, and return the links that do not fit that model.
    ///
    /// Frames are visited in ascending order, objects in input order. A link
    /// already present in the editor with a different counterpart wins over
    /// the graph; the conflict is logged and the new link dropped.
    pub fn set_track_links<E: TrackLinkEditor<K>>(
        &self,
        objects_by_frame: &BTreeMap<Frame, Vec<K>>,
        editor: &mut E,
    ) -> AdditionalLinks<K> {
        let mut additional = AdditionalLinks::new();

        for key in objects_by_frame.values().flatten() {
            let Some(spot) = self.spot_of(key) else {
                continue;
            };

            let prevs = self.all_previous(spot);
            if prevs.len() == 1 {
                if let Some(p) = self.object_of(prevs[0]) {
                    if editor.previous(key).as_ref() != Some(p) && link_is_free(editor, p, key) {
                        editor.set_track_links(p, key, true, false, false);
                    }
                }
            } else {
                for p in prevs.iter().filter_map(|&p| self.object_of(p)) {
                    additional.insert(p.clone(), key.clone());
                }
            }

            let nexts = self.all_nexts(spot);
            if nexts.len() == 1 {
                if let Some(n) = self.object_of(nexts[0]) {
                    if editor.next(key).as_ref() != Some(n) && link_is_free(editor, key, n) {
                        editor.set_track_links(key, n, false, true, false);
                    }
                }
            } else {
                for n in nexts.iter().filter_map(|&n| self.object_of(n)) {
                    additional.insert(key.clone(), n.clone());
                }
            }
        }

        // Trackheads, once every pointer is written. Ascending frames make the
        // head of a predecessor final before its successor is visited.
        for key in objects_by_frame.values().flatten() {
            let one_to_one_prev = editor
                .previous(key)
                .filter(|p| editor.next(p).as_ref() == Some(key));
            let head = match &one_to_one_prev {
                Some(p) => editor.trackhead(p),
                None => key.clone(),
            };
            if editor.trackhead(key) != head {
                match one_to_one_prev {
                    Some(p) => editor.set_track_links(&p, key, false, false, true),
                    None => editor.reset_track_links(key, false, false, true),
                }
            }
        }

        additional
    }
}

/// Whether `prev` → `next` can be written without contradicting a link the
/// editor already holds on either side. An existing link wins; a clash is
/// logged and the whole new link is dropped.
fn link_is_free<K, E>(editor: &E, prev: &K, next: &K) -> bool
where
    K: Clone + Ord + Debug,
    E: TrackLinkEditor<K>,
{
    let held_next = editor.next(prev).filter(|n| n != next);
    let held_prev = editor.previous(next).filter(|p| p != prev);
    if held_next.is_none() && held_prev.is_none() {
        return true;
    }
    tracing::warn!(
        prev = ?prev,
        next = ?next,
        existing_next = ?held_next,
        existing_previous = ?held_prev,
        "objects already hold a different link; keeping it"
    );
    false
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spot::Spot;
    use crate::types::SpotId;

    fn frames_of(g: &ObjectGraph<u32>) -> BTreeMap<Frame, Vec<u32>> {
        let mut map: BTreeMap<Frame, Vec<u32>> = BTreeMap::new();
        for (id, key) in g.mapper().iter() {
            map.entry(g.spot(id).frame).or_default().push(*key);
        }
        map
    }

    fn chain_graph() -> ObjectGraph<u32> {
        let mut g = ObjectGraph::new();
        for (key, frame) in [(10, 0), (11, 1), (12, 2)] {
            g.add_spot(key, Spot::at(frame, 0.0, 0.0, 0.0));
        }
        g.add_edge(SpotId(0), SpotId(1), 0.0).unwrap();
        g.add_edge(SpotId(1), SpotId(2), 0.0).unwrap();
        g
    }

    #[test]
    fn chain_is_written_with_trackheads() {
        let g = chain_graph();
        let mut store = LinkStore::new();
        let extra = g.set_track_links(&frames_of(&g), &mut store);
        assert!(extra.is_empty());
        assert_eq!(store.previous(&11), Some(10));
        assert_eq!(store.next(&11), Some(12));
        assert_eq!(store.trackhead(&12), 10);
        assert_eq!(store.trackhead(&10), 10);
    }

    #[test]
    fn split_goes_to_additional_links() {
        let mut g = ObjectGraph::new();
        g.add_spot(1u32, Spot::at(0, 0.0, 0.0, 0.0));
        g.add_spot(2u32, Spot::at(1, -1.0, 0.0, 0.0));
        g.add_spot(3u32, Spot::at(1, 1.0, 0.0, 0.0));
        g.add_edge(SpotId(0), SpotId(1), 1.0).unwrap();
        g.add_edge(SpotId(0), SpotId(2), 1.0).unwrap();

        let mut store = LinkStore::new();
        let extra = g.set_track_links(&frames_of(&g), &mut store);
        assert_eq!(extra.len(), 2);
        assert!(extra.contains(&1, &2));
        assert!(extra.contains(&3, &1));
        assert_eq!(store.next(&1), None);
        assert_eq!(store.previous(&2), Some(1));
        // daughters start their own tracks
        assert_eq!(store.trackhead(&2), 2);
        assert_eq!(store.trackhead(&3), 3);
    }

    #[test]
    fn projection_is_idempotent() {
        let g = chain_graph();
        let frames = frames_of(&g);
        let mut store = LinkStore::new();
        let first = g.set_track_links(&frames, &mut store);
        let snapshot = store.clone();
        let second = g.set_track_links(&frames, &mut store);
        assert_eq!(first, second);
        assert_eq!(snapshot, store);
    }

    #[test]
    fn existing_link_wins_over_graph() {
        let g = chain_graph();
        let mut store = LinkStore::new();
        // an earlier pass linked 99 -> 11
        store.set_track_links(&99, &11, true, true, true);
        g.set_track_links(&frames_of(&g), &mut store);
        assert_eq!(store.previous(&11), Some(99));
        assert_eq!(store.next(&99), Some(11));
        // neither half of 10 -> 11 is written
        assert_eq!(store.next(&10), None);
        assert_eq!(store.next(&11), Some(12));
        assert_eq!(store.trackhead(&12), 99);
        assert_eq!(store.trackhead(&10), 10);
    }

    #[test]
    fn existing_next_blocks_previous() {
        let g = chain_graph();
        let mut store = LinkStore::new();
        // an earlier pass linked 11 -> 98
        store.set_track_links(&11, &98, true, true, true);
        g.set_track_links(&frames_of(&g), &mut store);
        assert_eq!(store.next(&11), Some(98));
        assert_eq!(store.previous(&98), Some(11));
        assert_eq!(store.previous(&12), None);
        assert_eq!(store.trackhead(&12), 12);
        assert_eq!(store.previous(&11), Some(10));
        assert_eq!(store.next(&10), Some(11));
    }

    #[test]
    fn reset_breaks_chain_and_repropagates() {
        let g = chain_graph();
        let mut store = LinkStore::new();
        g.set_track_links(&frames_of(&g), &mut store);
        store.reset_track_links(&11, true, false, true);
        assert_eq!(store.previous(&11), None);
        assert_eq!(store.next(&10), None);
        assert_eq!(store.trackhead(&11), 11);
        assert_eq!(store.trackhead(&12), 11);
    }
}
