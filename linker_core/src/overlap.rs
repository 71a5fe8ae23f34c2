//! Greedy matching of two object lists by a caller-supplied overlap metric.
//!
//! Used where a global assignment is unnecessary, e.g. matching regions of the
//! same frame. Overlaps are computed in parallel over the first list; every
//! result is returned in (a, b) index order and ties go to the lowest index.

use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;

type OverlapFn<A, B> = Box<dyn Fn(&A, &B) -> f64 + Send + Sync>;
type FilterFn<A, B> = Box<dyn Fn(&A, &B, f64) -> bool + Send + Sync>;

/// Non-zero overlap between `a[a_idx]` and `b[b_idx]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Overlap {
    pub a_idx: usize,
    pub b_idx: usize,
    pub value: f64,
}

/// Maximum-overlap counterpart of every object, in both directions.
///
/// Many-to-one: several objects of one side may share a counterpart.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct MaxOverlap {
    pub a_to_b: BTreeMap<usize, Overlap>,
    pub b_to_a: BTreeMap<usize, Overlap>,
}

// ---------------------------------------------------------------------------
// Match graph
// ---------------------------------------------------------------------------

/// Weighted bipartite graph of accepted matches.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct MatchGraph {
    pub edges: Vec<Overlap>,
    pub n_a: usize,
    pub n_b: usize,
}

impl MatchGraph {
    pub fn new(n_a: usize, n_b: usize) -> Self {
        Self {
            edges: Vec::new(),
            n_a,
            n_b,
        }
    }

    pub fn add_edge(&mut self, a_idx: usize, b_idx: usize, value: f64) {
        self.edges.push(Overlap { a_idx, b_idx, value });
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Counterpart of `a_idx`, if matched.
    pub fn match_of_a(&self, a_idx: usize) -> Option<usize> {
        self.edges.iter().find(|e| e.a_idx == a_idx).map(|e| e.b_idx)
    }

    pub fn match_of_b(&self, b_idx: usize) -> Option<usize> {
        self.edges.iter().find(|e| e.b_idx == b_idx).map(|e| e.a_idx)
    }
}

// ---------------------------------------------------------------------------
// Matcher
// ---------------------------------------------------------------------------

pub struct OverlapMatcher<A, B> {
    overlap: OverlapFn<A, B>,
    filter: Option<FilterFn<A, B>>,
}

impl<A: Sync, B: Sync> OverlapMatcher<A, B> {
    pub fn new<F>(overlap: F) -> Self
    where
        F: Fn(&A, &B) -> f64 + Send + Sync + 'static,
    {
        Self {
            overlap: Box::new(overlap),
            filter: None,
        }
    }

    /// Keep only the overlaps accepted by `filter(a, b, overlap)`.
    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&A, &B, f64) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(filter));
        self
    }

    /// Keep only pairs whose Jaccard index `o / (|a| + |b| − o)` is at least `min`.
    pub fn with_min_jaccard<SA, SB>(self, min: f64, size_a: SA, size_b: SB) -> Self
    where
        SA: Fn(&A) -> f64 + Send + Sync + 'static,
        SB: Fn(&B) -> f64 + Send + Sync + 'static,
    {
        self.with_filter(move |a, b, o| {
            let union = size_a(a) + size_b(b) - o;
            union > 0.0 && o / union >= min
        })
    }

    /// Every non-zero overlap that passes the filter.
    pub fn overlaps(&self, a: &[A], b: &[B]) -> Vec<Overlap> {
        a.par_iter()
            .enumerate()
            .flat_map_iter(|(i, oa)| {
                b.iter().enumerate().filter_map(move |(j, ob)| {
                    let value = (self.overlap)(oa, ob);
                    if value <= 0.0 || !value.is_finite() {
                        return None;
                    }
                    if let Some(filter) = &self.filter {
                        if !filter(oa, ob, value) {
                            return None;
                        }
                    }
                    Some(Overlap {
                        a_idx: i,
                        b_idx: j,
                        value,
                    })
                })
            })
            .collect()
    }

    pub fn max_overlap(&self, a: &[A], b: &[B]) -> MaxOverlap {
        let mut out = MaxOverlap::default();
        for o in self.overlaps(a, b) {
            keep_max(&mut out.a_to_b, o.a_idx, o);
            keep_max(&mut out.b_to_a, o.b_idx, o);
        }
        out
    }

    /// One edge per pair that is each other's maximum-overlap counterpart.
    pub fn mutual_max_graph(&self, a: &[A], b: &[B]) -> MatchGraph {
        let max = self.max_overlap(a, b);
        let mut graph = MatchGraph::new(a.len(), b.len());
        for (&i, o) in &max.a_to_b {
            if max.b_to_a.get(&o.b_idx).map(|back| back.a_idx) == Some(i) {
                graph.add_edge(i, o.b_idx, o.value);
            }
        }
        tracing::debug!(
            overlaps = max.a_to_b.len(),
            matches = graph.edges.len(),
            "mutual max-overlap matching"
        );
        graph
    }
}

fn keep_max(best: &mut BTreeMap<usize, Overlap>, idx: usize, candidate: Overlap) {
    match best.get(&idx) {
        Some(current) if current.value >= candidate.value => {}
        _ => {
            best.insert(idx, candidate);
        }
    }
}
