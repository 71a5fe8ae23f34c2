//! Cost matrix for joining track segments by gap closing, merging and splitting.
//!
//! After the frame-to-frame pass the graph is a set of segments. A spot with
//! no predecessor is a segment start, one with no successor a segment end.
//! Candidate links:
//!
//! - **gap closing**: end → start, `1 ≤ Δframe ≤ max_frame_gap + 1`,
//!   cost ≤ gap_closing_max_distance²
//! - **merging**: end → spot that already has a predecessor, `Δframe = 1`,
//!   cost ≤ merging_max_distance²
//! - **splitting**: spot that already has a successor → start, `Δframe = 1`,
//!   cost ≤ splitting_max_distance²
//!
//! Ends and split sources are both sources (rows); starts and merge targets
//! are both targets (columns). A spot is at most one row and one column.
//! Candidate generation fans out over the segment pool, working on a snapshot
//! of the spots; assembly into the sparse matrix is sequential and sorted, so
//! the matrix only depends on the graph and the settings.

use crate::{
    assignment::{CostEntry, SparseCostMatrix},
    cost::CostFunction,
    error::Result,
    executor::WorkerPool,
    graph::ObjectGraph,
    settings::SegmentSettings,
    spot::Spot,
    types::{Frame, LinkKind, SpotId},
};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Spots handed to one candidate task.
const CHUNK_SIZE: usize = 64;

/// Floor of the alternative cost, so a zero-cost candidate set still has a
/// positive no-link option.
pub const MIN_ALTERNATIVE_COST: f64 = 1e-9;

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Segment boundaries of a graph.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SegmentClassification {
    /// No predecessor
    pub starts: Vec<SpotId>,
    /// No successor
    pub ends: Vec<SpotId>,
    /// Both a predecessor and a successor
    pub middles: Vec<SpotId>,
}

impl SegmentClassification {
    pub fn of<K: Clone + Ord>(graph: &ObjectGraph<K>) -> Self {
        let mut out = Self::default();
        for id in graph.spot_ids() {
            let has_prev = graph.previous_count(id) > 0;
            let has_next = graph.next_count(id) > 0;
            if !has_prev {
                out.starts.push(id);
            }
            if !has_next {
                out.ends.push(id);
            }
            if has_prev && has_next {
                out.middles.push(id);
            }
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Candidates
// ---------------------------------------------------------------------------

/// A potential segment link.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct LinkCandidate {
    pub source: SpotId,
    pub target: SpotId,
    pub cost: f64,
    pub kind: LinkKind,
}

/// Candidate counts per link kind.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct KindCounts {
    pub gap_closing: usize,
    pub merging: usize,
    pub splitting: usize,
}

impl KindCounts {
    pub fn add(&mut self, kind: LinkKind) {
        match kind {
            LinkKind::GapClosing => self.gap_closing += 1,
            LinkKind::Merging => self.merging += 1,
            LinkKind::Splitting => self.splitting += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.gap_closing + self.merging + self.splitting
    }
}

/// Read-only view shared by the candidate tasks.
struct CandidateContext {
    spots: Vec<Spot>,
    starts_by_frame: BTreeMap<Frame, Vec<SpotId>>,
    merge_targets_by_frame: BTreeMap<Frame, Vec<SpotId>>,
    cost: CostFunction,
    settings: SegmentSettings,
}

impl CandidateContext {
    fn spot(&self, id: SpotId) -> &Spot {
        &self.spots[id.index()]
    }

    /// Gap-closing and merging candidates leaving a segment end.
    fn end_candidates(&self, end: SpotId, out: &mut Vec<LinkCandidate>) {
        let source = self.spot(end);
        let Some(next_frame) = source.frame.checked_add(1) else {
            return;
        };

        if let Some(limit) = threshold(
            self.settings.allow_gap_closing,
            self.settings.gap_closing_max_distance,
        ) {
            let last_frame = source.frame.saturating_add(self.settings.max_frame_offset());
            for starts in self.starts_by_frame.range(next_frame..=last_frame).map(|(_, s)| s) {
                self.push_within(end, starts, limit, LinkKind::GapClosing, out);
            }
        }

        if let Some(limit) = threshold(
            self.settings.allow_merging,
            self.settings.merging_max_distance,
        ) {
            if let Some(targets) = self.merge_targets_by_frame.get(&next_frame) {
                self.push_within(end, targets, limit, LinkKind::Merging, out);
            }
        }
    }

    /// Splitting candidates leaving a spot that already has a successor.
    fn split_candidates(&self, source_id: SpotId, out: &mut Vec<LinkCandidate>) {
        let Some(limit) = threshold(
            self.settings.allow_splitting,
            self.settings.splitting_max_distance,
        ) else {
            return;
        };
        let Some(next_frame) = self.spot(source_id).frame.checked_add(1) else {
            return;
        };
        if let Some(starts) = self.starts_by_frame.get(&next_frame) {
            self.push_within(source_id, starts, limit, LinkKind::Splitting, out);
        }
    }

    fn push_within(
        &self,
        source: SpotId,
        targets: &[SpotId],
        limit: f64,
        kind: LinkKind,
        out: &mut Vec<LinkCandidate>,
    ) {
        let a = self.spot(source);
        for &target in targets {
            let cost = self.cost.cost(a, self.spot(target));
            if cost <= limit {
                out.push(LinkCandidate {
                    source,
                    target,
                    cost,
                    kind,
                });
            }
        }
    }
}

/// Squared distance limit of an enabled link type with a positive distance.
fn threshold(enabled: bool, max_distance: f64) -> Option<f64> {
    (enabled && max_distance > 0.0).then_some(max_distance * max_distance)
}

/// Nearest-rank percentile of `values`, `p` in (0, 1]. Sorts `values`.
pub fn percentile(values: &mut [f64], p: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let n = values.len();
    let rank = (p * n as f64).ceil() as usize;
    Some(values[rank.clamp(1, n) - 1])
}

// ---------------------------------------------------------------------------
// Matrix
// ---------------------------------------------------------------------------

/// Segment-linking problem ready for a solver.
#[derive(Clone, Debug)]
pub struct SegmentCostMatrix {
    pub matrix: SparseCostMatrix,
    /// Spot of each row
    pub sources: Vec<SpotId>,
    /// Spot of each column
    pub targets: Vec<SpotId>,
    /// Deduplicated candidates, sorted by (source, target)
    pub candidates: Vec<LinkCandidate>,
    pub counts: KindCounts,
    pub alternative_cost: f64,
}

impl SegmentCostMatrix {
    /// Candidate behind a solved (row, col) pair.
    pub fn candidate(&self, row: usize, col: usize) -> Option<&LinkCandidate> {
        let (source, target) = (*self.sources.get(row)?, *self.targets.get(col)?);
        self.candidates
            .binary_search_by(|c| (c.source, c.target).cmp(&(source, target)))
            .ok()
            .map(|i| &self.candidates[i])
    }
}

/// Builds the segment cost matrix of a graph.
pub struct SegmentCostMatrixBuilder<'a> {
    cost: &'a CostFunction,
    settings: &'a SegmentSettings,
    pool: &'a WorkerPool,
}

impl<'a> SegmentCostMatrixBuilder<'a> {
    pub fn new(
        cost: &'a CostFunction,
        settings: &'a SegmentSettings,
        pool: &'a WorkerPool,
    ) -> Self {
        Self {
            cost,
            settings,
            pool,
        }
    }

    pub fn settings(&self) -> &SegmentSettings {
        self.settings
    }

    /// Build the matrix, or `None` when no link type is enabled or no
    /// candidate exists.
    pub fn build<K: Clone + Ord>(
        &self,
        graph: &ObjectGraph<K>,
    ) -> Result<Option<SegmentCostMatrix>> {
        self.settings.validate()?;
        if !self.settings.any_enabled() || graph.is_empty() {
            return Ok(None);
        }

        let classes = SegmentClassification::of(graph);
        let split_sources: Vec<SpotId> = graph
            .spot_ids()
            .filter(|&id| graph.next_count(id) > 0)
            .collect();
        let merge_targets = graph.spot_ids().filter(|&id| graph.previous_count(id) > 0);

        let ctx = Arc::new(CandidateContext {
            spots: graph.spots().to_vec(),
            starts_by_frame: group_by_frame(graph, classes.starts.iter().copied()),
            merge_targets_by_frame: group_by_frame(graph, merge_targets),
            cost: self.cost.clone(),
            settings: self.settings.clone(),
        });

        let mut candidates = Vec::new();
        if self.settings.allow_gap_closing || self.settings.allow_merging {
            candidates.extend(self.fan_out(&ctx, &classes.ends, CandidateContext::end_candidates)?);
        }
        if self.settings.allow_splitting {
            candidates.extend(self.fan_out(
                &ctx,
                &split_sources,
                CandidateContext::split_candidates,
            )?);
        }

        Ok(assemble(candidates, self.settings))
    }

    fn fan_out(
        &self,
        ctx: &Arc<CandidateContext>,
        spots: &[SpotId],
        generate: fn(&CandidateContext, SpotId, &mut Vec<LinkCandidate>),
    ) -> Result<Vec<LinkCandidate>> {
        let tasks: Vec<_> = spots
            .chunks(CHUNK_SIZE)
            .map(|chunk| {
                let ctx = Arc::clone(ctx);
                let chunk = chunk.to_vec();
                move || {
                    let mut out = Vec::new();
                    for id in chunk {
                        generate(&*ctx, id, &mut out);
                    }
                    out
                }
            })
            .collect();
        Ok(self.pool.run_all(tasks)?.into_iter().flatten().collect())
    }
}

fn group_by_frame<K: Clone + Ord>(
    graph: &ObjectGraph<K>,
    ids: impl Iterator<Item = SpotId>,
) -> BTreeMap<Frame, Vec<SpotId>> {
    let mut map: BTreeMap<Frame, Vec<SpotId>> = BTreeMap::new();
    for id in ids {
        map.entry(graph.spot(id).frame).or_default().push(id);
    }
    map
}

/// Deduplicate, index and cost the candidates.
fn assemble(
    candidates: Vec<LinkCandidate>,
    settings: &SegmentSettings,
) -> Option<SegmentCostMatrix> {
    let mut unique: BTreeMap<(SpotId, SpotId), LinkCandidate> = BTreeMap::new();
    for c in candidates {
        unique
            .entry((c.source, c.target))
            .and_modify(|kept| {
                if c.cost < kept.cost {
                    *kept = c;
                }
            })
            .or_insert(c);
    }
    if unique.is_empty() {
        return None;
    }
    let candidates: Vec<LinkCandidate> = unique.into_values().collect();

    let sources: Vec<SpotId> = candidates
        .iter()
        .map(|c| c.source)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let targets: Vec<SpotId> = candidates
        .iter()
        .map(|c| c.target)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let row_of: BTreeMap<SpotId, usize> =
        sources.iter().enumerate().map(|(i, &s)| (s, i)).collect();
    let col_of: BTreeMap<SpotId, usize> =
        targets.iter().enumerate().map(|(j, &t)| (t, j)).collect();

    let mut counts = KindCounts::default();
    let mut entries = Vec::with_capacity(candidates.len());
    for c in &candidates {
        counts.add(c.kind);
        entries.push(CostEntry::new(row_of[&c.source], col_of[&c.target], c.cost));
    }

    let mut costs: Vec<f64> = candidates.iter().map(|c| c.cost).collect();
    let cutoff = percentile(&mut costs, settings.cutoff_percentile).unwrap_or(0.0);
    let alternative_cost = (settings.alternative_cost_factor * cutoff).max(MIN_ALTERNATIVE_COST);

    let matrix = SparseCostMatrix::with_uniform_alternative(
        sources.len(),
        targets.len(),
        entries,
        alternative_cost,
    );
    Some(SegmentCostMatrix {
        matrix,
        sources,
        targets,
        candidates,
        counts,
        alternative_cost,
    })
}
