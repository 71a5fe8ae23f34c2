//! Frame-to-frame linking: one bipartite assignment per pair of adjacent frames.
//!
//! # Processing steps
//! 1. For every pair of present frames exactly one apart, collect the source
//!    spots without a forward link into the target frame and the target spots
//!    without a backward link from the source frame.
//! 2. On the worker pool, per frame pair: cost every (source, target) pair,
//!    keep those with `cost ≤ max_distance²`, give every row and column the
//!    alternative cost `(1.05 · max_distance)²` and solve.
//! 3. Back on the calling thread, commit the accepted pairs as edges in frame
//!    order. A failed frame pair aborts the pass before anything is committed.

use crate::{
    assignment::{AssignmentSolver, CostEntry, SparseCostMatrix},
    cost::CostFunction,
    error::{Result, SolverError},
    executor::WorkerPool,
    graph::ObjectGraph,
    settings::FtfSettings,
    spot::Spot,
    types::{Edge, Frame, SpotId},
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Outcome of one frame-to-frame pass.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FtfReport {
    /// Frame pairs that had spots on both sides
    pub frame_pairs: usize,
    /// (source, target) pairs under the distance threshold
    pub candidates: usize,
    /// New edges committed to the graph
    pub links_added: usize,
    pub elapsed: Duration,
}

/// Frame-to-frame linker bound to a cost function, a solver and a pool.
pub struct FrameToFrameLinker<'a> {
    cost: &'a CostFunction,
    solver: &'a Arc<dyn AssignmentSolver>,
    pool: &'a WorkerPool,
}

impl<'a> FrameToFrameLinker<'a> {
    pub fn new(
        cost: &'a CostFunction,
        solver: &'a Arc<dyn AssignmentSolver>,
        pool: &'a WorkerPool,
    ) -> Self {
        Self { cost, solver, pool }
    }

    /// Link every pair of adjacent frames of `graph` and commit the result.
    pub fn link<K: Clone + Ord>(
        &self,
        graph: &mut ObjectGraph<K>,
        settings: &FtfSettings,
    ) -> Result<FtfReport> {
        settings.validate()?;
        let start = Instant::now();
        let mut report = FtfReport::default();
        if settings.max_distance <= 0.0 {
            return Ok(report);
        }

        let threshold = settings.max_distance * settings.max_distance;
        let alternative = settings.alternative_cost();
        let jobs = frame_pair_jobs(graph)
            .into_iter()
            .map(|(source_frame, sources, targets)| FramePairJob {
                source_frame,
                sources,
                targets,
                threshold,
                alternative,
                cost: self.cost.clone(),
                solver: Arc::clone(self.solver),
            })
            .collect::<Vec<_>>();
        report.frame_pairs = jobs.len();

        let tasks: Vec<_> = jobs.into_iter().map(|job| move || job.run()).collect();
        let outcomes = self
            .pool
            .run_all(tasks)?
            .into_iter()
            .collect::<std::result::Result<Vec<_>, SolverError>>()?;

        for outcome in outcomes {
            report.candidates += outcome.candidates;
            for edge in outcome.edges {
                if graph.add_edge(edge.source, edge.target, edge.weight)? {
                    report.links_added += 1;
                }
            }
        }

        report.elapsed = start.elapsed();
        tracing::debug!(
            frame_pairs = report.frame_pairs,
            candidates = report.candidates,
            links = report.links_added,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "frame-to-frame pass done"
        );
        Ok(report)
    }
}

type SpotSet = Vec<(SpotId, Spot)>;

/// Snapshot of every adjacent frame pair with linkable spots on both sides.
fn frame_pair_jobs<K: Clone + Ord>(graph: &ObjectGraph<K>) -> Vec<(Frame, SpotSet, SpotSet)> {
    let frames: Vec<Frame> = graph.frames().collect();
    frames
        .windows(2)
        .filter(|w| w[0].checked_add(1) == Some(w[1]))
        .filter_map(|w| {
            let (f0, f1) = (w[0], w[1]);
            let sources: SpotSet = graph
                .spots_in_frame(f0)
                .iter()
                .filter(|&&s| !graph.has_next_in_frame(s, f1))
                .map(|&s| (s, graph.spot(s).clone()))
                .collect();
            let targets: SpotSet = graph
                .spots_in_frame(f1)
                .iter()
                .filter(|&&t| !graph.has_previous_in_frame(t, f0))
                .map(|&t| (t, graph.spot(t).clone()))
                .collect();
            (!sources.is_empty() && !targets.is_empty()).then_some((f0, sources, targets))
        })
        .collect()
}

struct FramePairJob {
    source_frame: Frame,
    sources: SpotSet,
    targets: SpotSet,
    threshold: f64,
    alternative: f64,
    cost: CostFunction,
    solver: Arc<dyn AssignmentSolver>,
}

struct FramePairOutcome {
    candidates: usize,
    edges: Vec<Edge>,
}

impl FramePairJob {
    fn run(self) -> std::result::Result<FramePairOutcome, SolverError> {
        let mut entries = Vec::new();
        for (i, (_, s)) in self.sources.iter().enumerate() {
            for (j, (_, t)) in self.targets.iter().enumerate() {
                let c = self.cost.cost(s, t);
                if c <= self.threshold {
                    entries.push(CostEntry::new(i, j, c));
                }
            }
        }
        let candidates = entries.len();
        if entries.is_empty() {
            return Ok(FramePairOutcome {
                candidates,
                edges: Vec::new(),
            });
        }

        let matrix = SparseCostMatrix::with_uniform_alternative(
            self.sources.len(),
            self.targets.len(),
            entries,
            self.alternative,
        );
        let assignment = self.solver.solve(&matrix).map_err(|e| {
            tracing::error!(frame = self.source_frame, error = %e, "frame pair assignment failed");
            e
        })?;

        let edges = assignment
            .pairs
            .iter()
            .map(|&(i, j)| {
                matrix
                    .cost(i, j)
                    .map(|c| Edge::new(self.sources[i].0, self.targets[j].0, c))
                    .ok_or_else(|| {
                        SolverError::failed(format!(
                            "solver assigned ({i}, {j}), which is not a candidate of frame {}",
                            self.source_frame
                        ))
                    })
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(FramePairOutcome { candidates, edges })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assignment::{Assignment, HungarianSolver};
    use crate::spot::Dimensions;
    use approx::assert_abs_diff_eq;

    fn pool() -> WorkerPool {
        WorkerPool::new("ftf-test", 2, Duration::from_secs(30)).unwrap()
    }

    fn solver() -> Arc<dyn AssignmentSolver> {
        Arc::new(HungarianSolver)
    }

    fn graph(points: &[(u32, Frame, f64, f64)]) -> ObjectGraph<u32> {
        let mut g = ObjectGraph::new();
        for &(k, f, x, y) in points {
            g.add_spot(k, Spot::at(f, x, y, 0.0));
        }
        g
    }

    fn link(g: &mut ObjectGraph<u32>, max_distance: f64) -> Result<FtfReport> {
        let cost = CostFunction::squared_distance(Dimensions::Two);
        let solver = solver();
        let pool = pool();
        FrameToFrameLinker::new(&cost, &solver, &pool).link(g, &FtfSettings::new(max_distance))
    }

    #[test]
    fn single_pair_is_linked() {
        let mut g = graph(&[(0, 0, 0.0, 0.0), (1, 1, 1.0, 0.0)]);
        let report = link(&mut g, 5.0).unwrap();
        assert_eq!(report.links_added, 1);
        assert_abs_diff_eq!(g.edge_weight(SpotId(0), SpotId(1)).unwrap(), 1.0);
        assert_eq!(g.track_head(SpotId(1)), SpotId(0));
    }

    #[test]
    fn crossing_paths_resolved_globally() {
        // cheapest pair first would take 1 -> 2 and leave 0 -> 3 at cost 25
        let mut g = graph(&[
            (0, 0, 0.0, 0.0),
            (1, 0, 3.0, 0.0),
            (2, 1, 2.0, 0.0),
            (3, 1, 5.0, 0.0),
        ]);
        link(&mut g, 10.0).unwrap();
        assert!(g.contains_edge(SpotId(0), SpotId(2)));
        assert!(g.contains_edge(SpotId(1), SpotId(3)));
        assert_eq!(g.edge_count(), 2);
    }

    #[test]
    fn pairs_above_threshold_are_never_linked() {
        let mut g = graph(&[(0, 0, 0.0, 0.0), (1, 1, 6.0, 0.0), (2, 1, 2.0, 2.0)]);
        link(&mut g, 5.0).unwrap();
        for e in g.edges() {
            assert!(e.weight <= 25.0);
            assert!(g.spot(e.target).frame > g.spot(e.source).frame);
        }
        assert!(g.contains_edge(SpotId(0), SpotId(2)));
        assert!(!g.contains_edge(SpotId(0), SpotId(1)));
    }

    #[test]
    fn missing_frame_is_not_bridged() {
        let mut g = graph(&[(0, 0, 0.0, 0.0), (1, 2, 0.0, 0.0)]);
        let report = link(&mut g, 5.0).unwrap();
        assert_eq!(report.frame_pairs, 0);
        assert_eq!(g.edge_count(), 0);
    }

    #[test]
    fn zero_threshold_links_nothing() {
        let mut g = graph(&[(0, 0, 0.0, 0.0), (1, 1, 0.0, 0.0), (2, 2, 1.0, 0.0)]);
        link(&mut g, 0.0).unwrap();
        assert_eq!(g.edge_count(), 0);
    }

    #[test]
    fn existing_links_are_kept_and_excluded() {
        let mut g = graph(&[
            (0, 0, 0.0, 0.0),
            (1, 0, 1.0, 0.0),
            (2, 1, 0.0, 0.0),
            (3, 1, 1.0, 0.0),
        ]);
        // pre-existing link 0 -> 3 (not the closest)
        g.add_edge(SpotId(0), SpotId(3), 1.0).unwrap();
        link(&mut g, 5.0).unwrap();
        assert!(g.contains_edge(SpotId(0), SpotId(3)));
        assert!(g.contains_edge(SpotId(1), SpotId(2)));
        assert_eq!(g.next_count(SpotId(0)), 1);
        assert_eq!(g.edge_count(), 2);
    }

    #[test]
    fn runs_are_deterministic() {
        let points: Vec<(u32, Frame, f64, f64)> = (0..60)
            .map(|i| {
                let frame = (i % 6) as Frame;
                let lane = (i / 6) as f64;
                (i, frame, frame as f64 * 0.5, lane * 1.5)
            })
            .collect();
        let mut a = graph(&points);
        let mut b = graph(&points);
        link(&mut a, 2.0).unwrap();
        link(&mut b, 2.0).unwrap();
        assert_eq!(a.edges(), b.edges());
        assert_eq!(a.edge_count(), 50);
    }

    struct FailingSolver;

    impl AssignmentSolver for FailingSolver {
        fn solve(&self, _: &SparseCostMatrix) -> std::result::Result<Assignment, SolverError> {
            Err(SolverError::failed("solver exploded"))
        }
    }

    #[test]
    fn solver_failure_commits_nothing() {
        let mut g = graph(&[(0, 0, 0.0, 0.0), (1, 1, 1.0, 0.0)]);
        let cost = CostFunction::squared_distance(Dimensions::Two);
        let solver: Arc<dyn AssignmentSolver> = Arc::new(FailingSolver);
        let pool = pool();
        let err = FrameToFrameLinker::new(&cost, &solver, &pool)
            .link(&mut g, &FtfSettings::new(5.0))
            .unwrap_err();
        assert_eq!(err.to_string(), "solver exploded");
        assert_eq!(g.edge_count(), 0);
    }
}
