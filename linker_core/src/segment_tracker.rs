//! Segment linking pass: build the segment cost matrix, solve it, commit.

use crate::{
    assignment::AssignmentSolver,
    error::{Result, SolverError},
    graph::ObjectGraph,
    segment_matrix::{KindCounts, LinkCandidate, SegmentCostMatrixBuilder},
};
use std::time::{Duration, Instant};

/// Outcome of one segment pass.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SegmentReport {
    /// Candidates per link kind after deduplication
    pub candidates: KindCounts,
    /// Accepted links per kind
    pub accepted: KindCounts,
    /// New edges committed to the graph
    pub links_added: usize,
    /// Alternative cost of the matrix, if one was built
    pub alternative_cost: Option<f64>,
    pub elapsed: Duration,
}

pub struct SegmentTracker<'a> {
    builder: SegmentCostMatrixBuilder<'a>,
    solver: &'a dyn AssignmentSolver,
}

impl<'a> SegmentTracker<'a> {
    pub fn new(builder: SegmentCostMatrixBuilder<'a>, solver: &'a dyn AssignmentSolver) -> Self {
        Self { builder, solver }
    }

    /// Link segments of `graph`. Nothing is committed unless the whole
    /// assignment is valid.
    pub fn track<K: Clone + Ord>(&self, graph: &mut ObjectGraph<K>) -> Result<SegmentReport> {
        let start = Instant::now();
        let mut report = SegmentReport::default();

        let Some(problem) = self.builder.build(graph)? else {
            report.elapsed = start.elapsed();
            tracing::debug!("segment pass: no candidate links");
            return Ok(report);
        };
        report.candidates = problem.counts;
        report.alternative_cost = Some(problem.alternative_cost);

        let assignment = self.solver.solve(&problem.matrix)?;
        let accepted: Vec<LinkCandidate> = assignment
            .pairs
            .iter()
            .map(|&(row, col)| {
                problem.candidate(row, col).copied().ok_or_else(|| {
                    SolverError::failed(format!(
                        "solver assigned ({row}, {col}), which is not a segment candidate"
                    ))
                })
            })
            .collect::<std::result::Result<_, _>>()?;

        for link in accepted {
            if graph.add_edge(link.source, link.target, link.cost)? {
                report.accepted.add(link.kind);
                report.links_added += 1;
            }
        }

        report.elapsed = start.elapsed();
        tracing::debug!(
            gap_closing = report.accepted.gap_closing,
            merging = report.accepted.merging,
            splitting = report.accepted.splitting,
            candidates = report.candidates.total(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "segment pass done"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assignment::{Assignment, HungarianSolver, SparseCostMatrix},
        cost::CostFunction,
        executor::WorkerPool,
        settings::SegmentSettings,
        spot::{Dimensions, Spot},
        types::{Frame, SpotId},
    };

    fn run(g: &mut ObjectGraph<usize>, settings: &SegmentSettings) -> SegmentReport {
        let cost = CostFunction::squared_distance(Dimensions::Two);
        let pool = WorkerPool::new("segment-test", 2, Duration::from_secs(30)).unwrap();
        let builder = SegmentCostMatrixBuilder::new(&cost, settings, &pool);
        SegmentTracker::new(builder, &HungarianSolver).track(g).unwrap()
    }

    fn graph(points: &[(Frame, f64, f64)], edges: &[(usize, usize)]) -> ObjectGraph<usize> {
        let mut g = ObjectGraph::new();
        for (k, &(f, x, y)) in points.iter().enumerate() {
            g.add_spot(k, Spot::at(f, x, y, 0.0));
        }
        for &(a, b) in edges {
            g.add_edge(SpotId(a), SpotId(b), 1.0).unwrap();
        }
        g
    }

    #[test]
    fn closes_a_single_frame_gap() {
        // 0 -> 1, gap at frame 2, 2 -> 3
        let mut g = graph(
            &[(0, 0.0, 0.0), (1, 1.0, 0.0), (3, 3.0, 0.0), (4, 4.0, 0.0)],
            &[(0, 1), (2, 3)],
        );
        let report = run(&mut g, &SegmentSettings::default());
        assert_eq!(report.accepted.gap_closing, 1);
        assert!(g.contains_edge(SpotId(1), SpotId(2)));
        assert_eq!(g.track_head(SpotId(3)), SpotId(0));
    }

    #[test]
    fn picks_the_cheaper_of_two_gap_closings() {
        // end 0 in frame 0, starts 1 (near) and 2 (far) in frame 2
        let mut g = graph(&[(0, 0.0, 0.0), (2, 1.0, 0.0), (2, 4.0, 0.0)], &[]);
        run(&mut g, &SegmentSettings::default());
        assert!(g.contains_edge(SpotId(0), SpotId(1)));
        assert!(!g.contains_edge(SpotId(0), SpotId(2)));
    }

    #[test]
    fn splitting_creates_a_branch() {
        // 0 -> 1 -> 2 and a start 3 in frame 1 next to 0
        let mut g = graph(
            &[(0, 0.0, 0.0), (1, 0.0, 1.0), (2, 0.0, 2.0), (1, 1.0, 0.0)],
            &[(0, 1), (1, 2)],
        );
        let settings = SegmentSettings {
            allow_gap_closing: false,
            allow_splitting: true,
            ..SegmentSettings::default()
        };
        let report = run(&mut g, &settings);
        assert_eq!(report.accepted.splitting, 1);
        assert_eq!(g.all_nexts(SpotId(0)), vec![SpotId(1), SpotId(3)]);
    }

    struct FailingSolver;

    impl AssignmentSolver for FailingSolver {
        fn solve(&self, _: &SparseCostMatrix) -> std::result::Result<Assignment, SolverError> {
            Err(SolverError::failed("no feasible assignment"))
        }
    }

    #[test]
    fn solver_failure_commits_nothing() {
        let mut g = graph(
            &[(0, 0.0, 0.0), (1, 1.0, 0.0), (3, 3.0, 0.0), (4, 4.0, 0.0)],
            &[(0, 1), (2, 3)],
        );
        let cost = CostFunction::squared_distance(Dimensions::Two);
        let settings = SegmentSettings::default();
        let pool = WorkerPool::new("segment-test", 2, Duration::from_secs(30)).unwrap();
        let builder = SegmentCostMatrixBuilder::new(&cost, &settings, &pool);
        let err = SegmentTracker::new(builder, &FailingSolver)
            .track(&mut g)
            .unwrap_err();
        assert_eq!(err.to_string(), "no feasible assignment");
        assert_eq!(g.edge_count(), 2);
        assert!(!g.contains_edge(SpotId(1), SpotId(2)));
    }

    #[test]
    fn empty_graph_reports_nothing() {
        let mut g = ObjectGraph::<usize>::new();
        let report = run(&mut g, &SegmentSettings::default());
        assert_eq!(report.links_added, 0);
        assert!(report.alternative_cost.is_none());
    }
}
