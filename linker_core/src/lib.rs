//! `linker_core` — assignment-based linking of object detections across frames.
//!
//! # Module layout
//! - [`types`]          — Frames, spot ids, edges, link kinds
//! - [`spot`]           — Spots, trackable objects and the spot factory
//! - [`mapper`]         — Object key ↔ spot correspondence
//! - [`graph`]          — Temporal track graph, crossing-link removal
//! - [`links`]          — Projection onto previous/next/trackhead, additional links
//! - [`cost`]           — Linking cost strategies
//! - [`assignment`]     — Sparse cost matrix, solver contract, Hungarian solver
//! - [`executor`]       — Worker pool with a bounded wait
//! - [`ftf`]            — Frame-to-frame linker
//! - [`segment_matrix`] — Gap-closing / merging / splitting cost matrix
//! - [`segment_tracker`]— Segment linking pass
//! - [`linker`]         — Orchestrator
//! - [`overlap`]        — Max-overlap matcher
//! - [`settings`]       — Pass settings and linker configuration
//! - [`metrics`]        — Link precision/recall
//! - [`error`]          — Error types

pub mod assignment;
pub mod cost;
pub mod error;
pub mod executor;
pub mod ftf;
pub mod graph;
pub mod linker;
pub mod links;
pub mod mapper;
pub mod metrics;
pub mod overlap;
pub mod segment_matrix;
pub mod segment_tracker;
pub mod settings;
pub mod spot;
pub mod types;

pub use assignment::{Assignment, AssignmentSolver, CostEntry, HungarianSolver, SparseCostMatrix};
pub use cost::{CostFunction, FeaturePenalty};
pub use error::{LinkError, Result, SolverError};
pub use graph::ObjectGraph;
pub use linker::{Linker, LinkerState};
pub use links::{AdditionalLinks, LinkState, LinkStore, TrackLinkEditor};
pub use metrics::LinkAccuracy;
pub use overlap::{MatchGraph, OverlapMatcher};
pub use settings::{FtfSettings, LinkerConfig, SegmentSettings};
pub use spot::{Dimensions, GeometricSpotFactory, Spot, SpotFactory, TrackableObject};
pub use types::{Edge, Frame, LinkKind, SpotId};
