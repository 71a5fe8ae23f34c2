//! Fundamental types used across the entire workspace.

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Time index
// ---------------------------------------------------------------------------

/// Frame (time point) index. Frames need not be contiguous.
pub type Frame = u32;

// ---------------------------------------------------------------------------
// Identifier types: newtype wrappers so IDs are never confused at compile time
// ---------------------------------------------------------------------------

/// Stable index of a spot inside one [`crate::graph::ObjectGraph`].
///
/// Spot ids are handed out in insertion order, so their ordering is the
/// tie-break order used by every pass.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct SpotId(pub usize);

impl SpotId {
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for SpotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Edges
// ---------------------------------------------------------------------------

/// A weighted link between two spots, stored with `frame(source) < frame(target)`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source: SpotId,
    pub target: SpotId,
    /// Linking cost the edge was accepted with
    pub weight: f64,
}

impl Edge {
    pub fn new(source: SpotId, target: SpotId, weight: f64) -> Self {
        Self {
            source,
            target,
            weight,
        }
    }
}

/// Which kind of segment link produced a candidate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LinkKind {
    /// Segment end → later segment start
    GapClosing,
    /// Segment end → spot that already has a predecessor
    Merging,
    /// Spot that already has a successor → segment start
    Splitting,
}

impl fmt::Display for LinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LinkKind::GapClosing => "gap-closing",
            LinkKind::Merging => "merging",
            LinkKind::Splitting => "splitting",
        };
        f.write_str(name)
    }
}
