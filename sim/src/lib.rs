//! `sim` — Synthetic cell scenarios: cell motion, division, missed detections, datasets.

pub mod cell;
pub mod dataset;
pub mod scenarios;

pub use cell::{Cell, MotionSpec, SimCell};
pub use dataset::{load_dataset, save_dataset, Dataset};
pub use scenarios::{DetectionParams, Scenario, ScenarioKind};
