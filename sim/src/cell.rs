//! Simulated cells and their detections.
//!
//! Each cell has a true state `[x, y, vx, vy]` and a `MotionSpec` describing
//! how it moves between frames. A cell may appear late, disappear early, or
//! divide into two daughters; every detection is a [`Cell`].

use linker_core::{Frame, TrackableObject};
use nalgebra::Point3;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// One detection of a cell in one frame. This is what gets linked.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    /// Unique detection id
    pub id: u64,
    /// Id of the simulated cell that produced the detection
    pub lineage: u64,
    pub frame: Frame,
    pub position: [f64; 3],
    /// Area in pixels
    pub size: f64,
}

impl TrackableObject for Cell {
    type Key = u64;

    fn key(&self) -> u64 {
        self.id
    }

    fn center(&self) -> Point3<f64> {
        Point3::from(self.position)
    }

    fn size(&self) -> f64 {
        self.size
    }
}

/// How a cell moves from one frame to the next.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum MotionSpec {
    /// Constant velocity, no noise.
    ConstantVelocity,
    /// Constant velocity plus a uniform jitter of ±`step` per axis.
    Jittered { step: f64 },
    /// Velocity rotates by `omega` radians per frame.
    ConstantTurn { omega: f64 },
}

/// Ground-truth state of one simulated cell.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimCell {
    pub lineage: u64,
    /// Lineage of the mother cell, for daughters
    pub parent: Option<u64>,
    /// True state [x, y, vx, vy]
    pub state: [f64; 4],
    pub size: f64,
    pub motion: MotionSpec,
    /// First frame the cell exists in
    pub appear_at: Frame,
    /// The cell no longer exists from this frame on
    pub disappear_at: Option<Frame>,
    /// Frame at which the cell is replaced by two daughters
    pub divide_at: Option<Frame>,
}

impl SimCell {
    pub fn new(lineage: u64, position: [f64; 2], velocity: [f64; 2], motion: MotionSpec) -> Self {
        Self {
            lineage,
            parent: None,
            state: [position[0], position[1], velocity[0], velocity[1]],
            size: 10.0,
            motion,
            appear_at: 0,
            disappear_at: None,
            divide_at: None,
        }
    }

    /// True if the cell exists at `frame`.
    pub fn is_active(&self, frame: Frame) -> bool {
        frame >= self.appear_at && self.disappear_at.map_or(true, |end| frame < end)
    }

    pub fn position(&self) -> [f64; 2] {
        [self.state[0], self.state[1]]
    }

    /// Advance the true state by one frame.
    pub fn step<R: Rng>(&mut self, rng: &mut R) {
        let s = &mut self.state;
        match self.motion {
            MotionSpec::ConstantVelocity => {
                s[0] += s[2];
                s[1] += s[3];
            }
            MotionSpec::Jittered { step } => {
                s[0] += s[2] + rng.gen::<f64>() * step * 2.0 - step;
                s[1] += s[3] + rng.gen::<f64>() * step * 2.0 - step;
            }
            MotionSpec::ConstantTurn { omega } => {
                let v = (s[2] * s[2] + s[3] * s[3]).sqrt();
                let heading = s[3].atan2(s[2]) + omega;
                s[0] += s[2];
                s[1] += s[3];
                s[2] = v * heading.cos();
                s[3] = v * heading.sin();
            }
        }
    }

    /// Split into two daughters placed `offset` apart along the direction of
    /// motion, each with 60 % of the mother's size. The mother ends at `frame`.
    pub fn divide(&mut self, frame: Frame, offset: f64, lineages: [u64; 2]) -> [SimCell; 2] {
        self.disappear_at = Some(frame);
        let [x, y, vx, vy] = self.state;
        let speed = (vx * vx + vy * vy).sqrt();
        let (ux, uy) = if speed > 0.0 { (vx / speed, vy / speed) } else { (1.0, 0.0) };
        let half = offset / 2.0;
        let daughter = |lineage: u64, sign: f64| SimCell {
            lineage,
            parent: Some(self.lineage),
            state: [
                x + sign * half * ux,
                y + sign * half * uy,
                vx + sign * 0.2 * ux,
                vy + sign * 0.2 * uy,
            ],
            size: self.size * 0.6,
            motion: self.motion.clone(),
            appear_at: frame,
            disappear_at: None,
            divide_at: None,
        };
        [daughter(lineages[0], 1.0), daughter(lineages[1], -1.0)]
    }
}
