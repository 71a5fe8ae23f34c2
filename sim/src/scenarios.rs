//! Scenario definitions and the frame-by-frame simulator.
//!
//! Each scenario is a named population of cells plus detection parameters.
//! All scenarios are deterministic given the same seed.

use crate::cell::{Cell, MotionSpec, SimCell};
use crate::dataset::Dataset;
use linker_core::Frame;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Which pre-defined scenario to load.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
pub enum ScenarioKind {
    /// 20 well separated cells drifting slowly, every cell detected
    Drift,
    /// 6 cells that each divide once
    Dividing,
    /// 15 cells missed in 20 % of the frames
    Blinking,
    /// 80 jittering cells in a small field
    Crowded,
}

/// Detection model applied to every cell in every frame.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DetectionParams {
    /// Probability that an existing cell is detected
    pub p_detection: f64,
    /// Uniform position noise amplitude (± per axis)
    pub position_noise: f64,
    /// Relative size noise amplitude (± fraction)
    pub size_noise: f64,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            p_detection: 1.0,
            position_noise: 0.2,
            size_noise: 0.05,
        }
    }
}

/// A fully configured simulation scenario.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub kind: ScenarioKind,
    pub seed: u64,
    pub n_frames: Frame,
    pub cells: Vec<SimCell>,
    pub detection: DetectionParams,
    /// Distance between daughters at division
    pub division_offset: f64,
}

impl Scenario {
    /// Build the named scenario. Uses `seed` for repeatability.
    pub fn build(kind: ScenarioKind, seed: u64) -> Self {
        match kind {
            ScenarioKind::Drift => Self::drift(seed),
            ScenarioKind::Dividing => Self::dividing(seed),
            ScenarioKind::Blinking => Self::blinking(seed),
            ScenarioKind::Crowded => Self::crowded(seed),
        }
    }

    // -----------------------------------------------------------------------
    // Scenario 1: Drift
    // -----------------------------------------------------------------------
    fn drift(seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let cells = (0..20)
            .map(|i| {
                let (row, col) = ((i / 5) as f64, (i % 5) as f64);
                let velocity = [rng.gen::<f64>() - 0.5, rng.gen::<f64>() - 0.5];
                SimCell::new(
                    i,
                    [col * 25.0, row * 25.0],
                    velocity,
                    MotionSpec::Jittered { step: 0.3 },
                )
            })
            .collect();
        Scenario {
            name: "drift".into(),
            kind: ScenarioKind::Drift,
            seed,
            n_frames: 30,
            cells,
            detection: DetectionParams::default(),
            division_offset: 0.0,
        }
    }

    // -----------------------------------------------------------------------
    // Scenario 2: Dividing
    // -----------------------------------------------------------------------
    fn dividing(seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(1));
        let cells = (0..6)
            .map(|i| {
                let angle = rng.gen::<f64>() * std::f64::consts::TAU;
                let mut cell = SimCell::new(
                    i,
                    [(i % 3) as f64 * 40.0, (i / 3) as f64 * 40.0],
                    [0.4 * angle.cos(), 0.4 * angle.sin()],
                    MotionSpec::Jittered { step: 0.2 },
                );
                cell.size = 14.0;
                cell.divide_at = Some(rng.gen_range(8..20));
                cell
            })
            .collect();
        Scenario {
            name: "dividing".into(),
            kind: ScenarioKind::Dividing,
            seed,
            n_frames: 30,
            cells,
            detection: DetectionParams::default(),
            division_offset: 3.0,
        }
    }

    // -----------------------------------------------------------------------
    // Scenario 3: Blinking
    // -----------------------------------------------------------------------
    fn blinking(seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(2));
        let cells = (0..15)
            .map(|i| {
                let motion = if i % 3 == 0 {
                    MotionSpec::ConstantTurn { omega: 0.1 }
                } else {
                    MotionSpec::Jittered { step: 0.3 }
                };
                let velocity = [rng.gen::<f64>() * 1.2 - 0.6, rng.gen::<f64>() * 1.2 - 0.6];
                SimCell::new(i, [(i % 5) as f64 * 30.0, (i / 5) as f64 * 30.0], velocity, motion)
            })
            .collect();
        Scenario {
            name: "blinking".into(),
            kind: ScenarioKind::Blinking,
            seed,
            n_frames: 40,
            cells,
            detection: DetectionParams {
                p_detection: 0.8,
                ..DetectionParams::default()
            },
            division_offset: 0.0,
        }
    }

    // -----------------------------------------------------------------------
    // Scenario 4: Crowded
    // -----------------------------------------------------------------------
    fn crowded(seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(3));
        let cells = (0..80)
            .map(|i| {
                let position = [rng.gen::<f64>() * 120.0, rng.gen::<f64>() * 120.0];
                let velocity = [rng.gen::<f64>() * 2.0 - 1.0, rng.gen::<f64>() * 2.0 - 1.0];
                let mut cell =
                    SimCell::new(i, position, velocity, MotionSpec::Jittered { step: 0.8 });
                // a few cells enter late or leave early
                if i % 10 == 0 {
                    cell.appear_at = rng.gen_range(1..10);
                }
                if i % 10 == 5 {
                    cell.disappear_at = Some(rng.gen_range(10..25));
                }
                cell
            })
            .collect();
        Scenario {
            name: "crowded".into(),
            kind: ScenarioKind::Crowded,
            seed,
            n_frames: 25,
            cells,
            detection: DetectionParams {
                p_detection: 0.95,
                position_noise: 0.5,
                size_noise: 0.1,
            },
            division_offset: 0.0,
        }
    }

    /// Simulate every frame and return the detections with their ground truth.
    ///
    /// Ground-truth links join consecutive detections of one cell (across
    /// missed frames) and the last detection of a mother to the first
    /// detection of each daughter.
    pub fn run(&self) -> Dataset {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed.wrapping_mul(31).wrapping_add(7));
        let mut cells = self.cells.clone();
        let mut next_lineage = cells.iter().map(|c| c.lineage + 1).max().unwrap_or(0);
        let mut next_id = 0u64;
        let mut last_detection: BTreeMap<u64, u64> = BTreeMap::new();
        let mut frames: BTreeMap<Frame, Vec<Cell>> = BTreeMap::new();
        let mut truth = Vec::new();

        for frame in 0..self.n_frames {
            let mut born = Vec::new();
            for cell in cells.iter_mut() {
                if cell.divide_at == Some(frame) && cell.is_active(frame) {
                    let lineages = [next_lineage, next_lineage + 1];
                    born.extend(cell.divide(frame, self.division_offset, lineages));
                    next_lineage += 2;
                }
            }
            cells.extend(born);

            let detections = frames.entry(frame).or_default();
            for cell in cells.iter().filter(|c| c.is_active(frame)) {
                if rng.gen::<f64>() > self.detection.p_detection {
                    continue;
                }
                let noise = self.detection.position_noise;
                let [x, y] = cell.position();
                let size_factor = 1.0 + (rng.gen::<f64>() * 2.0 - 1.0) * self.detection.size_noise;
                let detection = Cell {
                    id: next_id,
                    lineage: cell.lineage,
                    frame,
                    position: [
                        x + rng.gen::<f64>() * noise * 2.0 - noise,
                        y + rng.gen::<f64>() * noise * 2.0 - noise,
                        0.0,
                    ],
                    size: cell.size * size_factor,
                };
                next_id += 1;

                let predecessor = last_detection
                    .get(&cell.lineage)
                    .or_else(|| cell.parent.and_then(|p| last_detection.get(&p)));
                if let Some(&prev) = predecessor {
                    truth.push((prev, detection.id));
                }
                detections.push(detection);
            }
            // a mother's last detection stays the anchor of both daughters
            for d in detections.iter() {
                last_detection.insert(d.lineage, d.id);
            }

            for cell in cells.iter_mut().filter(|c| c.is_active(frame)) {
                cell.step(&mut rng);
            }
        }

        Dataset {
            name: self.name.clone(),
            seed: Some(self.seed),
            frames,
            truth,
        }
    }
}
