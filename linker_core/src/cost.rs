//! Linking cost between two spots.
//!
//! The cost strategy is chosen once, at configuration time, from a closed set.

use crate::spot::{Dimensions, Spot};
use serde::{Deserialize, Serialize};

/// Weighted feature whose divergence between two spots inflates their cost.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeaturePenalty {
    pub feature: String,
    pub weight: f64,
}

impl FeaturePenalty {
    pub fn new(feature: impl Into<String>, weight: f64) -> Self {
        Self {
            feature: feature.into(),
            weight,
        }
    }
}

/// Cost of linking spot `a` to spot `b`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum CostFunction {
    /// Squared Euclidean distance over the tracked coordinates.
    SquaredDistance { dims: Dimensions },
    /// Squared distance scaled by `p²` with
    /// `p = 1 + Σ wᵢ · 3 · |fᵢ(a) − fᵢ(b)| / (fᵢ(a) + fᵢ(b))`.
    FeaturePenalized {
        dims: Dimensions,
        penalties: Vec<FeaturePenalty>,
    },
}

impl Default for CostFunction {
    fn default() -> Self {
        CostFunction::SquaredDistance {
            dims: Dimensions::Three,
        }
    }
}

impl CostFunction {
    pub fn squared_distance(dims: Dimensions) -> Self {
        CostFunction::SquaredDistance { dims }
    }

    pub fn dims(&self) -> Dimensions {
        match self {
            CostFunction::SquaredDistance { dims } => *dims,
            CostFunction::FeaturePenalized { dims, .. } => *dims,
        }
    }

    pub fn cost(&self, a: &Spot, b: &Spot) -> f64 {
        match self {
            CostFunction::SquaredDistance { dims } => a.squared_distance(b, *dims),
            CostFunction::FeaturePenalized { dims, penalties } => {
                let d2 = a.squared_distance(b, *dims);
                let p = 1.0 + penalty_sum(a, b, penalties);
                d2 * p * p
            }
        }
    }
}

/// Σ wᵢ · 3 · |Δfᵢ| / Σfᵢ. Features missing on either spot, or summing to
/// zero, contribute nothing.
fn penalty_sum(a: &Spot, b: &Spot, penalties: &[FeaturePenalty]) -> f64 {
    penalties
        .iter()
        .filter_map(|p| {
            let fa = a.feature(&p.feature)?;
            let fb = b.feature(&p.feature)?;
            let sum = fa + fb;
            if sum == 0.0 || !sum.is_finite() {
                return None;
            }
            Some(p.weight * 3.0 * (fa - fb).abs() / sum.abs())
        })
        .sum()
}
