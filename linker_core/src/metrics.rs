//! Link accuracy against ground truth: precision, recall, F1.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Accumulated link statistics.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkAccuracy {
    /// Predicted links also present in the ground truth
    pub true_positives: u64,
    /// Predicted links absent from the ground truth
    pub false_positives: u64,
    /// Ground-truth links that were not predicted
    pub false_negatives: u64,
}

impl LinkAccuracy {
    /// Compare two link sets. Links are unordered pairs; duplicates count once.
    pub fn evaluate<K: Ord + Clone>(predicted: &[(K, K)], truth: &[(K, K)]) -> Self {
        let mut acc = Self::default();
        acc.accumulate(predicted, truth);
        acc
    }

    /// Add one more (predicted, truth) sample, e.g. one more dataset.
    pub fn accumulate<K: Ord + Clone>(&mut self, predicted: &[(K, K)], truth: &[(K, K)]) {
        let predicted = normalized(predicted);
        let truth = normalized(truth);
        let hits = predicted.intersection(&truth).count() as u64;
        self.true_positives += hits;
        self.false_positives += predicted.len() as u64 - hits;
        self.false_negatives += truth.len() as u64 - hits;
    }

    /// Precision = TP / (TP + FP)
    pub fn precision(&self) -> f64 {
        let denom = (self.true_positives + self.false_positives) as f64;
        if denom == 0.0 {
            1.0
        } else {
            self.true_positives as f64 / denom
        }
    }

    /// Recall = TP / (TP + FN)
    pub fn recall(&self) -> f64 {
        let denom = (self.true_positives + self.false_negatives) as f64;
        if denom == 0.0 {
            1.0
        } else {
            self.true_positives as f64 / denom
        }
    }

    pub fn f1(&self) -> f64 {
        let (p, r) = (self.precision(), self.recall());
        if p + r == 0.0 {
            0.0
        } else {
            2.0 * p * r / (p + r)
        }
    }
}

fn normalized<K: Ord + Clone>(links: &[(K, K)]) -> BTreeSet<(K, K)> {
    links
        .iter()
        .map(|(a, b)| if a <= b { (a.clone(), b.clone()) } else { (b.clone(), a.clone()) })
        .collect()
}
