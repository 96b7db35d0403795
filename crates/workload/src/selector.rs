//! Weighted random selection of request templates.

use crate::error::{Result, WorkloadError};
use crate::random::RandomSource;

/// Draws an index with probability proportional to its weight.
#[derive(Debug, Clone)]
pub struct WeightedSelector {
    cumulative: Vec<f64>,
    /// Index returned when rounding leaves the sample above the final bound.
    last_positive: usize,
}

impl WeightedSelector {
    /// Build a selector, rejecting empty, negative, non-finite or all-zero
    /// weight vectors.
    pub fn new(weights: &[f64]) -> Result<Self> {
        if weights.is_empty() {
            return Err(WorkloadError::NoTemplates);
        }

        for (index, &weight) in weights.iter().enumerate() {
            if !weight.is_finite() || weight < 0.0 {
                return Err(WorkloadError::InvalidWeight { index, weight });
            }
        }

        let largest = weights.iter().copied().fold(0.0, f64::max);
        if largest <= 0.0 {
            return Err(WorkloadError::ZeroTotalWeight);
        }

        // Scale by the largest weight first so the sum stays finite
        let scaled: Vec<f64> = weights.iter().map(|w| w / largest).collect();
        let total: f64 = scaled.iter().sum();

        // Cumulative distribution over normalized weights
        let mut cumulative = Vec::with_capacity(weights.len());
        let mut sum = 0.0;
        for w in &scaled {
            sum += w / total;
            cumulative.push(sum);
        }

        let last_positive = weights
            .iter()
            .rposition(|&w| w > 0.0)
            .ok_or(WorkloadError::ZeroTotalWeight)?;

        Ok(Self {
            cumulative,
            last_positive,
        })
    }

    /// Number of entries the selector chooses between.
    pub fn len(&self) -> usize {
        self.cumulative.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cumulative.is_empty()
    }

    /// Select an index based on the configured weights.
    pub fn select(&self, rng: &RandomSource) -> usize {
        self.index_for(rng.next_f64())
    }

    /// Select an item from `items`, which must be parallel to the weights.
    pub fn choose<'a, T>(&self, items: &'a [T], rng: &RandomSource) -> Option<&'a T> {
        items.get(self.select(rng))
    }

    /// Map a uniform sample on `[0, 1)` to an index.
    fn index_for(&self, r: f64) -> usize {
        // Strict comparison keeps zero-weight entries unreachable.
        self.cumulative
            .iter()
            .position(|&cum| r < cum)
            .unwrap_or(self.last_positive)
    }
}
