//! Synthetic per-validator stake.
//!
//! Generated distributions mimic the concentration observed on production networks:
//!
//! | tier   | share of validators | share of stake | weighting within tier        |
//! |--------|---------------------|----------------|------------------------------|
//! | top    | 10%                 | 60%            | harmonic rank (`1 / rank`)   |
//! | middle | 30%                 | 30%            | harmonic rank (`1 / rank`)   |
//! | bottom | remainder           | 10%            | uniform, jittered by U(0.5, 1.5) |
//!
//! Tiers that round down to zero validators contribute nothing and the remaining stake is
//! renormalized, so any validator count (including one) yields a valid distribution.

use crate::Error;
use rand::Rng;
use rand_distr::{Distribution, Uniform};
use serde::Serialize;
use tracing::debug;

/// Tolerance used when comparing accumulated stake against a threshold.
pub const STAKE_EPSILON: f64 = 1e-9;

/// Population share and stake share of the top tier.
const TOP_TIER: (f64, f64) = (0.1, 0.6);

/// Population share and stake share of the middle tier.
const MIDDLE_TIER: (f64, f64) = (0.3, 0.3);

/// Stake share of the bottom tier (which holds all remaining validators).
const BOTTOM_TIER_STAKE: f64 = 0.1;

/// Bounds of the multiplicative jitter applied to bottom-tier weights.
const BOTTOM_TIER_JITTER: (f64, f64) = (0.5, 1.5);

/// Stake fraction of every validator, indexed by validator.
///
/// Built once per configuration and read-only afterwards. Stakes are strictly positive
/// and sum to `1.0` (within [STAKE_EPSILON]).
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StakeDistribution {
    stakes: Vec<f64>,
}

impl StakeDistribution {
    /// Generate a tiered distribution over `validators` validators.
    ///
    /// Only the bottom tier consumes randomness (one draw per bottom-tier validator, in
    /// ascending index order).
    pub fn generate<R: Rng>(rng: &mut R, validators: usize) -> Result<Self, Error> {
        if validators == 0 {
            return Err(Error::NoValidators);
        }
        let top = (validators as f64 * TOP_TIER.0).floor() as usize;
        let middle = (validators as f64 * MIDDLE_TIER.0).floor() as usize;
        let bottom = validators - top - middle;

        let mut weights = Vec::with_capacity(validators);
        weights.extend(harmonic(top, TOP_TIER.1));
        weights.extend(harmonic(middle, MIDDLE_TIER.1));

        let jitter = Uniform::new(BOTTOM_TIER_JITTER.0, BOTTOM_TIER_JITTER.1);
        let raw: Vec<f64> = (0..bottom).map(|_| jitter.sample(rng)).collect();
        let total: f64 = raw.iter().sum();
        weights.extend(raw.into_iter().map(|w| w / total * BOTTOM_TIER_STAKE));

        let distribution = Self::normalize(weights);
        debug!(validators, top, middle, bottom, "generated stake distribution");
        Ok(distribution)
    }

    /// Build a distribution from explicit (not necessarily normalized) weights.
    pub fn from_weights(weights: Vec<f64>) -> Result<Self, Error> {
        if weights.is_empty() {
            return Err(Error::NoValidators);
        }
        if let Some(weight) = weights.iter().find(|w| !w.is_finite() || **w <= 0.0) {
            return Err(Error::InvalidStake(format!(
                "weights must be finite and positive (got {weight})"
            )));
        }
        Ok(Self::normalize(weights))
    }

    /// Assign every one of `validators` validators the same stake.
    pub fn uniform(validators: usize) -> Result<Self, Error> {
        Self::from_weights(vec![1.0; validators])
    }

    fn normalize(weights: Vec<f64>) -> Self {
        let total: f64 = weights.iter().sum();
        Self {
            stakes: weights.into_iter().map(|w| w / total).collect(),
        }
    }

    /// Number of validators.
    pub fn len(&self) -> usize {
        self.stakes.len()
    }

    /// Returns true if there are no validators (never true for a constructed distribution).
    pub fn is_empty(&self) -> bool {
        self.stakes.is_empty()
    }

    /// Stake fraction of `validator`.
    pub fn stake(&self, validator: usize) -> f64 {
        self.stakes[validator]
    }

    /// All stake fractions, indexed by validator.
    pub fn stakes(&self) -> &[f64] {
        &self.stakes
    }

    /// Sum of all stake fractions.
    pub fn total(&self) -> f64 {
        self.stakes.iter().sum()
    }

    /// Validator indices ordered by descending stake (ties broken by index).
    pub fn by_descending_stake(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.stakes.len()).collect();
        order.sort_by(|a, b| self.stakes[*b].total_cmp(&self.stakes[*a]).then(a.cmp(b)));
        order
    }

    /// Minimal number of top-staked validators whose cumulative stake meets `threshold`.
    ///
    /// Thresholds above the total stake return the number of validators.
    pub fn validators_for(&self, threshold: f64) -> usize {
        let mut cumulative = 0.0;
        for (count, validator) in self.by_descending_stake().into_iter().enumerate() {
            if cumulative + STAKE_EPSILON >= threshold {
                return count;
            }
            cumulative += self.stakes[validator];
        }
        self.stakes.len()
    }
}

/// Harmonic-rank weights for `count` validators, normalized to sum to `share`.
fn harmonic(count: usize, share: f64) -> Vec<f64> {
    let raw: Vec<f64> = (1..=count).map(|rank| 1.0 / rank as f64).collect();
    let total: f64 = raw.iter().sum();
    raw.into_iter().map(|w| w / total * share).collect()
}
