//! Simulate erasure-coded block propagation through stake-weighted relays.
//!
//! # Relay Selection
//!
//! Every slice is encoded into `total_shreds = floor(γ * expansion_ratio)` shreds, each of
//! which is handed to one relay. Relays are sampled in two phases:
//!
//! 1. Every validator whose stake exceeds `1 / total_shreds` deterministically receives
//!    `floor(stake * total_shreds)` slots. The stake consumed by those slots is deducted
//!    from the validator's remaining weight.
//! 2. The remaining slots are drawn with replacement, proportionally to remaining weight.
//!
//! The relay set is the deduplicated union of both phases (in selection order), so it can
//! hold fewer than `total_shreds` validators. This undershoot is preserved on purpose: a
//! validator drawn twice forwards two shreds but counts once.
//!
//! # Timing
//!
//! A validator reconstructs the block once `γ` shreds reached it. Shreds travel along the
//! two-hop path `leader -> relay -> validator`, using the first `γ` live relays of the set.
//! Reconstruction time is the `γ`-th fastest path, or the slowest available path if fewer
//! than `γ` exist. The leader holds the block at time zero.

use crate::{config::DisseminationConfig, Error, Faults, LatencyModel, StakeDistribution};
use rand::{distributions::WeightedIndex, Rng};
use rand_distr::Distribution;
use serde::Serialize;
use std::{collections::HashSet, sync::Arc};
use tracing::{debug, trace};

/// Deduplicated validators chosen to relay shreds for one dissemination round.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RelaySet {
    relays: Vec<usize>,
}

impl RelaySet {
    fn insert(&mut self, seen: &mut HashSet<usize>, validator: usize) {
        if seen.insert(validator) {
            self.relays.push(validator);
        }
    }

    /// Number of distinct relays.
    pub fn len(&self) -> usize {
        self.relays.len()
    }

    /// Returns true if no relay was selected.
    pub fn is_empty(&self) -> bool {
        self.relays.is_empty()
    }

    /// Returns true if `validator` is a relay.
    pub fn contains(&self, validator: usize) -> bool {
        self.relays.contains(&validator)
    }

    /// Relays in selection order.
    pub fn as_slice(&self) -> &[usize] {
        &self.relays
    }
}

/// Time (in milliseconds) at which each validator reconstructed the block.
///
/// Validators that never reconstruct it (crashed, or unreachable through any live relay)
/// have no entry.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ArrivalTimes {
    leader: usize,
    times: Vec<Option<f64>>,
}

impl ArrivalTimes {
    /// Create an empty map over `validators` validators.
    pub fn new(leader: usize, validators: usize) -> Self {
        Self {
            leader,
            times: vec![None; validators],
        }
    }

    /// Record that `validator` reconstructed the block at `time`.
    pub fn insert(&mut self, validator: usize, time: f64) {
        self.times[validator] = Some(time);
    }

    /// Leader that proposed the block.
    pub fn leader(&self) -> usize {
        self.leader
    }

    /// Reconstruction time of `validator`, if any.
    pub fn get(&self, validator: usize) -> Option<f64> {
        self.times[validator]
    }

    /// Number of validators that reconstructed the block.
    pub fn len(&self) -> usize {
        self.times.iter().flatten().count()
    }

    /// Returns true if no validator holds the block.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Validators holding the block and their reconstruction time, in index order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.times
            .iter()
            .enumerate()
            .filter_map(|(validator, time)| time.map(|time| (validator, time)))
    }
}

/// Summary of a dissemination round.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Metrics {
    /// Slowest one-hop delivery from the leader to a relay.
    pub relay_assignment_ms: f64,

    /// Mean reconstruction time over non-leader validators that reconstructed the block.
    pub mean_reconstruction_ms: f64,

    /// Maximum reconstruction time over non-leader validators that reconstructed the block.
    pub max_reconstruction_ms: f64,

    /// Number of distinct relays.
    pub relays: usize,

    /// Shreds produced per slice.
    pub total_shreds: usize,

    /// `relays / total_shreds`.
    pub fill_ratio: f64,

    /// Non-leader validators that reconstructed the block.
    pub reconstructed: usize,
}

/// Result of disseminating one block.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Dissemination {
    pub relays: RelaySet,
    pub arrivals: ArrivalTimes,
    pub metrics: Metrics,
}

/// Simulates propagation of a block from a leader to all validators.
#[derive(Clone, Debug)]
pub struct Simulator {
    minimum_shreds: usize,
    total_shreds: usize,
    stake: Arc<StakeDistribution>,
    latency: Arc<LatencyModel>,
    faults: Arc<Faults>,
}

impl Simulator {
    /// Create a new simulator over shared models.
    pub fn new(
        config: &DisseminationConfig,
        stake: Arc<StakeDistribution>,
        latency: Arc<LatencyModel>,
        faults: Arc<Faults>,
    ) -> Result<Self, Error> {
        if config.minimum_shreds == 0 {
            return Err(Error::InvalidMinimumShreds);
        }
        if !config.expansion_ratio.is_finite() || config.expansion_ratio < 1.0 {
            return Err(Error::InvalidExpansionRatio(config.expansion_ratio));
        }
        for len in [latency.len(), faults.len()] {
            if len != stake.len() {
                return Err(Error::StakeLengthMismatch {
                    stake: stake.len(),
                    latency: len,
                });
            }
        }
        Ok(Self {
            minimum_shreds: config.minimum_shreds,
            total_shreds: config.total_shreds(),
            stake,
            latency,
            faults,
        })
    }

    /// Shreds produced per slice.
    pub fn total_shreds(&self) -> usize {
        self.total_shreds
    }

    /// Sample the relays of one round.
    ///
    /// Only the second phase consumes randomness (one draw per remaining slot).
    pub fn select_relays<R: Rng>(&self, rng: &mut R) -> RelaySet {
        let total = self.total_shreds as f64;
        let mut relays = RelaySet::default();
        let mut seen = HashSet::new();

        // Phase 1: deterministic slots for heavy validators
        let mut remaining = self.stake.stakes().to_vec();
        let mut assigned = 0;
        for (validator, weight) in remaining.iter_mut().enumerate() {
            if *weight <= 1.0 / total {
                continue;
            }
            let slots = (*weight * total).floor() as usize;
            if slots == 0 {
                continue;
            }
            *weight = (*weight - slots as f64 / total).max(0.0);
            assigned += slots;
            relays.insert(&mut seen, validator);
        }

        // Phase 2: sample leftover slots by remaining stake
        let leftover = self.total_shreds.saturating_sub(assigned);
        if leftover > 0 {
            match WeightedIndex::new(&remaining) {
                Ok(sampler) => {
                    for _ in 0..leftover {
                        relays.insert(&mut seen, sampler.sample(rng));
                    }
                }
                Err(err) => {
                    debug!(?err, leftover, "no remaining stake to sample relays from");
                }
            }
        }
        relays
    }

    /// Disseminate a block proposed by `leader`.
    pub fn simulate<R: Rng>(&self, rng: &mut R, leader: usize) -> Dissemination {
        let relays = self.select_relays(rng);
        let validators = self.stake.len();
        let mut arrivals = ArrivalTimes::new(leader, validators);
        let relay_assignment_ms = relays
            .as_slice()
            .iter()
            .map(|relay| self.latency.latency(leader, *relay))
            .fold(0.0, f64::max);

        // A crashed leader never sends its block
        if !self.faults.is_live(leader) {
            debug!(leader, "leader is offline");
            return Dissemination {
                metrics: Metrics {
                    relay_assignment_ms,
                    relays: relays.len(),
                    total_shreds: self.total_shreds,
                    fill_ratio: relays.len() as f64 / self.total_shreds as f64,
                    ..Default::default()
                },
                relays,
                arrivals,
            };
        }
        arrivals.insert(leader, 0.0);

        // Only live relays forward shreds
        let forwarding: Vec<usize> = relays
            .as_slice()
            .iter()
            .copied()
            .filter(|relay| self.faults.is_live(*relay))
            .take(self.minimum_shreds)
            .collect();

        let mut paths = Vec::with_capacity(forwarding.len());
        for validator in 0..validators {
            if validator == leader || !self.faults.is_live(validator) {
                continue;
            }
            paths.clear();
            paths.extend(forwarding.iter().map(|relay| {
                self.latency.latency(leader, *relay) + self.latency.latency(*relay, validator)
            }));
            if paths.is_empty() {
                continue;
            }
            paths.sort_by(f64::total_cmp);
            let needed = self.minimum_shreds.min(paths.len());
            arrivals.insert(validator, paths[needed - 1]);
        }

        // Summarize non-leader reconstruction
        let times: Vec<f64> = arrivals
            .iter()
            .filter(|(validator, _)| *validator != leader)
            .map(|(_, time)| time)
            .collect();
        let metrics = Metrics {
            relay_assignment_ms,
            mean_reconstruction_ms: crate::mean(&times),
            max_reconstruction_ms: times.iter().copied().fold(0.0, f64::max),
            relays: relays.len(),
            total_shreds: self.total_shreds,
            fill_ratio: relays.len() as f64 / self.total_shreds as f64,
            reconstructed: times.len(),
        };
        trace!(
            leader,
            relays = metrics.relays,
            mean = metrics.mean_reconstruction_ms,
            max = metrics.max_reconstruction_ms,
            "disseminated block"
        );
        Dissemination {
            relays,
            arrivals,
            metrics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LatencyMatrix;
    use proptest::prelude::*;
    use rand::{rngs::StdRng, SeedableRng};

    fn fixture(faults: Faults, minimum_shreds: usize, expansion_ratio: f64) -> Simulator {
        let stake = StakeDistribution::from_weights(vec![0.4, 0.4, 0.2]).unwrap();
        let matrix = LatencyMatrix::from_rows(vec![
            vec![0.0, 10.0, 30.0],
            vec![5.0, 0.0, 15.0],
            vec![7.0, 9.0, 0.0],
        ])
        .unwrap();
        let latency = LatencyModel::from_matrix(matrix, 100.0).unwrap();
        let config = DisseminationConfig {
            minimum_shreds,
            expansion_ratio,
            ..Default::default()
        };
        Simulator::new(
            &config,
            Arc::new(stake),
            Arc::new(latency),
            Arc::new(faults),
        )
        .unwrap()
    }

    #[test]
    fn test_two_phase_selection() {
        // Five shreds: validators 0 and 1 take two slots each, the last slot can only
        // be drawn from validator 2's remaining stake.
        let simulator = fixture(Faults::none(3), 2, 2.5);
        assert_eq!(simulator.total_shreds(), 5);
        let mut rng = StdRng::seed_from_u64(0);
        let relays = simulator.select_relays(&mut rng);
        assert_eq!(relays.as_slice(), &[0, 1, 2]);
    }

    #[test]
    fn test_reconstruction_order_statistic() {
        let simulator = fixture(Faults::none(3), 2, 2.5);
        let mut rng = StdRng::seed_from_u64(0);
        let result = simulator.simulate(&mut rng, 0);

        // Validator 1: both paths take 10ms
        // Validator 2: paths take 30ms (via 0) and 25ms (via 1), second fastest is 30ms
        assert_eq!(result.arrivals.get(0), Some(0.0));
        assert_eq!(result.arrivals.get(1), Some(10.0));
        assert_eq!(result.arrivals.get(2), Some(30.0));
        assert_eq!(result.metrics.mean_reconstruction_ms, 20.0);
        assert_eq!(result.metrics.max_reconstruction_ms, 30.0);
        assert_eq!(result.metrics.relay_assignment_ms, 30.0);
        assert_eq!(result.metrics.relays, 3);
        assert_eq!(result.metrics.fill_ratio, 0.6);
        assert_eq!(result.metrics.reconstructed, 2);

        // From validator 1: validator 2 is reached via 1 in 15ms and via 0 in 35ms
        let result = simulator.simulate(&mut rng, 1);
        assert_eq!(result.arrivals.get(1), Some(0.0));
        assert_eq!(result.arrivals.get(0), Some(5.0));
        assert_eq!(result.arrivals.get(2), Some(35.0));
    }

    #[test]
    fn test_fewer_paths_than_needed() {
        // Four shreds needed but only three relays exist: use the slowest path
        let simulator = fixture(Faults::none(3), 4, 1.25);
        assert_eq!(simulator.total_shreds(), 5);
        let mut rng = StdRng::seed_from_u64(0);
        let result = simulator.simulate(&mut rng, 0);

        // Validator 1: 10ms (via 0), 10ms (via 1), 39ms (via 2)
        // Validator 2: 30ms (via 0), 25ms (via 1), 30ms (via 2)
        assert_eq!(result.arrivals.get(1), Some(39.0));
        assert_eq!(result.arrivals.get(2), Some(30.0));
    }

    #[test]
    fn test_crashed_validators() {
        // Crashed relay 1 no longer forwards, crashed validators never reconstruct
        let faults = Faults::from_parts(3, &[], &[1]).unwrap();
        let simulator = fixture(faults, 2, 2.5);
        let mut rng = StdRng::seed_from_u64(0);
        let result = simulator.simulate(&mut rng, 0);
        assert_eq!(result.arrivals.get(1), None);
        assert_eq!(result.arrivals.get(2), Some(30.0));
        assert_eq!(result.arrivals.len(), 2);
        assert_eq!(result.metrics.relays, 3);

        // A crashed leader disseminates nothing
        let result = simulator.simulate(&mut rng, 1);
        assert!(result.arrivals.is_empty());
        assert_eq!(result.metrics.reconstructed, 0);
    }

    #[test]
    fn test_single_validator() {
        let stake = StakeDistribution::uniform(1).unwrap();
        let latency =
            LatencyModel::generate(&mut StdRng::seed_from_u64(0), 1, 100.0).unwrap();
        let simulator = Simulator::new(
            &DisseminationConfig::default(),
            Arc::new(stake),
            Arc::new(latency),
            Arc::new(Faults::none(1)),
        )
        .unwrap();
        let result = simulator.simulate(&mut StdRng::seed_from_u64(0), 0);
        assert_eq!(result.relays.as_slice(), &[0]);
        assert_eq!(result.arrivals.get(0), Some(0.0));
        assert_eq!(result.metrics.mean_reconstruction_ms, 0.0);
    }

    #[test]
    fn test_mismatched_models() {
        let stake = StakeDistribution::uniform(3).unwrap();
        let latency =
            LatencyModel::generate(&mut StdRng::seed_from_u64(0), 4, 100.0).unwrap();
        let result = Simulator::new(
            &DisseminationConfig::default(),
            Arc::new(stake),
            Arc::new(latency),
            Arc::new(Faults::none(3)),
        );
        assert_eq!(
            result.err(),
            Some(Error::StakeLengthMismatch {
                stake: 3,
                latency: 4
            })
        );
    }

    proptest! {
        #[test]
        fn relays_never_exceed_total_shreds(
            validators in 1usize..300,
            minimum_shreds in 1usize..64,
            expansion_ratio in 1.0f64..4.0,
            seed in any::<u64>(),
        ) {
            let mut rng = StdRng::seed_from_u64(seed);
            let stake = StakeDistribution::generate(&mut rng, validators).unwrap();
            let latency = LatencyModel::generate(&mut rng, validators, 100.0).unwrap();
            let config = DisseminationConfig {
                minimum_shreds,
                expansion_ratio,
                ..Default::default()
            };
            let simulator = Simulator::new(
                &config,
                Arc::new(stake),
                Arc::new(latency),
                Arc::new(Faults::none(validators)),
            )
            .unwrap();
            let leader = rng.gen_range(0..validators);
            let result = simulator.simulate(&mut rng, leader);
            prop_assert!(result.relays.len() <= config.total_shreds());
            prop_assert_eq!(result.arrivals.get(leader), Some(0.0));
            prop_assert_eq!(result.arrivals.len(), validators);
        }
    }
}
