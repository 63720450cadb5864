//! Assignment of faulty behavior to validators.
//!
//! Crashed validators are offline: they never reconstruct a block, relay shreds, or vote.
//! Byzantine validators receive and relay shreds but withhold their votes, which is the
//! most damaging behavior for a threshold-based voting protocol.

use crate::{stake::STAKE_EPSILON, Error, StakeDistribution};
use rand::{seq::SliceRandom, Rng};
use serde::Serialize;
use tracing::debug;

/// Behavior of a single validator for the lifetime of a configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Behavior {
    Honest,
    Byzantine,
    Crashed,
}

/// Per-validator behavior of a configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Faults {
    behaviors: Vec<Behavior>,
}

impl Faults {
    /// All `validators` validators behave honestly.
    pub fn none(validators: usize) -> Self {
        Self {
            behaviors: vec![Behavior::Honest; validators],
        }
    }

    /// Mark validators as byzantine (then crashed) without exceeding the given stake fractions.
    ///
    /// Validators are visited in a uniformly random order (one shuffle drawn from `rng`) and
    /// greedily added to the byzantine set while its stake stays within `adversarial`. The
    /// remaining validators are then visited in the same order for the crashed set.
    pub fn assign<R: Rng>(
        rng: &mut R,
        stake: &StakeDistribution,
        adversarial: f64,
        crash: f64,
    ) -> Self {
        let mut order: Vec<usize> = (0..stake.len()).collect();
        order.shuffle(rng);

        let mut behaviors = vec![Behavior::Honest; stake.len()];
        let mut byzantine = 0.0;
        for &validator in &order {
            let weight = stake.stake(validator);
            if byzantine + weight <= adversarial + STAKE_EPSILON {
                behaviors[validator] = Behavior::Byzantine;
                byzantine += weight;
            }
        }
        let mut crashed = 0.0;
        for &validator in &order {
            if behaviors[validator] != Behavior::Honest {
                continue;
            }
            let weight = stake.stake(validator);
            if crashed + weight <= crash + STAKE_EPSILON {
                behaviors[validator] = Behavior::Crashed;
                crashed += weight;
            }
        }
        debug!(
            byzantine_stake = byzantine,
            crashed_stake = crashed,
            "assigned faults"
        );
        Self { behaviors }
    }

    /// Build an explicit assignment over `validators` validators.
    pub fn from_parts(
        validators: usize,
        byzantine: &[usize],
        crashed: &[usize],
    ) -> Result<Self, Error> {
        let mut faults = Self::none(validators);
        for (set, behavior) in [(byzantine, Behavior::Byzantine), (crashed, Behavior::Crashed)] {
            for &validator in set {
                if validator >= validators {
                    return Err(Error::UnknownValidator {
                        validator,
                        validators,
                    });
                }
                faults.behaviors[validator] = behavior;
            }
        }
        Ok(faults)
    }

    /// Number of validators covered by this assignment.
    pub fn len(&self) -> usize {
        self.behaviors.len()
    }

    /// Returns true if the assignment covers no validators.
    pub fn is_empty(&self) -> bool {
        self.behaviors.is_empty()
    }

    /// Behavior of `validator`.
    pub fn behavior(&self, validator: usize) -> Behavior {
        self.behaviors[validator]
    }

    /// Returns true if `validator` is online (receives and relays shreds).
    pub fn is_live(&self, validator: usize) -> bool {
        self.behaviors[validator] != Behavior::Crashed
    }

    /// Returns true if `validator` casts votes.
    pub fn votes(&self, validator: usize) -> bool {
        self.behaviors[validator] == Behavior::Honest
    }

    /// Total stake of validators with the given behavior.
    pub fn stake_of(&self, stake: &StakeDistribution, behavior: Behavior) -> f64 {
        self.behaviors
            .iter()
            .enumerate()
            .filter(|(_, b)| **b == behavior)
            .map(|(validator, _)| stake.stake(validator))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_no_faults() {
        let mut rng = StdRng::seed_from_u64(0);
        let stake = StakeDistribution::generate(&mut rng, 50).unwrap();
        let faults = Faults::assign(&mut rng, &stake, 0.0, 0.0);
        assert_eq!(faults, Faults::none(50));
        assert_eq!(faults.stake_of(&stake, Behavior::Honest), stake.total());
    }

    #[test]
    fn test_fractions_respected() {
        let mut rng = StdRng::seed_from_u64(11);
        let stake = StakeDistribution::generate(&mut rng, 200).unwrap();
        let faults = Faults::assign(&mut rng, &stake, 0.2, 0.15);
        let byzantine = faults.stake_of(&stake, Behavior::Byzantine);
        let crashed = faults.stake_of(&stake, Behavior::Crashed);
        assert!(byzantine <= 0.2 + STAKE_EPSILON);
        assert!(crashed <= 0.15 + STAKE_EPSILON);

        // With many small validators the greedy fill gets close to the target
        assert!(byzantine > 0.15);
        assert!(crashed > 0.1);
    }

    #[test]
    fn test_uniform_exact() {
        let mut rng = StdRng::seed_from_u64(5);
        let stake = StakeDistribution::uniform(10).unwrap();
        let faults = Faults::assign(&mut rng, &stake, 0.2, 0.2);
        let byzantine = (0..10)
            .filter(|v| faults.behavior(*v) == Behavior::Byzantine)
            .count();
        let crashed = (0..10).filter(|v| !faults.is_live(*v)).count();
        assert_eq!(byzantine, 2);
        assert_eq!(crashed, 2);
        assert_eq!((0..10).filter(|v| faults.votes(*v)).count(), 6);
    }

    #[test]
    fn test_from_parts() {
        let faults = Faults::from_parts(5, &[1], &[4]).unwrap();
        assert_eq!(faults.behavior(0), Behavior::Honest);
        assert_eq!(faults.behavior(1), Behavior::Byzantine);
        assert_eq!(faults.behavior(4), Behavior::Crashed);
        assert!(faults.is_live(1));
        assert!(!faults.votes(1));
        assert!(!faults.is_live(4));

        assert_eq!(
            Faults::from_parts(5, &[], &[5]),
            Err(Error::UnknownValidator {
                validator: 5,
                validators: 5
            })
        );
    }
}
