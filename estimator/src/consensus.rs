//! Simulate two-round threshold voting over a disseminated block.
//!
//! # Notarization
//!
//! Every voting validator that reconstructed the block before the delay timeout casts a
//! notarization vote at its reconstruction time plus `U(0, vote_jitter)`. Votes are
//! processed in timestamp order while accumulating stake:
//!
//! - crossing the notarization threshold notarizes the block and makes it eligible for
//!   the slow path
//! - crossing the fast threshold finalizes the block immediately (fast path)
//!
//! # Finalization
//!
//! If the block was notarized at time `t`, every notarization voter casts a finalization
//! vote at `t + U(0, vote_jitter)`. The slow path completes when these votes cross the
//! finalization threshold.
//!
//! The block is final at the earlier of the two paths. If neither completes, the outcome
//! carries no final time: this is a normal result that callers treat as unbounded latency.

use crate::{
    config::VotingConfig, dissemination::ArrivalTimes, stake::STAKE_EPSILON, Error, Faults,
    StakeDistribution,
};
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use tracing::trace;

/// Path that finalized a block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Path {
    Fast,
    Slow,
}

/// A single vote.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Vote {
    pub validator: usize,
    pub time: f64,
}

/// Votes of one round, sorted by timestamp (ties broken by validator).
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct VoteRecord {
    votes: Vec<Vote>,
}

impl VoteRecord {
    fn new(mut votes: Vec<Vote>) -> Self {
        votes.sort_by(|a, b| {
            a.time
                .total_cmp(&b.time)
                .then(a.validator.cmp(&b.validator))
        });
        Self { votes }
    }

    /// Number of votes.
    pub fn len(&self) -> usize {
        self.votes.len()
    }

    /// Returns true if nobody voted.
    pub fn is_empty(&self) -> bool {
        self.votes.is_empty()
    }

    /// Votes in timestamp order.
    pub fn as_slice(&self) -> &[Vote] {
        &self.votes
    }

    /// Time at which the cumulative stake of votes first meets `threshold`.
    pub fn crossing(&self, stake: &StakeDistribution, threshold: f64) -> Option<f64> {
        let mut cumulative = 0.0;
        for vote in &self.votes {
            cumulative += stake.stake(vote.validator);
            if cumulative + STAKE_EPSILON >= threshold {
                return Some(vote.time);
            }
        }
        None
    }

    /// Total stake of all votes.
    pub fn stake(&self, stake: &StakeDistribution) -> f64 {
        self.votes.iter().map(|vote| stake.stake(vote.validator)).sum()
    }
}

/// Finalization outcome of a single block (all times in milliseconds since proposal).
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Outcome {
    /// Time at which the notarization threshold was crossed.
    pub notarization_ms: Option<f64>,

    /// Time at which the fast threshold was crossed.
    pub fast_path_ms: Option<f64>,

    /// Time at which the finalization round crossed its threshold.
    pub slow_path_ms: Option<f64>,

    /// Earliest defined path.
    pub final_ms: Option<f64>,

    /// Validators that cast a notarization vote.
    pub participants: usize,
}

impl Outcome {
    /// Returns true if either path finalized the block.
    pub fn is_final(&self) -> bool {
        self.final_ms.is_some()
    }

    /// Path that finalized the block first (the fast path wins ties).
    pub fn path(&self) -> Option<Path> {
        match (self.fast_path_ms, self.slow_path_ms) {
            (Some(fast), Some(slow)) if slow < fast => Some(Path::Slow),
            (Some(_), _) => Some(Path::Fast),
            (None, Some(_)) => Some(Path::Slow),
            (None, None) => None,
        }
    }
}

/// Summary of a voting round.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Metrics {
    /// Notarization votes cast.
    pub notarization_votes: usize,

    /// Finalization votes cast.
    pub finalization_votes: usize,

    /// Validators that held the block but would have voted after the delay timeout.
    pub timed_out: usize,

    /// Stake of all notarization voters.
    pub voting_stake: f64,
}

/// Result of voting on one block.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Voting {
    pub notarization: VoteRecord,
    pub finalization: VoteRecord,
    pub outcome: Outcome,
    pub metrics: Metrics,
}

/// Simulates both voting rounds for a block.
#[derive(Clone, Debug)]
pub struct Simulator {
    voting: VotingConfig,
    vote_jitter_ms: f64,
    delay_timeout_ms: f64,
    stake: Arc<StakeDistribution>,
    faults: Arc<Faults>,
}

impl Simulator {
    /// Create a new simulator over shared models.
    pub fn new(
        voting: VotingConfig,
        vote_jitter_ms: f64,
        delay_timeout_ms: f64,
        stake: Arc<StakeDistribution>,
        faults: Arc<Faults>,
    ) -> Result<Self, Error> {
        for (name, value) in [
            ("fast_threshold", voting.fast_threshold),
            ("notarization_threshold", voting.notarization_threshold),
            ("finalization_threshold", voting.finalization_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::InvalidThreshold { name, value });
            }
        }
        if !vote_jitter_ms.is_finite() || vote_jitter_ms < 0.0 {
            return Err(Error::InvalidDelay {
                name: "vote_jitter_ms",
                value: vote_jitter_ms,
            });
        }
        if faults.len() != stake.len() {
            return Err(Error::StakeLengthMismatch {
                stake: stake.len(),
                latency: faults.len(),
            });
        }
        Ok(Self {
            voting,
            vote_jitter_ms,
            delay_timeout_ms,
            stake,
            faults,
        })
    }

    fn jitter<R: Rng>(&self, rng: &mut R) -> f64 {
        rng.gen::<f64>() * self.vote_jitter_ms
    }

    /// Vote on a block that reached validators at the given times.
    ///
    /// Consumes one draw per notarization voter and then one draw per finalization voter,
    /// each in ascending validator order.
    ///
    /// A block that reached nobody but its leader is never notarized (and consumes no draws).
    pub fn simulate<R: Rng>(&self, rng: &mut R, arrivals: &ArrivalTimes) -> Voting {
        let leader = arrivals.leader();
        if arrivals.iter().all(|(validator, _)| validator == leader) {
            trace!(leader, "block never left the leader");
            return Voting::default();
        }

        // Notarization round
        let mut timed_out = 0;
        let mut votes = Vec::with_capacity(arrivals.len());
        for (validator, arrival) in arrivals.iter() {
            if !self.faults.votes(validator) {
                continue;
            }
            if arrival > self.delay_timeout_ms {
                timed_out += 1;
                continue;
            }
            votes.push(Vote {
                validator,
                time: arrival + self.jitter(rng),
            });
        }
        let voters: Vec<usize> = votes.iter().map(|vote| vote.validator).collect();
        let notarization = VoteRecord::new(votes);

        let mut outcome = Outcome {
            participants: notarization.len(),
            ..Default::default()
        };
        let mut cumulative = 0.0;
        for vote in notarization.as_slice() {
            cumulative += self.stake.stake(vote.validator);
            if outcome.notarization_ms.is_none()
                && cumulative + STAKE_EPSILON >= self.voting.notarization_threshold
            {
                outcome.notarization_ms = Some(vote.time);
            }
            if outcome.fast_path_ms.is_none()
                && cumulative + STAKE_EPSILON >= self.voting.fast_threshold
            {
                outcome.fast_path_ms = Some(vote.time);
            }
            if outcome.notarization_ms.is_some() && outcome.fast_path_ms.is_some() {
                break;
            }
        }

        // Finalization round (slow path)
        let finalization = match outcome.notarization_ms {
            Some(notarized) => VoteRecord::new(
                voters
                    .iter()
                    .map(|validator| Vote {
                        validator: *validator,
                        time: notarized + self.jitter(rng),
                    })
                    .collect(),
            ),
            None => VoteRecord::default(),
        };
        outcome.slow_path_ms =
            finalization.crossing(&self.stake, self.voting.finalization_threshold);
        outcome.final_ms = match (outcome.fast_path_ms, outcome.slow_path_ms) {
            (Some(fast), Some(slow)) => Some(fast.min(slow)),
            (fast, slow) => fast.or(slow),
        };

        let metrics = Metrics {
            notarization_votes: notarization.len(),
            finalization_votes: finalization.len(),
            timed_out,
            voting_stake: notarization.stake(&self.stake),
        };
        trace!(
            leader,
            participants = outcome.participants,
            fast = ?outcome.fast_path_ms,
            slow = ?outcome.slow_path_ms,
            "voted on block"
        );
        Voting {
            notarization,
            finalization,
            outcome,
            metrics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    fn simulator(weights: Vec<f64>, faults: Faults, vote_jitter_ms: f64) -> Simulator {
        let stake = StakeDistribution::from_weights(weights).unwrap();
        Simulator::new(
            VotingConfig::default(),
            vote_jitter_ms,
            1_000.0,
            Arc::new(stake),
            Arc::new(faults),
        )
        .unwrap()
    }

    fn arrivals(times: &[Option<f64>]) -> ArrivalTimes {
        let mut arrivals = ArrivalTimes::new(0, times.len());
        for (validator, time) in times.iter().enumerate() {
            if let Some(time) = time {
                arrivals.insert(validator, *time);
            }
        }
        arrivals
    }

    #[test]
    fn test_both_paths() {
        let simulator = simulator(vec![1.0; 4], Faults::none(4), 0.0);
        let mut rng = StdRng::seed_from_u64(0);
        let voting = simulator.simulate(
            &mut rng,
            &arrivals(&[Some(0.0), Some(10.0), Some(20.0), Some(30.0)]),
        );

        // 75% after the third vote notarizes, 100% after the fourth finalizes fast
        assert_eq!(voting.outcome.notarization_ms, Some(20.0));
        assert_eq!(voting.outcome.fast_path_ms, Some(30.0));

        // Without jitter every finalization vote lands at the notarization time
        assert_eq!(voting.outcome.slow_path_ms, Some(20.0));
        assert_eq!(voting.outcome.final_ms, Some(20.0));
        assert_eq!(voting.outcome.path(), Some(Path::Slow));
        assert_eq!(voting.outcome.participants, 4);
        assert_eq!(voting.metrics.finalization_votes, 4);
        assert_eq!(voting.metrics.voting_stake, 1.0);
    }

    #[test]
    fn test_slow_path_only() {
        // Byzantine validators withhold 30% of stake: only the slow path completes
        let faults = Faults::from_parts(10, &[7, 8, 9], &[]).unwrap();
        let simulator = simulator(vec![1.0; 10], faults, 5.0);
        let mut rng = StdRng::seed_from_u64(1);
        let times: Vec<Option<f64>> = (0..10).map(|v| Some(v as f64 * 10.0)).collect();
        let voting = simulator.simulate(&mut rng, &arrivals(&times));

        assert_eq!(voting.outcome.participants, 7);
        assert!(voting.outcome.fast_path_ms.is_none());
        let notarized = voting.outcome.notarization_ms.unwrap();
        assert!((50.0..55.0).contains(&notarized));
        let slow = voting.outcome.slow_path_ms.unwrap();
        assert!(slow >= notarized && slow < notarized + 5.0);
        assert_eq!(voting.outcome.final_ms, Some(slow));
        assert_eq!(voting.outcome.path(), Some(Path::Slow));
    }

    #[test]
    fn test_no_consensus() {
        // Only half of the stake holds the block
        let simulator = simulator(vec![1.0; 4], Faults::none(4), 10.0);
        let mut rng = StdRng::seed_from_u64(2);
        let voting = simulator.simulate(&mut rng, &arrivals(&[Some(0.0), Some(5.0), None, None]));
        assert_eq!(voting.outcome.participants, 2);
        assert!(voting.outcome.notarization_ms.is_none());
        assert!(voting.outcome.fast_path_ms.is_none());
        assert!(voting.outcome.slow_path_ms.is_none());
        assert!(!voting.outcome.is_final());
        assert_eq!(voting.outcome.path(), None);
        assert!(voting.finalization.is_empty());
    }

    #[test]
    fn test_empty_arrivals() {
        let simulator = simulator(vec![1.0; 3], Faults::none(3), 10.0);
        let mut rng = StdRng::seed_from_u64(3);
        let voting = simulator.simulate(&mut rng, &ArrivalTimes::new(0, 3));
        assert_eq!(voting.outcome, Outcome::default());
        assert!(voting.notarization.is_empty());
    }

    #[test]
    fn test_leader_only_arrivals() {
        // The leader alone holds enough stake for both paths but cannot finalize by itself
        let simulator = simulator(vec![0.9, 0.05, 0.05], Faults::none(3), 10.0);
        let mut rng = StdRng::seed_from_u64(6);
        let voting = simulator.simulate(&mut rng, &arrivals(&[Some(0.0), None, None]));
        assert_eq!(voting, Voting::default());
        assert!(!voting.outcome.is_final());

        // No draws were consumed
        let mut fresh = StdRng::seed_from_u64(6);
        assert_eq!(rng.gen::<u64>(), fresh.gen::<u64>());
    }

    #[test]
    fn test_timeout() {
        let stake = StakeDistribution::uniform(4).unwrap();
        let simulator = Simulator::new(
            VotingConfig::default(),
            0.0,
            25.0,
            Arc::new(stake),
            Arc::new(Faults::none(4)),
        )
        .unwrap();
        let mut rng = StdRng::seed_from_u64(4);
        let voting = simulator.simulate(
            &mut rng,
            &arrivals(&[Some(0.0), Some(10.0), Some(20.0), Some(30.0)]),
        );
        assert_eq!(voting.metrics.timed_out, 1);
        assert_eq!(voting.outcome.participants, 3);
        assert!(voting.outcome.fast_path_ms.is_none());
        assert_eq!(voting.outcome.slow_path_ms, Some(20.0));
    }

    #[test]
    fn test_fast_path_stake() {
        // Fast path requires 80% of stake among voters
        let simulator = simulator(vec![0.5, 0.25, 0.15, 0.1], Faults::none(4), 20.0);
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..100 {
            let voting = simulator.simulate(
                &mut rng,
                &arrivals(&[Some(0.0), Some(40.0), Some(80.0), Some(120.0)]),
            );
            let fast = voting.outcome.fast_path_ms.unwrap();
            let stake: f64 = voting
                .notarization
                .as_slice()
                .iter()
                .filter(|vote| vote.time <= fast)
                .map(|vote| simulator.stake.stake(vote.validator))
                .sum();
            assert!(stake + STAKE_EPSILON >= 0.8);
        }
    }

    #[test]
    fn test_slow_path_stake() {
        // Slow path requires 60% of stake among finalization votes
        let faults = Faults::from_parts(4, &[0], &[]).unwrap();
        let simulator = simulator(vec![0.3, 0.35, 0.2, 0.15], faults, 20.0);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let voting = simulator.simulate(
                &mut rng,
                &arrivals(&[Some(0.0), Some(10.0), Some(25.0), Some(40.0)]),
            );
            assert!(voting.outcome.fast_path_ms.is_none());
            let slow = voting.outcome.slow_path_ms.unwrap();
            let stake: f64 = voting
                .finalization
                .as_slice()
                .iter()
                .filter(|vote| vote.time <= slow)
                .map(|vote| simulator.stake.stake(vote.validator))
                .sum();
            assert!(stake + STAKE_EPSILON >= 0.6);
            assert!(slow >= voting.outcome.notarization_ms.unwrap());
        }
    }

    #[test]
    fn test_invalid_thresholds() {
        let stake = Arc::new(StakeDistribution::uniform(4).unwrap());
        let voting = VotingConfig {
            fast_threshold: 1.5,
            ..Default::default()
        };
        let result = Simulator::new(voting, 0.0, 100.0, stake, Arc::new(Faults::none(4)));
        assert!(matches!(result, Err(Error::InvalidThreshold { .. })));
    }
}
