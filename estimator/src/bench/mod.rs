//! Compose dissemination and voting into trials and experiment suites.
//!
//! An [Orchestrator] owns the models of a single configuration (built once, shared read-only
//! by every trial) and a [Strategy] that decides where trials run. Each trial:
//!
//! 1. samples a leader proportionally to stake among live validators
//! 2. disseminates a block from that leader
//! 3. votes on the block using the resulting arrival times
//!
//! and reports a [PerformanceMetrics] record. Analyses repeat trials and aggregate the
//! records:
//!
//! - [Orchestrator::run_latency_analysis]
//! - [Orchestrator::run_throughput_analysis]
//! - [Orchestrator::run_resilience_analysis]
//! - [Orchestrator::run_scalability_analysis]

use crate::{
    consensus::{self, Path},
    dissemination,
    strategy::Strategy,
    Config, Context, Error, Faults, LatencyModel, StakeDistribution,
};
use rand::{distributions::WeightedIndex, Rng};
use rand_distr::Distribution;
use serde::Serialize;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tracing::{debug, trace};

mod latency;
pub use latency::{LatencyAnalysis, TheoreticalBound};
mod resilience;
pub use resilience::{Degradation, ResilienceCase, ResilienceReport, StressCase, STRESS_CASES};
mod scalability;
pub use scalability::{ScalabilityPoint, ScalabilityReport, SCALABILITY_SIZES};
mod throughput;
pub use throughput::{ThroughputAnalysis, Window};

/// Cooperative cancellation of a running analysis.
///
/// The flag is checked before each trial starts; a trial that already started runs to
/// completion. Trials that never start are reported as skipped.
#[derive(Clone, Debug, Default)]
pub struct Cancel(Arc<AtomicBool>);

impl Cancel {
    /// Create a new (unset) flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop all analyses sharing this flag.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Returns true once [Cancel::cancel] has been called.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Performance of a single block.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PerformanceMetrics {
    /// Leader that proposed the block.
    pub leader: usize,

    /// Time from proposal to finalization, if finalized.
    pub finalization_latency_ms: Option<f64>,

    /// Block size divided by finalization latency (bytes per second).
    pub throughput_bps: Option<f64>,

    /// Share of transmitted bytes that carry block data (`1 / expansion_ratio`).
    pub bandwidth_efficiency: f64,

    /// Mean reconstruction time over non-leader validators.
    pub dissemination_latency_ms: f64,

    /// Finalization latency minus dissemination latency.
    ///
    /// Negative when the block finalized before the average validator reconstructed it.
    pub voting_latency_ms: Option<f64>,

    /// Whether the fast path completed.
    pub fast_path: bool,

    /// Whether the slow path completed.
    pub slow_path: bool,

    /// Path that finalized the block first.
    pub finalized_by: Option<Path>,

    /// Size of the block (in bytes).
    pub block_size: usize,

    /// Share of validators that cast a notarization vote.
    pub network_utilization: f64,

    /// Distinct relays selected for the block.
    pub relays: usize,
}

impl PerformanceMetrics {
    /// Returns true if either path finalized the block.
    pub fn is_final(&self) -> bool {
        self.finalization_latency_ms.is_some()
    }
}

/// Records of a batch of trials, in trial order.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Trials {
    /// Completed trials.
    pub metrics: Vec<PerformanceMetrics>,

    /// Trials that were cancelled before they started.
    pub skipped: usize,
}

/// Runs trials and analyses over the models of one configuration.
#[derive(Clone, Debug)]
pub struct Orchestrator<S: Strategy> {
    config: Config,
    context: Context,
    stake: Arc<StakeDistribution>,
    latency: Arc<LatencyModel>,
    faults: Arc<Faults>,
    dissemination: dissemination::Simulator,
    consensus: consensus::Simulator,
    leaders: Option<WeightedIndex<f64>>,
    bound: TheoreticalBound,
    strategy: S,
    cancel: Cancel,
}

impl<S: Strategy> Orchestrator<S> {
    /// Generate the models of `config` and prepare to run trials.
    ///
    /// Models are drawn from a [Context] seeded with `config.seed`, in order: stake
    /// distribution, latency matrix, fault assignment.
    pub fn new(config: Config, strategy: S) -> Result<Self, Error> {
        config.validate()?;
        let mut context = Context::new(config.seed);
        let stake = StakeDistribution::generate(&mut context, config.validators)?;
        let latency =
            LatencyModel::generate(&mut context, config.validators, config.base_delay_ms)?;
        let faults = Faults::assign(
            &mut context,
            &stake,
            config.adversarial_stake,
            config.crash_stake,
        );
        Self::with_models(config, context, stake, latency, faults, strategy)
    }

    /// Prepare to run trials over explicit models.
    ///
    /// The number of validators is taken from the models (`config.validators` is
    /// overwritten). Trial seeds are drawn from `context`.
    pub fn with_models(
        mut config: Config,
        context: Context,
        stake: StakeDistribution,
        latency: LatencyModel,
        faults: Faults,
        strategy: S,
    ) -> Result<Self, Error> {
        config.validators = stake.len();
        config.validate()?;
        let stake = Arc::new(stake);
        let latency = Arc::new(latency);
        let faults = Arc::new(faults);
        let dissemination = dissemination::Simulator::new(
            &config.dissemination,
            stake.clone(),
            latency.clone(),
            faults.clone(),
        )?;
        let consensus = consensus::Simulator::new(
            config.voting.clone(),
            config.vote_jitter_ms,
            config.delay_timeout_ms,
            stake.clone(),
            faults.clone(),
        )?;

        // Crashed validators never lead
        let weights = (0..stake.len()).map(|validator| {
            if faults.is_live(validator) {
                stake.stake(validator)
            } else {
                0.0
            }
        });
        let leaders = match WeightedIndex::new(weights) {
            Ok(leaders) => Some(leaders),
            Err(err) => {
                debug!(?err, "no live leader, sampling among all validators");
                None
            }
        };
        let bound = TheoreticalBound::new(&latency, &stake, &config.voting);
        debug!(
            validators = config.validators,
            seed = context.seed(),
            total_shreds = dissemination.total_shreds(),
            bound_ms = bound.bound_ms,
            "prepared orchestrator"
        );
        Ok(Self {
            config,
            context,
            stake,
            latency,
            faults,
            dissemination,
            consensus,
            leaders,
            bound,
            strategy,
            cancel: Cancel::new(),
        })
    }

    /// Configuration the models were built from.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Stake distribution shared by all trials.
    pub fn stake(&self) -> &StakeDistribution {
        &self.stake
    }

    /// Latency model shared by all trials.
    pub fn latency(&self) -> &LatencyModel {
        &self.latency
    }

    /// Fault assignment shared by all trials.
    pub fn faults(&self) -> &Faults {
        &self.faults
    }

    /// Theoretical finalization bound of the models.
    pub fn bound(&self) -> &TheoreticalBound {
        &self.bound
    }

    /// Flag that stops this orchestrator (and the orchestrators it spawns) between trials.
    pub fn cancel_handle(&self) -> Cancel {
        self.cancel.clone()
    }

    /// Sample a leader proportionally to stake among live validators.
    ///
    /// Consumes a single draw.
    pub fn sample_leader<R: Rng>(&self, rng: &mut R) -> usize {
        match &self.leaders {
            Some(leaders) => leaders.sample(rng),
            None => rng.gen_range(0..self.stake.len()),
        }
    }

    /// Disseminate and vote on a single block proposed by `leader`.
    pub fn run_single_block<R: Rng>(&self, rng: &mut R, leader: usize) -> PerformanceMetrics {
        let dissemination = self.dissemination.simulate(rng, leader);
        let voting = self.consensus.simulate(rng, &dissemination.arrivals);
        let outcome = &voting.outcome;

        let block_size = self.config.dissemination.block_size();
        let dissemination_latency_ms = dissemination.metrics.mean_reconstruction_ms;
        let finalization_latency_ms = outcome.final_ms;
        let voting_latency_ms =
            finalization_latency_ms.map(|latency| latency - dissemination_latency_ms);
        let throughput_bps = finalization_latency_ms
            .filter(|latency| *latency > 0.0)
            .map(|latency| block_size as f64 / (latency / 1_000.0));
        PerformanceMetrics {
            leader,
            finalization_latency_ms,
            throughput_bps,
            bandwidth_efficiency: 1.0 / self.config.dissemination.expansion_ratio,
            dissemination_latency_ms,
            voting_latency_ms,
            fast_path: outcome.fast_path_ms.is_some(),
            slow_path: outcome.slow_path_ms.is_some(),
            finalized_by: outcome.path(),
            block_size,
            network_utilization: outcome.participants as f64 / self.stake.len() as f64,
            relays: dissemination.metrics.relays,
        }
    }

    /// Run a single trial from its seed.
    pub fn run_trial(&self, seed: u64) -> PerformanceMetrics {
        let mut rng = Context::trial_rng(seed);
        let leader = self.sample_leader(&mut rng);
        let metrics = self.run_single_block(&mut rng, leader);
        trace!(
            seed,
            leader,
            latency = ?metrics.finalization_latency_ms,
            "completed trial"
        );
        metrics
    }

    /// Run `trials` trials with a stake-weighted random leader each.
    pub fn run_trials(&mut self, trials: usize) -> Trials {
        let seeds = self.context.trial_seeds(trials);
        let this = &*self;
        let results = this.strategy.map(&seeds, |seed| {
            if this.cancel.is_cancelled() {
                return None;
            }
            Some(this.run_trial(*seed))
        });
        let metrics: Vec<PerformanceMetrics> = results.into_iter().flatten().collect();
        Trials {
            skipped: trials - metrics.len(),
            metrics,
        }
    }

    /// Build an orchestrator for a variant of this configuration.
    ///
    /// The variant generates fresh models, runs on the same strategy, and honors the same
    /// cancellation flag.
    fn derive(&self, config: Config) -> Result<Self, Error> {
        let mut orchestrator = Self::new(config, self.strategy.clone())?;
        orchestrator.cancel = self.cancel.clone();
        Ok(orchestrator)
    }
}
