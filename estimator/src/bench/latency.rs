use super::{Orchestrator, PerformanceMetrics, Trials};
use crate::{
    config::VotingConfig, mean, median, percentile, std_dev, strategy::Strategy, LatencyModel,
    StakeDistribution,
};
use serde::Serialize;
use tracing::info;

/// Latency the protocol should achieve on the given models: `min(δ_fast, 2·δ_slow)`.
///
/// `δ_x` is the mean pairwise latency among the heaviest validators holding `x` of stake.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TheoreticalBound {
    pub delta_fast_ms: f64,
    pub delta_slow_ms: f64,
    pub bound_ms: f64,
}

impl TheoreticalBound {
    pub fn new(latency: &LatencyModel, stake: &StakeDistribution, voting: &VotingConfig) -> Self {
        let delta_fast_ms = latency.percentile_latency(stake, voting.fast_threshold);
        let delta_slow_ms = latency.percentile_latency(stake, voting.notarization_threshold);
        Self {
            delta_fast_ms,
            delta_slow_ms,
            bound_ms: delta_fast_ms.min(2.0 * delta_slow_ms),
        }
    }
}

/// Aggregate of many single-block trials.
///
/// Latency statistics only cover finalized trials. Rates are relative to completed trials.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LatencyAnalysis {
    /// Trials requested.
    pub trials: usize,

    /// Trials that ran to completion.
    pub completed: usize,

    /// Trials cancelled before they started.
    pub skipped: usize,

    /// Completed trials in which the block was finalized.
    pub finalized: usize,

    pub mean_latency_ms: Option<f64>,
    pub median_latency_ms: Option<f64>,
    pub p95_latency_ms: Option<f64>,
    pub p99_latency_ms: Option<f64>,
    pub std_dev_latency_ms: Option<f64>,

    pub fast_path_rate: f64,
    pub slow_path_rate: f64,
    pub finalization_rate: f64,

    pub mean_dissemination_ms: f64,
    pub mean_voting_ms: Option<f64>,
    pub mean_throughput_bps: Option<f64>,
    pub mean_network_utilization: f64,
    pub mean_relays: f64,
    pub bandwidth_efficiency: f64,

    /// Theoretical bound of the models.
    pub bound: TheoreticalBound,

    /// Mean latency divided by the theoretical bound.
    pub bound_ratio: Option<f64>,
}

fn rate(count: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    count as f64 / total as f64
}

fn mean_of(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| mean(values))
}

impl LatencyAnalysis {
    /// Summarize a batch of trials.
    ///
    /// The result does not depend on the order of `trials.metrics`.
    pub fn new(trials: &Trials, bound: TheoreticalBound, bandwidth_efficiency: f64) -> Self {
        let records = &trials.metrics;
        let completed = records.len();
        let mut latencies: Vec<f64> = records
            .iter()
            .filter_map(|m| m.finalization_latency_ms)
            .collect();
        let voting: Vec<f64> = records.iter().filter_map(|m| m.voting_latency_ms).collect();
        let throughput: Vec<f64> = records.iter().filter_map(|m| m.throughput_bps).collect();
        let dissemination: Vec<f64> = records.iter().map(|m| m.dissemination_latency_ms).collect();
        let utilization: Vec<f64> = records.iter().map(|m| m.network_utilization).collect();
        let relays: Vec<f64> = records.iter().map(|m| m.relays as f64).collect();
        let count = |f: fn(&PerformanceMetrics) -> bool| records.iter().filter(|m| f(m)).count();

        let finalized = latencies.len();
        let mean_latency_ms = mean_of(&latencies);
        let std_dev_latency_ms = std_dev(&latencies);
        let (median_latency_ms, p95_latency_ms, p99_latency_ms) = if latencies.is_empty() {
            (None, None, None)
        } else {
            (
                Some(median(&mut latencies)),
                Some(percentile(&mut latencies, 95.0)),
                Some(percentile(&mut latencies, 99.0)),
            )
        };
        let bound_ratio = mean_latency_ms
            .filter(|_| bound.bound_ms > 0.0)
            .map(|latency| latency / bound.bound_ms);
        Self {
            trials: completed + trials.skipped,
            completed,
            skipped: trials.skipped,
            finalized,
            mean_latency_ms,
            median_latency_ms,
            p95_latency_ms,
            p99_latency_ms,
            std_dev_latency_ms,
            fast_path_rate: rate(count(|m| m.fast_path), completed),
            slow_path_rate: rate(count(|m| m.slow_path), completed),
            finalization_rate: rate(finalized, completed),
            mean_dissemination_ms: mean(&dissemination),
            mean_voting_ms: mean_of(&voting),
            mean_throughput_bps: mean_of(&throughput),
            mean_network_utilization: mean(&utilization),
            mean_relays: mean(&relays),
            bandwidth_efficiency,
            bound,
            bound_ratio,
        }
    }
}

impl<S: Strategy> Orchestrator<S> {
    /// Run `trials` single-block trials and compare them against the theoretical bound.
    pub fn run_latency_analysis(&mut self, trials: usize) -> LatencyAnalysis {
        let batch = self.run_trials(trials);
        let analysis = LatencyAnalysis::new(
            &batch,
            self.bound.clone(),
            1.0 / self.config.dissemination.expansion_ratio,
        );
        info!(
            validators = self.config.validators,
            trials,
            skipped = analysis.skipped,
            mean_ms = ?analysis.mean_latency_ms,
            fast_path_rate = analysis.fast_path_rate,
            slow_path_rate = analysis.slow_path_rate,
            bound_ms = analysis.bound.bound_ms,
            "latency analysis complete"
        );
        analysis
    }
}
