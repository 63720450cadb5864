//! Estimate block-finalization latency of a two-stage consensus protocol.
//!
//! A block is first disseminated: the leader erasure-codes it into shreds and hands each
//! shred to a relay sampled by stake, and every validator reconstructs the block once it
//! has received enough shreds. Validators then vote. The block finalizes on the fast path
//! once a single round of votes carries `fast_threshold` of stake, or on the slow path once a
//! second round (started by a notarization at `notarization_threshold`) carries
//! `finalization_threshold` of stake.
//!
//! Models of stake ([StakeDistribution]), network latency ([LatencyModel]), and faulty
//! behavior ([Faults]) are generated once per [Config] from a seeded [Context]. The
//! [bench::Orchestrator] then runs independent Monte-Carlo trials over them and aggregates
//! the results.
//!
//! # Example
//!
//! ```
//! use estimator::{bench::Orchestrator, strategy::Sequential, Config};
//!
//! let config = Config {
//!     validators: 10,
//!     ..Default::default()
//! };
//! let mut orchestrator = Orchestrator::new(config, Sequential).unwrap();
//! let analysis = orchestrator.run_latency_analysis(50);
//! assert_eq!(analysis.completed, 50);
//! assert!(analysis.mean_latency_ms.is_some());
//! ```

pub mod bench;
mod config;
pub use config::{Config, DisseminationConfig, VotingConfig};
pub mod consensus;
mod context;
pub use context::Context;
pub mod dissemination;
mod error;
pub use error::Error;
mod faults;
pub use faults::{Behavior, Faults};
mod latency;
pub use latency::{Cluster, LatencyMatrix, LatencyModel};
pub mod stake;
pub use stake::StakeDistribution;
pub mod strategy;

/// Returns the version of the crate.
pub fn crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Calculate the mean of a slice of values (`0.0` if empty).
pub fn mean(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let sum: f64 = data.iter().sum();
    sum / data.len() as f64
}

/// Calculate the median of a slice of values (`0.0` if empty).
///
/// The slice is sorted in place.
pub fn median(data: &mut [f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    data.sort_by(f64::total_cmp);
    let mid = data.len() / 2;
    if data.len() % 2 == 0 {
        (data[mid - 1] + data[mid]) / 2.0
    } else {
        data[mid]
    }
}

/// Calculate the sample standard deviation of a slice of values.
///
/// Returns `None` with fewer than two values.
pub fn std_dev(data: &[f64]) -> Option<f64> {
    if data.len() < 2 {
        return None;
    }
    let mean = mean(data);
    let variance = data
        .iter()
        .map(|value| {
            let diff = mean - *value;
            diff * diff
        })
        .sum::<f64>()
        / (data.len() - 1) as f64;
    Some(variance.sqrt())
}

/// Calculate the nearest-rank percentile (`p` in `[0, 100]`) of a slice of values (`0.0` if
/// empty).
///
/// The slice is sorted in place.
pub fn percentile(data: &mut [f64], p: f64) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    data.sort_by(f64::total_cmp);
    let rank = ((p.clamp(0.0, 100.0) / 100.0) * data.len() as f64).ceil() as usize;
    data[rank.clamp(1, data.len()) - 1]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean() {
        assert_eq!(mean(&[]), 0.0);
        assert_eq!(mean(&[1.0, 2.0, 3.0, 6.0]), 3.0);
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&mut []), 0.0);
        assert_eq!(median(&mut [3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&mut [4.0, 1.0, 3.0, 2.0]), 2.5);
    }

    #[test]
    fn test_std_dev() {
        assert_eq!(std_dev(&[1.0]), None);
        let deviation = std_dev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert!((deviation - 2.138_09).abs() < 1e-5);
    }

    #[test]
    fn test_percentile() {
        let mut data: Vec<f64> = (1..=100).rev().map(f64::from).collect();
        assert_eq!(percentile(&mut data, 95.0), 95.0);
        assert_eq!(percentile(&mut data, 99.0), 99.0);
        assert_eq!(percentile(&mut data, 100.0), 100.0);
        assert_eq!(percentile(&mut data, 0.0), 1.0);
        assert_eq!(percentile(&mut [], 50.0), 0.0);
        assert_eq!(percentile(&mut [7.0], 95.0), 7.0);
    }
}
