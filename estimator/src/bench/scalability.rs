use super::{LatencyAnalysis, Orchestrator};
use crate::{strategy::Strategy, Config, Error};
use serde::Serialize;
use tracing::info;

/// Network sizes swept by [Orchestrator::run_scalability_analysis].
pub const SCALABILITY_SIZES: [usize; 6] = [10, 50, 100, 200, 500, 1000];

/// Result of a single network size.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ScalabilityPoint {
    pub validators: usize,
    pub analysis: LatencyAnalysis,
}

/// Results of all network sizes, in sweep order.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ScalabilityReport {
    pub trials: usize,
    pub points: Vec<ScalabilityPoint>,
}

/// Least-squares slope of `(x, y)` pairs (`None` with fewer than two distinct `x`).
fn slope(pairs: &[(f64, f64)]) -> Option<f64> {
    if pairs.len() < 2 {
        return None;
    }
    let n = pairs.len() as f64;
    let mean_x = pairs.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = pairs.iter().map(|(_, y)| y).sum::<f64>() / n;
    let covariance: f64 = pairs
        .iter()
        .map(|(x, y)| (x - mean_x) * (y - mean_y))
        .sum();
    let variance: f64 = pairs.iter().map(|(x, _)| (x - mean_x).powi(2)).sum();
    (variance > 0.0).then(|| covariance / variance)
}

impl ScalabilityReport {
    /// Change of mean finalization latency per additional validator.
    pub fn latency_slope(&self) -> Option<f64> {
        let pairs: Vec<(f64, f64)> = self
            .points
            .iter()
            .filter_map(|point| {
                point
                    .analysis
                    .mean_latency_ms
                    .map(|latency| (point.validators as f64, latency))
            })
            .collect();
        slope(&pairs)
    }

    /// Change of mean throughput (bytes per second) per additional validator.
    pub fn throughput_slope(&self) -> Option<f64> {
        let pairs: Vec<(f64, f64)> = self
            .points
            .iter()
            .filter_map(|point| {
                point
                    .analysis
                    .mean_throughput_bps
                    .map(|throughput| (point.validators as f64, throughput))
            })
            .collect();
        slope(&pairs)
    }
}

impl<S: Strategy> Orchestrator<S> {
    /// Rerun the latency analysis for each of [SCALABILITY_SIZES].
    pub fn run_scalability_analysis(&self, trials: usize) -> Result<ScalabilityReport, Error> {
        self.run_scalability_analysis_with(&SCALABILITY_SIZES, trials)
    }

    /// Rerun the latency analysis for each network size in `sizes`.
    ///
    /// All models are regenerated for every size (from this configuration's seed).
    pub fn run_scalability_analysis_with(
        &self,
        sizes: &[usize],
        trials: usize,
    ) -> Result<ScalabilityReport, Error> {
        // Validate every size before running any trial
        let configs = sizes
            .iter()
            .map(|&validators| {
                let config = Config {
                    validators,
                    ..self.config.clone()
                };
                config.validate().map(|_| config)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut points = Vec::with_capacity(sizes.len());
        for (&validators, config) in sizes.iter().zip(configs) {
            let analysis = self.derive(config)?.run_latency_analysis(trials);
            info!(
                validators,
                mean_ms = ?analysis.mean_latency_ms,
                mean_throughput_bps = ?analysis.mean_throughput_bps,
                mean_relays = analysis.mean_relays,
                "scalability point complete"
            );
            points.push(ScalabilityPoint {
                validators,
                analysis,
            });
        }
        Ok(ScalabilityReport { trials, points })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::Sequential;

    #[test]
    fn test_slope() {
        assert_eq!(slope(&[]), None);
        assert_eq!(slope(&[(1.0, 2.0)]), None);
        assert_eq!(slope(&[(1.0, 2.0), (1.0, 3.0)]), None);
        assert_eq!(slope(&[(0.0, 1.0), (1.0, 3.0), (2.0, 5.0)]), Some(2.0));
    }

    #[test]
    fn test_sweep() {
        let orchestrator = Orchestrator::new(Config::default(), Sequential).unwrap();
        let report = orchestrator
            .run_scalability_analysis_with(&[4, 16, 64], 20)
            .unwrap();
        let sizes: Vec<usize> = report.points.iter().map(|p| p.validators).collect();
        assert_eq!(sizes, vec![4, 16, 64]);
        for point in &report.points {
            assert_eq!(point.analysis.completed, 20);
            assert!(point.analysis.mean_latency_ms.is_some());
            assert!(point.analysis.mean_relays <= 64.0);
        }
        assert!(report.latency_slope().is_some());
        assert!(report.throughput_slope().is_some());
    }

    #[test]
    fn test_invalid_size() {
        let orchestrator = Orchestrator::new(Config::default(), Sequential).unwrap();
        let result = orchestrator.run_scalability_analysis_with(&[8, 0], 5);
        assert_eq!(result, Err(Error::NoValidators));

        // Seeding usize::MAX trials would abort, so nothing ran before the error
        let result = orchestrator.run_scalability_analysis_with(&[1_000, 0], usize::MAX);
        assert_eq!(result, Err(Error::NoValidators));
    }
}
