use super::{LatencyAnalysis, Orchestrator};
use crate::{strategy::Strategy, Config, Error};
use serde::Serialize;
use tracing::{debug, info};

/// A stressed variant of a configuration.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub enum StressCase {
    /// The configuration as given.
    Baseline,
    /// At least this fraction of stake withholds votes.
    Adversarial(f64),
    /// At least this fraction of stake is offline.
    Crash(f64),
    /// Both of the above at once.
    Combined { adversarial: f64, crash: f64 },
    /// Base delay multiplied by this factor.
    Delay(f64),
}

/// Cases exercised by [Orchestrator::run_resilience_analysis], in report order.
pub const STRESS_CASES: [StressCase; 7] = [
    StressCase::Baseline,
    StressCase::Adversarial(0.1),
    StressCase::Adversarial(0.2),
    StressCase::Crash(0.1),
    StressCase::Crash(0.2),
    StressCase::Combined {
        adversarial: 0.2,
        crash: 0.2,
    },
    StressCase::Delay(2.0),
];

impl StressCase {
    /// Apply this case to `config`.
    ///
    /// Fault levels never go below what `config` already has.
    pub fn apply(&self, config: &Config) -> Config {
        let mut config = config.clone();
        match *self {
            StressCase::Baseline => {}
            StressCase::Adversarial(level) => {
                config.adversarial_stake = config.adversarial_stake.max(level);
            }
            StressCase::Crash(level) => {
                config.crash_stake = config.crash_stake.max(level);
            }
            StressCase::Combined { adversarial, crash } => {
                config.adversarial_stake = config.adversarial_stake.max(adversarial);
                config.crash_stake = config.crash_stake.max(crash);
            }
            StressCase::Delay(factor) => {
                config.base_delay_ms *= factor;
            }
        }
        config
    }
}

/// Change of a stressed case relative to the baseline.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Degradation {
    /// Increase of mean finalization latency (if both finalized any block).
    pub latency_increase_ms: Option<f64>,

    /// Ratio of mean finalization latencies (if both finalized any block).
    pub latency_ratio: Option<f64>,

    /// Change of fast-path success rate (negative when fewer trials succeed).
    pub fast_path_rate_change: f64,

    /// Change of finalization rate.
    pub finalization_rate_change: f64,
}

impl Degradation {
    fn new(baseline: &LatencyAnalysis, stressed: &LatencyAnalysis) -> Self {
        let latencies = baseline.mean_latency_ms.zip(stressed.mean_latency_ms);
        Self {
            latency_increase_ms: latencies.map(|(base, stressed)| stressed - base),
            latency_ratio: latencies
                .filter(|(base, _)| *base > 0.0)
                .map(|(base, stressed)| stressed / base),
            fast_path_rate_change: stressed.fast_path_rate - baseline.fast_path_rate,
            finalization_rate_change: stressed.finalization_rate - baseline.finalization_rate,
        }
    }
}

/// Result of a single stressed configuration.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ResilienceCase {
    pub case: StressCase,
    pub config: Config,
    pub analysis: LatencyAnalysis,
    pub degradation: Degradation,
}

/// Results of all stressed configurations, in [STRESS_CASES] order (baseline first).
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ResilienceReport {
    pub trials: usize,
    pub cases: Vec<ResilienceCase>,
}

impl ResilienceReport {
    /// Result of the baseline configuration.
    pub fn baseline(&self) -> Option<&ResilienceCase> {
        self.cases
            .iter()
            .find(|case| case.case == StressCase::Baseline)
    }

    /// Result of a given case.
    pub fn case(&self, case: StressCase) -> Option<&ResilienceCase> {
        self.cases.iter().find(|result| result.case == case)
    }
}

impl<S: Strategy> Orchestrator<S> {
    /// Rerun the latency analysis under each of [STRESS_CASES].
    ///
    /// Every case (including the baseline) generates fresh models from this configuration's
    /// seed, so cases differ only in what they stress. Fails if a stressed configuration is
    /// invalid (for example, if elevated fault levels exceed the total stake).
    pub fn run_resilience_analysis(&self, trials: usize) -> Result<ResilienceReport, Error> {
        self.run_resilience_analysis_with(&STRESS_CASES, trials)
    }

    /// Rerun the latency analysis under the given cases.
    ///
    /// Degradation is measured against the first [StressCase::Baseline] in `cases` (or an
    /// unstressed run, if none is listed).
    pub fn run_resilience_analysis_with(
        &self,
        cases: &[StressCase],
        trials: usize,
    ) -> Result<ResilienceReport, Error> {
        // Validate every case before running any trial
        let configs = cases
            .iter()
            .map(|case| {
                let config = case.apply(&self.config);
                config.validate().map(|_| config)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut analyses = Vec::with_capacity(cases.len());
        for (case, config) in cases.iter().zip(configs.iter()) {
            let analysis = self.derive(config.clone())?.run_latency_analysis(trials);
            debug!(?case, mean_ms = ?analysis.mean_latency_ms, "ran stressed case");
            analyses.push(analysis);
        }
        let baseline = match cases.iter().position(|case| *case == StressCase::Baseline) {
            Some(index) => analyses[index].clone(),
            None => self
                .derive(self.config.clone())?
                .run_latency_analysis(trials),
        };

        let cases: Vec<ResilienceCase> = cases
            .iter()
            .zip(configs)
            .zip(analyses)
            .map(|((case, config), analysis)| ResilienceCase {
                case: *case,
                config,
                degradation: Degradation::new(&baseline, &analysis),
                analysis,
            })
            .collect();
        for case in &cases {
            info!(
                case = ?case.case,
                mean_ms = ?case.analysis.mean_latency_ms,
                fast_path_rate = case.analysis.fast_path_rate,
                fast_path_rate_change = case.degradation.fast_path_rate_change,
                "resilience case complete"
            );
        }
        Ok(ResilienceReport { trials, cases })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::Sequential;

    #[test]
    fn test_apply() {
        let config = Config {
            adversarial_stake: 0.15,
            ..Default::default()
        };
        assert_eq!(StressCase::Baseline.apply(&config), config);
        assert_eq!(
            StressCase::Adversarial(0.1).apply(&config).adversarial_stake,
            0.15
        );
        assert_eq!(
            StressCase::Adversarial(0.2).apply(&config).adversarial_stake,
            0.2
        );
        let combined = StressCase::Combined {
            adversarial: 0.2,
            crash: 0.2,
        }
        .apply(&config);
        assert_eq!(combined.adversarial_stake, 0.2);
        assert_eq!(combined.crash_stake, 0.2);
        assert_eq!(StressCase::Delay(2.0).apply(&config).base_delay_ms, 200.0);
    }

    #[test]
    fn test_report() {
        let config = Config {
            validators: 25,
            seed: 5,
            ..Default::default()
        };
        let orchestrator = Orchestrator::new(config, Sequential).unwrap();
        let report = orchestrator.run_resilience_analysis(60).unwrap();
        assert_eq!(report.cases.len(), STRESS_CASES.len());
        for (result, case) in report.cases.iter().zip(STRESS_CASES) {
            assert_eq!(result.case, case);
            assert_eq!(result.analysis.completed, 60);
        }

        // The baseline is measured against itself
        let baseline = report.baseline().unwrap();
        assert_eq!(baseline.degradation.latency_increase_ms, Some(0.0));
        assert_eq!(baseline.degradation.fast_path_rate_change, 0.0);

        // Withholding 20% of stake (plus crashing another 20%) rules out the fast path
        let combined = report
            .case(StressCase::Combined {
                adversarial: 0.2,
                crash: 0.2,
            })
            .unwrap();
        assert_eq!(combined.analysis.fast_path_rate, 0.0);
        assert!(combined.degradation.fast_path_rate_change < 0.0);

        // Slower links slow down finalization
        let delayed = report.case(StressCase::Delay(2.0)).unwrap();
        assert!(delayed.degradation.latency_increase_ms.unwrap() > 0.0);
    }

    #[test]
    fn test_invalid_case() {
        let config = Config {
            adversarial_stake: 0.5,
            crash_stake: 0.5,
            ..Default::default()
        };
        let orchestrator = Orchestrator::new(config, Sequential).unwrap();
        let result = orchestrator.run_resilience_analysis_with(
            &[StressCase::Baseline, StressCase::Crash(0.6)],
            10,
        );
        assert!(matches!(result, Err(Error::FaultsExceedStake { .. })));
    }

    #[test]
    fn test_without_baseline() {
        let config = Config {
            validators: 10,
            ..Default::default()
        };
        let orchestrator = Orchestrator::new(config, Sequential).unwrap();
        let report = orchestrator
            .run_resilience_analysis_with(&[StressCase::Delay(3.0)], 20)
            .unwrap();
        assert_eq!(report.cases.len(), 1);
        assert!(report.baseline().is_none());
        assert!(report.cases[0].degradation.latency_ratio.unwrap() > 1.0);
    }
}
