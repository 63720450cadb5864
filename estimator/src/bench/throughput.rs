use super::Orchestrator;
use crate::{mean, strategy::Strategy, Context};
use serde::Serialize;
use tracing::{info, trace};

/// Blocks proposed by one leader during its window.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Window {
    pub leader: usize,

    /// Blocks finalized (out of `leader_window`).
    pub finalized: usize,

    /// Bytes of all finalized blocks.
    pub bytes: usize,

    /// Time from the first proposal to the last finalization.
    pub duration_ms: Option<f64>,

    /// Finalized bytes per second over `duration_ms`.
    pub throughput_bps: Option<f64>,
}

/// Aggregate of many leader windows.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ThroughputAnalysis {
    /// Windows requested.
    pub windows: usize,

    /// Windows cancelled before they started.
    pub skipped: usize,

    pub leader_window: usize,
    pub block_time_ms: f64,

    pub blocks_proposed: usize,
    pub blocks_finalized: usize,

    /// Mean blocks finalized per completed window.
    pub mean_blocks_finalized: f64,

    /// Block size over block time: the rate at which a leader produces data.
    pub nominal_throughput_bps: f64,

    /// Mean throughput of windows that finalized at least one block.
    pub sustained_throughput_bps: Option<f64>,

    /// Highest throughput of any window.
    pub peak_throughput_bps: Option<f64>,

    /// Completed windows, in window order.
    pub results: Vec<Window>,
}

impl<S: Strategy> Orchestrator<S> {
    /// Simulate one leader window from its seed.
    ///
    /// The leader proposes `leader_window` blocks, `block_time_ms` apart. Each block is
    /// disseminated and voted on independently, drawing from the same generator in
    /// proposal order.
    pub fn run_window(&self, seed: u64) -> Window {
        let mut rng = Context::trial_rng(seed);
        let leader = self.sample_leader(&mut rng);
        let mut finalized = 0;
        let mut bytes = 0;
        let mut duration_ms: Option<f64> = None;
        for block in 0..self.config.leader_window {
            let metrics = self.run_single_block(&mut rng, leader);
            let Some(latency) = metrics.finalization_latency_ms else {
                continue;
            };
            let finalized_at = block as f64 * self.config.block_time_ms + latency;
            duration_ms = Some(duration_ms.map_or(finalized_at, |d| d.max(finalized_at)));
            finalized += 1;
            bytes += metrics.block_size;
        }
        let throughput_bps = duration_ms
            .filter(|duration| *duration > 0.0)
            .map(|duration| bytes as f64 / (duration / 1_000.0));
        trace!(seed, leader, finalized, ?throughput_bps, "completed window");
        Window {
            leader,
            finalized,
            bytes,
            duration_ms,
            throughput_bps,
        }
    }

    /// Run `windows` leader windows and summarize sustained throughput.
    pub fn run_throughput_analysis(&mut self, windows: usize) -> ThroughputAnalysis {
        let seeds = self.context.trial_seeds(windows);
        let this = &*self;
        let results: Vec<Window> = this
            .strategy
            .map(&seeds, |seed| {
                if this.cancel.is_cancelled() {
                    return None;
                }
                Some(this.run_window(*seed))
            })
            .into_iter()
            .flatten()
            .collect();

        let leader_window = self.config.leader_window;
        let block_time_ms = self.config.block_time_ms;
        let throughput: Vec<f64> = results.iter().filter_map(|w| w.throughput_bps).collect();
        let finalized: Vec<f64> = results.iter().map(|w| w.finalized as f64).collect();
        let analysis = ThroughputAnalysis {
            windows,
            skipped: windows - results.len(),
            leader_window,
            block_time_ms,
            blocks_proposed: results.len() * leader_window,
            blocks_finalized: results.iter().map(|w| w.finalized).sum(),
            mean_blocks_finalized: mean(&finalized),
            nominal_throughput_bps: self.config.dissemination.block_size() as f64
                / (block_time_ms / 1_000.0),
            sustained_throughput_bps: (!throughput.is_empty()).then(|| mean(&throughput)),
            peak_throughput_bps: throughput.iter().copied().reduce(f64::max),
            results,
        };
        info!(
            windows,
            leader_window,
            blocks_finalized = analysis.blocks_finalized,
            sustained_bps = ?analysis.sustained_throughput_bps,
            "throughput analysis complete"
        );
        analysis
    }
}

#[cfg(test)]
mod tests {
    use crate::{bench::Orchestrator, strategy::Sequential, Config};

    #[test]
    fn test_windows() {
        let config = Config {
            validators: 16,
            leader_window: 3,
            seed: 9,
            ..Default::default()
        };
        let mut orchestrator = Orchestrator::new(config, Sequential).unwrap();
        let analysis = orchestrator.run_throughput_analysis(20);
        assert_eq!(analysis.results.len(), 20);
        assert_eq!(analysis.blocks_proposed, 60);
        assert_eq!(analysis.blocks_finalized, 60);
        assert_eq!(analysis.mean_blocks_finalized, 3.0);

        // The last block is proposed two block times in
        for window in &analysis.results {
            assert_eq!(window.bytes, 3 * 2 * 1024 * 1024);
            assert!(window.duration_ms.unwrap() > 800.0);
        }

        // No window finalizes its blocks faster than they are proposed
        let sustained = analysis.sustained_throughput_bps.unwrap();
        assert!(sustained > 0.0);
        let peak = analysis.peak_throughput_bps.unwrap();
        assert!(peak >= sustained);
        assert!(peak < (3 * 2 * 1024 * 1024) as f64 / 0.8);
        assert_eq!(analysis.nominal_throughput_bps, (2 * 1024 * 1024) as f64 / 0.4);
    }

    #[test]
    fn test_cancelled() {
        let mut orchestrator = Orchestrator::new(Config::default(), Sequential).unwrap();
        orchestrator.cancel_handle().cancel();
        let analysis = orchestrator.run_throughput_analysis(5);
        assert_eq!(analysis.skipped, 5);
        assert!(analysis.results.is_empty());
        assert!(analysis.sustained_throughput_bps.is_none());
    }
}
