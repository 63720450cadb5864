//! Parameters of a benchmark run.

use crate::Error;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Erasure-coding and block layout parameters of the dissemination stage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisseminationConfig {
    /// Number of shreds (γ) required to reconstruct a slice.
    pub minimum_shreds: usize,

    /// Ratio of total shreds to `minimum_shreds`.
    pub expansion_ratio: f64,

    /// Size of a single slice (in bytes).
    pub slice_size: usize,

    /// Number of slices that make up a block.
    pub slices_per_block: usize,
}

impl Default for DisseminationConfig {
    fn default() -> Self {
        Self {
            minimum_shreds: 32,
            expansion_ratio: 2.0,
            slice_size: 32 * 1024,
            slices_per_block: 64,
        }
    }
}

impl DisseminationConfig {
    /// Total shreds produced per slice (`floor(γ * expansion_ratio)`).
    pub fn total_shreds(&self) -> usize {
        (self.minimum_shreds as f64 * self.expansion_ratio).floor() as usize
    }

    /// Size of a full block (in bytes).
    pub fn block_size(&self) -> usize {
        self.slice_size * self.slices_per_block
    }

    fn validate(&self) -> Result<(), Error> {
        if self.minimum_shreds == 0 {
            return Err(Error::InvalidMinimumShreds);
        }
        if !self.expansion_ratio.is_finite() || self.expansion_ratio < 1.0 {
            return Err(Error::InvalidExpansionRatio(self.expansion_ratio));
        }
        if self.slice_size == 0 || self.slices_per_block == 0 {
            return Err(Error::InvalidBlockLayout);
        }
        Ok(())
    }
}

/// Stake thresholds (as fractions of total stake) of the voting stage.
///
/// Notarization and slow-path eligibility share a single cutoff: crossing
/// `notarization_threshold` both notarizes the block and starts the second
/// (finalization) round.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VotingConfig {
    /// Stake required to finalize in a single round.
    pub fast_threshold: f64,

    /// Stake required to notarize (and to become eligible for the slow path).
    pub notarization_threshold: f64,

    /// Stake required in the second round to finalize via the slow path.
    pub finalization_threshold: f64,
}

impl Default for VotingConfig {
    fn default() -> Self {
        Self {
            fast_threshold: 0.8,
            notarization_threshold: 0.6,
            finalization_threshold: 0.6,
        }
    }
}

impl VotingConfig {
    fn validate(&self) -> Result<(), Error> {
        for (name, value) in [
            ("fast_threshold", self.fast_threshold),
            ("notarization_threshold", self.notarization_threshold),
            ("finalization_threshold", self.finalization_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::InvalidThreshold { name, value });
            }
        }
        Ok(())
    }
}

/// Configuration of a benchmark run.
///
/// All values have defaults, so a YAML file only needs to list what it changes:
///
/// ```
/// use estimator::Config;
///
/// let config = Config::from_yaml_str("validators: 16\nvoting:\n  fast_threshold: 0.75\n").unwrap();
/// assert_eq!(config.validators, 16);
/// assert_eq!(config.voting.fast_threshold, 0.75);
/// assert_eq!(config.voting.notarization_threshold, 0.6);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Number of validators.
    pub validators: usize,

    /// Fraction of stake controlled by validators that withhold votes.
    pub adversarial_stake: f64,

    /// Fraction of stake controlled by validators that are offline.
    pub crash_stake: f64,

    /// Reference one-way network delay (in milliseconds).
    ///
    /// The synthetic latency matrix scales linearly with this value.
    pub base_delay_ms: f64,

    /// Validators that have not reconstructed a block by this time (in
    /// milliseconds) do not vote for it.
    pub delay_timeout_ms: f64,

    /// Interval between consecutive blocks of a leader (in milliseconds).
    pub block_time_ms: f64,

    /// Number of consecutive blocks proposed by the same leader.
    pub leader_window: usize,

    /// Upper bound of the uniform delay added to every vote (in milliseconds).
    pub vote_jitter_ms: f64,

    /// Seed of the generator that drives the run.
    pub seed: u64,

    /// Dissemination parameters.
    pub dissemination: DisseminationConfig,

    /// Voting parameters.
    pub voting: VotingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            validators: 100,
            adversarial_stake: 0.0,
            crash_stake: 0.0,
            base_delay_ms: 100.0,
            delay_timeout_ms: 1_000.0,
            block_time_ms: 400.0,
            leader_window: 4,
            vote_jitter_ms: 10.0,
            seed: 0,
            dissemination: DisseminationConfig::default(),
            voting: VotingConfig::default(),
        }
    }
}

impl Config {
    /// Parse a configuration from YAML, filling omitted fields with defaults.
    pub fn from_yaml_str(content: &str) -> Result<Self, Error> {
        let config: Self = serde_yaml::from_str(content).map_err(|e| Error::Load(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a YAML configuration file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let content =
            std::fs::read_to_string(path.as_ref()).map_err(|e| Error::Load(e.to_string()))?;
        Self::from_yaml_str(&content)
    }

    /// Ensure all configuration values are within their valid ranges.
    pub fn validate(&self) -> Result<(), Error> {
        if self.validators == 0 {
            return Err(Error::NoValidators);
        }
        for (name, value) in [
            ("adversarial_stake", self.adversarial_stake),
            ("crash_stake", self.crash_stake),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::InvalidFaultFraction { name, value });
            }
        }
        if self.adversarial_stake + self.crash_stake > 1.0 {
            return Err(Error::FaultsExceedStake {
                adversarial: self.adversarial_stake,
                crash: self.crash_stake,
            });
        }
        for (name, value) in [
            ("base_delay_ms", self.base_delay_ms),
            ("delay_timeout_ms", self.delay_timeout_ms),
            ("block_time_ms", self.block_time_ms),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(Error::InvalidDelay { name, value });
            }
        }
        if !self.vote_jitter_ms.is_finite() || self.vote_jitter_ms < 0.0 {
            return Err(Error::InvalidDelay {
                name: "vote_jitter_ms",
                value: self.vote_jitter_ms,
            });
        }
        if self.leader_window == 0 {
            return Err(Error::InvalidLeaderWindow);
        }
        self.dissemination.validate()?;
        self.voting.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.dissemination.total_shreds(), 64);
        assert_eq!(config.dissemination.block_size(), 2 * 1024 * 1024);
    }

    #[test]
    fn test_invalid_thresholds() {
        let mut config = Config::default();
        config.voting.fast_threshold = 1.2;
        assert_eq!(
            config.validate(),
            Err(Error::InvalidThreshold {
                name: "fast_threshold",
                value: 1.2
            })
        );

        let mut config = Config::default();
        config.voting.finalization_threshold = -0.1;
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidThreshold {
                name: "finalization_threshold",
                ..
            })
        ));
    }

    #[test]
    fn test_invalid_ranges() {
        let config = Config {
            validators: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(Error::NoValidators));

        let mut config = Config::default();
        config.dissemination.expansion_ratio = 0.5;
        assert_eq!(config.validate(), Err(Error::InvalidExpansionRatio(0.5)));

        let config = Config {
            adversarial_stake: 0.6,
            crash_stake: 0.5,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(Error::FaultsExceedStake { .. })
        ));

        let config = Config {
            base_delay_ms: 0.0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidDelay { .. })));

        let config = Config {
            leader_window: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(Error::InvalidLeaderWindow));
    }

    #[test]
    fn test_yaml() {
        let config = Config::from_yaml_str(
            "validators: 8\nseed: 42\ndissemination:\n  minimum_shreds: 4\n  expansion_ratio: 1.5\n",
        )
        .unwrap();
        assert_eq!(config.validators, 8);
        assert_eq!(config.seed, 42);
        assert_eq!(config.dissemination.total_shreds(), 6);
        assert_eq!(config.dissemination.slice_size, 32 * 1024);

        // Invalid values are rejected at load time
        let result = Config::from_yaml_str("validators: 0\n");
        assert_eq!(result, Err(Error::NoValidators));

        // Malformed documents are reported as load errors
        let result = Config::from_yaml_str("validators: [");
        assert!(matches!(result, Err(Error::Load(_))));
    }
}
