//! Errors surfaced while validating a simulation setup.

use thiserror::Error;

/// Errors that can occur before a simulation starts.
///
/// Once a [crate::Config] (or an explicit set of models) has been accepted, every
/// simulation routine is total: trials that fail to reach consensus are reported
/// as outcomes, not errors.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    /// A voting threshold is outside `[0, 1]`
    #[error("threshold {name} must be within [0, 1] (got {value})")]
    InvalidThreshold { name: &'static str, value: f64 },

    /// No validators were requested
    #[error("at least one validator is required")]
    NoValidators,

    /// The erasure-coding expansion ratio is below one
    #[error("expansion ratio must be at least 1 (got {0})")]
    InvalidExpansionRatio(f64),

    /// The minimum number of shreds needed to reconstruct a block is zero
    #[error("minimum shreds must be greater than zero")]
    InvalidMinimumShreds,

    /// A fault fraction is outside `[0, 1]`
    #[error("fault fraction {name} must be within [0, 1] (got {value})")]
    InvalidFaultFraction { name: &'static str, value: f64 },

    /// Adversarial and crashed stake together exceed the total stake
    #[error("adversarial ({adversarial}) and crash ({crash}) stake exceed total stake")]
    FaultsExceedStake { adversarial: f64, crash: f64 },

    /// A delay (or jitter band) is negative, zero where forbidden, or not finite
    #[error("delay {name} must be finite and positive (got {value})")]
    InvalidDelay { name: &'static str, value: f64 },

    /// A block is described by zero slices or zero-sized slices
    #[error("block layout must have at least one non-empty slice")]
    InvalidBlockLayout,

    /// The leader window is empty
    #[error("leader window must contain at least one block")]
    InvalidLeaderWindow,

    /// An explicitly provided stake vector cannot be normalized
    #[error("invalid stake: {0}")]
    InvalidStake(String),

    /// A fault assignment references a validator that does not exist
    #[error("validator {validator} is out of range (validators: {validators})")]
    UnknownValidator { validator: usize, validators: usize },

    /// Explicitly provided models describe different validator sets
    #[error("stake covers {stake} validators but latency covers {latency}")]
    StakeLengthMismatch { stake: usize, latency: usize },

    /// A configuration file could not be read or parsed
    #[error("unable to load configuration: {0}")]
    Load(String),
}
