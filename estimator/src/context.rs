//! Seeded source of randomness for a benchmark run.
//!
//! A [Context] is created once per benchmark configuration and handed (as `&mut impl Rng`)
//! to every model constructor. Trials never share the context directly: before dispatch,
//! one seed per trial is drawn from it in trial order, and each trial consumes its own
//! generator. This keeps the whole run reproducible regardless of how trials are scheduled.

use rand::{rngs::StdRng, Error as RandError, RngCore, SeedableRng};

/// Deterministic generator shared by all components built for one configuration.
#[derive(Clone, Debug)]
pub struct Context {
    seed: u64,
    rng: StdRng,
}

impl Context {
    /// Create a new context from a seed.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Seed this context was created with.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Draw the seeds of `trials` independent trials (in trial order).
    pub fn trial_seeds(&mut self, trials: usize) -> Vec<u64> {
        (0..trials).map(|_| self.rng.next_u64()).collect()
    }

    /// Create the generator of a single trial from its seed.
    pub fn trial_rng(seed: u64) -> StdRng {
        StdRng::seed_from_u64(seed)
    }
}

impl RngCore for Context {
    fn next_u32(&mut self) -> u32 {
        self.rng.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.rng.next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.rng.fill_bytes(dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), RandError> {
        self.rng.try_fill_bytes(dest)
    }
}
