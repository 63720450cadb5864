//! Dispatch independent trials sequentially or across a thread pool.
//!
//! Every trial owns its generator (seeded ahead of dispatch), so the [Strategy] only decides
//! where trials run. Both implementations return results in input order, which makes a run
//! reproducible regardless of the number of threads.
//!
//! # Example
//!
//! ```
//! use estimator::strategy::{Sequential, Strategy};
//!
//! let seeds = vec![3u64, 1, 2];
//! let doubled = Sequential.map(&seeds, |seed| seed * 2);
//! assert_eq!(doubled, vec![6, 2, 4]);
//! ```

use rayon::{
    iter::{IntoParallelRefIterator, ParallelIterator},
    ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder,
};
use std::{fmt, sync::Arc};

/// Where a batch of independent trials is executed.
pub trait Strategy: Clone + Send + Sync + fmt::Debug + 'static {
    /// Apply `op` to every item, returning the results in the order of `items`.
    fn map<T, U, F>(&self, items: &[T], op: F) -> Vec<U>
    where
        T: Sync,
        U: Send,
        F: Fn(&T) -> U + Send + Sync;
}

/// Run every trial on the calling thread.
#[derive(Default, Debug, Clone)]
pub struct Sequential;

impl Strategy for Sequential {
    fn map<T, U, F>(&self, items: &[T], op: F) -> Vec<U>
    where
        T: Sync,
        U: Send,
        F: Fn(&T) -> U + Send + Sync,
    {
        items.iter().map(op).collect()
    }
}

/// Run trials on a shared rayon thread pool.
///
/// Cloning is cheap: all clones schedule onto the same pool.
#[derive(Debug, Clone)]
pub struct Parallel {
    thread_pool: Arc<ThreadPool>,
}

impl Parallel {
    /// Create a new strategy over an existing pool.
    pub const fn new(thread_pool: Arc<ThreadPool>) -> Self {
        Self { thread_pool }
    }

    /// Build a dedicated pool with `threads` workers (`0` lets rayon pick).
    pub fn with_threads(threads: usize) -> Result<Self, ThreadPoolBuildError> {
        let thread_pool = ThreadPoolBuilder::new().num_threads(threads).build()?;
        Ok(Self::new(Arc::new(thread_pool)))
    }

    /// Number of workers in the pool.
    pub fn threads(&self) -> usize {
        self.thread_pool.current_num_threads()
    }
}

impl From<Arc<ThreadPool>> for Parallel {
    fn from(thread_pool: Arc<ThreadPool>) -> Self {
        Self::new(thread_pool)
    }
}

impl Strategy for Parallel {
    fn map<T, U, F>(&self, items: &[T], op: F) -> Vec<U>
    where
        T: Sync,
        U: Send,
        F: Fn(&T) -> U + Send + Sync,
    {
        // Slices split into indexed halves, so collect keeps input order
        self.thread_pool
            .install(|| items.par_iter().map(op).collect())
    }
}
