//! Synthetic pairwise network latency between validators.
//!
//! Validators are placed in one of four geographic clusters (by fixed population share,
//! in index order, with rounding leftovers placed in the first cluster). The latency of an
//! ordered pair `(i, j)` is drawn independently for every pair:
//!
//! - same cluster: the cluster's base latency plus `U(0, INTRA_JITTER_MS)`
//! - different clusters: the base latency of the (unordered) cluster pair plus
//!   `U(0, INTER_JITTER_MS)`
//!
//! All constants are expressed for a reference delay of [REFERENCE_DELAY_MS] and scale
//! linearly with the configured base delay. Because every ordered pair receives its own
//! jitter, `latency(i, j)` and `latency(j, i)` generally differ.

use crate::{stake::STAKE_EPSILON, Error, StakeDistribution};
use rand::Rng;
use rand_distr::{Distribution, Uniform};
use serde::Serialize;
use tracing::debug;

/// Base delay at which the cluster constants below are expressed (in milliseconds).
pub const REFERENCE_DELAY_MS: f64 = 100.0;

/// Upper bound of the jitter added within a cluster (at the reference delay).
const INTRA_JITTER_MS: f64 = 5.0;

/// Upper bound of the jitter added between clusters (at the reference delay).
const INTER_JITTER_MS: f64 = 20.0;

/// Base latency of cluster pairs missing from [INTER_CLUSTER_MS].
const DEFAULT_INTER_CLUSTER_MS: f64 = 200.0;

/// Base latency between clusters (at the reference delay).
const INTER_CLUSTER_MS: [(Cluster, Cluster, f64); 5] = [
    (Cluster::NorthAmerica, Cluster::Europe, 80.0),
    (Cluster::NorthAmerica, Cluster::Asia, 150.0),
    (Cluster::NorthAmerica, Cluster::Other, 120.0),
    (Cluster::Europe, Cluster::Asia, 180.0),
    (Cluster::Europe, Cluster::Other, 140.0),
];

/// Synthetic geographic region of a validator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Cluster {
    NorthAmerica,
    Europe,
    Asia,
    Other,
}

impl Cluster {
    /// All clusters, in assignment order.
    pub const ALL: [Cluster; 4] = [
        Cluster::NorthAmerica,
        Cluster::Europe,
        Cluster::Asia,
        Cluster::Other,
    ];

    /// Fraction of validators placed in this cluster.
    pub fn population_share(&self) -> f64 {
        match self {
            Cluster::NorthAmerica => 0.4,
            Cluster::Europe => 0.3,
            Cluster::Asia => 0.2,
            Cluster::Other => 0.1,
        }
    }

    /// Base latency between two validators of this cluster (at the reference delay).
    pub fn intra_latency_ms(&self) -> f64 {
        match self {
            Cluster::NorthAmerica => 10.0,
            Cluster::Europe => 12.0,
            Cluster::Asia => 15.0,
            Cluster::Other => 20.0,
        }
    }

    /// Base latency between this cluster and `other` (at the reference delay).
    pub fn inter_latency_ms(&self, other: Cluster) -> f64 {
        if *self == other {
            return self.intra_latency_ms();
        }
        let (a, b) = if *self < other {
            (*self, other)
        } else {
            (other, *self)
        };
        INTER_CLUSTER_MS
            .iter()
            .find(|(x, y, _)| *x == a && *y == b)
            .map_or(DEFAULT_INTER_CLUSTER_MS, |(_, _, latency)| *latency)
    }
}

/// Square matrix of one-way latencies (in milliseconds) between validators.
///
/// The diagonal is zero and every entry is non-negative. The matrix is not symmetric.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LatencyMatrix {
    validators: usize,
    values: Vec<f64>,
}

impl LatencyMatrix {
    /// Build a matrix from explicit rows.
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self, Error> {
        let validators = rows.len();
        if validators == 0 {
            return Err(Error::NoValidators);
        }
        let mut values = Vec::with_capacity(validators * validators);
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != validators {
                return Err(Error::StakeLengthMismatch {
                    stake: validators,
                    latency: row.len(),
                });
            }
            for (j, value) in row.into_iter().enumerate() {
                let value = if i == j { 0.0 } else { value };
                if !value.is_finite() || value < 0.0 {
                    return Err(Error::InvalidDelay {
                        name: "latency",
                        value,
                    });
                }
                values.push(value);
            }
        }
        Ok(Self { validators, values })
    }

    /// Number of validators covered by the matrix.
    pub fn len(&self) -> usize {
        self.validators
    }

    /// Returns true if the matrix covers no validators.
    pub fn is_empty(&self) -> bool {
        self.validators == 0
    }

    /// One-way latency from `from` to `to`.
    pub fn get(&self, from: usize, to: usize) -> f64 {
        self.values[from * self.validators + to]
    }
}

/// Latency matrix together with the cluster placement and base delay it was built from.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LatencyModel {
    base_delay_ms: f64,
    clusters: Vec<Cluster>,
    matrix: LatencyMatrix,
}

impl LatencyModel {
    /// Generate a latency model for `validators` validators.
    ///
    /// Consumes one draw per ordered pair of distinct validators, row by row.
    pub fn generate<R: Rng>(
        rng: &mut R,
        validators: usize,
        base_delay_ms: f64,
    ) -> Result<Self, Error> {
        if validators == 0 {
            return Err(Error::NoValidators);
        }
        if !base_delay_ms.is_finite() || base_delay_ms <= 0.0 {
            return Err(Error::InvalidDelay {
                name: "base_delay_ms",
                value: base_delay_ms,
            });
        }
        let scale = base_delay_ms / REFERENCE_DELAY_MS;
        let clusters = place(validators);

        let intra = Uniform::new(0.0, INTRA_JITTER_MS * scale);
        let inter = Uniform::new(0.0, INTER_JITTER_MS * scale);
        let mut values = Vec::with_capacity(validators * validators);
        for from in 0..validators {
            for to in 0..validators {
                if from == to {
                    values.push(0.0);
                    continue;
                }
                let (a, b) = (clusters[from], clusters[to]);
                let jitter = if a == b {
                    intra.sample(rng)
                } else {
                    inter.sample(rng)
                };
                values.push(a.inter_latency_ms(b) * scale + jitter);
            }
        }
        debug!(validators, base_delay_ms, "generated latency matrix");

        Ok(Self {
            base_delay_ms,
            clusters,
            matrix: LatencyMatrix { validators, values },
        })
    }

    /// Wrap an explicit matrix (all validators are placed in the first cluster).
    pub fn from_matrix(matrix: LatencyMatrix, base_delay_ms: f64) -> Result<Self, Error> {
        if !base_delay_ms.is_finite() || base_delay_ms <= 0.0 {
            return Err(Error::InvalidDelay {
                name: "base_delay_ms",
                value: base_delay_ms,
            });
        }
        Ok(Self {
            base_delay_ms,
            clusters: vec![Cluster::NorthAmerica; matrix.len()],
            matrix,
        })
    }

    /// Number of validators covered by the model.
    pub fn len(&self) -> usize {
        self.matrix.len()
    }

    /// Returns true if the model covers no validators.
    pub fn is_empty(&self) -> bool {
        self.matrix.is_empty()
    }

    /// Base delay the model was generated with.
    pub fn base_delay_ms(&self) -> f64 {
        self.base_delay_ms
    }

    /// Cluster `validator` was placed in.
    pub fn cluster(&self, validator: usize) -> Cluster {
        self.clusters[validator]
    }

    /// Underlying latency matrix.
    pub fn matrix(&self) -> &LatencyMatrix {
        &self.matrix
    }

    /// One-way latency from `from` to `to`.
    pub fn latency(&self, from: usize, to: usize) -> f64 {
        self.matrix.get(from, to)
    }

    /// Mean pairwise latency among the heaviest validators holding `percentile` of stake.
    ///
    /// Validators are taken in descending stake order until their cumulative stake meets
    /// `percentile`. If that group contains a single validator, there are no pairs to
    /// average and the base delay is returned instead.
    pub fn percentile_latency(&self, stake: &StakeDistribution, percentile: f64) -> f64 {
        let mut group = Vec::new();
        let mut cumulative = 0.0;
        for validator in stake.by_descending_stake() {
            group.push(validator);
            cumulative += stake.stake(validator);
            if cumulative + STAKE_EPSILON >= percentile {
                break;
            }
        }
        if group.len() < 2 {
            debug!(
                percentile,
                base_delay_ms = self.base_delay_ms,
                "percentile group too small, using base delay"
            );
            return self.base_delay_ms;
        }

        let mut sum = 0.0;
        for &from in &group {
            for &to in &group {
                if from != to {
                    sum += self.latency(from, to);
                }
            }
        }
        sum / (group.len() * (group.len() - 1)) as f64
    }
}

/// Place validators into clusters by population share, in index order.
fn place(validators: usize) -> Vec<Cluster> {
    let mut clusters = Vec::with_capacity(validators);
    for cluster in Cluster::ALL {
        let count = (validators as f64 * cluster.population_share()).floor() as usize;
        clusters.extend(std::iter::repeat(cluster).take(count));
    }
    clusters.resize(validators, Cluster::NorthAmerica);
    clusters
}
