//! Sorted-pool delay model.
//!
//! Delays are pre-sampled into a pool that is sorted ascending, and each
//! direction walks the pool forward with a fixed stride. Consecutive packets
//! in a direction therefore receive non-decreasing delays (until the walk
//! wraps), so jitter alone never makes a later packet overtake an earlier one
//! while the pool still carries the configured mean and spread.

use std::fmt;
use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal, Uniform};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::DelayConfig;
use crate::error::{Error, Result};
use crate::types::{Direction, PerDirection};

/// Distribution of the jitter term added to the base delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DelayDistribution {
    /// `Normal(0, jitter)`.
    #[default]
    Normal,
    /// `Uniform[-jitter, jitter]`.
    Uniform,
}

impl fmt::Display for DelayDistribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DelayDistribution::Normal => write!(f, "normal"),
            DelayDistribution::Uniform => write!(f, "uniform"),
        }
    }
}

#[derive(Debug, Clone)]
enum Jitter {
    None,
    Normal(Normal<f64>),
    Uniform(Uniform<f64>),
}

impl Jitter {
    fn new(jitter_ms: f64, distribution: DelayDistribution) -> Result<Self> {
        if !jitter_ms.is_finite() {
            return Err(Error::InvalidConfig(format!("jitter must be finite, got {jitter_ms}")));
        }
        if jitter_ms <= 0.0 {
            return Ok(Jitter::None);
        }

        Ok(match distribution {
            DelayDistribution::Normal => Jitter::Normal(
                Normal::new(0.0, jitter_ms)
                    .map_err(|e| Error::InvalidConfig(format!("jitter distribution: {e}")))?,
            ),
            DelayDistribution::Uniform => {
                Jitter::Uniform(Uniform::new_inclusive(-jitter_ms, jitter_ms))
            }
        })
    }

    fn sample<R: Rng>(&self, rng: &mut R) -> f64 {
        match self {
            Jitter::None => 0.0,
            Jitter::Normal(normal) => normal.sample(rng),
            Jitter::Uniform(uniform) => uniform.sample(rng),
        }
    }
}

/// Per-direction delay sampler backed by a sorted pool.
#[derive(Debug, Clone)]
pub struct DelayModel {
    base_ms: f64,
    jitter: Jitter,
    stride: f64,
    pool: Vec<f64>,
    /// Fractional walk position per direction, set on first use.
    cursors: PerDirection<Option<f64>>,
    generation: u64,
    rng: ChaCha8Rng,
}

impl DelayModel {
    /// Build a model from configuration and fill the first pool.
    pub fn new(config: &DelayConfig) -> Result<Self> {
        if !config.base_ms.is_finite() {
            return Err(Error::InvalidConfig(format!(
                "base delay must be finite, got {}",
                config.base_ms
            )));
        }

        let pool_size = config.pool_size();
        let expected = config.expected_packets.max(1);
        let rng = config
            .seed
            .map_or_else(ChaCha8Rng::from_entropy, ChaCha8Rng::seed_from_u64);

        let mut model = Self {
            base_ms: config.base_ms,
            jitter: Jitter::new(config.jitter_ms, config.distribution)?,
            stride: pool_size as f64 / expected as f64,
            pool: Vec::with_capacity(pool_size),
            cursors: PerDirection::default(),
            generation: 0,
            rng,
        };
        model.fill_pool(pool_size);
        Ok(model)
    }

    /// Sample the natural delay, in milliseconds, for the next packet in
    /// `direction`.
    pub fn sample(&mut self, direction: Direction) -> f64 {
        let len = self.pool.len();
        let mut cursor = match self.cursors[direction] {
            Some(cursor) => cursor,
            // Random phase so both directions see the whole distribution.
            None => self.rng.gen::<f64>() * len as f64,
        };

        let mut index = (cursor as usize) % len;
        // A stride that steps over index 0 skips regeneration for that lap.
        if index == 0 && cursor >= len as f64 {
            self.regenerate();
            cursor = 0.0;
            index = 0;
        }

        let delay_ms = self.pool[index];
        self.cursors[direction] = Some(cursor + self.stride);
        delay_ms
    }

    /// The current sorted pool.
    pub fn pool(&self) -> &[f64] {
        &self.pool
    }

    /// Cursor advance per sample.
    pub fn stride(&self) -> f64 {
        self.stride
    }

    /// Number of times the pool has been regenerated.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn regenerate(&mut self) {
        let size = self.pool.len();
        self.pool.clear();
        self.fill_pool(size);
        self.generation += 1;
        debug!(generation = self.generation, size, "Regenerated delay pool");
    }

    fn fill_pool(&mut self, size: usize) {
        for _ in 0..size {
            let jitter = self.jitter.sample(&mut self.rng);
            self.pool.push((self.base_ms + jitter).max(0.0));
        }
        self.pool.sort_by(f64::total_cmp);
    }
}

/// Convert a delay in milliseconds to a [`Duration`].
pub fn delay_duration(delay_ms: f64) -> Duration {
    Duration::from_nanos((delay_ms.max(0.0) * 1_000_000.0).round() as u64)
}
