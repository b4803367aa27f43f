//! Synthetic battery level
//!
//! The producer reports no battery telemetry; results carry a uniformly
//! drawn level in a configured range. Seeding follows the usual
//! convention: 0 draws from entropy, anything else is reproducible.

use parking_lot::Mutex;
use rand::SeedableRng;
use rand::distributions::{Distribution, Uniform};
use rand::rngs::SmallRng;

/// Thread-safe battery level generator shared by all workers
pub struct BatterySimulator {
    rng: Mutex<SmallRng>,
    range: Uniform<u8>,
}

impl BatterySimulator {
    /// Levels are drawn from `min..=max`, clamped to 0..=100
    pub fn new(min: u8, max: u8, seed: u64) -> Self {
        let max = max.min(100);
        let min = min.min(max);
        let rng = if seed == 0 {
            SmallRng::from_entropy()
        } else {
            SmallRng::seed_from_u64(seed)
        };
        Self {
            rng: Mutex::new(rng),
            range: Uniform::new_inclusive(min, max),
        }
    }

    /// Draw the next level
    pub fn sample(&self) -> u8 {
        self.range.sample(&mut *self.rng.lock())
    }
}

impl std::fmt::Debug for BatterySimulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatterySimulator").finish_non_exhaustive()
    }
}
