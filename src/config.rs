//! Session settings.

use std::time::Duration;

use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::error::ConfigError;
use crate::generator::{BoxedRng, DEFAULT_PAYLOAD_CAP, MAX_PAYLOAD_CAP};

pub const DEFAULT_CAPACITY: usize = 1000;
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Packets kept in the sliding window.
    pub capacity: usize,

    /// Period between generated packets while capturing.
    pub tick_interval: Duration,

    /// Upper bound on captured payload bytes per packet.
    pub payload_cap: usize,

    /// Fixed seed for reproducible traffic. `None` draws from OS entropy.
    pub seed: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            tick_interval: DEFAULT_TICK_INTERVAL,
            payload_cap: DEFAULT_PAYLOAD_CAP,
            seed: None,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.tick_interval.is_zero() {
            return Err(ConfigError::ZeroTickInterval);
        }
        if self.payload_cap == 0 {
            return Err(ConfigError::ZeroPayloadCap);
        }
        if self.payload_cap > MAX_PAYLOAD_CAP {
            return Err(ConfigError::PayloadCapTooLarge {
                cap: self.payload_cap,
                max: MAX_PAYLOAD_CAP,
            });
        }
        Ok(())
    }

    pub(crate) fn build_rng(&self) -> BoxedRng {
        match self.seed {
            Some(seed) => Box::new(StdRng::seed_from_u64(seed)),
            None => Box::new(StdRng::from_entropy()),
        }
    }
}
