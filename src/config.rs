use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_SCAN_PERIOD_MS: u64 = 300;
pub const DEFAULT_TRAFFIC_PERIOD_MS: u64 = 2000;
pub const DEFAULT_HISTORY_CAPACITY: usize = 20;
/// Hard upper bound on discoveries kept per scan.
pub const MAX_HISTORY_CAPACITY: usize = 20;

/// Tunables shared by both engines.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct SimConfig {
    pub scan_period_ms: u64,
    pub traffic_period_ms: u64,
    /// Most recent discoveries kept per scan, at most `MAX_HISTORY_CAPACITY`.
    pub history_capacity: usize,
    /// Fixed RNG seed; `None` draws from the OS.
    pub seed: Option<u64>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            scan_period_ms: DEFAULT_SCAN_PERIOD_MS,
            traffic_period_ms: DEFAULT_TRAFFIC_PERIOD_MS,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            seed: None,
        }
    }
}

impl SimConfig {
    pub fn scan_period(&self) -> Duration {
        Duration::from_millis(self.scan_period_ms.max(1))
    }

    pub fn traffic_period(&self) -> Duration {
        Duration::from_millis(self.traffic_period_ms.max(1))
    }

    pub fn history_capacity(&self) -> usize {
        self.history_capacity.clamp(1, MAX_HISTORY_CAPACITY)
    }
}
