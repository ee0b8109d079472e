//! Rate limiting for expensive per-frame work
//!
//! Frames arrive at up to 60 Hz while anchor searches and raycasts cost several
//! milliseconds, so each operation class runs on its own fixed minimum interval.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::Hash;

/// Minimum intervals per operation class, in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Between drift corrections of the same object
    pub drift_correction_interval_ms: u64,
    /// Between stability-network recomputations
    pub stability_update_interval_ms: u64,
    /// Between occlusion checks
    pub occlusion_check_interval_ms: u64,
    /// Between viewport visibility checks
    pub viewport_check_interval_ms: u64,
    /// Between object recognition / placement checks
    pub placement_check_interval_ms: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            drift_correction_interval_ms: 1_000,
            stability_update_interval_ms: 2_000,
            occlusion_check_interval_ms: 1_000,
            viewport_check_interval_ms: 500,
            placement_check_interval_ms: 500,
        }
    }
}

/// Operation classes sharing the frame budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationClass {
    DriftCorrection,
    StabilityUpdate,
    OcclusionCheck,
    ViewportCheck,
    PlacementCheck,
}

impl ThrottleConfig {
    pub fn interval_ms(&self, class: OperationClass) -> u64 {
        match class {
            OperationClass::DriftCorrection => self.drift_correction_interval_ms,
            OperationClass::StabilityUpdate => self.stability_update_interval_ms,
            OperationClass::OcclusionCheck => self.occlusion_check_interval_ms,
            OperationClass::ViewportCheck => self.viewport_check_interval_ms,
            OperationClass::PlacementCheck => self.placement_check_interval_ms,
        }
    }
}

/// Per-key minimum-interval gate
#[derive(Debug, Clone)]
pub struct RateLimiter<K> {
    interval_ms: u64,
    last_run: HashMap<K, u64>,
}

impl<K: Eq + Hash + Clone> RateLimiter<K> {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            last_run: HashMap::new(),
        }
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    /// Whether `key` may run at `now_ms`, without recording anything
    pub fn is_ready(&self, key: &K, now_ms: u64) -> bool {
        match self.last_run.get(key) {
            Some(&last) => now_ms.saturating_sub(last) >= self.interval_ms,
            None => true,
        }
    }

    /// Record a run if the interval has elapsed. Returns whether the caller may proceed.
    pub fn try_acquire(&mut self, key: &K, now_ms: u64) -> bool {
        if !self.is_ready(key, now_ms) {
            return false;
        }
        self.last_run.insert(key.clone(), now_ms);
        true
    }

    pub fn last_run(&self, key: &K) -> Option<u64> {
        self.last_run.get(key).copied()
    }

    pub fn forget(&mut self, key: &K) {
        self.last_run.remove(key);
    }

    pub fn clear(&mut self) {
        self.last_run.clear();
    }
}

/// One limiter per operation class, keyed by object id where relevant
#[derive(Debug, Clone)]
pub struct FrameThrottle {
    limiters: HashMap<OperationClass, RateLimiter<String>>,
}

impl FrameThrottle {
    pub fn new(config: &ThrottleConfig) -> Self {
        let classes = [
            OperationClass::DriftCorrection,
            OperationClass::StabilityUpdate,
            OperationClass::OcclusionCheck,
            OperationClass::ViewportCheck,
            OperationClass::PlacementCheck,
        ];
        let limiters = classes
            .iter()
            .map(|&class| (class, RateLimiter::new(config.interval_ms(class))))
            .collect();
        Self { limiters }
    }

    /// Gate a class-wide operation
    pub fn try_acquire(&mut self, class: OperationClass, now_ms: u64) -> bool {
        self.try_acquire_for(class, "", now_ms)
    }

    /// Gate an operation for one key within a class
    pub fn try_acquire_for(&mut self, class: OperationClass, key: &str, now_ms: u64) -> bool {
        match self.limiters.get_mut(&class) {
            Some(limiter) => limiter.try_acquire(&key.to_string(), now_ms),
            None => true,
        }
    }

    /// Drop per-key history, e.g. when an object is removed
    pub fn forget_key(&mut self, key: &str) {
        let key = key.to_string();
        for limiter in self.limiters.values_mut() {
            limiter.forget(&key);
        }
    }
}
