//! Remote persistence and broadcast with bounded retry
//!
//! The network layer itself lives outside this crate. Implement [`PositionSync`] to
//! connect it; failures are retried a fixed number of times with exponential backoff
//! and then logged, leaving local state as the source of truth until the next sync.

use crate::algorithms::conflict::ObjectVersion;
use crate::api::positioning::PlacementRecord;
use crate::validation::error::{GeoAnchorError, GeoAnchorResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Outbound connection to the remote store and other observers
pub trait PositionSync: Send + Sync {
    /// Persist an object's canonical location
    fn persist(&self, record: &PlacementRecord) -> GeoAnchorResult<()>;

    /// Send a resolved version to every other observer
    fn broadcast(&self, version: &ObjectVersion) -> GeoAnchorResult<()>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 200,
            backoff_multiplier: 2.0,
            max_backoff_ms: 5_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based)
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = self.backoff_multiplier.max(1.0).powi(retry.saturating_sub(1) as i32);
        let millis = (self.initial_backoff_ms as f64 * factor).min(self.max_backoff_ms as f64);
        Duration::from_millis(millis as u64)
    }
}

/// A unit of outbound work
#[derive(Debug, Clone, PartialEq)]
pub enum SyncJob {
    Persist(PlacementRecord),
    Broadcast(ObjectVersion),
}

impl SyncJob {
    pub fn object_id(&self) -> &str {
        match self {
            SyncJob::Persist(record) => &record.object_id,
            SyncJob::Broadcast(version) => version.object_id(),
        }
    }

    fn run(&self, sync: &dyn PositionSync) -> GeoAnchorResult<()> {
        match self {
            SyncJob::Persist(record) => sync.persist(record),
            SyncJob::Broadcast(version) => sync.broadcast(version),
        }
    }
}

/// Run `operation` until it succeeds, fails unrecoverably, or attempts run out.
///
/// `sleep` is called between attempts with the policy's backoff.
pub fn retry_with_backoff<T, F, S>(policy: &RetryPolicy, mut operation: F, mut sleep: S) -> GeoAnchorResult<T>
where
    F: FnMut(u32) -> GeoAnchorResult<T>,
    S: FnMut(Duration),
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation(attempt) {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_recoverable() || e.is_input_rejection() => return Err(e),
            Err(e) if attempt >= max_attempts => {
                return Err(GeoAnchorError::TransportFailure {
                    attempts: attempt,
                    reason: e.to_string(),
                });
            }
            Err(e) => {
                let delay = policy.backoff(attempt);
                debug!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "sync attempt failed, retrying");
                sleep(delay);
                attempt += 1;
            }
        }
    }
}

/// Execute a job with retry on the calling thread
pub fn execute_job(sync: &dyn PositionSync, policy: &RetryPolicy, job: &SyncJob) -> GeoAnchorResult<()> {
    let result = retry_with_backoff(policy, |_| job.run(sync), thread::sleep);
    if let Err(e) = &result {
        // Local state stays authoritative until the next successful sync
        warn!(object_id = job.object_id(), error = %e, "sync gave up");
    }
    result
}

/// Execute a job on a background thread, then hand the outcome to `on_complete`
pub fn spawn_job<F>(
    sync: Arc<dyn PositionSync>,
    policy: RetryPolicy,
    job: SyncJob,
    on_complete: F,
) -> GeoAnchorResult<JoinHandle<GeoAnchorResult<()>>>
where
    F: FnOnce(&SyncJob, &GeoAnchorResult<()>) + Send + 'static,
{
    thread::Builder::new()
        .name("geoanchor-sync".to_string())
        .spawn(move || {
            let result = execute_job(sync.as_ref(), &policy, &job);
            on_complete(&job, &result);
            result
        })
        .map_err(|e| {
            error!(error = %e, "failed to spawn sync thread");
            GeoAnchorError::TransportFailure {
                attempts: 0,
                reason: e.to_string(),
            }
        })
}
