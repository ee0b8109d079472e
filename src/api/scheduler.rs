//! Cancellable periodic background work
//!
//! A [`Ticker`] owns one thread that waits for its interval, checks a cancellation flag,
//! and runs its callback. Dropping the ticker cancels and joins the thread.

use crate::validation::error::{GeoAnchorError, GeoAnchorResult};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error};

pub struct Ticker {
    name: String,
    interval: Duration,
    cancelled: Arc<AtomicBool>,
    ticks: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

impl Ticker {
    /// Start a ticker calling `tick` every `interval`
    pub fn spawn<F>(name: impl Into<String>, interval: Duration, mut tick: F) -> GeoAnchorResult<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let name = name.into();
        if interval.is_zero() {
            return Err(GeoAnchorError::Configuration {
                parameter: format!("{}.interval", name),
                value: "0".to_string(),
                reason: "ticker interval must be positive".to_string(),
            });
        }

        let cancelled = Arc::new(AtomicBool::new(false));
        let ticks = Arc::new(AtomicU64::new(0));
        let thread_cancelled = cancelled.clone();
        let thread_ticks = ticks.clone();

        let handle = thread::Builder::new()
            .name(format!("geoanchor-{}", name))
            .spawn(move || {
                while wait_for(interval, &thread_cancelled) {
                    tick();
                    thread_ticks.fetch_add(1, Ordering::Relaxed);
                }
            })
            .map_err(|e| {
                error!(ticker = %name, error = %e, "failed to spawn ticker thread");
                GeoAnchorError::Configuration {
                    parameter: format!("{}.thread", name),
                    value: String::new(),
                    reason: e.to_string(),
                }
            })?;

        debug!(ticker = %name, interval_ms = interval.as_millis() as u64, "ticker started");
        Ok(Self {
            name,
            interval,
            cancelled,
            ticks,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Completed callback invocations
    pub fn tick_count(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        !self.cancelled.load(Ordering::Acquire)
            && self.handle.as_ref().map_or(false, |h| !h.is_finished())
    }

    /// Signal the thread to stop without waiting for it
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        if let Some(handle) = &self.handle {
            handle.thread().unpark();
        }
    }

    /// Cancel and wait for any in-progress tick to finish
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.cancel();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!(ticker = %self.name, "ticker callback panicked");
            }
            debug!(ticker = %self.name, ticks = self.tick_count(), "ticker stopped");
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Park until `interval` has elapsed. Returns false if cancelled meanwhile.
fn wait_for(interval: Duration, cancelled: &AtomicBool) -> bool {
    let deadline = Instant::now() + interval;
    loop {
        if cancelled.load(Ordering::Acquire) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        // Spurious wakeups just loop again
        thread::park_timeout(deadline - now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_ticker_runs_until_stopped() {
        let counter = Arc::new(AtomicUsize::new(0));
        let thread_counter = counter.clone();
        let ticker = Ticker::spawn("count", Duration::from_millis(5), move || {
            thread_counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        thread::sleep(Duration::from_millis(100));
        assert!(ticker.is_running());
        ticker.stop();

        let after_stop = counter.load(Ordering::SeqCst);
        assert!(after_stop >= 2, "only {} ticks", after_stop);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(counter.load(Ordering::SeqCst), after_stop);
    }

    #[test]
    fn test_drop_cancels_long_interval_promptly() {
        let ticker = Ticker::spawn("slow", Duration::from_secs(60), || {}).unwrap();
        let started = Instant::now();
        drop(ticker);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_zero_interval_rejected() {
        assert!(matches!(
            Ticker::spawn("bad", Duration::ZERO, || {}),
            Err(GeoAnchorError::Configuration { .. })
        ));
    }
}
