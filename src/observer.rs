//! End-to-end latency observation.
//!
//! Records per-request latencies, publishes the P95 as the high-load
//! threshold on a fixed cadence, and exposes a bounded load ratio derived
//! from the current sample window. The sample buffer is emptied after each
//! publish so stale samples cannot dominate the next window.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::watch;
use tracing::debug;

use crate::stats::percentile;

/// How often the high-load threshold is recomputed.
pub const OBSERVE_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Default)]
struct ObserverState {
    /// Latency samples in milliseconds
    latencies: Vec<f64>,
    /// Published P95; zero until first computed
    high_load_threshold: Duration,
}

/// Rolling P95 latency observer.
#[derive(Debug)]
pub struct LatencyObserver {
    state: RwLock<ObserverState>,
    /// Saturation latency for the load ratio, in milliseconds
    latency_threshold_ms: AtomicU64,
    min_data_points: AtomicUsize,
}

impl LatencyObserver {
    /// Create a new observer.
    pub fn new(latency_threshold: Duration, min_data_points: usize) -> Self {
        Self {
            state: RwLock::new(ObserverState {
                latencies: Vec::with_capacity(1_000),
                ..Default::default()
            }),
            latency_threshold_ms: AtomicU64::new(latency_threshold.as_millis() as u64),
            min_data_points: AtomicUsize::new(min_data_points),
        }
    }

    /// Record a new end-to-end request latency.
    pub fn record_latency(&self, latency: Duration) {
        let mut state = self.state.write().unwrap();
        state.latencies.push(latency.as_millis() as f64);
    }

    /// Current high-load threshold; zero if never computed.
    pub fn high_load_threshold(&self) -> Duration {
        self.state.read().unwrap().high_load_threshold
    }

    /// Current load as a ratio in [0, 1]: mean of the sample window over the
    /// configured latency threshold, clipped at 1.
    pub fn current_load(&self) -> f64 {
        let state = self.state.read().unwrap();

        if state.latencies.is_empty() {
            return 0.0;
        }

        let threshold_ms = self.latency_threshold_ms.load(Ordering::SeqCst) as f64;
        if threshold_ms == 0.0 {
            return 0.0;
        }

        let sum: f64 = state.latencies.iter().sum();
        let mean = sum / state.latencies.len() as f64;

        (mean / threshold_ms).min(1.0)
    }

    /// Update the saturation latency on config reload.
    pub fn set_latency_threshold(&self, threshold: Duration) {
        self.latency_threshold_ms
            .store(threshold.as_millis() as u64, Ordering::SeqCst);
    }

    /// Update the sample gate on config reload.
    pub fn set_min_data_points(&self, min: usize) {
        self.min_data_points.store(min, Ordering::SeqCst);
    }

    /// Recompute the high-load threshold from the current window, then empty
    /// the window. Skipped below the sample gate.
    pub fn update_high_load_threshold(&self) {
        let mut state = self.state.write().unwrap();

        if state.latencies.len() < self.min_data_points.load(Ordering::SeqCst) {
            return;
        }

        let mut samples = state.latencies.clone();
        let Some(p95) = percentile(&mut samples, 95.0) else {
            return;
        };

        state.high_load_threshold = Duration::from_millis(p95 as u64);
        state.latencies.clear();

        debug!(
            threshold_ms = state.high_load_threshold.as_millis() as u64,
            "high-load threshold updated"
        );
    }

    /// Run the periodic threshold loop until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(OBSERVE_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    debug!("latency observer shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.update_high_load_threshold();
                }
            }
        }
    }
}
