//! Message inter-arrival statistics.
//!
//! Collects inter-arrival intervals and publishes P50/P90 baselines on a
//! fixed cadence. The baselines feed the scheduler's burst penalty and the
//! QoS metrics snapshot.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::watch;
use tracing::debug;

/// How often baselines are recomputed.
pub const BASELINE_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Default)]
struct StatsState {
    /// Interval samples in milliseconds
    intervals: Vec<f64>,
    /// Cached percentiles; zero until enough samples have been collected
    p50: Duration,
    p90: Duration,
}

/// Rolling percentile analyzer for message inter-arrival intervals.
#[derive(Debug)]
pub struct StatsAnalyzer {
    state: RwLock<StatsState>,
    min_data_points: AtomicUsize,
    mode_switched: AtomicBool,
}

impl StatsAnalyzer {
    /// Create a new analyzer.
    pub fn new(min_data_points: usize) -> Self {
        Self {
            state: RwLock::new(StatsState {
                intervals: Vec::with_capacity(10_000),
                ..Default::default()
            }),
            min_data_points: AtomicUsize::new(min_data_points),
            mode_switched: AtomicBool::new(false),
        }
    }

    /// Record a new inter-arrival interval.
    pub fn record_interval(&self, interval: Duration) {
        let mut state = self.state.write().unwrap();
        state.intervals.push(interval.as_millis() as f64);
    }

    /// 50th percentile baseline; zero before enough samples have been seen.
    pub fn p50(&self) -> Duration {
        self.state.read().unwrap().p50
    }

    /// 90th percentile baseline; zero before enough samples have been seen.
    pub fn p90(&self) -> Duration {
        self.state.read().unwrap().p90
    }

    /// Signal that the behavior mode switched; the next tick clears the
    /// buffer before recomputing. Non-blocking.
    pub fn mode_switched(&self) {
        self.mode_switched.store(true, Ordering::SeqCst);
    }

    /// Update the sample gate on config reload.
    pub fn set_min_data_points(&self, min: usize) {
        self.min_data_points.store(min, Ordering::SeqCst);
    }

    /// Recompute P50/P90 from the current sample buffer.
    ///
    /// The cached values are left untouched when the buffer is below the
    /// sample gate or percentile computation yields nothing.
    pub fn update_baselines(&self) {
        let mut state = self.state.write().unwrap();

        if self.mode_switched.swap(false, Ordering::SeqCst) {
            debug!("behavior mode switched, clearing interval samples");
            state.intervals.clear();
        }

        if state.intervals.len() < self.min_data_points.load(Ordering::SeqCst) {
            return;
        }

        let mut samples = state.intervals.clone();
        let Some(p50) = percentile(&mut samples, 50.0) else {
            return;
        };
        let Some(p90) = percentile(&mut samples, 90.0) else {
            return;
        };

        state.p50 = Duration::from_millis(p50 as u64);
        state.p90 = Duration::from_millis(p90 as u64);

        debug!(
            samples = state.intervals.len(),
            p50_ms = state.p50.as_millis() as u64,
            p90_ms = state.p90.as_millis() as u64,
            "interval baselines updated"
        );
    }

    /// Run the periodic baseline loop until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(BASELINE_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    debug!("stats analyzer shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.update_baselines();
                }
            }
        }
    }
}

/// Percentile over a sample buffer (sorts in place).
///
/// Whole ranks take the sample at the rank; fractional ranks above one take
/// the mean of the two neighbors. Returns None when the buffer is empty or
/// too small for the requested percentile.
pub(crate) fn percentile(samples: &mut [f64], percent: f64) -> Option<f64> {
    if samples.is_empty() || percent <= 0.0 || percent > 100.0 {
        return None;
    }

    samples.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let index = (percent / 100.0) * samples.len() as f64;
    if index == index.trunc() {
        let i = index as usize;
        Some(samples[i - 1])
    } else if index > 1.0 {
        let i = index as usize;
        Some((samples[i - 1] + samples[i]) / 2.0)
    } else {
        None
    }
}
