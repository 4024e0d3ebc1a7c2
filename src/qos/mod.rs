//! Quality-of-service management.
//!
//! The QoS manager is the single admission and feedback point for event
//! dispatch: a circuit breaker over consecutive upstream failures plus a
//! deterministic adaptive throttle whose level tracks observed load and
//! response times. All state lives behind one mutex; every public operation
//! is a short critical section and never blocks on I/O.

mod strategy;

pub use strategy::{
    BlendedStrategy, LoadBasedStrategy, ResponseTimeBasedStrategy, ThrottleInputs,
    ThrottlingStrategy, TARGET_RESPONSE_TIME,
};

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::load::LoadCounter;
use crate::observer::LatencyObserver;
use crate::stats::StatsAnalyzer;

/// How often the monitor loop emits a metrics snapshot.
pub const MONITOR_INTERVAL: Duration = Duration::from_secs(10);

/// Smoothing factor for the response-time EMAs.
const EMA_ALPHA: f64 = 0.1;

/// Point-in-time QoS metrics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct QosMetrics {
    pub throttle_level: f64,
    pub circuit_open: bool,
    pub failure_count: u32,
    pub current_load: i64,
    pub response_time_p50_ms: u64,
    pub response_time_p90_ms: u64,
    pub baseline_p50_ms: u64,
    pub baseline_p90_ms: u64,
}

struct QosState {
    config: Arc<Config>,
    strategy: Box<dyn ThrottlingStrategy>,

    // Circuit breaker
    circuit_open: bool,
    circuit_opened_at: Option<Instant>,
    consecutive_failures: u32,

    // Adaptive throttling
    throttle_level: f64,
    last_adjustment: Instant,

    // Response-time EMAs
    response_p50: Duration,
    response_p90: Duration,
}

/// Admission and feedback manager.
pub struct QoSManager {
    state: Mutex<QosState>,
    load: Arc<LoadCounter>,
    stats: Arc<StatsAnalyzer>,
    observer: Arc<LatencyObserver>,
}

impl QoSManager {
    /// Create a new manager with the default blended throttling strategy.
    pub fn new(
        config: Arc<Config>,
        load: Arc<LoadCounter>,
        stats: Arc<StatsAnalyzer>,
        observer: Arc<LatencyObserver>,
    ) -> Self {
        Self {
            state: Mutex::new(QosState {
                config,
                strategy: Box::new(BlendedStrategy::default()),
                circuit_open: false,
                circuit_opened_at: None,
                consecutive_failures: 0,
                throttle_level: 0.0,
                last_adjustment: Instant::now(),
                response_p50: Duration::ZERO,
                response_p90: Duration::ZERO,
            }),
            load,
            stats,
            observer,
        }
    }

    /// Replace the throttling strategy.
    pub fn set_strategy(&self, strategy: Box<dyn ThrottlingStrategy>) {
        self.state.lock().unwrap().strategy = strategy;
    }

    /// Decide whether a request should be throttled.
    ///
    /// Synchronous and non-blocking; called on the hot admission path.
    pub fn should_throttle(&self, user_id: &str, priority: i32) -> bool {
        let mut state = self.state.lock().unwrap();
        let config = state.config.clone();

        // Circuit breaker gate
        if config.qos.circuit_breaker.enabled && state.circuit_open {
            let recovered = state
                .circuit_opened_at
                .map(|at| at.elapsed() >= config.qos.circuit_breaker.recovery_timeout)
                .unwrap_or(true);

            if recovered {
                state.circuit_open = false;
                state.circuit_opened_at = None;
                state.consecutive_failures = 0;
                info!("circuit breaker closed, attempting recovery");
            } else {
                debug!(user_id = %user_id, "request throttled, circuit open");
                return true;
            }
        }

        // Adaptive throttle gate
        if config.qos.adaptive_throttling.enabled {
            let limits = &config.qos.system_limits;
            let load_ratio = self.load.get() as f64 / limits.max_load as f64;
            let max_priority = config.scheduler.priority.max.max(1) as f64;

            let mut probability =
                state.throttle_level * (1.0 - priority as f64 / max_priority);

            if load_ratio > limits.high_load_threshold {
                probability *= 1.0 + load_ratio;
            }

            // Deterministic threshold; the probability is a level, not a draw
            if probability > 0.5 {
                debug!(
                    user_id = %user_id,
                    priority,
                    probability,
                    "request throttled adaptively"
                );
                return true;
            }
        }

        false
    }

    /// Feed back the outcome of one processed request.
    pub fn update_metrics(&self, response_time: Duration, success: bool) {
        let mut state = self.state.lock().unwrap();
        let config = state.config.clone();

        // Circuit breaker bookkeeping
        if config.qos.circuit_breaker.enabled {
            if success {
                state.consecutive_failures = 0;
            } else {
                state.consecutive_failures += 1;
                if state.consecutive_failures >= config.qos.circuit_breaker.failure_threshold {
                    if !state.circuit_open {
                        warn!(
                            failures = state.consecutive_failures,
                            "circuit breaker opened"
                        );
                        metrics::counter!("botrouterd.qos.circuit_opened").increment(1);
                    }
                    state.circuit_open = true;
                    state.circuit_opened_at = Some(Instant::now());
                }
            }
        }

        // Adaptive throttle adjustment, rate-limited to avoid oscillation
        if config.qos.adaptive_throttling.enabled
            && state.last_adjustment.elapsed() >= config.qos.system_limits.adjustment_interval
        {
            let inputs = ThrottleInputs {
                current_load: self.observer.current_load(),
                avg_response_time: state.response_p50,
                config: &config.qos,
            };
            let interval = state.strategy.target_interval(&inputs);

            let base = config.qos.adaptive_throttling.base_interval;
            let max = config.qos.adaptive_throttling.max_interval;

            state.throttle_level = if interval <= base {
                0.0
            } else if interval >= max {
                1.0
            } else {
                (interval - base).as_secs_f64() / (max - base).as_secs_f64()
            };
            state.last_adjustment = Instant::now();

            info!(
                throttle_level = state.throttle_level,
                interval_ms = interval.as_millis() as u64,
                "throttle level adjusted"
            );
        }

        // Response-time EMAs
        state.response_p50 = ema(state.response_p50, response_time);
        state.response_p90 = ema(state.response_p90, response_time);
    }

    /// Snapshot of current QoS metrics.
    pub fn metrics(&self) -> QosMetrics {
        let state = self.state.lock().unwrap();
        QosMetrics {
            throttle_level: state.throttle_level,
            circuit_open: state.circuit_open,
            failure_count: state.consecutive_failures,
            current_load: self.load.get(),
            response_time_p50_ms: state.response_p50.as_millis() as u64,
            response_time_p90_ms: state.response_p90.as_millis() as u64,
            baseline_p50_ms: self.stats.p50().as_millis() as u64,
            baseline_p90_ms: self.stats.p90().as_millis() as u64,
        }
    }

    /// Apply a new configuration.
    ///
    /// Circuit breaker and throttling state are reset when their parameters
    /// changed, so a reload never leaves the system latched on stale limits.
    pub fn update_config(&self, new: Arc<Config>) {
        let mut state = self.state.lock().unwrap();
        let old = state.config.clone();

        if old.qos.circuit_breaker != new.qos.circuit_breaker {
            state.circuit_open = false;
            state.circuit_opened_at = None;
            state.consecutive_failures = 0;
            info!("circuit breaker configuration changed, state reset");
        }

        if old.qos.adaptive_throttling != new.qos.adaptive_throttling {
            state.throttle_level = 0.0;
            state.last_adjustment = Instant::now();
            info!("adaptive throttling configuration changed, level reset");
        }

        state.config = new;
    }

    /// Run the periodic monitor loop until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(MONITOR_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    debug!("qos monitor shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.report();
                }
            }
        }
    }

    fn report(&self) {
        let snapshot = self.metrics();

        debug!(
            throttle_level = snapshot.throttle_level,
            circuit_open = snapshot.circuit_open,
            failure_count = snapshot.failure_count,
            current_load = snapshot.current_load,
            response_p50_ms = snapshot.response_time_p50_ms,
            response_p90_ms = snapshot.response_time_p90_ms,
            "qos metrics"
        );

        if snapshot.circuit_open {
            warn!(
                failure_count = snapshot.failure_count,
                "circuit breaker is open"
            );
        }
        if snapshot.throttle_level > 0.5 {
            warn!(
                throttle_level = snapshot.throttle_level,
                "high throttle level"
            );
        }
    }
}

fn ema(old: Duration, sample: Duration) -> Duration {
    old.mul_f64(1.0 - EMA_ALPHA) + sample.mul_f64(EMA_ALPHA)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn config() -> Config {
        let yaml = r#"
tenants:
  - route: bot.example.com/webhook
    secret: abcd
"#;
        Config::from_yaml(yaml).unwrap()
    }

    fn manager(config: Config) -> QoSManager {
        let load = Arc::new(LoadCounter::new());
        let stats = Arc::new(StatsAnalyzer::new(10));
        let observer = Arc::new(LatencyObserver::new(Duration::from_secs(1), 10));
        QoSManager::new(Arc::new(config), load, stats, observer)
    }

    #[test]
    fn test_no_throttle_at_rest() {
        let qos = manager(config());
        assert!(!qos.should_throttle("u1", 5));
    }

    #[test]
    fn test_circuit_opens_after_threshold_failures() {
        let mut config = config();
        config.qos.circuit_breaker.failure_threshold = 2;
        let qos = manager(config);

        qos.update_metrics(Duration::from_millis(10), false);
        assert!(!qos.should_throttle("u1", 5));

        qos.update_metrics(Duration::from_millis(10), false);
        assert!(qos.should_throttle("u1", 5));
        assert!(qos.metrics().circuit_open);
    }

    #[test]
    fn test_success_resets_failure_count() {
        let mut config = config();
        config.qos.circuit_breaker.failure_threshold = 3;
        let qos = manager(config);

        qos.update_metrics(Duration::from_millis(10), false);
        qos.update_metrics(Duration::from_millis(10), false);
        qos.update_metrics(Duration::from_millis(10), true);
        qos.update_metrics(Duration::from_millis(10), false);
        qos.update_metrics(Duration::from_millis(10), false);

        assert!(!qos.metrics().circuit_open);
    }

    #[test]
    fn test_circuit_closes_after_recovery_timeout() {
        let mut config = config();
        config.qos.circuit_breaker.failure_threshold = 1;
        config.qos.circuit_breaker.recovery_timeout = Duration::ZERO;
        let qos = manager(config);

        qos.update_metrics(Duration::from_millis(10), false);
        // Recovery timeout elapsed immediately; next admission closes it
        assert!(!qos.should_throttle("u1", 5));
        assert!(!qos.metrics().circuit_open);

        // A subsequent failure past the threshold reopens immediately
        qos.update_metrics(Duration::from_millis(10), false);
        assert!(qos.should_throttle("u1", 5));
    }

    #[test]
    fn test_circuit_stays_open_within_recovery_window() {
        let mut config = config();
        config.qos.circuit_breaker.failure_threshold = 1;
        config.qos.circuit_breaker.recovery_timeout = Duration::from_secs(60);
        let qos = manager(config);

        qos.update_metrics(Duration::from_millis(10), false);
        for _ in 0..5 {
            assert!(qos.should_throttle("u1", 10));
        }
    }

    #[test]
    fn test_disabled_breaker_never_gates() {
        let mut config = config();
        config.qos.circuit_breaker.enabled = false;
        config.qos.circuit_breaker.failure_threshold = 1;
        let qos = manager(config);

        qos.update_metrics(Duration::from_millis(10), false);
        qos.update_metrics(Duration::from_millis(10), false);
        assert!(!qos.should_throttle("u1", 5));
    }

    #[test]
    fn test_adaptive_throttle_deterministic_threshold() {
        let qos = manager(config());

        // Force a throttle level directly
        qos.state.lock().unwrap().throttle_level = 0.8;

        // priority 1 of max 10: p = 0.8 * 0.9 = 0.72 > 0.5 -> throttled
        assert!(qos.should_throttle("u1", 1));
        // priority 10: p = 0 -> admitted
        assert!(!qos.should_throttle("u1", 10));
        // Decisions are stable: same inputs, same answer
        assert!(qos.should_throttle("u1", 1));
        assert!(qos.should_throttle("u1", 1));
    }

    #[test]
    fn test_high_load_amplifies_probability() {
        let qos = manager(config());
        qos.state.lock().unwrap().throttle_level = 0.5;

        // p = 0.5 * (1 - 5/10) = 0.25 -> admitted at rest
        assert!(!qos.should_throttle("u1", 5));

        // Push load over high_load_threshold: ratio 0.9 amplifies to 0.475 ->
        // still admitted; ratio above 1.1 pushes past 0.5
        for _ in 0..120 {
            qos.load.increment();
        }
        assert!(qos.should_throttle("u1", 5));
    }

    #[test]
    fn test_adjustment_rate_limited() {
        let mut config = config();
        config.qos.system_limits.adjustment_interval = Duration::from_secs(3600);
        let qos = manager(config);

        let before = qos.metrics().throttle_level;
        qos.update_metrics(Duration::from_secs(5), true);
        assert_eq!(qos.metrics().throttle_level, before);
    }

    #[test]
    fn test_adjustment_applies_after_interval() {
        let mut config = config();
        config.qos.system_limits.adjustment_interval = Duration::ZERO;
        let qos = manager(config);

        // Slow responses must push the level up once the EMA has risen
        for _ in 0..50 {
            qos.update_metrics(Duration::from_secs(30), true);
        }
        assert!(qos.metrics().throttle_level > 0.0);
    }

    #[test]
    fn test_ema_smoothing() {
        let qos = manager(config());
        qos.update_metrics(Duration::from_secs(1), true);
        let m = qos.metrics();
        // 0.9 * 0 + 0.1 * 1000ms
        assert_eq!(m.response_time_p50_ms, 100);
        assert_eq!(m.response_time_p90_ms, 100);
    }

    #[test]
    fn test_update_config_resets_changed_state() {
        let mut config = config();
        config.qos.circuit_breaker.failure_threshold = 1;
        let qos = manager(config.clone());

        qos.update_metrics(Duration::from_millis(10), false);
        assert!(qos.metrics().circuit_open);

        let mut new = config;
        new.qos.circuit_breaker.failure_threshold = 10;
        qos.update_config(Arc::new(new));

        assert!(!qos.metrics().circuit_open);
        assert_eq!(qos.metrics().failure_count, 0);
    }

    #[test]
    fn test_update_config_same_params_keeps_state() {
        let mut config = config();
        config.qos.circuit_breaker.failure_threshold = 1;
        let qos = manager(config.clone());

        qos.update_metrics(Duration::from_millis(10), false);
        assert!(qos.metrics().circuit_open);

        qos.update_config(Arc::new(config));
        assert!(qos.metrics().circuit_open);
    }
}
