//! Throttling interval strategies.
//!
//! A strategy maps the observed system state onto a target admission
//! interval between `base_interval` and `max_interval`. The QoS manager
//! converts that interval into a throttle level.

use std::time::Duration;

use crate::config::QosConfig;

/// Response time the response-time strategy steers toward.
pub const TARGET_RESPONSE_TIME: Duration = Duration::from_secs(1);

/// Inputs to a throttling strategy: a snapshot of the observed state.
#[derive(Debug, Clone, Copy)]
pub struct ThrottleInputs<'a> {
    /// Observed load ratio in [0, 1]
    pub current_load: f64,
    /// Smoothed average upstream response time
    pub avg_response_time: Duration,
    /// QoS configuration in effect
    pub config: &'a QosConfig,
}

/// Strategy for computing the target admission interval.
pub trait ThrottlingStrategy: Send + Sync {
    fn target_interval(&self, inputs: &ThrottleInputs<'_>) -> Duration;
}

/// Scales the interval with the observed load ratio.
#[derive(Debug, Default)]
pub struct LoadBasedStrategy;

impl ThrottlingStrategy for LoadBasedStrategy {
    fn target_interval(&self, inputs: &ThrottleInputs<'_>) -> Duration {
        let throttling = &inputs.config.adaptive_throttling;
        let base = throttling.base_interval;
        let max = throttling.max_interval;

        let load_threshold = inputs.config.system_limits.load_threshold;
        if load_threshold > 0.0 && inputs.current_load > load_threshold {
            let factor = inputs.current_load / load_threshold;
            return base.mul_f64(factor).min(max);
        }

        base
    }
}

/// Scales the interval with the average response time.
#[derive(Debug, Default)]
pub struct ResponseTimeBasedStrategy;

impl ThrottlingStrategy for ResponseTimeBasedStrategy {
    fn target_interval(&self, inputs: &ThrottleInputs<'_>) -> Duration {
        let throttling = &inputs.config.adaptive_throttling;
        let base = throttling.base_interval;
        let max = throttling.max_interval;

        if inputs.avg_response_time > TARGET_RESPONSE_TIME {
            let factor =
                inputs.avg_response_time.as_secs_f64() / TARGET_RESPONSE_TIME.as_secs_f64();
            return base.mul_f64(factor).min(max);
        }

        base
    }
}

/// Weighted blend of the load-based and response-time strategies.
///
/// The result never drops below `base_interval`.
#[derive(Debug)]
pub struct BlendedStrategy {
    load: LoadBasedStrategy,
    response_time: ResponseTimeBasedStrategy,
    load_weight: f64,
    response_time_weight: f64,
}

impl BlendedStrategy {
    pub fn new(load_weight: f64, response_time_weight: f64) -> Self {
        Self {
            load: LoadBasedStrategy,
            response_time: ResponseTimeBasedStrategy,
            load_weight,
            response_time_weight,
        }
    }
}

impl Default for BlendedStrategy {
    fn default() -> Self {
        Self::new(0.7, 0.3)
    }
}

impl ThrottlingStrategy for BlendedStrategy {
    fn target_interval(&self, inputs: &ThrottleInputs<'_>) -> Duration {
        let load_interval = self.load.target_interval(inputs);
        let response_interval = self.response_time.target_interval(inputs);

        let blended = load_interval.mul_f64(self.load_weight)
            + response_interval.mul_f64(self.response_time_weight);

        blended.max(inputs.config.adaptive_throttling.base_interval)
    }
}
