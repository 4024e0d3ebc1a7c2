use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Root configuration for botrouterd
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit structured JSON logs
    #[serde(default)]
    pub json_logs: bool,

    /// Webhook listen address
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Configuration hot reload
    #[serde(default)]
    pub hot_reload: HotReloadConfig,

    /// Tenant webhook routes
    #[serde(default)]
    pub tenants: Vec<TenantConfig>,

    /// Scheduler configuration (workers, priorities, classification)
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// QoS configuration (circuit breaker, throttling, limits, timeouts)
    #[serde(default)]
    pub qos: QosConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_listen() -> SocketAddr {
    "0.0.0.0:8443".parse().unwrap()
}

fn default_true() -> bool {
    true
}

/// Hot reload configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotReloadConfig {
    /// Watch the config file and apply changes without restart
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for HotReloadConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// One tenant webhook entry.
///
/// The route key is the host plus path exactly as seen by the server
/// (including any port), e.g. `bot.example.com/webhook`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantConfig {
    /// Route key (host + path)
    pub route: String,

    /// Shared secret used for signature verification and challenges
    pub secret: String,

    /// Default forward destinations
    #[serde(default)]
    pub forward_to: Vec<String>,

    /// Content-based routing rules, evaluated in order
    #[serde(default)]
    pub regex_routes: Vec<RegexRouteConfig>,
}

/// A content-based routing rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegexRouteConfig {
    /// Pattern matched against the extracted message text
    pub pattern: String,

    /// Destination URLs (preferred when non-empty)
    #[serde(default)]
    pub urls: Vec<String>,

    /// Destination endpoints (used when urls is empty)
    #[serde(default)]
    pub endpoints: Vec<String>,
}

/// Scheduler configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Number of scheduler workers (0 = num_cpus)
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,

    /// Maximum queued requests; submissions over the cap are rejected
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Priority computation settings
    #[serde(default)]
    pub priority: PrioritySettings,

    /// Message classification settings
    #[serde(default)]
    pub classification: ClassificationConfig,

    /// User behavior analysis settings
    #[serde(default)]
    pub user_behavior: UserBehaviorConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: default_worker_pool_size(),
            max_queue_size: default_max_queue_size(),
            priority: PrioritySettings::default(),
            classification: ClassificationConfig::default(),
            user_behavior: UserBehaviorConfig::default(),
        }
    }
}

fn default_worker_pool_size() -> usize {
    10
}

fn default_max_queue_size() -> usize {
    10_000
}

/// Priority deltas and clamp range
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrioritySettings {
    /// Starting priority
    #[serde(default = "default_base_priority")]
    pub base: i32,

    /// Lower clamp bound
    #[serde(default = "default_min_priority")]
    pub min: i32,

    /// Upper clamp bound
    #[serde(default = "default_max_priority")]
    pub max: i32,

    /// Delta applied under high load (negative)
    #[serde(default = "default_high_load_adjustment")]
    pub high_load_adjustment: i32,

    /// Delta applied under low load
    #[serde(default = "default_low_load_adjustment")]
    pub low_load_adjustment: i32,

    /// Bonus for users classified as fast
    #[serde(default = "default_fast_user_bonus")]
    pub fast_user_bonus: i32,
}

impl Default for PrioritySettings {
    fn default() -> Self {
        Self {
            base: default_base_priority(),
            min: default_min_priority(),
            max: default_max_priority(),
            high_load_adjustment: default_high_load_adjustment(),
            low_load_adjustment: default_low_load_adjustment(),
            fast_user_bonus: default_fast_user_bonus(),
        }
    }
}

fn default_base_priority() -> i32 {
    5
}

fn default_min_priority() -> i32 {
    1
}

fn default_max_priority() -> i32 {
    10
}

fn default_high_load_adjustment() -> i32 {
    -2
}

fn default_low_load_adjustment() -> i32 {
    1
}

fn default_fast_user_bonus() -> i32 {
    2
}

/// Message classification configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationConfig {
    /// Enable spam/priority keyword classification
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Substrings that classify a message as spam (case-insensitive)
    #[serde(default = "default_spam_keywords")]
    pub spam_keywords: Vec<String>,

    /// Substrings that classify a message as high priority (case-insensitive)
    #[serde(default = "default_priority_keywords")]
    pub priority_keywords: Vec<String>,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            spam_keywords: default_spam_keywords(),
            priority_keywords: default_priority_keywords(),
        }
    }
}

fn default_spam_keywords() -> Vec<String> {
    ["spam", "advertisement", "promotion"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_priority_keywords() -> Vec<String> {
    ["urgent", "important", "help", "error", "issue"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// User behavior analysis configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserBehaviorConfig {
    /// Enable inter-arrival tracking and the burst penalty
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Minimum samples before baselines are published
    #[serde(default = "default_min_data_points")]
    pub min_data_points_for_baseline: usize,
}

impl Default for UserBehaviorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_data_points_for_baseline: default_min_data_points(),
        }
    }
}

fn default_min_data_points() -> usize {
    100
}

/// QoS configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct QosConfig {
    /// Circuit breaker settings
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    /// Adaptive throttling settings
    #[serde(default)]
    pub adaptive_throttling: AdaptiveThrottlingConfig,

    /// System load limits and ratios
    #[serde(default)]
    pub system_limits: SystemLimits,

    /// Request processing timeouts
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Enable the circuit breaker
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Consecutive failures before the circuit opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Time the circuit stays open before a recovery probe
    #[serde(default = "default_recovery_timeout", with = "humantime_serde")]
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: default_failure_threshold(),
            recovery_timeout: default_recovery_timeout(),
        }
    }
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_recovery_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Adaptive throttling configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdaptiveThrottlingConfig {
    /// Enable adaptive throttling
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Interval mapped to throttle level 0.0
    #[serde(default = "default_base_interval", with = "humantime_serde")]
    pub base_interval: Duration,

    /// Interval mapped to throttle level 1.0
    #[serde(default = "default_max_interval", with = "humantime_serde")]
    pub max_interval: Duration,
}

impl Default for AdaptiveThrottlingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_interval: default_base_interval(),
            max_interval: default_max_interval(),
        }
    }
}

fn default_base_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_max_interval() -> Duration {
    Duration::from_secs(2)
}

/// System load limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemLimits {
    /// Load (in-flight forwards) considered saturated
    #[serde(default = "default_max_load")]
    pub max_load: i64,

    /// Load ratio above which throttling intensifies
    #[serde(default = "default_high_load_threshold")]
    pub high_load_threshold: f64,

    /// Load ratio below which the system is considered idle
    #[serde(default = "default_low_load_threshold")]
    pub low_load_threshold: f64,

    /// Observed-load ratio at which the load-based strategy starts scaling
    #[serde(default = "default_load_threshold")]
    pub load_threshold: f64,

    /// Latency considered saturated when computing the observed-load ratio
    #[serde(default = "default_latency_threshold", with = "humantime_serde")]
    pub latency_threshold: Duration,

    /// Minimum time between throttle level adjustments
    #[serde(default = "default_adjustment_interval", with = "humantime_serde")]
    pub adjustment_interval: Duration,
}

impl Default for SystemLimits {
    fn default() -> Self {
        Self {
            max_load: default_max_load(),
            high_load_threshold: default_high_load_threshold(),
            low_load_threshold: default_low_load_threshold(),
            load_threshold: default_load_threshold(),
            latency_threshold: default_latency_threshold(),
            adjustment_interval: default_adjustment_interval(),
        }
    }
}

fn default_max_load() -> i64 {
    100
}

fn default_high_load_threshold() -> f64 {
    0.8
}

fn default_low_load_threshold() -> f64 {
    0.3
}

fn default_load_threshold() -> f64 {
    0.8
}

fn default_latency_threshold() -> Duration {
    Duration::from_secs(1)
}

fn default_adjustment_interval() -> Duration {
    Duration::from_secs(5)
}

/// Request timeouts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Overall deadline for processing one dispatched request
    #[serde(default = "default_processing_timeout", with = "humantime_serde")]
    pub processing_timeout: Duration,

    /// Per-destination forward timeout
    #[serde(default = "default_forward_timeout", with = "humantime_serde")]
    pub forward_timeout: Duration,

    /// Worker poll interval when the queue is empty
    #[serde(default = "default_idle_check_interval", with = "humantime_serde")]
    pub idle_check_interval: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            processing_timeout: default_processing_timeout(),
            forward_timeout: default_forward_timeout(),
            idle_check_interval: default_idle_check_interval(),
        }
    }
}

fn default_processing_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_forward_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_idle_check_interval() -> Duration {
    Duration::from_millis(10)
}

/// Humantime serde support module
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        humantime::format_duration(*duration).to_string().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_priority_settings() {
        let p = PrioritySettings::default();
        assert_eq!(p.base, 5);
        assert_eq!(p.min, 1);
        assert_eq!(p.max, 10);
        assert_eq!(p.high_load_adjustment, -2);
        assert_eq!(p.low_load_adjustment, 1);
        assert_eq!(p.fast_user_bonus, 2);
    }

    #[test]
    fn test_default_circuit_breaker() {
        let cb = CircuitBreakerConfig::default();
        assert!(cb.enabled);
        assert_eq!(cb.failure_threshold, 5);
        assert_eq!(cb.recovery_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_default_throttling() {
        let at = AdaptiveThrottlingConfig::default();
        assert!(at.enabled);
        assert_eq!(at.base_interval, Duration::from_millis(100));
        assert_eq!(at.max_interval, Duration::from_secs(2));
    }

    #[test]
    fn test_default_timeouts() {
        let t = TimeoutConfig::default();
        assert_eq!(t.processing_timeout, Duration::from_secs(15));
        assert_eq!(t.forward_timeout, Duration::from_secs(10));
        assert_eq!(t.idle_check_interval, Duration::from_millis(10));
    }

    #[test]
    fn test_duration_fields_parse_humantime() {
        let yaml = r#"
circuit_breaker:
  recovery_timeout: 1m
adaptive_throttling:
  base_interval: 50ms
  max_interval: 3s
"#;
        let qos: QosConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(qos.circuit_breaker.recovery_timeout, Duration::from_secs(60));
        assert_eq!(qos.adaptive_throttling.base_interval, Duration::from_millis(50));
        assert_eq!(qos.adaptive_throttling.max_interval, Duration::from_secs(3));
    }

    #[test]
    fn test_tenant_defaults() {
        let yaml = r#"
route: bot.example.com/webhook
secret: abcd
"#;
        let tenant: TenantConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(tenant.forward_to.is_empty());
        assert!(tenant.regex_routes.is_empty());
    }
}
