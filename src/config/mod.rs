//! Configuration types, loading, validation and hot reload.

mod loader;
mod types;
mod watcher;

pub use types::{
    AdaptiveThrottlingConfig, CircuitBreakerConfig, ClassificationConfig, Config,
    HotReloadConfig, PrioritySettings, QosConfig, RegexRouteConfig, SchedulerConfig,
    SystemLimits, TenantConfig, TimeoutConfig, UserBehaviorConfig,
};
pub use watcher::{ConfigEvent, ConfigWatcher};
