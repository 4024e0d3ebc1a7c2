//! Priority computation and message classification.
//!
//! Priorities start from the configured base and move through a fixed
//! pipeline: load adjustment, burst penalty against the inter-arrival
//! baseline, message classification, fast-user bonus, clamp. The pipeline is
//! pluggable behind [`PriorityStrategy`] so alternative policies can be
//! wired without touching the scheduler.

use std::time::Duration;

use md5::{Digest, Md5};

use crate::config::{Config, SchedulerConfig};

/// Inputs to a priority strategy: a snapshot of the observed state plus the
/// per-user inter-arrival delta computed by the scheduler.
#[derive(Debug, Clone, Copy)]
pub struct PriorityContext<'a> {
    /// Current in-flight load
    pub current_load: i64,
    /// P50 inter-arrival baseline; zero disables the burst penalty
    pub baseline_p50: Duration,
    /// Time since this user's previous request, if any
    pub since_last: Option<Duration>,
    /// Configuration in effect
    pub config: &'a Config,
}

/// Strategy for computing a request priority.
pub trait PriorityStrategy: Send + Sync {
    fn priority(&self, user_id: &str, message: &str, ctx: &PriorityContext<'_>) -> i32;
}

/// Default pipeline: load, burst penalty, classification, user bonus, clamp.
#[derive(Debug, Default)]
pub struct BehaviorPriorityStrategy;

impl PriorityStrategy for BehaviorPriorityStrategy {
    fn priority(&self, user_id: &str, message: &str, ctx: &PriorityContext<'_>) -> i32 {
        let scheduler = &ctx.config.scheduler;
        let settings = &scheduler.priority;
        let mut priority = settings.base;

        // Load adjustment
        let max_load = ctx.config.qos.system_limits.max_load;
        if ctx.current_load > max_load {
            priority += settings.high_load_adjustment;
        } else if ctx.current_load < max_load / 10 {
            priority += settings.low_load_adjustment;
        }

        // Burst penalty against the inter-arrival baseline. A cold baseline
        // (zero) disables the branch entirely.
        if scheduler.user_behavior.enabled {
            if let Some(delta) = ctx.since_last {
                let baseline = ctx.baseline_p50;
                if baseline > Duration::ZERO {
                    if delta < baseline / 3 {
                        priority -= 2 * settings.high_load_adjustment.abs();
                    } else if delta < baseline / 2 {
                        priority -= settings.high_load_adjustment.abs();
                    }
                }
            }
        }

        // Classification pins spam to the floor; the fast-user bonus must
        // not lift it back out
        if scheduler.classification.enabled {
            if is_spam(message, &scheduler.classification.spam_keywords) {
                return settings.min;
            }
            if is_high_priority(message, &scheduler.classification.priority_keywords) {
                priority = settings.max;
            }
        }

        if is_fast_user(user_id) {
            priority += settings.fast_user_bonus;
        }

        clamp(priority, settings.min, settings.max)
    }
}

/// Pre-admission priority: classification and user bonus only.
///
/// Used by the handler before the admission decision, where load and
/// inter-arrival factors are not yet known.
pub fn message_priority(user_id: &str, message: &str, scheduler: &SchedulerConfig) -> i32 {
    let settings = &scheduler.priority;
    let mut priority = settings.base;

    if scheduler.classification.enabled {
        if is_spam(message, &scheduler.classification.spam_keywords) {
            return settings.min;
        }
        if is_high_priority(message, &scheduler.classification.priority_keywords) {
            priority = settings.max;
        }
    }

    if is_fast_user(user_id) {
        priority += settings.fast_user_bonus;
    }

    clamp(priority, settings.min, settings.max)
}

/// Detect spam: keyword substring match or excessive character repetition.
pub fn is_spam(message: &str, keywords: &[String]) -> bool {
    let lowered = message.to_lowercase();
    if keywords
        .iter()
        .any(|keyword| lowered.contains(&keyword.to_lowercase()))
    {
        return true;
    }

    // Messages dominated by consecutive repeated characters
    let bytes = message.as_bytes();
    if bytes.len() > 10 {
        let repeated = bytes.windows(2).filter(|pair| pair[0] == pair[1]).count();
        if repeated as f64 / bytes.len() as f64 > 0.7 {
            return true;
        }
    }

    false
}

/// Detect high-priority messages by keyword substring match.
pub fn is_high_priority(message: &str, keywords: &[String]) -> bool {
    let lowered = message.to_lowercase();
    keywords
        .iter()
        .any(|keyword| lowered.contains(&keyword.to_lowercase()))
}

/// Deterministic fast-user classification: first MD5 byte of the user id,
/// modulo 4.
pub fn is_fast_user(user_id: &str) -> bool {
    let digest = Md5::digest(user_id.as_bytes());
    digest[0] % 4 == 0
}

fn clamp(priority: i32, min: i32, max: i32) -> i32 {
    priority.clamp(min, max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn config() -> Config {
        Config::from_yaml(
            r#"
tenants:
  - route: bot.example.com/webhook
    secret: abcd
"#,
        )
        .unwrap()
    }

    fn ctx(config: &Config) -> PriorityContext<'_> {
        PriorityContext {
            current_load: 50,
            baseline_p50: Duration::ZERO,
            since_last: None,
            config,
        }
    }

    /// Find a user id on the requested side of the fast-user hash.
    fn user_with_fast(fast: bool) -> String {
        for i in 0..1000 {
            let candidate = format!("user-{i}");
            if is_fast_user(&candidate) == fast {
                return candidate;
            }
        }
        unreachable!("hash classification covers both classes in 1000 ids");
    }

    #[test]
    fn test_spam_keyword_detection() {
        let keywords = vec!["spam".to_string(), "promotion".to_string()];
        assert!(is_spam("Great PROMOTION here", &keywords));
        assert!(!is_spam("hello world", &keywords));
    }

    #[test]
    fn test_spam_repetition_detection() {
        let keywords = Vec::new();
        assert!(is_spam("aaaaaaaaaaaaaaaa", &keywords));
        // Short messages are exempt from the repetition check
        assert!(!is_spam("aaaa", &keywords));
        assert!(!is_spam("a normal sentence", &keywords));
    }

    #[test]
    fn test_high_priority_keyword_detection() {
        let keywords = vec!["urgent".to_string()];
        assert!(is_high_priority("URGENT: prod down", &keywords));
        assert!(!is_high_priority("all calm", &keywords));
    }

    #[test]
    fn test_fast_user_is_deterministic() {
        let user = user_with_fast(true);
        assert_eq!(is_fast_user(&user), is_fast_user(&user));
    }

    #[test]
    fn test_priority_within_bounds() {
        let config = config();
        let strategy = BehaviorPriorityStrategy;

        for user in ["u1", "u2", "u3", "burst"] {
            for message in ["hello", "urgent help", "spam spam spam", "aaaaaaaaaaaaa"] {
                let p = strategy.priority(user, message, &ctx(&config));
                assert!(p >= config.scheduler.priority.min);
                assert!(p <= config.scheduler.priority.max);
            }
        }
    }

    #[test]
    fn test_spam_pins_to_min_even_for_fast_user() {
        let config = config();
        let strategy = BehaviorPriorityStrategy;
        let fast = user_with_fast(true);

        let p = strategy.priority(&fast, "buy this promotion", &ctx(&config));
        assert_eq!(p, config.scheduler.priority.min);
    }

    #[test]
    fn test_priority_keyword_hits_max_under_high_load() {
        let config = config();
        let strategy = BehaviorPriorityStrategy;
        let slow = user_with_fast(false);

        let mut c = ctx(&config);
        c.current_load = 500; // far over max_load
        let p = strategy.priority(&slow, "urgent: need help", &c);
        assert_eq!(p, config.scheduler.priority.max);
    }

    #[test]
    fn test_load_adjustments() {
        let mut config = config();
        config.scheduler.classification.enabled = false;
        let strategy = BehaviorPriorityStrategy;
        let slow = user_with_fast(false);

        let mut c = ctx(&config);
        c.current_load = 500;
        assert_eq!(strategy.priority(&slow, "hi", &c), 3); // 5 - 2

        c.current_load = 5;
        assert_eq!(strategy.priority(&slow, "hi", &c), 6); // 5 + 1

        c.current_load = 50;
        assert_eq!(strategy.priority(&slow, "hi", &c), 5);
    }

    #[test]
    fn test_burst_penalty_branches() {
        let mut config = config();
        config.scheduler.classification.enabled = false;
        let strategy = BehaviorPriorityStrategy;
        let slow = user_with_fast(false);

        let mut c = ctx(&config);
        c.baseline_p50 = Duration::from_millis(300);

        // Inside a third of the baseline: double penalty
        c.since_last = Some(Duration::from_millis(50));
        assert_eq!(strategy.priority(&slow, "hi", &c), 1); // 5 - 4

        // Between a third and a half: single penalty
        c.since_last = Some(Duration::from_millis(120));
        assert_eq!(strategy.priority(&slow, "hi", &c), 3); // 5 - 2

        // Slower than half the baseline: no penalty
        c.since_last = Some(Duration::from_millis(200));
        assert_eq!(strategy.priority(&slow, "hi", &c), 5);
    }

    #[test]
    fn test_cold_baseline_disables_burst_penalty() {
        let mut config = config();
        config.scheduler.classification.enabled = false;
        let strategy = BehaviorPriorityStrategy;
        let slow = user_with_fast(false);

        let mut c = ctx(&config);
        c.baseline_p50 = Duration::ZERO;
        c.since_last = Some(Duration::from_millis(1));
        assert_eq!(strategy.priority(&slow, "hi", &c), 5);
    }

    #[test]
    fn test_fast_user_bonus_applied() {
        let mut config = config();
        config.scheduler.classification.enabled = false;
        let strategy = BehaviorPriorityStrategy;
        let fast = user_with_fast(true);

        assert_eq!(strategy.priority(&fast, "hi", &ctx(&config)), 7); // 5 + 2
    }

    #[test]
    fn test_message_priority_pre_admission() {
        let config = config();
        let slow = user_with_fast(false);
        let fast = user_with_fast(true);

        assert_eq!(
            message_priority(&slow, "hello", &config.scheduler),
            config.scheduler.priority.base
        );
        assert_eq!(
            message_priority(&slow, "urgent", &config.scheduler),
            config.scheduler.priority.max
        );
        assert_eq!(
            message_priority(&fast, "spam offer", &config.scheduler),
            config.scheduler.priority.min
        );
        assert_eq!(
            message_priority(&fast, "hello", &config.scheduler),
            config.scheduler.priority.base + config.scheduler.priority.fast_user_bonus
        );
    }
}
