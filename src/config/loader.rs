use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use super::types::Config;

impl Config {
    /// Load configuration from a YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        debug!(path = %path.display(), "loading configuration");

        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        Self::from_yaml(&contents)
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)
            .context("failed to parse YAML configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        // Ensure at least one tenant is defined
        if self.tenants.is_empty() {
            anyhow::bail!("at least one tenant must be defined");
        }

        // Validate tenant route keys are non-empty and unique
        let mut route_keys = std::collections::HashSet::new();
        for tenant in &self.tenants {
            if tenant.route.is_empty() {
                anyhow::bail!("tenant route key must not be empty");
            }
            if tenant.secret.is_empty() {
                anyhow::bail!("tenant '{}' must have a non-empty secret", tenant.route);
            }
            if !route_keys.insert(&tenant.route) {
                anyhow::bail!("duplicate tenant route: {}", tenant.route);
            }
        }

        // Validate priority range
        let p = &self.scheduler.priority;
        if p.min > p.max {
            anyhow::bail!("min_priority ({}) must not exceed max_priority ({})", p.min, p.max);
        }
        if p.base < p.min || p.base > p.max {
            anyhow::bail!(
                "base_priority ({}) must lie within [{}, {}]",
                p.base,
                p.min,
                p.max
            );
        }

        // Validate throttling interval range
        let at = &self.qos.adaptive_throttling;
        if at.base_interval > at.max_interval {
            anyhow::bail!("adaptive_throttling base_interval must not exceed max_interval");
        }

        if self.qos.system_limits.max_load <= 0 {
            anyhow::bail!("system_limits max_load must be positive");
        }

        info!("configuration validated successfully");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config() {
        let yaml = r#"
tenants:
  - route: bot.example.com/webhook
    secret: abcd
    forward_to:
      - "http://127.0.0.1:9001/events"
"#;

        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.tenants.len(), 1);
        assert_eq!(config.scheduler.worker_pool_size, 10);
        assert_eq!(config.qos.system_limits.max_load, 100);
    }

    #[test]
    fn test_regex_route_config() {
        let yaml = r#"
tenants:
  - route: bot.example.com/webhook
    secret: abcd
    forward_to:
      - "http://b"
    regex_routes:
      - pattern: "^#help"
        urls:
          - "http://a/help"
"#;

        let config = Config::from_yaml(yaml).unwrap();
        let tenant = &config.tenants[0];
        assert_eq!(tenant.regex_routes.len(), 1);
        assert_eq!(tenant.regex_routes[0].pattern, "^#help");
        assert_eq!(tenant.regex_routes[0].urls, vec!["http://a/help"]);
    }

    #[test]
    fn test_no_tenants() {
        let result = Config::from_yaml("tenants: []");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("at least one tenant"));
    }

    #[test]
    fn test_duplicate_route() {
        let yaml = r#"
tenants:
  - route: bot.example.com/webhook
    secret: a
  - route: bot.example.com/webhook
    secret: b
"#;
        let result = Config::from_yaml(yaml);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("duplicate tenant route"));
    }

    #[test]
    fn test_empty_secret_rejected() {
        let yaml = r#"
tenants:
  - route: bot.example.com/webhook
    secret: ""
"#;
        let result = Config::from_yaml(yaml);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("non-empty secret"));
    }

    #[test]
    fn test_invalid_priority_range() {
        let yaml = r#"
tenants:
  - route: bot.example.com/webhook
    secret: abcd
scheduler:
  priority:
    base: 20
    min: 1
    max: 10
"#;
        let result = Config::from_yaml(yaml);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("base_priority"));
    }

    #[test]
    fn test_invalid_throttle_intervals() {
        let yaml = r#"
tenants:
  - route: bot.example.com/webhook
    secret: abcd
qos:
  adaptive_throttling:
    base_interval: 5s
    max_interval: 1s
"#;
        let result = Config::from_yaml(yaml);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("base_interval"));
    }
}
