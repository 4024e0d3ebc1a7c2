//! Tenant routing table.
//!
//! Maps `host + path` route keys to tenant entries and selects forward
//! destinations by matching compiled regex rules against the extracted
//! message text. The table is rebuilt on config reload and swapped
//! atomically; in-flight handlers keep using their snapshot.

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;
use tracing::warn;

use crate::config::TenantConfig;

/// A compiled content-routing rule.
#[derive(Debug)]
pub struct RegexRule {
    /// Original pattern, kept for logging
    pub pattern: String,
    /// Compiled pattern; None if the pattern failed to compile
    regex: Option<Regex>,
    /// Destination URLs (preferred when non-empty)
    pub urls: Vec<String>,
    /// Destination endpoints (used when urls is empty)
    pub endpoints: Vec<String>,
}

impl RegexRule {
    fn matches(&self, message: &str) -> bool {
        match &self.regex {
            Some(regex) => regex.is_match(message),
            // An invalid pattern never matches; it was logged at compile time
            None => false,
        }
    }
}

/// One tenant webhook entry with compiled routing rules.
#[derive(Debug)]
pub struct TenantRoute {
    /// Route key (host + path)
    pub route: String,
    /// Shared secret for signature verification and challenges
    pub secret: String,
    /// Default forward destinations
    pub forward_to: Vec<String>,
    /// Content-routing rules in insertion order
    pub rules: Vec<RegexRule>,
}

impl TenantRoute {
    /// Select forward destinations for a message.
    ///
    /// Rules are evaluated in insertion order; the first matching rule with
    /// any targets wins. Falls back to the tenant's default destinations.
    pub fn select_destinations(&self, message: &str) -> &[String] {
        for rule in &self.rules {
            if rule.matches(message) {
                if !rule.urls.is_empty() {
                    return &rule.urls;
                }
                if !rule.endpoints.is_empty() {
                    return &rule.endpoints;
                }
            }
        }

        &self.forward_to
    }
}

/// Lookup table over all configured tenants.
#[derive(Debug, Default)]
pub struct TenantTable {
    routes: HashMap<String, Arc<TenantRoute>>,
}

impl TenantTable {
    /// Build the table from configuration, compiling regex rules.
    ///
    /// Invalid patterns are logged and kept as never-matching rules so later
    /// rules still apply.
    pub fn from_config(tenants: &[TenantConfig]) -> Self {
        let mut routes = HashMap::with_capacity(tenants.len());

        for tenant in tenants {
            let rules = tenant
                .regex_routes
                .iter()
                .map(|rule| {
                    let regex = match Regex::new(&rule.pattern) {
                        Ok(regex) => Some(regex),
                        Err(e) => {
                            warn!(
                                route = %tenant.route,
                                pattern = %rule.pattern,
                                error = %e,
                                "invalid regex pattern, rule disabled"
                            );
                            None
                        }
                    };
                    RegexRule {
                        pattern: rule.pattern.clone(),
                        regex,
                        urls: rule.urls.clone(),
                        endpoints: rule.endpoints.clone(),
                    }
                })
                .collect();

            routes.insert(
                tenant.route.clone(),
                Arc::new(TenantRoute {
                    route: tenant.route.clone(),
                    secret: tenant.secret.clone(),
                    forward_to: tenant.forward_to.clone(),
                    rules,
                }),
            );
        }

        Self { routes }
    }

    /// Look up a tenant by request host and path.
    ///
    /// Tries the exact `host + path` key, then `"https://" + host + path`.
    /// The host is used as received, port included.
    pub fn lookup(&self, host: &str, path: &str) -> Option<Arc<TenantRoute>> {
        let key = format!("{host}{path}");
        if let Some(route) = self.routes.get(&key) {
            return Some(route.clone());
        }

        let key = format!("https://{host}{path}");
        self.routes.get(&key).cloned()
    }

    /// Number of configured tenants.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Check if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
