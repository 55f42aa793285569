//! Configuration management for Turnstile.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, TurnstileError};
use crate::ratelimit::{ConfigStore, GlobalLimits, Quota};

/// Main configuration for the Turnstile service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Load-management and quota-rule configuration
    #[serde(default)]
    pub limits: LimitsConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    "127.0.0.1:8080".parse().unwrap()
}

/// Load-management configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum requests processed concurrently across all tenants
    #[serde(default = "default_max_global_concurrent")]
    pub max_global_concurrent: usize,

    /// Maximum waiting requests per tenant queue
    #[serde(default = "default_max_tenant_queue_size")]
    pub max_tenant_queue_size: usize,

    /// Path to a quota-rules file applied to the config store at startup
    pub rules_path: Option<String>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_global_concurrent: default_max_global_concurrent(),
            max_tenant_queue_size: default_max_tenant_queue_size(),
            rules_path: None,
        }
    }
}

fn default_max_global_concurrent() -> usize {
    100
}

fn default_max_tenant_queue_size() -> usize {
    50
}

impl ServiceConfig {
    /// Load configuration from a file path.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: ServiceConfig = serde_yaml::from_str(&contents)
            .map_err(|e| TurnstileError::InvalidConfig(e.to_string()))?;
        Ok(config)
    }

    /// Global limits carried by this configuration.
    pub fn global_limits(&self) -> GlobalLimits {
        GlobalLimits {
            max_global_concurrent: self.limits.max_global_concurrent,
            max_tenant_queue_size: self.limits.max_tenant_queue_size,
        }
    }
}

/// A quota in configuration form, validated on conversion.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QuotaSpec {
    pub max_requests: u32,
    pub window_duration_seconds: f64,
}

impl QuotaSpec {
    fn to_quota(self, context: &str) -> Result<Quota> {
        Quota::new(self.max_requests, self.window_duration_seconds)
            .map_err(|e| TurnstileError::InvalidConfig(format!("{}: {}", context, e)))
    }
}

/// Per-tenant quota rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenantRules {
    /// action_type -> quota
    #[serde(default)]
    pub action_limits: BTreeMap<String, QuotaSpec>,
    /// client_id -> action_type -> quota
    #[serde(default)]
    pub client_limits: BTreeMap<String, BTreeMap<String, QuotaSpec>>,
}

/// A complete quota-rules document.
///
/// The shape matches the config store's snapshot, so a snapshot read-back
/// can serve as a rules file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuotaRules {
    /// Global load limits; absent sections keep the store's values
    #[serde(default)]
    pub global: Option<GlobalLimits>,

    /// tenant_id -> rules
    #[serde(default)]
    pub tenants: BTreeMap<String, TenantRules>,
}

impl QuotaRules {
    /// Load rules from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading quota rules");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse rules from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| TurnstileError::InvalidConfig(format!("Failed to parse quota rules: {}", e)))
    }

    /// Validate and write every rule into `store`.
    ///
    /// Rules are applied individually (last-write-wins); the first invalid
    /// quota aborts with `InvalidConfig`.
    pub fn apply(&self, store: &ConfigStore) -> Result<()> {
        if let Some(global) = self.global {
            store.set_global(global)?;
        }

        for (tenant, rules) in &self.tenants {
            for (action, spec) in &rules.action_limits {
                let quota = spec.to_quota(&format!("action limit {}/{}", tenant, action))?;
                store.set_action_limit(tenant, action, quota);
            }
            for (client, actions) in &rules.client_limits {
                for (action, spec) in actions {
                    let quota = spec
                        .to_quota(&format!("client limit {}/{}/{}", tenant, client, action))?;
                    store.set_client_limit(tenant, client, action, quota);
                }
            }
        }

        Ok(())
    }

    /// Number of individual quota rules in the document.
    pub fn rule_count(&self) -> usize {
        self.tenants
            .values()
            .map(|t| {
                t.action_limits.len()
                    + t.client_limits.values().map(BTreeMap::len).sum::<usize>()
            })
            .sum()
    }
}
