//! Quota configuration store and precedence resolution.

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, TurnstileError};

use super::quota::Quota;

/// Global load-management parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalLimits {
    /// Maximum requests processed concurrently across all tenants
    pub max_global_concurrent: usize,
    /// Maximum waiting requests per tenant queue
    pub max_tenant_queue_size: usize,
}

impl Default for GlobalLimits {
    fn default() -> Self {
        Self {
            max_global_concurrent: 100,
            max_tenant_queue_size: 50,
        }
    }
}

impl GlobalLimits {
    fn validate(&self) -> Result<()> {
        if self.max_global_concurrent == 0 {
            return Err(TurnstileError::InvalidConfig(
                "max_global_concurrent must be positive".to_string(),
            ));
        }
        if self.max_tenant_queue_size == 0 {
            return Err(TurnstileError::InvalidConfig(
                "max_tenant_queue_size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Serializable view of a quota, used in snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QuotaView {
    pub max_requests: u32,
    pub window_duration_seconds: f64,
}

impl From<Quota> for QuotaView {
    fn from(quota: Quota) -> Self {
        Self {
            max_requests: quota.max_requests(),
            window_duration_seconds: quota.window_seconds(),
        }
    }
}

/// Snapshot of one tenant's configured limits.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TenantSnapshot {
    /// action_type -> quota
    pub action_limits: BTreeMap<String, QuotaView>,
    /// client_id -> action_type -> quota
    pub client_limits: BTreeMap<String, BTreeMap<String, QuotaView>>,
}

/// Structured read-back of the full store contents.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigSnapshot {
    pub global: GlobalLimits,
    pub tenants: BTreeMap<String, TenantSnapshot>,
}

#[derive(Default)]
struct StoreState {
    global: GlobalLimits,
    /// (tenant_id, action_type) -> quota
    action_limits: HashMap<(String, String), Quota>,
    /// (tenant_id, client_id, action_type) -> quota
    client_limits: HashMap<(String, String, String), Quota>,
}

/// Thread-safe store of global limits, per-tenant-action limits, and
/// per-tenant-client-action overrides.
///
/// Resolution precedence is whole-quota replacement: a client override
/// shadows an action limit, which shadows a caller-supplied fallback.
/// Writes are last-write-wins. The store's lock is independent of the
/// load-manager and window locks and is never held across calls into
/// either.
pub struct ConfigStore {
    state: RwLock<StoreState>,
}

impl ConfigStore {
    /// Create a store with default global limits.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
        }
    }

    /// Create a store with explicit global limits.
    pub fn with_global(global: GlobalLimits) -> Result<Self> {
        global.validate()?;
        Ok(Self {
            state: RwLock::new(StoreState {
                global,
                ..StoreState::default()
            }),
        })
    }

    /// Replace the global load limits.
    ///
    /// Takes effect on the next admission decision; the in-flight set is
    /// never retroactively shrunk.
    pub fn set_global(&self, global: GlobalLimits) -> Result<()> {
        global.validate()?;
        self.state.write().global = global;
        info!(
            max_global_concurrent = global.max_global_concurrent,
            max_tenant_queue_size = global.max_tenant_queue_size,
            "Global limits updated"
        );
        Ok(())
    }

    /// Current global load limits.
    pub fn global_limits(&self) -> GlobalLimits {
        self.state.read().global
    }

    /// Set the quota for every client of `tenant` performing `action`.
    pub fn set_action_limit(&self, tenant: &str, action: &str, quota: Quota) {
        self.state
            .write()
            .action_limits
            .insert((tenant.to_string(), action.to_string()), quota);
        debug!(tenant = %tenant, action = %action, quota = %quota, "Action limit set");
    }

    /// Remove an action limit. Removing an absent entry is a silent success.
    pub fn remove_action_limit(&self, tenant: &str, action: &str) {
        self.state
            .write()
            .action_limits
            .remove(&(tenant.to_string(), action.to_string()));
        debug!(tenant = %tenant, action = %action, "Action limit removed");
    }

    /// Set a client-specific quota that shadows the tenant's action limit.
    pub fn set_client_limit(&self, tenant: &str, client: &str, action: &str, quota: Quota) {
        self.state.write().client_limits.insert(
            (tenant.to_string(), client.to_string(), action.to_string()),
            quota,
        );
        debug!(
            tenant = %tenant,
            client = %client,
            action = %action,
            quota = %quota,
            "Client limit set"
        );
    }

    /// Remove a client override. Removing an absent entry is a silent success.
    pub fn remove_client_limit(&self, tenant: &str, client: &str, action: &str) {
        self.state.write().client_limits.remove(&(
            tenant.to_string(),
            client.to_string(),
            action.to_string(),
        ));
        debug!(tenant = %tenant, client = %client, action = %action, "Client limit removed");
    }

    /// Resolve the effective quota for a lookup, first hit wins:
    /// client override, then action limit, then the caller's fallback.
    pub fn resolve(
        &self,
        tenant: &str,
        client: &str,
        action: &str,
        fallback: Option<Quota>,
    ) -> Result<Quota> {
        let state = self.state.read();

        if let Some(quota) = state.client_limits.get(&(
            tenant.to_string(),
            client.to_string(),
            action.to_string(),
        )) {
            return Ok(*quota);
        }

        if let Some(quota) = state
            .action_limits
            .get(&(tenant.to_string(), action.to_string()))
        {
            return Ok(*quota);
        }

        fallback.ok_or(TurnstileError::NoQuota)
    }

    /// Structured view of the store for administrative read-back.
    pub fn snapshot(&self) -> ConfigSnapshot {
        let state = self.state.read();
        let mut tenants: BTreeMap<String, TenantSnapshot> = BTreeMap::new();

        for ((tenant, action), quota) in &state.action_limits {
            tenants
                .entry(tenant.clone())
                .or_default()
                .action_limits
                .insert(action.clone(), (*quota).into());
        }

        for ((tenant, client, action), quota) in &state.client_limits {
            tenants
                .entry(tenant.clone())
                .or_default()
                .client_limits
                .entry(client.clone())
                .or_default()
                .insert(action.clone(), (*quota).into());
        }

        ConfigSnapshot {
            global: state.global,
            tenants,
        }
    }

    /// Snapshot of a single tenant's limits.
    pub fn tenant_snapshot(&self, tenant: &str) -> TenantSnapshot {
        let state = self.state.read();
        let mut snapshot = TenantSnapshot::default();

        for ((t, action), quota) in &state.action_limits {
            if t == tenant {
                snapshot
                    .action_limits
                    .insert(action.clone(), (*quota).into());
            }
        }

        for ((t, client, action), quota) in &state.client_limits {
            if t == tenant {
                snapshot
                    .client_limits
                    .entry(client.clone())
                    .or_default()
                    .insert(action.clone(), (*quota).into());
            }
        }

        snapshot
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quota(max: u32, window: f64) -> Quota {
        Quota::new(max, window).unwrap()
    }

    #[test]
    fn test_resolve_falls_back_when_unconfigured() {
        let store = ConfigStore::new();

        let fallback = quota(10, 60.0);
        let resolved = store.resolve("t1", "c1", "login", Some(fallback)).unwrap();
        assert_eq!(resolved, fallback);

        let missing = store.resolve("t1", "c1", "login", None);
        assert!(matches!(missing, Err(TurnstileError::NoQuota)));
    }

    #[test]
    fn test_action_limit_shadows_fallback() {
        let store = ConfigStore::new();
        store.set_action_limit("t1", "login", quota(5, 60.0));

        let resolved = store
            .resolve("t1", "c1", "login", Some(quota(100, 1.0)))
            .unwrap();
        assert_eq!(resolved, quota(5, 60.0));

        // Other actions are unaffected.
        let other = store
            .resolve("t1", "c1", "upload", Some(quota(100, 1.0)))
            .unwrap();
        assert_eq!(other, quota(100, 1.0));
    }

    #[test]
    fn test_client_limit_shadows_action_limit() {
        let store = ConfigStore::new();
        store.set_action_limit("t1", "login", quota(5, 60.0));
        store.set_client_limit("t1", "c1", "login", quota(1, 60.0));

        // The override wins regardless of action limit or fallback.
        let overridden = store
            .resolve("t1", "c1", "login", Some(quota(100, 1.0)))
            .unwrap();
        assert_eq!(overridden, quota(1, 60.0));

        // Other clients still see the action limit.
        let other = store.resolve("t1", "c2", "login", None).unwrap();
        assert_eq!(other, quota(5, 60.0));
    }

    #[test]
    fn test_last_write_wins() {
        let store = ConfigStore::new();
        store.set_action_limit("t1", "login", quota(5, 60.0));
        store.set_action_limit("t1", "login", quota(7, 30.0));

        let resolved = store.resolve("t1", "c1", "login", None).unwrap();
        assert_eq!(resolved, quota(7, 30.0));
    }

    #[test]
    fn test_remove_limits() {
        let store = ConfigStore::new();
        store.set_action_limit("t1", "login", quota(5, 60.0));
        store.set_client_limit("t1", "c1", "login", quota(1, 60.0));

        store.remove_client_limit("t1", "c1", "login");
        let resolved = store.resolve("t1", "c1", "login", None).unwrap();
        assert_eq!(resolved, quota(5, 60.0));

        store.remove_action_limit("t1", "login");
        assert!(store.resolve("t1", "c1", "login", None).is_err());

        // Removing entries that do not exist is not an error.
        store.remove_action_limit("t1", "login");
        store.remove_client_limit("t9", "c9", "login");
    }

    #[test]
    fn test_global_limits_validation() {
        let store = ConfigStore::new();
        assert_eq!(store.global_limits(), GlobalLimits::default());

        let updated = GlobalLimits {
            max_global_concurrent: 2,
            max_tenant_queue_size: 4,
        };
        store.set_global(updated).unwrap();
        assert_eq!(store.global_limits(), updated);

        let invalid = GlobalLimits {
            max_global_concurrent: 0,
            max_tenant_queue_size: 4,
        };
        assert!(matches!(
            store.set_global(invalid),
            Err(TurnstileError::InvalidConfig(_))
        ));
        // The failed write left the previous values in place.
        assert_eq!(store.global_limits(), updated);
    }

    #[test]
    fn test_snapshot_shape() {
        let store = ConfigStore::new();
        store.set_action_limit("t1", "login", quota(5, 60.0));
        store.set_action_limit("t2", "upload", quota(2, 10.0));
        store.set_client_limit("t1", "c1", "login", quota(1, 60.0));

        let snapshot = store.snapshot();
        assert_eq!(snapshot.tenants.len(), 2);

        let t1 = &snapshot.tenants["t1"];
        assert_eq!(t1.action_limits["login"].max_requests, 5);
        assert_eq!(t1.client_limits["c1"]["login"].max_requests, 1);

        let t2 = store.tenant_snapshot("t2");
        assert_eq!(t2.action_limits["upload"].window_duration_seconds, 10.0);
        assert!(t2.client_limits.is_empty());
    }
}
