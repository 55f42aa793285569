//! Rate key generation and handling.

use crate::error::{Result, TurnstileError};

/// A key that uniquely identifies a rate-tracked identity.
///
/// The key is composed of the tenant, the client within that tenant, and
/// the action class being limited. Two requests with the same key share a
/// sliding-window log.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateKey {
    /// Top-level traffic namespace (organization, account)
    pub tenant_id: String,
    /// Identity within the tenant (user, API key, device)
    pub client_id: String,
    /// Operation class being rate-limited (login, send_message, ...)
    pub action_type: String,
}

impl RateKey {
    /// Create a new rate key, rejecting empty or whitespace-only identifiers.
    pub fn new(tenant_id: &str, client_id: &str, action_type: &str) -> Result<Self> {
        for (value, name) in [
            (tenant_id, "tenant_id"),
            (client_id, "client_id"),
            (action_type, "action_type"),
        ] {
            if value.trim().is_empty() {
                return Err(TurnstileError::InvalidInput(format!(
                    "{} cannot be empty",
                    name
                )));
            }
        }

        Ok(Self {
            tenant_id: tenant_id.to_string(),
            client_id: client_id.to_string(),
            action_type: action_type.to_string(),
        })
    }
}

impl std::fmt::Display for RateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.tenant_id, self.client_id, self.action_type
        )
    }
}
