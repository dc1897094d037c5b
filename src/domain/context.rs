//! Operation Context
//!
//! Request-scoped metadata about the acting admin, passed explicitly into
//! every command handler for auditing and tracing.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use uuid::Uuid;

/// Context for an operation, used for auditing and tracing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationContext {
    /// Admin performing the operation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_id: Option<Uuid>,

    /// Admin display name (recorded as `approved_by` on decisions)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_name: Option<String>,

    /// Correlation ID for request tracing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,

    /// Client IP address
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<IpAddr>,
}

impl OperationContext {
    /// Create a new empty context
    pub fn new() -> Self {
        Self {
            admin_id: None,
            admin_name: None,
            correlation_id: None,
            client_ip: None,
        }
    }

    /// Create context with the acting admin
    pub fn with_admin(mut self, admin_id: Uuid, admin_name: impl Into<String>) -> Self {
        self.admin_id = Some(admin_id);
        self.admin_name = Some(admin_name.into());
        self
    }

    /// Create context with correlation ID
    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Create context with client IP
    pub fn with_client_ip(mut self, ip: IpAddr) -> Self {
        self.client_ip = Some(ip);
        self
    }

    /// Generate a new correlation ID if not present
    pub fn ensure_correlation_id(&mut self) -> Uuid {
        *self.correlation_id.get_or_insert_with(Uuid::new_v4)
    }

    /// Name recorded on processed requests
    pub fn actor(&self) -> String {
        self.admin_name
            .clone()
            .unwrap_or_else(|| "system".to_string())
    }
}

impl Default for OperationContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_builder() {
        let admin_id = Uuid::new_v4();
        let correlation_id = Uuid::new_v4();

        let context = OperationContext::new()
            .with_admin(admin_id, "treasurer")
            .with_correlation_id(correlation_id);

        assert_eq!(context.admin_id, Some(admin_id));
        assert_eq!(context.correlation_id, Some(correlation_id));
        assert_eq!(context.actor(), "treasurer");
    }

    #[test]
    fn test_ensure_correlation_id() {
        let mut context = OperationContext::new();
        let id = context.ensure_correlation_id();
        assert_eq!(context.correlation_id, Some(id));
        assert_eq!(context.ensure_correlation_id(), id);
    }

    #[test]
    fn test_actor_defaults_to_system() {
        assert_eq!(OperationContext::default().actor(), "system");
    }
}
