//! Audit Log Service
//!
//! Tamper-evident audit logging with hash chain verification.
//! Every state-changing admin action is recorded for compliance review.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::OperationContext;
use crate::store::{AuditRepository, StoreError};

/// Hash that the first entry links back to
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Audit log entry as stored
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub sequence_number: i64,
    pub admin_id: Option<Uuid>,
    pub correlation_id: Option<Uuid>,
    pub action: String,
    pub resource_type: Option<String>,
    pub resource_id: Option<Uuid>,
    pub before_state: Option<serde_json::Value>,
    pub after_state: Option<serde_json::Value>,
    pub client_ip: Option<IpAddr>,
    pub previous_hash: String,
    pub current_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Audit action types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    LoanSubmitted,
    LoanEdited,
    LoanApproved,
    LoanRejected,
    LoanDisbursed,
    LoanStatusOverridden,
    RepaymentRecorded,
    WithdrawalRequested,
    WithdrawalApproved,
    WithdrawalRejected,
    InterestPosted,
    PayrollDeductionsApplied,
    AuthFailed,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::LoanSubmitted => "loan.submitted",
            AuditAction::LoanEdited => "loan.edited",
            AuditAction::LoanApproved => "loan.approved",
            AuditAction::LoanRejected => "loan.rejected",
            AuditAction::LoanDisbursed => "loan.disbursed",
            AuditAction::LoanStatusOverridden => "loan.status_overridden",
            AuditAction::RepaymentRecorded => "loan.repayment_recorded",
            AuditAction::WithdrawalRequested => "withdrawal.requested",
            AuditAction::WithdrawalApproved => "withdrawal.approved",
            AuditAction::WithdrawalRejected => "withdrawal.rejected",
            AuditAction::InterestPosted => "savings.interest_posted",
            AuditAction::PayrollDeductionsApplied => "savings.payroll_deductions_applied",
            AuditAction::AuthFailed => "auth.failed",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Builder for creating audit log entries
#[derive(Debug, Clone)]
pub struct AuditLogBuilder {
    action: String,
    resource_type: Option<String>,
    resource_id: Option<Uuid>,
    before_state: Option<serde_json::Value>,
    after_state: Option<serde_json::Value>,
}

impl AuditLogBuilder {
    pub fn new(action: AuditAction) -> Self {
        Self {
            action: action.as_str().to_string(),
            resource_type: None,
            resource_id: None,
            before_state: None,
            after_state: None,
        }
    }

    pub fn resource(mut self, resource_type: &str, resource_id: Uuid) -> Self {
        self.resource_type = Some(resource_type.to_string());
        self.resource_id = Some(resource_id);
        self
    }

    pub fn before_state<T: Serialize>(mut self, state: &T) -> Self {
        self.before_state = serde_json::to_value(state).ok();
        self
    }

    pub fn after_state<T: Serialize>(mut self, state: &T) -> Self {
        self.after_state = serde_json::to_value(state).ok();
        self
    }

    /// Attach the request context; sequencing and hashing happen on append
    pub fn build(self, context: &OperationContext) -> NewAuditEntry {
        NewAuditEntry {
            id: Uuid::new_v4(),
            admin_id: context.admin_id,
            correlation_id: context.correlation_id,
            client_ip: context.client_ip,
            action: self.action,
            resource_type: self.resource_type,
            resource_id: self.resource_id,
            before_state: self.before_state,
            after_state: self.after_state,
            created_at: Utc::now(),
        }
    }
}

/// Entry not yet linked into the chain
#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub id: Uuid,
    pub admin_id: Option<Uuid>,
    pub correlation_id: Option<Uuid>,
    pub client_ip: Option<IpAddr>,
    pub action: String,
    pub resource_type: Option<String>,
    pub resource_id: Option<Uuid>,
    pub before_state: Option<serde_json::Value>,
    pub after_state: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl NewAuditEntry {
    /// Link this entry after `previous_hash` at position `sequence_number`
    pub fn seal(self, sequence_number: i64, previous_hash: &str) -> AuditEntry {
        let current_hash = entry_hash(
            self.id,
            sequence_number,
            &self.action,
            self.admin_id,
            self.before_state.as_ref(),
            self.after_state.as_ref(),
            previous_hash,
        );
        AuditEntry {
            id: self.id,
            sequence_number,
            admin_id: self.admin_id,
            correlation_id: self.correlation_id,
            action: self.action,
            resource_type: self.resource_type,
            resource_id: self.resource_id,
            before_state: self.before_state,
            after_state: self.after_state,
            client_ip: self.client_ip,
            previous_hash: previous_hash.to_string(),
            current_hash,
            created_at: self.created_at,
        }
    }
}

fn entry_hash(
    id: Uuid,
    sequence_number: i64,
    action: &str,
    admin_id: Option<Uuid>,
    before_state: Option<&serde_json::Value>,
    after_state: Option<&serde_json::Value>,
    previous_hash: &str,
) -> String {
    let hash_input = format!(
        "{}{}{}{}{}{}{}",
        id,
        sequence_number,
        action,
        admin_id.map(|u| u.to_string()).unwrap_or_default(),
        before_state.map(|v| v.to_string()).unwrap_or_default(),
        after_state.map(|v| v.to_string()).unwrap_or_default(),
        previous_hash
    );
    sha256_hex(&hash_input)
}

/// Result of hash chain verification
#[derive(Debug, Clone, Serialize)]
pub struct ChainVerificationResult {
    pub is_valid: bool,
    pub entries_checked: u64,
    pub first_invalid_entry: Option<Uuid>,
    pub expected_hash: Option<String>,
    pub actual_hash: Option<String>,
}

/// Recompute the chain over entries in ascending sequence order
pub fn verify_chain(entries: &[AuditEntry]) -> ChainVerificationResult {
    let mut previous_hash = GENESIS_HASH.to_string();

    for (checked, entry) in entries.iter().enumerate() {
        if entry.previous_hash != previous_hash {
            return ChainVerificationResult {
                is_valid: false,
                entries_checked: checked as u64 + 1,
                first_invalid_entry: Some(entry.id),
                expected_hash: Some(previous_hash),
                actual_hash: Some(entry.previous_hash.clone()),
            };
        }

        let calculated = entry_hash(
            entry.id,
            entry.sequence_number,
            &entry.action,
            entry.admin_id,
            entry.before_state.as_ref(),
            entry.after_state.as_ref(),
            &entry.previous_hash,
        );
        if calculated != entry.current_hash {
            return ChainVerificationResult {
                is_valid: false,
                entries_checked: checked as u64 + 1,
                first_invalid_entry: Some(entry.id),
                expected_hash: Some(calculated),
                actual_hash: Some(entry.current_hash.clone()),
            };
        }

        previous_hash = entry.current_hash.clone();
    }

    ChainVerificationResult {
        is_valid: true,
        entries_checked: entries.len() as u64,
        first_invalid_entry: None,
        expected_hash: None,
        actual_hash: None,
    }
}

/// Calculate SHA-256 hash and return as hex string
pub fn sha256_hex(input: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Audit Log Service
#[derive(Clone)]
pub struct AuditLogService {
    repository: Arc<dyn AuditRepository>,
}

impl AuditLogService {
    pub fn new(repository: Arc<dyn AuditRepository>) -> Self {
        Self { repository }
    }

    /// Record an action that has already been committed.
    ///
    /// A failed audit write is logged and swallowed: the business change it
    /// describes is already durable and must still be reported as done.
    pub async fn log(&self, builder: AuditLogBuilder, context: &OperationContext) {
        let entry = builder.build(context);
        let action = entry.action.clone();
        match self.repository.append_audit(entry).await {
            Ok(stored) => tracing::debug!(
                audit_id = %stored.id,
                sequence = stored.sequence_number,
                action = %action,
                "Audit log entry created"
            ),
            Err(e) => tracing::error!(action = %action, error = %e, "Failed to write audit log entry"),
        }
    }

    /// Verify the first `limit` entries of the chain
    pub async fn verify(&self, limit: i64) -> Result<ChainVerificationResult, StoreError> {
        let entries = self.repository.audit_chain(limit).await?;
        Ok(verify_chain(&entries))
    }

    /// Most recent entries, newest first
    pub async fn recent(&self, limit: i64) -> Result<Vec<AuditEntry>, StoreError> {
        self.repository.recent_audit(limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(n: usize) -> Vec<AuditEntry> {
        let context = OperationContext::new().with_admin(Uuid::new_v4(), "admin");
        let mut previous = GENESIS_HASH.to_string();
        (0..n)
            .map(|i| {
                let entry = AuditLogBuilder::new(AuditAction::LoanApproved)
                    .resource("loan", Uuid::new_v4())
                    .after_state(&serde_json::json!({ "status": "approved", "n": i }))
                    .build(&context)
                    .seal(i as i64 + 1, &previous);
                previous = entry.current_hash.clone();
                entry
            })
            .collect()
    }

    #[test]
    fn test_audit_action_as_str() {
        assert_eq!(AuditAction::LoanApproved.as_str(), "loan.approved");
        assert_eq!(AuditAction::WithdrawalRejected.as_str(), "withdrawal.rejected");
        assert_eq!(AuditAction::AuthFailed.to_string(), "auth.failed");
    }

    #[test]
    fn test_sha256_hex() {
        assert_eq!(sha256_hex("test input").len(), 64);
    }

    #[test]
    fn test_intact_chain_verifies() {
        let entries = chain(4);
        assert_eq!(entries[0].previous_hash, GENESIS_HASH);

        let result = verify_chain(&entries);
        assert!(result.is_valid);
        assert_eq!(result.entries_checked, 4);
    }

    #[test]
    fn test_tampered_state_detected() {
        let mut entries = chain(3);
        entries[1].after_state = Some(serde_json::json!({ "status": "paid" }));

        let result = verify_chain(&entries);
        assert!(!result.is_valid);
        assert_eq!(result.first_invalid_entry, Some(entries[1].id));
        assert_eq!(result.entries_checked, 2);
    }

    #[test]
    fn test_removed_entry_detected() {
        let mut entries = chain(3);
        entries.remove(1);

        let result = verify_chain(&entries);
        assert!(!result.is_valid);
        assert_eq!(result.first_invalid_entry, Some(entries[1].id));
    }
}
