//! Domain Error Types
//!
//! Pure domain errors that don't depend on infrastructure.

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use super::validation::ValidationErrors;

/// Business rule violations and domain invariant failures.
///
/// These are independent of the web/storage layers; `AppError` maps them to
/// HTTP responses.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    /// One or more input fields are invalid (all of them are listed)
    #[error("Validation failed: {0}")]
    Validation(ValidationErrors),

    /// Attempted transition from the wrong state
    #[error("Cannot {action} {entity} {id} in status '{current}'")]
    InvalidState {
        entity: &'static str,
        id: Uuid,
        action: &'static str,
        current: String,
    },

    /// Not enough savings to cover a debit
    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: Decimal, available: Decimal },

    /// Request was already decided (possibly by a concurrent admin)
    #[error("Request {id} has already been processed (status '{status}')")]
    AlreadyProcessed { id: Uuid, status: String },

    #[error("Loan not found: {0}")]
    LoanNotFound(Uuid),

    #[error("Member not found: {0}")]
    MemberNotFound(Uuid),

    #[error("Savings account not found: {0}")]
    AccountNotFound(Uuid),

    #[error("Withdrawal request not found: {0}")]
    WithdrawalNotFound(Uuid),

    /// Arithmetic precondition failure (e.g. zero-term amortization)
    #[error("Calculation error: {0}")]
    Calculation(String),
}

impl DomainError {
    /// Single-field validation failure
    pub fn invalid_field(field: &str, message: impl Into<String>) -> Self {
        let mut errors = ValidationErrors::new();
        errors.add(field, message);
        Self::Validation(errors)
    }

    pub fn insufficient_balance(required: Decimal, available: Decimal) -> Self {
        Self::InsufficientBalance { required, available }
    }

    /// Check if this is a client error (user's fault)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::InsufficientBalance { .. }
                | Self::Calculation(_)
        )
    }

    /// Check if this is a state conflict (another action got there first)
    pub fn is_conflict_error(&self) -> bool {
        matches!(self, Self::InvalidState { .. } | Self::AlreadyProcessed { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::LoanNotFound(_)
                | Self::MemberNotFound(_)
                | Self::AccountNotFound(_)
                | Self::WithdrawalNotFound(_)
        )
    }
}

impl From<ValidationErrors> for DomainError {
    fn from(errors: ValidationErrors) -> Self {
        Self::Validation(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_insufficient_balance_error() {
        let err = DomainError::insufficient_balance(dec!(100), dec!(50));

        assert!(err.is_client_error());
        assert!(!err.is_conflict_error());
        assert!(err.to_string().contains("100"));
        assert!(err.to_string().contains("50"));
    }

    #[test]
    fn test_invalid_state_message() {
        let id = Uuid::new_v4();
        let err = DomainError::InvalidState {
            entity: "loan",
            id,
            action: "approve",
            current: "rejected".to_string(),
        };

        assert!(err.is_conflict_error());
        assert_eq!(
            err.to_string(),
            format!("Cannot approve loan {} in status 'rejected'", id)
        );
    }

    #[test]
    fn test_invalid_field() {
        match DomainError::invalid_field("admin_comment", "required") {
            DomainError::Validation(errors) => assert!(errors.has_field("admin_comment")),
            other => panic!("unexpected {:?}", other),
        }
    }
}
