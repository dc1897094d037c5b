//! Withdrawal requests
//!
//! Member-initiated savings withdrawals that an admin must approve before
//! funds leave the account. Both decisions are final.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::amount::Amount;
use super::error::DomainError;
use super::savings::{SavingsAccount, SavingsTransaction, TransactionKind};
use super::validation::{non_blank, ValidationErrors};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalStatus {
    Pending,
    Approved,
    Rejected,
}

impl WithdrawalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WithdrawalStatus::Pending => "pending",
            WithdrawalStatus::Approved => "approved",
            WithdrawalStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for WithdrawalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WithdrawalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(WithdrawalStatus::Pending),
            "approved" => Ok(WithdrawalStatus::Approved),
            "rejected" => Ok(WithdrawalStatus::Rejected),
            other => Err(format!("unknown withdrawal status '{}'", other)),
        }
    }
}

/// Admin decision on a pending request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithdrawalRequest {
    pub request_id: Uuid,
    pub account_id: Uuid,
    pub member_id: Uuid,
    pub amount: Amount,
    pub reason: String,
    pub status: WithdrawalStatus,
    pub approved_by: Option<String>,
    pub admin_comment: Option<String>,
    pub request_date: DateTime<Utc>,
    pub processed_date: Option<DateTime<Utc>>,
    pub version: i64,
}

/// Result of deciding a request: the request's new state, plus the debited
/// account and its ledger line when approved.
#[derive(Debug, Clone, PartialEq)]
pub struct WithdrawalOutcome {
    pub request: WithdrawalRequest,
    pub debit: Option<(SavingsAccount, SavingsTransaction)>,
}

impl WithdrawalRequest {
    /// Open a request against an active account
    pub fn open(
        account: &SavingsAccount,
        amount: Option<Decimal>,
        reason: Option<&str>,
    ) -> Result<Self, DomainError> {
        let mut errors = ValidationErrors::new();
        let amount = match amount.map(Amount::new) {
            None => {
                errors.add("amount", "amount is required");
                None
            }
            Some(Err(e)) => {
                errors.add("amount", e.to_string());
                None
            }
            Some(Ok(amount)) => Some(amount),
        };
        let reason = non_blank(reason);
        errors.check(reason.is_none(), "reason", "reason is required");
        errors.check(
            !account.is_active(),
            "account_id",
            "withdrawals require an active account",
        );

        match (amount, reason) {
            (Some(amount), Some(reason)) if errors.is_empty() => Ok(Self {
                request_id: Uuid::new_v4(),
                account_id: account.id,
                member_id: account.member_id,
                amount,
                reason,
                status: WithdrawalStatus::Pending,
                approved_by: None,
                admin_comment: None,
                request_date: Utc::now(),
                processed_date: None,
                version: 0,
            }),
            _ => Err(DomainError::Validation(errors)),
        }
    }

    /// Decide a pending request.
    ///
    /// Approval debits `account` and fails with `InsufficientBalance` when the
    /// balance cannot cover the amount. Rejection requires a comment.
    pub fn decide(
        &self,
        account: &SavingsAccount,
        decision: Decision,
        comment: Option<&str>,
        admin: &str,
    ) -> Result<WithdrawalOutcome, DomainError> {
        if self.status != WithdrawalStatus::Pending {
            return Err(DomainError::AlreadyProcessed {
                id: self.request_id,
                status: self.status.to_string(),
            });
        }

        let comment = non_blank(comment);
        let mut request = self.clone();
        request.approved_by = Some(admin.to_string());
        request.processed_date = Some(Utc::now());

        match decision {
            Decision::Approve => {
                if !account.is_active() {
                    return Err(DomainError::InvalidState {
                        entity: "savings_account",
                        id: account.id,
                        action: "withdraw from",
                        current: account.status.as_str().to_string(),
                    });
                }
                let debited = account.debit(&self.amount)?;
                let transaction = SavingsTransaction::new(
                    &debited,
                    TransactionKind::Withdrawal,
                    self.amount,
                    format!("WDR-{}", self.request_id.simple()),
                );
                request.status = WithdrawalStatus::Approved;
                request.admin_comment = comment;
                Ok(WithdrawalOutcome {
                    request,
                    debit: Some((debited, transaction)),
                })
            }
            Decision::Reject => {
                let Some(comment) = comment else {
                    return Err(DomainError::invalid_field(
                        "admin_comment",
                        "a reason is required to reject a withdrawal",
                    ));
                };
                request.status = WithdrawalStatus::Rejected;
                request.admin_comment = Some(comment);
                Ok(WithdrawalOutcome {
                    request,
                    debit: None,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::savings::fixtures::account;
    use rust_decimal_macros::dec;

    fn request(acct: &SavingsAccount, amount: Decimal) -> WithdrawalRequest {
        WithdrawalRequest::open(acct, Some(amount), Some("rent")).unwrap()
    }

    #[test]
    fn test_open_validates_all_fields() {
        let mut acct = account(dec!(100), dec!(5));
        acct.status = crate::domain::savings::AccountStatus::Closed;
        match WithdrawalRequest::open(&acct, None, Some("  ")) {
            Err(DomainError::Validation(errors)) => assert_eq!(errors.len(), 3),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_approve_refused_once_account_closed() {
        let mut acct = account(dec!(1000), dec!(5));
        let pending = request(&acct, dec!(400));
        acct.status = crate::domain::savings::AccountStatus::Closed;

        let err = pending
            .decide(&acct, Decision::Approve, None, "treasurer")
            .unwrap_err();
        assert!(matches!(
            err,
            DomainError::InvalidState { entity: "savings_account", ref current, .. } if current == "closed"
        ));

        // Rejection still clears the queue
        let outcome = pending
            .decide(&acct, Decision::Reject, Some("account closed"), "treasurer")
            .unwrap();
        assert_eq!(outcome.request.status, WithdrawalStatus::Rejected);
    }

    #[test]
    fn test_approve_debits_account() {
        let acct = account(dec!(1000), dec!(5));
        let outcome = request(&acct, dec!(400))
            .decide(&acct, Decision::Approve, Some("ok"), "treasurer")
            .unwrap();

        assert_eq!(outcome.request.status, WithdrawalStatus::Approved);
        assert_eq!(outcome.request.approved_by.as_deref(), Some("treasurer"));
        assert!(outcome.request.processed_date.is_some());
        let (debited, transaction) = outcome.debit.unwrap();
        assert_eq!(debited.balance.value(), dec!(600));
        assert_eq!(transaction.balance_after.value(), dec!(600));
        assert_eq!(transaction.kind, TransactionKind::Withdrawal);
    }

    #[test]
    fn test_approve_over_balance_fails() {
        let acct = account(dec!(100), dec!(5));
        let err = request(&acct, dec!(100.01))
            .decide(&acct, Decision::Approve, None, "treasurer")
            .unwrap_err();
        assert!(matches!(err, DomainError::InsufficientBalance { .. }));
    }

    #[test]
    fn test_reject_requires_comment() {
        let acct = account(dec!(100), dec!(5));
        let pending = request(&acct, dec!(50));
        assert!(matches!(
            pending.decide(&acct, Decision::Reject, Some(" "), "treasurer"),
            Err(DomainError::Validation(_))
        ));

        let outcome = pending
            .decide(&acct, Decision::Reject, Some("duplicate request"), "treasurer")
            .unwrap();
        assert_eq!(outcome.request.status, WithdrawalStatus::Rejected);
        assert!(outcome.debit.is_none());
    }

    #[test]
    fn test_decided_request_is_final() {
        let acct = account(dec!(100), dec!(5));
        let decided = request(&acct, dec!(50))
            .decide(&acct, Decision::Reject, Some("no"), "treasurer")
            .unwrap()
            .request;
        assert!(matches!(
            decided.decide(&acct, Decision::Approve, None, "auditor"),
            Err(DomainError::AlreadyProcessed { .. })
        ));
    }
}
