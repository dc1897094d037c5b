//! Withdrawal Handler
//!
//! Member withdrawal requests and the admin decision on them.

use std::sync::Arc;

use uuid::Uuid;

use crate::audit::{AuditAction, AuditLogBuilder, AuditLogService};
use crate::domain::validation::non_blank;
use crate::domain::{Decision, DomainError, OperationContext, ValidationErrors, WithdrawalRequest};
use crate::error::AppResult;
use crate::store::SavingsRepository;

use super::{retry_on_conflict, WithdrawalDecisionCommand, WithdrawalRequestCommand};

pub struct WithdrawalHandler {
    savings: Arc<dyn SavingsRepository>,
    audit: AuditLogService,
}

impl WithdrawalHandler {
    pub fn new(savings: Arc<dyn SavingsRepository>, audit: AuditLogService) -> Self {
        Self { savings, audit }
    }

    /// Open a pending request against an active account
    pub async fn request(
        &self,
        command: WithdrawalRequestCommand,
        context: &OperationContext,
    ) -> AppResult<WithdrawalRequest> {
        let Some(account_id) = command.account_id else {
            let mut errors = ValidationErrors::new();
            errors.add("account_id", "account is required");
            errors.check(command.amount.is_none(), "amount", "amount is required");
            errors.check(
                non_blank(command.reason.as_deref()).is_none(),
                "reason",
                "reason is required",
            );
            return Err(errors.into());
        };

        let account = self
            .savings
            .find_account(account_id)
            .await?
            .ok_or(DomainError::AccountNotFound(account_id))?;
        let request = WithdrawalRequest::open(&account, command.amount, command.reason.as_deref())?;
        let request = self.savings.insert_withdrawal(&request).await?;

        tracing::info!(
            request_id = %request.request_id,
            account_id = %account_id,
            amount = %request.amount,
            "Withdrawal requested"
        );
        self.audit
            .log(
                AuditLogBuilder::new(AuditAction::WithdrawalRequested)
                    .resource("withdrawal_request", request.request_id)
                    .after_state(&request),
                context,
            )
            .await;

        Ok(request)
    }

    /// Approve or reject a pending request. Approval debits the account in
    /// the same commit that closes the request.
    pub async fn decide(
        &self,
        request_id: Uuid,
        command: WithdrawalDecisionCommand,
        context: &OperationContext,
    ) -> AppResult<WithdrawalRequest> {
        let actor = context.actor();
        let (actor, comment) = (actor.as_str(), command.admin_comment.as_deref());
        let decision = command.decision;

        let (before, after) = retry_on_conflict("withdrawal request", request_id, move || async move {
            let current = self
                .savings
                .find_withdrawal(request_id)
                .await?
                .ok_or(DomainError::WithdrawalNotFound(request_id))?;
            let account = self
                .savings
                .find_account(current.account_id)
                .await?
                .ok_or(DomainError::AccountNotFound(current.account_id))?;
            let outcome = current.decide(&account, decision, comment, actor)?;
            let saved = self.savings.commit_withdrawal(&outcome).await?;
            Ok((current, saved))
        })
        .await?;

        let action = match decision {
            Decision::Approve => AuditAction::WithdrawalApproved,
            Decision::Reject => AuditAction::WithdrawalRejected,
        };
        tracing::info!(
            request_id = %request_id,
            status = %after.status,
            admin = %actor,
            "Withdrawal request processed"
        );
        self.audit
            .log(
                AuditLogBuilder::new(action)
                    .resource("withdrawal_request", request_id)
                    .before_state(&before)
                    .after_state(&after),
                context,
            )
            .await;

        Ok(after)
    }

    pub async fn pending(&self) -> AppResult<Vec<WithdrawalRequest>> {
        Ok(self.savings.pending_withdrawals().await?)
    }
}
