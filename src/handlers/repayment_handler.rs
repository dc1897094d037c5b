//! Repayment Handler
//!
//! Records repayments against disbursed and active loans.

use std::sync::Arc;

use uuid::Uuid;

use crate::audit::{AuditAction, AuditLogBuilder, AuditLogService};
use crate::domain::{DomainError, LoanStatus, OperationContext, Repayment, RepaymentDraft};
use crate::error::AppResult;
use crate::store::LoanRepository;

use super::{retry_on_conflict, LoanView, RepaymentResult};

pub struct RepaymentHandler {
    loans: Arc<dyn LoanRepository>,
    audit: AuditLogService,
}

impl RepaymentHandler {
    pub fn new(loans: Arc<dyn LoanRepository>, audit: AuditLogService) -> Self {
        Self { loans, audit }
    }

    /// Record a repayment. The form is validated first; the loan's status and
    /// outstanding balance are then checked against its latest stored state.
    pub async fn record(
        &self,
        loan_id: Uuid,
        draft: RepaymentDraft,
        context: &OperationContext,
    ) -> AppResult<RepaymentResult> {
        let repayment = draft.validate(loan_id)?;
        let repayment = &repayment;

        let (before, after) = retry_on_conflict("loan", loan_id, move || async move {
            let current = self
                .loans
                .find_loan(loan_id)
                .await?
                .ok_or(DomainError::LoanNotFound(loan_id))?;
            let next = current.record_repayment(repayment)?;
            let saved = self.loans.record_repayment(&next, repayment).await?;
            Ok((current, saved))
        })
        .await?;

        tracing::info!(
            loan_id = %loan_id,
            receipt = %repayment.receipt_number,
            amount = %repayment.amount,
            amount_paid = %after.amount_paid,
            "Repayment recorded"
        );
        if after.status == LoanStatus::Paid {
            tracing::info!(loan_id = %loan_id, "Loan fully repaid");
        }

        self.audit
            .log(
                AuditLogBuilder::new(AuditAction::RepaymentRecorded)
                    .resource("loan", loan_id)
                    .before_state(&before)
                    .after_state(&serde_json::json!({
                        "repayment": repayment,
                        "status": after.status,
                        "amount_paid": after.amount_paid,
                    })),
                context,
            )
            .await;

        let quote = after.quote()?;
        Ok(RepaymentResult {
            repayment: repayment.clone(),
            loan: LoanView::new(after, &quote),
        })
    }

    pub async fn list(&self, loan_id: Uuid) -> AppResult<Vec<Repayment>> {
        if self.loans.find_loan(loan_id).await?.is_none() {
            return Err(DomainError::LoanNotFound(loan_id).into());
        }
        Ok(self.loans.repayments_for(loan_id).await?)
    }
}
