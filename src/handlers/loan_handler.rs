//! Loan Handler
//!
//! Submission, decisions, disbursement, edits and status overrides.

use std::sync::Arc;

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::audit::{AuditAction, AuditLogBuilder, AuditLogService};
use crate::domain::loan::today;
use crate::domain::{
    DisbursementDraft, DomainError, EligibilityAssessment, EligibilityRule, Loan, LoanDraft,
    LoanPolicy, LoanTerms, MemberSavings, OperationContext, PaymentQuote, ValidationErrors,
};
use crate::error::AppResult;
use crate::store::{LoanFilter, LoanRepository, MemberDirectory};

use super::{
    retry_on_conflict, LoanDecisionCommand, LoanDetails, LoanSchedule, LoanSubmission, LoanView,
    StatusOverrideCommand,
};

/// Handler for the loan lifecycle
pub struct LoanHandler {
    loans: Arc<dyn LoanRepository>,
    members: Arc<dyn MemberDirectory>,
    audit: AuditLogService,
    policy: LoanPolicy,
    eligibility: EligibilityRule,
}

impl LoanHandler {
    pub fn new(
        loans: Arc<dyn LoanRepository>,
        members: Arc<dyn MemberDirectory>,
        audit: AuditLogService,
        policy: LoanPolicy,
        eligibility: EligibilityRule,
    ) -> Self {
        Self {
            loans,
            members,
            audit,
            policy,
            eligibility,
        }
    }

    /// Submit a new application
    pub async fn submit(&self, draft: LoanDraft, context: &OperationContext) -> AppResult<LoanSubmission> {
        let (terms, eligibility) = self.validate(&draft).await?;

        let loan = self.loans.insert_loan(&Loan::open(terms)).await?;

        tracing::info!(
            loan_id = %loan.id,
            member_id = %loan.member_id,
            amount = %loan.amount,
            term_months = loan.term_months,
            "Loan application submitted"
        );
        self.audit
            .log(
                AuditLogBuilder::new(AuditAction::LoanSubmitted)
                    .resource("loan", loan.id)
                    .after_state(&loan),
                context,
            )
            .await;

        Ok(LoanSubmission {
            loan: view(loan)?,
            eligibility,
        })
    }

    pub async fn get(&self, id: Uuid) -> AppResult<LoanDetails> {
        let loan = self.load(id).await?;
        let repayments = self.loans.repayments_for(id).await?;
        let member = match self.members.find_member(loan.member_id).await? {
            Some(member) => Some(MemberSavings {
                savings_balance: self.members.savings_balance(member.id).await?,
                member,
            }),
            None => None,
        };

        Ok(LoanDetails {
            loan: view(loan)?,
            member,
            repayments,
        })
    }

    pub async fn list(&self, filter: &LoanFilter) -> AppResult<Vec<LoanView>> {
        self.loans
            .list_loans(filter)
            .await?
            .into_iter()
            .map(view)
            .collect()
    }

    pub async fn schedule(&self, id: Uuid) -> AppResult<LoanSchedule> {
        let loan = self.load(id).await?;
        let quote = loan.quote()?;
        Ok(LoanSchedule {
            loan_id: loan.id,
            rows: quote.schedule(),
            quote,
        })
    }

    /// Installment quote within the submission limits
    pub fn quote(&self, principal: Decimal, annual_rate: Decimal, term_months: u32) -> AppResult<PaymentQuote> {
        Ok(self.policy.quote(principal, annual_rate, term_months)?)
    }

    pub async fn approve(
        &self,
        id: Uuid,
        command: LoanDecisionCommand,
        context: &OperationContext,
    ) -> AppResult<LoanView> {
        let notes = command.notes.as_deref();
        self.transition(id, AuditAction::LoanApproved, context, |loan| {
            loan.approve(notes, today())
        })
        .await
    }

    pub async fn reject(
        &self,
        id: Uuid,
        command: LoanDecisionCommand,
        context: &OperationContext,
    ) -> AppResult<LoanView> {
        let notes = command.notes.as_deref();
        self.transition(id, AuditAction::LoanRejected, context, |loan| loan.reject(notes))
            .await
    }

    /// Release funds for an approved loan. Inputs are validated before the
    /// status is checked.
    pub async fn disburse(
        &self,
        id: Uuid,
        draft: DisbursementDraft,
        context: &OperationContext,
    ) -> AppResult<LoanView> {
        let disbursement = draft.validate()?;
        self.transition(id, AuditAction::LoanDisbursed, context, |loan| {
            loan.disburse(&disbursement)
        })
        .await
    }

    /// Apply a patch to a pending application and re-validate the result
    pub async fn edit(&self, id: Uuid, patch: LoanDraft, context: &OperationContext) -> AppResult<LoanView> {
        let patch = &patch;
        let (before, after) = retry_on_conflict("loan", id, move || async move {
            let current = self.load(id).await?;
            current.ensure_editable()?;
            let (terms, _) = self.validate(&patch.clone().merged_over(&current)).await?;
            let next = current.edit(terms)?;
            let saved = self.loans.update_loan(&next).await?;
            Ok((current, saved))
        })
        .await?;

        tracing::info!(loan_id = %id, "Loan application edited");
        self.audit
            .log(
                AuditLogBuilder::new(AuditAction::LoanEdited)
                    .resource("loan", id)
                    .before_state(&before)
                    .after_state(&after),
                context,
            )
            .await;

        view(after)
    }

    /// Admin override to any other status; the reason is mandatory
    pub async fn override_status(
        &self,
        id: Uuid,
        command: StatusOverrideCommand,
        context: &OperationContext,
    ) -> AppResult<LoanView> {
        let reason = command.reason.unwrap_or_default();
        let status = command.status;
        let reason = reason.as_str();
        self.transition(id, AuditAction::LoanStatusOverridden, context, |loan| {
            loan.override_status(status, reason)
        })
        .await
    }

    async fn transition<F>(
        &self,
        id: Uuid,
        action: AuditAction,
        context: &OperationContext,
        apply: F,
    ) -> AppResult<LoanView>
    where
        F: Fn(&Loan) -> Result<Loan, DomainError> + Send + Sync,
    {
        let apply = &apply;
        let (before, after) = retry_on_conflict("loan", id, move || async move {
            let current = self.load(id).await?;
            let next = apply(&current)?;
            let saved = self.loans.update_loan(&next).await?;
            Ok((current, saved))
        })
        .await?;

        tracing::info!(
            loan_id = %id,
            from = %before.status,
            to = %after.status,
            admin = %context.actor(),
            "Loan status changed"
        );
        self.audit
            .log(
                AuditLogBuilder::new(action)
                    .resource("loan", id)
                    .before_state(&before)
                    .after_state(&after),
                context,
            )
            .await;

        view(after)
    }

    async fn load(&self, id: Uuid) -> AppResult<Loan> {
        Ok(self
            .loans
            .find_loan(id)
            .await?
            .ok_or(DomainError::LoanNotFound(id))?)
    }

    /// Field validation, member lookup and the eligibility rule, with every
    /// violation reported together
    async fn validate(&self, draft: &LoanDraft) -> AppResult<(LoanTerms, EligibilityAssessment)> {
        let mut errors = ValidationErrors::new();
        let terms = match draft.validate(&self.policy) {
            Ok(terms) => Some(terms),
            Err(e) => {
                errors.extend(e);
                None
            }
        };

        let mut savings_balance = Decimal::ZERO;
        if let Some(member_id) = draft.member_id {
            match self.members.find_member(member_id).await? {
                Some(member) if member.is_active => {
                    savings_balance = self.members.savings_balance(member_id).await?;
                }
                Some(_) => errors.add("member_id", "member is not active"),
                None => errors.add("member_id", "member not found"),
            }
        }

        let requested = draft.amount.unwrap_or(Decimal::ZERO);
        let eligibility = self.eligibility.assess(savings_balance, requested);
        if !eligibility.within_limit && !errors.has_field("amount") {
            if eligibility.blocks() {
                errors.add(
                    "amount",
                    format!("amount exceeds loan limit of {:.2}", eligibility.loan_limit),
                );
            } else {
                tracing::warn!(
                    member_id = ?draft.member_id,
                    requested = %requested,
                    loan_limit = %eligibility.loan_limit,
                    "Requested amount exceeds the member's loan limit"
                );
            }
        }

        match terms {
            Some(terms) if errors.is_empty() => Ok((terms, eligibility)),
            _ => Err(errors.into()),
        }
    }
}

fn view(loan: Loan) -> AppResult<LoanView> {
    let quote = loan.quote()?;
    Ok(LoanView::new(loan, &quote))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::LimitPolicy;
    use crate::store::MemoryStore;
    use rust_decimal_macros::dec;

    async fn handler(store: &Arc<MemoryStore>, rule: EligibilityRule) -> LoanHandler {
        LoanHandler::new(
            store.clone(),
            store.clone(),
            AuditLogService::new(store.clone()),
            LoanPolicy::default(),
            rule,
        )
    }

    fn draft(member_id: Uuid, amount: Decimal) -> LoanDraft {
        LoanDraft {
            member_id: Some(member_id),
            amount: Some(amount),
            term_months: Some(12),
            purpose: Some("roofing".to_string()),
            application_date: chrono::NaiveDate::from_ymd_opt(2026, 2, 1),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_unknown_member_is_a_field_error() {
        let store = Arc::new(MemoryStore::new());
        let loans = handler(&store, EligibilityRule::default()).await;

        let err = loans
            .submit(draft(Uuid::new_v4(), dec!(500)), &OperationContext::new())
            .await
            .unwrap_err();
        match err {
            crate::AppError::Domain(DomainError::Validation(errors)) => {
                assert!(errors.has_field("member_id"));
                assert_eq!(errors.len(), 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_enforced_limit_blocks_submission() {
        let store = Arc::new(MemoryStore::new());
        let member = store.seed_member("Ngozi", None).await;
        store.seed_account(member.id, dec!(1000), dec!(5)).await.unwrap();
        let loans = handler(&store, EligibilityRule::new(dec!(3), LimitPolicy::Enforced)).await;

        let err = loans
            .submit(draft(member.id, dec!(3500)), &OperationContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, crate::AppError::Domain(DomainError::Validation(ref e)) if e.has_field("amount")));

        let ok = loans
            .submit(draft(member.id, dec!(3000)), &OperationContext::new())
            .await
            .unwrap();
        assert!(ok.eligibility.within_limit);
        assert_eq!(ok.eligibility.loan_limit, dec!(3000));
    }

    #[tokio::test]
    async fn test_advisory_limit_reports_only() {
        let store = Arc::new(MemoryStore::new());
        let member = store.seed_member("Ngozi", None).await;
        let loans = handler(&store, EligibilityRule::default()).await;

        let submission = loans
            .submit(draft(member.id, dec!(10000)), &OperationContext::new())
            .await
            .unwrap();
        assert!(!submission.eligibility.within_limit);
        assert_eq!(submission.loan.monthly_payment, dec!(879.16));
        assert_eq!(submission.loan.total_repayment, dec!(10549.92));
    }

    #[tokio::test]
    async fn test_edit_merges_patch() {
        let store = Arc::new(MemoryStore::new());
        let member = store.seed_member("Ngozi", None).await;
        let loans = handler(&store, EligibilityRule::default()).await;
        let context = OperationContext::new();
        let loan = loans.submit(draft(member.id, dec!(1200)), &context).await.unwrap().loan.loan;

        let patch = LoanDraft {
            term_months: Some(24),
            ..Default::default()
        };
        let edited = loans.edit(loan.id, patch, &context).await.unwrap();
        assert_eq!(edited.loan.term_months, 24);
        assert_eq!(edited.loan.amount, loan.amount);
        assert_eq!(edited.loan.purpose, "roofing");
        assert_eq!(edited.loan.version, 1);

        let bad = LoanDraft {
            term_months: Some(0),
            ..Default::default()
        };
        assert!(loans.edit(loan.id, bad, &context).await.is_err());
    }

    #[tokio::test]
    async fn test_unschedulable_terms_never_stored() {
        let store = Arc::new(MemoryStore::new());
        let member = store.seed_member("Ngozi", None).await;
        let loans = handler(&store, EligibilityRule::default()).await;
        let context = OperationContext::new();

        let mut absurd = draft(member.id, dec!(1000));
        absurd.interest_rate = Some(dec!(100000000));
        absurd.term_months = Some(120);
        let err = loans.submit(absurd, &context).await.unwrap_err();
        assert!(matches!(err, crate::AppError::Domain(DomainError::Validation(ref e)) if e.has_field("interest_rate")));

        let loan = loans.submit(draft(member.id, dec!(1000)), &context).await.unwrap().loan.loan;
        let patch = LoanDraft {
            interest_rate: Some(dec!(100000000)),
            term_months: Some(120),
            ..Default::default()
        };
        assert!(loans.edit(loan.id, patch, &context).await.is_err());

        let listed = loans.list(&LoanFilter::default()).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].loan.interest_rate, dec!(10));
        assert!(loans.schedule(loan.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_edit_after_approval_reports_state_first() {
        let store = Arc::new(MemoryStore::new());
        let member = store.seed_member("Ngozi", None).await;
        let loans = handler(&store, EligibilityRule::default()).await;
        let context = OperationContext::new();
        let loan = loans.submit(draft(member.id, dec!(1200)), &context).await.unwrap().loan.loan;
        loans
            .approve(loan.id, LoanDecisionCommand::default(), &context)
            .await
            .unwrap();

        let invalid_patch = LoanDraft {
            term_months: Some(0),
            ..Default::default()
        };
        let err = loans.edit(loan.id, invalid_patch, &context).await.unwrap_err();
        assert!(matches!(
            err,
            crate::AppError::Domain(DomainError::InvalidState { action: "edit", .. })
        ));
    }

    #[tokio::test]
    async fn test_quote_respects_policy_limits() {
        let store = Arc::new(MemoryStore::new());
        let loans = handler(&store, EligibilityRule::default()).await;

        assert_eq!(loans.quote(dec!(10000), dec!(10), 12).unwrap().installment, dec!(879.16));
        let err = loans.quote(dec!(10000), dec!(10), 4_000_000_000).unwrap_err();
        assert!(matches!(err, crate::AppError::Domain(DomainError::Validation(ref e)) if e.has_field("term_months")));
        let err = loans.quote(Decimal::MAX, dec!(10), 12).unwrap_err();
        assert!(matches!(err, crate::AppError::Domain(DomainError::Validation(ref e)) if e.has_field("principal")));
    }

    #[tokio::test]
    async fn test_override_requires_reason() {
        let store = Arc::new(MemoryStore::new());
        let member = store.seed_member("Ngozi", None).await;
        let loans = handler(&store, EligibilityRule::default()).await;
        let context = OperationContext::new();
        let loan = loans.submit(draft(member.id, dec!(1200)), &context).await.unwrap().loan.loan;

        let missing = StatusOverrideCommand {
            status: crate::domain::LoanStatus::Defaulted,
            reason: None,
        };
        assert!(loans.override_status(loan.id, missing, &context).await.is_err());

        let forced = StatusOverrideCommand {
            status: crate::domain::LoanStatus::Defaulted,
            reason: Some("member absconded".to_string()),
        };
        let loan = loans.override_status(loan.id, forced, &context).await.unwrap();
        assert_eq!(loan.loan.status, crate::domain::LoanStatus::Defaulted);
    }
}
