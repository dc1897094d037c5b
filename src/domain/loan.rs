//! Loan aggregate
//!
//! Owns the loan state machine. Every transition is a pure method that
//! checks the current status against the central transition table and
//! returns the next state; persistence commits it under a version check.

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::amortization::PaymentQuote;
use super::amount::Amount;
use super::error::DomainError;
use super::repayment::{parse_method, PaymentMethod, Repayment};
use super::validation::{non_blank, ValidationErrors};

/// Loan status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanStatus {
    Pending,
    Approved,
    Rejected,
    Disbursed,
    Active,
    Paid,
    Defaulted,
}

impl LoanStatus {
    pub const ALL: [LoanStatus; 7] = [
        LoanStatus::Pending,
        LoanStatus::Approved,
        LoanStatus::Rejected,
        LoanStatus::Disbursed,
        LoanStatus::Active,
        LoanStatus::Paid,
        LoanStatus::Defaulted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LoanStatus::Pending => "pending",
            LoanStatus::Approved => "approved",
            LoanStatus::Rejected => "rejected",
            LoanStatus::Disbursed => "disbursed",
            LoanStatus::Active => "active",
            LoanStatus::Paid => "paid",
            LoanStatus::Defaulted => "defaulted",
        }
    }

    /// Forward transitions reachable through regular operations.
    /// Defaulted is only reachable by admin override.
    pub fn can_transition_to(&self, next: LoanStatus) -> bool {
        use LoanStatus::*;
        matches!(
            (self, next),
            (Pending, Approved)
                | (Pending, Rejected)
                | (Approved, Disbursed)
                | (Disbursed, Active)
                | (Disbursed, Paid)
                | (Active, Paid)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LoanStatus::Rejected | LoanStatus::Paid | LoanStatus::Defaulted)
    }

    pub fn accepts_repayments(&self) -> bool {
        matches!(self, LoanStatus::Disbursed | LoanStatus::Active)
    }
}

impl fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoanStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase();
        LoanStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == key)
            .ok_or_else(|| format!("unknown loan status '{}'", s))
    }
}

/// Submission limits taken from configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoanPolicy {
    pub max_term_months: u32,
    pub default_interest_rate: Decimal,
}

impl LoanPolicy {
    /// Quote an installment for terms a member could actually apply for.
    pub fn quote(
        &self,
        principal: Decimal,
        annual_rate: Decimal,
        term_months: u32,
    ) -> Result<PaymentQuote, ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if let Err(e) = Amount::new(principal) {
            errors.add("principal", e.to_string());
        }
        errors.check(
            term_months < 1 || term_months > self.max_term_months,
            "term_months",
            format!("term must be between 1 and {} months", self.max_term_months),
        );
        errors.check(
            annual_rate < Decimal::ZERO,
            "annual_rate",
            "interest rate cannot be negative",
        );
        if !errors.is_empty() {
            return Err(errors);
        }

        PaymentQuote::calculate(principal, annual_rate, term_months).map_err(|e| {
            errors.add("annual_rate", e.to_string());
            errors
        })
    }
}

impl Default for LoanPolicy {
    fn default() -> Self {
        Self {
            max_term_months: 120,
            default_interest_rate: Decimal::from(10),
        }
    }
}

/// Unvalidated loan form (submission or edit patch)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoanDraft {
    #[serde(default)]
    pub member_id: Option<Uuid>,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub term_months: Option<i64>,
    #[serde(default)]
    pub interest_rate: Option<Decimal>,
    #[serde(default)]
    pub purpose: Option<String>,
    #[serde(default)]
    pub application_date: Option<NaiveDate>,
    #[serde(default)]
    pub collateral: Option<String>,
    #[serde(default)]
    pub guarantor: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Validated loan terms
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanTerms {
    pub member_id: Uuid,
    pub amount: Amount,
    pub term_months: u32,
    pub interest_rate: Decimal,
    pub purpose: String,
    pub application_date: NaiveDate,
    pub collateral: Option<String>,
    pub guarantor: Option<String>,
    pub notes: Option<String>,
}

impl LoanDraft {
    /// Validate every field, accumulating all violations.
    pub fn validate(&self, policy: &LoanPolicy) -> Result<LoanTerms, ValidationErrors> {
        let mut errors = ValidationErrors::new();

        errors.check(self.member_id.is_none(), "member_id", "member is required");

        let amount = match self.amount {
            None => {
                errors.add("amount", "loan amount is required");
                None
            }
            Some(value) => match Amount::new(value) {
                Ok(amount) => Some(amount),
                Err(e) => {
                    errors.add("amount", e.to_string());
                    None
                }
            },
        };

        let term_months = match self.term_months {
            None => {
                errors.add("term_months", "loan term is required");
                None
            }
            Some(term) if term < 1 || term > i64::from(policy.max_term_months) => {
                errors.add(
                    "term_months",
                    format!("term must be between 1 and {} months", policy.max_term_months),
                );
                None
            }
            Some(term) => u32::try_from(term).ok(),
        };

        let interest_rate = self.interest_rate.unwrap_or(policy.default_interest_rate);
        errors.check(
            interest_rate < Decimal::ZERO,
            "interest_rate",
            "interest rate cannot be negative",
        );

        // Terms must yield a repayment schedule
        if let (Some(amount), Some(term_months)) = (&amount, term_months) {
            if interest_rate >= Decimal::ZERO {
                if let Err(e) = PaymentQuote::calculate(amount.value(), interest_rate, term_months) {
                    errors.add("interest_rate", e.to_string());
                }
            }
        }

        let purpose = non_blank(self.purpose.as_deref());
        errors.check(purpose.is_none(), "purpose", "loan purpose is required");

        errors.check(
            self.application_date.is_none(),
            "application_date",
            "application date is required",
        );

        match (self.member_id, amount, term_months, purpose, self.application_date) {
            (Some(member_id), Some(amount), Some(term_months), Some(purpose), Some(application_date))
                if errors.is_empty() =>
            {
                Ok(LoanTerms {
                    member_id,
                    amount,
                    term_months,
                    interest_rate,
                    purpose,
                    application_date,
                    collateral: non_blank(self.collateral.as_deref()),
                    guarantor: non_blank(self.guarantor.as_deref()),
                    notes: non_blank(self.notes.as_deref()),
                })
            }
            _ => Err(errors),
        }
    }

    /// Fill fields missing from an edit patch with the loan's current values
    pub fn merged_over(self, loan: &Loan) -> LoanDraft {
        LoanDraft {
            member_id: self.member_id.or(Some(loan.member_id)),
            amount: self.amount.or(Some(loan.amount.value())),
            term_months: self.term_months.or(Some(i64::from(loan.term_months))),
            interest_rate: self.interest_rate.or(Some(loan.interest_rate)),
            purpose: self.purpose.or_else(|| Some(loan.purpose.clone())),
            application_date: self.application_date.or(Some(loan.application_date)),
            collateral: self.collateral.or_else(|| loan.collateral.clone()),
            guarantor: self.guarantor.or_else(|| loan.guarantor.clone()),
            notes: self.notes.or_else(|| loan.notes.clone()),
        }
    }
}

/// Disbursement form
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DisbursementDraft {
    #[serde(default)]
    pub disbursement_date: Option<NaiveDate>,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Validated disbursement
#[derive(Debug, Clone, PartialEq)]
pub struct Disbursement {
    pub disbursement_date: NaiveDate,
    pub payment_method: PaymentMethod,
    pub notes: Option<String>,
}

impl DisbursementDraft {
    pub fn validate(&self) -> Result<Disbursement, ValidationErrors> {
        let mut errors = ValidationErrors::new();
        errors.check(
            self.disbursement_date.is_none(),
            "disbursement_date",
            "disbursement date is required",
        );
        let method = parse_method(self.payment_method.as_deref(), "payment_method", &mut errors);

        match (self.disbursement_date, method) {
            (Some(disbursement_date), Some(payment_method)) => Ok(Disbursement {
                disbursement_date,
                payment_method,
                notes: non_blank(self.notes.as_deref()),
            }),
            _ => Err(errors),
        }
    }
}

/// Loan record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Loan {
    pub id: Uuid,
    pub member_id: Uuid,
    pub amount: Amount,
    pub term_months: u32,
    pub interest_rate: Decimal,
    pub purpose: String,
    pub status: LoanStatus,
    pub application_date: NaiveDate,
    pub approval_date: Option<NaiveDate>,
    pub disbursement_date: Option<NaiveDate>,
    pub last_payment_date: Option<NaiveDate>,
    pub disbursement_method: Option<PaymentMethod>,
    pub collateral: Option<String>,
    pub guarantor: Option<String>,
    pub notes: Option<String>,
    pub amount_paid: Decimal,
    /// Optimistic concurrency counter, bumped by every write
    pub version: i64,
}

impl Loan {
    /// Open a new pending application
    pub fn open(terms: LoanTerms) -> Self {
        Self {
            id: Uuid::new_v4(),
            member_id: terms.member_id,
            amount: terms.amount,
            term_months: terms.term_months,
            interest_rate: terms.interest_rate,
            purpose: terms.purpose,
            status: LoanStatus::Pending,
            application_date: terms.application_date,
            approval_date: None,
            disbursement_date: None,
            last_payment_date: None,
            disbursement_method: None,
            collateral: terms.collateral,
            guarantor: terms.guarantor,
            notes: terms.notes,
            amount_paid: Decimal::ZERO,
            version: 0,
        }
    }

    pub fn quote(&self) -> Result<PaymentQuote, DomainError> {
        PaymentQuote::calculate(self.amount.value(), self.interest_rate, self.term_months)
    }

    /// Principal plus interest over the full term
    pub fn total_owed(&self) -> Result<Decimal, DomainError> {
        Ok(self.quote()?.total_owed())
    }

    pub fn outstanding(&self) -> Result<Decimal, DomainError> {
        Ok((self.total_owed()? - self.amount_paid).max(Decimal::ZERO))
    }

    fn invalid_state(&self, action: &'static str) -> DomainError {
        DomainError::InvalidState {
            entity: "loan",
            id: self.id,
            action,
            current: self.status.to_string(),
        }
    }

    fn transition(&self, next: LoanStatus, action: &'static str) -> Result<Loan, DomainError> {
        if !self.status.can_transition_to(next) {
            return Err(self.invalid_state(action));
        }
        let mut loan = self.clone();
        loan.status = next;
        Ok(loan)
    }

    pub fn approve(&self, notes: Option<&str>, today: NaiveDate) -> Result<Loan, DomainError> {
        let mut loan = self.transition(LoanStatus::Approved, "approve")?;
        loan.approval_date = Some(today);
        loan.append_note(notes);
        Ok(loan)
    }

    pub fn reject(&self, notes: Option<&str>) -> Result<Loan, DomainError> {
        let mut loan = self.transition(LoanStatus::Rejected, "reject")?;
        loan.append_note(notes);
        Ok(loan)
    }

    pub fn disburse(&self, disbursement: &Disbursement) -> Result<Loan, DomainError> {
        let mut loan = self.transition(LoanStatus::Disbursed, "disburse")?;
        loan.disbursement_date = Some(disbursement.disbursement_date);
        loan.disbursement_method = Some(disbursement.payment_method);
        loan.append_note(disbursement.notes.as_deref());
        Ok(loan)
    }

    /// Only pending applications can have their terms changed
    pub fn ensure_editable(&self) -> Result<(), DomainError> {
        if self.status != LoanStatus::Pending {
            return Err(self.invalid_state("edit"));
        }
        Ok(())
    }

    /// Replace the terms of a pending application
    pub fn edit(&self, terms: LoanTerms) -> Result<Loan, DomainError> {
        self.ensure_editable()?;
        let mut loan = self.clone();
        loan.member_id = terms.member_id;
        loan.amount = terms.amount;
        loan.term_months = terms.term_months;
        loan.interest_rate = terms.interest_rate;
        loan.purpose = terms.purpose;
        loan.application_date = terms.application_date;
        loan.collateral = terms.collateral;
        loan.guarantor = terms.guarantor;
        loan.notes = terms.notes;
        Ok(loan)
    }

    /// Apply a repayment. The first repayment activates a disbursed loan;
    /// reaching the total owed marks it paid.
    pub fn record_repayment(&self, repayment: &Repayment) -> Result<Loan, DomainError> {
        if !self.status.accepts_repayments() {
            return Err(self.invalid_state("record a repayment on"));
        }

        let total_owed = self.total_owed()?;
        let outstanding = (total_owed - self.amount_paid).max(Decimal::ZERO);
        if repayment.amount.value() > outstanding {
            return Err(DomainError::invalid_field(
                "amount",
                format!("repayment exceeds outstanding balance of {:.2}", outstanding),
            ));
        }

        let mut loan = self.clone();
        loan.amount_paid += repayment.amount.value();
        loan.last_payment_date = Some(
            loan.last_payment_date
                .map_or(repayment.payment_date, |d| d.max(repayment.payment_date)),
        );
        loan.status = if loan.amount_paid >= total_owed {
            LoanStatus::Paid
        } else {
            LoanStatus::Active
        };
        Ok(loan)
    }

    /// Admin override, the only way to move outside the transition table
    pub fn override_status(&self, next: LoanStatus, reason: &str) -> Result<Loan, DomainError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(DomainError::invalid_field(
                "reason",
                "a reason is required to override a loan status",
            ));
        }
        if next == self.status {
            return Err(DomainError::invalid_field(
                "status",
                format!("loan is already {}", next),
            ));
        }
        let mut loan = self.clone();
        loan.status = next;
        loan.append_note(Some(&format!(
            "Status overridden {} -> {}: {}",
            self.status, next, reason
        )));
        Ok(loan)
    }

    fn append_note(&mut self, note: Option<&str>) {
        let Some(note) = non_blank(note) else {
            return;
        };
        self.notes = Some(match self.notes.take() {
            Some(existing) => format!("{}\n{}", existing, note),
            None => note,
        });
    }
}

/// Today in UTC, the date stamped on approvals
pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::repayment::RepaymentDraft;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn valid_draft() -> LoanDraft {
        LoanDraft {
            member_id: Some(Uuid::new_v4()),
            amount: Some(dec!(10000)),
            term_months: Some(12),
            interest_rate: Some(dec!(10)),
            purpose: Some("School fees".to_string()),
            application_date: Some(date(2026, 1, 10)),
            ..Default::default()
        }
    }

    fn pending_loan() -> Loan {
        Loan::open(valid_draft().validate(&LoanPolicy::default()).unwrap())
    }

    fn disbursed_loan() -> Loan {
        let disbursement = Disbursement {
            disbursement_date: date(2026, 2, 1),
            payment_method: PaymentMethod::BankTransfer,
            notes: None,
        };
        pending_loan()
            .approve(None, date(2026, 1, 15))
            .unwrap()
            .disburse(&disbursement)
            .unwrap()
    }

    fn repayment(loan: &Loan, amount: Decimal) -> Repayment {
        RepaymentDraft {
            amount: Some(amount),
            payment_date: Some(date(2026, 3, 1)),
            payment_method: Some("Cash".to_string()),
            ..Default::default()
        }
        .validate(loan.id)
        .unwrap()
    }

    #[test]
    fn test_transition_table() {
        use LoanStatus::*;
        assert!(Pending.can_transition_to(Approved));
        assert!(Pending.can_transition_to(Rejected));
        assert!(Approved.can_transition_to(Disbursed));
        assert!(Active.can_transition_to(Paid));
        assert!(!Approved.can_transition_to(Pending));
        assert!(!Paid.can_transition_to(Active));
        assert!(!Active.can_transition_to(Defaulted));
        for terminal in [Rejected, Paid, Defaulted] {
            assert!(terminal.is_terminal());
            assert!(LoanStatus::ALL.iter().all(|s| !terminal.can_transition_to(*s)));
        }
    }

    #[test]
    fn test_status_round_trip_through_str() {
        for status in LoanStatus::ALL {
            assert_eq!(status.as_str().parse::<LoanStatus>(), Ok(status));
        }
        assert!("closed".parse::<LoanStatus>().is_err());
    }

    #[test]
    fn test_missing_required_fields_reports_each() {
        let errors = LoanDraft::default()
            .validate(&LoanPolicy::default())
            .unwrap_err();

        assert_eq!(errors.len(), 5);
        for field in ["member_id", "amount", "term_months", "purpose", "application_date"] {
            assert!(errors.has_field(field), "missing error for {}", field);
        }
    }

    #[test]
    fn test_rate_defaults_from_policy() {
        let mut draft = valid_draft();
        draft.interest_rate = None;
        let policy = LoanPolicy {
            max_term_months: 60,
            default_interest_rate: dec!(12.5),
        };
        assert_eq!(draft.validate(&policy).unwrap().interest_rate, dec!(12.5));
    }

    #[test]
    fn test_term_and_rate_bounds() {
        let mut draft = valid_draft();
        draft.term_months = Some(121);
        draft.interest_rate = Some(dec!(-1));
        draft.purpose = Some("   ".to_string());

        let errors = draft.validate(&LoanPolicy::default()).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.has_field("term_months"));
        assert!(errors.has_field("interest_rate"));
        assert!(errors.has_field("purpose"));
    }

    #[test]
    fn test_unschedulable_rate_rejected_at_validation() {
        let mut draft = valid_draft();
        draft.interest_rate = Some(dec!(100000000));
        draft.term_months = Some(120);

        let errors = draft.validate(&LoanPolicy::default()).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors.has_field("interest_rate"));
    }

    #[test]
    fn test_policy_quote_bounds() {
        let policy = LoanPolicy::default();
        let quote = policy.quote(dec!(10000), dec!(10), 12).unwrap();
        assert_eq!(quote.installment, dec!(879.16));

        let errors = policy.quote(Decimal::MAX, dec!(-1), 4_000_000_000).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.has_field("principal"));
        assert!(errors.has_field("term_months"));
        assert!(errors.has_field("annual_rate"));

        let errors = policy.quote(dec!(1000), dec!(100000000), 120).unwrap_err();
        assert!(errors.has_field("annual_rate"));
        assert!(policy.quote(dec!(1000), dec!(10), 0).is_err());
    }

    #[test]
    fn test_approve_only_from_pending() {
        let approved = pending_loan().approve(Some("ok"), date(2026, 1, 15)).unwrap();
        assert_eq!(approved.status, LoanStatus::Approved);
        assert_eq!(approved.approval_date, Some(date(2026, 1, 15)));
        assert_eq!(approved.notes.as_deref(), Some("ok"));

        let err = approved.approve(None, date(2026, 1, 16)).unwrap_err();
        assert!(matches!(err, DomainError::InvalidState { action: "approve", .. }));
    }

    #[test]
    fn test_reject_only_from_pending() {
        let rejected = pending_loan().reject(Some("insufficient guarantor")).unwrap();
        assert_eq!(rejected.status, LoanStatus::Rejected);
        assert!(rejected.reject(None).is_err());
        assert!(rejected.approve(None, date(2026, 1, 1)).is_err());
    }

    #[test]
    fn test_disburse_requires_approved() {
        let disbursement = DisbursementDraft {
            disbursement_date: Some(date(2026, 2, 1)),
            payment_method: Some("Check".to_string()),
            notes: None,
        }
        .validate()
        .unwrap();

        assert!(pending_loan().disburse(&disbursement).is_err());
        let loan = pending_loan()
            .approve(None, date(2026, 1, 2))
            .unwrap()
            .disburse(&disbursement)
            .unwrap();
        assert_eq!(loan.status, LoanStatus::Disbursed);
        assert_eq!(loan.disbursement_method, Some(PaymentMethod::Check));
    }

    #[test]
    fn test_disbursement_draft_collects_errors() {
        let errors = DisbursementDraft {
            disbursement_date: None,
            payment_method: Some("Barter".to_string()),
            notes: None,
        }
        .validate()
        .unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_edit_only_pending() {
        let loan = pending_loan();
        let patch = LoanDraft {
            amount: Some(dec!(2500)),
            ..Default::default()
        };
        let terms = patch
            .merged_over(&loan)
            .validate(&LoanPolicy::default())
            .unwrap();
        let edited = loan.edit(terms.clone()).unwrap();
        assert_eq!(edited.amount.value(), dec!(2500));
        assert_eq!(edited.purpose, "School fees");

        let approved = loan.approve(None, date(2026, 1, 2)).unwrap();
        assert!(matches!(
            approved.edit(terms),
            Err(DomainError::InvalidState { action: "edit", .. })
        ));
    }

    #[test]
    fn test_repayments_activate_then_pay_off() {
        let loan = disbursed_loan();
        assert_eq!(loan.total_owed().unwrap(), dec!(10549.92));

        let loan = loan.record_repayment(&repayment(&loan, dec!(879.16))).unwrap();
        assert_eq!(loan.status, LoanStatus::Active);
        assert_eq!(loan.amount_paid, dec!(879.16));
        assert_eq!(loan.last_payment_date, Some(date(2026, 3, 1)));

        let remaining = loan.outstanding().unwrap();
        let loan = loan.record_repayment(&repayment(&loan, remaining)).unwrap();
        assert_eq!(loan.status, LoanStatus::Paid);

        let err = loan.record_repayment(&repayment(&loan, dec!(1))).unwrap_err();
        assert!(matches!(err, DomainError::InvalidState { .. }));
    }

    #[test]
    fn test_overpayment_rejected() {
        let loan = disbursed_loan();
        let err = loan
            .record_repayment(&repayment(&loan, dec!(10549.93)))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn test_repayment_on_pending_rejected() {
        let loan = pending_loan();
        assert!(matches!(
            loan.record_repayment(&repayment(&loan, dec!(10))),
            Err(DomainError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_override_requires_reason() {
        let loan = disbursed_loan();
        assert!(loan.override_status(LoanStatus::Defaulted, " ").is_err());
        assert!(loan.override_status(LoanStatus::Disbursed, "noop").is_err());

        let defaulted = loan
            .override_status(LoanStatus::Defaulted, "no payment in 6 months")
            .unwrap();
        assert_eq!(defaulted.status, LoanStatus::Defaulted);
        assert!(defaulted.notes.unwrap().contains("disbursed -> defaulted"));
    }
}
