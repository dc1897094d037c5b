//! Command definitions
//!
//! Inputs accepted by the command handlers and the views they return.
//! Loan and repayment forms live with their domain types (`LoanDraft`,
//! `DisbursementDraft`, `RepaymentDraft`).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{
    Decision, EligibilityAssessment, InterestPeriod, InterestPreviewRow, Loan, LoanStatus,
    MemberSavings, PaymentQuote, Repayment, ScheduleRow,
};

/// Approve or reject a pending application
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoanDecisionCommand {
    #[serde(default)]
    pub notes: Option<String>,
}

/// Force a loan into any status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusOverrideCommand {
    pub status: LoanStatus,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Member-initiated withdrawal
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WithdrawalRequestCommand {
    #[serde(default)]
    pub account_id: Option<Uuid>,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalDecisionCommand {
    pub decision: Decision,
    #[serde(default)]
    pub admin_comment: Option<String>,
}

/// Interest run parameters (preview and post)
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct InterestRunCommand {
    pub period: InterestPeriod,
    pub month: u32,
    pub year: i32,
}

/// One parsed line of an IPPIS payroll deduction file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PayrollDeductionRow {
    #[serde(default)]
    pub ippis_number: Option<String>,
    #[serde(default)]
    pub amount: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayrollUploadCommand {
    pub month: u32,
    pub year: i32,
    pub rows: Vec<PayrollDeductionRow>,
}

/// Loan with its computed repayment figures
#[derive(Debug, Clone, Serialize)]
pub struct LoanView {
    #[serde(flatten)]
    pub loan: Loan,
    pub monthly_payment: Decimal,
    pub total_repayment: Decimal,
    pub total_interest: Decimal,
    pub outstanding_balance: Decimal,
}

impl LoanView {
    pub fn new(loan: Loan, quote: &PaymentQuote) -> Self {
        let outstanding_balance = (quote.total_owed() - loan.amount_paid).max(Decimal::ZERO);
        Self {
            loan,
            monthly_payment: quote.installment,
            total_repayment: quote.total_repayment,
            total_interest: quote.total_interest,
            outstanding_balance,
        }
    }
}

/// Result of a submission
#[derive(Debug, Clone, Serialize)]
pub struct LoanSubmission {
    pub loan: LoanView,
    pub eligibility: EligibilityAssessment,
}

/// Loan detail page
#[derive(Debug, Clone, Serialize)]
pub struct LoanDetails {
    pub loan: LoanView,
    pub member: Option<MemberSavings>,
    pub repayments: Vec<Repayment>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoanSchedule {
    pub loan_id: Uuid,
    pub quote: PaymentQuote,
    pub rows: Vec<ScheduleRow>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RepaymentResult {
    pub repayment: Repayment,
    pub loan: LoanView,
}

#[derive(Debug, Clone, Serialize)]
pub struct InterestPreview {
    pub period: InterestPeriod,
    pub month: u32,
    pub year: i32,
    pub rows: Vec<InterestPreviewRow>,
    pub total_interest: Decimal,
}

/// A failed item of a batch run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchError {
    /// 1-based row number for uploaded files
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<Uuid>,
    pub message: String,
}

/// Result of a batch where every item commits on its own
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchOutcome {
    pub success_count: usize,
    pub error_count: usize,
    pub total_amount: Decimal,
    pub errors: Vec<BatchError>,
}

impl BatchOutcome {
    pub fn succeeded(&mut self, amount: Decimal) {
        self.success_count += 1;
        self.total_amount += amount;
    }

    pub fn failed(&mut self, error: BatchError) {
        self.error_count += 1;
        self.errors.push(error);
    }
}
