//! Domain module
//!
//! Core domain types and business rules.

pub mod amortization;
pub mod amount;
pub mod context;
pub mod eligibility;
pub mod error;
pub mod loan;
pub mod member;
pub mod repayment;
pub mod savings;
pub mod validation;
pub mod withdrawal;

pub use amortization::{PaymentQuote, ScheduleRow};
pub use amount::{Amount, AmountError, Balance};
pub use context::OperationContext;
pub use eligibility::{EligibilityAssessment, EligibilityRule, LimitPolicy};
pub use error::DomainError;
pub use loan::{Disbursement, DisbursementDraft, Loan, LoanDraft, LoanPolicy, LoanStatus, LoanTerms};
pub use member::{Member, MemberSavings};
pub use repayment::{PaymentMethod, Repayment, RepaymentDraft};
pub use savings::{
    AccountStatus, InterestPeriod, InterestPreviewRow, PostingKey, SavingsAccount,
    SavingsTransaction, TransactionKind,
};
pub use validation::{FieldError, ValidationErrors};
pub use withdrawal::{Decision, WithdrawalOutcome, WithdrawalRequest, WithdrawalStatus};
