//! Repayments
//!
//! Immutable ledger entries owned by a loan.

use chrono::{DateTime, NaiveDate, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::amount::Amount;
use super::validation::{non_blank, ValidationErrors};

/// Accepted payment channels for repayments and disbursements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentMethod {
    Cash,
    BankTransfer,
    Check,
    MobileMoney,
    CreditCard,
    Other,
}

impl PaymentMethod {
    pub const ALL: [PaymentMethod; 6] = [
        PaymentMethod::Cash,
        PaymentMethod::BankTransfer,
        PaymentMethod::Check,
        PaymentMethod::MobileMoney,
        PaymentMethod::CreditCard,
        PaymentMethod::Other,
    ];

    /// Label as stored and displayed
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "Cash",
            PaymentMethod::BankTransfer => "Bank Transfer",
            PaymentMethod::Check => "Check",
            PaymentMethod::MobileMoney => "Mobile Money",
            PaymentMethod::CreditCard => "Credit Card",
            PaymentMethod::Other => "Other",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = String;

    /// Accepts the display label or its snake_case form ("Bank Transfer", "bank_transfer")
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase().replace(['_', '-'], " ");
        PaymentMethod::ALL
            .into_iter()
            .find(|m| m.as_str().to_ascii_lowercase() == key)
            .ok_or_else(|| format!("unsupported payment method '{}'", s.trim()))
    }
}

/// Parse an optional method field into `errors`
pub(crate) fn parse_method(
    raw: Option<&str>,
    field: &str,
    errors: &mut ValidationErrors,
) -> Option<PaymentMethod> {
    match non_blank(raw) {
        None => {
            errors.add(field, "payment method is required");
            None
        }
        Some(value) => match value.parse() {
            Ok(method) => Some(method),
            Err(message) => {
                errors.add(field, message);
                None
            }
        },
    }
}

/// Unvalidated repayment input
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepaymentDraft {
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub payment_date: Option<NaiveDate>,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub receipt_number: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// A recorded repayment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repayment {
    pub id: Uuid,
    pub loan_id: Uuid,
    pub amount: Amount,
    pub payment_date: NaiveDate,
    pub payment_method: PaymentMethod,
    pub receipt_number: String,
    pub notes: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl RepaymentDraft {
    /// Validate every field and build the ledger entry
    pub fn validate(&self, loan_id: Uuid) -> Result<Repayment, ValidationErrors> {
        let mut errors = ValidationErrors::new();

        let amount = match self.amount {
            None => {
                errors.add("amount", "amount is required");
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
        errors.check(
            self.payment_date.is_none(),
            "payment_date",
            "payment date is required",
        );
        let method = parse_method(self.payment_method.as_deref(), "payment_method", &mut errors);

        match (amount, self.payment_date, method) {
            (Some(amount), Some(payment_date), Some(payment_method)) if errors.is_empty() => {
                Ok(Repayment {
                    id: Uuid::new_v4(),
                    loan_id,
                    amount,
                    payment_date,
                    payment_method,
                    receipt_number: non_blank(self.receipt_number.as_deref())
                        .unwrap_or_else(generate_receipt_number),
                    notes: non_blank(self.notes.as_deref()),
                    recorded_at: Utc::now(),
                })
            }
            _ => Err(errors),
        }
    }
}

/// Receipt reference for repayments recorded without one
pub fn generate_receipt_number() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..8)
        .map(|_| {
            let digit = rng.gen_range(0..36u32);
            char::from_digit(digit, 36).unwrap_or('0').to_ascii_uppercase()
        })
        .collect();
    format!("RCP-{}", suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn draft() -> RepaymentDraft {
        RepaymentDraft {
            amount: Some(dec!(500)),
            payment_date: NaiveDate::from_ymd_opt(2026, 3, 1),
            payment_method: Some("Mobile Money".to_string()),
            receipt_number: None,
            notes: None,
        }
    }

    #[test]
    fn test_payment_method_parse() {
        assert_eq!("Bank Transfer".parse(), Ok(PaymentMethod::BankTransfer));
        assert_eq!("bank_transfer".parse(), Ok(PaymentMethod::BankTransfer));
        assert_eq!("CASH".parse(), Ok(PaymentMethod::Cash));
        assert!("Bitcoin".parse::<PaymentMethod>().is_err());
    }

    #[test]
    fn test_valid_draft_generates_receipt() {
        let loan_id = Uuid::new_v4();
        let repayment = draft().validate(loan_id).unwrap();

        assert_eq!(repayment.loan_id, loan_id);
        assert_eq!(repayment.payment_method, PaymentMethod::MobileMoney);
        assert!(repayment.receipt_number.starts_with("RCP-"));
        assert_eq!(repayment.receipt_number.len(), 12);
    }

    #[test]
    fn test_supplied_receipt_kept() {
        let mut input = draft();
        input.receipt_number = Some(" 000123 ".to_string());
        let repayment = input.validate(Uuid::new_v4()).unwrap();
        assert_eq!(repayment.receipt_number, "000123");
    }

    #[test]
    fn test_all_errors_reported() {
        let errors = RepaymentDraft::default().validate(Uuid::new_v4()).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.has_field("amount"));
        assert!(errors.has_field("payment_date"));
        assert!(errors.has_field("payment_method"));
    }

    #[test]
    fn test_non_positive_amount_rejected() {
        let mut input = draft();
        input.amount = Some(dec!(-5));
        let errors = input.validate(Uuid::new_v4()).unwrap_err();
        assert!(errors.has_field("amount"));
    }
}
