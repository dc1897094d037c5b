//! Savings accounts
//!
//! Accounts, their transaction ledger, and periodic interest calculation.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::amount::{round_money, Amount, Balance};
use super::error::DomainError;
use super::validation::ValidationErrors;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Active,
    Dormant,
    Closed,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Dormant => "dormant",
            AccountStatus::Closed => "closed",
        }
    }
}

impl FromStr for AccountStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(AccountStatus::Active),
            "dormant" => Ok(AccountStatus::Dormant),
            "closed" => Ok(AccountStatus::Closed),
            other => Err(format!("unknown account status '{}'", other)),
        }
    }
}

/// A member's savings account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavingsAccount {
    pub id: Uuid,
    pub member_id: Uuid,
    pub account_number: String,
    pub balance: Balance,
    /// Annual interest rate, percent
    pub interest_rate: Decimal,
    pub status: AccountStatus,
    pub created_at: DateTime<Utc>,
    pub version: i64,
}

impl SavingsAccount {
    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }

    /// Interest earned for one period, rounded to 2 dp
    pub fn interest_for(&self, period: InterestPeriod) -> Decimal {
        round_money(self.balance.value() * self.interest_rate / Decimal::from(100) / period.divisor())
    }

    pub fn credit(&self, amount: &Amount) -> Result<SavingsAccount, DomainError> {
        let balance = self
            .balance
            .credit(amount)
            .map_err(|e| DomainError::invalid_field("amount", e.to_string()))?;
        Ok(SavingsAccount {
            balance,
            ..self.clone()
        })
    }

    pub fn debit(&self, amount: &Amount) -> Result<SavingsAccount, DomainError> {
        if !self.balance.is_sufficient_for(amount) {
            return Err(DomainError::insufficient_balance(
                amount.value(),
                self.balance.value(),
            ));
        }
        let balance = self
            .balance
            .debit(amount)
            .map_err(|e| DomainError::invalid_field("amount", e.to_string()))?;
        Ok(SavingsAccount {
            balance,
            ..self.clone()
        })
    }
}

/// Interest posting frequency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterestPeriod {
    Monthly,
    Quarterly,
    Annual,
}

impl InterestPeriod {
    pub fn divisor(&self) -> Decimal {
        match self {
            InterestPeriod::Monthly => Decimal::from(12),
            InterestPeriod::Quarterly => Decimal::from(4),
            InterestPeriod::Annual => Decimal::ONE,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InterestPeriod::Monthly => "monthly",
            InterestPeriod::Quarterly => "quarterly",
            InterestPeriod::Annual => "annual",
        }
    }
}

impl fmt::Display for InterestPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The period an interest run covers; one posting per account per key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PostingKey {
    pub period: InterestPeriod,
    pub month: u32,
    pub year: i32,
}

impl PostingKey {
    pub fn new(period: InterestPeriod, month: u32, year: i32) -> Result<Self, DomainError> {
        let mut errors = ValidationErrors::new();
        errors.check(!(1..=12).contains(&month), "month", "month must be between 1 and 12");
        errors.check(
            !(2000..=2100).contains(&year),
            "year",
            "year must be between 2000 and 2100",
        );
        if !errors.is_empty() {
            return Err(DomainError::Validation(errors));
        }
        Ok(Self { period, month, year })
    }

    pub fn reference(&self) -> String {
        format!("INT-{}-{}-{:02}", self.period, self.year, self.month)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Deposit,
    Withdrawal,
    Interest,
    PayrollDeduction,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Deposit => "deposit",
            TransactionKind::Withdrawal => "withdrawal",
            TransactionKind::Interest => "interest",
            TransactionKind::PayrollDeduction => "payroll_deduction",
        }
    }
}

/// Ledger line on a savings account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavingsTransaction {
    pub id: Uuid,
    pub account_id: Uuid,
    pub kind: TransactionKind,
    pub amount: Amount,
    pub balance_after: Balance,
    pub reference: String,
    pub created_at: DateTime<Utc>,
}

impl SavingsTransaction {
    pub fn new(account: &SavingsAccount, kind: TransactionKind, amount: Amount, reference: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id: account.id,
            kind,
            amount,
            balance_after: account.balance,
            reference,
            created_at: Utc::now(),
        }
    }
}

/// Interest preview line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterestPreviewRow {
    pub account_id: Uuid,
    pub account_number: String,
    pub member_id: Uuid,
    pub balance: Decimal,
    pub interest_rate: Decimal,
    pub interest: Decimal,
}

/// Interest due for every eligible account: active, positive balance, and a
/// non-zero result after rounding.
pub fn interest_preview(accounts: &[SavingsAccount], period: InterestPeriod) -> Vec<InterestPreviewRow> {
    accounts
        .iter()
        .filter(|a| a.is_active() && a.balance.is_positive())
        .filter_map(|a| {
            let interest = a.interest_for(period);
            (interest > Decimal::ZERO).then(|| InterestPreviewRow {
                account_id: a.id,
                account_number: a.account_number.clone(),
                member_id: a.member_id,
                balance: a.balance.value(),
                interest_rate: a.interest_rate,
                interest,
            })
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn account(balance: Decimal, rate: Decimal) -> SavingsAccount {
        SavingsAccount {
            id: Uuid::new_v4(),
            member_id: Uuid::new_v4(),
            account_number: "SAV-0001".to_string(),
            balance: Balance::new(balance).unwrap(),
            interest_rate: rate,
            status: AccountStatus::Active,
            created_at: Utc::now(),
            version: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::account;
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_interest_divisors() {
        let acct = account(dec!(12000), dec!(6));
        assert_eq!(acct.interest_for(InterestPeriod::Monthly), dec!(60.00));
        assert_eq!(acct.interest_for(InterestPeriod::Quarterly), dec!(180.00));
        assert_eq!(acct.interest_for(InterestPeriod::Annual), dec!(720.00));
    }

    #[test]
    fn test_preview_skips_inactive_and_empty() {
        let mut dormant = account(dec!(5000), dec!(5));
        dormant.status = AccountStatus::Dormant;
        let accounts = vec![
            account(dec!(1000), dec!(12)),
            account(Decimal::ZERO, dec!(12)),
            dormant,
            account(dec!(0.50), dec!(1)),
        ];

        let rows = interest_preview(&accounts, InterestPeriod::Monthly);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].interest, dec!(10.00));
    }

    #[test]
    fn test_debit_insufficient() {
        let acct = account(dec!(100), dec!(5));
        let err = acct.debit(&Amount::new(dec!(150)).unwrap()).unwrap_err();
        assert_eq!(err, DomainError::insufficient_balance(dec!(150), dec!(100)));
    }

    #[test]
    fn test_posting_key_bounds() {
        assert!(PostingKey::new(InterestPeriod::Monthly, 13, 2026).is_err());
        assert!(PostingKey::new(InterestPeriod::Monthly, 0, 1999).is_err());
        let key = PostingKey::new(InterestPeriod::Quarterly, 3, 2026).unwrap();
        assert_eq!(key.reference(), "INT-quarterly-2026-03");
    }
}
