//! Loan eligibility
//!
//! A member may borrow up to a multiple of their savings. Whether exceeding
//! the limit blocks a submission is a configured policy.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// How the savings-multiple limit is applied at submission time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitPolicy {
    /// Reported to the admin, never blocks
    Advisory,
    /// Exceeding the limit is a validation error on `amount`
    Enforced,
}

impl FromStr for LimitPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "advisory" => Ok(Self::Advisory),
            "enforced" => Ok(Self::Enforced),
            other => Err(format!("unknown loan limit policy '{}'", other)),
        }
    }
}

/// Eligibility rule parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EligibilityRule {
    pub multiplier: Decimal,
    pub policy: LimitPolicy,
}

impl EligibilityRule {
    pub fn new(multiplier: Decimal, policy: LimitPolicy) -> Self {
        Self { multiplier, policy }
    }

    pub fn assess(&self, savings_balance: Decimal, requested: Decimal) -> EligibilityAssessment {
        let loan_limit = savings_balance * self.multiplier;
        EligibilityAssessment {
            savings_balance,
            loan_limit,
            requested,
            within_limit: requested <= loan_limit,
            policy: self.policy,
        }
    }
}

impl Default for EligibilityRule {
    fn default() -> Self {
        Self::new(Decimal::from(3), LimitPolicy::Advisory)
    }
}

/// Outcome of checking a request against the limit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EligibilityAssessment {
    pub savings_balance: Decimal,
    pub loan_limit: Decimal,
    pub requested: Decimal,
    pub within_limit: bool,
    pub policy: LimitPolicy,
}

impl EligibilityAssessment {
    /// True when the configured policy rejects this request
    pub fn blocks(&self) -> bool {
        !self.within_limit && self.policy == LimitPolicy::Enforced
    }
}
