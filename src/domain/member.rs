//! Members
//!
//! Member identity as supplied by the member directory. The loan engine only
//! reads members; their lifecycle is managed elsewhere.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub id: Uuid,
    pub member_number: String,
    /// Payroll identifier used by IPPIS deduction files
    pub ippis_number: Option<String>,
    pub full_name: String,
    pub is_active: bool,
}

/// Member with their combined savings, as shown on loan forms
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberSavings {
    pub member: Member,
    pub savings_balance: Decimal,
}
