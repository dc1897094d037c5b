//! Persistence gateway
//!
//! Repository traits the handlers depend on, with a PostgreSQL implementation
//! for production and an in-process implementation for tests and demos.
//!
//! Writes that change an aggregate are optimistic: the caller passes the
//! aggregate as it was read (including its `version`) with the new field
//! values, and the repository commits only if the stored version is unchanged.

mod error;
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::audit::{AuditEntry, NewAuditEntry};
use crate::domain::{
    Amount, Loan, LoanStatus, Member, PostingKey, Repayment, SavingsAccount, SavingsTransaction,
    TransactionKind, WithdrawalOutcome, WithdrawalRequest,
};

pub use error::StoreError;
pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Loan list filter
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoanFilter {
    #[serde(default)]
    pub status: Option<LoanStatus>,
    #[serde(default)]
    pub member_id: Option<Uuid>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

/// Portfolio totals for one loan status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanStatusTotals {
    pub status: LoanStatus,
    pub count: i64,
    pub principal: Decimal,
    pub amount_paid: Decimal,
}

/// Repayments received in one calendar month
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyRepaymentTotals {
    pub month: u32,
    pub count: i64,
    pub amount: Decimal,
}

/// Admin identified by an API key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminUser {
    pub id: Uuid,
    pub name: String,
    pub permissions: Vec<String>,
    pub is_active: bool,
}

impl AdminUser {
    /// Check if this admin has a specific permission
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission || p == "admin")
    }
}

#[async_trait]
pub trait LoanRepository: Send + Sync {
    async fn insert_loan(&self, loan: &Loan) -> Result<Loan, StoreError>;

    async fn find_loan(&self, id: Uuid) -> Result<Option<Loan>, StoreError>;

    async fn list_loans(&self, filter: &LoanFilter) -> Result<Vec<Loan>, StoreError>;

    /// Commit new loan state if the stored version equals `loan.version`
    async fn update_loan(&self, loan: &Loan) -> Result<Loan, StoreError>;

    /// Commit new loan state and append the repayment in one transaction
    async fn record_repayment(&self, loan: &Loan, repayment: &Repayment) -> Result<Loan, StoreError>;

    async fn repayments_for(&self, loan_id: Uuid) -> Result<Vec<Repayment>, StoreError>;

    async fn loan_status_totals(&self) -> Result<Vec<LoanStatusTotals>, StoreError>;

    async fn repayment_totals_by_month(&self, year: i32) -> Result<Vec<MonthlyRepaymentTotals>, StoreError>;
}

#[async_trait]
pub trait SavingsRepository: Send + Sync {
    async fn find_account(&self, id: Uuid) -> Result<Option<SavingsAccount>, StoreError>;

    /// Accounts of a member, oldest first
    async fn accounts_for_member(&self, member_id: Uuid) -> Result<Vec<SavingsAccount>, StoreError>;

    async fn active_accounts(&self) -> Result<Vec<SavingsAccount>, StoreError>;

    async fn transactions_for(&self, account_id: Uuid) -> Result<Vec<SavingsTransaction>, StoreError>;

    /// Credit one period's interest. Fails with `Duplicate` if this account
    /// already received interest for `key`.
    async fn credit_interest(
        &self,
        account_id: Uuid,
        amount: Amount,
        key: PostingKey,
    ) -> Result<SavingsAccount, StoreError>;

    /// Credit an active account and write the ledger line atomically
    async fn credit_account(
        &self,
        account_id: Uuid,
        amount: Amount,
        kind: TransactionKind,
        reference: &str,
    ) -> Result<SavingsAccount, StoreError>;

    async fn insert_withdrawal(&self, request: &WithdrawalRequest) -> Result<WithdrawalRequest, StoreError>;

    async fn find_withdrawal(&self, request_id: Uuid) -> Result<Option<WithdrawalRequest>, StoreError>;

    async fn pending_withdrawals(&self) -> Result<Vec<WithdrawalRequest>, StoreError>;

    /// Commit a decision: the request (and, on approval, the debited account
    /// and its ledger line) under version checks on both rows.
    async fn commit_withdrawal(&self, outcome: &WithdrawalOutcome) -> Result<WithdrawalRequest, StoreError>;
}

#[async_trait]
pub trait MemberDirectory: Send + Sync {
    async fn find_member(&self, id: Uuid) -> Result<Option<Member>, StoreError>;

    async fn find_member_by_ippis(&self, ippis_number: &str) -> Result<Option<Member>, StoreError>;

    /// Combined balance of the member's active savings accounts
    async fn savings_balance(&self, member_id: Uuid) -> Result<Decimal, StoreError>;
}

#[async_trait]
pub trait AdminRepository: Send + Sync {
    async fn find_admin_by_key_hash(&self, key_hash: &str) -> Result<Option<AdminUser>, StoreError>;
}

#[async_trait]
pub trait AuditRepository: Send + Sync {
    /// Link the entry after the current chain head and store it
    async fn append_audit(&self, entry: NewAuditEntry) -> Result<AuditEntry, StoreError>;

    /// First `limit` entries in sequence order
    async fn audit_chain(&self, limit: i64) -> Result<Vec<AuditEntry>, StoreError>;

    /// Last `limit` entries, newest first
    async fn recent_audit(&self, limit: i64) -> Result<Vec<AuditEntry>, StoreError>;
}
