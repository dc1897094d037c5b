//! In-process store
//!
//! Holds every table in one mutex-guarded struct so each repository call is
//! atomic, mirroring the transactional guarantees of the PostgreSQL store.

use async_trait::async_trait;
use chrono::{Datelike, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::audit::{sha256_hex, AuditEntry, NewAuditEntry, GENESIS_HASH};
use crate::domain::{
    AccountStatus, Amount, Balance, Loan, LoanStatus, Member, PostingKey, Repayment,
    SavingsAccount, SavingsTransaction, TransactionKind, WithdrawalOutcome, WithdrawalRequest,
    WithdrawalStatus,
};

use super::{
    AdminRepository, AdminUser, AuditRepository, LoanFilter, LoanRepository, LoanStatusTotals,
    MemberDirectory, MonthlyRepaymentTotals, SavingsRepository, StoreError,
};

#[derive(Default)]
struct State {
    members: HashMap<Uuid, Member>,
    accounts: HashMap<Uuid, SavingsAccount>,
    transactions: Vec<SavingsTransaction>,
    postings: HashSet<(Uuid, PostingKey)>,
    loans: HashMap<Uuid, Loan>,
    repayments: Vec<Repayment>,
    withdrawals: HashMap<Uuid, WithdrawalRequest>,
    admins: HashMap<String, AdminUser>,
    audit: Vec<AuditEntry>,
}

impl State {
    fn account_for_update(&self, id: Uuid, expected_version: i64) -> Result<&SavingsAccount, StoreError> {
        let stored = self
            .accounts
            .get(&id)
            .ok_or(StoreError::NotFound { entity: "savings account", id })?;
        if stored.version != expected_version {
            return Err(StoreError::VersionConflict {
                entity: "savings account",
                id,
            });
        }
        Ok(stored)
    }

    fn credit(
        &mut self,
        account_id: Uuid,
        amount: Amount,
        kind: TransactionKind,
        reference: String,
    ) -> Result<SavingsAccount, StoreError> {
        let account = self
            .accounts
            .get(&account_id)
            .ok_or(StoreError::NotFound {
                entity: "savings account",
                id: account_id,
            })?;
        let mut credited = account
            .credit(&amount)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        credited.version += 1;

        let transaction = SavingsTransaction::new(&credited, kind, amount, reference);
        self.transactions.push(transaction);
        self.accounts.insert(account_id, credited.clone());
        Ok(credited)
    }
}

/// Repository backed by process memory
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_member(&self, member: Member) {
        self.state.lock().await.members.insert(member.id, member);
    }

    pub async fn add_account(&self, account: SavingsAccount) {
        self.state.lock().await.accounts.insert(account.id, account);
    }

    /// Register a new member, optionally with an IPPIS number
    pub async fn seed_member(&self, full_name: &str, ippis_number: Option<&str>) -> Member {
        let mut state = self.state.lock().await;
        let member = Member {
            id: Uuid::new_v4(),
            member_number: format!("MEM-{:04}", state.members.len() + 1),
            ippis_number: ippis_number.map(str::to_string),
            full_name: full_name.to_string(),
            is_active: true,
        };
        state.members.insert(member.id, member.clone());
        member
    }

    /// Open an active savings account for a member
    pub async fn seed_account(
        &self,
        member_id: Uuid,
        balance: Decimal,
        interest_rate: Decimal,
    ) -> Result<SavingsAccount, StoreError> {
        let mut state = self.state.lock().await;
        let account = SavingsAccount {
            id: Uuid::new_v4(),
            member_id,
            account_number: format!("SAV-{:04}", state.accounts.len() + 1),
            balance: Balance::new(balance).map_err(|e| StoreError::Corrupt(e.to_string()))?,
            interest_rate,
            status: AccountStatus::Active,
            created_at: Utc::now(),
            version: 0,
        };
        state.accounts.insert(account.id, account.clone());
        Ok(account)
    }

    /// Register an admin that authenticates with `api_key`
    pub async fn add_admin(&self, name: &str, api_key: &str, permissions: &[&str]) -> AdminUser {
        let admin = AdminUser {
            id: Uuid::new_v4(),
            name: name.to_string(),
            permissions: permissions.iter().map(|p| p.to_string()).collect(),
            is_active: true,
        };
        self.state
            .lock()
            .await
            .admins
            .insert(sha256_hex(api_key), admin.clone());
        admin
    }

    /// Overwrite stored audit entries (used to exercise tamper detection)
    pub async fn tamper_audit<F>(&self, f: F)
    where
        F: FnOnce(&mut Vec<AuditEntry>),
    {
        f(&mut self.state.lock().await.audit);
    }
}

#[async_trait]
impl LoanRepository for MemoryStore {
    async fn insert_loan(&self, loan: &Loan) -> Result<Loan, StoreError> {
        let mut state = self.state.lock().await;
        if state.loans.contains_key(&loan.id) {
            return Err(StoreError::Duplicate(format!("loan {}", loan.id)));
        }
        state.loans.insert(loan.id, loan.clone());
        Ok(loan.clone())
    }

    async fn find_loan(&self, id: Uuid) -> Result<Option<Loan>, StoreError> {
        Ok(self.state.lock().await.loans.get(&id).cloned())
    }

    async fn list_loans(&self, filter: &LoanFilter) -> Result<Vec<Loan>, StoreError> {
        let state = self.state.lock().await;
        let mut loans: Vec<Loan> = state
            .loans
            .values()
            .filter(|l| filter.status.map_or(true, |s| l.status == s))
            .filter(|l| filter.member_id.map_or(true, |m| l.member_id == m))
            .cloned()
            .collect();
        loans.sort_by(|a, b| {
            b.application_date
                .cmp(&a.application_date)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(loans
            .into_iter()
            .skip(filter.offset.max(0) as usize)
            .take(filter.limit.max(0) as usize)
            .collect())
    }

    async fn update_loan(&self, loan: &Loan) -> Result<Loan, StoreError> {
        let mut state = self.state.lock().await;
        let stored = state.loans.get(&loan.id).ok_or(StoreError::NotFound {
            entity: "loan",
            id: loan.id,
        })?;
        if stored.version != loan.version {
            return Err(StoreError::VersionConflict {
                entity: "loan",
                id: loan.id,
            });
        }
        let mut updated = loan.clone();
        updated.version += 1;
        state.loans.insert(loan.id, updated.clone());
        Ok(updated)
    }

    async fn record_repayment(&self, loan: &Loan, repayment: &Repayment) -> Result<Loan, StoreError> {
        let mut state = self.state.lock().await;
        let stored = state.loans.get(&loan.id).ok_or(StoreError::NotFound {
            entity: "loan",
            id: loan.id,
        })?;
        if stored.version != loan.version {
            return Err(StoreError::VersionConflict {
                entity: "loan",
                id: loan.id,
            });
        }
        if state
            .repayments
            .iter()
            .any(|r| r.receipt_number == repayment.receipt_number)
        {
            return Err(StoreError::Duplicate(format!(
                "receipt number {} already recorded",
                repayment.receipt_number
            )));
        }
        let mut updated = loan.clone();
        updated.version += 1;
        state.loans.insert(loan.id, updated.clone());
        state.repayments.push(repayment.clone());
        Ok(updated)
    }

    async fn repayments_for(&self, loan_id: Uuid) -> Result<Vec<Repayment>, StoreError> {
        let state = self.state.lock().await;
        let mut repayments: Vec<Repayment> = state
            .repayments
            .iter()
            .filter(|r| r.loan_id == loan_id)
            .cloned()
            .collect();
        repayments.sort_by_key(|r| (r.payment_date, r.recorded_at));
        Ok(repayments)
    }

    async fn loan_status_totals(&self) -> Result<Vec<LoanStatusTotals>, StoreError> {
        let state = self.state.lock().await;
        Ok(LoanStatus::ALL
            .into_iter()
            .filter_map(|status| {
                let loans: Vec<&Loan> = state.loans.values().filter(|l| l.status == status).collect();
                (!loans.is_empty()).then(|| LoanStatusTotals {
                    status,
                    count: loans.len() as i64,
                    principal: loans.iter().map(|l| l.amount.value()).sum(),
                    amount_paid: loans.iter().map(|l| l.amount_paid).sum(),
                })
            })
            .collect())
    }

    async fn repayment_totals_by_month(&self, year: i32) -> Result<Vec<MonthlyRepaymentTotals>, StoreError> {
        let state = self.state.lock().await;
        let mut months: BTreeMap<u32, (i64, Decimal)> = BTreeMap::new();
        for repayment in state.repayments.iter().filter(|r| r.payment_date.year() == year) {
            let entry = months.entry(repayment.payment_date.month()).or_default();
            entry.0 += 1;
            entry.1 += repayment.amount.value();
        }
        Ok(months
            .into_iter()
            .map(|(month, (count, amount))| MonthlyRepaymentTotals { month, count, amount })
            .collect())
    }
}

#[async_trait]
impl SavingsRepository for MemoryStore {
    async fn find_account(&self, id: Uuid) -> Result<Option<SavingsAccount>, StoreError> {
        Ok(self.state.lock().await.accounts.get(&id).cloned())
    }

    async fn accounts_for_member(&self, member_id: Uuid) -> Result<Vec<SavingsAccount>, StoreError> {
        let state = self.state.lock().await;
        let mut accounts: Vec<SavingsAccount> = state
            .accounts
            .values()
            .filter(|a| a.member_id == member_id)
            .cloned()
            .collect();
        accounts.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.account_number.cmp(&b.account_number))
        });
        Ok(accounts)
    }

    async fn active_accounts(&self) -> Result<Vec<SavingsAccount>, StoreError> {
        let state = self.state.lock().await;
        let mut accounts: Vec<SavingsAccount> = state
            .accounts
            .values()
            .filter(|a| a.is_active())
            .cloned()
            .collect();
        accounts.sort_by(|a, b| a.account_number.cmp(&b.account_number));
        Ok(accounts)
    }

    async fn transactions_for(&self, account_id: Uuid) -> Result<Vec<SavingsTransaction>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .transactions
            .iter()
            .filter(|t| t.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn credit_interest(
        &self,
        account_id: Uuid,
        amount: Amount,
        key: PostingKey,
    ) -> Result<SavingsAccount, StoreError> {
        let mut state = self.state.lock().await;
        if state.postings.contains(&(account_id, key)) {
            return Err(StoreError::Duplicate(format!(
                "interest {} already posted to account {}",
                key.reference(),
                account_id
            )));
        }
        let credited = state.credit(account_id, amount, TransactionKind::Interest, key.reference())?;
        state.postings.insert((account_id, key));
        Ok(credited)
    }

    async fn credit_account(
        &self,
        account_id: Uuid,
        amount: Amount,
        kind: TransactionKind,
        reference: &str,
    ) -> Result<SavingsAccount, StoreError> {
        self.state
            .lock()
            .await
            .credit(account_id, amount, kind, reference.to_string())
    }

    async fn insert_withdrawal(&self, request: &WithdrawalRequest) -> Result<WithdrawalRequest, StoreError> {
        let mut state = self.state.lock().await;
        if state.withdrawals.contains_key(&request.request_id) {
            return Err(StoreError::Duplicate(format!("withdrawal {}", request.request_id)));
        }
        state.withdrawals.insert(request.request_id, request.clone());
        Ok(request.clone())
    }

    async fn find_withdrawal(&self, request_id: Uuid) -> Result<Option<WithdrawalRequest>, StoreError> {
        Ok(self.state.lock().await.withdrawals.get(&request_id).cloned())
    }

    async fn pending_withdrawals(&self) -> Result<Vec<WithdrawalRequest>, StoreError> {
        let state = self.state.lock().await;
        let mut pending: Vec<WithdrawalRequest> = state
            .withdrawals
            .values()
            .filter(|w| w.status == WithdrawalStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|w| w.request_date);
        Ok(pending)
    }

    async fn commit_withdrawal(&self, outcome: &WithdrawalOutcome) -> Result<WithdrawalRequest, StoreError> {
        let mut state = self.state.lock().await;
        let request = &outcome.request;
        let stored = state
            .withdrawals
            .get(&request.request_id)
            .ok_or(StoreError::NotFound {
                entity: "withdrawal request",
                id: request.request_id,
            })?;
        if stored.version != request.version {
            return Err(StoreError::VersionConflict {
                entity: "withdrawal request",
                id: request.request_id,
            });
        }

        if let Some((account, transaction)) = &outcome.debit {
            state.account_for_update(account.id, account.version)?;
            let mut debited = account.clone();
            debited.version += 1;
            state.accounts.insert(debited.id, debited);
            state.transactions.push(transaction.clone());
        }

        let mut updated = request.clone();
        updated.version += 1;
        state.withdrawals.insert(updated.request_id, updated.clone());
        Ok(updated)
    }
}

#[async_trait]
impl MemberDirectory for MemoryStore {
    async fn find_member(&self, id: Uuid) -> Result<Option<Member>, StoreError> {
        Ok(self.state.lock().await.members.get(&id).cloned())
    }

    async fn find_member_by_ippis(&self, ippis_number: &str) -> Result<Option<Member>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .members
            .values()
            .find(|m| m.ippis_number.as_deref() == Some(ippis_number))
            .cloned())
    }

    async fn savings_balance(&self, member_id: Uuid) -> Result<Decimal, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .accounts
            .values()
            .filter(|a| a.member_id == member_id && a.is_active())
            .map(|a| a.balance.value())
            .sum())
    }
}

#[async_trait]
impl AdminRepository for MemoryStore {
    async fn find_admin_by_key_hash(&self, key_hash: &str) -> Result<Option<AdminUser>, StoreError> {
        Ok(self.state.lock().await.admins.get(key_hash).cloned())
    }
}

#[async_trait]
impl AuditRepository for MemoryStore {
    async fn append_audit(&self, entry: NewAuditEntry) -> Result<AuditEntry, StoreError> {
        let mut state = self.state.lock().await;
        let (sequence, previous_hash) = match state.audit.last() {
            Some(last) => (last.sequence_number + 1, last.current_hash.clone()),
            None => (1, GENESIS_HASH.to_string()),
        };
        let sealed = entry.seal(sequence, &previous_hash);
        state.audit.push(sealed.clone());
        Ok(sealed)
    }

    async fn audit_chain(&self, limit: i64) -> Result<Vec<AuditEntry>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.audit.iter().take(limit.max(0) as usize).cloned().collect())
    }

    async fn recent_audit(&self, limit: i64) -> Result<Vec<AuditEntry>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .audit
            .iter()
            .rev()
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}
