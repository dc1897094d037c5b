//! PostgreSQL store
//!
//! Parameterized SQL over a shared pool. Multi-row writes run in one
//! transaction; aggregate updates carry `WHERE version = $n` so a stale
//! writer affects zero rows and gets `VersionConflict`.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::audit::{AuditEntry, NewAuditEntry, GENESIS_HASH};
use crate::domain::{
    Amount, Balance, Loan, Member, PostingKey, Repayment, SavingsAccount, SavingsTransaction,
    TransactionKind, WithdrawalOutcome, WithdrawalRequest,
};

use super::{
    AdminRepository, AdminUser, AuditRepository, LoanFilter, LoanRepository, LoanStatusTotals,
    MemberDirectory, MonthlyRepaymentTotals, SavingsRepository, StoreError,
};

const LOAN_COLUMNS: &str = r#"
    id, member_id, amount, term_months, interest_rate, purpose, status,
    application_date, approval_date, disbursement_date, last_payment_date,
    disbursement_method, collateral, guarantor, notes, amount_paid, version
"#;

const ACCOUNT_COLUMNS: &str = r#"
    id, member_id, account_number, balance, interest_rate, status, created_at, version
"#;

const WITHDRAWAL_COLUMNS: &str = r#"
    request_id, account_id, member_id, amount, reason, status, approved_by,
    admin_comment, request_date, processed_date, version
"#;

const AUDIT_COLUMNS: &str = r#"
    id, sequence_number, admin_id, correlation_id, action, resource_type, resource_id,
    before_state, after_state, client_ip, previous_hash, current_hash, created_at
"#;

fn corrupt(what: &str, e: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupt(format!("{}: {}", what, e))
}

fn parse<T>(what: &str, raw: &str) -> Result<T, StoreError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e| corrupt(what, e))
}

fn amount(what: &str, value: Decimal) -> Result<Amount, StoreError> {
    Amount::new(value).map_err(|e| corrupt(what, e))
}

fn balance(what: &str, value: Decimal) -> Result<Balance, StoreError> {
    Balance::new(value).map_err(|e| corrupt(what, e))
}

#[derive(Debug, FromRow)]
struct LoanRow {
    id: Uuid,
    member_id: Uuid,
    amount: Decimal,
    term_months: i32,
    interest_rate: Decimal,
    purpose: String,
    status: String,
    application_date: NaiveDate,
    approval_date: Option<NaiveDate>,
    disbursement_date: Option<NaiveDate>,
    last_payment_date: Option<NaiveDate>,
    disbursement_method: Option<String>,
    collateral: Option<String>,
    guarantor: Option<String>,
    notes: Option<String>,
    amount_paid: Decimal,
    version: i64,
}

impl TryFrom<LoanRow> for Loan {
    type Error = StoreError;

    fn try_from(row: LoanRow) -> Result<Self, Self::Error> {
        Ok(Loan {
            id: row.id,
            member_id: row.member_id,
            amount: amount("loans.amount", row.amount)?,
            term_months: u32::try_from(row.term_months).map_err(|e| corrupt("loans.term_months", e))?,
            interest_rate: row.interest_rate,
            purpose: row.purpose,
            status: parse("loans.status", &row.status)?,
            application_date: row.application_date,
            approval_date: row.approval_date,
            disbursement_date: row.disbursement_date,
            last_payment_date: row.last_payment_date,
            disbursement_method: row
                .disbursement_method
                .as_deref()
                .map(|m| parse("loans.disbursement_method", m))
                .transpose()?,
            collateral: row.collateral,
            guarantor: row.guarantor,
            notes: row.notes,
            amount_paid: row.amount_paid,
            version: row.version,
        })
    }
}

#[derive(Debug, FromRow)]
struct RepaymentRow {
    id: Uuid,
    loan_id: Uuid,
    amount: Decimal,
    payment_date: NaiveDate,
    payment_method: String,
    receipt_number: String,
    notes: Option<String>,
    recorded_at: DateTime<Utc>,
}

impl TryFrom<RepaymentRow> for Repayment {
    type Error = StoreError;

    fn try_from(row: RepaymentRow) -> Result<Self, Self::Error> {
        Ok(Repayment {
            id: row.id,
            loan_id: row.loan_id,
            amount: amount("loan_repayments.amount", row.amount)?,
            payment_date: row.payment_date,
            payment_method: parse("loan_repayments.payment_method", &row.payment_method)?,
            receipt_number: row.receipt_number,
            notes: row.notes,
            recorded_at: row.recorded_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct AccountRow {
    id: Uuid,
    member_id: Uuid,
    account_number: String,
    balance: Decimal,
    interest_rate: Decimal,
    status: String,
    created_at: DateTime<Utc>,
    version: i64,
}

impl TryFrom<AccountRow> for SavingsAccount {
    type Error = StoreError;

    fn try_from(row: AccountRow) -> Result<Self, Self::Error> {
        Ok(SavingsAccount {
            id: row.id,
            member_id: row.member_id,
            account_number: row.account_number,
            balance: balance("savings_accounts.balance", row.balance)?,
            interest_rate: row.interest_rate,
            status: parse("savings_accounts.status", &row.status)?,
            created_at: row.created_at,
            version: row.version,
        })
    }
}

#[derive(Debug, FromRow)]
struct TransactionRow {
    id: Uuid,
    account_id: Uuid,
    kind: String,
    amount: Decimal,
    balance_after: Decimal,
    reference: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for SavingsTransaction {
    type Error = StoreError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        let kind = match row.kind.as_str() {
            "deposit" => TransactionKind::Deposit,
            "withdrawal" => TransactionKind::Withdrawal,
            "interest" => TransactionKind::Interest,
            "payroll_deduction" => TransactionKind::PayrollDeduction,
            other => return Err(corrupt("savings_transactions.kind", other)),
        };
        Ok(SavingsTransaction {
            id: row.id,
            account_id: row.account_id,
            kind,
            amount: amount("savings_transactions.amount", row.amount)?,
            balance_after: balance("savings_transactions.balance_after", row.balance_after)?,
            reference: row.reference,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct WithdrawalRow {
    request_id: Uuid,
    account_id: Uuid,
    member_id: Uuid,
    amount: Decimal,
    reason: String,
    status: String,
    approved_by: Option<String>,
    admin_comment: Option<String>,
    request_date: DateTime<Utc>,
    processed_date: Option<DateTime<Utc>>,
    version: i64,
}

impl TryFrom<WithdrawalRow> for WithdrawalRequest {
    type Error = StoreError;

    fn try_from(row: WithdrawalRow) -> Result<Self, Self::Error> {
        Ok(WithdrawalRequest {
            request_id: row.request_id,
            account_id: row.account_id,
            member_id: row.member_id,
            amount: amount("savings_withdrawal_requests.amount", row.amount)?,
            reason: row.reason,
            status: parse("savings_withdrawal_requests.status", &row.status)?,
            approved_by: row.approved_by,
            admin_comment: row.admin_comment,
            request_date: row.request_date,
            processed_date: row.processed_date,
            version: row.version,
        })
    }
}

#[derive(Debug, FromRow)]
struct MemberRow {
    id: Uuid,
    member_number: String,
    ippis_number: Option<String>,
    full_name: String,
    is_active: bool,
}

impl From<MemberRow> for Member {
    fn from(row: MemberRow) -> Self {
        Member {
            id: row.id,
            member_number: row.member_number,
            ippis_number: row.ippis_number,
            full_name: row.full_name,
            is_active: row.is_active,
        }
    }
}

#[derive(Debug, FromRow)]
struct AuditRow {
    id: Uuid,
    sequence_number: i64,
    admin_id: Option<Uuid>,
    correlation_id: Option<Uuid>,
    action: String,
    resource_type: Option<String>,
    resource_id: Option<Uuid>,
    before_state: Option<serde_json::Value>,
    after_state: Option<serde_json::Value>,
    client_ip: Option<String>,
    previous_hash: String,
    current_hash: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<AuditRow> for AuditEntry {
    type Error = StoreError;

    fn try_from(row: AuditRow) -> Result<Self, Self::Error> {
        Ok(AuditEntry {
            id: row.id,
            sequence_number: row.sequence_number,
            admin_id: row.admin_id,
            correlation_id: row.correlation_id,
            action: row.action,
            resource_type: row.resource_type,
            resource_id: row.resource_id,
            before_state: row.before_state,
            after_state: row.after_state,
            client_ip: row
                .client_ip
                .as_deref()
                .map(|ip| parse("audit_logs.client_ip", ip))
                .transpose()?,
            previous_hash: row.previous_hash,
            current_hash: row.current_hash,
            created_at: row.created_at,
        })
    }
}

fn convert_all<R, T>(rows: Vec<R>) -> Result<Vec<T>, StoreError>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

/// Repository backed by PostgreSQL
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Write new loan state under the version check
    async fn write_loan(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        loan: &Loan,
    ) -> Result<Loan, StoreError> {
        let row: Option<LoanRow> = sqlx::query_as(&format!(
            r#"
            UPDATE loans
            SET member_id = $3, amount = $4, term_months = $5, interest_rate = $6,
                purpose = $7, status = $8, application_date = $9, approval_date = $10,
                disbursement_date = $11, last_payment_date = $12, disbursement_method = $13,
                collateral = $14, guarantor = $15, notes = $16, amount_paid = $17,
                version = version + 1, updated_at = NOW()
            WHERE id = $1 AND version = $2
            RETURNING {}
            "#,
            LOAN_COLUMNS
        ))
        .bind(loan.id)
        .bind(loan.version)
        .bind(loan.member_id)
        .bind(loan.amount.value())
        .bind(loan.term_months as i32)
        .bind(loan.interest_rate)
        .bind(&loan.purpose)
        .bind(loan.status.as_str())
        .bind(loan.application_date)
        .bind(loan.approval_date)
        .bind(loan.disbursement_date)
        .bind(loan.last_payment_date)
        .bind(loan.disbursement_method.map(|m| m.as_str()))
        .bind(&loan.collateral)
        .bind(&loan.guarantor)
        .bind(&loan.notes)
        .bind(loan.amount_paid)
        .fetch_optional(&mut **tx)
        .await?;

        match row {
            Some(row) => row.try_into(),
            None => Err(self.missing_or_stale(tx, "loans", "id", "loan", loan.id).await),
        }
    }

    /// Distinguish a vanished row from a concurrent update
    async fn missing_or_stale(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        table: &str,
        key: &str,
        entity: &'static str,
        id: Uuid,
    ) -> StoreError {
        let exists: Result<bool, sqlx::Error> = sqlx::query_scalar(&format!(
            "SELECT EXISTS (SELECT 1 FROM {} WHERE {} = $1)",
            table, key
        ))
        .bind(id)
        .fetch_one(&mut **tx)
        .await;

        match exists {
            Ok(true) => StoreError::VersionConflict { entity, id },
            Ok(false) => StoreError::NotFound { entity, id },
            Err(e) => StoreError::Database(e),
        }
    }

    async fn insert_transaction(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        transaction: &SavingsTransaction,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO savings_transactions (
                id, account_id, kind, amount, balance_after, reference, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(transaction.id)
        .bind(transaction.account_id)
        .bind(transaction.kind.as_str())
        .bind(transaction.amount.value())
        .bind(transaction.balance_after.value())
        .bind(&transaction.reference)
        .bind(transaction.created_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Add `amount` to an active account and write the ledger line
    async fn credit_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        account_id: Uuid,
        amount: Amount,
        kind: TransactionKind,
        reference: String,
    ) -> Result<(SavingsAccount, SavingsTransaction), StoreError> {
        let row: Option<AccountRow> = sqlx::query_as(&format!(
            r#"
            UPDATE savings_accounts
            SET balance = balance + $2, version = version + 1
            WHERE id = $1 AND status = 'active'
            RETURNING {}
            "#,
            ACCOUNT_COLUMNS
        ))
        .bind(account_id)
        .bind(amount.value())
        .fetch_optional(&mut **tx)
        .await?;

        let account: SavingsAccount = row
            .ok_or(StoreError::NotFound {
                entity: "active savings account",
                id: account_id,
            })?
            .try_into()?;

        let transaction = SavingsTransaction::new(&account, kind, amount, reference);
        self.insert_transaction(tx, &transaction).await?;
        Ok((account, transaction))
    }
}

#[async_trait]
impl LoanRepository for PgStore {
    async fn insert_loan(&self, loan: &Loan) -> Result<Loan, StoreError> {
        let row: LoanRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO loans (
                id, member_id, amount, term_months, interest_rate, purpose, status,
                application_date, approval_date, disbursement_date, last_payment_date,
                disbursement_method, collateral, guarantor, notes, amount_paid, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            RETURNING {}
            "#,
            LOAN_COLUMNS
        ))
        .bind(loan.id)
        .bind(loan.member_id)
        .bind(loan.amount.value())
        .bind(loan.term_months as i32)
        .bind(loan.interest_rate)
        .bind(&loan.purpose)
        .bind(loan.status.as_str())
        .bind(loan.application_date)
        .bind(loan.approval_date)
        .bind(loan.disbursement_date)
        .bind(loan.last_payment_date)
        .bind(loan.disbursement_method.map(|m| m.as_str()))
        .bind(&loan.collateral)
        .bind(&loan.guarantor)
        .bind(&loan.notes)
        .bind(loan.amount_paid)
        .bind(loan.version)
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn find_loan(&self, id: Uuid) -> Result<Option<Loan>, StoreError> {
        let row: Option<LoanRow> =
            sqlx::query_as(&format!("SELECT {} FROM loans WHERE id = $1", LOAN_COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(Loan::try_from).transpose()
    }

    async fn list_loans(&self, filter: &LoanFilter) -> Result<Vec<Loan>, StoreError> {
        let rows: Vec<LoanRow> = sqlx::query_as(&format!(
            r#"
            SELECT {}
            FROM loans
            WHERE ($1::TEXT IS NULL OR status = $1)
              AND ($2::UUID IS NULL OR member_id = $2)
            ORDER BY application_date DESC, id
            LIMIT $3 OFFSET $4
            "#,
            LOAN_COLUMNS
        ))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.member_id)
        .bind(filter.limit.max(0))
        .bind(filter.offset.max(0))
        .fetch_all(&self.pool)
        .await?;

        convert_all(rows)
    }

    async fn update_loan(&self, loan: &Loan) -> Result<Loan, StoreError> {
        let mut tx = self.pool.begin().await?;
        let updated = self.write_loan(&mut tx, loan).await?;
        tx.commit().await?;
        Ok(updated)
    }

    async fn record_repayment(&self, loan: &Loan, repayment: &Repayment) -> Result<Loan, StoreError> {
        let mut tx = self.pool.begin().await?;
        let updated = self.write_loan(&mut tx, loan).await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO loan_repayments (
                id, loan_id, amount, payment_date, payment_method, receipt_number, notes, recorded_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (receipt_number) DO NOTHING
            "#,
        )
        .bind(repayment.id)
        .bind(repayment.loan_id)
        .bind(repayment.amount.value())
        .bind(repayment.payment_date)
        .bind(repayment.payment_method.as_str())
        .bind(&repayment.receipt_number)
        .bind(&repayment.notes)
        .bind(repayment.recorded_at)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            return Err(StoreError::Duplicate(format!(
                "receipt number {} already recorded",
                repayment.receipt_number
            )));
        }

        tx.commit().await?;
        Ok(updated)
    }

    async fn repayments_for(&self, loan_id: Uuid) -> Result<Vec<Repayment>, StoreError> {
        let rows: Vec<RepaymentRow> = sqlx::query_as(
            r#"
            SELECT id, loan_id, amount, payment_date, payment_method, receipt_number, notes, recorded_at
            FROM loan_repayments
            WHERE loan_id = $1
            ORDER BY payment_date, recorded_at
            "#,
        )
        .bind(loan_id)
        .fetch_all(&self.pool)
        .await?;

        convert_all(rows)
    }

    async fn loan_status_totals(&self) -> Result<Vec<LoanStatusTotals>, StoreError> {
        let rows: Vec<(String, i64, Decimal, Decimal)> = sqlx::query_as(
            r#"
            SELECT status, COUNT(*), COALESCE(SUM(amount), 0), COALESCE(SUM(amount_paid), 0)
            FROM loans
            GROUP BY status
            ORDER BY status
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(status, count, principal, amount_paid)| {
                Ok(LoanStatusTotals {
                    status: parse("loans.status", &status)?,
                    count,
                    principal,
                    amount_paid,
                })
            })
            .collect()
    }

    async fn repayment_totals_by_month(&self, year: i32) -> Result<Vec<MonthlyRepaymentTotals>, StoreError> {
        let rows: Vec<(i32, i64, Decimal)> = sqlx::query_as(
            r#"
            SELECT EXTRACT(MONTH FROM payment_date)::INT, COUNT(*), SUM(amount)
            FROM loan_repayments
            WHERE EXTRACT(YEAR FROM payment_date)::INT = $1
            GROUP BY 1
            ORDER BY 1
            "#,
        )
        .bind(year)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(month, count, amount)| MonthlyRepaymentTotals {
                month: month as u32,
                count,
                amount,
            })
            .collect())
    }
}

#[async_trait]
impl SavingsRepository for PgStore {
    async fn find_account(&self, id: Uuid) -> Result<Option<SavingsAccount>, StoreError> {
        let row: Option<AccountRow> = sqlx::query_as(&format!(
            "SELECT {} FROM savings_accounts WHERE id = $1",
            ACCOUNT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(SavingsAccount::try_from).transpose()
    }

    async fn accounts_for_member(&self, member_id: Uuid) -> Result<Vec<SavingsAccount>, StoreError> {
        let rows: Vec<AccountRow> = sqlx::query_as(&format!(
            r#"
            SELECT {}
            FROM savings_accounts
            WHERE member_id = $1
            ORDER BY created_at, account_number
            "#,
            ACCOUNT_COLUMNS
        ))
        .bind(member_id)
        .fetch_all(&self.pool)
        .await?;

        convert_all(rows)
    }

    async fn active_accounts(&self) -> Result<Vec<SavingsAccount>, StoreError> {
        let rows: Vec<AccountRow> = sqlx::query_as(&format!(
            r#"
            SELECT {}
            FROM savings_accounts
            WHERE status = 'active'
            ORDER BY account_number
            "#,
            ACCOUNT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        convert_all(rows)
    }

    async fn transactions_for(&self, account_id: Uuid) -> Result<Vec<SavingsTransaction>, StoreError> {
        let rows: Vec<TransactionRow> = sqlx::query_as(
            r#"
            SELECT id, account_id, kind, amount, balance_after, reference, created_at
            FROM savings_transactions
            WHERE account_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        convert_all(rows)
    }

    async fn credit_interest(
        &self,
        account_id: Uuid,
        amount: Amount,
        key: PostingKey,
    ) -> Result<SavingsAccount, StoreError> {
        let mut tx = self.pool.begin().await?;
        let (account, transaction) = self
            .credit_in_tx(&mut tx, account_id, amount, TransactionKind::Interest, key.reference())
            .await?;

        let posted = sqlx::query(
            r#"
            INSERT INTO interest_postings (account_id, period, month, year, amount, transaction_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (account_id, period, month, year) DO NOTHING
            "#,
        )
        .bind(account_id)
        .bind(key.period.as_str())
        .bind(key.month as i32)
        .bind(key.year)
        .bind(amount.value())
        .bind(transaction.id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if posted == 0 {
            // Dropping the transaction rolls back the credit
            return Err(StoreError::Duplicate(format!(
                "interest {} already posted to account {}",
                key.reference(),
                account_id
            )));
        }

        tx.commit().await?;
        Ok(account)
    }

    async fn credit_account(
        &self,
        account_id: Uuid,
        amount: Amount,
        kind: TransactionKind,
        reference: &str,
    ) -> Result<SavingsAccount, StoreError> {
        let mut tx = self.pool.begin().await?;
        let (account, _) = self
            .credit_in_tx(&mut tx, account_id, amount, kind, reference.to_string())
            .await?;
        tx.commit().await?;
        Ok(account)
    }

    async fn insert_withdrawal(&self, request: &WithdrawalRequest) -> Result<WithdrawalRequest, StoreError> {
        let row: WithdrawalRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO savings_withdrawal_requests (
                request_id, account_id, member_id, amount, reason, status, approved_by,
                admin_comment, request_date, processed_date, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING {}
            "#,
            WITHDRAWAL_COLUMNS
        ))
        .bind(request.request_id)
        .bind(request.account_id)
        .bind(request.member_id)
        .bind(request.amount.value())
        .bind(&request.reason)
        .bind(request.status.as_str())
        .bind(&request.approved_by)
        .bind(&request.admin_comment)
        .bind(request.request_date)
        .bind(request.processed_date)
        .bind(request.version)
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn find_withdrawal(&self, request_id: Uuid) -> Result<Option<WithdrawalRequest>, StoreError> {
        let row: Option<WithdrawalRow> = sqlx::query_as(&format!(
            "SELECT {} FROM savings_withdrawal_requests WHERE request_id = $1",
            WITHDRAWAL_COLUMNS
        ))
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(WithdrawalRequest::try_from).transpose()
    }

    async fn pending_withdrawals(&self) -> Result<Vec<WithdrawalRequest>, StoreError> {
        let rows: Vec<WithdrawalRow> = sqlx::query_as(&format!(
            r#"
            SELECT {}
            FROM savings_withdrawal_requests
            WHERE status = 'pending'
            ORDER BY request_date
            "#,
            WITHDRAWAL_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        convert_all(rows)
    }

    async fn commit_withdrawal(&self, outcome: &WithdrawalOutcome) -> Result<WithdrawalRequest, StoreError> {
        let request = &outcome.request;
        let mut tx = self.pool.begin().await?;

        let row: Option<WithdrawalRow> = sqlx::query_as(&format!(
            r#"
            UPDATE savings_withdrawal_requests
            SET status = $3, approved_by = $4, admin_comment = $5, processed_date = $6,
                version = version + 1
            WHERE request_id = $1 AND version = $2
            RETURNING {}
            "#,
            WITHDRAWAL_COLUMNS
        ))
        .bind(request.request_id)
        .bind(request.version)
        .bind(request.status.as_str())
        .bind(&request.approved_by)
        .bind(&request.admin_comment)
        .bind(request.processed_date)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Err(self
                .missing_or_stale(
                    &mut tx,
                    "savings_withdrawal_requests",
                    "request_id",
                    "withdrawal request",
                    request.request_id,
                )
                .await);
        };

        if let Some((account, transaction)) = &outcome.debit {
            let updated = sqlx::query(
                r#"
                UPDATE savings_accounts
                SET balance = $3, version = version + 1
                WHERE id = $1 AND version = $2
                "#,
            )
            .bind(account.id)
            .bind(account.version)
            .bind(account.balance.value())
            .execute(&mut *tx)
            .await?
            .rows_affected();

            if updated == 0 {
                return Err(StoreError::VersionConflict {
                    entity: "savings account",
                    id: account.id,
                });
            }
            self.insert_transaction(&mut tx, transaction).await?;
        }

        tx.commit().await?;
        row.try_into()
    }
}

#[async_trait]
impl MemberDirectory for PgStore {
    async fn find_member(&self, id: Uuid) -> Result<Option<Member>, StoreError> {
        let row: Option<MemberRow> = sqlx::query_as(
            "SELECT id, member_number, ippis_number, full_name, is_active FROM members WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Member::from))
    }

    async fn find_member_by_ippis(&self, ippis_number: &str) -> Result<Option<Member>, StoreError> {
        let row: Option<MemberRow> = sqlx::query_as(
            r#"
            SELECT id, member_number, ippis_number, full_name, is_active
            FROM members
            WHERE ippis_number = $1
            "#,
        )
        .bind(ippis_number)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Member::from))
    }

    async fn savings_balance(&self, member_id: Uuid) -> Result<Decimal, StoreError> {
        let total: Decimal = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(balance), 0)
            FROM savings_accounts
            WHERE member_id = $1 AND status = 'active'
            "#,
        )
        .bind(member_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(total)
    }
}

#[async_trait]
impl AdminRepository for PgStore {
    async fn find_admin_by_key_hash(&self, key_hash: &str) -> Result<Option<AdminUser>, StoreError> {
        let row: Option<(Uuid, String, Vec<String>, bool)> = sqlx::query_as(
            r#"
            SELECT id, name, permissions, is_active
            FROM admins
            WHERE api_key_hash = $1
            "#,
        )
        .bind(key_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id, name, permissions, is_active)| AdminUser {
            id,
            name,
            permissions,
            is_active,
        }))
    }
}

#[async_trait]
impl AuditRepository for PgStore {
    async fn append_audit(&self, entry: NewAuditEntry) -> Result<AuditEntry, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Serialize appenders so each entry links to the true chain head
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext('audit_logs'))")
            .execute(&mut *tx)
            .await?;

        let head: Option<(i64, String)> = sqlx::query_as(
            r#"
            SELECT sequence_number, current_hash
            FROM audit_logs
            ORDER BY sequence_number DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&mut *tx)
        .await?;

        let (sequence, previous_hash) = match head {
            Some((seq, hash)) => (seq + 1, hash),
            None => (1, GENESIS_HASH.to_string()),
        };
        let sealed = entry.seal(sequence, &previous_hash);

        sqlx::query(
            r#"
            INSERT INTO audit_logs (
                id, sequence_number, admin_id, correlation_id, action, resource_type, resource_id,
                before_state, after_state, client_ip, previous_hash, current_hash, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(sealed.id)
        .bind(sealed.sequence_number)
        .bind(sealed.admin_id)
        .bind(sealed.correlation_id)
        .bind(&sealed.action)
        .bind(&sealed.resource_type)
        .bind(sealed.resource_id)
        .bind(&sealed.before_state)
        .bind(&sealed.after_state)
        .bind(sealed.client_ip.map(|ip| ip.to_string()))
        .bind(&sealed.previous_hash)
        .bind(&sealed.current_hash)
        .bind(sealed.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(sealed)
    }

    async fn audit_chain(&self, limit: i64) -> Result<Vec<AuditEntry>, StoreError> {
        let rows: Vec<AuditRow> = sqlx::query_as(&format!(
            "SELECT {} FROM audit_logs ORDER BY sequence_number ASC LIMIT $1",
            AUDIT_COLUMNS
        ))
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;

        convert_all(rows)
    }

    async fn recent_audit(&self, limit: i64) -> Result<Vec<AuditEntry>, StoreError> {
        let rows: Vec<AuditRow> = sqlx::query_as(&format!(
            "SELECT {} FROM audit_logs ORDER BY sequence_number DESC LIMIT $1",
            AUDIT_COLUMNS
        ))
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;

        convert_all(rows)
    }
}
