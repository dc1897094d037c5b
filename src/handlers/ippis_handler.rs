//! IPPIS Handler
//!
//! Applies payroll deduction files from the government payroll system
//! (IPPIS). Each row credits the member's primary savings account; rows
//! commit independently and failures are reported by row number.

use std::sync::Arc;

use crate::audit::{AuditAction, AuditLogBuilder, AuditLogService};
use crate::domain::validation::non_blank;
use crate::domain::{Amount, OperationContext, TransactionKind, ValidationErrors};
use crate::error::AppResult;
use crate::store::{MemberDirectory, SavingsRepository};

use super::{BatchError, BatchOutcome, PayrollDeductionRow, PayrollUploadCommand};

pub struct IppisHandler {
    savings: Arc<dyn SavingsRepository>,
    members: Arc<dyn MemberDirectory>,
    audit: AuditLogService,
}

impl IppisHandler {
    pub fn new(
        savings: Arc<dyn SavingsRepository>,
        members: Arc<dyn MemberDirectory>,
        audit: AuditLogService,
    ) -> Self {
        Self {
            savings,
            members,
            audit,
        }
    }

    pub async fn apply(&self, command: PayrollUploadCommand, context: &OperationContext) -> AppResult<BatchOutcome> {
        let mut errors = ValidationErrors::new();
        errors.check(
            !(1..=12).contains(&command.month),
            "month",
            "month must be between 1 and 12",
        );
        errors.check(
            !(2000..=2100).contains(&command.year),
            "year",
            "year must be between 2000 and 2100",
        );
        errors.check(command.rows.is_empty(), "rows", "no deduction rows supplied");
        errors.into_result(())?;

        let reference = format!("IPPIS-{}-{:02}", command.year, command.month);
        let mut outcome = BatchOutcome::default();

        for (index, row) in command.rows.iter().enumerate() {
            let row_number = index + 1;
            match self.apply_row(row, &reference).await {
                Ok(amount) => outcome.succeeded(amount.value()),
                Err(message) => {
                    tracing::warn!(row = row_number, error = %message, "Payroll deduction row failed");
                    outcome.failed(BatchError {
                        row: Some(row_number),
                        account_id: None,
                        message,
                    });
                }
            }
        }

        tracing::info!(
            reference = %reference,
            success_count = outcome.success_count,
            error_count = outcome.error_count,
            total = %outcome.total_amount,
            "Payroll deductions applied"
        );
        if outcome.success_count > 0 {
            self.audit
                .log(
                    AuditLogBuilder::new(AuditAction::PayrollDeductionsApplied).after_state(
                        &serde_json::json!({
                            "reference": reference,
                            "success_count": outcome.success_count,
                            "error_count": outcome.error_count,
                            "total_amount": outcome.total_amount,
                        }),
                    ),
                    context,
                )
                .await;
        }

        Ok(outcome)
    }

    async fn apply_row(&self, row: &PayrollDeductionRow, reference: &str) -> Result<Amount, String> {
        let ippis_number =
            non_blank(row.ippis_number.as_deref()).ok_or_else(|| "IPPIS number is required".to_string())?;
        let amount = row
            .amount
            .ok_or_else(|| "amount is required".to_string())
            .and_then(|value| Amount::new(value).map_err(|e| e.to_string()))?;

        let member = self
            .members
            .find_member_by_ippis(&ippis_number)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("unknown IPPIS number {}", ippis_number))?;
        if !member.is_active {
            return Err(format!("member {} is not active", member.member_number));
        }

        let account = self
            .savings
            .accounts_for_member(member.id)
            .await
            .map_err(|e| e.to_string())?
            .into_iter()
            .find(|a| a.is_active())
            .ok_or_else(|| format!("member {} has no active savings account", member.member_number))?;

        self.savings
            .credit_account(account.id, amount, TransactionKind::PayrollDeduction, reference)
            .await
            .map_err(|e| e.to_string())?;
        Ok(amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use rust_decimal_macros::dec;

    fn row(ippis: &str, amount: rust_decimal::Decimal) -> PayrollDeductionRow {
        PayrollDeductionRow {
            ippis_number: Some(ippis.to_string()),
            amount: Some(amount),
        }
    }

    #[tokio::test]
    async fn test_rows_fail_independently() {
        let store = Arc::new(MemoryStore::new());
        let ada = store.seed_member("Ada", Some("IP1001")).await;
        let account = store.seed_account(ada.id, dec!(100), dec!(5)).await.unwrap();
        store.seed_member("Bola", Some("IP1002")).await;
        let handler = IppisHandler::new(store.clone(), store.clone(), AuditLogService::new(store.clone()));

        let command = PayrollUploadCommand {
            month: 4,
            year: 2026,
            rows: vec![
                row("IP1001", dec!(25)),
                row("IP9999", dec!(10)),
                row("IP1002", dec!(10)),
                row("IP1001", dec!(-5)),
                row("IP1001", dec!(15)),
            ],
        };
        let outcome = handler.apply(command, &OperationContext::new()).await.unwrap();

        assert_eq!(outcome.success_count, 2);
        assert_eq!(outcome.error_count, 3);
        let failed_rows: Vec<_> = outcome.errors.iter().filter_map(|e| e.row).collect();
        assert_eq!(failed_rows, vec![2, 3, 4]);

        let stored = store.find_account(account.id).await.unwrap().unwrap();
        assert_eq!(stored.balance.value(), dec!(140));
        let ledger = store.transactions_for(account.id).await.unwrap();
        assert!(ledger.iter().all(|t| t.reference == "IPPIS-2026-04"));
    }

    #[tokio::test]
    async fn test_empty_upload_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let handler = IppisHandler::new(store.clone(), store.clone(), AuditLogService::new(store));
        let command = PayrollUploadCommand {
            month: 0,
            year: 2026,
            rows: Vec::new(),
        };
        assert!(handler.apply(command, &OperationContext::new()).await.is_err());
    }
}
