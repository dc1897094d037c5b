//! Interest Handler
//!
//! Previews and posts periodic savings interest. Posting is a batch in which
//! every account commits on its own; one account failing never undoes the
//! accounts credited before it.

use std::sync::Arc;

use rust_decimal::Decimal;

use crate::audit::{AuditAction, AuditLogBuilder, AuditLogService};
use crate::domain::savings::interest_preview;
use crate::domain::{Amount, OperationContext, PostingKey};
use crate::error::AppResult;
use crate::store::SavingsRepository;

use super::{BatchError, BatchOutcome, InterestPreview, InterestRunCommand};

pub struct InterestHandler {
    savings: Arc<dyn SavingsRepository>,
    audit: AuditLogService,
}

impl InterestHandler {
    pub fn new(savings: Arc<dyn SavingsRepository>, audit: AuditLogService) -> Self {
        Self { savings, audit }
    }

    /// Interest each eligible account would receive, without posting
    pub async fn preview(&self, command: InterestRunCommand) -> AppResult<InterestPreview> {
        let key = PostingKey::new(command.period, command.month, command.year)?;
        let accounts = self.savings.active_accounts().await?;
        let rows = interest_preview(&accounts, key.period);
        let total_interest = rows.iter().map(|r| r.interest).sum::<Decimal>();

        Ok(InterestPreview {
            period: key.period,
            month: key.month,
            year: key.year,
            rows,
            total_interest,
        })
    }

    /// Credit the previewed interest, one account at a time
    pub async fn post(&self, command: InterestRunCommand, context: &OperationContext) -> AppResult<BatchOutcome> {
        let key = PostingKey::new(command.period, command.month, command.year)?;
        let preview = self.preview(command).await?;
        let mut outcome = BatchOutcome::default();

        for row in preview.rows {
            let result = match Amount::new(row.interest) {
                Ok(amount) => self
                    .savings
                    .credit_interest(row.account_id, amount, key)
                    .await
                    .map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };

            match result {
                Ok(_) => outcome.succeeded(row.interest),
                Err(message) => {
                    tracing::warn!(
                        account_id = %row.account_id,
                        reference = %key.reference(),
                        error = %message,
                        "Interest posting failed for account"
                    );
                    outcome.failed(BatchError {
                        row: None,
                        account_id: Some(row.account_id),
                        message,
                    });
                }
            }
        }

        tracing::info!(
            reference = %key.reference(),
            success_count = outcome.success_count,
            error_count = outcome.error_count,
            total = %outcome.total_amount,
            "Interest posting completed"
        );
        if outcome.success_count > 0 {
            self.audit
                .log(
                    AuditLogBuilder::new(AuditAction::InterestPosted).after_state(&serde_json::json!({
                        "reference": key.reference(),
                        "success_count": outcome.success_count,
                        "error_count": outcome.error_count,
                        "total_amount": outcome.total_amount,
                    })),
                    context,
                )
                .await;
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::InterestPeriod;
    use crate::store::MemoryStore;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_preview_rejects_bad_period_bounds() {
        let store = Arc::new(MemoryStore::new());
        let handler = InterestHandler::new(store.clone(), AuditLogService::new(store));
        let command = InterestRunCommand {
            period: InterestPeriod::Monthly,
            month: 13,
            year: 2026,
        };
        assert!(handler.preview(command).await.is_err());
    }

    #[tokio::test]
    async fn test_second_run_for_same_period_posts_nothing() {
        let store = Arc::new(MemoryStore::new());
        let member = store.seed_member("Tunde", None).await;
        let account = store.seed_account(member.id, dec!(2400), dec!(5)).await.unwrap();
        let handler = InterestHandler::new(store.clone(), AuditLogService::new(store.clone()));
        let command = InterestRunCommand {
            period: InterestPeriod::Monthly,
            month: 6,
            year: 2026,
        };
        let context = OperationContext::new();

        let first = handler.post(command, &context).await.unwrap();
        assert_eq!(first.success_count, 1);
        assert_eq!(first.total_amount, dec!(10.00));

        let second = handler.post(command, &context).await.unwrap();
        assert_eq!(second.success_count, 0);
        assert_eq!(second.error_count, 1);
        assert_eq!(second.errors[0].account_id, Some(account.id));

        let stored = store.find_account(account.id).await.unwrap().unwrap();
        assert_eq!(stored.balance.value(), dec!(2410.00));
    }
}
