//! Report Handler
//!
//! Portfolio and repayment aggregates for the admin dashboard.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::{DomainError, LoanStatus};
use crate::error::AppResult;
use crate::store::{LoanFilter, LoanRepository, LoanStatusTotals, MonthlyRepaymentTotals};

#[derive(Debug, Clone, Serialize)]
pub struct PortfolioSummary {
    pub by_status: Vec<LoanStatusTotals>,
    pub total_loans: i64,
    pub total_principal: Decimal,
    pub total_repaid: Decimal,
    /// Still owed on disbursed and active loans
    pub outstanding: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct RepaymentReport {
    pub year: i32,
    pub months: Vec<MonthlyRepaymentTotals>,
    pub total_count: i64,
    pub total_amount: Decimal,
}

pub struct ReportHandler {
    loans: Arc<dyn LoanRepository>,
}

impl ReportHandler {
    pub fn new(loans: Arc<dyn LoanRepository>) -> Self {
        Self { loans }
    }

    pub async fn portfolio_summary(&self) -> AppResult<PortfolioSummary> {
        let by_status = self.loans.loan_status_totals().await?;

        let mut outstanding = Decimal::ZERO;
        for status in [LoanStatus::Disbursed, LoanStatus::Active] {
            let filter = LoanFilter {
                status: Some(status),
                member_id: None,
                limit: i64::MAX,
                offset: 0,
            };
            for loan in self.loans.list_loans(&filter).await? {
                outstanding += loan.outstanding()?;
            }
        }

        Ok(PortfolioSummary {
            total_loans: by_status.iter().map(|t| t.count).sum(),
            total_principal: by_status.iter().map(|t| t.principal).sum(),
            total_repaid: by_status.iter().map(|t| t.amount_paid).sum(),
            outstanding,
            by_status,
        })
    }

    pub async fn repayments_by_month(&self, year: i32) -> AppResult<RepaymentReport> {
        if !(2000..=2100).contains(&year) {
            return Err(DomainError::invalid_field("year", "year must be between 2000 and 2100").into());
        }
        let months = self.loans.repayment_totals_by_month(year).await?;

        Ok(RepaymentReport {
            year,
            total_count: months.iter().map(|m| m.count).sum(),
            total_amount: months.iter().map(|m| m.amount).sum(),
            months,
        })
    }
}
