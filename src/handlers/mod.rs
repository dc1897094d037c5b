//! Command Handlers module
//!
//! Handlers orchestrate business operations: load aggregates through the
//! repository traits, apply the domain rule, commit, and audit.

mod commands;
mod interest_handler;
mod ippis_handler;
mod loan_handler;
mod repayment_handler;
mod report_handler;
mod withdrawal_handler;


use std::future::Future;
use std::sync::Arc;

use uuid::Uuid;

use crate::audit::AuditLogService;
use crate::domain::{EligibilityRule, LoanPolicy};
use crate::error::{AppError, AppResult};
use crate::store::{
    AdminRepository, AuditRepository, LoanRepository, MemberDirectory, SavingsRepository,
};

pub use commands::*;
pub use interest_handler::InterestHandler;
pub use ippis_handler::IppisHandler;
pub use loan_handler::LoanHandler;
pub use repayment_handler::RepaymentHandler;
pub use report_handler::{PortfolioSummary, ReportHandler, RepaymentReport};
pub use withdrawal_handler::WithdrawalHandler;

/// Attempts for one read-decide-commit cycle under concurrent writers
pub const MAX_ATTEMPTS: u32 = 3;

/// Re-run `op` while its commit loses an optimistic version race.
///
/// Each run reloads the aggregate and re-applies the domain rule, so a
/// request that lost to a concurrent writer fails with the error the new
/// state dictates (e.g. `InvalidState`) instead of a bare conflict.
pub(crate) async fn retry_on_conflict<T, F, Fut>(entity: &'static str, id: Uuid, mut op: F) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Err(AppError::VersionConflict) if attempt < MAX_ATTEMPTS => {
                tracing::warn!(
                    entity,
                    id = %id,
                    "Concurrent modification, reloading (attempt {}/{})",
                    attempt,
                    MAX_ATTEMPTS
                );
                attempt += 1;
            }
            result => return result,
        }
    }
}

/// Every handler, wired to one store
#[derive(Clone)]
pub struct Services {
    pub loans: Arc<LoanHandler>,
    pub repayments: Arc<RepaymentHandler>,
    pub withdrawals: Arc<WithdrawalHandler>,
    pub interest: Arc<InterestHandler>,
    pub ippis: Arc<IppisHandler>,
    pub reports: Arc<ReportHandler>,
    pub audit: AuditLogService,
    pub admins: Arc<dyn AdminRepository>,
}

impl Services {
    pub fn new<S>(store: Arc<S>, policy: LoanPolicy, eligibility: EligibilityRule) -> Self
    where
        S: LoanRepository
            + SavingsRepository
            + MemberDirectory
            + AdminRepository
            + AuditRepository
            + 'static,
    {
        let loans: Arc<dyn LoanRepository> = store.clone();
        let savings: Arc<dyn SavingsRepository> = store.clone();
        let members: Arc<dyn MemberDirectory> = store.clone();
        let audit_repo: Arc<dyn AuditRepository> = store.clone();
        let admins: Arc<dyn AdminRepository> = store;
        let audit = AuditLogService::new(audit_repo);

        Self {
            loans: Arc::new(LoanHandler::new(
                loans.clone(),
                members.clone(),
                audit.clone(),
                policy,
                eligibility,
            )),
            repayments: Arc::new(RepaymentHandler::new(loans.clone(), audit.clone())),
            withdrawals: Arc::new(WithdrawalHandler::new(savings.clone(), audit.clone())),
            interest: Arc::new(InterestHandler::new(savings.clone(), audit.clone())),
            ippis: Arc::new(IppisHandler::new(savings, members, audit.clone())),
            reports: Arc::new(ReportHandler::new(loans)),
            audit,
            admins,
        }
    }
}
