//! API Routes
//!
//! HTTP endpoint definitions.

use axum::{
    extract::{Extension, FromRequest, FromRequestParts, Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::audit::{AuditEntry, ChainVerificationResult};
use crate::domain::{
    DisbursementDraft, LoanDraft, OperationContext, PaymentQuote, Repayment, RepaymentDraft,
    WithdrawalRequest,
};
use crate::error::{AppError, AppResult};
use crate::handlers::{
    BatchOutcome, InterestPreview, InterestRunCommand, LoanDecisionCommand, LoanDetails,
    LoanSchedule, LoanSubmission, LoanView, PayrollUploadCommand, PortfolioSummary,
    RepaymentReport, RepaymentResult, Services, StatusOverrideCommand, WithdrawalDecisionCommand,
    WithdrawalRequestCommand,
};
use crate::store::{AdminUser, LoanFilter};

// =========================================================================
// Extractors
// =========================================================================

/// JSON body whose rejection renders as an `AppError`
#[derive(FromRequest)]
#[from_request(via(Json), rejection(AppError))]
pub struct ApiJson<T>(pub T);

/// Query string whose rejection renders as an `AppError`
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(AppError))]
pub struct ApiQuery<T>(pub T);

// =========================================================================
// Query types
// =========================================================================

#[derive(Debug, Deserialize)]
pub struct MonthlyPaymentQuery {
    pub principal: Decimal,
    #[serde(default)]
    pub annual_rate: Decimal,
    pub term_months: u32,
}

#[derive(Debug, Deserialize)]
pub struct RepaymentReportQuery {
    pub year: i32,
}

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    #[serde(default = "default_audit_limit")]
    pub limit: i64,
}

fn default_audit_limit() -> i64 {
    100
}

const AUDIT_READ: &str = "audit:read";

/// API routes, mounted under `/api/v1` behind authentication
pub fn create_router() -> Router<Services> {
    Router::new()
        // Loans
        .route("/loans", post(submit_loan).get(list_loans))
        .route("/loans/:id", get(get_loan).patch(edit_loan))
        .route("/loans/:id/approve", post(approve_loan))
        .route("/loans/:id/reject", post(reject_loan))
        .route("/loans/:id/disburse", post(disburse_loan))
        .route("/loans/:id/status", post(override_loan_status))
        .route("/loans/:id/schedule", get(loan_schedule))
        .route("/loans/:id/repayments", post(record_repayment).get(list_repayments))
        .route("/calculator/monthly-payment", get(monthly_payment))
        // Savings
        .route("/savings/interest/preview", get(preview_interest))
        .route("/savings/interest/post", post(post_interest))
        .route("/savings/ippis", post(apply_payroll_deductions))
        .route("/withdrawals", post(request_withdrawal))
        .route("/withdrawals/pending", get(pending_withdrawals))
        .route("/withdrawals/:id/decision", post(decide_withdrawal))
        // Reports
        .route("/reports/portfolio", get(portfolio_report))
        .route("/reports/repayments", get(repayment_report))
        // Audit
        .route("/admin/audit", get(recent_audit))
        .route("/admin/audit/verify", get(verify_audit))
}

// =========================================================================
// Loan endpoints
// =========================================================================

async fn submit_loan(
    State(services): State<Services>,
    Extension(context): Extension<OperationContext>,
    ApiJson(draft): ApiJson<LoanDraft>,
) -> AppResult<(StatusCode, Json<LoanSubmission>)> {
    let submission = services.loans.submit(draft, &context).await?;
    Ok((StatusCode::CREATED, Json(submission)))
}

async fn list_loans(
    State(services): State<Services>,
    ApiQuery(filter): ApiQuery<LoanFilter>,
) -> AppResult<Json<Vec<LoanView>>> {
    Ok(Json(services.loans.list(&filter).await?))
}

async fn get_loan(State(services): State<Services>, Path(id): Path<Uuid>) -> AppResult<Json<LoanDetails>> {
    Ok(Json(services.loans.get(id).await?))
}

async fn edit_loan(
    State(services): State<Services>,
    Extension(context): Extension<OperationContext>,
    Path(id): Path<Uuid>,
    ApiJson(patch): ApiJson<LoanDraft>,
) -> AppResult<Json<LoanView>> {
    Ok(Json(services.loans.edit(id, patch, &context).await?))
}

async fn approve_loan(
    State(services): State<Services>,
    Extension(context): Extension<OperationContext>,
    Path(id): Path<Uuid>,
    body: Option<ApiJson<LoanDecisionCommand>>,
) -> AppResult<Json<LoanView>> {
    let command = body.map(|ApiJson(c)| c).unwrap_or_default();
    Ok(Json(services.loans.approve(id, command, &context).await?))
}

async fn reject_loan(
    State(services): State<Services>,
    Extension(context): Extension<OperationContext>,
    Path(id): Path<Uuid>,
    body: Option<ApiJson<LoanDecisionCommand>>,
) -> AppResult<Json<LoanView>> {
    let command = body.map(|ApiJson(c)| c).unwrap_or_default();
    Ok(Json(services.loans.reject(id, command, &context).await?))
}

async fn disburse_loan(
    State(services): State<Services>,
    Extension(context): Extension<OperationContext>,
    Path(id): Path<Uuid>,
    ApiJson(draft): ApiJson<DisbursementDraft>,
) -> AppResult<Json<LoanView>> {
    Ok(Json(services.loans.disburse(id, draft, &context).await?))
}

async fn override_loan_status(
    State(services): State<Services>,
    Extension(context): Extension<OperationContext>,
    Path(id): Path<Uuid>,
    ApiJson(command): ApiJson<StatusOverrideCommand>,
) -> AppResult<Json<LoanView>> {
    Ok(Json(services.loans.override_status(id, command, &context).await?))
}

async fn loan_schedule(State(services): State<Services>, Path(id): Path<Uuid>) -> AppResult<Json<LoanSchedule>> {
    Ok(Json(services.loans.schedule(id).await?))
}

async fn record_repayment(
    State(services): State<Services>,
    Extension(context): Extension<OperationContext>,
    Path(id): Path<Uuid>,
    ApiJson(draft): ApiJson<RepaymentDraft>,
) -> AppResult<(StatusCode, Json<RepaymentResult>)> {
    let result = services.repayments.record(id, draft, &context).await?;
    Ok((StatusCode::CREATED, Json(result)))
}

async fn list_repayments(
    State(services): State<Services>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<Repayment>>> {
    Ok(Json(services.repayments.list(id).await?))
}

async fn monthly_payment(
    State(services): State<Services>,
    ApiQuery(query): ApiQuery<MonthlyPaymentQuery>,
) -> AppResult<Json<PaymentQuote>> {
    Ok(Json(services.loans.quote(
        query.principal,
        query.annual_rate,
        query.term_months,
    )?))
}

// =========================================================================
// Savings endpoints
// =========================================================================

async fn preview_interest(
    State(services): State<Services>,
    ApiQuery(command): ApiQuery<InterestRunCommand>,
) -> AppResult<Json<InterestPreview>> {
    Ok(Json(services.interest.preview(command).await?))
}

async fn post_interest(
    State(services): State<Services>,
    Extension(context): Extension<OperationContext>,
    ApiJson(command): ApiJson<InterestRunCommand>,
) -> AppResult<Json<BatchOutcome>> {
    Ok(Json(services.interest.post(command, &context).await?))
}

async fn apply_payroll_deductions(
    State(services): State<Services>,
    Extension(context): Extension<OperationContext>,
    ApiJson(command): ApiJson<PayrollUploadCommand>,
) -> AppResult<Json<BatchOutcome>> {
    Ok(Json(services.ippis.apply(command, &context).await?))
}

async fn request_withdrawal(
    State(services): State<Services>,
    Extension(context): Extension<OperationContext>,
    ApiJson(command): ApiJson<WithdrawalRequestCommand>,
) -> AppResult<(StatusCode, Json<WithdrawalRequest>)> {
    let request = services.withdrawals.request(command, &context).await?;
    Ok((StatusCode::CREATED, Json(request)))
}

async fn pending_withdrawals(State(services): State<Services>) -> AppResult<Json<Vec<WithdrawalRequest>>> {
    Ok(Json(services.withdrawals.pending().await?))
}

async fn decide_withdrawal(
    State(services): State<Services>,
    Extension(context): Extension<OperationContext>,
    Path(id): Path<Uuid>,
    ApiJson(command): ApiJson<WithdrawalDecisionCommand>,
) -> AppResult<Json<WithdrawalRequest>> {
    Ok(Json(services.withdrawals.decide(id, command, &context).await?))
}

// =========================================================================
// Reports
// =========================================================================

async fn portfolio_report(State(services): State<Services>) -> AppResult<Json<PortfolioSummary>> {
    Ok(Json(services.reports.portfolio_summary().await?))
}

async fn repayment_report(
    State(services): State<Services>,
    ApiQuery(query): ApiQuery<RepaymentReportQuery>,
) -> AppResult<Json<RepaymentReport>> {
    Ok(Json(services.reports.repayments_by_month(query.year).await?))
}

// =========================================================================
// Audit
// =========================================================================

async fn recent_audit(
    State(services): State<Services>,
    Extension(admin): Extension<AdminUser>,
    ApiQuery(query): ApiQuery<AuditQuery>,
) -> AppResult<Json<Vec<AuditEntry>>> {
    if !admin.has_permission(AUDIT_READ) {
        return Err(AppError::PermissionDenied);
    }
    Ok(Json(services.audit.recent(query.limit).await?))
}

async fn verify_audit(
    State(services): State<Services>,
    Extension(admin): Extension<AdminUser>,
    ApiQuery(query): ApiQuery<AuditQuery>,
) -> AppResult<Json<ChainVerificationResult>> {
    if !admin.has_permission(AUDIT_READ) {
        return Err(AppError::PermissionDenied);
    }
    let result = services.audit.verify(query.limit).await?;
    if !result.is_valid {
        tracing::error!(
            first_invalid_entry = ?result.first_invalid_entry,
            "Audit log hash chain verification failed"
        );
    }
    Ok(Json(result))
}
