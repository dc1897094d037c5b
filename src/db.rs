//! Database module
//!
//! Connectivity and schema checks run at startup. The schema itself lives in
//! `migrations/`.

use sqlx::PgPool;

/// Tables created by `migrations/001_init.sql`
pub const REQUIRED_TABLES: &[&str] = &[
    "members",
    "savings_accounts",
    "savings_transactions",
    "interest_postings",
    "loans",
    "loan_repayments",
    "savings_withdrawal_requests",
    "admins",
    "audit_logs",
];

pub async fn verify_connection(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Check if required tables exist
pub async fn check_schema(pool: &PgPool) -> Result<bool, sqlx::Error> {
    for table in REQUIRED_TABLES {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = 'public' AND table_name = $1
            )
            "#,
        )
        .bind(table)
        .fetch_one(pool)
        .await?;

        if !exists {
            tracing::error!(table, "Required table does not exist");
            return Ok(false);
        }
    }

    let admins: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM admins WHERE is_active")
        .fetch_one(pool)
        .await?;
    if admins == 0 {
        tracing::warn!("No active admin API keys; every request will be rejected");
    }

    Ok(true)
}
