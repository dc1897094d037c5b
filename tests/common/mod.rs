//! Common test utilities

#![allow(dead_code)]

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, Response, StatusCode},
    Router,
};
use coop_loans::domain::{EligibilityRule, LoanPolicy};
use coop_loans::store::MemoryStore;
use coop_loans::{api, Services};
use http_body_util::BodyExt;
use rust_decimal::Decimal;
use serde_json::Value;
use tower::util::ServiceExt;

pub const API_KEY: &str = "test_key_123";
pub const READ_ONLY_KEY: &str = "test_key_clerk";

/// Fresh in-process store with two admins and the full router over it
pub async fn setup_app() -> (Arc<MemoryStore>, Router) {
    setup_app_with(EligibilityRule::default()).await
}

pub async fn setup_app_with(eligibility: EligibilityRule) -> (Arc<MemoryStore>, Router) {
    let store = Arc::new(MemoryStore::new());
    store.add_admin("Treasurer", API_KEY, &["audit:read"]).await;
    store.add_admin("Clerk", READ_ONLY_KEY, &[]).await;

    let services = Services::new(store.clone(), LoanPolicy::default(), eligibility);
    (store, api::build_router(services))
}

pub async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    send_as(app, API_KEY, method, uri, body).await
}

pub async fn send_as(
    app: &Router,
    api_key: &str,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("X-API-Key", api_key);
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    read_json(app.clone().oneshot(request).await.unwrap()).await
}

pub async fn read_json(response: Response<Body>) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, json)
}

/// Decimal from a JSON string or number
pub fn dec(value: &Value) -> Decimal {
    match value {
        Value::String(s) => Decimal::from_str(s).unwrap(),
        Value::Number(n) => Decimal::from_str(&n.to_string()).unwrap(),
        other => panic!("not a decimal: {}", other),
    }
}

/// Connect to `DATABASE_URL` and clear every table
pub async fn setup_test_db() -> sqlx::PgPool {
    dotenvy::dotenv().ok();
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for tests");

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("Failed to connect to DB");

    sqlx::query(
        "TRUNCATE TABLE audit_logs, admins, savings_withdrawal_requests, loan_repayments, loans, \
         interest_postings, savings_transactions, savings_accounts, members CASCADE",
    )
    .execute(&pool)
    .await
    .expect("Failed to clean up DB");

    pool
}

/// Insert a member with one active savings account; returns (member_id, account_id)
pub async fn seed_member_with_account(
    pool: &sqlx::PgPool,
    member_number: &str,
    ippis_number: Option<&str>,
    balance: Decimal,
) -> (uuid::Uuid, uuid::Uuid) {
    let member_id = uuid::Uuid::new_v4();
    let account_id = uuid::Uuid::new_v4();

    sqlx::query("INSERT INTO members (id, member_number, ippis_number, full_name) VALUES ($1, $2, $3, $4)")
        .bind(member_id)
        .bind(member_number)
        .bind(ippis_number)
        .bind(format!("Member {}", member_number))
        .execute(pool)
        .await
        .expect("Failed to seed member");

    sqlx::query(
        "INSERT INTO savings_accounts (id, member_id, account_number, balance, interest_rate) \
         VALUES ($1, $2, $3, $4, 12)",
    )
    .bind(account_id)
    .bind(member_id)
    .bind(format!("SAV-{}", member_number))
    .bind(balance)
    .execute(pool)
    .await
    .expect("Failed to seed savings account");

    (member_id, account_id)
}
