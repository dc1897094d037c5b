//! API Middleware
//!
//! Admin authentication and request logging.

use std::net::IpAddr;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::audit::{sha256_hex, AuditAction, AuditLogBuilder};
use crate::domain::OperationContext;
use crate::error::AppError;
use crate::handlers::Services;

/// Client address as reported by the fronting proxy
fn client_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|ip| ip.trim().parse().ok())
}

fn correlation_id(headers: &HeaderMap) -> Uuid {
    headers
        .get("X-Correlation-Id")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(Uuid::new_v4)
}

// =========================================================================
// Admin API Key Authentication
// =========================================================================

/// Resolve the acting admin from the X-API-Key header and attach the
/// request's `OperationContext` and `AdminUser`
pub async fn auth_middleware(
    State(services): State<Services>,
    headers: HeaderMap,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let mut context = OperationContext::new().with_correlation_id(correlation_id(&headers));
    if let Some(ip) = client_ip(&headers) {
        context = context.with_client_ip(ip);
    }

    let api_key = headers
        .get("X-API-Key")
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::MissingApiKey)?;

    let admin = services
        .admins
        .find_admin_by_key_hash(&sha256_hex(api_key))
        .await?
        .filter(|admin| admin.is_active);

    let Some(admin) = admin else {
        tracing::warn!(
            correlation_id = ?context.correlation_id,
            client_ip = ?context.client_ip,
            "Rejected request with unknown or disabled API key"
        );
        services
            .audit
            .log(AuditLogBuilder::new(AuditAction::AuthFailed), &context)
            .await;
        return Err(AppError::InvalidApiKey);
    };

    let context = context.with_admin(admin.id, admin.name.clone());
    request.extensions_mut().insert(context);
    request.extensions_mut().insert(admin);

    Ok(next.run(request).await)
}

// =========================================================================
// mask_headers_for_logging
// =========================================================================

/// Headers that should be masked in logs
const SENSITIVE_HEADERS: &[&str] = &["x-api-key", "authorization", "cookie", "set-cookie"];

/// Mask sensitive headers for logging
pub fn mask_headers_for_logging(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let name_lower = name.as_str().to_lowercase();
            let masked_value = if SENSITIVE_HEADERS.contains(&name_lower.as_str()) {
                "[REDACTED]".to_string()
            } else {
                value.to_str().unwrap_or("[invalid utf8]").to_string()
            };
            (name.to_string(), masked_value)
        })
        .collect()
}

// =========================================================================
// Request Logging Middleware
// =========================================================================

/// Request logging middleware
pub async fn logging_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let headers = mask_headers_for_logging(request.headers());
    let start = std::time::Instant::now();

    tracing::info!(
        method = %method,
        uri = %uri,
        headers = ?headers,
        "Incoming request"
    );

    let response = next.run(request).await;

    tracing::info!(
        method = %method,
        uri = %uri,
        status = %response.status(),
        duration_ms = %start.elapsed().as_millis(),
        "Request completed"
    );

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_mask_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("X-API-Key", HeaderValue::from_static("secret-key"));
        headers.insert("Content-Type", HeaderValue::from_static("application/json"));

        let masked = mask_headers_for_logging(&headers);
        let api_key = masked.iter().find(|(n, _)| n == "x-api-key").unwrap();
        assert_eq!(api_key.1, "[REDACTED]");
        let content_type = masked.iter().find(|(n, _)| n == "content-type").unwrap();
        assert_eq!(content_type.1, "application/json");
    }

    #[test]
    fn test_client_ip_takes_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Forwarded-For", HeaderValue::from_static("10.0.0.7, 172.16.0.1"));
        assert_eq!(client_ip(&headers), "10.0.0.7".parse().ok());
        assert_eq!(client_ip(&HeaderMap::new()), None);
    }

    #[test]
    fn test_correlation_id_is_parsed_or_generated() {
        let id = Uuid::new_v4();
        let mut headers = HeaderMap::new();
        headers.insert("X-Correlation-Id", HeaderValue::from_str(&id.to_string()).unwrap());
        assert_eq!(correlation_id(&headers), id);
        assert_ne!(correlation_id(&HeaderMap::new()), id);
    }
}
