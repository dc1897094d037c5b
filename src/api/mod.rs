//! API module
//!
//! HTTP API endpoints and middleware.

pub mod middleware;
pub mod routes;

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::handlers::Services;

pub use routes::create_router;

/// Build the application router
pub fn build_router(services: Services) -> Router {
    // Layers run last-added first: logging -> auth -> handler
    let protected_routes = create_router()
        .layer(axum::middleware::from_fn_with_state(
            services.clone(),
            middleware::auth_middleware,
        ))
        .layer(axum::middleware::from_fn(middleware::logging_middleware));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", protected_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(services)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}
