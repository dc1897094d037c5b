//! coop_loans Library
//!
//! Re-exports modules for integration testing and the server binary.

pub mod api;
pub mod audit;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod store;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use domain::{Amount, AmountError, Balance, DomainError, OperationContext};
pub use handlers::Services;
