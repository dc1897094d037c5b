//! Configuration module
//!
//! Loads configuration from environment variables.

use rust_decimal::Decimal;
use std::env;

use crate::domain::{EligibilityRule, LimitPolicy, LoanPolicy};

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Environment (development, production)
    pub environment: String,

    /// Longest loan term accepted on submission
    pub loan_max_term_months: u32,

    /// Annual rate (percent) applied when a submission omits one
    pub default_loan_interest_rate: Decimal,

    /// Loan limit as a multiple of the member's savings
    pub loan_limit_multiplier: Decimal,

    /// Whether exceeding the loan limit blocks approval
    pub loan_limit_policy: LimitPolicy,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL").ok_or(ConfigError::MissingEnv("DATABASE_URL"))?;

        let database_max_connections = parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", "10")?;

        let host = lookup("HOST").unwrap_or_else(|| "127.0.0.1".to_string());

        let port = parse_or(&lookup, "PORT", "3000")?;

        let environment = lookup("ENVIRONMENT").unwrap_or_else(|| "development".to_string());

        let loan_max_term_months: u32 = parse_or(&lookup, "LOAN_MAX_TERM_MONTHS", "120")?;
        if loan_max_term_months == 0 {
            return Err(ConfigError::InvalidValue("LOAN_MAX_TERM_MONTHS"));
        }

        let default_loan_interest_rate: Decimal = parse_or(&lookup, "DEFAULT_LOAN_INTEREST_RATE", "10")?;
        if default_loan_interest_rate.is_sign_negative() {
            return Err(ConfigError::InvalidValue("DEFAULT_LOAN_INTEREST_RATE"));
        }

        let loan_limit_multiplier: Decimal = parse_or(&lookup, "LOAN_LIMIT_MULTIPLIER", "3")?;
        if loan_limit_multiplier <= Decimal::ZERO {
            return Err(ConfigError::InvalidValue("LOAN_LIMIT_MULTIPLIER"));
        }

        let loan_limit_policy = parse_or(&lookup, "LOAN_LIMIT_POLICY", "advisory")?;

        Ok(Self {
            database_url,
            database_max_connections,
            host,
            port,
            environment,
            loan_max_term_months,
            default_loan_interest_rate,
            loan_limit_multiplier,
            loan_limit_policy,
        })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn loan_policy(&self) -> LoanPolicy {
        LoanPolicy {
            max_term_months: self.loan_max_term_months,
            default_interest_rate: self.default_loan_interest_rate,
        }
    }

    pub fn eligibility_rule(&self) -> EligibilityRule {
        EligibilityRule::new(self.loan_limit_multiplier, self.loan_limit_policy)
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: &str) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .unwrap_or_else(|| default.to_string())
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(key))
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[("DATABASE_URL", "postgres://localhost/coop")])).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.loan_max_term_months, 120);
        assert_eq!(config.default_loan_interest_rate, dec!(10));
        assert_eq!(config.loan_limit_multiplier, dec!(3));
        assert_eq!(config.loan_limit_policy, LimitPolicy::Advisory);
        assert!(!config.is_production());
    }

    #[test]
    fn test_missing_database_url() {
        assert!(matches!(
            Config::from_lookup(lookup(&[])),
            Err(ConfigError::MissingEnv("DATABASE_URL"))
        ));
    }

    #[test]
    fn test_loan_settings() {
        let config = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/coop"),
            ("LOAN_MAX_TERM_MONTHS", "60"),
            ("DEFAULT_LOAN_INTEREST_RATE", "12.5"),
            ("LOAN_LIMIT_POLICY", "enforced"),
        ]))
        .unwrap();
        assert_eq!(config.loan_policy().max_term_months, 60);
        assert_eq!(config.loan_policy().default_interest_rate, dec!(12.5));
        assert_eq!(config.eligibility_rule().policy, LimitPolicy::Enforced);
    }

    #[test]
    fn test_invalid_values() {
        for (key, value) in [
            ("PORT", "http"),
            ("LOAN_MAX_TERM_MONTHS", "0"),
            ("LOAN_LIMIT_MULTIPLIER", "-1"),
            ("LOAN_LIMIT_POLICY", "sometimes"),
        ] {
            let result = Config::from_lookup(lookup(&[("DATABASE_URL", "postgres://x"), (key, value)]));
            assert!(matches!(result, Err(ConfigError::InvalidValue(k)) if k == key), "{}", key);
        }
    }
}
