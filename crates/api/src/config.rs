//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use common::{Money, UserId};
use custody::{LedgerConfig, RetryPolicy};

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `DATABASE_URL`: Postgres connection string; unset runs in memory
/// - `SUPERVISOR_ID` / `OWNER_ID`: the two fixed roles (default:
///   `"supervisor"` / `"owner"`)
/// - `COMMISSION_CENTS`: commission per paid-off sale (default: `30000`)
/// - `SETTLEMENT_MAX_ATTEMPTS`: commit attempts on conflict (default: `3`)
/// - `SETTLEMENT_RETRY_BACKOFF_MS`: base retry backoff (default: `25`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub supervisor_id: String,
    pub owner_id: String,
    pub commission_cents: i64,
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup. Unparseable values
    /// fall back to their defaults, as does a commission that is not
    /// positive.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parsed(&lookup, "PORT").unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            supervisor_id: lookup("SUPERVISOR_ID").unwrap_or(defaults.supervisor_id),
            owner_id: lookup("OWNER_ID").unwrap_or(defaults.owner_id),
            commission_cents: parsed(&lookup, "COMMISSION_CENTS")
                .filter(|cents: &i64| *cents > 0)
                .unwrap_or(defaults.commission_cents),
            max_attempts: parsed(&lookup, "SETTLEMENT_MAX_ATTEMPTS").unwrap_or(defaults.max_attempts),
            retry_backoff_ms: parsed(&lookup, "SETTLEMENT_RETRY_BACKOFF_MS")
                .unwrap_or(defaults.retry_backoff_ms),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The ledger settings handed to the custody service.
    pub fn ledger_config(&self) -> LedgerConfig {
        LedgerConfig::new(
            UserId::new(self.supervisor_id.as_str()),
            UserId::new(self.owner_id.as_str()),
        )
        .with_commission(Money::from_cents(self.commission_cents))
        .with_retry(RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.retry_backoff_ms),
        ))
    }
}

fn parsed<T: FromStr>(lookup: impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|v| v.parse().ok())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            database_url: None,
            supervisor_id: "supervisor".to_string(),
            owner_id: "owner".to_string(),
            commission_cents: 30_000,
            max_attempts: 3,
            retry_backoff_ms: 25,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_level, "info");
        assert!(config.database_url.is_none());
        assert_eq!(config.commission_cents, 30_000);
    }

    #[test]
    fn test_addr_formatting() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_lookup_overrides_defaults() {
        let config = Config::from_lookup(lookup(&[
            ("PORT", "8081"),
            ("DATABASE_URL", "postgres://localhost/ledger"),
            ("SUPERVISOR_ID", "carmen"),
            ("COMMISSION_CENTS", "15000"),
            ("SETTLEMENT_MAX_ATTEMPTS", "5"),
        ]));
        assert_eq!(config.port, 8081);
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/ledger")
        );
        assert_eq!(config.supervisor_id, "carmen");
        assert_eq!(config.owner_id, "owner");
        assert_eq!(config.max_attempts, 5);

        let ledger = config.ledger_config();
        assert_eq!(ledger.supervisor, UserId::new("carmen"));
        assert_eq!(ledger.commission_per_sale, Money::from_cents(15_000));
        assert_eq!(ledger.retry.max_attempts, 5);
    }

    #[test]
    fn test_unparseable_values_fall_back() {
        let config = Config::from_lookup(lookup(&[
            ("PORT", "not-a-port"),
            ("COMMISSION_CENTS", "lots"),
            ("DATABASE_URL", ""),
        ]));
        assert_eq!(config.port, 3000);
        assert_eq!(config.commission_cents, 30_000);
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_non_positive_commission_falls_back() {
        for value in ["-100", "0"] {
            let config = Config::from_lookup(lookup(&[("COMMISSION_CENTS", value)]));
            assert_eq!(config.commission_cents, 30_000, "COMMISSION_CENTS={value}");
            assert_eq!(
                config.ledger_config().commission_per_sale,
                Money::from_cents(30_000)
            );
        }
    }
}
