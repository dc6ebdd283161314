// Runtime configuration, read from the environment (and .env via dotenv)

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Default bind address for the HTTP API
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:1234";

/// Default sled database location
pub const DEFAULT_DATA_DIR: &str = "data/ledger.sled";

/// Default timeout for blockchain RPC calls
pub const DEFAULT_RPC_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub data_dir: String,
    /// Solana JSON-RPC endpoint used to look up deposit transactions
    pub solana_rpc_url: Option<String>,
    /// Treasury wallet that receives deposits
    pub treasury_public_key: Option<String>,
    /// Service that signs and submits withdrawal transfers
    pub treasury_signer_url: Option<String>,
    pub min_deposit: Decimal,
    pub min_withdrawal: Decimal,
    /// Accepted difference between the recorded and on-chain deposit amount
    pub deposit_tolerance: Decimal,
    pub rpc_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR
                .parse()
                .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 1234))),
            data_dir: DEFAULT_DATA_DIR.to_string(),
            solana_rpc_url: None,
            treasury_public_key: None,
            treasury_signer_url: None,
            min_deposit: dec!(0.05),
            min_withdrawal: dec!(0.05),
            deposit_tolerance: dec!(0.001),
            rpc_timeout: Duration::from_secs(DEFAULT_RPC_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} {value:?} is invalid: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(key: &'static str, value: &str, reason: impl ToString) -> Self {
        ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key/value source. Missing keys fall back to defaults.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let bind_addr = match var("BIND_ADDR") {
            Some(raw) => raw
                .trim()
                .parse::<SocketAddr>()
                .map_err(|e| ConfigError::invalid("BIND_ADDR", &raw, e))?,
            None => defaults.bind_addr,
        };
        let rpc_timeout = match var("RPC_TIMEOUT_SECS") {
            Some(raw) => Duration::from_secs(
                raw.trim()
                    .parse::<u64>()
                    .map_err(|e| ConfigError::invalid("RPC_TIMEOUT_SECS", &raw, e))?,
            ),
            None => defaults.rpc_timeout,
        };
        let decimal = |key: &'static str, default: Decimal| match var(key) {
            Some(raw) => Decimal::from_str(raw.trim()).map_err(|e| ConfigError::invalid(key, &raw, e)),
            None => Ok(default),
        };
        let non_placeholder = |key: &str| {
            var(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty() && !v.contains("YOUR_") && !v.contains("REPLACE"))
        };

        Ok(Self {
            bind_addr,
            data_dir: var("DATA_DIR").unwrap_or(defaults.data_dir),
            solana_rpc_url: non_placeholder("SOLANA_RPC_URL"),
            treasury_public_key: non_placeholder("TREASURY_PUBLIC_KEY"),
            treasury_signer_url: non_placeholder("TREASURY_SIGNER_URL"),
            min_deposit: decimal("MIN_DEPOSIT", defaults.min_deposit)?,
            min_withdrawal: decimal("MIN_WITHDRAWAL", defaults.min_withdrawal)?,
            deposit_tolerance: decimal("DEPOSIT_TOLERANCE", defaults.deposit_tolerance)?,
            rpc_timeout,
        })
    }

    pub fn log_status(&self) {
        tracing::info!(bind = %self.bind_addr, data_dir = %self.data_dir, "configuration loaded");
        match &self.solana_rpc_url {
            Some(url) => tracing::info!("🔗 Solana RPC: {}", url),
            None => tracing::warn!("⚠️  SOLANA_RPC_URL not set - deposit confirmation disabled"),
        }
        if self.treasury_public_key.is_none() {
            tracing::warn!("⚠️  TREASURY_PUBLIC_KEY not set - deposits cannot be initiated");
        }
        if self.treasury_signer_url.is_none() {
            tracing::warn!("⚠️  TREASURY_SIGNER_URL not set - withdrawals will fail and be rolled back");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.bind_addr.port(), 1234);
        assert_eq!(config.min_deposit, dec!(0.05));
        assert_eq!(config.deposit_tolerance, dec!(0.001));
        assert!(config.solana_rpc_url.is_none());
    }

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_from_lookup_reads_values_and_skips_placeholders() {
        let config = Config::from_lookup(lookup(&[
            ("BIND_ADDR", "127.0.0.1:8080"),
            ("MIN_WITHDRAWAL", " 0.2 "),
            ("SOLANA_RPC_URL", "https://YOUR_RPC_HERE"),
            ("TREASURY_PUBLIC_KEY", "Treasury111"),
        ]))
        .unwrap();

        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.min_withdrawal, dec!(0.2));
        assert_eq!(config.min_deposit, dec!(0.05));
        assert!(config.solana_rpc_url.is_none());
        assert_eq!(config.treasury_public_key.as_deref(), Some("Treasury111"));
    }

    #[test]
    fn test_from_lookup_rejects_bad_values() {
        let err = Config::from_lookup(lookup(&[("MIN_DEPOSIT", "lots")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "MIN_DEPOSIT", .. }));

        let err = Config::from_lookup(lookup(&[("RPC_TIMEOUT_SECS", "-1")])).unwrap_err();
        assert!(err.to_string().starts_with("RPC_TIMEOUT_SECS \"-1\" is invalid"));
    }
}
