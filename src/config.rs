//! Configuration loading and validation.
//!
//! Layered with the `config` crate: defaults → optional `config.toml` →
//! environment variables. Every field has a validated range; a malformed
//! configuration is a fatal startup error raised here, never discovered
//! later at runtime.

use std::time::Duration;

use once_cell::sync::OnceCell;
use serde::Deserialize;

use crate::error::{Error, Result};

static GLOBAL_CONFIG: OnceCell<AppConfig> = OnceCell::new();

#[derive(Debug, Clone, Deserialize)]
pub struct RawAppConfig {
    pub rpc_url: String,
    pub database_url: String,
    pub chain_id: u64,
    pub token_contract_address: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub confirmation_depth: u64,
    #[serde(default = "default_instance_id")]
    pub instance_id: String,
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_health_port")]
    pub health_port: u16,
    #[serde(default = "default_readiness_lag_threshold")]
    pub readiness_lag_threshold: u64,
}

fn default_batch_size() -> u64 {
    10
}
fn default_concurrency() -> usize {
    10
}
fn default_max_retries() -> u32 {
    3
}
fn default_poll_interval_ms() -> u64 {
    3000
}
fn default_instance_id() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "evm-sync".to_string())
}
fn default_rpc_timeout_ms() -> u64 {
    10_000
}
fn default_db_max_connections() -> u32 {
    20
}
fn default_health_port() -> u16 {
    9100
}
fn default_readiness_lag_threshold() -> u64 {
    50
}

/// Hard upper bound enforced regardless of configured `BATCH_SIZE`.
pub const BATCH_CAP: u64 = 1000;
/// Repository-level reorg depth ceiling.
pub const MAX_REORG_DEPTH: u64 = 1000;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub rpc_endpoints: Vec<String>,
    pub database_url: String,
    pub chain_id: u64,
    pub token_contract_address: String,
    pub batch_size: u64,
    pub concurrency: usize,
    pub max_retries: u32,
    pub poll_interval: Duration,
    pub confirmation_depth: u64,
    pub instance_id: String,
    pub rpc_timeout: Duration,
    pub db_max_connections: u32,
    pub health_port: u16,
    pub readiness_lag_threshold: u64,
}

impl AppConfig {
    pub fn from_raw(raw: RawAppConfig) -> Result<Self> {
        let rpc_endpoints: Vec<String> = raw
            .rpc_url
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        if rpc_endpoints.is_empty() {
            return Err(Error::Config("RPC_URL must contain at least one endpoint".into()));
        }
        if raw.rpc_timeout_ms < 1000 {
            return Err(Error::Config("RPC_TIMEOUT_MS must be >= 1000".into()));
        }
        if raw.concurrency == 0 {
            return Err(Error::Config("CONCURRENCY must be >= 1".into()));
        }
        if raw.batch_size == 0 || raw.batch_size > BATCH_CAP {
            return Err(Error::Config(format!("BATCH_SIZE must be in 1..={BATCH_CAP}")));
        }
        if raw.max_retries == 0 {
            return Err(Error::Config("MAX_RETRIES must be >= 1".into()));
        }

        Ok(Self {
            rpc_endpoints,
            database_url: raw.database_url,
            chain_id: raw.chain_id,
            token_contract_address: raw.token_contract_address.to_ascii_lowercase(),
            batch_size: raw.batch_size,
            concurrency: raw.concurrency,
            max_retries: raw.max_retries,
            poll_interval: Duration::from_millis(raw.poll_interval_ms),
            confirmation_depth: raw.confirmation_depth,
            instance_id: raw.instance_id,
            rpc_timeout: Duration::from_millis(raw.rpc_timeout_ms),
            db_max_connections: raw.db_max_connections,
            health_port: raw.health_port,
            readiness_lag_threshold: raw.readiness_lag_threshold,
        })
    }

    /// A startup banner with credentials redacted — never logs the raw
    /// `DATABASE_URL`/`RPC_URL`.
    pub fn redacted_banner(&self) -> String {
        format!(
            "chain_id={} endpoints={} batch_size={} concurrency={} confirmation_depth={} poll_interval_ms={} instance_id={}",
            self.chain_id,
            self.rpc_endpoints.len(),
            self.batch_size,
            self.concurrency,
            self.confirmation_depth,
            self.poll_interval.as_millis(),
            self.instance_id,
        )
    }
}

/// Loads configuration from (in increasing precedence) defaults, an
/// optional `config.toml` in the working directory, and environment
/// variables.
pub fn load() -> Result<AppConfig> {
    load_from(None)
}

/// Same as [`load`], but honors an explicit `--config` path override ahead
/// of the default `config.toml` lookup (the CLI flag takes precedence).
pub fn load_from(config_path: Option<&str>) -> Result<AppConfig> {
    // `--config` may carry a `~`-relative path; expand it the same way a
    // shell would before handing it to the `config` crate, which otherwise
    // treats `~` as a literal path segment.
    let expanded_path = config_path.map(|p| shellexpand::tilde(p).into_owned());
    let file_source = match expanded_path.as_deref() {
        Some(path) => config::File::with_name(path).required(true),
        None => config::File::with_name("config").required(false),
    };

    let builder = config::Config::builder()
        .add_source(file_source)
        .add_source(config::Environment::default());

    let built = builder
        .build()
        .map_err(|e| Error::Config(format!("failed to build configuration: {e}")))?;

    let raw: RawAppConfig = built
        .try_deserialize()
        .map_err(|e| Error::Config(format!("invalid configuration: {e}")))?;

    AppConfig::from_raw(raw)
}

pub fn init_global(config: AppConfig) {
    let _ = GLOBAL_CONFIG.set(config);
}

pub fn global() -> &'static AppConfig {
    GLOBAL_CONFIG
        .get()
        .expect("config::init_global must be called during startup before config::global()")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_raw() -> RawAppConfig {
        RawAppConfig {
            rpc_url: "http://localhost:8545".into(),
            database_url: "postgres://localhost/evm_sync".into(),
            chain_id: 1,
            token_contract_address: "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48".into(),
            batch_size: default_batch_size(),
            concurrency: default_concurrency(),
            max_retries: default_max_retries(),
            poll_interval_ms: default_poll_interval_ms(),
            confirmation_depth: 0,
            instance_id: "test".into(),
            rpc_timeout_ms: default_rpc_timeout_ms(),
            db_max_connections: default_db_max_connections(),
            health_port: default_health_port(),
            readiness_lag_threshold: default_readiness_lag_threshold(),
        }
    }

    #[test]
    fn splits_comma_separated_endpoints() {
        let mut raw = base_raw();
        raw.rpc_url = "http://a, http://b ,http://c".into();
        let cfg = AppConfig::from_raw(raw).unwrap();
        assert_eq!(cfg.rpc_endpoints, vec!["http://a", "http://b", "http://c"]);
    }

    #[test]
    fn rejects_batch_size_over_cap() {
        let mut raw = base_raw();
        raw.batch_size = BATCH_CAP + 1;
        assert!(AppConfig::from_raw(raw).is_err());
    }

    #[test]
    fn rejects_sub_second_rpc_timeout() {
        let mut raw = base_raw();
        raw.rpc_timeout_ms = 500;
        assert!(AppConfig::from_raw(raw).is_err());
    }

    #[test]
    fn lowercases_token_contract_address() {
        let raw = base_raw();
        let cfg = AppConfig::from_raw(raw).unwrap();
        assert_eq!(cfg.token_contract_address, "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48");
    }
}
