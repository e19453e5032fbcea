//! Configuration for the firewall process, read from `FIREWALL_*` variables.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::address_book::AddressBookPaths;
use crate::metrics::CollectorConfig;
use crate::upstream::UpstreamConfig;
use crate::validator::{InteractiveConfig, RulesPaths, ValidatorMode};

/// Where collected metrics go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricsBackend {
    /// Metrics disabled
    None,
    /// In-memory store with a periodic summary log line
    Stdout,
    Redis,
}

impl FromStr for MetricsBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "" => Ok(MetricsBackend::None),
            "stdout" | "memory" => Ok(MetricsBackend::Stdout),
            "redis" => Ok(MetricsBackend::Redis),
            other => Err(format!("unknown metrics backend '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FirewallConfig {
    /// Validation policy
    pub mode: ValidatorMode,

    /// Upstream JSON-RPC node
    pub rpc_endpoint: String,

    /// Port the validating proxy listens on
    pub proxy_port: u16,

    /// Port of the admin HTTP server
    pub server_port: u16,

    /// Port of the reviewer WebSocket server
    pub wss_port: u16,

    /// Reviewer round-trip deadline in seconds
    pub interactive_timeout_secs: u64,

    /// Forwarding deadline in milliseconds
    pub upstream_timeout_ms: u64,

    pub authorized_addresses: PathBuf,
    pub known_contracts: PathBuf,
    pub address_rules: PathBuf,
    pub value_rules: PathBuf,
    pub contract_rules: PathBuf,

    pub metrics: MetricsBackend,
    pub redis_url: String,
    pub metrics_interval_ms: u64,
    pub metrics_batch_size: usize,

    /// Multiple of the average fee that flags a transaction
    pub high_fee_factor: f64,
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.into())
}

fn path_var(name: &str, default: &str) -> PathBuf {
    PathBuf::from(expand_path(&var_or(name, default)))
}

impl FirewallConfig {
    pub fn from_env() -> Result<Self> {
        Ok(FirewallConfig {
            mode: var_or("FIREWALL_MODE", "interactive")
                .parse()
                .map_err(anyhow::Error::msg)
                .context("Invalid FIREWALL_MODE")?,
            rpc_endpoint: var_or("FIREWALL_RPC_ENDPOINT", "http://localhost:8545"),
            proxy_port: var_or("FIREWALL_PROXY_PORT", "18545")
                .parse()
                .context("Invalid FIREWALL_PROXY_PORT")?,
            server_port: var_or("FIREWALL_SERVER_PORT", "3000")
                .parse()
                .context("Invalid FIREWALL_SERVER_PORT")?,
            wss_port: var_or("FIREWALL_WSS_PORT", "8546")
                .parse()
                .context("Invalid FIREWALL_WSS_PORT")?,
            interactive_timeout_secs: var_or("FIREWALL_INTERACTIVE_TIMEOUT_SEC", "60")
                .parse()
                .context("Invalid FIREWALL_INTERACTIVE_TIMEOUT_SEC")?,
            upstream_timeout_ms: var_or("FIREWALL_UPSTREAM_TIMEOUT_MS", "30000")
                .parse()
                .context("Invalid FIREWALL_UPSTREAM_TIMEOUT_MS")?,
            authorized_addresses: path_var(
                "FIREWALL_AUTHORIZED_ADDRESSES",
                "config/authorized_addresses.json",
            ),
            known_contracts: path_var("FIREWALL_KNOWN_CONTRACTS", "config/known_contracts.json"),
            address_rules: path_var("FIREWALL_ADDRESS_RULES", "config/address_rules.json"),
            value_rules: path_var("FIREWALL_VALUE_RULES", "config/value_rules.json"),
            contract_rules: path_var("FIREWALL_CONTRACT_RULES", "config/contract_rules.json"),
            metrics: var_or("FIREWALL_METRICS", "stdout")
                .parse()
                .map_err(anyhow::Error::msg)
                .context("Invalid FIREWALL_METRICS")?,
            redis_url: var_or("FIREWALL_REDIS_URL", "redis://127.0.0.1:6379"),
            metrics_interval_ms: var_or("FIREWALL_METRICS_INTERVAL_MS", "10000")
                .parse()
                .context("Invalid FIREWALL_METRICS_INTERVAL_MS")?,
            metrics_batch_size: var_or("FIREWALL_METRICS_BATCH_SIZE", "100")
                .parse()
                .context("Invalid FIREWALL_METRICS_BATCH_SIZE")?,
            high_fee_factor: var_or("FIREWALL_HIGH_FEE_FACTOR", "2.0")
                .parse()
                .context("Invalid FIREWALL_HIGH_FEE_FACTOR")?,
        })
    }

    pub fn address_book_paths(&self) -> AddressBookPaths {
        AddressBookPaths {
            authorized_addresses: self.authorized_addresses.clone(),
            known_contracts: self.known_contracts.clone(),
        }
    }

    pub fn rules_paths(&self) -> RulesPaths {
        RulesPaths {
            address_rules: self.address_rules.clone(),
            value_rules: self.value_rules.clone(),
            contract_rules: self.contract_rules.clone(),
        }
    }

    pub fn interactive(&self) -> InteractiveConfig {
        InteractiveConfig {
            wss_port: self.wss_port,
            timeout: Duration::from_secs(self.interactive_timeout_secs),
        }
    }

    pub fn upstream(&self) -> UpstreamConfig {
        UpstreamConfig {
            endpoint_url: self.rpc_endpoint.clone(),
            timeout_ms: self.upstream_timeout_ms,
        }
    }

    pub fn collector(&self) -> CollectorConfig {
        CollectorConfig {
            interval: Duration::from_millis(self.metrics_interval_ms),
            batch_size: self.metrics_batch_size,
        }
    }

    /// URL the reviewer UI connects to
    pub fn reviewer_url(&self) -> String {
        format!("ws://localhost:{}", self.wss_port)
    }
}

/// Expand ~ to home directory in path
pub fn expand_path(path: &str) -> String {
    if path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            return path.replacen('~', &home.to_string_lossy(), 1);
        }
    }
    path.to_string()
}
