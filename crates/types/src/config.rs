//! Indexer configuration.
//!
//! Loaded from a TOML file; every struct validates its values after
//! deserialization via `validate()`, and programmatic construction goes
//! through the `bon` builders.

use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use snafu::Snafu;

/// Configuration validation error.
#[derive(Debug, Snafu)]
pub enum ConfigError {
    /// A configuration value is outside its valid range.
    #[snafu(display("invalid config: {message}"))]
    Validation {
        /// Description of the validation failure.
        message: String,
    },
}

/// Smallest permitted bounded-cache capacity.
const MIN_CACHE_CAPACITY: usize = 16;

/// Top-level indexer configuration.
#[derive(Debug, Clone, bon::Builder, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Directory holding the mirror database.
    #[builder(into)]
    pub data_dir: PathBuf,
    /// Node RPC settings.
    pub node: NodeConfig,
    /// Replay-engine settings.
    #[serde(default)]
    #[builder(default)]
    pub engine: EngineConfig,
    /// Bounded-cache ceilings.
    #[serde(default)]
    #[builder(default)]
    pub cache: CacheConfig,
    /// Log output format.
    #[serde(default)]
    #[builder(default)]
    pub log_format: LogFormat,
    /// Genesis accounts, for networks indexed from level 0. Empty on a
    /// database that already holds blocks.
    #[serde(default)]
    #[builder(default)]
    pub bootstrap: Vec<BootstrapAccountConfig>,
}

impl IndexerConfig {
    /// Validates all nested sections.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] for the first violated rule.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.node.validate()?;
        self.cache.validate()
    }
}

/// One genesis account seeded when committing level 0.
#[derive(Debug, Clone, PartialEq, Eq, bon::Builder, Serialize, Deserialize)]
pub struct BootstrapAccountConfig {
    /// Public address.
    #[builder(into)]
    pub address: String,
    /// Initial balance, in mutez.
    pub balance: i64,
    /// Whether the account starts as a registered delegate.
    #[serde(default)]
    #[builder(default)]
    pub delegate: bool,
}

/// Node RPC connection settings.
#[derive(Debug, Clone, bon::Builder, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Base URL of the node RPC.
    #[builder(into)]
    pub endpoint: String,
    /// Request timeout.
    #[serde(default = "default_rpc_timeout", with = "humantime_serde")]
    #[builder(default = default_rpc_timeout())]
    pub timeout: Duration,
    /// Delay between head polls once the mirror has caught up.
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    #[builder(default = default_poll_interval())]
    pub poll_interval: Duration,
}

impl NodeConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.is_empty() {
            return Err(ConfigError::Validation {
                message: "node.endpoint must not be empty".into(),
            });
        }
        Ok(())
    }
}

fn default_rpc_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

/// Replay-engine behavior switches.
#[derive(Debug, Clone, bon::Builder, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Protocol hash to fall back to when the head's protocol is not in
    /// the compiled handler table (test/dev networks).
    #[serde(default)]
    #[builder(into)]
    pub fallback_protocol: Option<String>,
    /// Run protocol-specific structural validation of raw blocks.
    #[serde(default = "default_true")]
    #[builder(default = true)]
    pub validation: bool,
    /// Run the conservation diagnostic after each flush.
    #[serde(default)]
    #[builder(default)]
    pub diagnostics: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { fallback_protocol: None, validation: true, diagnostics: false }
    }
}

fn default_true() -> bool {
    true
}

/// Ceilings for the bounded entity caches.
///
/// # Validation Rules
///
/// Every capacity must be at least 16 entries; the trim pass evicts half
/// a cache at a time and degenerates below that.
#[derive(Debug, Clone, PartialEq, Eq, bon::Builder, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum cached accounts.
    #[serde(default = "default_accounts_capacity")]
    #[builder(default = default_accounts_capacity())]
    pub accounts_capacity: usize,
    /// Maximum cached tickets.
    #[serde(default = "default_tickets_capacity")]
    #[builder(default = default_tickets_capacity())]
    pub tickets_capacity: usize,
    /// Maximum cached ticket balances.
    #[serde(default = "default_ticket_balances_capacity")]
    #[builder(default = default_ticket_balances_capacity())]
    pub ticket_balances_capacity: usize,
    /// How many recent block rows to keep hot.
    #[serde(default = "default_blocks_capacity")]
    #[builder(default = default_blocks_capacity())]
    pub blocks_capacity: usize,
}

impl CacheConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("cache.accounts_capacity", self.accounts_capacity),
            ("cache.tickets_capacity", self.tickets_capacity),
            ("cache.ticket_balances_capacity", self.ticket_balances_capacity),
            ("cache.blocks_capacity", self.blocks_capacity),
        ] {
            if value < MIN_CACHE_CAPACITY {
                return Err(ConfigError::Validation {
                    message: format!("{name} must be at least {MIN_CACHE_CAPACITY}"),
                });
            }
        }
        Ok(())
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            accounts_capacity: default_accounts_capacity(),
            tickets_capacity: default_tickets_capacity(),
            ticket_balances_capacity: default_ticket_balances_capacity(),
            blocks_capacity: default_blocks_capacity(),
        }
    }
}

fn default_accounts_capacity() -> usize {
    100_000
}

fn default_tickets_capacity() -> usize {
    50_000
}

fn default_ticket_balances_capacity() -> usize {
    100_000
}

fn default_blocks_capacity() -> usize {
    128
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable format (development).
    #[default]
    Text,
    /// JSON structured logging (production).
    Json,
}

/// Serde adapter for `Duration` as a human-readable string ("30s").
mod humantime_serde {
    use std::time::Duration;

    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format!("{}s", d.as_secs()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        let trimmed = raw.strip_suffix('s').unwrap_or(&raw);
        trimmed
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| D::Error::custom(format!("invalid duration: {raw}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults_validate() {
        let config = IndexerConfig::builder()
            .data_dir("/tmp/tzmirror")
            .node(NodeConfig::builder().endpoint("http://localhost:8732").build())
            .build();
        config.validate().expect("default config is valid");
    }

    #[test]
    fn test_empty_endpoint_rejected() {
        let config = IndexerConfig::builder()
            .data_dir("/tmp/tzmirror")
            .node(NodeConfig::builder().endpoint("").build())
            .build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tiny_cache_capacity_rejected() {
        let cache = CacheConfig::builder().accounts_capacity(4).build();
        assert!(cache.validate().is_err());
    }
}
