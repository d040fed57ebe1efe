//! Configuration for the custody transaction builder
//!
//! Loaded once at startup from a TOML file, optionally overridden from the
//! environment, then handed to every component. Nothing mutates it after
//! construction.

use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;

use crate::tx_builder::CustodyTxError;

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustodyConfig {
    /// RPC endpoint configuration
    #[serde(default)]
    pub rpc: RpcConfig,

    /// Blockhash acquisition policy
    #[serde(default)]
    pub anchor: AnchorConfig,

    /// Group sizes per operation
    #[serde(default)]
    pub batching: BatchingConfig,

    /// Custodial keys
    #[serde(default)]
    pub keys: KeysConfig,

    /// Pre-flight simulation switches
    #[serde(default)]
    pub simulation: SimulationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    pub endpoint: String,

    /// Request timeout in seconds
    #[serde(default = "default_rpc_timeout")]
    pub timeout_secs: u64,

    /// Commitment level: processed, confirmed or finalized
    #[serde(default = "default_commitment")]
    pub commitment: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnchorConfig {
    #[serde(default = "default_anchor_attempts")]
    pub max_attempts: usize,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Deadline for the whole acquisition loop
    #[serde(default = "default_anchor_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchingConfig {
    #[serde(default = "default_transfer_group_size")]
    pub transfer_group_size: usize,

    /// Assets per delegate+lock transaction
    #[serde(default = "default_lock_group_size")]
    pub lock_group_size: usize,

    /// Assets per unlock+revoke transaction
    #[serde(default = "default_unlock_group_size")]
    pub unlock_group_size: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeysConfig {
    /// Keypair of the custody wallet (default transfer destination)
    #[serde(default)]
    pub custody_keypair_path: String,

    /// Keypair of the utility delegate that locks and unlocks assets
    #[serde(default)]
    pub utility_delegate_keypair_path: String,

    /// Authorization rule set used when an asset does not carry its own
    #[serde(default)]
    pub rule_set: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Also dry-run delegate/lock and unlock/revoke transactions
    #[serde(default = "default_true")]
    pub simulate_custody: bool,
}

// Default value functions
fn default_rpc_endpoint() -> String { "https://api.mainnet-beta.solana.com".to_string() }
fn default_rpc_timeout() -> u64 { 30 }
fn default_commitment() -> String { "confirmed".to_string() }
fn default_anchor_attempts() -> usize { 5 }
fn default_initial_delay_ms() -> u64 { 100 }
fn default_max_delay_ms() -> u64 { 2_000 }
fn default_backoff_multiplier() -> f64 { 2.0 }
fn default_anchor_timeout_ms() -> u64 { 10_000 }
fn default_transfer_group_size() -> usize { 2 }
fn default_lock_group_size() -> usize { 3 }
fn default_unlock_group_size() -> usize { 10 }
fn default_true() -> bool { true }

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            endpoint: default_rpc_endpoint(),
            timeout_secs: default_rpc_timeout(),
            commitment: default_commitment(),
        }
    }
}

impl Default for AnchorConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_anchor_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            timeout_ms: default_anchor_timeout_ms(),
        }
    }
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            transfer_group_size: default_transfer_group_size(),
            lock_group_size: default_lock_group_size(),
            unlock_group_size: default_unlock_group_size(),
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            simulate_custody: true,
        }
    }
}

impl Default for CustodyConfig {
    fn default() -> Self {
        Self {
            rpc: RpcConfig::default(),
            anchor: AnchorConfig::default(),
            batching: BatchingConfig::default(),
            keys: KeysConfig::default(),
            simulation: SimulationConfig::default(),
        }
    }
}

impl AnchorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl CustodyConfig {
    /// Load configuration from TOML file
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: CustodyConfig = toml::from_str(content).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with `.env` and environment variable overrides
    pub fn from_file_with_env(path: &str) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply `CUSTODY_*` overrides from the given lookup
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("CUSTODY_RPC_URL") {
            self.rpc.endpoint = url;
        }
        if let Some(path) = lookup("CUSTODY_KEYPAIR_PATH") {
            self.keys.custody_keypair_path = path;
        }
        if let Some(path) = lookup("CUSTODY_DELEGATE_KEYPAIR_PATH") {
            self.keys.utility_delegate_keypair_path = path;
        }
        if let Some(rules) = lookup("CUSTODY_RULE_SET") {
            self.keys.rule_set = Some(rules);
        }
    }

    /// Parsed fallback rule set, if one is configured
    pub fn rule_set(&self) -> Result<Option<Pubkey>, CustodyTxError> {
        self.keys
            .rule_set
            .as_deref()
            .map(|s| {
                Pubkey::from_str(s).map_err(|e| {
                    CustodyTxError::Configuration(format!("invalid rule_set '{}': {}", s, e))
                })
            })
            .transpose()
    }

    pub fn validate(&self) -> Result<(), CustodyTxError> {
        let batching = &self.batching;
        if batching.transfer_group_size == 0
            || batching.lock_group_size == 0
            || batching.unlock_group_size == 0
        {
            return Err(CustodyTxError::Configuration(
                "group sizes must be greater than zero".to_string(),
            ));
        }
        if self.anchor.max_attempts == 0 {
            return Err(CustodyTxError::Configuration(
                "anchor.max_attempts must be greater than zero".to_string(),
            ));
        }
        if self.anchor.timeout_ms == 0 {
            return Err(CustodyTxError::Configuration(
                "anchor.timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.anchor.backoff_multiplier < 1.0 {
            return Err(CustodyTxError::Configuration(
                "anchor.backoff_multiplier must be at least 1.0".to_string(),
            ));
        }
        if self.rpc.endpoint.is_empty() {
            return Err(CustodyTxError::Configuration(
                "rpc.endpoint must not be empty".to_string(),
            ));
        }
        self.rule_set()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_match_operation_limits() {
        let config = CustodyConfig::default();
        assert_eq!(config.batching.transfer_group_size, 2);
        assert_eq!(config.batching.lock_group_size, 3);
        assert_eq!(config.batching.unlock_group_size, 10);
        assert!(config.simulation.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_toml() {
        let config = CustodyConfig::from_toml_str(
            r#"
            [rpc]
            endpoint = "http://127.0.0.1:8899"

            [batching]
            transfer_group_size = 4

            [keys]
            custody_keypair_path = "/etc/custody/custody.json"
            "#,
        )
        .unwrap();

        assert_eq!(config.rpc.endpoint, "http://127.0.0.1:8899");
        assert_eq!(config.rpc.commitment, "confirmed");
        assert_eq!(config.batching.transfer_group_size, 4);
        assert_eq!(config.batching.lock_group_size, 3);
        assert_eq!(config.anchor.max_attempts, 5);
        assert_eq!(config.keys.custody_keypair_path, "/etc/custody/custody.json");
    }

    #[test]
    fn test_zero_group_size_rejected() {
        let result = CustodyConfig::from_toml_str(
            r#"
            [batching]
            unlock_group_size = 0
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_rule_set_rejected() {
        let mut config = CustodyConfig::default();
        config.keys.rule_set = Some("not-a-pubkey".to_string());
        assert!(matches!(
            config.validate(),
            Err(CustodyTxError::Configuration(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let rules = Pubkey::new_unique();
        let env: HashMap<&str, String> = [
            ("CUSTODY_RPC_URL", "http://override:8899".to_string()),
            ("CUSTODY_RULE_SET", rules.to_string()),
        ]
        .into_iter()
        .collect();

        let mut config = CustodyConfig::default();
        config.apply_env_overrides(|key| env.get(key).cloned());

        assert_eq!(config.rpc.endpoint, "http://override:8899");
        assert_eq!(config.rule_set().unwrap(), Some(rules));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custody.toml");
        std::fs::write(&path, "[anchor]\nmax_attempts = 2\n").unwrap();

        let config = CustodyConfig::from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(config.anchor.max_attempts, 2);
        assert_eq!(config.anchor.timeout(), Duration::from_millis(10_000));
    }
}
