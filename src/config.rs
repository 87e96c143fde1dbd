//! Node configuration (spec §6 "Configuration (recognized options)").
//!
//! Every field carries the spec's documented default via
//! `#[serde(default = "fn")]`, the pattern the `ioi-network` pack
//! example uses for its workload configs, so a config file only needs
//! to override the fields it cares about.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::types::U256;

fn default_chain_id() -> String {
    "forge-mini".to_string()
}
fn default_block_time_ms() -> u64 {
    500
}
fn default_is_leader() -> bool {
    false
}
fn default_p2p_port() -> u16 {
    7071
}
fn default_api_port() -> u16 {
    8080
}
fn default_data_dir() -> PathBuf {
    PathBuf::from(".data")
}
fn default_key_file() -> PathBuf {
    PathBuf::from(".keys/ed25519.json")
}
fn default_block_gas_limit() -> u64 {
    30_000_000
}
fn default_min_gas_price() -> U256 {
    U256::from(1_000_000_000u64)
}
fn default_base_fee_per_gas() -> U256 {
    U256::from(1_000_000_000u64)
}
fn default_block_reward() -> U256 {
    U256::from(5u64) * U256::from(10u64).pow(U256::from(18u64))
}
fn default_initial_supply() -> U256 {
    U256::from(10u64).pow(U256::from(9u64)) * U256::from(10u64).pow(U256::from(18u64))
}
fn default_supply_cap() -> U256 {
    default_initial_supply() * U256::from(2u64)
}
fn default_max_tx_per_minute() -> u32 {
    60
}
fn default_mempool_capacity() -> usize {
    50_000
}
fn default_snapshot_interval_blocks() -> u64 {
    1_000
}
fn default_max_txs_per_block() -> usize {
    500
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default = "default_chain_id")]
    pub chain_id: String,

    #[serde(default = "default_block_time_ms")]
    pub block_time_ms: u64,

    #[serde(default = "default_is_leader")]
    pub is_leader: bool,

    #[serde(default = "default_p2p_port")]
    pub p2p_port: u16,

    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "default_key_file")]
    pub key_file: PathBuf,

    #[serde(default = "default_block_gas_limit")]
    pub block_gas_limit: u64,

    #[serde(default = "default_min_gas_price")]
    pub min_gas_price: U256,

    #[serde(default = "default_base_fee_per_gas")]
    pub base_fee_per_gas: U256,

    #[serde(default = "default_block_reward")]
    pub block_reward: U256,

    #[serde(default = "default_initial_supply")]
    pub initial_supply: U256,

    #[serde(default = "default_supply_cap")]
    pub supply_cap: U256,

    /// Not a named §6 option but required to parameterize C4's rate
    /// limiter; defaults to the limiter's own documented default.
    #[serde(default = "default_max_tx_per_minute")]
    pub max_tx_per_minute: u32,

    #[serde(default = "default_mempool_capacity")]
    pub mempool_capacity: usize,

    #[serde(default = "default_snapshot_interval_blocks")]
    pub snapshot_interval_blocks: u64,

    #[serde(default = "default_max_txs_per_block")]
    pub max_txs_per_block: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            chain_id: default_chain_id(),
            block_time_ms: default_block_time_ms(),
            is_leader: default_is_leader(),
            p2p_port: default_p2p_port(),
            api_port: default_api_port(),
            data_dir: default_data_dir(),
            key_file: default_key_file(),
            block_gas_limit: default_block_gas_limit(),
            min_gas_price: default_min_gas_price(),
            base_fee_per_gas: default_base_fee_per_gas(),
            block_reward: default_block_reward(),
            initial_supply: default_initial_supply(),
            supply_cap: default_supply_cap(),
            max_tx_per_minute: default_max_tx_per_minute(),
            mempool_capacity: default_mempool_capacity(),
            snapshot_interval_blocks: default_snapshot_interval_blocks(),
            max_txs_per_block: default_max_txs_per_block(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("initial_supply exceeds supply_cap")]
    InitialSupplyExceedsCap,
    #[error("block_gas_limit must be even (base-fee update divides it by 2)")]
    OddBlockGasLimit,
    #[error("base_fee_per_gas below min_gas_price")]
    BaseFeeBelowFloor,
    #[error("io error loading config: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

impl NodeConfig {
    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: NodeConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_supply > self.supply_cap {
            return Err(ConfigError::InitialSupplyExceedsCap);
        }
        if self.block_gas_limit % 2 != 0 {
            return Err(ConfigError::OddBlockGasLimit);
        }
        if self.base_fee_per_gas < self.min_gas_price {
            return Err(ConfigError::BaseFeeBelowFloor);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let config = NodeConfig::default();
        assert_eq!(config.chain_id, "forge-mini");
        assert_eq!(config.block_time_ms, 500);
        assert_eq!(config.p2p_port, 7071);
        assert_eq!(config.api_port, 8080);
        assert_eq!(config.block_gas_limit, 30_000_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_initial_supply_over_cap() {
        let mut config = NodeConfig::default();
        config.supply_cap = U256::from(1u64);
        config.initial_supply = U256::from(2u64);
        assert!(matches!(config.validate(), Err(ConfigError::InitialSupplyExceedsCap)));
    }

    #[test]
    fn partial_json_fills_in_documented_defaults() {
        let json = r#"{"chain_id": "custom-chain", "is_leader": true}"#;
        let config: NodeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.chain_id, "custom-chain");
        assert!(config.is_leader);
        assert_eq!(config.block_time_ms, 500);
    }
}
