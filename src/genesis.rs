//! Genesis file format and one-time application (spec §6 "Genesis
//! file").

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::state::StateStore;
use crate::storage::{SharedStorage, Storage};
use crate::types::{Account, Address, U256};

#[derive(Debug, Error)]
pub enum GenesisError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("state error: {0}")]
    State(#[from] crate::state::StateError),
    #[error("storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),
    #[error("genesis allocation {0} exceeds initial_supply")]
    AllocationExceedsSupply(U256),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenesisAllocation {
    pub balance: U256,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenesisFile {
    pub chain_id: String,
    pub initial_supply: U256,
    pub block_reward: U256,
    #[serde(default)]
    pub alloc: HashMap<Address, GenesisAllocation>,
}

impl GenesisFile {
    pub fn load(path: &Path) -> Result<Self, GenesisError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }
}

const GENESIS_APPLIED_KEY: &str = "genesis_applied";

/// Applies `genesis` to `state` exactly once, detected via the `meta`
/// namespace (spec §6 "Applied once on first start").
pub fn apply_genesis(
    genesis: &GenesisFile,
    state: &StateStore,
    storage: &SharedStorage,
) -> Result<bool, GenesisError> {
    if storage.get_meta(GENESIS_APPLIED_KEY)?.is_some() {
        return Ok(false);
    }

    let mut allocated = U256::ZERO;
    for (address, allocation) in &genesis.alloc {
        allocated += allocation.balance;
        if allocated > genesis.initial_supply {
            return Err(GenesisError::AllocationExceedsSupply(allocated));
        }
        state.put_account(
            *address,
            Account {
                balance: allocation.balance,
                ..Default::default()
            },
        );
    }
    state.flush_to_storage()?;
    storage.save_meta(GENESIS_APPLIED_KEY, &[1u8])?;
    Ok(true)
}
