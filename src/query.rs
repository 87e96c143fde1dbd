//! In-process read surface backing the HTTP query endpoints spec §6
//! names (`GET /head`, `/block/{height}`, `/account/{address}`, ...).
//!
//! The HTTP/WS transport itself is out of scope here; this module is
//! the part those endpoints would call into, so it is exercised and
//! tested on its own.

use serde::Serialize;

use crate::crypto::Hash;
use crate::evm;
use crate::state::{StateError, StateStore};
use crate::storage::{SharedStorage, Storage, StorageError};
use crate::types::{Account, Address, Block, Receipt, U256};

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    State(#[from] StateError),
}

/// `GET /supply` response shape.
#[derive(Debug, Serialize)]
pub struct SupplyView {
    pub total_supply: U256,
    pub supply_cap: U256,
    pub percentage_minted: f64,
}

/// `GET /tokenomics` response shape.
#[derive(Debug, Serialize)]
pub struct TokenomicsView {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub block_reward: U256,
    pub min_gas_price: U256,
    pub block_gas_limit: u64,
    pub supply_cap: U256,
}

/// Read-only view over the durable store and live state, handed to
/// the (out-of-scope) HTTP layer.
pub struct QueryService {
    storage: SharedStorage,
    state: std::sync::Arc<StateStore>,
    block_reward: U256,
    min_gas_price: U256,
    block_gas_limit: u64,
    supply_cap: U256,
}

impl QueryService {
    pub fn new(
        storage: SharedStorage,
        state: std::sync::Arc<StateStore>,
        block_reward: U256,
        min_gas_price: U256,
        block_gas_limit: u64,
        supply_cap: U256,
    ) -> Self {
        Self {
            storage,
            state,
            block_reward,
            min_gas_price,
            block_gas_limit,
            supply_cap,
        }
    }

    pub fn get_head(&self) -> Result<Option<Block>, QueryError> {
        match self.storage.get_meta("head_height")? {
            Some(bytes) if bytes.len() == 8 => {
                let mut arr = [0u8; 8];
                arr.copy_from_slice(&bytes);
                Ok(self.storage.get_block_by_height(u64::from_be_bytes(arr))?)
            }
            _ => Ok(None),
        }
    }

    pub fn get_block_by_height(&self, height: u64) -> Result<Option<Block>, QueryError> {
        Ok(self.storage.get_block_by_height(height)?)
    }

    pub fn get_block_by_hash(&self, hash: &Hash) -> Result<Option<Block>, QueryError> {
        Ok(self.storage.get_block_by_hash(hash)?)
    }

    pub fn get_account(&self, address: &Address) -> Result<Account, QueryError> {
        Ok(self.state.get_account(address)?.unwrap_or_default())
    }

    pub fn get_code(&self, address: &Address) -> Result<Option<Vec<u8>>, QueryError> {
        Ok(evm::runtime_code(self.state.as_ref(), address)?.map(|b| b.to_vec()))
    }

    pub fn get_contract_storage(&self, address: &Address, key: &Hash) -> Result<Hash, QueryError> {
        Ok(self.state.get_contract_storage_slot(address, key)?)
    }

    pub fn get_receipt(&self, tx_hash: &Hash) -> Result<Option<Receipt>, QueryError> {
        Ok(self.storage.get_receipt(tx_hash)?)
    }

    fn total_supply(&self) -> Result<U256, QueryError> {
        match self.storage.get_meta("total_supply")? {
            Some(bytes) if bytes.len() == 32 => {
                let mut arr = [0u8; 32];
                arr.copy_from_slice(&bytes);
                Ok(U256::from_be_bytes(arr))
            }
            _ => Ok(U256::ZERO),
        }
    }

    pub fn supply(&self) -> Result<SupplyView, QueryError> {
        let total_supply = self.total_supply()?;
        let percentage_minted = if self.supply_cap.is_zero() {
            0.0
        } else {
            100.0 * total_supply.to::<u128>() as f64 / self.supply_cap.to::<u128>() as f64
        };
        Ok(SupplyView {
            total_supply,
            supply_cap: self.supply_cap,
            percentage_minted,
        })
    }

    pub fn tokenomics(&self) -> TokenomicsView {
        TokenomicsView {
            name: "Forge Mini".to_string(),
            symbol: "FMC".to_string(),
            decimals: 18,
            block_reward: self.block_reward,
            min_gas_price: self.min_gas_price,
            block_gas_limit: self.block_gas_limit,
            supply_cap: self.supply_cap,
        }
    }
}
