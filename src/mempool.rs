//! Mempool (component C7, spec §4.7).
//!
//! A hash-keyed set of admitted signed transactions, secondary-ordered
//! by `(gas_price desc, nonce asc, hash asc)` -- grounded in the
//! teacher's `TxPool` (hash-keyed map plus a lock-protected index),
//! generalized from FIFO to priority order per spec and with the
//! sender-hash tiebreak the source left unspecified (spec §9 open
//! question: deterministic cross-sender ordering).

use std::collections::HashMap;
use std::sync::Mutex;

use thiserror::Error;

use crate::crypto::Hash;
use crate::gas::{self, RateLimiter, ValidationError};
use crate::state::StateStore;
use crate::types::SignedTransaction;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MempoolError {
    #[error("transaction already in mempool")]
    AlreadyExists,
    #[error("mempool is full")]
    Full,
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// A set of admitted signed transactions plus the priority index the
/// block builder draws from.
pub struct Mempool {
    chain_id: String,
    min_gas_price: crate::types::U256,
    block_gas_limit: u64,
    capacity: usize,
    rate_limiter: RateLimiter,
    entries: Mutex<HashMap<Hash, SignedTransaction>>,
}

impl Mempool {
    pub fn new(
        chain_id: String,
        min_gas_price: crate::types::U256,
        block_gas_limit: u64,
        capacity: usize,
        max_tx_per_minute: u32,
    ) -> Self {
        Self {
            chain_id,
            min_gas_price,
            block_gas_limit,
            capacity,
            rate_limiter: RateLimiter::new(max_tx_per_minute),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Validates `stx` against `state` and the pool's own running
    /// would-be block-gas-used (so one sender cannot smuggle more gas
    /// into a block than the cap allows across several pending txs),
    /// then admits it. Rejects duplicate hashes and admission beyond
    /// `capacity`.
    pub fn submit(&self, stx: SignedTransaction, state: &StateStore, now_ms: u64) -> Result<(), MempoolError> {
        let mut entries = self.entries.lock().unwrap();
        if entries.contains_key(&stx.hash) {
            return Err(MempoolError::AlreadyExists);
        }
        if entries.len() >= self.capacity {
            return Err(MempoolError::Full);
        }

        let pending_gas: u64 = entries.values().map(|e| e.tx.gas_limit).sum();
        gas::validate(
            &stx,
            &self.chain_id,
            state,
            self.min_gas_price,
            self.block_gas_limit,
            pending_gas,
        )?;

        self.rate_limiter.check_and_record(stx.tx.from, now_ms)?;

        entries.insert(stx.hash, stx);
        Ok(())
    }

    pub fn remove(&self, hash: &Hash) {
        self.entries.lock().unwrap().remove(hash);
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.entries.lock().unwrap().contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Greedily selects transactions in `(gas_price desc, nonce asc,
    /// hash asc)` order whose cumulative `gas_limit` fits
    /// `block_gas_limit`, capped at `max_txs` (spec §4.7/§4.8).
    pub fn select_for_block(&self, block_gas_limit: u64, max_txs: usize) -> Vec<SignedTransaction> {
        let entries = self.entries.lock().unwrap();
        let mut candidates: Vec<&SignedTransaction> = entries.values().collect();
        candidates.sort_by(|a, b| {
            b.tx.gas_price
                .cmp(&a.tx.gas_price)
                .then_with(|| a.tx.nonce.cmp(&b.tx.nonce))
                .then_with(|| a.hash.cmp(&b.hash))
        });

        let mut selected = Vec::new();
        let mut running_gas = 0u64;
        for stx in candidates {
            if selected.len() >= max_txs {
                break;
            }
            if running_gas + stx.tx.gas_limit > block_gas_limit {
                continue;
            }
            running_gas += stx.tx.gas_limit;
            selected.push(stx.clone());
        }
        selected
    }

    /// Removes every hash in `hashes` (called after a block commits).
    pub fn evict_all(&self, hashes: &[Hash]) {
        let mut entries = self.entries.lock().unwrap();
        for hash in hashes {
            entries.remove(hash);
        }
    }

    /// Flushes the full pending set to a serializable snapshot, used
    /// by graceful shutdown (spec §5).
    pub fn snapshot(&self) -> Vec<SignedTransaction> {
        self.entries.lock().unwrap().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;
    use crate::crypto::{self as crypto, Algorithm};
    use crate::storage::MemStorage;
    use crate::types::{Account, Transaction, TxPayload, U256};
    use std::sync::Arc;

    fn make_tx(keypair: &crypto::Keypair, nonce: u64, gas_price: U256) -> SignedTransaction {
        let tx = Transaction {
            nonce,
            from: keypair.public_key().derive_address().unwrap(),
            gas_limit: 21_000,
            gas_price,
            data: None,
            payload: TxPayload::Transfer {
                to: crate::types::Address::repeat_byte(0xAA),
                amount: U256::from(1u64),
            },
        };
        let chain_id = "forge-mini-test";
        let hash = codec::hash_tx(&tx, chain_id);
        let signature = crypto::sign(keypair, &codec::canonical_tx_bytes(&tx, chain_id));
        SignedTransaction {
            tx,
            signature,
            public_key: keypair.public_key(),
            algorithm: Algorithm::Ed25519,
            hash,
        }
    }

    fn fund(state: &StateStore, address: crate::types::Address) {
        state.put_account(
            address,
            Account {
                balance: U256::from(10u64.pow(18)),
                ..Default::default()
            },
        );
    }

    #[test]
    fn duplicate_hash_is_rejected() {
        let state = StateStore::new(Arc::new(MemStorage::new()));
        let mempool = Mempool::new("forge-mini-test".into(), U256::from(1u64), 30_000_000, 10, 60);
        let kp = crypto::generate_ed25519_keypair();
        fund(&state, kp.public_key().derive_address().unwrap());
        let stx = make_tx(&kp, 0, U256::from(1_000_000_000u64));

        mempool.submit(stx.clone(), &state, 0).unwrap();
        assert!(matches!(
            mempool.submit(stx, &state, 0),
            Err(MempoolError::AlreadyExists)
        ));
    }

    #[test]
    fn selection_orders_by_gas_price_descending() {
        let state = StateStore::new(Arc::new(MemStorage::new()));
        let mempool = Mempool::new("forge-mini-test".into(), U256::from(1u64), 30_000_000, 10, 60);

        let kp_low = crypto::generate_ed25519_keypair();
        let kp_high = crypto::generate_ed25519_keypair();
        fund(&state, kp_low.public_key().derive_address().unwrap());
        fund(&state, kp_high.public_key().derive_address().unwrap());

        let low = make_tx(&kp_low, 0, U256::from(1_000_000_000u64));
        let high = make_tx(&kp_high, 0, U256::from(5_000_000_000u64));

        mempool.submit(low, &state, 0).unwrap();
        mempool.submit(high.clone(), &state, 0).unwrap();

        let selected = mempool.select_for_block(30_000_000, 500);
        assert_eq!(selected[0].hash, high.hash);
    }

    #[test]
    fn full_pool_rejects_further_submissions() {
        let state = StateStore::new(Arc::new(MemStorage::new()));
        let mempool = Mempool::new("forge-mini-test".into(), U256::from(1u64), 30_000_000, 1, 60);
        let kp_a = crypto::generate_ed25519_keypair();
        let kp_b = crypto::generate_ed25519_keypair();
        fund(&state, kp_a.public_key().derive_address().unwrap());
        fund(&state, kp_b.public_key().derive_address().unwrap());

        mempool.submit(make_tx(&kp_a, 0, U256::from(1_000_000_000u64)), &state, 0).unwrap();
        assert!(matches!(
            mempool.submit(make_tx(&kp_b, 0, U256::from(1_000_000_000u64)), &state, 0),
            Err(MempoolError::Full)
        ));
    }
}
