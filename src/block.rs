//! Block builder and finalizer (component C8, spec §4.8).
//!
//! Owns the writer-side pipeline end to end: select from the mempool,
//! seal a header, apply every transaction through C6, distribute the
//! block reward, sign, and persist block + receipts + mutated
//! accounts in one atomic batch. The leader and follower paths share
//! everything from "apply" onward; only selection and signing are
//! leader-only (spec §4.8).

use thiserror::Error;

use crate::codec;
use crate::crypto::{self, Hash, Keypair, PublicKey};
use crate::evm::BlockContext;
use crate::gas;
use crate::mempool::Mempool;
use crate::pubsub::{PubSub, TransactionNotice};
use crate::state::{StateError, StateStore};
use crate::storage::{BatchOp, Namespace, SharedStorage, StateRootSnapshot, Storage, StorageError};
use crate::transition;
use crate::types::{Address, Block, BlockHeader, Receipt, U256};

#[derive(Debug, Error)]
pub enum BlockError {
    #[error("no genesis/head present")]
    NoHead,
    #[error("prev_hash does not match current head")]
    PrevHashMismatch,
    #[error("invalid proposer signature")]
    InvalidSignature,
    #[error("tx_root does not match recomputed merkle root")]
    TxRootMismatch,
    #[error("header.gas_used exceeds header.gas_limit")]
    GasUsedExceedsLimit,
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub struct BlockBuilder {
    chain_id: String,
    block_gas_limit: u64,
    max_txs_per_block: usize,
    min_gas_price: U256,
    block_reward: U256,
    supply_cap: U256,
    snapshot_interval_blocks: u64,
    storage: SharedStorage,
    state: StateStore,
    mempool: std::sync::Arc<Mempool>,
    pubsub: std::sync::Arc<PubSub>,
    proposer_keypair: Keypair,
    proposer_address: Address,
    head: Option<Block>,
}

impl BlockBuilder {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chain_id: String,
        block_gas_limit: u64,
        max_txs_per_block: usize,
        min_gas_price: U256,
        block_reward: U256,
        supply_cap: U256,
        snapshot_interval_blocks: u64,
        storage: SharedStorage,
        mempool: std::sync::Arc<Mempool>,
        pubsub: std::sync::Arc<PubSub>,
        proposer_keypair: Keypair,
    ) -> Result<Self, BlockError> {
        let state = StateStore::new(storage.clone());
        let proposer_address = proposer_keypair.public_key().derive_address().unwrap_or_default();
        let head = Self::load_head(&storage)?;
        Ok(Self {
            chain_id,
            block_gas_limit,
            max_txs_per_block,
            min_gas_price,
            block_reward,
            supply_cap,
            snapshot_interval_blocks,
            storage,
            state,
            mempool,
            pubsub,
            proposer_keypair,
            proposer_address,
            head,
        })
    }

    fn load_head(storage: &SharedStorage) -> Result<Option<Block>, BlockError> {
        let height = match storage.get_meta("head_height")? {
            Some(bytes) if bytes.len() == 8 => {
                let mut arr = [0u8; 8];
                arr.copy_from_slice(&bytes);
                u64::from_be_bytes(arr)
            }
            _ => return Ok(None),
        };
        Ok(storage.get_block_by_height(height)?)
    }

    pub fn head(&self) -> Option<&Block> {
        self.head.as_ref()
    }

    pub fn proposer_address(&self) -> Address {
        self.proposer_address
    }

    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }

    fn total_supply(&self) -> Result<U256, BlockError> {
        match self.storage.get_meta("total_supply")? {
            Some(bytes) if bytes.len() == 32 => {
                let mut arr = [0u8; 32];
                arr.copy_from_slice(&bytes);
                Ok(U256::from_be_bytes(arr))
            }
            _ => Ok(U256::ZERO),
        }
    }

    fn set_total_supply(&self, supply: U256) -> Result<(), BlockError> {
        Ok(self.storage.save_meta("total_supply", &supply.to_be_bytes::<32>())?)
    }

    /// Records the genesis-applied initial supply so later reward
    /// minting can respect `supply_cap`. Called once by `genesis::apply_genesis`'s
    /// caller right after genesis is applied.
    pub fn seed_total_supply(&self, initial_supply: U256) -> Result<(), BlockError> {
        if self.total_supply()? == U256::ZERO {
            self.set_total_supply(initial_supply)?;
        }
        Ok(())
    }

    /// Leader path: spec §4.8 steps 1-7.
    pub fn produce_block(&mut self, now_ms: u64) -> Result<Block, BlockError> {
        let head = self.head.clone();
        let (height, prev_hash, base_fee) = match &head {
            Some(block) => (
                block.header.height + 1,
                block.hash,
                gas::next_base_fee(
                    block.header.base_fee_per_gas,
                    block.header.gas_used,
                    block.header.gas_limit,
                    self.min_gas_price,
                ),
            ),
            None => (0, Hash::default(), self.min_gas_price),
        };

        let selected = self
            .mempool
            .select_for_block(self.block_gas_limit, self.max_txs_per_block);
        let tx_hashes: Vec<Hash> = selected.iter().map(|stx| stx.hash).collect();
        let tx_root = codec::merkle_root(&tx_hashes);

        let mut header = BlockHeader {
            height,
            prev_hash,
            timestamp_ms: now_ms,
            tx_root,
            proposer: self.proposer_address,
            gas_used: 0,
            gas_limit: self.block_gas_limit,
            base_fee_per_gas: base_fee,
        };

        let ctx = BlockContext {
            height,
            timestamp_ms: now_ms,
            coinbase: self.proposer_address,
            base_fee,
            gas_limit: self.block_gas_limit,
        };

        let mut receipts = Vec::with_capacity(selected.len());
        let mut gas_used = 0u64;
        for stx in &selected {
            let receipt = transition::apply(stx, &mut self.state, self.proposer_address, ctx)?;
            gas_used += receipt.gas_used;
            receipts.push(receipt);
        }
        header.gas_used = gas_used;

        self.mint_block_reward()?;

        let header_hash = codec::hash_header(&header);
        let signature = crypto::sign(&self.proposer_keypair, &header_hash.0);
        let block = Block {
            hash: codec::hash_block(&Block {
                header: header.clone(),
                txs: selected.clone(),
                signature: signature.clone(),
                hash: Hash::default(),
            }),
            header,
            txs: selected,
            signature,
        };

        let receipts = finalize_receipts(receipts, &block);
        self.commit(&block, &receipts)?;
        self.mempool.evict_all(&tx_hashes);
        self.publish(&block, &receipts);

        Ok(block)
    }

    /// Follower path: verifies link and signature, then applies
    /// (spec §4.8 steps 3-7, minus selection and signing).
    pub fn apply_received_block(&mut self, block: Block, proposer_public_key: &PublicKey) -> Result<(), BlockError> {
        let expected_prev = match &self.head {
            Some(head) => head.hash,
            None => Hash::default(),
        };
        if block.header.prev_hash != expected_prev {
            return Err(BlockError::PrevHashMismatch);
        }

        let header_hash = codec::hash_header(&block.header);
        if !crypto::verify(proposer_public_key, &header_hash.0, &block.signature) {
            return Err(BlockError::InvalidSignature);
        }

        let tx_hashes: Vec<Hash> = block.txs.iter().map(|stx| stx.hash).collect();
        if codec::merkle_root(&tx_hashes) != block.header.tx_root {
            return Err(BlockError::TxRootMismatch);
        }
        if block.header.gas_used > block.header.gas_limit {
            return Err(BlockError::GasUsedExceedsLimit);
        }

        let ctx = BlockContext {
            height: block.header.height,
            timestamp_ms: block.header.timestamp_ms,
            coinbase: block.header.proposer,
            base_fee: block.header.base_fee_per_gas,
            gas_limit: block.header.gas_limit,
        };

        let mut receipts = Vec::with_capacity(block.txs.len());
        for stx in &block.txs {
            let receipt = transition::apply(stx, &mut self.state, block.header.proposer, ctx)?;
            receipts.push(receipt);
        }
        self.mint_block_reward_to(block.header.proposer)?;

        let receipts = finalize_receipts(receipts, &block);
        self.commit(&block, &receipts)?;
        self.mempool.evict_all(&tx_hashes);
        self.publish(&block, &receipts);
        Ok(())
    }

    fn mint_block_reward(&mut self) -> Result<(), BlockError> {
        let proposer = self.proposer_address;
        self.mint_block_reward_to(proposer)
    }

    fn mint_block_reward_to(&mut self, proposer: Address) -> Result<(), BlockError> {
        let supply = self.total_supply()?;
        let remaining_room = self.supply_cap.saturating_sub(supply);
        let reward = self.block_reward.min(remaining_room);
        if reward.is_zero() {
            return Ok(());
        }
        let mut account = self.state.get_or_create(proposer)?;
        account.balance += reward;
        self.state.put_account(proposer, account);
        self.set_total_supply(supply + reward)?;
        Ok(())
    }

    fn commit(&mut self, block: &Block, receipts: &[Receipt]) -> Result<(), BlockError> {
        let mut ops = self.state.to_batch_ops()?;

        let block_bytes = bincode::serialize(block).map_err(StateError::from)?;
        ops.push(BatchOp::Put(Namespace::BlocksByHash, block.hash.0.to_vec(), block_bytes));
        ops.push(BatchOp::Put(
            Namespace::BlocksByHeight,
            block.header.height.to_be_bytes().to_vec(),
            block.hash.0.to_vec(),
        ));
        for receipt in receipts {
            let bytes = bincode::serialize(receipt).map_err(StateError::from)?;
            ops.push(BatchOp::Put(Namespace::ReceiptsByTxHash, receipt.tx_hash.0.to_vec(), bytes));
        }
        ops.push(BatchOp::Put(
            Namespace::Meta,
            b"head_height".to_vec(),
            block.header.height.to_be_bytes().to_vec(),
        ));

        if block.header.height > 0 && block.header.height % self.snapshot_interval_blocks == 0 {
            let state_root = self.state.compute_state_root();
            let snapshot = StateRootSnapshot {
                height: block.header.height,
                state_root,
            };
            let bytes = bincode::serialize(&snapshot).map_err(StateError::from)?;
            ops.push(BatchOp::Put(
                Namespace::SnapshotsByHeight,
                block.header.height.to_be_bytes().to_vec(),
                bytes,
            ));
            ops.push(BatchOp::Put(
                Namespace::Meta,
                b"latest_snapshot_height".to_vec(),
                block.header.height.to_be_bytes().to_vec(),
            ));
        }

        self.storage.batch_write(ops)?;
        self.head = Some(block.clone());
        Ok(())
    }

    fn publish(&self, block: &Block, receipts: &[Receipt]) {
        for (stx, receipt) in block.txs.iter().zip(receipts.iter()) {
            self.pubsub.publish_transaction(TransactionNotice::Included {
                tx: stx.clone(),
                block_height: block.header.height,
            });
            for event in &receipt.events {
                self.pubsub.publish_event(crate::pubsub::EventNotice {
                    block_height: block.header.height,
                    tx_hash: receipt.tx_hash,
                    event: event.clone(),
                });
            }
        }
        self.pubsub.publish_block(block.clone());
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }
}

/// Stamps `block_hash` onto every receipt once the block's final hash
/// is known (the transition layer computes receipts before the block
/// hash exists).
fn finalize_receipts(receipts: Vec<Receipt>, block: &Block) -> Vec<Receipt> {
    receipts
        .into_iter()
        .map(|mut r| {
            r.block_hash = block.hash;
            r
        })
        .collect()
}

/// Runs the leader tick loop on `block_time_ms` intervals. Defers the
/// next tick until the in-flight commit completes if it overruns the
/// interval (spec §5: "no overlap").
pub async fn run_leader_loop(
    builder: std::sync::Arc<tokio::sync::Mutex<BlockBuilder>>,
    block_time_ms: u64,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(std::time::Duration::from_millis(block_time_ms));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let now_ms = now_ms_from_system_clock();
                let mut guard = builder.lock().await;
                match guard.produce_block(now_ms) {
                    Ok(block) => log::info!("sealed block {} with {} txs", block.header.height, block.txs.len()),
                    Err(err) => log::error!("block production failed: {err}"),
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    log::info!("leader loop shutting down");
                    break;
                }
            }
        }
    }
}

fn now_ms_from_system_clock() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemStorage;
    use std::sync::Arc;

    fn fresh_builder() -> BlockBuilder {
        let storage: SharedStorage = Arc::new(MemStorage::new());
        let mempool = Arc::new(Mempool::new(
            "forge-mini-test".into(),
            U256::from(1_000_000_000u64),
            30_000_000,
            1_000,
            60,
        ));
        let pubsub = Arc::new(PubSub::new());
        let keypair = crypto::generate_ed25519_keypair();
        BlockBuilder::new(
            "forge-mini-test".into(),
            30_000_000,
            500,
            U256::from(1_000_000_000u64),
            U256::from(5u64) * U256::from(10u64).pow(U256::from(18u64)),
            U256::from(2u64) * U256::from(10u64).pow(U256::from(27u64)),
            1_000,
            storage,
            mempool,
            pubsub,
            keypair,
        )
        .unwrap()
    }

    #[test]
    fn genesis_block_has_zero_prev_hash_and_height() {
        let mut builder = fresh_builder();
        let block = builder.produce_block(1_000).unwrap();
        assert_eq!(block.header.height, 0);
        assert_eq!(block.header.prev_hash, Hash::default());
        assert_eq!(block.header.tx_root, codec::merkle_root(&[]));
    }

    #[test]
    fn successive_blocks_chain_by_hash() {
        let mut builder = fresh_builder();
        let first = builder.produce_block(1_000).unwrap();
        let second = builder.produce_block(2_000).unwrap();
        assert_eq!(second.header.prev_hash, first.hash);
        assert_eq!(second.header.height, first.header.height + 1);
    }

    #[test]
    fn block_reward_is_credited_to_proposer() {
        let mut builder = fresh_builder();
        let proposer = builder.proposer_address();
        let block = builder.produce_block(1_000).unwrap();
        let _ = block;
        let account = builder.state().get_account(&proposer).unwrap().unwrap();
        assert_eq!(account.balance, U256::from(5u64) * U256::from(10u64).pow(U256::from(18u64)));
    }

    #[test]
    fn reward_minting_respects_supply_cap() {
        let storage: SharedStorage = Arc::new(MemStorage::new());
        let mempool = Arc::new(Mempool::new("forge-mini-test".into(), U256::from(1u64), 30_000_000, 10, 60));
        let pubsub = Arc::new(PubSub::new());
        let keypair = crypto::generate_ed25519_keypair();
        let mut builder = BlockBuilder::new(
            "forge-mini-test".into(),
            30_000_000,
            500,
            U256::from(1u64),
            U256::from(100u64),
            U256::from(50u64),
            1_000,
            storage,
            mempool,
            pubsub,
            keypair,
        )
        .unwrap();
        builder.set_total_supply(U256::from(40u64)).unwrap();
        let proposer = builder.proposer_address();
        builder.produce_block(1_000).unwrap();
        let account = builder.state().get_account(&proposer).unwrap().unwrap();
        assert_eq!(account.balance, U256::from(10u64));
    }
}
