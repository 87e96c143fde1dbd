//! Node wiring: genesis application, leader-loop scheduling, and
//! graceful shutdown (spec §5 "Graceful shutdown").

use std::path::Path;
use std::sync::Arc;

use tokio::sync::{Mutex, watch};

use crate::block::{self, BlockBuilder, BlockError};
use crate::config::NodeConfig;
use crate::crypto::Keypair;
use crate::error::NodeError;
use crate::genesis::GenesisFile;
use crate::mempool::Mempool;
use crate::pubsub::PubSub;
use crate::state::StateStore;
use crate::storage::{RocksStorage, SharedStorage, Storage, StorageError};

/// Loads or generates the proposer's Ed25519 identity at `key_file`,
/// matching spec §6's `key_file` option.
fn load_or_generate_keypair(key_file: &Path) -> Result<Keypair, NodeError> {
    if let Some(parent) = key_file.parent() {
        std::fs::create_dir_all(parent).map_err(|e| NodeError::Consensus(e.to_string()))?;
    }
    if let Ok(bytes) = std::fs::read(key_file) {
        if bytes.len() == 32 {
            let mut seed = [0u8; 32];
            seed.copy_from_slice(&bytes);
            let signing_key = ed25519_dalek::SigningKey::from_bytes(&seed);
            return Ok(Keypair::Ed25519(signing_key));
        }
    }
    let keypair = crate::crypto::generate_ed25519_keypair();
    if let Keypair::Ed25519(signing_key) = &keypair {
        std::fs::write(key_file, signing_key.to_bytes()).map_err(|e| NodeError::Consensus(e.to_string()))?;
    }
    Ok(keypair)
}

/// Everything one running node owns: storage, mempool, subscription
/// fan-out, and the writer-task block builder.
pub struct Node {
    config: NodeConfig,
    storage: SharedStorage,
    mempool: Arc<Mempool>,
    pubsub: Arc<PubSub>,
    builder: Arc<Mutex<BlockBuilder>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Node {
    pub fn open(config: NodeConfig, genesis: Option<GenesisFile>) -> Result<Self, NodeError> {
        std::fs::create_dir_all(&config.data_dir).map_err(|e| NodeError::Consensus(e.to_string()))?;
        let storage: SharedStorage = Arc::new(RocksStorage::open(&config.data_dir)?);

        let legacy_log = config.data_dir.join("chain.log");
        let migrated = crate::storage::migrate_legacy_log(storage.as_ref(), &legacy_log)?;
        if migrated > 0 {
            log::info!("migrated {migrated} blocks from legacy append-only log");
        }

        if let Some(genesis) = genesis {
            let state = StateStore::new(storage.clone());
            let applied = crate::genesis::apply_genesis(&genesis, &state, &storage)?;
            if applied {
                log::info!("applied genesis for chain_id={}", genesis.chain_id);
            }
        }

        let keypair = load_or_generate_keypair(&config.key_file)?;
        let mempool = Arc::new(Mempool::new(
            config.chain_id.clone(),
            config.min_gas_price,
            config.block_gas_limit,
            config.mempool_capacity,
            config.max_tx_per_minute,
        ));
        let pubsub = Arc::new(PubSub::new());

        let builder = BlockBuilder::new(
            config.chain_id.clone(),
            config.block_gas_limit,
            config.max_txs_per_block,
            config.min_gas_price,
            config.block_reward,
            config.supply_cap,
            config.snapshot_interval_blocks,
            storage.clone(),
            mempool.clone(),
            pubsub.clone(),
            keypair,
        )?;
        builder.seed_total_supply(config.initial_supply)?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            config,
            storage,
            mempool,
            pubsub,
            builder: Arc::new(Mutex::new(builder)),
            shutdown_tx,
            shutdown_rx,
        })
    }

    pub fn storage(&self) -> SharedStorage {
        self.storage.clone()
    }

    pub fn mempool(&self) -> Arc<Mempool> {
        self.mempool.clone()
    }

    pub fn pubsub(&self) -> Arc<PubSub> {
        self.pubsub.clone()
    }

    pub fn builder(&self) -> Arc<Mutex<BlockBuilder>> {
        self.builder.clone()
    }

    /// Runs the leader tick loop until `shutdown` is signaled. A
    /// follower node never calls this; it only applies blocks received
    /// from peers via `BlockBuilder::apply_received_block`.
    pub async fn run(&self) {
        if !self.config.is_leader {
            log::info!("node running in follower mode, no block production");
            let mut rx = self.shutdown_rx.clone();
            let _ = rx.changed().await;
            return;
        }
        block::run_leader_loop(self.builder.clone(), self.config.block_time_ms, self.shutdown_rx.clone()).await;
    }

    /// Signals shutdown, waits for the in-flight commit (if any) to
    /// finish, flushes the mempool to disk, and closes the durable
    /// store (spec §5).
    pub async fn shutdown(&self) -> Result<(), BlockError> {
        log::info!("shutdown requested, stopping new admissions");
        let _ = self.shutdown_tx.send(true);

        // Acquiring the lock waits out any in-flight commit.
        let _guard = self.builder.lock().await;

        let pending = self.mempool.snapshot();
        log::info!("flushing {} pending transactions before exit", pending.len());
        let encoded = bincode::serialize(&pending).map_err(StorageError::from)?;
        self.storage.save_meta("mempool_snapshot", &encoded)?;

        self.storage.close()?;
        Ok(())
    }
}
