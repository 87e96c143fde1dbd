//! Verifies durability across a real RocksDB close/reopen cycle
//! (spec §4.9/§5): block and account state sealed before shutdown
//! must be recoverable from a fresh `RocksStorage::open` on the same
//! path.

mod common;

use std::sync::Arc;

use forge_mini_chain::block::BlockBuilder;
use forge_mini_chain::crypto;
use forge_mini_chain::mempool::Mempool;
use forge_mini_chain::pubsub::PubSub;
use forge_mini_chain::storage::{RocksStorage, SharedStorage};
use forge_mini_chain::types::{Account, Address, U256};

const CHAIN_ID: &str = "forge-mini-test";

fn open_builder(data_dir: &std::path::Path, keypair: forge_mini_chain::crypto::Keypair) -> (BlockBuilder, Arc<Mempool>) {
    let storage: SharedStorage = Arc::new(RocksStorage::open(data_dir).unwrap());
    let mempool = Arc::new(Mempool::new(
        CHAIN_ID.into(),
        U256::from(1_000_000_000u64),
        30_000_000,
        1_000,
        60,
    ));
    let pubsub = Arc::new(PubSub::new());
    let builder = BlockBuilder::new(
        CHAIN_ID.into(),
        30_000_000,
        500,
        U256::from(1_000_000_000u64),
        U256::from(5u64) * U256::from(10u64).pow(U256::from(18u64)),
        U256::from(2u64) * U256::from(10u64).pow(U256::from(27u64)),
        1_000,
        storage,
        mempool.clone(),
        pubsub,
        keypair,
    )
    .unwrap();
    (builder, mempool)
}

#[test]
fn head_and_account_balances_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let keypair = crypto::generate_ed25519_keypair();
    let proposer = keypair.public_key().derive_address().unwrap();
    let sender_keypair = crypto::generate_ed25519_keypair();
    let sender = sender_keypair.public_key().derive_address().unwrap();
    let receiver = Address::repeat_byte(7);

    // First run: fund the sender, submit a transfer, seal two blocks.
    {
        let (mut builder, mempool) = open_builder(dir.path(), keypair);
        builder.state().put_account(
            sender,
            Account {
                balance: U256::from(10u64) * U256::from(10u64).pow(U256::from(18u64)),
                ..Default::default()
            },
        );
        let stx = common::transfer_tx(&sender_keypair, CHAIN_ID, 0, receiver, U256::from(1_000u64), U256::from(1_000_000_000u64));
        mempool.submit(stx, builder.state(), 0).unwrap();

        builder.produce_block(1_000).unwrap();
        builder.produce_block(2_000).unwrap();
    } // storage dropped here, RocksDB closed

    // Second run: reopen at the same path and confirm persisted state.
    let keypair2 = crypto::generate_ed25519_keypair();
    let (builder2, _mempool2) = open_builder(dir.path(), keypair2);

    let head = builder2.head().expect("head persisted across restart");
    assert_eq!(head.header.height, 1);

    let receiver_account = builder2.state().get_account(&receiver).unwrap().unwrap();
    assert_eq!(receiver_account.balance, U256::from(1_000u64));

    let proposer_account = builder2.state().get_account(&proposer).unwrap().unwrap();
    assert_eq!(
        proposer_account.balance,
        U256::from(2u64) * U256::from(5u64) * U256::from(10u64).pow(U256::from(18u64))
    );
}
