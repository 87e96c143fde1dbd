//! End-to-end deploy-then-call flow (spec's "Deploy then call"
//! example) driven through real block production, read back through
//! `QueryService` the way the (out-of-scope) HTTP layer would.

mod common;

use std::sync::Arc;

use forge_mini_chain::block::BlockBuilder;
use forge_mini_chain::crypto;
use forge_mini_chain::mempool::Mempool;
use forge_mini_chain::pubsub::PubSub;
use forge_mini_chain::query::QueryService;
use forge_mini_chain::state::StateStore;
use forge_mini_chain::storage::{MemStorage, SharedStorage, Storage};
use forge_mini_chain::types::Account;
use forge_mini_chain::types::U256;

const CHAIN_ID: &str = "forge-mini-test";

/// Minimal runtime that returns its 32-byte calldata argument
/// unmodified (`CALLDATACOPY` then `RETURN`), wrapped in constructor
/// init code that `CODECOPY`s it out and returns it as the deployed
/// runtime.
fn echo_calldata_init_code() -> Vec<u8> {
    let runtime: Vec<u8> = vec![
        0x60, 0x20, // PUSH1 32 (size)
        0x60, 0x00, // PUSH1 0 (offset)
        0x60, 0x00, // PUSH1 0 (destOffset)
        0x37, // CALLDATACOPY
        0x60, 0x20, // PUSH1 32 (size)
        0x60, 0x00, // PUSH1 0 (offset)
        0xf3, // RETURN
    ];
    let runtime_len = runtime.len() as u8;
    let mut init = vec![
        0x60, runtime_len, // PUSH1 size
        0x60, runtime_len, // PUSH1 offset (runtime starts right after this prefix)
        0x60, 0x00, // PUSH1 destOffset
        0x39, // CODECOPY
        0x60, runtime_len, // PUSH1 size
        0x60, 0x00, // PUSH1 offset
        0xf3, // RETURN
    ];
    init.extend_from_slice(&runtime);
    init
}

#[test]
fn deploy_then_call_echoes_the_argument() {
    let storage: SharedStorage = Arc::new(MemStorage::new());
    let mempool = Arc::new(Mempool::new(
        CHAIN_ID.into(),
        U256::from(1_000_000_000u64),
        30_000_000,
        1_000,
        60,
    ));
    let pubsub = Arc::new(PubSub::new());
    let leader_keypair = crypto::generate_ed25519_keypair();
    let mut builder = BlockBuilder::new(
        CHAIN_ID.into(),
        30_000_000,
        500,
        U256::from(1_000_000_000u64),
        U256::from(5u64) * U256::from(10u64).pow(U256::from(18u64)),
        U256::from(2u64) * U256::from(10u64).pow(U256::from(27u64)),
        1_000,
        storage.clone(),
        mempool.clone(),
        pubsub,
        leader_keypair,
    )
    .unwrap();

    let deployer = crypto::generate_ed25519_keypair();
    let deployer_address = deployer.public_key().derive_address().unwrap();
    builder.state().put_account(
        deployer_address,
        Account {
            balance: U256::from(10u64) * U256::from(10u64).pow(U256::from(18u64)),
            ..Default::default()
        },
    );

    let deploy_tx = common::deploy_tx(
        &deployer,
        CHAIN_ID,
        0,
        echo_calldata_init_code(),
        300_000,
        U256::from(1_000_000_000u64),
    );
    let deploy_hash = deploy_tx.hash;
    mempool.submit(deploy_tx, builder.state(), 0).unwrap();
    builder.produce_block(1_000).unwrap();

    let deploy_receipt = storage.get_receipt(&deploy_hash).unwrap().expect("deploy receipt stored");
    assert!(deploy_receipt.success, "deploy failed: {:?}", deploy_receipt.error);
    let contract_address = deploy_receipt.contract_address.expect("deploy receipt names a contract address");

    let mut argument = vec![0u8; 32];
    argument[31] = 0x42;
    argument[30] = 0x42;
    let call_tx = common::call_tx(
        &deployer,
        CHAIN_ID,
        1,
        contract_address,
        argument.clone(),
        100_000,
        U256::from(1_000_000_000u64),
    );
    let call_hash = call_tx.hash;
    mempool.submit(call_tx, builder.state(), 1_000).unwrap();
    builder.produce_block(2_000).unwrap();

    let call_receipt = storage.get_receipt(&call_hash).unwrap().expect("call receipt stored");
    assert!(call_receipt.success, "call failed: {:?}", call_receipt.error);
    assert_eq!(call_receipt.return_data.as_ref(), argument.as_slice());

    let deployer_account = builder.state().get_account(&deployer_address).unwrap().unwrap();
    assert_eq!(deployer_account.nonce, 2);

    let contract_account = builder.state().get_account(&contract_address).unwrap().unwrap();
    assert!(contract_account.is_contract);

    let state_view = Arc::new(StateStore::new(storage.clone()));
    let query = QueryService::new(
        storage.clone(),
        state_view,
        U256::from(5u64) * U256::from(10u64).pow(U256::from(18u64)),
        U256::from(1_000_000_000u64),
        30_000_000,
        U256::from(2u64) * U256::from(10u64).pow(U256::from(27u64)),
    );

    let head = query.get_head().unwrap().expect("head present after two blocks");
    assert_eq!(head.header.height, 1);

    let queried_account = query.get_account(&contract_address).unwrap();
    assert!(queried_account.is_contract);

    let code = query.get_code(&contract_address).unwrap().expect("contract has runtime code");
    assert!(!code.is_empty());

    let queried_receipt = query.get_receipt(&call_hash).unwrap().expect("call receipt via query surface");
    assert!(queried_receipt.success);

    let supply = query.supply().unwrap();
    assert!(supply.total_supply > U256::ZERO);
}
