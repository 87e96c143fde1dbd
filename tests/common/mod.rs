//! Shared fixtures for the integration tests: building and signing
//! transactions the way a real client would, against the public
//! crate API rather than any internal test-only shortcut.

use forge_mini_chain::codec;
use forge_mini_chain::crypto::{self, Algorithm, Keypair};
use forge_mini_chain::types::{Address, Bytes, SignedTransaction, Transaction, TxPayload, U256};

pub fn sign_transaction(keypair: &Keypair, chain_id: &str, tx: Transaction) -> SignedTransaction {
    let preimage = codec::canonical_tx_bytes(&tx, chain_id);
    let signature = crypto::sign(keypair, &preimage);
    let hash = codec::hash_tx(&tx, chain_id);
    SignedTransaction {
        tx,
        signature,
        public_key: keypair.public_key(),
        algorithm: Algorithm::Ed25519,
        hash,
    }
}

pub fn transfer_tx(
    keypair: &Keypair,
    chain_id: &str,
    nonce: u64,
    to: Address,
    amount: U256,
    gas_price: U256,
) -> SignedTransaction {
    let from = keypair.public_key().derive_address().unwrap();
    let tx = Transaction {
        nonce,
        from,
        gas_limit: 21_000,
        gas_price,
        data: None,
        payload: TxPayload::Transfer { to, amount },
    };
    sign_transaction(keypair, chain_id, tx)
}

pub fn deploy_tx(
    keypair: &Keypair,
    chain_id: &str,
    nonce: u64,
    bytecode: Vec<u8>,
    gas_limit: u64,
    gas_price: U256,
) -> SignedTransaction {
    let from = keypair.public_key().derive_address().unwrap();
    let tx = Transaction {
        nonce,
        from,
        gas_limit,
        gas_price,
        data: None,
        payload: TxPayload::Deploy {
            bytecode: Bytes::from(bytecode),
            value: U256::ZERO,
            constructor_args: Bytes::new(),
        },
    };
    sign_transaction(keypair, chain_id, tx)
}

pub fn call_tx(
    keypair: &Keypair,
    chain_id: &str,
    nonce: u64,
    to: Address,
    data: Vec<u8>,
    gas_limit: u64,
    gas_price: U256,
) -> SignedTransaction {
    let from = keypair.public_key().derive_address().unwrap();
    let tx = Transaction {
        nonce,
        from,
        gas_limit,
        gas_price,
        data: None,
        payload: TxPayload::Call {
            to,
            value: U256::ZERO,
            data: Bytes::from(data),
        },
    };
    sign_transaction(keypair, chain_id, tx)
}
