//! Core data model (spec §3): transactions, blocks, receipts, accounts.

pub use alloy_primitives::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};

use crate::crypto::{Algorithm, Hash, PublicKey, Signature};

/// The type-specific payload of a transaction (spec §3 "Transaction
/// (pre-signature)"). Tagged by `type` so the wire/canonical encoding
/// carries an explicit discriminant rather than relying on shape.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TxPayload {
    Transfer {
        to: Address,
        amount: U256,
    },
    Post {
        post_id: String,
        content_hash: Hash,
        pointer: Option<String>,
    },
    Reputation {
        target: Address,
        delta: i64,
        reason: Option<String>,
    },
    Deploy {
        bytecode: Bytes,
        value: U256,
        constructor_args: Bytes,
    },
    Call {
        to: Address,
        value: U256,
        data: Bytes,
    },
}

impl TxPayload {
    pub fn kind_name(&self) -> &'static str {
        match self {
            TxPayload::Transfer { .. } => "transfer",
            TxPayload::Post { .. } => "post",
            TxPayload::Reputation { .. } => "reputation",
            TxPayload::Deploy { .. } => "deploy",
            TxPayload::Call { .. } => "call",
        }
    }

    /// The payload bytes the gas schedule's "additional data rule"
    /// charges per zero/non-zero byte (spec §4.4).
    pub fn billable_data(&self) -> &[u8] {
        match self {
            TxPayload::Transfer { .. } => &[],
            TxPayload::Post { .. } => &[],
            TxPayload::Reputation { .. } => &[],
            TxPayload::Deploy {
                constructor_args, ..
            } => constructor_args.as_ref(),
            TxPayload::Call { data, .. } => data.as_ref(),
        }
    }

    /// Native-token value the transaction moves out of the sender's
    /// balance as part of its type semantics (excludes the fee).
    pub fn value_out(&self) -> U256 {
        match self {
            TxPayload::Transfer { amount, .. } => *amount,
            TxPayload::Post { .. } => U256::ZERO,
            TxPayload::Reputation { .. } => U256::ZERO,
            TxPayload::Deploy { value, .. } => *value,
            TxPayload::Call { value, .. } => *value,
        }
    }
}

/// An unsigned transaction: the common envelope fields plus a
/// type-specific payload.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transaction {
    pub nonce: u64,
    pub from: Address,
    pub gas_limit: u64,
    pub gas_price: U256,
    /// Optional generic payload attached to transfer/post/reputation
    /// transactions; billed under the same "additional data rule" as
    /// `deploy`'s constructor args and `call`'s data.
    pub data: Option<Bytes>,
    pub payload: TxPayload,
}

impl Transaction {
    pub fn billable_data(&self) -> &[u8] {
        match &self.payload {
            TxPayload::Deploy { .. } | TxPayload::Call { .. } => self.payload.billable_data(),
            _ => self.data.as_deref().unwrap_or(&[]),
        }
    }
}

/// A transaction plus its signature, public key, and the hash of its
/// canonical preimage (spec §3 "Signed transaction").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub tx: Transaction,
    pub signature: Signature,
    pub public_key: PublicKey,
    pub algorithm: Algorithm,
    pub hash: Hash,
}

/// An on-chain post record, keyed by `post_id` in the state store.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PostRecord {
    pub owner: Address,
    pub content_hash: Hash,
    pub pointer: Option<String>,
    pub block_height: u64,
}

/// A block header (spec §3). Notably absent: any state root -- the
/// spec ties state commitments to periodic snapshots (§4.9), not to
/// every header.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockHeader {
    pub height: u64,
    pub prev_hash: Hash,
    pub timestamp_ms: u64,
    pub tx_root: Hash,
    pub proposer: Address,
    pub gas_used: u64,
    pub gas_limit: u64,
    pub base_fee_per_gas: U256,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub txs: Vec<SignedTransaction>,
    pub signature: Signature,
    pub hash: Hash,
}

/// A single EVM/transition log entry.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    pub topics: Vec<Hash>,
    pub data: Bytes,
}

/// Post-execution record of a transaction (spec §3 "Receipt").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_hash: Hash,
    pub success: bool,
    pub gas_used: u64,
    pub return_data: Bytes,
    pub error: Option<String>,
    pub events: Vec<Event>,
    pub contract_address: Option<Address>,
    pub block_height: u64,
    pub block_hash: Hash,
}

/// An on-chain account (spec §3). Non-contract accounts carry
/// zero-valued `code_hash`/`storage_root`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Account {
    pub balance: U256,
    pub nonce: u64,
    pub reputation: i64,
    pub is_contract: bool,
    pub code_hash: Hash,
    pub storage_root: Hash,
}

impl Default for Account {
    fn default() -> Self {
        Account {
            balance: U256::ZERO,
            nonce: 0,
            reputation: 0,
            is_contract: false,
            code_hash: Hash::default(),
            storage_root: Hash::default(),
        }
    }
}
