//! Canonical encoding, hashing, and the transaction Merkle root
//! (component C2, spec §4.2).
//!
//! The canonical encoding is a small hand-rolled JSON-like value tree
//! rather than `serde_json::to_string`, because determinism here is a
//! consensus-critical invariant (every node must derive the exact same
//! preimage bytes) and must not silently change if `serde`'s field
//! ordering or a downstream crate's `Serialize` impl ever changes.

use std::fmt::Write as _;

use crate::crypto::{Hash, sha256};
use crate::types::{Address, Block, BlockHeader, Bytes, Transaction, TxPayload, U256};

/// A canonical value: every variant renders with a fixed, whitespace-free
/// textual form.
enum Canon {
    Str(String),
    Num(String),
    Bool(bool),
    Null,
    Array(Vec<Canon>),
    Object(Vec<(&'static str, Canon)>),
}

impl Canon {
    fn hex(bytes: &[u8]) -> Canon {
        Canon::Str(format!("0x{}", hex::encode(bytes)))
    }

    fn u256(v: U256) -> Canon {
        Canon::Num(v.to_string())
    }

    fn u64(v: u64) -> Canon {
        Canon::Num(v.to_string())
    }

    fn i64(v: i64) -> Canon {
        Canon::Num(v.to_string())
    }

    fn opt_str(v: &Option<String>) -> Canon {
        match v {
            Some(s) => Canon::Str(s.clone()),
            None => Canon::Null,
        }
    }

    fn write(&self, out: &mut String) {
        match self {
            Canon::Str(s) => {
                out.push('"');
                for c in s.chars() {
                    match c {
                        '"' => out.push_str("\\\""),
                        '\\' => out.push_str("\\\\"),
                        _ => out.push(c),
                    }
                }
                out.push('"');
            }
            Canon::Num(n) => out.push_str(n),
            Canon::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            Canon::Null => out.push_str("null"),
            Canon::Array(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    item.write(out);
                }
                out.push(']');
            }
            Canon::Object(fields) => {
                out.push('{');
                for (i, (key, val)) in fields.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    let _ = write!(out, "\"{}\":", key);
                    val.write(out);
                }
                out.push('}');
            }
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut s = String::new();
        self.write(&mut s);
        s.into_bytes()
    }
}

fn payload_canon(payload: &TxPayload) -> Canon {
    match payload {
        TxPayload::Transfer { to, amount } => Canon::Object(vec![
            ("type", Canon::Str("transfer".into())),
            ("to", Canon::hex(to.as_slice())),
            ("amount", Canon::u256(*amount)),
        ]),
        TxPayload::Post {
            post_id,
            content_hash,
            pointer,
        } => Canon::Object(vec![
            ("type", Canon::Str("post".into())),
            ("post_id", Canon::Str(post_id.clone())),
            ("content_hash", Canon::hex(&content_hash.0)),
            ("pointer", Canon::opt_str(pointer)),
        ]),
        TxPayload::Reputation {
            target,
            delta,
            reason,
        } => Canon::Object(vec![
            ("type", Canon::Str("reputation".into())),
            ("target", Canon::hex(target.as_slice())),
            ("delta", Canon::i64(*delta)),
            ("reason", Canon::opt_str(reason)),
        ]),
        TxPayload::Deploy {
            bytecode,
            value,
            constructor_args,
        } => Canon::Object(vec![
            ("type", Canon::Str("deploy".into())),
            ("bytecode", Canon::hex(bytecode.as_ref())),
            ("value", Canon::u256(*value)),
            ("constructor_args", Canon::hex(constructor_args.as_ref())),
        ]),
        TxPayload::Call { to, value, data } => Canon::Object(vec![
            ("type", Canon::Str("call".into())),
            ("to", Canon::hex(to.as_slice())),
            ("value", Canon::u256(*value)),
            ("data", Canon::hex(data.as_ref())),
        ]),
    }
}

fn tx_canon(tx: &Transaction, chain_id: &str) -> Canon {
    let data_field = match &tx.data {
        Some(bytes) => Canon::hex(bytes.as_ref()),
        None => Canon::Null,
    };
    Canon::Object(vec![
        ("chain_id", Canon::Str(chain_id.to_string())),
        ("nonce", Canon::u64(tx.nonce)),
        ("from", Canon::hex(tx.from.as_slice())),
        ("gas_limit", Canon::u64(tx.gas_limit)),
        ("gas_price", Canon::u256(tx.gas_price)),
        ("data", data_field),
        ("payload", payload_canon(&tx.payload)),
    ])
}

/// The deterministic preimage bytes of `{tx, chain_id}` (spec §4.2),
/// used both to compute `SignedTransaction::hash` and as the message
/// signed by the sender.
pub fn canonical_tx_bytes(tx: &Transaction, chain_id: &str) -> Vec<u8> {
    tx_canon(tx, chain_id).to_bytes()
}

pub fn hash_tx(tx: &Transaction, chain_id: &str) -> Hash {
    sha256(&canonical_tx_bytes(tx, chain_id))
}

fn header_canon(header: &BlockHeader) -> Canon {
    Canon::Object(vec![
        ("height", Canon::u64(header.height)),
        ("prev_hash", Canon::hex(&header.prev_hash.0)),
        ("timestamp_ms", Canon::u64(header.timestamp_ms)),
        ("tx_root", Canon::hex(&header.tx_root.0)),
        ("proposer", Canon::hex(header.proposer.as_slice())),
        ("gas_used", Canon::u64(header.gas_used)),
        ("gas_limit", Canon::u64(header.gas_limit)),
        ("base_fee_per_gas", Canon::u256(header.base_fee_per_gas)),
    ])
}

/// The deterministic preimage bytes of a block header (spec §4.2),
/// signed by the proposer to produce `Block::signature`.
pub fn canonical_header_bytes(header: &BlockHeader) -> Vec<u8> {
    header_canon(header).to_bytes()
}

pub fn hash_header(header: &BlockHeader) -> Hash {
    sha256(&canonical_header_bytes(header))
}

/// The preimage bytes of `{header, signature}`, hashed to produce
/// `Block::hash`.
pub fn canonical_block_bytes(header: &BlockHeader, signature: &[u8]) -> Vec<u8> {
    let canon = Canon::Object(vec![
        ("header", header_canon(header)),
        ("signature", Canon::hex(signature)),
    ]);
    canon.to_bytes()
}

pub fn hash_block(block: &Block) -> Hash {
    sha256(&canonical_block_bytes(&block.header, block.signature.as_bytes()))
}

/// The Merkle root of a block's transaction hashes (spec §4.2): a
/// bottom-up SHA-256 ladder over hex-string concatenation, duplicating
/// the last element on odd counts, hashing the empty string for an
/// empty list.
pub fn merkle_root(tx_hashes: &[Hash]) -> Hash {
    if tx_hashes.is_empty() {
        return sha256(b"");
    }
    // A do-while shape so a lone element still pairs with itself once
    // (an odd count, per spec, always pairs the last element with
    // itself) instead of being returned unfolded.
    let mut level: Vec<Hash> = tx_hashes.to_vec();
    loop {
        if level.len() % 2 != 0 {
            level.push(*level.last().unwrap());
        }
        let mut next = Vec::with_capacity(level.len() / 2);
        for pair in level.chunks(2) {
            let mut preimage = String::with_capacity(130);
            preimage.push_str(&format!("0x{}", hex::encode(pair[0].0)));
            preimage.push_str(&format!("0x{}", hex::encode(pair[1].0)));
            next.push(sha256(preimage.as_bytes()));
        }
        level = next;
        if level.len() <= 1 {
            break;
        }
    }
    level[0]
}

/// Billable byte size under the "4 per zero byte, 16 per non-zero
/// byte" rule shared by every transaction type (spec §4.4), also used
/// directly by `gas::required_gas`.
pub fn zero_nonzero_gas(data: &[u8]) -> u64 {
    data.iter()
        .map(|b| if *b == 0 { 4 } else { 16 })
        .sum()
}

pub fn encode_bytes_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

pub fn decode_bytes_hex(s: &str) -> Result<Vec<u8>, hex::FromHexError> {
    hex::decode(s.strip_prefix("0x").unwrap_or(s))
}
