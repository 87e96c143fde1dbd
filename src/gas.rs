//! Gas schedule, pre-execution validator, base-fee update, and the
//! per-sender rate limiter (component C4, spec §4.4).

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use thiserror::Error;

use crate::codec::{self, zero_nonzero_gas};
use crate::state::StateStore;
use crate::types::{Account, Address, SignedTransaction, TxPayload, U256};

pub const BASE_TX_GAS: u64 = 21_000;
pub const MIN_CONSUMED_GAS: u64 = 21_000;

pub const MAX_POST_ID_LEN: usize = 256;
pub const MAX_REPUTATION_DELTA: i64 = 100;
pub const MAX_DEPLOY_BYTECODE_LEN: usize = 24_576;
pub const MAX_CALL_DATA_LEN: usize = 4_096;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("structural: {0}")]
    Structural(&'static str),
    #[error("signature or preimage invalid")]
    BadSignature,
    #[error("nonce mismatch: expected {expected}, got {got}")]
    NonceMismatch { expected: u64, got: u64 },
    #[error("gas_limit below required_gas: {gas_limit} < {required}")]
    GasLimitTooLow { gas_limit: u64, required: u64 },
    #[error("block gas limit exceeded")]
    BlockGasLimitExceeded,
    #[error("type-specific: {0}")]
    TypeSpecific(&'static str),
    #[error("insufficient balance")]
    InsufficientBalance,
    #[error("rate limit exceeded")]
    RateLimited,
}

/// `required_gas(tx)` per spec §4.4's type-surcharge table plus the
/// shared "4 per zero byte, 16 per non-zero byte" data rule.
pub fn required_gas(tx: &crate::types::Transaction) -> u64 {
    let surcharge = match &tx.payload {
        TxPayload::Transfer { .. } => 0,
        TxPayload::Post { .. } => 20_000,
        TxPayload::Reputation { .. } => 15_000,
        TxPayload::Deploy { bytecode, .. } => 32_000 + 200 * bytecode.len() as u64,
        TxPayload::Call { .. } => 25_000,
    };
    BASE_TX_GAS + surcharge + zero_nonzero_gas(tx.billable_data())
}

/// Validates `stx` against the current account state, a given
/// `min_gas_price` floor, and the block's remaining gas budget. Runs
/// the six checks from spec §4.4 in order, stopping at the first
/// failure.
pub fn validate(
    stx: &SignedTransaction,
    chain_id: &str,
    state: &StateStore,
    min_gas_price: U256,
    block_gas_limit: u64,
    block_gas_used_so_far: u64,
) -> Result<Account, ValidationError> {
    let tx = &stx.tx;

    // 1. Structural
    if tx.gas_limit == 0 {
        return Err(ValidationError::Structural("gas_limit must be > 0"));
    }
    if tx.gas_price < min_gas_price {
        return Err(ValidationError::Structural("gas_price below min_gas_price"));
    }

    // 2. Signature and preimage
    let expected_hash = codec::hash_tx(tx, chain_id);
    if expected_hash != stx.hash {
        return Err(ValidationError::BadSignature);
    }
    if !crate::crypto::verify(&stx.public_key, &codec::canonical_tx_bytes(tx, chain_id), &stx.signature) {
        return Err(ValidationError::BadSignature);
    }
    let derived = stx
        .public_key
        .derive_address()
        .map_err(|_| ValidationError::BadSignature)?;
    if derived != tx.from {
        return Err(ValidationError::BadSignature);
    }

    // 3. Nonce
    let account = state
        .get_account(&tx.from)
        .map_err(|_| ValidationError::Structural("state lookup failed"))?
        .unwrap_or_default();
    if tx.nonce != account.nonce {
        return Err(ValidationError::NonceMismatch {
            expected: account.nonce,
            got: tx.nonce,
        });
    }

    // 4. Budget
    let required = required_gas(tx);
    if tx.gas_limit < required {
        return Err(ValidationError::GasLimitTooLow {
            gas_limit: tx.gas_limit,
            required,
        });
    }
    if block_gas_used_so_far + tx.gas_limit > block_gas_limit {
        return Err(ValidationError::BlockGasLimitExceeded);
    }

    // 5. Type-specific
    match &tx.payload {
        TxPayload::Transfer { to, amount } => {
            if *to == tx.from {
                return Err(ValidationError::TypeSpecific("transfer to == from"));
            }
            if amount.is_zero() {
                return Err(ValidationError::TypeSpecific("transfer amount must be > 0"));
            }
        }
        TxPayload::Post { post_id, .. } => {
            if post_id.is_empty() || post_id.len() > MAX_POST_ID_LEN {
                return Err(ValidationError::TypeSpecific("post_id length out of range"));
            }
            if state
                .get_post(post_id)
                .map_err(|_| ValidationError::Structural("state lookup failed"))?
                .is_some()
            {
                return Err(ValidationError::TypeSpecific("post_id already used"));
            }
        }
        TxPayload::Reputation { target, delta, .. } => {
            if *target == tx.from {
                return Err(ValidationError::TypeSpecific("reputation target == from"));
            }
            if delta.unsigned_abs() > MAX_REPUTATION_DELTA as u64 {
                return Err(ValidationError::TypeSpecific("reputation delta out of range"));
            }
        }
        TxPayload::Deploy { bytecode, .. } => {
            if bytecode.is_empty() || bytecode.len() > MAX_DEPLOY_BYTECODE_LEN {
                return Err(ValidationError::TypeSpecific("deploy bytecode length out of range"));
            }
        }
        TxPayload::Call { to, data, .. } => {
            let target = state
                .get_account(to)
                .map_err(|_| ValidationError::Structural("state lookup failed"))?;
            match target {
                Some(account) if account.is_contract => {}
                _ => return Err(ValidationError::TypeSpecific("call target is not a contract")),
            }
            if data.len() > MAX_CALL_DATA_LEN {
                return Err(ValidationError::TypeSpecific("call data too large"));
            }
        }
    }

    // 6. Funds
    let fee = U256::from(tx.gas_limit) * tx.gas_price;
    let required_funds = fee + tx.payload.value_out();
    if account.balance < required_funds {
        return Err(ValidationError::InsufficientBalance);
    }

    Ok(account)
}

/// EIP-1559-style base-fee update applied when sealing block N+1 from
/// N (spec §4.4).
pub fn next_base_fee(base_fee: U256, gas_used: u64, gas_limit: u64, min_gas_price: U256) -> U256 {
    let target = gas_limit / 2;
    if gas_used == target {
        return base_fee;
    }
    let gas_used = gas_used as i128;
    let target = target as i128;
    let denom = target * 8;
    if denom == 0 {
        return base_fee.max(min_gas_price);
    }
    let base_fee_i: i128 = base_fee.try_into().unwrap_or(i128::MAX);
    let delta = base_fee_i * (gas_used - target) / denom;
    let adjusted = base_fee_i + delta;
    let adjusted = adjusted.max(0) as u128;
    U256::from(adjusted).max(min_gas_price)
}

/// Per-sender sliding-window rate limiter: rejects a sender's
/// (max_tx_per_minute + 1)th accepted transaction within the trailing
/// 60 seconds.
pub struct RateLimiter {
    max_tx_per_minute: u32,
    window_ms: u64,
    history: Mutex<HashMap<Address, VecDeque<u64>>>,
}

impl RateLimiter {
    pub fn new(max_tx_per_minute: u32) -> Self {
        Self {
            max_tx_per_minute,
            window_ms: 60_000,
            history: Mutex::new(HashMap::new()),
        }
    }

    /// Records an acceptance at `now_ms`, returning whether it is
    /// within the allowed rate.
    pub fn check_and_record(&self, sender: Address, now_ms: u64) -> Result<(), ValidationError> {
        let mut history = self.history.lock().unwrap();
        let entry = history.entry(sender).or_default();
        while let Some(&front) = entry.front() {
            if now_ms.saturating_sub(front) > self.window_ms {
                entry.pop_front();
            } else {
                break;
            }
        }
        if entry.len() >= self.max_tx_per_minute as usize {
            return Err(ValidationError::RateLimited);
        }
        entry.push_back(now_ms);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Bytes, Transaction};

    #[test]
    fn required_gas_matches_schedule() {
        let tx = Transaction {
            nonce: 0,
            from: Address::ZERO,
            gas_limit: 21_000,
            gas_price: U256::from(1u64),
            data: None,
            payload: TxPayload::Transfer {
                to: Address::repeat_byte(1),
                amount: U256::from(1u64),
            },
        };
        assert_eq!(required_gas(&tx), 21_000);

        let deploy = Transaction {
            nonce: 0,
            from: Address::ZERO,
            gas_limit: 21_000,
            gas_price: U256::from(1u64),
            data: None,
            payload: TxPayload::Deploy {
                bytecode: Bytes::from(vec![0u8; 10]),
                value: U256::ZERO,
                constructor_args: Bytes::from(vec![0, 1]),
            },
        };
        assert_eq!(required_gas(&deploy), 21_000 + 32_000 + 2_000 + (4 + 16));
    }

    #[test]
    fn base_fee_unchanged_at_target_utilization() {
        let base_fee = U256::from(1_000_000_000u64);
        let updated = next_base_fee(base_fee, 15_000_000, 30_000_000, U256::from(1u64));
        assert_eq!(updated, base_fee);
    }

    #[test]
    fn base_fee_decreases_under_utilization() {
        let base_fee = U256::from(1_000_000_000u64);
        let gas_limit = 30_000_000u64;
        let updated = next_base_fee(base_fee, gas_limit / 4, gas_limit, U256::from(1u64));
        assert!(updated < base_fee);
    }

    #[test]
    fn rate_limiter_allows_exactly_the_configured_cap() {
        let limiter = RateLimiter::new(60);
        let addr = Address::repeat_byte(1);
        for i in 0..60u64 {
            assert!(limiter.check_and_record(addr, i * 100).is_ok());
        }
        assert!(matches!(
            limiter.check_and_record(addr, 59 * 100),
            Err(ValidationError::RateLimited)
        ));
    }

    #[test]
    fn rate_limiter_window_slides() {
        let limiter = RateLimiter::new(1);
        let addr = Address::repeat_byte(1);
        assert!(limiter.check_and_record(addr, 0).is_ok());
        assert!(limiter.check_and_record(addr, 1_000).is_err());
        assert!(limiter.check_and_record(addr, 61_000).is_ok());
    }
}
