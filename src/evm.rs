//! EVM host (component C5, spec §4.5).
//!
//! Wraps revm's legacy `EVM`/`Database` API (the same shape the
//! teacher's executor uses: `EVM::new()`, `evm.database(&mut db)`,
//! populate `evm.env.tx`/`evm.env.block`, call `.transact()`) behind
//! the two entry points the state transition needs: `deploy` and
//! `call`. Every storage/code/account mutation the EVM produces is
//! written back through `StateStore` before returning, so C3 stays
//! the single source of truth for world state.

use alloy_primitives::keccak256;
use revm::EVM;
use revm::primitives::{Bytecode, CreateScheme, ExecutionResult, Output, TransactTo, U256 as RevmU256};

use crate::crypto::Hash;
use crate::state::{StateError, StateStore};
use crate::types::{Address, Bytes, Event, U256};

/// Block context the EVM needs but which lives in the header, not the
/// state store (spec §4.5).
#[derive(Clone, Copy, Debug)]
pub struct BlockContext {
    pub height: u64,
    pub timestamp_ms: u64,
    pub coinbase: Address,
    pub base_fee: U256,
    pub gas_limit: u64,
}

pub struct DeployOutcome {
    pub success: bool,
    pub gas_used: u64,
    pub runtime_code: Bytes,
    pub address: Address,
    pub logs: Vec<Event>,
    pub error: Option<String>,
}

pub struct CallOutcome {
    pub success: bool,
    pub gas_used: u64,
    pub return_data: Bytes,
    pub logs: Vec<Event>,
    pub error: Option<String>,
}

/// Contract addresses for new deployments are `Keccak-256(concat(deployer,
/// nonce_byte))[12..32]` -- spec §4.5's simplified, deterministic
/// scheme (not Ethereum's RLP encoding).
pub fn derive_contract_address(deployer: Address, nonce_byte: u8) -> Address {
    let mut preimage = Vec::with_capacity(21);
    preimage.extend_from_slice(deployer.as_slice());
    preimage.push(nonce_byte);
    let digest = keccak256(&preimage);
    Address::from_slice(&digest.0[12..32])
}

fn configure_block_env(evm: &mut EVM<&mut StateStore>, ctx: BlockContext) {
    evm.env.block.number = RevmU256::from(ctx.height);
    evm.env.block.timestamp = RevmU256::from(ctx.timestamp_ms / 1000);
    evm.env.block.coinbase = ctx.coinbase;
    evm.env.block.basefee = ctx.base_fee;
    evm.env.block.gas_limit = RevmU256::from(ctx.gas_limit);
}

fn apply_result_state(
    state: &mut StateStore,
    result_state: revm::primitives::State,
) -> Result<(), StateError> {
    for (address, account) in result_state {
        if !account.is_touched() {
            continue;
        }
        let code_hash = Hash(account.info.code_hash.0);
        if let Some(code) = &account.info.code {
            if !code.is_empty() {
                state.put_code(code_hash, Bytes::from(code.original_bytes().to_vec()));
            }
        }
        let mut current = state.get_or_create(address)?;
        current.balance = account.info.balance;
        current.nonce = account.info.nonce;
        if account.info.code_hash != revm::primitives::KECCAK_EMPTY {
            current.is_contract = true;
            current.code_hash = code_hash;
        }
        state.put_account(address, current);

        for (slot, value) in account.storage {
            let key = Hash(slot.to_be_bytes());
            let stored = Hash(value.present_value.to_be_bytes());
            state.put_contract_storage_slot(address, key, stored);
        }
    }
    Ok(())
}

fn extract_logs(logs: Vec<revm::primitives::Log>) -> Vec<Event> {
    logs.into_iter()
        .map(|log| Event {
            topics: log.topics.into_iter().map(|t| Hash(t.0)).collect(),
            data: Bytes::from(log.data.to_vec()),
        })
        .collect()
}

/// Deploys `code` with `ctor_args` appended (the common
/// constructor-then-runtime-code convention), crediting `value` to the
/// new contract on success.
pub fn deploy(
    state: &mut StateStore,
    caller: Address,
    code: &[u8],
    ctor_args: &[u8],
    value: U256,
    gas_limit: u64,
    gas_price: U256,
    nonce_byte: u8,
    ctx: BlockContext,
) -> Result<DeployOutcome, StateError> {
    let address = derive_contract_address(caller, nonce_byte);
    let mut init_code = Vec::with_capacity(code.len() + ctor_args.len());
    init_code.extend_from_slice(code);
    init_code.extend_from_slice(ctor_args);

    let mut evm = EVM::new();
    evm.database(state);
    configure_block_env(&mut evm, ctx);
    evm.env.tx.caller = caller;
    evm.env.tx.transact_to = TransactTo::Create(CreateScheme::Create);
    evm.env.tx.data = init_code.into();
    evm.env.tx.value = value;
    evm.env.tx.gas_limit = gas_limit;
    evm.env.tx.gas_price = gas_price;
    evm.env.tx.gas_priority_fee = None;
    evm.env.tx.nonce = None;

    let result_and_state = match evm.transact() {
        Ok(r) => r,
        Err(err) => {
            return Ok(DeployOutcome {
                success: false,
                gas_used: gas_limit,
                runtime_code: Bytes::default(),
                address,
                logs: vec![],
                error: Some(format!("{err:?}")),
            });
        }
    };

    match result_and_state.result {
        ExecutionResult::Success { gas_used, logs, output, .. } => {
            let runtime_code = match output {
                Output::Create(bytes, _) => Bytes::from(bytes.to_vec()),
                Output::Call(bytes) => Bytes::from(bytes.to_vec()),
            };
            apply_result_state(state, result_and_state.state)?;
            state.put_code(crate::crypto::keccak(&runtime_code), runtime_code.clone());
            Ok(DeployOutcome {
                success: true,
                gas_used,
                runtime_code,
                address,
                logs: extract_logs(logs),
                error: None,
            })
        }
        ExecutionResult::Revert { gas_used, output } => Ok(DeployOutcome {
            success: false,
            gas_used,
            runtime_code: Bytes::default(),
            address,
            logs: vec![],
            error: Some(format!("reverted: 0x{}", hex::encode(output))),
        }),
        ExecutionResult::Halt { gas_used, reason } => Ok(DeployOutcome {
            success: false,
            gas_used,
            runtime_code: Bytes::default(),
            address,
            logs: vec![],
            error: Some(format!("halted: {reason:?}")),
        }),
    }
}

/// Calls an existing contract at `to`.
pub fn call(
    state: &mut StateStore,
    caller: Address,
    to: Address,
    data: &[u8],
    value: U256,
    gas_limit: u64,
    gas_price: U256,
    ctx: BlockContext,
) -> Result<CallOutcome, StateError> {
    let mut evm = EVM::new();
    evm.database(state);
    configure_block_env(&mut evm, ctx);
    evm.env.tx.caller = caller;
    evm.env.tx.transact_to = TransactTo::Call(to);
    evm.env.tx.data = data.to_vec().into();
    evm.env.tx.value = value;
    evm.env.tx.gas_limit = gas_limit;
    evm.env.tx.gas_price = gas_price;
    evm.env.tx.gas_priority_fee = None;
    evm.env.tx.nonce = None;

    let result_and_state = match evm.transact() {
        Ok(r) => r,
        Err(err) => {
            return Ok(CallOutcome {
                success: false,
                gas_used: gas_limit,
                return_data: Bytes::default(),
                logs: vec![],
                error: Some(format!("{err:?}")),
            });
        }
    };

    match result_and_state.result {
        ExecutionResult::Success { gas_used, logs, output, .. } => {
            apply_result_state(state, result_and_state.state)?;
            let return_data = match output {
                Output::Call(bytes) => Bytes::from(bytes.to_vec()),
                Output::Create(bytes, _) => Bytes::from(bytes.to_vec()),
            };
            Ok(CallOutcome {
                success: true,
                gas_used,
                return_data,
                logs: extract_logs(logs),
                error: None,
            })
        }
        ExecutionResult::Revert { gas_used, output } => Ok(CallOutcome {
            success: false,
            gas_used,
            return_data: Bytes::from(output.to_vec()),
            logs: vec![],
            error: Some("reverted".to_string()),
        }),
        ExecutionResult::Halt { gas_used, reason } => Ok(CallOutcome {
            success: false,
            gas_used,
            return_data: Bytes::default(),
            logs: vec![],
            error: Some(format!("halted: {reason:?}")),
        }),
    }
}

/// Reads a contract's runtime code directly from the state store,
/// used by the query surface (§6 `GET /contract/{address}/code`).
pub fn runtime_code(state: &StateStore, address: &Address) -> Result<Option<Bytes>, StateError> {
    let account = match state.get_account(address)? {
        Some(account) if account.is_contract => account,
        _ => return Ok(None),
    };
    state.get_code(&account.code_hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contract_address_is_deterministic_and_size_correct() {
        let deployer = Address::repeat_byte(0xAB);
        let a = derive_contract_address(deployer, 0);
        let b = derive_contract_address(deployer, 0);
        let c = derive_contract_address(deployer, 1);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_slice().len(), 20);
    }
}
