//! Account/state store (component C3, spec §4.3).
//!
//! Holds the in-memory views the writer task mutates every block --
//! accounts, posts, contract code, and contract storage -- backed
//! durably through `storage::Storage`. Reads prefer the in-memory
//! view; a committed block's mutations are pushed down to the durable
//! store via `flush_to_storage`, called once per block so they become
//! visible together with the block and its receipts.
//!
//! Also implements `revm::Database` so the EVM host (C5) can read and
//! write through the same view without a separate adapter, the way
//! the teacher's `StateManager` does.

use std::collections::HashMap;
use std::sync::Mutex;

use revm::Database;
use revm::primitives::{AccountInfo as RevmAccountInfo, B256, Bytecode, U256 as RevmU256};
use thiserror::Error;

use crate::crypto::{Hash, hash_data};
use crate::storage::{BatchOp, Namespace, SharedStorage, StorageError};
use crate::types::{Account, Address, Bytes, PostRecord};

#[derive(Debug, Error)]
pub enum StateError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),
    #[error("post id already exists")]
    PostExists,
}

/// The writer task's live view of accounts, posts, and contract state.
pub struct StateStore {
    storage: SharedStorage,
    accounts: Mutex<HashMap<Address, Account>>,
    posts: Mutex<HashMap<String, PostRecord>>,
    code: Mutex<HashMap<Hash, Bytes>>,
    contract_storage: Mutex<HashMap<(Address, Hash), Hash>>,
}

impl StateStore {
    pub fn new(storage: SharedStorage) -> Self {
        Self {
            storage,
            accounts: Mutex::new(HashMap::new()),
            posts: Mutex::new(HashMap::new()),
            code: Mutex::new(HashMap::new()),
            contract_storage: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the account at `address`, creating a zero-valued,
    /// non-contract account on first reference (spec §4.3). Falls back
    /// to the durable store on cache miss before creating.
    pub fn get_or_create(&self, address: Address) -> Result<Account, StateError> {
        if let Some(account) = self.accounts.lock().unwrap().get(&address) {
            return Ok(account.clone());
        }
        let account = match self.storage.get_account(&address)? {
            Some(account) => account,
            None => Account::default(),
        };
        self.accounts.lock().unwrap().insert(address, account.clone());
        Ok(account)
    }

    pub fn get_account(&self, address: &Address) -> Result<Option<Account>, StateError> {
        if let Some(account) = self.accounts.lock().unwrap().get(address) {
            return Ok(Some(account.clone()));
        }
        Ok(self.storage.get_account(address)?)
    }

    /// Accounts are never destroyed, only overwritten (spec §3
    /// invariant).
    pub fn put_account(&self, address: Address, account: Account) {
        self.accounts.lock().unwrap().insert(address, account);
    }

    pub fn get_post(&self, post_id: &str) -> Result<Option<PostRecord>, StateError> {
        if let Some(post) = self.posts.lock().unwrap().get(post_id) {
            return Ok(Some(post.clone()));
        }
        Ok(self.storage.get_post(post_id)?)
    }

    /// Inserts a post record, rejecting an already-used `post_id`
    /// (spec §4.4 type-specific constraint for `post`).
    pub fn insert_post(&self, post_id: String, post: PostRecord) -> Result<(), StateError> {
        if self.get_post(&post_id)?.is_some() {
            return Err(StateError::PostExists);
        }
        self.posts.lock().unwrap().insert(post_id, post);
        Ok(())
    }

    pub fn get_code(&self, code_hash: &Hash) -> Result<Option<Bytes>, StateError> {
        if let Some(code) = self.code.lock().unwrap().get(code_hash) {
            return Ok(Some(code.clone()));
        }
        Ok(self.storage.get_code(code_hash)?.map(Bytes::from))
    }

    pub fn put_code(&self, code_hash: Hash, code: Bytes) {
        self.code.lock().unwrap().insert(code_hash, code);
    }

    pub fn get_contract_storage_slot(&self, address: &Address, key: &Hash) -> Result<Hash, StateError> {
        if let Some(value) = self.contract_storage.lock().unwrap().get(&(*address, *key)) {
            return Ok(*value);
        }
        Ok(self
            .storage
            .get_contract_storage(address, key)?
            .unwrap_or_default())
    }

    pub fn put_contract_storage_slot(&self, address: Address, key: Hash, value: Hash) {
        self.contract_storage.lock().unwrap().insert((address, key), value);
    }

    /// Snapshots every mutated in-memory entry down to the durable
    /// store. Called once per committed block.
    pub fn flush_to_storage(&self) -> Result<(), StateError> {
        for (address, account) in self.accounts.lock().unwrap().iter() {
            self.storage.save_account(address, account)?;
        }
        for (post_id, post) in self.posts.lock().unwrap().iter() {
            self.storage.save_post(post_id, post)?;
        }
        for (code_hash, code) in self.code.lock().unwrap().iter() {
            self.storage.save_code(code_hash, code.as_ref())?;
        }
        for ((address, key), value) in self.contract_storage.lock().unwrap().iter() {
            self.storage.save_contract_storage(address, key, value)?;
        }
        Ok(())
    }

    /// Renders the full in-memory cache as a batch of raw puts, so the
    /// block builder can persist a block, its receipts, and every
    /// account it touched in one atomic `Storage::batch_write` (spec
    /// §5 "make a block + receipts + mutated accounts visible
    /// together").
    pub fn to_batch_ops(&self) -> Result<Vec<BatchOp>, StateError> {
        let mut ops = Vec::new();
        for (address, account) in self.accounts.lock().unwrap().iter() {
            let bytes = bincode::serialize(account)?;
            ops.push(BatchOp::Put(Namespace::Accounts, address.as_slice().to_vec(), bytes));
        }
        for (post_id, post) in self.posts.lock().unwrap().iter() {
            let bytes = bincode::serialize(post)?;
            ops.push(BatchOp::Put(
                Namespace::Meta,
                format!("post:{post_id}").into_bytes(),
                bytes,
            ));
        }
        for (code_hash, code) in self.code.lock().unwrap().iter() {
            ops.push(BatchOp::Put(Namespace::Code, code_hash.0.to_vec(), code.to_vec()));
        }
        for ((address, key), value) in self.contract_storage.lock().unwrap().iter() {
            let mut storage_key = Vec::with_capacity(20 + 32);
            storage_key.extend_from_slice(address.as_slice());
            storage_key.extend_from_slice(&key.0);
            ops.push(BatchOp::Put(Namespace::ContractStorage, storage_key, value.0.to_vec()));
        }
        Ok(ops)
    }

    /// A deterministic digest of the full account and post state,
    /// used as the periodic snapshot `state_root` (spec §4.9).
    pub fn compute_state_root(&self) -> Hash {
        let accounts = self.accounts.lock().unwrap();
        let posts = self.posts.lock().unwrap();

        let mut account_entries: Vec<(Address, Account)> =
            accounts.iter().map(|(a, b)| (*a, b.clone())).collect();
        account_entries.sort_by_key(|(addr, _)| addr.as_slice().to_vec());

        let mut post_entries: Vec<(String, PostRecord)> =
            posts.iter().map(|(a, b)| (a.clone(), b.clone())).collect();
        post_entries.sort_by(|a, b| a.0.cmp(&b.0));

        hash_data(&(account_entries, post_entries))
    }
}

impl Database for StateStore {
    type Error = StateError;

    fn basic(&mut self, address: Address) -> Result<Option<RevmAccountInfo>, Self::Error> {
        let account = self.get_or_create(address)?;
        let code = if account.is_contract {
            self.get_code(&account.code_hash)?
                .map(|bytes| Bytecode::new_raw(bytes.0.into()))
        } else {
            None
        };
        Ok(Some(RevmAccountInfo {
            balance: account.balance,
            nonce: account.nonce,
            code_hash: B256::from(account.code_hash.0),
            code,
        }))
    }

    fn code_by_hash(&mut self, code_hash: B256) -> Result<Bytecode, Self::Error> {
        match self.get_code(&Hash(code_hash.0))? {
            Some(bytes) => Ok(Bytecode::new_raw(bytes.0.into())),
            None => Ok(Bytecode::default()),
        }
    }

    fn storage(&mut self, address: Address, index: RevmU256) -> Result<RevmU256, Self::Error> {
        let key = Hash(index.to_be_bytes());
        let value = self.get_contract_storage_slot(&address, &key)?;
        Ok(RevmU256::from_be_bytes(value.0))
    }

    fn block_hash(&mut self, _number: RevmU256) -> Result<B256, Self::Error> {
        Ok(B256::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemStorage;
    use crate::types::U256;
    use std::sync::Arc;

    #[test]
    fn get_or_create_is_lazy_and_zero_valued() {
        let store = StateStore::new(Arc::new(MemStorage::new()));
        let addr = Address::repeat_byte(9);
        let account = store.get_or_create(addr).unwrap();
        assert_eq!(account.balance, U256::ZERO);
        assert_eq!(account.nonce, 0);
        assert!(!account.is_contract);
    }

    #[test]
    fn accounts_are_never_removed_only_overwritten() {
        let store = StateStore::new(Arc::new(MemStorage::new()));
        let addr = Address::repeat_byte(1);
        store.put_account(
            addr,
            Account {
                balance: U256::from(5u64),
                ..Default::default()
            },
        );
        store.put_account(
            addr,
            Account {
                balance: U256::from(10u64),
                ..Default::default()
            },
        );
        assert_eq!(store.get_account(&addr).unwrap().unwrap().balance, U256::from(10u64));
    }

    #[test]
    fn duplicate_post_id_is_rejected() {
        let store = StateStore::new(Arc::new(MemStorage::new()));
        let post = PostRecord {
            owner: Address::ZERO,
            content_hash: Hash::default(),
            pointer: None,
            block_height: 1,
        };
        store.insert_post("abc".into(), post.clone()).unwrap();
        assert!(matches!(
            store.insert_post("abc".into(), post),
            Err(StateError::PostExists)
        ));
    }

    #[test]
    fn state_root_is_deterministic_across_instances() {
        let store_a = StateStore::new(Arc::new(MemStorage::new()));
        let store_b = StateStore::new(Arc::new(MemStorage::new()));
        let addr = Address::repeat_byte(3);
        let account = Account {
            balance: U256::from(77u64),
            nonce: 2,
            ..Default::default()
        };
        store_a.put_account(addr, account.clone());
        store_b.put_account(addr, account);
        assert_eq!(store_a.compute_state_root(), store_b.compute_state_root());
    }
}
