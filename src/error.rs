//! Top-level error aggregation (spec §7 "Error handling design").
//!
//! Each module owns its own `thiserror` enum; `NodeError` folds them
//! into the four-way taxonomy §7 names (validation/execution/
//! consensus/storage -- network errors are handled locally by the
//! peer layer's retry-with-backoff and never reach this type) so
//! callers at the node boundary can match on `kind()` without caring
//! which module produced the error.

use thiserror::Error;

use crate::block::BlockError;
use crate::gas::ValidationError;
use crate::genesis::GenesisError;
use crate::mempool::MempoolError;
use crate::state::StateError;
use crate::storage::StorageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Execution,
    Consensus,
    Storage,
}

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("validation: {0}")]
    Validation(#[from] ValidationError),

    #[error("mempool: {0}")]
    Mempool(#[from] MempoolError),

    #[error("execution/state: {0}")]
    State(#[from] StateError),

    #[error("consensus: {0}")]
    Consensus(String),

    #[error("storage: {0}")]
    Storage(#[from] StorageError),

    #[error("genesis: {0}")]
    Genesis(#[from] GenesisError),

    #[error("config: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("block: {0}")]
    Block(#[from] BlockError),
}

impl NodeError {
    /// The stable error-kind string spec §7 requires to cross a
    /// user-visible boundary ("no stack traces cross the boundary").
    pub fn kind(&self) -> ErrorKind {
        match self {
            NodeError::Validation(_) | NodeError::Mempool(MempoolError::Validation(_)) => {
                ErrorKind::Validation
            }
            NodeError::Mempool(_) => ErrorKind::Validation,
            NodeError::State(_) => ErrorKind::Execution,
            NodeError::Consensus(_) => ErrorKind::Consensus,
            NodeError::Storage(_) | NodeError::Genesis(_) | NodeError::Config(_) => ErrorKind::Storage,
            NodeError::Block(BlockError::State(_)) | NodeError::Block(BlockError::Storage(_)) => {
                ErrorKind::Storage
            }
            NodeError::Block(_) => ErrorKind::Consensus,
        }
    }

    pub fn kind_str(&self) -> &'static str {
        match self.kind() {
            ErrorKind::Validation => "validation",
            ErrorKind::Execution => "execution",
            ErrorKind::Consensus => "consensus",
            ErrorKind::Storage => "storage",
        }
    }

    /// §7: storage errors are fatal for the current commit and should
    /// trigger node shutdown to prevent divergence across nodes.
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind(), ErrorKind::Storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_are_fatal_others_are_not() {
        let validation = NodeError::Consensus("bad prev_hash".to_string());
        assert!(!validation.is_fatal());
        assert_eq!(validation.kind_str(), "consensus");
    }
}
