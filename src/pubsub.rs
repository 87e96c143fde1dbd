//! Subscription fan-out (component C10, spec §4.10).
//!
//! Three independent broadcast channels -- blocks, transactions,
//! contract events -- so slow subscribers on one channel never back
//! up another. Uses `tokio::sync::broadcast`: a lagging receiver drops
//! the oldest unread items rather than blocking the writer task, which
//! matches spec §4.10's "slow consumers must not block commit" and
//! "no replay of missed items".

use tokio::sync::broadcast;

use crate::types::{Block, Event, SignedTransaction};

const CHANNEL_CAPACITY: usize = 1024;

/// A transaction observed either on admission into the mempool or as
/// part of a committed block (spec §4.10).
#[derive(Clone, Debug)]
pub enum TransactionNotice {
    Accepted(SignedTransaction),
    Included { tx: SignedTransaction, block_height: u64 },
}

#[derive(Clone, Debug)]
pub struct EventNotice {
    pub block_height: u64,
    pub tx_hash: crate::crypto::Hash,
    pub event: Event,
}

pub struct PubSub {
    blocks: broadcast::Sender<Block>,
    transactions: broadcast::Sender<TransactionNotice>,
    events: broadcast::Sender<EventNotice>,
}

impl Default for PubSub {
    fn default() -> Self {
        Self::new()
    }
}

impl PubSub {
    pub fn new() -> Self {
        let (blocks, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (transactions, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (events, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { blocks, transactions, events }
    }

    pub fn subscribe_blocks(&self) -> broadcast::Receiver<Block> {
        self.blocks.subscribe()
    }

    pub fn subscribe_transactions(&self) -> broadcast::Receiver<TransactionNotice> {
        self.transactions.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<EventNotice> {
        self.events.subscribe()
    }

    /// Publishes are best-effort: `send` only fails when there are no
    /// subscribers, which is not an error condition here.
    pub fn publish_block(&self, block: Block) {
        let _ = self.blocks.send(block);
    }

    pub fn publish_transaction(&self, notice: TransactionNotice) {
        let _ = self.transactions.send(notice);
    }

    pub fn publish_event(&self, notice: EventNotice) {
        let _ = self.events.send(notice);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{self as crypto, Algorithm};
    use crate::types::{Address, Transaction, TxPayload, U256};

    fn sample_stx() -> SignedTransaction {
        let kp = crypto::generate_ed25519_keypair();
        let tx = Transaction {
            nonce: 0,
            from: kp.public_key().derive_address().unwrap(),
            gas_limit: 21_000,
            gas_price: U256::from(1u64),
            data: None,
            payload: TxPayload::Transfer {
                to: Address::repeat_byte(1),
                amount: U256::from(1u64),
            },
        };
        SignedTransaction {
            signature: crypto::sign(&kp, b"msg"),
            public_key: kp.public_key(),
            algorithm: Algorithm::Ed25519,
            hash: crate::crypto::Hash::default(),
            tx,
        }
    }

    #[tokio::test]
    async fn subscriber_receives_published_transaction() {
        let pubsub = PubSub::new();
        let mut rx = pubsub.subscribe_transactions();
        pubsub.publish_transaction(TransactionNotice::Accepted(sample_stx()));
        let notice = rx.recv().await.unwrap();
        assert!(matches!(notice, TransactionNotice::Accepted(_)));
    }

    #[tokio::test]
    async fn publish_without_subscribers_does_not_panic() {
        let pubsub = PubSub::new();
        pubsub.publish_transaction(TransactionNotice::Accepted(sample_stx()));
    }

    #[tokio::test]
    async fn unsubscribed_receiver_is_dropped_cleanly() {
        let pubsub = PubSub::new();
        {
            let _rx = pubsub.subscribe_blocks();
        }
        // Dropping the receiver is the unsubscribe mechanism; publishing
        // afterward must not error even with zero live receivers.
        pubsub.publish_transaction(TransactionNotice::Accepted(sample_stx()));
    }
}
