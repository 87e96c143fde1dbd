//! Peer protocol envelope and a minimal libp2p gossipsub/mdns backend
//! (spec §6 "Peer protocol envelope"). Transport semantics beyond the
//! envelope format are explicitly out of scope; this gives the leader
//! and followers a working gossip channel without specifying wire
//! compatibility guarantees.

use futures::StreamExt;
use libp2p::{
    gossipsub, mdns,
    swarm::{NetworkBehaviour, SwarmEvent},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Block, SignedTransaction};

/// The three envelope kinds spec §6 names.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Envelope {
    Hello { role: Role },
    Tx { data: SignedTransaction },
    Block { data: Block },
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Leader,
    Follower,
}

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
    #[error("gossipsub behaviour error: {0}")]
    Gossipsub(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

const BLOCKS_TOPIC: &str = "forge-mini-chain/blocks/1";
const TRANSACTIONS_TOPIC: &str = "forge-mini-chain/transactions/1";

#[derive(NetworkBehaviour)]
struct ForgeBehaviour {
    gossipsub: gossipsub::Behaviour,
    mdns: mdns::tokio::Behaviour,
}

/// Gossip-based peer network. Discovers peers over mdns on the local
/// network and fans envelopes out over two gossipsub topics.
pub struct PeerNetwork {
    swarm: libp2p::Swarm<ForgeBehaviour>,
    blocks_topic: gossipsub::IdentTopic,
    transactions_topic: gossipsub::IdentTopic,
}

impl PeerNetwork {
    pub fn new(role: Role, p2p_port: u16) -> Result<Self, PeerError> {
        let mut swarm = libp2p::SwarmBuilder::with_new_identity()
            .with_tokio()
            .with_tcp(
                libp2p::tcp::Config::default(),
                libp2p::noise::Config::new,
                libp2p::yamux::Config::default,
            )
            .map_err(|e| PeerError::Gossipsub(e.to_string()))?
            .with_behaviour(|key| {
                let gossipsub_config = gossipsub::ConfigBuilder::default()
                    .validation_mode(gossipsub::ValidationMode::Strict)
                    .build()
                    .map_err(|e| e.to_string())?;
                let gossipsub = gossipsub::Behaviour::new(
                    gossipsub::MessageAuthenticity::Signed(key.clone()),
                    gossipsub_config,
                )
                .map_err(|e| e.to_string())?;
                let mdns = mdns::tokio::Behaviour::new(mdns::Config::default(), key.public().to_peer_id())
                    .map_err(|e| e.to_string())?;
                Ok(ForgeBehaviour { gossipsub, mdns })
            })
            .map_err(|e| PeerError::Gossipsub(e.to_string()))?
            .build();

        let blocks_topic = gossipsub::IdentTopic::new(BLOCKS_TOPIC);
        let transactions_topic = gossipsub::IdentTopic::new(TRANSACTIONS_TOPIC);
        swarm
            .behaviour_mut()
            .gossipsub
            .subscribe(&blocks_topic)
            .map_err(|e| PeerError::Gossipsub(e.to_string()))?;
        swarm
            .behaviour_mut()
            .gossipsub
            .subscribe(&transactions_topic)
            .map_err(|e| PeerError::Gossipsub(e.to_string()))?;

        let listen_addr: libp2p::Multiaddr = format!("/ip4/0.0.0.0/tcp/{p2p_port}")
            .parse()
            .expect("well-formed multiaddr");
        swarm.listen_on(listen_addr)?;

        let hello = Envelope::Hello { role };
        let payload = serde_json::to_vec(&hello)?;
        let _ = swarm.behaviour_mut().gossipsub.publish(blocks_topic.clone(), payload);

        Ok(Self {
            swarm,
            blocks_topic,
            transactions_topic,
        })
    }

    pub fn publish_block(&mut self, block: &Block) -> Result<(), PeerError> {
        let envelope = Envelope::Block { data: block.clone() };
        let payload = serde_json::to_vec(&envelope)?;
        self.swarm
            .behaviour_mut()
            .gossipsub
            .publish(self.blocks_topic.clone(), payload)
            .map_err(|e| PeerError::Gossipsub(e.to_string()))?;
        Ok(())
    }

    pub fn publish_transaction(&mut self, stx: &SignedTransaction) -> Result<(), PeerError> {
        let envelope = Envelope::Tx { data: stx.clone() };
        let payload = serde_json::to_vec(&envelope)?;
        self.swarm
            .behaviour_mut()
            .gossipsub
            .publish(self.transactions_topic.clone(), payload)
            .map_err(|e| PeerError::Gossipsub(e.to_string()))?;
        Ok(())
    }

    /// Polls the swarm for the next inbound envelope, decoding gossipsub
    /// messages and ignoring mdns/connection housekeeping events.
    pub async fn next_envelope(&mut self) -> Option<Envelope> {
        loop {
            match self.swarm.select_next_some().await {
                SwarmEvent::Behaviour(ForgeBehaviourEvent::Gossipsub(gossipsub::Event::Message {
                    message,
                    ..
                })) => match serde_json::from_slice::<Envelope>(&message.data) {
                    Ok(envelope) => return Some(envelope),
                    Err(err) => {
                        log::warn!("dropping malformed peer envelope: {err}");
                        continue;
                    }
                },
                SwarmEvent::Behaviour(ForgeBehaviourEvent::Mdns(mdns::Event::Discovered(peers))) => {
                    for (peer_id, _addr) in peers {
                        self.swarm.behaviour_mut().gossipsub.add_explicit_peer(&peer_id);
                    }
                }
                SwarmEvent::Behaviour(ForgeBehaviourEvent::Mdns(mdns::Event::Expired(peers))) => {
                    for (peer_id, _addr) in peers {
                        self.swarm.behaviour_mut().gossipsub.remove_explicit_peer(&peer_id);
                    }
                }
                _ => continue,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{self as crypto, Algorithm};
    use crate::types::{Address, Transaction, TxPayload, U256};

    #[test]
    fn envelope_round_trips_through_json() {
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
        let stx = SignedTransaction {
            signature: crypto::sign(&kp, b"msg"),
            public_key: kp.public_key(),
            algorithm: Algorithm::Ed25519,
            hash: crate::crypto::Hash::default(),
            tx,
        };
        let envelope = Envelope::Tx { data: stx };
        let bytes = serde_json::to_vec(&envelope).unwrap();
        let decoded: Envelope = serde_json::from_slice(&bytes).unwrap();
        assert!(matches!(decoded, Envelope::Tx { .. }));
    }

    #[test]
    fn hello_envelope_round_trips() {
        let envelope = Envelope::Hello { role: Role::Leader };
        let bytes = serde_json::to_vec(&envelope).unwrap();
        let decoded: Envelope = serde_json::from_slice(&bytes).unwrap();
        assert!(matches!(decoded, Envelope::Hello { role: Role::Leader }));
    }
}
