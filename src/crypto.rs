//! Hashing and signature primitives (component C1).
//!
//! Two signature suites are supported side by side: Ed25519 (raw
//! message signing, SHA-256-derived address) and secp256k1 ECDSA
//! (SHA-256 preimage, Keccak-256-derived address). Both share the same
//! `PublicKey`/`Signature`/`Algorithm` surface so the rest of the node
//! never has to branch on suite except at verification time.

use std::fmt;

use alloy_primitives::{Address, keccak256};
use ed25519_dalek::{Signature as EdSignature, Signer, Verifier, VerifyingKey as EdVerifyingKey};
use k256::ecdsa::{
    Signature as K256Signature, SigningKey as K256SigningKey, VerifyingKey as K256VerifyingKey,
    signature::Verifier as K256Verifier,
};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A 32-byte domain-object hash, rendered as `0x`-prefixed hex.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl Serialize for Hash {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(self.0)))
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let s = s.strip_prefix("0x").unwrap_or(&s);
        let bytes = hex::decode(s).map_err(serde::de::Error::custom)?;
        if bytes.len() != 32 {
            return Err(serde::de::Error::custom("hash must be 32 bytes"));
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        Ok(Hash(out))
    }
}

impl From<[u8; 32]> for Hash {
    fn from(value: [u8; 32]) -> Self {
        Hash(value)
    }
}

/// SHA-256 of the bincode encoding of `value`. Used for storage keys
/// and anywhere we need a hash of an in-memory structure rather than
/// the canonical wire encoding (see `codec::canonical_bytes` for the
/// signing/consensus-critical preimage).
pub fn hash_data<T: Serialize>(value: &T) -> Hash {
    let bytes = bincode::serialize(value).expect("serialization of domain object cannot fail");
    sha256(&bytes)
}

pub fn sha256(bytes: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    Hash(hasher.finalize().into())
}

pub fn keccak(bytes: &[u8]) -> Hash {
    Hash(keccak256(bytes).0)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Algorithm {
    Ed25519,
    Secp256k1,
}

/// Raw public key bytes, tagged by suite. Ed25519 keys are the
/// standard 32-byte compressed point; secp256k1 keys are stored
/// uncompressed with the `0x04` SEC1 prefix (65 bytes total), matching
/// the address-derivation rule in spec §4.1 (`public_key[1..]`).
#[derive(Clone, PartialEq, Eq)]
pub enum PublicKey {
    Ed25519([u8; 32]),
    Secp256k1([u8; 65]),
}

impl PublicKey {
    pub fn algorithm(&self) -> Algorithm {
        match self {
            PublicKey::Ed25519(_) => Algorithm::Ed25519,
            PublicKey::Secp256k1(_) => Algorithm::Secp256k1,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            PublicKey::Ed25519(b) => b.as_slice(),
            PublicKey::Secp256k1(b) => b.as_slice(),
        }
    }

    /// Derives the 20-byte address for this key per spec §3/§4.1.
    pub fn derive_address(&self) -> Result<Address, CryptoError> {
        match self {
            PublicKey::Ed25519(bytes) => {
                let digest = sha256(bytes);
                Ok(Address::from_slice(&digest.0[0..20]))
            }
            PublicKey::Secp256k1(bytes) => {
                if bytes[0] != 0x04 {
                    return Err(CryptoError::MalformedKey);
                }
                let digest = keccak(&bytes[1..]);
                Ok(Address::from_slice(&digest.0[12..32]))
            }
        }
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey(0x{})", hex::encode(self.as_bytes()))
    }
}

impl Serialize for PublicKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Wire<'a> {
            algorithm: Algorithm,
            key: String,
        }
        Wire {
            algorithm: self.algorithm(),
            key: format!("0x{}", hex::encode(self.as_bytes())),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Wire {
            algorithm: Algorithm,
            key: String,
        }
        let wire = Wire::deserialize(deserializer)?;
        let raw = hex::decode(wire.key.strip_prefix("0x").unwrap_or(&wire.key))
            .map_err(serde::de::Error::custom)?;
        match wire.algorithm {
            Algorithm::Ed25519 => {
                let arr: [u8; 32] = raw
                    .try_into()
                    .map_err(|_| serde::de::Error::custom("ed25519 key must be 32 bytes"))?;
                Ok(PublicKey::Ed25519(arr))
            }
            Algorithm::Secp256k1 => {
                let arr: [u8; 65] = raw
                    .try_into()
                    .map_err(|_| serde::de::Error::custom("secp256k1 key must be 65 bytes"))?;
                Ok(PublicKey::Secp256k1(arr))
            }
        }
    }
}

/// Raw signature bytes, tagged by suite. Both suites here produce a
/// fixed 64-byte signature (r||s for ECDSA, R||S for EdDSA).
#[derive(Clone, PartialEq, Eq)]
pub enum Signature {
    Ed25519([u8; 64]),
    Secp256k1([u8; 64]),
}

impl Signature {
    pub fn algorithm(&self) -> Algorithm {
        match self {
            Signature::Ed25519(_) => Algorithm::Ed25519,
            Signature::Secp256k1(_) => Algorithm::Secp256k1,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Signature::Ed25519(b) => b.as_slice(),
            Signature::Secp256k1(b) => b.as_slice(),
        }
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature(0x{})", hex::encode(self.as_bytes()))
    }
}

impl Serialize for Signature {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Wire<'a> {
            algorithm: Algorithm,
            sig: String,
        }
        Wire {
            algorithm: self.algorithm(),
            sig: format!("0x{}", hex::encode(self.as_bytes())),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Wire {
            algorithm: Algorithm,
            sig: String,
        }
        let wire = Wire::deserialize(deserializer)?;
        let raw = hex::decode(wire.sig.strip_prefix("0x").unwrap_or(&wire.sig))
            .map_err(serde::de::Error::custom)?;
        let arr: [u8; 64] = raw
            .try_into()
            .map_err(|_| serde::de::Error::custom("signature must be 64 bytes"))?;
        match wire.algorithm {
            Algorithm::Ed25519 => Ok(Signature::Ed25519(arr)),
            Algorithm::Secp256k1 => Ok(Signature::Secp256k1(arr)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("malformed public key")]
    MalformedKey,
    #[error("malformed signature")]
    MalformedSignature,
    #[error("algorithm mismatch between public key and signature")]
    AlgorithmMismatch,
}

/// A keypair for one of the two suites. Only used locally (proposer
/// signing key, test fixtures) -- never serialized over the wire.
pub enum Keypair {
    Ed25519(ed25519_dalek::SigningKey),
    Secp256k1(K256SigningKey),
}

impl Keypair {
    pub fn public_key(&self) -> PublicKey {
        match self {
            Keypair::Ed25519(sk) => PublicKey::Ed25519(sk.verifying_key().to_bytes()),
            Keypair::Secp256k1(sk) => {
                let point = sk.verifying_key().to_encoded_point(false);
                let mut bytes = [0u8; 65];
                bytes.copy_from_slice(point.as_bytes());
                PublicKey::Secp256k1(bytes)
            }
        }
    }
}

/// Generates a fresh Ed25519 keypair. Used by the node for its
/// proposer identity and by tests for transaction fixtures.
pub fn generate_ed25519_keypair() -> Keypair {
    Keypair::Ed25519(ed25519_dalek::SigningKey::generate(&mut OsRng))
}

/// Generates a fresh secp256k1 keypair.
pub fn generate_secp256k1_keypair() -> Keypair {
    Keypair::Secp256k1(K256SigningKey::random(&mut OsRng))
}

/// Signs `message`. Ed25519 signs the raw bytes; secp256k1 signs the
/// SHA-256 digest of the bytes (spec §4.1: "ECDSA over SHA-256 of the
/// preimage, not Keccak").
pub fn sign(keypair: &Keypair, message: &[u8]) -> Signature {
    match keypair {
        Keypair::Ed25519(sk) => Signature::Ed25519(sk.sign(message).to_bytes()),
        Keypair::Secp256k1(sk) => {
            use k256::ecdsa::signature::hazmat::PrehashSigner;
            let digest = sha256(message);
            let sig: K256Signature = sk
                .sign_prehash(&digest.0)
                .expect("sha256 digest is always 32 bytes");
            let mut bytes = [0u8; 64];
            bytes.copy_from_slice(&sig.to_bytes());
            Signature::Secp256k1(bytes)
        }
    }
}

/// Verifies `signature` over `message` under `public_key`. Rejects
/// malformed keys, malformed signatures, and suite mismatches rather
/// than panicking.
pub fn verify(public_key: &PublicKey, message: &[u8], signature: &Signature) -> bool {
    verify_checked(public_key, message, signature).unwrap_or(false)
}

fn verify_checked(
    public_key: &PublicKey,
    message: &[u8],
    signature: &Signature,
) -> Result<bool, CryptoError> {
    if public_key.algorithm() != signature.algorithm() {
        return Err(CryptoError::AlgorithmMismatch);
    }
    match (public_key, signature) {
        (PublicKey::Ed25519(key_bytes), Signature::Ed25519(sig_bytes)) => {
            let vk = EdVerifyingKey::from_bytes(key_bytes).map_err(|_| CryptoError::MalformedKey)?;
            let sig = EdSignature::from_bytes(sig_bytes);
            Ok(vk.verify(message, &sig).is_ok())
        }
        (PublicKey::Secp256k1(key_bytes), Signature::Secp256k1(sig_bytes)) => {
            let vk = K256VerifyingKey::from_sec1_bytes(key_bytes)
                .map_err(|_| CryptoError::MalformedKey)?;
            let sig = K256Signature::from_slice(sig_bytes)
                .map_err(|_| CryptoError::MalformedSignature)?;
            let digest = sha256(message);
            use k256::ecdsa::signature::hazmat::PrehashVerifier;
            Ok(vk.verify_prehash(&digest.0, &sig).is_ok())
        }
        _ => Err(CryptoError::AlgorithmMismatch),
    }
}
