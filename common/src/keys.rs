// Copyright (c) 2024 The dep2p Authors

//! Signing keys and signature verification.
//!
//! The node identity is its Ed25519 public key, so a [`Keypair`] both signs
//! records and yields the [`NodeId`] those records are bound to. Verification
//! needs nothing beyond the claimed NodeId itself, which is what makes signed
//! address records self-certifying.

use crate::node_id::{NodeId, NODE_ID_LEN};
use displaydoc::Display;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use thiserror::Error;

/// Length of a detached signature in bytes.
pub const SIGNATURE_LEN: usize = 64;

/// Errors from key handling and signature checks.
#[derive(Clone, Copy, Debug, Display, Error, Eq, PartialEq)]
pub enum KeyError {
    /// The key bytes do not form a valid Ed25519 public key
    InvalidKey,
    /// The signature bytes have the wrong length
    InvalidSignatureLength,
    /// The signature does not verify against the key
    SignatureMismatch,
}

/// An Ed25519 keypair whose public half is the node identity.
#[derive(Clone)]
pub struct Keypair {
    signing: SigningKey,
}

impl Keypair {
    /// Generate a fresh random keypair.
    pub fn generate() -> Self {
        let mut seed = [0u8; 32];
        getrandom::getrandom(&mut seed).expect("system randomness unavailable");
        Self {
            signing: SigningKey::from_bytes(&seed),
        }
    }

    /// Build a keypair from a 32-byte seed. Deterministic, used in tests.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            signing: SigningKey::from_bytes(&seed),
        }
    }

    /// The node identifier this keypair speaks for.
    pub fn node_id(&self) -> NodeId {
        NodeId::from_bytes(self.signing.verifying_key().to_bytes())
    }

    /// Sign a message, returning the detached 64-byte signature.
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.signing.sign(message).to_bytes().to_vec()
    }
}

impl core::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Keypair({})", self.node_id().short())
    }
}

/// Verify a detached signature against the public key a [`NodeId`] encodes.
pub fn verify(node_id: &NodeId, message: &[u8], signature: &[u8]) -> Result<(), KeyError> {
    let key_bytes: &[u8; NODE_ID_LEN] = node_id.as_bytes();
    let key = VerifyingKey::from_bytes(key_bytes).map_err(|_| KeyError::InvalidKey)?;
    let sig_bytes: [u8; SIGNATURE_LEN] = signature
        .try_into()
        .map_err(|_| KeyError::InvalidSignatureLength)?;
    let sig = Signature::from_bytes(&sig_bytes);
    key.verify(message, &sig)
        .map_err(|_| KeyError::SignatureMismatch)
}

/// Convenience predicate form of [`verify`].
pub fn is_valid_signature(node_id: &NodeId, message: &[u8], signature: &[u8]) -> bool {
    verify(node_id, message, signature).is_ok()
}

/// Serde helper serializing signature byte vectors as hex strings.
pub mod signature_hex {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize signature bytes as a hex string.
    pub fn serialize<S: Serializer>(sig: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        hex::encode(sig).serialize(serializer)
    }

    /// Deserialize signature bytes from a hex string.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let hex_str = String::deserialize(deserializer)?;
        hex::decode(&hex_str).map_err(serde::de::Error::custom)
    }
}
