//! # Ed25519 Identities
//!
//! Every requester and every replica is identified by an Ed25519 public key.
//! Signing is deterministic, so a replica that signs the same vote twice
//! hands out byte-identical signatures. Verification is strict and rejects
//! non-canonical encodings.

use std::fmt;

use ed25519_dalek::{Signature as DalekSignature, Signer, SigningKey, VerifyingKey};
use zeroize::Zeroize;

use crate::CryptoError;

/// Raw 64-byte signature as produced by [`Ed25519KeyPair::sign`].
pub type RawSignature = [u8; 64];

/// A validated Ed25519 public key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Ed25519PublicKey([u8; 32]);

impl Ed25519PublicKey {
    /// Accepts only byte strings that decode to a curve point.
    pub fn from_bytes(bytes: [u8; 32]) -> Result<Self, CryptoError> {
        VerifyingKey::from_bytes(&bytes).map_err(|_| CryptoError::InvalidPublicKey)?;
        Ok(Self(bytes))
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Strict verification of `signature` over `message`.
    pub fn verify(&self, message: &[u8], signature: &RawSignature) -> Result<(), CryptoError> {
        verify_ed25519(&self.0, message, signature)
    }
}

/// Signing half of an identity. The secret is wiped on drop.
pub struct Ed25519KeyPair {
    secret: SigningKey,
}

impl Ed25519KeyPair {
    /// Fresh identity from the thread RNG.
    pub fn generate() -> Self {
        Self {
            secret: SigningKey::generate(&mut rand::thread_rng()),
        }
    }

    /// Deterministic identity, used by fixtures and seeded clusters.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            secret: SigningKey::from_bytes(&seed),
        }
    }

    /// Public half of the identity.
    pub fn public_key(&self) -> Ed25519PublicKey {
        Ed25519PublicKey(self.secret.verifying_key().to_bytes())
    }

    /// Deterministic signature over `message`.
    pub fn sign(&self, message: &[u8]) -> RawSignature {
        self.secret.sign(message).to_bytes()
    }
}

impl Clone for Ed25519KeyPair {
    fn clone(&self) -> Self {
        let mut seed = self.secret.to_bytes();
        let copy = Self::from_seed(seed);
        seed.zeroize();
        copy
    }
}

impl fmt::Debug for Ed25519KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ed25519KeyPair({:02x?}..)", &self.public_key().0[..4])
    }
}

impl Drop for Ed25519KeyPair {
    fn drop(&mut self) {
        let mut seed = self.secret.to_bytes();
        seed.zeroize();
    }
}

/// Check `signature` over `message` against a raw public key.
pub fn verify_ed25519(
    public_key: &[u8; 32],
    message: &[u8],
    signature: &RawSignature,
) -> Result<(), CryptoError> {
    let key = VerifyingKey::from_bytes(public_key).map_err(|_| CryptoError::InvalidPublicKey)?;
    key.verify_strict(message, &DalekSignature::from_bytes(signature))
        .map_err(|_| CryptoError::SignatureVerificationFailed)
}
