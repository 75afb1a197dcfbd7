//! # `SignedMessage` Envelope
//!
//! Wrapper for every replica-to-replica agreement message.
//!
//! ## Security Properties
//!
//! - **Versioning**: every envelope carries a `version`, checked before the
//!   signature.
//! - **Envelope Authority**: `sender` is the sole source of truth for who
//!   sent the message. Payloads do not repeat it.
//! - **Authenticity**: the signature covers the `bincode` encoding of
//!   `(version, sender, payload)` and is verified against the sender's
//!   configured identity.

use serde::{Deserialize, Serialize};

use crate::cluster::ClusterConfig;
use crate::entities::{ReplicaId, Signature};
use crate::errors::EnvelopeError;
use crate::ports::IdentityVerifier;
use shared_crypto::Ed25519KeyPair;

/// Signed, versioned envelope around an agreement payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedMessage<T> {
    /// Protocol version.
    pub version: u16,
    /// Sending replica.
    pub sender: ReplicaId,
    /// The message.
    pub payload: T,
    /// Sender's signature over `signing_bytes`.
    pub signature: Signature,
}

impl<T: Serialize> SignedMessage<T> {
    /// Current protocol version.
    pub const CURRENT_VERSION: u16 = 1;

    /// Seal `payload` as `sender`.
    pub fn sign(
        sender: ReplicaId,
        payload: T,
        keypair: &Ed25519KeyPair,
    ) -> Result<Self, EnvelopeError> {
        let bytes = Self::signing_bytes(Self::CURRENT_VERSION, sender, &payload)?;
        Ok(Self {
            version: Self::CURRENT_VERSION,
            sender,
            signature: Signature::create(keypair, &bytes),
            payload,
        })
    }

    /// Bytes covered by the envelope signature.
    pub fn signing_bytes(
        version: u16,
        sender: ReplicaId,
        payload: &T,
    ) -> Result<Vec<u8>, EnvelopeError> {
        bincode::serialize(&(version, sender, payload))
            .map_err(|e| EnvelopeError::Encoding(e.to_string()))
    }

    /// Check version, membership and signature.
    pub fn verify(
        &self,
        cluster: &ClusterConfig,
        verifier: &dyn IdentityVerifier,
    ) -> Result<(), EnvelopeError> {
        if self.version != Self::CURRENT_VERSION {
            return Err(EnvelopeError::UnsupportedVersion {
                received: self.version,
                supported: Self::CURRENT_VERSION,
            });
        }
        let identity = cluster
            .identity_of(self.sender)
            .ok_or(EnvelopeError::UnknownSender {
                sender: self.sender.0,
            })?;
        let bytes = Self::signing_bytes(self.version, self.sender, &self.payload)?;
        if verifier.verify_signature(&bytes, &self.signature, &identity) {
            Ok(())
        } else {
            Err(EnvelopeError::InvalidSignature {
                sender: self.sender.0,
            })
        }
    }
}
