//! Crypto error types.

use thiserror::Error;

/// Failures when checking an identity or a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// The 32 bytes do not decode to an Ed25519 curve point.
    #[error("not a valid Ed25519 public key")]
    InvalidPublicKey,

    /// Signature does not verify under the claimed key.
    #[error("signature does not verify under the claimed key")]
    SignatureVerificationFailed,
}
