//! # Shared Crypto - Signing and Hashing Primitives
//!
//! ## Components
//!
//! | Module | Algorithm | Use Case |
//! |--------|-----------|----------|
//! | `hashing` | SHA-256, BLAKE3 | Request digests, log chaining, shard selection |
//! | `signatures` | Ed25519 | Requester signatures, replica votes, agreement envelopes |
//!
//! ## Security Properties
//!
//! - **Ed25519**: Deterministic nonces, no RNG dependency when signing
//! - **SHA-256**: Domain-separated digests for everything that is signed
//! - **BLAKE3**: Non-adversarial fast hashing (shard placement only)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod errors;
pub mod hashing;
pub mod signatures;

// Re-exports
pub use errors::CryptoError;
pub use hashing::{blake3_hash, sha256, sha256_many, Digest32, Sha256Chain};
pub use signatures::{verify_ed25519, Ed25519KeyPair, Ed25519PublicKey, RawSignature};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
