//! # Hashing
//!
//! SHA-256 is used for every digest that ends up under a signature or in the
//! replicated decision log. BLAKE3 is only used where the output never leaves
//! the process (shard placement inside the uniqueness store).

use sha2::{Digest, Sha256};

/// 256-bit digest.
pub type Digest32 = [u8; 32];

/// Hash data with SHA-256 (one-shot).
pub fn sha256(data: &[u8]) -> Digest32 {
    Sha256::digest(data).into()
}

/// Hash multiple inputs as one SHA-256 message.
pub fn sha256_many(inputs: &[&[u8]]) -> Digest32 {
    let mut hasher = Sha256::new();
    for input in inputs {
        hasher.update(input);
    }
    hasher.finalize().into()
}

/// Hash data with BLAKE3 (one-shot).
pub fn blake3_hash(data: &[u8]) -> Digest32 {
    *blake3::hash(data).as_bytes()
}

/// Running SHA-256 hash chain.
///
/// Each link is `H(previous || data)`, so two chains agree on their head only
/// if they absorbed the same inputs in the same order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Sha256Chain {
    head: Digest32,
    length: u64,
}

impl Sha256Chain {
    /// Start an empty chain (head is all zeros).
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one link.
    pub fn absorb(&mut self, data: &[u8]) -> Digest32 {
        self.head = sha256_many(&[self.head.as_slice(), data]);
        self.length += 1;
        self.head
    }

    /// Current head.
    pub fn head(&self) -> Digest32 {
        self.head
    }

    /// Number of absorbed links.
    pub fn len(&self) -> u64 {
        self.length
    }

    /// True if nothing was absorbed yet.
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }
}
