//! Shard placement for state references.

use shared_crypto::blake3_hash;
use shared_types::StateRef;

/// Shard holding `state_ref` among `shard_count` shards.
pub fn shard_of(state_ref: &StateRef, shard_count: usize) -> usize {
    let digest = blake3_hash(&state_ref.encode());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_le_bytes(prefix) % shard_count as u64) as usize
}

/// Distinct shards touched by `inputs`, ascending.
pub fn shards_touched(inputs: &[StateRef], shard_count: usize) -> Vec<usize> {
    let mut shards: Vec<usize> = inputs.iter().map(|r| shard_of(r, shard_count)).collect();
    shards.sort_unstable();
    shards.dedup();
    shards
}
