//! # Uniqueness Store Service
//!
//! Atomic check-and-commit over a sharded map, backed by a durable log.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::{RwLock, RwLockWriteGuard};
use shared_types::{ConsumingRecord, Decision, PartyId, StateRef, TxId};
use tracing::{debug, info};

use crate::domain::errors::{StoreError, StoreResult};
use crate::domain::placement::{shard_of, shards_touched};
use crate::ports::DurableLog;

/// Shard count used when none is configured.
pub const DEFAULT_SHARD_COUNT: usize = 16;

type Shard = HashMap<StateRef, ConsumingRecord>;

/// Per-replica map from consumed `StateRef` to its `ConsumingRecord`.
pub struct UniquenessStore {
    shards: Vec<RwLock<Shard>>,
    log: Arc<dyn DurableLog>,
}

impl UniquenessStore {
    /// Open the store, rebuilding the in-memory view from `log`.
    pub fn open(log: Arc<dyn DurableLog>, shard_count: usize) -> StoreResult<Self> {
        if shard_count == 0 {
            return Err(StoreError::InvalidShardCount);
        }
        let mut maps: Vec<Shard> = (0..shard_count).map(|_| HashMap::new()).collect();

        let records = log.read_all().map_err(StoreError::Replay)?;
        let replayed = records.len();
        for record in records {
            let shard = &mut maps[shard_of(&record.state_ref, shard_count)];
            match shard.get(&record.state_ref) {
                Some(existing) if existing.consuming_tx != record.consuming_tx => {
                    return Err(StoreError::CorruptLog {
                        state_ref: record.state_ref.to_string(),
                    });
                }
                Some(_) => {}
                None => {
                    shard.insert(record.state_ref, record);
                }
            }
        }

        info!(
            "[nc-01] Uniqueness store ready: {} shard(s), {} record(s) replayed",
            shard_count, replayed
        );

        Ok(Self {
            shards: maps.into_iter().map(RwLock::new).collect(),
            log,
        })
    }

    /// Atomically consume every ref in `inputs` for `tx_id`, or none of them.
    ///
    /// Must only be called in the order agreed by the consensus engine. On
    /// conflict the first conflicting input, in `inputs` order, is reported
    /// with the existing record. Inputs already consumed by `tx_id` itself
    /// are not conflicts.
    pub fn try_commit(
        &self,
        tx_id: TxId,
        inputs: &[StateRef],
        requester: PartyId,
        committed_at: u64,
    ) -> StoreResult<Decision> {
        let shard_count = self.shards.len();
        let touched = shards_touched(inputs, shard_count);

        // Ascending order; any two callers acquire shared shards in the same order.
        let mut guards: Vec<(usize, RwLockWriteGuard<'_, Shard>)> = touched
            .iter()
            .map(|&index| (index, self.shards[index].write()))
            .collect();

        let mut fresh = Vec::with_capacity(inputs.len());
        let mut seen = HashSet::with_capacity(inputs.len());
        for (position, state_ref) in inputs.iter().enumerate() {
            let shard = shard_guard(&guards, shard_of(state_ref, shard_count));
            match shard.and_then(|s| s.get(state_ref)) {
                Some(existing) if existing.consuming_tx != tx_id => {
                    debug!(
                        "[nc-01] Conflict: {} already consumed by {}",
                        state_ref, existing.consuming_tx
                    );
                    return Ok(Decision::Conflict {
                        state_ref: *state_ref,
                        record: existing.clone(),
                    });
                }
                Some(_) => {}
                None => {
                    if seen.insert(*state_ref) {
                        fresh.push(ConsumingRecord {
                            state_ref: *state_ref,
                            consuming_tx: tx_id,
                            input_index: position as u32,
                            requester,
                            committed_at,
                        });
                    }
                }
            }
        }

        if fresh.is_empty() {
            return Ok(Decision::Commit);
        }

        self.log.append_batch(&fresh).map_err(StoreError::Log)?;

        for record in fresh {
            let index = shard_of(&record.state_ref, shard_count);
            if let Some((_, guard)) = guards.iter_mut().find(|(i, _)| *i == index) {
                guard.insert(record.state_ref, record);
            }
        }

        debug!("[nc-01] Committed {} ({} input(s))", tx_id, inputs.len());
        Ok(Decision::Commit)
    }

    /// Record for `state_ref`, if consumed.
    pub fn get(&self, state_ref: &StateRef) -> Option<ConsumingRecord> {
        self.shards[shard_of(state_ref, self.shards.len())]
            .read()
            .get(state_ref)
            .cloned()
    }

    /// Number of consumed refs.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    /// True if nothing was consumed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every record written for `tx_id`, sorted by input index.
    pub fn records_for(&self, tx_id: &TxId) -> Vec<ConsumingRecord> {
        let mut out: Vec<ConsumingRecord> = self
            .shards
            .iter()
            .flat_map(|s| {
                s.read()
                    .values()
                    .filter(|r| r.consuming_tx == *tx_id)
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();
        out.sort_by_key(|r| r.input_index);
        out
    }

    /// Number of shards.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }
}

fn shard_guard<'a>(
    guards: &'a [(usize, RwLockWriteGuard<'_, Shard>)],
    index: usize,
) -> Option<&'a Shard> {
    guards
        .binary_search_by_key(&index, |(i, _)| *i)
        .ok()
        .map(|pos| &*guards[pos].1)
}
