//! # Uniqueness Store (nc-01)
//!
//! Per-replica authoritative mapping from `StateRef` to the
//! `ConsumingRecord` of the transaction that consumed it.
//!
//! ## Domain Invariants
//!
//! | Invariant | Description |
//! |-----------|-------------|
//! | Write-once | A key, once present, never changes its record |
//! | All-or-nothing | A request commits every input or none of them |
//! | Log first | A record is durable before it is visible |
//!
//! ## Concurrency
//!
//! The key space is split into shards, each behind its own `RwLock`.
//! `try_commit` write-locks exactly the shards a request touches, in
//! ascending shard order. Requests on disjoint shards run in parallel;
//! requests sharing a key serialize. Which of two competing requests runs
//! first is decided by the consensus engine, never by the store.
//!
//! ## Crate Structure (Hexagonal Architecture)
//!
//! - `domain/` - Errors and shard placement
//! - `ports/` - `DurableLog` (outbound SPI)
//! - `adapters/` - In-memory and file-backed logs
//! - `service.rs` - `UniquenessStore`

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod service;

pub use adapters::{FileDurableLog, InMemoryDurableLog};
pub use domain::errors::{LogError, StoreError, StoreResult};
pub use ports::DurableLog;
pub use service::{UniquenessStore, DEFAULT_SHARD_COUNT};
