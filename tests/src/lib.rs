//! # Notary Cluster Test Suite
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! └── integration/
//!     ├── harness.rs     # ClusterHarness: N replicas + transport + stores
//!     ├── scenarios.rs   # End-to-end notarisation scenarios (f = 1)
//!     └── properties.rs  # Uniqueness, atomicity, quorum safety, liveness
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p nc-tests
//! cargo test -p nc-tests integration::scenarios::
//!
//! # Benchmarks
//! cargo bench -p nc-tests
//! ```

pub mod integration;
