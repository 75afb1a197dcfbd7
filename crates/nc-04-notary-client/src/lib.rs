//! # nc-04-notary-client
//!
//! Submits a commit request to the replica cluster and returns either a
//! quorum-signed result or a typed error.
//!
//! ```text
//! notarise(request)
//!   ├─ validate structure locally
//!   ├─ round k: dispatch ─→ collect votes ─→ SignatureAggregator
//!   │     ├─ 2f+1 identical votes  → Ok(result) / Err(Conflict)
//!   │     ├─ f+1 rejections        → Err(TransactionInvalid)
//!   │     └─ timeout               → backoff, retry unanswered replicas
//!   └─ max_attempts exhausted      → Err(Unavailable)
//! ```

pub mod domain;
pub mod service;

pub use domain::{CancelToken, ClientConfig, ClientConfigError, Flow, FlowState, IllegalTransition};
pub use service::NotaryClient;
