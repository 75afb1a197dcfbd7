//! Adapters layer (Hexagonal Architecture)

mod network;
mod transport;

pub use network::{InMemoryNetwork, DEFAULT_INBOX_CAPACITY};
pub use transport::LocalReplicaTransport;
