//! Directory services: the polling watcher and the resolver built on it.

mod resolver;
mod watcher;

pub use resolver::DirectoryAddressResolver;
pub use watcher::{DirectoryWatcher, DEFAULT_POLL_INTERVAL};
