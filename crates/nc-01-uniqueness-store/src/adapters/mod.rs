//! Durable log adapters.

mod file;
mod memory;

pub use file::FileDurableLog;
pub use memory::InMemoryDurableLog;
