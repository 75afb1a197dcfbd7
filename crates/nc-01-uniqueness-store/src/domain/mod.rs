//! Domain layer for the uniqueness store.

pub mod errors;
pub mod placement;
