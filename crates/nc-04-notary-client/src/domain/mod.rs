//! Client domain: configuration, flow state machine, cancellation.

pub mod cancel;
pub mod config;
pub mod error;
pub mod flow;

pub use cancel::CancelToken;
pub use config::ClientConfig;
pub use error::{ClientConfigError, IllegalTransition};
pub use flow::{Flow, FlowState};
