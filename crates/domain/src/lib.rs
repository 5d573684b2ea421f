//! Shared domain types for the agent runtime: messages, capabilities,
//! streaming events, configuration, and the common error type.

pub mod capability;
pub mod config;
pub mod error;
pub mod message;
pub mod stream;

pub use error::{Error, Result};
