//! Built-in tools available to every agent: sandboxed file I/O and a
//! short-lived code execution sandbox.

pub mod builtin;
pub mod file_ops;
pub mod registry;
pub mod run_code;

pub use registry::{Tool, ToolHandler, ToolRegistry};
