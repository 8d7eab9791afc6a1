//! The agent engine: sessions, the generation loop, and the built-in
//! tool suite.
//!
//! [`SessionRegistry`] is the entry point. Give it a provider and an event
//! bus, create sessions against it, and drive conversations with
//! `send_message`. Everything observable leaves through the bus.

pub mod registry;
pub mod runner;
pub mod sessions;
pub mod tools;
pub mod truncate;

pub use registry::{ToolRegistry, ToolSource};
pub use runner::{RunnerConfig, DEFAULT_TOOL_TIMEOUT};
pub use sessions::{SessionHandle, SessionRegistry};
pub use tools::builtin_tools;
