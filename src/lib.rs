//! agentmesh library root.

pub mod agent;
pub mod callbacks;
pub mod cli;
pub mod config;
pub mod context;
pub mod core;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod providers;
pub mod tools;

#[cfg(test)]
mod testing;

pub use agent::{Agent, AgentBuilder, HandoffRouter, RunOutcome, Termination};
pub use callbacks::{Callbacks, ConsoleInput, NoHumanInput};
pub use cli::Commands;
pub use config::{load_settings, SchedulingMode, Settings};
pub use context::{Buffer, Entry, Image};
pub use core::{ConversationRecord, ConversationTracer, TopologyGraph};
pub use error::{Error, Result};
pub use protocol::{GatewayOptions, HandoffGateway};
pub use providers::Provider;
pub use tools::{tool_fn, tool_json, Tool, ToolOutput, ToolRegistry};
