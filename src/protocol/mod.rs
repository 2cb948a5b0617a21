//! Handoff protocol between agents.
//!
//! - `types`: the handoff tool, its typed arguments and the framed texts
//! - `gateway`: owns the agents of a topology and routes their handoffs

pub mod gateway;
pub mod types;

pub use gateway::{GatewayOptions, HandoffGateway};
pub use types::{HandoffArgs, HandoffReply, HandoffTool, HANDOFF_TOOL};
