//! Core module - topology and conversation tracing.
//!
//! This module contains the routing rules of agentmesh:
//! - Topology declaration parsing and validation
//! - Handoff history used to break cyclic and overlapping handoffs

pub mod conversation;
pub mod routing;

pub use conversation::{Admission, ConversationRecord, ConversationTracer, RecordId, RecordStatus};
pub use routing::TopologyGraph;
