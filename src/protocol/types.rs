//! Handoff tool schema, typed arguments and the texts exchanged on handoff.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::core::ConversationRecord;
use crate::error::{Error, Result};
use crate::tools::ToolDefinition;

/// Name of the routing tool injected into every agent with outgoing edges.
pub const HANDOFF_TOOL: &str = "handoff";

/// The routing tool of one source agent.
#[derive(Debug, Clone)]
pub struct HandoffTool {
    definition: ToolDefinition,
    receivers: Vec<String>,
}

impl HandoffTool {
    pub fn new(receivers: Vec<String>) -> Self {
        let listed = receivers.join(", ");
        let definition = ToolDefinition::new(
            HANDOFF_TOOL,
            format!(
                "Use this tool to communicate with another agent. Permitted receivers: {}.",
                listed
            ),
            json!({
                "type": "object",
                "properties": {
                    "receiver": {
                        "type": "string",
                        "enum": receivers,
                        "description": format!(
                            "Name of the receiving agent, exactly as listed: {}.", listed
                        ),
                    },
                    "message": {
                        "type": "string",
                        "description": "The main task, goal or important information for the receiver.",
                    },
                    "context": {
                        "type": "string",
                        "description": "Additional context, your reasoning and the conversation so far.",
                    },
                },
                "required": ["receiver", "message", "context"],
            }),
        );
        Self {
            definition,
            receivers,
        }
    }

    pub fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    pub fn receivers(&self) -> &[String] {
        &self.receivers
    }

    pub fn permits(&self, receiver: &str) -> bool {
        self.receivers.iter().any(|r| r == receiver)
    }

    /// Decode a handoff argument object and check the receiver is permitted.
    pub fn parse_args(&self, arguments: Value) -> Result<HandoffArgs> {
        let args: HandoffArgs = serde_json::from_value(arguments)
            .map_err(|e| Error::contract(format!("invalid handoff arguments: {}", e)))?;
        if !self.permits(&args.receiver) {
            return Err(Error::contract(format!(
                "receiver '{}' is not reachable; permitted receivers: {:?}",
                args.receiver, self.receivers
            )));
        }
        Ok(args)
    }
}

/// Arguments of one handoff call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffArgs {
    pub receiver: String,
    pub message: String,
    pub context: String,
}

/// What a handoff call produces for the sender's buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandoffReply {
    /// Becomes the tool-result text.
    Delivered(String),
    /// The call id was already answered by an interruption notice.
    Superseded,
}

/// Text the receiver sees as its new input.
pub fn frame_message(sender: &str, receiver: &str, context: &str, message: &str) -> String {
    format!(
        "Hey {}, it's {} here (not the user, don't get confused). {}\n\n{}",
        receiver, sender, context, message
    )
}

/// Returned to `sender` instead of recursing into `receiver`, which is
/// still waiting on its own handoff to `sender`.
pub fn rejection_notice(sender: &str, receiver: &str, framed: &str) -> String {
    format!(
        "[interrupted] {sender} tried to hand back to {receiver} while {receiver}'s request \
         to {sender} is still open. The message below is returned to {receiver} as the answer.\n\n{framed}"
    )
}

/// Answers the interrupted party's pending handoff call.
pub fn interruption_notice(new_sender: &str, interrupted: &ConversationRecord) -> String {
    format!(
        "[interrupted] Your handoff to {} was interrupted because {} contacted you. \
         {}'s reply will not arrive here.",
        interrupted.receiver, new_sender, interrupted.receiver
    )
}
