//! Scripted provider and input used by the unit tests.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use crate::callbacks::Callbacks;
use crate::context::{Entry, ToolCallRequest};
use crate::error::Result;
use crate::protocol::HANDOFF_TOOL;
use crate::providers::provider::{self, ProviderError};
use crate::providers::{CompletionRequest, CompletionResponse, Provider, ToolChoice};

/// What the scripted provider saw for one completion.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub agent: String,
    pub messages: Vec<Entry>,
    pub tools: Vec<String>,
    pub tool_choice: Option<ToolChoice>,
}

/// Replays canned responses per agent, in order.
#[derive(Default)]
pub struct ScriptedProvider {
    scripts: Mutex<HashMap<String, VecDeque<CompletionResponse>>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, agent: &str, responses: Vec<CompletionResponse>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(agent.to_string())
            .or_default()
            .extend(responses);
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls_for(&self, agent: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.agent == agent)
            .count()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: CompletionRequest<'_>) -> provider::Result<CompletionResponse> {
        self.requests.lock().unwrap().push(RecordedRequest {
            agent: request.agent.to_string(),
            messages: request.messages.to_vec(),
            tools: request.tools.iter().map(|t| t.name.clone()).collect(),
            tool_choice: request.tool_choice.cloned(),
        });

        self.scripts
            .lock()
            .unwrap()
            .get_mut(request.agent)
            .and_then(VecDeque::pop_front)
            .ok_or_else(|| ProviderError::other(format!("script for '{}' exhausted", request.agent)))
    }
}

pub fn tool_call(id: &str, name: &str, arguments: Value) -> ToolCallRequest {
    ToolCallRequest {
        id: id.to_string(),
        name: name.to_string(),
        arguments: arguments.to_string(),
    }
}

pub fn handoff_call(id: &str, receiver: &str, message: &str) -> ToolCallRequest {
    tool_call(
        id,
        HANDOFF_TOOL,
        json!({"receiver": receiver, "message": message, "context": ""}),
    )
}

pub fn tool_calls(calls: Vec<ToolCallRequest>) -> CompletionResponse {
    CompletionResponse {
        content: None,
        tool_calls: calls,
    }
}

/// Answers user prompts from a fixed list and records what it was shown.
///
/// Tool-call notifications are written to a shared event log so tests can
/// order them against the tool bodies that also write to it.
pub struct ScriptedInput {
    replies: Mutex<VecDeque<Option<String>>>,
    prompts: Mutex<Vec<(String, Option<String>)>>,
    tool_calls: Mutex<Vec<(String, String, Value)>>,
    events: Arc<Mutex<Vec<String>>>,
}

impl ScriptedInput {
    pub fn new(replies: Vec<Option<String>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            prompts: Mutex::new(Vec::new()),
            tool_calls: Mutex::new(Vec::new()),
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn prompts(&self) -> Vec<(String, Option<String>)> {
        self.prompts.lock().unwrap().clone()
    }

    /// `(agent, tool, arguments)` for every notified tool call.
    pub fn tool_calls(&self) -> Vec<(String, String, Value)> {
        self.tool_calls.lock().unwrap().clone()
    }

    pub fn events(&self) -> Arc<Mutex<Vec<String>>> {
        self.events.clone()
    }
}

#[async_trait]
impl Callbacks for ScriptedInput {
    async fn on_user_loop(&self, agent: &str, assistant_message: Option<&str>) -> Result<Option<String>> {
        self.prompts
            .lock()
            .unwrap()
            .push((agent.to_string(), assistant_message.map(str::to_string)));
        Ok(self.replies.lock().unwrap().pop_front().flatten())
    }

    fn on_tool_call(&self, agent: &str, tool: &str, arguments: &Value) {
        self.tool_calls
            .lock()
            .unwrap()
            .push((agent.to_string(), tool.to_string(), arguments.clone()));
        self.events.lock().unwrap().push(format!("notify {}", tool));
    }
}
