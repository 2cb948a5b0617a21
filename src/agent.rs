//! Agent runtime: one agent's buffer, tools and turn state machine.
//!
//! A call runs the loop
//! `Idle -> AwaitingCompletion -> {ToolDispatch, AwaitingUser} -> ... -> Terminated`
//! until the agent hits its turn cap, hands off without a user channel, or
//! the user declines to continue.

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;
use std::sync::Arc;

use crate::callbacks::{Callbacks, NoHumanInput};
use crate::config::{AgentConfig, SchedulingMode};
use crate::context::{Buffer, Entry, Image, ToolCallRequest, TOOL_IMAGES_PREAMBLE};
use crate::error::{Error, Result};
use crate::protocol::{HandoffArgs, HandoffReply};
use crate::providers::{CompletionRequest, CompletionResponse, Provider, ToolChoice};
use crate::tools::{Tool, ToolKind, ToolOutput, ToolRegistry};

/// Appended to the instructions of agents that may not talk to the user.
pub const NO_DIRECT_USER_NOTE: &str = "You are STRICTLY NOT allowed to communicate to the user \
     directly; contact the other agents you are allowed to reach instead.";

/// Corrective note for a non-interactive agent that replied without a tool call.
pub const USE_HANDOFF_NOTE: &str = "YOU ARE NOT ALLOWED TO DIRECTLY SPEAK WITH THE USER. \
     CONTACT THE APPROPRIATE AGENT WITH THE handoff TOOL.";

/// Routes handoff tool calls to other agents.
#[async_trait]
pub trait HandoffRouter: Send + Sync {
    async fn route(&self, sender: &str, call_id: &str, args: HandoffArgs) -> Result<HandoffReply>;
}

/// Per-agent behavior flags.
#[derive(Debug, Clone)]
pub struct AgentPolicy {
    pub allow_user_input: bool,
    /// Completion rounds per call; `None` is unlimited.
    pub max_turns: Option<u32>,
    pub tool_choice: Option<ToolChoice>,
    pub temperature: f32,
    pub scheduling: SchedulingMode,
    /// Corrective notes per call before a silent non-interactive agent is
    /// stopped. Only used in concurrent mode.
    pub max_nudges: u32,
}

impl Default for AgentPolicy {
    fn default() -> Self {
        Self {
            allow_user_input: true,
            max_turns: None,
            tool_choice: None,
            temperature: 1.0,
            scheduling: SchedulingMode::Sequential,
            max_nudges: 1,
        }
    }
}

/// Why a call stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    MaxTurns,
    /// A non-interactive agent handed off during its last turn.
    HandedOff,
    UserDeclined,
    /// A non-interactive agent replied without calling a tool.
    NoUserChannel,
    NudgesExhausted,
}

/// Summary of one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub turns: u32,
    pub termination: Termination,
    pub last_tool_text: Option<String>,
    pub last_assistant_text: Option<String>,
}

impl RunOutcome {
    /// The last tool-result text of the call, else its last assistant text.
    pub fn reply(&self) -> Option<&str> {
        self.last_tool_text
            .as_deref()
            .or(self.last_assistant_text.as_deref())
    }
}

enum TurnState {
    Idle,
    AwaitingCompletion,
    ToolDispatch(Vec<ToolCallRequest>),
    AwaitingUser(Option<String>),
    Terminated(Termination),
}

struct Dispatched {
    handoff: bool,
    /// `None` when the call id was already answered elsewhere.
    output: Option<ToolOutput>,
}

#[derive(Default)]
struct Progress {
    turns: u32,
    nudges: u32,
    last_tool_text: Option<String>,
    last_assistant_text: Option<String>,
}

/// A named, stateful conversational agent.
pub struct Agent {
    name: String,
    model: String,
    instructions: String,
    tools: ToolRegistry,
    policy: AgentPolicy,
    buffer: Buffer,
    provider: Arc<dyn Provider>,
    callbacks: Arc<dyn Callbacks>,
}

impl Agent {
    pub fn builder(
        name: impl Into<String>,
        model: impl Into<String>,
        provider: Arc<dyn Provider>,
    ) -> AgentBuilder {
        AgentBuilder::new(name, model, provider)
    }

    /// Build an agent from its settings entry.
    pub fn from_config(
        config: &AgentConfig,
        provider: Arc<dyn Provider>,
        callbacks: Option<Arc<dyn Callbacks>>,
    ) -> Result<Self> {
        let mut builder = Agent::builder(&config.name, &config.model, provider)
            .instructions(&config.instructions)
            .allow_user_input(config.allow_user_input)
            .temperature(config.temperature);
        if let Some(max) = config.max_turns {
            builder = builder.max_turns(max);
        }
        if let Some(choice) = &config.tool_choice {
            builder = builder.tool_choice(choice.clone());
        }
        if let Some(callbacks) = callbacks {
            builder = builder.callbacks(callbacks);
        }
        builder.build()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// The composed system instruction.
    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    pub fn policy(&self) -> &AgentPolicy {
        &self.policy
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    pub(crate) fn tools_mut(&mut self) -> &mut ToolRegistry {
        &mut self.tools
    }

    pub(crate) fn set_scheduling(&mut self, mode: SchedulingMode) {
        self.policy.scheduling = mode;
    }

    pub(crate) fn set_max_nudges(&mut self, max: u32) {
        self.policy.max_nudges = max;
    }

    pub fn add_tool(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        self.tools.register(tool)
    }

    /// Answer a pending tool call from outside the turn loop.
    pub(crate) fn inject_tool_result(&self, call_id: &str, tool: &str, text: String) {
        tracing::debug!(agent = %self.name, %call_id, %tool, "injecting tool result");
        self.buffer.push(Entry::tool(call_id, tool, text));
    }

    /// Run the agent on user input without a handoff gateway.
    pub async fn call(&self, input: impl Into<String>, images: Vec<Image>) -> Result<RunOutcome> {
        self.run(input.into(), images, None).await
    }

    /// Run the turn loop on new input until a terminal state.
    #[tracing::instrument(name = "agent", skip_all, fields(agent = %self.name))]
    pub async fn run(
        &self,
        input: String,
        images: Vec<Image>,
        router: Option<&dyn HandoffRouter>,
    ) -> Result<RunOutcome> {
        let mut progress = Progress::default();
        let mut pending_input = Some((input, images));
        let mut state = TurnState::Idle;

        loop {
            state = match state {
                TurnState::Idle => {
                    if let Some((text, images)) = pending_input.take() {
                        self.buffer.push(Entry::user(Some(text), images)?);
                    }
                    TurnState::AwaitingCompletion
                }

                TurnState::AwaitingCompletion => {
                    if self.turn_cap_reached(progress.turns) {
                        TurnState::Terminated(Termination::MaxTurns)
                    } else {
                        tracing::debug!(turn = progress.turns + 1, "turn start");
                        let response = self.complete().await?;
                        progress.turns += 1;
                        tracing::debug!(
                            turn = progress.turns,
                            tool_calls = response.tool_calls.len(),
                            "completion received"
                        );

                        if let Some(text) = response.content.as_deref().filter(|t| !t.is_empty()) {
                            progress.last_assistant_text = Some(text.to_string());
                        }
                        self.buffer.push(Entry::Assistant {
                            content: response.content.clone(),
                            tool_calls: response.tool_calls.clone(),
                        });

                        if response.has_tool_calls() {
                            TurnState::ToolDispatch(response.tool_calls)
                        } else {
                            TurnState::AwaitingUser(response.content)
                        }
                    }
                }

                TurnState::ToolDispatch(calls) => {
                    let handed_off = self.dispatch(&calls, router, &mut progress).await?;
                    if handed_off && !self.policy.allow_user_input {
                        TurnState::Terminated(Termination::HandedOff)
                    } else {
                        TurnState::AwaitingCompletion
                    }
                }

                TurnState::AwaitingUser(last) => self.await_user(last, &mut progress).await?,

                TurnState::Terminated(termination) => {
                    tracing::debug!(turns = progress.turns, ?termination, "call finished");
                    return Ok(RunOutcome {
                        turns: progress.turns,
                        termination,
                        last_tool_text: progress.last_tool_text,
                        last_assistant_text: progress.last_assistant_text,
                    });
                }
            };
        }
    }

    fn turn_cap_reached(&self, turns: u32) -> bool {
        matches!(self.policy.max_turns, Some(max) if max > 0 && turns >= max)
    }

    async fn complete(&self) -> Result<CompletionResponse> {
        let messages = self.buffer.snapshot();
        let tools = self.tools.definitions();
        let tool_choice = if tools.is_empty() {
            None
        } else {
            self.policy.tool_choice.as_ref()
        };

        let request = CompletionRequest {
            agent: &self.name,
            model: &self.model,
            messages: &messages,
            tools: &tools,
            tool_choice,
            temperature: self.policy.temperature,
        };
        Ok(self.provider.complete(request).await?)
    }

    async fn await_user(&self, last: Option<String>, progress: &mut Progress) -> Result<TurnState> {
        if self.policy.allow_user_input {
            return match self.callbacks.on_user_loop(&self.name, last.as_deref()).await? {
                Some(text) => {
                    self.buffer.push(Entry::user(Some(text), Vec::new())?);
                    Ok(TurnState::AwaitingCompletion)
                }
                None => Ok(TurnState::Terminated(Termination::UserDeclined)),
            };
        }

        match self.policy.scheduling {
            SchedulingMode::Sequential => Ok(TurnState::Terminated(Termination::NoUserChannel)),
            SchedulingMode::Concurrent if progress.nudges < self.policy.max_nudges => {
                progress.nudges += 1;
                tracing::debug!(nudges = progress.nudges, "reminding agent to use a handoff");
                self.buffer.push(Entry::system(USE_HANDOFF_NOTE));
                Ok(TurnState::AwaitingCompletion)
            }
            SchedulingMode::Concurrent => Ok(TurnState::Terminated(Termination::NudgesExhausted)),
        }
    }

    /// Execute one batch of tool calls. Returns whether any was a handoff.
    async fn dispatch(
        &self,
        calls: &[ToolCallRequest],
        router: Option<&dyn HandoffRouter>,
        progress: &mut Progress,
    ) -> Result<bool> {
        let mut handed_off = false;

        match self.policy.scheduling {
            SchedulingMode::Sequential => {
                for call in calls {
                    let dispatched = self.invoke(call, router).await?;
                    handed_off |= dispatched.handoff;
                    self.apply(call, dispatched.output, progress)?;
                }
            }
            SchedulingMode::Concurrent => {
                let results = join_all(calls.iter().map(|call| self.invoke(call, router))).await;
                for (call, result) in calls.iter().zip(results) {
                    let dispatched = result?;
                    handed_off |= dispatched.handoff;
                    self.apply(call, dispatched.output, progress)?;
                }
            }
        }

        Ok(handed_off)
    }

    async fn invoke(
        &self,
        call: &ToolCallRequest,
        router: Option<&dyn HandoffRouter>,
    ) -> Result<Dispatched> {
        let kind = self.tools.lookup(&call.name)?;
        let arguments = parse_arguments(call)?;
        self.callbacks.on_tool_call(&self.name, &call.name, &arguments);

        match kind {
            ToolKind::Ordinary(tool) => {
                let output = tool.execute(arguments).await?;
                Ok(Dispatched {
                    handoff: false,
                    output: Some(output),
                })
            }
            ToolKind::Handoff(handoff) => {
                let args = handoff.parse_args(arguments)?;
                let router = router.ok_or_else(|| {
                    Error::NotFound(format!("handoff gateway for agent '{}'", self.name))
                })?;
                tracing::info!(receiver = %args.receiver, call_id = %call.id, "handing off");
                let output = match router.route(&self.name, &call.id, args).await? {
                    HandoffReply::Delivered(text) => Some(ToolOutput::text(text)),
                    HandoffReply::Superseded => None,
                };
                Ok(Dispatched {
                    handoff: true,
                    output,
                })
            }
        }
    }

    fn apply(
        &self,
        call: &ToolCallRequest,
        output: Option<ToolOutput>,
        progress: &mut Progress,
    ) -> Result<()> {
        let Some(ToolOutput { text, images }) = output else {
            tracing::debug!(call_id = %call.id, "tool call already answered");
            return Ok(());
        };

        if !text.is_empty() {
            progress.last_tool_text = Some(text.clone());
        }
        self.buffer.push(Entry::tool(&call.id, &call.name, text));
        if !images.is_empty() {
            self.buffer
                .push(Entry::user(Some(TOOL_IMAGES_PREAMBLE.to_string()), images)?);
        }
        Ok(())
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("model", &self.model)
            .field("tools", &self.tools)
            .field("policy", &self.policy)
            .field("buffer_len", &self.buffer.len())
            .finish()
    }
}

/// Decode the JSON-encoded argument object of a tool call.
fn parse_arguments(call: &ToolCallRequest) -> Result<Value> {
    if call.arguments.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    let value: Value = serde_json::from_str(&call.arguments).map_err(|e| {
        Error::contract(format!("arguments of '{}' are not valid JSON: {}", call.name, e))
    })?;
    if !value.is_object() {
        return Err(Error::contract(format!(
            "arguments of '{}' must be a JSON object",
            call.name
        )));
    }
    Ok(value)
}

/// Builder for [`Agent`].
pub struct AgentBuilder {
    name: String,
    model: String,
    instructions: Option<String>,
    tools: Vec<Arc<dyn Tool>>,
    policy: AgentPolicy,
    provider: Arc<dyn Provider>,
    callbacks: Option<Arc<dyn Callbacks>>,
}

impl AgentBuilder {
    fn new(name: impl Into<String>, model: impl Into<String>, provider: Arc<dyn Provider>) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            instructions: None,
            tools: Vec::new(),
            policy: AgentPolicy::default(),
            provider,
            callbacks: None,
        }
    }

    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn allow_user_input(mut self, allow: bool) -> Self {
        self.policy.allow_user_input = allow;
        self
    }

    /// Zero means unlimited.
    pub fn max_turns(mut self, max: u32) -> Self {
        self.policy.max_turns = (max > 0).then_some(max);
        self
    }

    pub fn tool_choice(mut self, choice: ToolChoice) -> Self {
        self.policy.tool_choice = Some(choice);
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.policy.temperature = temperature;
        self
    }

    pub fn scheduling(mut self, mode: SchedulingMode) -> Self {
        self.policy.scheduling = mode;
        self
    }

    pub fn max_nudges(mut self, max: u32) -> Self {
        self.policy.max_nudges = max;
        self
    }

    pub fn callbacks(mut self, callbacks: Arc<dyn Callbacks>) -> Self {
        self.callbacks = Some(callbacks);
        self
    }

    pub fn build(self) -> Result<Agent> {
        if self.name.trim().is_empty() {
            return Err(Error::Config("agent name must not be empty".to_string()));
        }
        if self.policy.allow_user_input && self.callbacks.is_none() {
            return Err(Error::Config(format!(
                "agent '{}' allows user input but has no callbacks to source it",
                self.name
            )));
        }

        let tools = ToolRegistry::from_tools(self.tools)?;
        let base = self
            .instructions
            .unwrap_or_else(crate::config::default_instructions);
        let mut instructions = format!("You are {}. {}", self.name, base);
        if !self.policy.allow_user_input {
            instructions.push('\n');
            instructions.push_str(NO_DIRECT_USER_NOTE);
        }

        let buffer = Buffer::new(&self.name);
        buffer.push(Entry::system(&instructions));

        Ok(Agent {
            name: self.name,
            model: self.model,
            instructions,
            tools,
            policy: self.policy,
            buffer,
            provider: self.provider,
            callbacks: self
                .callbacks
                .unwrap_or_else(|| Arc::new(NoHumanInput) as Arc<dyn Callbacks>),
        })
    }
}
