//! Handoff gateway: owns the agents of one topology and routes their
//! handoff calls, consulting the conversation tracer before each nested run.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::agent::{Agent, HandoffRouter, RunOutcome};
use crate::config::{SchedulingMode, Settings};
use crate::context::Image;
use crate::core::{Admission, ConversationRecord, ConversationTracer, RecordStatus, TopologyGraph};
use crate::error::{Error, Result};
use crate::protocol::types::{
    frame_message, interruption_notice, rejection_notice, HandoffArgs, HandoffReply, HandoffTool,
    HANDOFF_TOOL,
};

#[derive(Debug, Clone, Copy)]
pub struct GatewayOptions {
    pub scheduling: SchedulingMode,
    pub tracer_window: usize,
    /// Overrides every agent's nudge budget when set.
    pub max_nudges: Option<u32>,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            scheduling: SchedulingMode::Sequential,
            tracer_window: crate::core::conversation::DEFAULT_RECENT_WINDOW,
            max_nudges: None,
        }
    }
}

impl From<&Settings> for GatewayOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            scheduling: settings.scheduling,
            tracer_window: settings.tracer_window,
            max_nudges: Some(settings.max_nudges),
        }
    }
}

pub struct HandoffGateway {
    topology: TopologyGraph,
    agents: HashMap<String, Arc<Agent>>,
    tracer: Mutex<ConversationTracer>,
}

impl HandoffGateway {
    /// Wire `agents` into `topology`.
    ///
    /// Every agent with outgoing edges gets a handoff tool listing exactly
    /// its destinations. All agents adopt the gateway's scheduling mode.
    pub fn new(topology: TopologyGraph, agents: Vec<Agent>, options: GatewayOptions) -> Result<Self> {
        let names: Vec<&str> = agents.iter().map(Agent::name).collect();
        topology.validate(&names)?;
        tracing::info!("topology:\n{}", topology.render_tree());

        let mut wired = HashMap::with_capacity(agents.len());
        for mut agent in agents {
            agent.set_scheduling(options.scheduling);
            if let Some(max) = options.max_nudges {
                agent.set_max_nudges(max);
            }
            let destinations = topology.destinations(agent.name());
            if !destinations.is_empty() {
                agent
                    .tools_mut()
                    .register_handoff(HandoffTool::new(destinations.to_vec()))?;
            }
            wired.insert(agent.name().to_string(), Arc::new(agent));
        }

        Ok(Self {
            topology,
            agents: wired,
            tracer: Mutex::new(ConversationTracer::with_window(
                options.scheduling,
                options.tracer_window,
            )),
        })
    }

    /// Parse `declaration` and wire `agents` into it.
    pub fn from_declaration(declaration: &str, agents: Vec<Agent>, options: GatewayOptions) -> Result<Self> {
        Self::new(TopologyGraph::parse(declaration)?, agents, options)
    }

    pub fn topology(&self) -> &TopologyGraph {
        &self.topology
    }

    pub fn agent(&self, name: &str) -> Option<&Agent> {
        self.agents.get(name).map(Arc::as_ref)
    }

    /// Copy of the handoff history so far.
    pub fn tracer_snapshot(&self) -> Vec<ConversationRecord> {
        self.tracer().history().to_vec()
    }

    /// Feed external input to the entry-point agent.
    pub async fn execute(&self, input: impl Into<String>, images: Vec<Image>) -> Result<RunOutcome> {
        let entry = self.topology.entry_point();
        let agent = self.lookup(entry)?;
        tracing::info!(agent = %entry, "executing entry point");
        agent
            .run(input.into(), images, Some(self as &dyn HandoffRouter))
            .await
    }

    fn lookup(&self, name: &str) -> Result<Arc<Agent>> {
        self.agents
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("agent '{}'", name)))
    }

    fn tracer(&self) -> MutexGuard<'_, ConversationTracer> {
        self.tracer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl HandoffRouter for HandoffGateway {
    async fn route(&self, sender: &str, call_id: &str, args: HandoffArgs) -> Result<HandoffReply> {
        let HandoffArgs {
            receiver,
            message,
            context,
        } = args;
        let target = self.lookup(&receiver)?;
        let framed = frame_message(sender, &receiver, &context, &message);

        let admission = self.tracer().admit(sender, &receiver, call_id);
        let record = match admission {
            Admission::Rejected { counterpart } => {
                tracing::info!(%sender, %counterpart, "ping-pong handoff rejected");
                return Ok(HandoffReply::Delivered(rejection_notice(
                    sender, &receiver, &framed,
                )));
            }
            Admission::Preempted {
                interrupted,
                record,
            } => {
                let waiting = self.lookup(&interrupted.sender)?;
                waiting.inject_tool_result(
                    &interrupted.call_id,
                    HANDOFF_TOOL,
                    interruption_notice(sender, &interrupted),
                );
                record
            }
            Admission::Fresh { record } => record,
        };

        tracing::info!(%sender, %receiver, %call_id, "handoff");
        let outcome = target
            .run(framed, Vec::new(), Some(self as &dyn HandoffRouter))
            .await?;

        let previous = self.tracer().complete(record);
        if previous == Some(RecordStatus::Interrupted) {
            tracing::debug!(%sender, %receiver, %call_id, "reply superseded by interruption");
            return Ok(HandoffReply::Superseded);
        }

        let reply = outcome
            .reply()
            .map(str::to_string)
            .unwrap_or_else(|| format!("{} completed the request", receiver));
        Ok(HandoffReply::Delivered(reply))
    }
}

impl std::fmt::Debug for HandoffGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandoffGateway")
            .field("topology", &self.topology)
            .field("agents", &self.agents.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Termination;
    use crate::context::Entry;
    use crate::providers::{CompletionResponse, Provider};
    use crate::testing::{handoff_call, tool_call, tool_calls, ScriptedProvider};
    use crate::tools::{tool_fn, ToolOutput};
    use serde_json::{json, Value};

    fn worker(name: &str, provider: &Arc<ScriptedProvider>) -> Agent {
        let provider: Arc<dyn Provider> = provider.clone();
        Agent::builder(name, "gpt-4.1", provider)
            .allow_user_input(false)
            .max_nudges(0)
            .build()
            .unwrap()
    }

    fn tool_results(agent: &Agent) -> Vec<(String, String)> {
        agent
            .buffer()
            .snapshot()
            .into_iter()
            .filter_map(|e| match e {
                Entry::Tool {
                    tool_call_id,
                    content,
                    ..
                } => Some((tool_call_id, content)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_handoff_tool_injected_per_source() {
        let provider = Arc::new(ScriptedProvider::new());
        let gateway = HandoffGateway::from_declaration(
            "lead -> dev, lead -> qa",
            vec![
                worker("lead", &provider),
                worker("dev", &provider),
                worker("qa", &provider),
            ],
            GatewayOptions::default(),
        )
        .unwrap();

        let lead = gateway.agent("lead").unwrap();
        match lead.tools().lookup(HANDOFF_TOOL).unwrap() {
            crate::tools::ToolKind::Handoff(h) => {
                assert_eq!(h.receivers(), ["dev".to_string(), "qa".to_string()])
            }
            _ => panic!("expected handoff tool"),
        }
        assert!(gateway.agent("dev").unwrap().tools().is_empty());
        assert_eq!(gateway.topology().entry_point(), "lead");
    }

    #[test]
    fn test_unregistered_node_fails_construction() {
        let provider = Arc::new(ScriptedProvider::new());
        let err = HandoffGateway::from_declaration(
            "lead -> dev",
            vec![worker("lead", &provider)],
            GatewayOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Topology(_)));
    }

    #[tokio::test]
    async fn test_chain_returns_receiver_reply() {
        crate::logging::init_test();
        let provider = Arc::new(
            ScriptedProvider::new()
                .script("lead", vec![tool_calls(vec![handoff_call("l1", "dev", "build it")])])
                .script("dev", vec![CompletionResponse::text("built")]),
        );
        let gateway = HandoffGateway::from_declaration(
            "lead -> dev",
            vec![worker("lead", &provider), worker("dev", &provider)],
            GatewayOptions::default(),
        )
        .unwrap();

        let outcome = gateway.execute("ship it", Vec::new()).await.unwrap();
        assert_eq!(outcome.termination, Termination::HandedOff);
        assert_eq!(outcome.reply(), Some("built"));

        let lead = gateway.agent("lead").unwrap();
        assert_eq!(tool_results(lead), vec![("l1".to_string(), "built".to_string())]);

        let dev_input = gateway.agent("dev").unwrap().buffer().snapshot();
        match &dev_input[1] {
            Entry::User { text: Some(text), .. } => {
                assert!(text.starts_with("Hey dev, it's lead here"));
                assert!(text.ends_with("build it"));
            }
            other => panic!("unexpected dev input: {:?}", other),
        }

        let history = gateway.tracer_snapshot();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, RecordStatus::Completed);
    }

    #[tokio::test]
    async fn test_handoff_ends_turn_alongside_other_calls() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .script(
                    "lead",
                    vec![tool_calls(vec![
                        handoff_call("l1", "dev", "build it"),
                        tool_call("l2", "note", json!({})),
                    ])],
                )
                .script("dev", vec![CompletionResponse::text("built")]),
        );
        let note = tool_fn("note", "Take a note", json!({"type": "object"}), |_: Value| async {
            Ok(ToolOutput::text("noted"))
        });
        let lead = Agent::builder("lead", "gpt-4.1", provider.clone() as Arc<dyn Provider>)
            .allow_user_input(false)
            .tool(note)
            .build()
            .unwrap();
        let gateway = HandoffGateway::from_declaration(
            "lead -> dev",
            vec![lead, worker("dev", &provider)],
            GatewayOptions::default(),
        )
        .unwrap();

        // a second completion would exhaust the script and fail
        let outcome = gateway.execute("go", Vec::new()).await.unwrap();
        assert_eq!(outcome.termination, Termination::HandedOff);
        assert_eq!(outcome.turns, 1);
        assert_eq!(provider.calls_for("lead"), 1);
        assert_eq!(
            tool_results(gateway.agent("lead").unwrap()),
            vec![
                ("l1".to_string(), "built".to_string()),
                ("l2".to_string(), "noted".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_sequential_ping_pong_is_rejected() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .script("pm", vec![tool_calls(vec![handoff_call("p1", "dev", "build")])])
                .script("dev", vec![tool_calls(vec![handoff_call("d1", "pm", "done")])]),
        );
        let gateway = HandoffGateway::from_declaration(
            "pm <-> dev",
            vec![worker("pm", &provider), worker("dev", &provider)],
            GatewayOptions::default(),
        )
        .unwrap();

        let outcome = gateway.execute("start", Vec::new()).await.unwrap();
        assert_eq!(outcome.termination, Termination::HandedOff);
        assert_eq!(provider.requests().len(), 2);

        let pm_results = tool_results(gateway.agent("pm").unwrap());
        assert_eq!(pm_results.len(), 1);
        assert_eq!(pm_results[0].0, "p1");
        assert!(pm_results[0].1.contains("[interrupted]"));

        let dev_results = tool_results(gateway.agent("dev").unwrap());
        assert_eq!(dev_results[0].0, "d1");
        assert!(dev_results[0].1.ends_with("done"));

        // the rejected handback opens no record
        assert_eq!(gateway.tracer_snapshot().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_handback_preempts_waiting_sender() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .script(
                    "pm",
                    vec![
                        tool_calls(vec![handoff_call("p1", "dev", "build")]),
                        CompletionResponse::text("thanks dev"),
                    ],
                )
                .script("dev", vec![tool_calls(vec![handoff_call("d1", "pm", "built")])]),
        );
        let gateway = HandoffGateway::from_declaration(
            "pm <-> dev",
            vec![worker("pm", &provider), worker("dev", &provider)],
            GatewayOptions {
                scheduling: SchedulingMode::Concurrent,
                ..Default::default()
            },
        )
        .unwrap();

        let outcome = gateway.execute("start", Vec::new()).await.unwrap();
        assert_eq!(outcome.termination, Termination::HandedOff);
        assert_eq!(provider.calls_for("pm"), 2);
        assert_eq!(provider.calls_for("dev"), 1);

        // p1 is answered exactly once, by the interruption notice
        let pm_results = tool_results(gateway.agent("pm").unwrap());
        assert_eq!(pm_results.len(), 1);
        assert_eq!(pm_results[0].0, "p1");
        assert!(pm_results[0].1.starts_with("[interrupted]"));

        let dev_results = tool_results(gateway.agent("dev").unwrap());
        assert_eq!(dev_results, vec![("d1".to_string(), "thanks dev".to_string())]);

        let history = gateway.tracer_snapshot();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].call_id, "p1");
        assert_eq!(history[0].status, RecordStatus::Interrupted);
        assert_eq!(history[1].call_id, "d1");
        assert_eq!(history[1].status, RecordStatus::Completed);
    }

    #[tokio::test]
    async fn test_repeated_call_ids_close_every_record() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .script("a", vec![tool_calls(vec![handoff_call("call_0", "b", "plan")])])
                .script("b", vec![tool_calls(vec![handoff_call("call_0", "c", "build")])])
                .script("c", vec![CompletionResponse::text("done")]),
        );
        let gateway = HandoffGateway::from_declaration(
            "a -> b, b -> c",
            vec![
                worker("a", &provider),
                worker("b", &provider),
                worker("c", &provider),
            ],
            GatewayOptions {
                scheduling: SchedulingMode::Concurrent,
                ..Default::default()
            },
        )
        .unwrap();

        let outcome = gateway.execute("start", Vec::new()).await.unwrap();
        assert_eq!(outcome.reply(), Some("done"));

        let history = gateway.tracer_snapshot();
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|r| r.status == RecordStatus::Completed));
        assert_eq!(
            tool_results(gateway.agent("a").unwrap()),
            vec![("call_0".to_string(), "done".to_string())]
        );
    }

    #[tokio::test]
    async fn test_unpermitted_receiver_is_contract_error() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .script("lead", vec![tool_calls(vec![handoff_call("l1", "qa", "test")])]),
        );
        let gateway = HandoffGateway::from_declaration(
            "lead -> dev, dev -> qa",
            vec![
                worker("lead", &provider),
                worker("dev", &provider),
                worker("qa", &provider),
            ],
            GatewayOptions::default(),
        )
        .unwrap();

        let err = gateway.execute("go", Vec::new()).await.unwrap_err();
        assert!(matches!(err, Error::Contract(ref m) if m.contains("qa")));
    }
}
