//! CLI commands for agentmesh using clap.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use crate::agent::Agent;
use crate::callbacks::{Callbacks, ConsoleInput};
use crate::config::{load_settings, Settings};
use crate::context::Image;
use crate::core::TopologyGraph;
use crate::protocol::{GatewayOptions, HandoffGateway};
use crate::providers::{create_provider, Provider};

/// agentmesh - route a conversation through a topology of LLM agents.
#[derive(Parser)]
#[command(name = "agentmesh")]
#[command(version = "0.1.0")]
#[command(about = "agentmesh - cooperating LLM agents wired by a handoff topology", long_about = None)]
pub struct Commands {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the configured topology on one input
    Run {
        /// Settings file (defaults to ~/.agentmesh/settings.json)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// First message for the entry-point agent; read from stdin when absent
        #[arg(short, long)]
        input: Option<String>,

        /// Image URL or base64 payload attached to the first message
        #[arg(long = "image")]
        images: Vec<String>,
    },

    /// Parse a topology and print it as a tree
    Topology {
        /// Topology declaration, e.g. "pm <-> dev, pm -> qa"
        declaration: String,

        /// Agent names to validate the topology against
        #[arg(long, value_delimiter = ',')]
        agents: Vec<String>,
    },

    /// Validate a settings file and its topology
    Check {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

impl Commands {
    pub async fn run(&self) -> Result<()> {
        match &self.command {
            Command::Run {
                config,
                input,
                images,
            } => cmd_run(config.as_deref(), input.clone(), images).await,
            Command::Topology { declaration, agents } => cmd_topology(declaration, agents),
            Command::Check { config } => cmd_check(config.as_deref()),
        }
    }
}

/// Build every configured agent and wire them into a gateway.
///
/// Interactive agents share `console` as their user channel.
pub fn build_gateway(
    settings: &Settings,
    provider: Arc<dyn Provider>,
    console: Arc<dyn Callbacks>,
) -> Result<HandoffGateway> {
    let agents = settings
        .agents
        .iter()
        .map(|config| {
            let callbacks = config.allow_user_input.then(|| console.clone());
            Agent::from_config(config, provider.clone(), callbacks)
        })
        .collect::<crate::error::Result<Vec<_>>>()?;

    let gateway = HandoffGateway::from_declaration(&settings.topology, agents, GatewayOptions::from(settings))
        .context("failed to wire the topology")?;
    Ok(gateway)
}

// Command implementations

async fn cmd_run(
    config: Option<&std::path::Path>,
    input: Option<String>,
    images: &[String],
) -> Result<()> {
    let settings = load_settings(config)?;
    let provider = create_provider(&settings.provider);
    let console = Arc::new(ConsoleInput::new());
    let gateway = build_gateway(&settings, provider, console.clone())?;
    let entry = gateway.topology().entry_point().to_string();

    let input = match input {
        Some(text) => text,
        None => match console.on_user_loop(&entry, None).await? {
            Some(text) => text,
            None => {
                println!("No input given.");
                return Ok(());
            }
        },
    };
    let images: Vec<Image> = images.iter().map(|i| Image::from(i.as_str())).collect();

    let outcome = gateway.execute(input, images).await?;
    tracing::info!(
        turns = outcome.turns,
        termination = ?outcome.termination,
        handoffs = gateway.tracer_snapshot().len(),
        "run finished"
    );

    if let Some(reply) = outcome.reply() {
        println!("\n{}: {}", entry, reply);
    }
    Ok(())
}

fn cmd_topology(declaration: &str, agents: &[String]) -> Result<()> {
    let graph = TopologyGraph::parse(declaration)?;
    if !agents.is_empty() {
        graph.validate(agents)?;
    }

    print!("{}", graph.render_tree());
    println!("\nEntry point: {}", graph.entry_point());
    Ok(())
}

fn cmd_check(config: Option<&std::path::Path>) -> Result<()> {
    let settings = load_settings(config)?;
    let graph = TopologyGraph::parse(&settings.topology)?;
    let names: Vec<&str> = settings.agents.iter().map(|a| a.name.as_str()).collect();
    graph.validate(&names)?;

    println!("Settings OK: {} agent(s), {:?} scheduling", names.len(), settings.scheduling);
    print!("{}", graph.render_tree());
    if settings.provider.resolve_api_key().is_none() {
        println!(
            "\nWarning: no API key set (provider.api_key or ${})",
            settings.provider.api_key_env
        );
    }
    Ok(())
}
