//! Human-input hooks for agents that talk to a user directly.

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;

use crate::error::Result;

/// Words that end an interactive session.
const EXIT_WORDS: [&str; 3] = ["exit", "quit", "/exit"];

/// Hooks an agent calls into while it runs.
#[async_trait]
pub trait Callbacks: Send + Sync {
    /// Ask the user for the next input after `agent` replied with
    /// `assistant_message`. `None` means the user declined to continue.
    async fn on_user_loop(
        &self,
        agent: &str,
        assistant_message: Option<&str>,
    ) -> Result<Option<String>>;

    /// Called right before a tool runs.
    fn on_tool_call(&self, agent: &str, tool: &str, arguments: &Value) {
        tracing::info!(%agent, %tool, %arguments, "{} ===> {}", agent, tool);
    }
}

/// For agents that never take direct user input.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHumanInput;

#[async_trait]
impl Callbacks for NoHumanInput {
    async fn on_user_loop(&self, _agent: &str, _assistant_message: Option<&str>) -> Result<Option<String>> {
        Ok(None)
    }
}

/// Reads user input line by line from stdin.
pub struct ConsoleInput {
    lines: Mutex<Lines<BufReader<Stdin>>>,
}

impl ConsoleInput {
    pub fn new() -> Self {
        Self {
            lines: Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
        }
    }
}

impl Default for ConsoleInput {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Callbacks for ConsoleInput {
    async fn on_user_loop(
        &self,
        agent: &str,
        assistant_message: Option<&str>,
    ) -> Result<Option<String>> {
        let mut stdout = tokio::io::stdout();
        if let Some(message) = assistant_message {
            stdout
                .write_all(format!("\n{}: {}\n", agent, message).as_bytes())
                .await?;
        }

        let mut lines = self.lines.lock().await;
        loop {
            stdout.write_all(b"> ").await?;
            stdout.flush().await?;

            let Some(line) = lines.next_line().await? else {
                return Ok(None);
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if EXIT_WORDS.contains(&line.to_lowercase().as_str()) {
                return Ok(None);
            }
            return Ok(Some(line.to_string()));
        }
    }

    fn on_tool_call(&self, agent: &str, tool: &str, arguments: &Value) {
        tracing::debug!(%agent, %tool, %arguments, "tool call");
        eprintln!("{} ===> {}", agent, tool);
    }
}
