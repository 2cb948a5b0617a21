//! Configuration loading for agentmesh.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::providers::openai::DEFAULT_BASE_URL;
use crate::providers::ToolChoice;

/// Get the agentmesh home directory (~/.agentmesh).
pub fn get_home_dir() -> Result<PathBuf> {
    let home = directories::UserDirs::new()
        .ok_or_else(|| Error::Config("Could not determine home directory".to_string()))?;

    Ok(home.home_dir().join(".agentmesh"))
}

/// Get the settings file path.
pub fn get_settings_path() -> Result<PathBuf> {
    Ok(get_home_dir()?.join("settings.json"))
}

/// Load settings from `path`, or from ~/.agentmesh/settings.json.
pub fn load_settings(path: Option<&Path>) -> Result<Settings> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => get_settings_path()?,
    };

    if !path.exists() {
        return Err(Error::Config(format!(
            "Settings file not found at {}",
            path.display()
        )));
    }

    let content = std::fs::read_to_string(&path)?;
    let settings: Settings = serde_json::from_str(&content)?;
    validate_settings(&settings)?;

    tracing::debug!("Loaded settings from {}", path.display());
    Ok(settings)
}

pub fn validate_settings(settings: &Settings) -> Result<()> {
    if settings.topology.trim().is_empty() {
        return Err(Error::Config("topology must not be empty".to_string()));
    }
    if settings.agents.is_empty() {
        return Err(Error::Config("at least one agent is required".to_string()));
    }

    let mut names = HashSet::new();
    for agent in &settings.agents {
        if agent.name.trim().is_empty() {
            return Err(Error::Config("agent name must not be empty".to_string()));
        }
        if !names.insert(agent.name.as_str()) {
            return Err(Error::DuplicateAgent(agent.name.clone()));
        }
        if !(0.0..=2.0).contains(&agent.temperature) {
            return Err(Error::Config(format!(
                "agent '{}': temperature {} is outside [0, 2]",
                agent.name, agent.temperature
            )));
        }
    }
    Ok(())
}

/// How tool calls and nested handoffs are scheduled.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingMode {
    /// Tool calls run one at a time; ping-pong handoffs are rejected.
    #[default]
    Sequential,
    /// Tool calls in one batch run concurrently; a handoff to an agent that
    /// is itself waiting on a handoff preempts that exchange.
    Concurrent,
}

/// Completion provider configuration.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ProviderSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    pub api_key: Option<String>,
    /// Environment variable consulted when `api_key` is not set.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

impl ProviderSettings {
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var(&self.api_key_env).ok())
            .filter(|k| !k.trim().is_empty())
    }
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            api_key_env: default_api_key_env(),
        }
    }
}

/// Agent configuration.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AgentConfig {
    pub name: String,
    pub model: String,
    #[serde(default = "default_instructions")]
    pub instructions: String,
    #[serde(default = "default_allow_user_input")]
    pub allow_user_input: bool,
    /// Completion rounds per call; unlimited when absent.
    pub max_turns: Option<u32>,
    pub tool_choice: Option<ToolChoice>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

pub fn default_instructions() -> String {
    "You are a helpful assistant.".to_string()
}

fn default_allow_user_input() -> bool {
    true
}

fn default_temperature() -> f32 {
    1.0
}

fn default_tracer_window() -> usize {
    crate::core::conversation::DEFAULT_RECENT_WINDOW
}

fn default_max_nudges() -> u32 {
    1
}

/// agentmesh settings.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Settings {
    #[serde(default)]
    pub provider: ProviderSettings,

    /// Topology declaration, e.g. `"pm <-> dev, pm -> qa"`.
    pub topology: String,

    #[serde(default)]
    pub scheduling: SchedulingMode,

    /// Recent-history window used to reject ping-pong handoffs.
    #[serde(default = "default_tracer_window")]
    pub tracer_window: usize,

    /// Corrective notes a non-interactive agent receives per call before it
    /// is stopped (concurrent mode).
    #[serde(default = "default_max_nudges")]
    pub max_nudges: u32,

    pub agents: Vec<AgentConfig>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"{
        "provider": { "base_url": "http://localhost:11434/v1", "api_key": "sk-test" },
        "topology": "pm <-> dev",
        "scheduling": "concurrent",
        "agents": [
            { "name": "pm", "model": "gpt-4.1" },
            { "name": "dev", "model": "gpt-4.1", "allow_user_input": false,
              "max_turns": 8, "tool_choice": "auto", "temperature": 0.2 }
        ]
    }"#;

    #[test]
    fn test_load_settings() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("settings.json");
        std::fs::write(&path, SAMPLE).unwrap();

        let settings = load_settings(Some(&path)).unwrap();
        assert_eq!(settings.scheduling, SchedulingMode::Concurrent);
        assert_eq!(settings.tracer_window, 3);
        assert_eq!(settings.max_nudges, 1);
        assert_eq!(settings.provider.resolve_api_key().as_deref(), Some("sk-test"));

        let pm = &settings.agents[0];
        assert!(pm.allow_user_input);
        assert_eq!(pm.instructions, "You are a helpful assistant.");
        assert_eq!(pm.max_turns, None);

        let dev = &settings.agents[1];
        assert!(!dev.allow_user_input);
        assert_eq!(dev.max_turns, Some(8));
        assert_eq!(dev.tool_choice, Some(ToolChoice::Auto));
    }

    #[test]
    fn test_missing_settings_file() {
        let temp_dir = TempDir::new().unwrap();
        let err = load_settings(Some(&temp_dir.path().join("nope.json"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_validate_rejects_duplicates_and_bad_temperature() {
        let mut settings: Settings = serde_json::from_str(SAMPLE).unwrap();
        settings.agents[1].name = "pm".to_string();
        assert!(matches!(validate_settings(&settings), Err(Error::DuplicateAgent(_))));

        let mut settings: Settings = serde_json::from_str(SAMPLE).unwrap();
        settings.agents[0].temperature = 3.5;
        assert!(matches!(validate_settings(&settings), Err(Error::Config(_))));

        let mut settings: Settings = serde_json::from_str(SAMPLE).unwrap();
        settings.topology = "  ".to_string();
        assert!(matches!(validate_settings(&settings), Err(Error::Config(_))));
    }
}
