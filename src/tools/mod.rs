//! Tools that agents can call, and the per-agent registry that resolves them.
//!
//! Every tool execution yields a [`ToolOutput`]: a text plus zero or more
//! images. Arguments arrive as a JSON object and are decoded into a typed
//! structure before the tool body runs; decoding failures are contract
//! errors, not raw serde faults.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::context::Image;
use crate::error::{Error, Result};
use crate::protocol::HandoffTool;

/// Declared schema of a tool, as sent to the completion service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema of the argument object.
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// Result of a tool execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub text: String,
    pub images: Vec<Image>,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            images: Vec::new(),
        }
    }

    pub fn with_image(mut self, image: impl Into<Image>) -> Self {
        self.images.push(image.into());
        self
    }

    pub fn with_images<I, T>(mut self, images: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Image>,
    {
        self.images.extend(images.into_iter().map(Into::into));
        self
    }
}

impl TryFrom<Value> for ToolOutput {
    type Error = Error;

    /// Accepts `[text, null]`, `[text, image]` or `[text, [image, ...]]`.
    fn try_from(value: Value) -> Result<Self> {
        let pair = match value {
            Value::Array(items) if items.len() == 2 => items,
            other => {
                return Err(Error::contract(format!(
                    "tool output should be a (text, images) pair, got {}",
                    other
                )))
            }
        };
        let mut items = pair.into_iter();
        let text = match items.next() {
            Some(Value::String(s)) => s,
            Some(other) => {
                return Err(Error::contract(format!(
                    "tool output text must be a string, got {}",
                    other
                )))
            }
            None => return Err(Error::contract("tool output is missing its text")),
        };

        let images = match items.next() {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::String(s)) => vec![Image::from(s)],
            Some(Value::Array(list)) => list
                .into_iter()
                .map(|item| match item {
                    Value::String(s) => Ok(Image::from(s)),
                    other => Err(Error::contract(format!(
                        "tool output image must be a string, got {}",
                        other
                    ))),
                })
                .collect::<Result<Vec<_>>>()?,
            Some(other) => {
                return Err(Error::contract(format!(
                    "tool output images must be an image or a list of images, got {}",
                    other
                )))
            }
        };

        Ok(ToolOutput { text, images })
    }
}

/// An executable tool.
#[async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> &ToolDefinition;

    fn name(&self) -> &str {
        &self.definition().name
    }

    /// Run the tool with the decoded argument object.
    async fn execute(&self, arguments: Value) -> Result<ToolOutput>;
}

struct FnTool<A, F> {
    definition: ToolDefinition,
    func: F,
    _args: PhantomData<fn(A)>,
}

#[async_trait]
impl<A, F, Fut> Tool for FnTool<A, F>
where
    A: DeserializeOwned + Send + 'static,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ToolOutput>> + Send + 'static,
{
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn execute(&self, arguments: Value) -> Result<ToolOutput> {
        let args: A = serde_json::from_value(arguments).map_err(|e| {
            Error::contract(format!(
                "invalid arguments for tool '{}': {}",
                self.definition.name, e
            ))
        })?;
        (self.func)(args).await
    }
}

/// Build a tool from an async closure taking a typed argument struct.
pub fn tool_fn<A, F, Fut>(
    name: impl Into<String>,
    description: impl Into<String>,
    parameters: Value,
    func: F,
) -> Arc<dyn Tool>
where
    A: DeserializeOwned + Send + 'static,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ToolOutput>> + Send + 'static,
{
    Arc::new(FnTool {
        definition: ToolDefinition::new(name, description, parameters),
        func,
        _args: PhantomData,
    })
}

struct JsonTool<F> {
    definition: ToolDefinition,
    func: F,
}

#[async_trait]
impl<F, Fut> Tool for JsonTool<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn execute(&self, arguments: Value) -> Result<ToolOutput> {
        let raw = (self.func)(arguments).await?;
        ToolOutput::try_from(raw)
    }
}

/// Build a tool whose closure returns the untyped `[text, images]` shape.
pub fn tool_json<F, Fut>(
    name: impl Into<String>,
    description: impl Into<String>,
    parameters: Value,
    func: F,
) -> Arc<dyn Tool>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    Arc::new(JsonTool {
        definition: ToolDefinition::new(name, description, parameters),
        func,
    })
}

#[derive(Clone)]
enum Registered {
    Ordinary(Arc<dyn Tool>),
    Handoff(HandoffTool),
}

impl Registered {
    fn definition(&self) -> &ToolDefinition {
        match self {
            Registered::Ordinary(tool) => tool.definition(),
            Registered::Handoff(handoff) => handoff.definition(),
        }
    }
}

/// What a tool name resolves to.
pub enum ToolKind<'a> {
    Ordinary(&'a Arc<dyn Tool>),
    Handoff(&'a HandoffTool),
}

/// Name to tool lookup for one agent.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Registered>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tools(tools: impl IntoIterator<Item = Arc<dyn Tool>>) -> Result<Self> {
        let mut registry = Self::new();
        for tool in tools {
            registry.register(tool)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        self.insert(Registered::Ordinary(tool))
    }

    pub(crate) fn register_handoff(&mut self, handoff: HandoffTool) -> Result<()> {
        self.insert(Registered::Handoff(handoff))
    }

    fn insert(&mut self, tool: Registered) -> Result<()> {
        let name = tool.definition().name.clone();
        if self.index.contains_key(&name) {
            return Err(Error::DuplicateTool(name));
        }
        self.tools.push(tool);
        self.rebuild_index();
        tracing::debug!(tool = %name, "registered tool");
        Ok(())
    }

    fn rebuild_index(&mut self) {
        self.index = self
            .tools
            .iter()
            .enumerate()
            .map(|(i, tool)| (tool.definition().name.clone(), i))
            .collect();
    }

    pub fn lookup(&self, name: &str) -> Result<ToolKind<'_>> {
        let i = self
            .index
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("tool '{}'", name)))?;
        Ok(match &self.tools[*i] {
            Registered::Ordinary(tool) => ToolKind::Ordinary(tool),
            Registered::Handoff(handoff) => ToolKind::Handoff(handoff),
        })
    }

    /// Definitions in registration order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition().clone()).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools
            .iter()
            .map(|t| t.definition().name.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}
