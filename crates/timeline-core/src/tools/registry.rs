use std::sync::Arc;

use dashmap::{mapref::entry::Entry, DashMap};
use thiserror::Error;

use super::types::{SharedTool, Tool, ToolError, ToolResult, ToolSchema};

/// Predicate deciding whether a registered tool is currently offered to the
/// model.
pub type ShouldRegister = Arc<dyn Fn() -> bool + Send + Sync>;

/// A tool as handed to the host's tool manager.
#[derive(Clone)]
pub struct FunctionTool {
    pub tool: SharedTool,
    pub should_register: ShouldRegister,
    /// Stealth tools leave no transcript entry and do not trigger a follow-up
    /// generation.
    pub stealth: bool,
    /// Toast shown while the tool runs.
    pub format_message: Option<String>,
}

impl FunctionTool {
    pub fn new(tool: SharedTool) -> Self {
        Self {
            tool,
            should_register: Arc::new(|| true),
            stealth: false,
            format_message: None,
        }
    }

    pub fn gated(mut self, should_register: ShouldRegister) -> Self {
        self.should_register = should_register;
        self
    }

    pub fn stealth(mut self) -> Self {
        self.stealth = true;
        self
    }

    pub fn with_format_message(mut self, message: impl Into<String>) -> Self {
        self.format_message = Some(message.into());
        self
    }

    pub fn name(&self) -> &str {
        self.tool.name()
    }

    pub fn is_routable(&self) -> bool {
        (self.should_register)()
    }
}

impl std::fmt::Debug for FunctionTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionTool")
            .field("name", &self.name())
            .field("stealth", &self.stealth)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("tool with name '{0}' already registered")]
    DuplicateTool(String),

    #[error("invalid tool: {0}")]
    InvalidTool(String),
}

/// The host's function-tool manager.
pub trait ToolManager: Send + Sync {
    fn register_function_tool(&self, tool: FunctionTool) -> Result<(), RegistryError>;

    fn unregister_function_tool(&self, name: &str) -> bool;
}

/// In-process tool manager.
pub struct ToolRegistry {
    tools: DashMap<String, FunctionTool>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: DashMap::new(),
        }
    }

    pub fn register<T>(&self, tool: T) -> Result<(), RegistryError>
    where
        T: Tool + 'static,
    {
        self.register_function_tool(FunctionTool::new(Arc::new(tool)))
    }

    pub fn get(&self, name: &str) -> Option<FunctionTool> {
        self.tools.get(name).map(|entry| entry.value().clone())
    }

    /// Returns the tool only while its `should_register` gate is open.
    pub fn routable(&self, name: &str) -> Option<FunctionTool> {
        self.get(name).filter(FunctionTool::is_routable)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Schemas of the tools currently offered to the model.
    pub fn list_tools(&self) -> Vec<ToolSchema> {
        let mut tools: Vec<ToolSchema> = self
            .tools
            .iter()
            .filter(|entry| entry.value().is_routable())
            .map(|entry| entry.value().tool.to_schema())
            .collect();
        tools.sort_by(|left, right| left.function.name.cmp(&right.function.name));
        tools
    }

    pub fn list_tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    /// Routes a call the way the host does: gated tools are invisible.
    pub async fn invoke(
        &self,
        name: &str,
        args: serde_json::Value,
    ) -> Result<ToolResult, ToolError> {
        let tool = self
            .routable(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        tool.tool.execute(args).await
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl ToolManager for ToolRegistry {
    fn register_function_tool(&self, tool: FunctionTool) -> Result<(), RegistryError> {
        let name = tool.name().trim().to_string();

        if name.is_empty() {
            return Err(RegistryError::InvalidTool(
                "tool name cannot be empty".to_string(),
            ));
        }

        match self.tools.entry(name) {
            Entry::Occupied(entry) => Err(RegistryError::DuplicateTool(entry.key().clone())),
            Entry::Vacant(entry) => {
                entry.insert(tool);
                Ok(())
            }
        }
    }

    fn unregister_function_tool(&self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }
}
