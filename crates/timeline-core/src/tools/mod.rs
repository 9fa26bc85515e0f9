pub mod registry;
pub mod types;

pub use registry::{FunctionTool, RegistryError, ShouldRegister, ToolManager, ToolRegistry};
pub use types::{FunctionSchema, SharedTool, Tool, ToolError, ToolResult, ToolSchema};
