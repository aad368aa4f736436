pub mod agent;
pub mod memory;
pub mod step;
pub mod tool;

mod error;

pub use agent::{Agent, AgentOptions, AgentOutcome, ContextSource, ITERATION_LIMIT_MESSAGE};
pub use error::{Error, Result};
pub use memory::{ServiceContext, memory_tools, registry_with_memory_tools};
pub use step::AgentStep;
pub use tool::{
	ExecuteError, FnHandler, ParamKind, Tool, ToolContext, ToolHandler, ToolParameter,
	ToolRegistry,
};
