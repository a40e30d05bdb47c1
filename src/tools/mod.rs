//! Tool boundary: the `Tool` trait and the dispatch table.
//!
//! Tools are named capabilities turning a string input into a string
//! output. The registry is built once per executor from the configured
//! tool list plus the synthesized cache-reader tool.

mod cache_reader;

pub use cache_reader::{CacheReader, CACHE_READER_TOOL};

use std::sync::Arc;

use async_trait::async_trait;

/// A named, invocable capability.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// When true, the tool's raw output ends the run directly with no
    /// further planning round.
    fn return_direct(&self) -> bool {
        false
    }

    async fn invoke(&self, input: &str) -> anyhow::Result<String>;
}

/// Resolves an action's requested tool name to an invocable capability.
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new(tools: Vec<Arc<dyn Tool>>) -> Self {
        Self { tools }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn resolve(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|tool| tool.name() == name)
    }

    /// Tool names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|tool| tool.name().to_string()).collect()
    }

    /// Observation fed back to the planner when it addresses a tool that
    /// does not exist. Never an error.
    pub fn invalid_tool_observation(&self, requested: &str) -> String {
        format!(
            "{requested} is not a valid tool, try one of [{}].",
            self.names().join(", ")
        )
    }
}
