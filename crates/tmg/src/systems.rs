use async_trait::async_trait;

use crate::errors::AgentResult;
use crate::models::tool::{Tool, ToolCall};
use crate::outbox::Outbox;

pub mod calculator;
pub mod math;
pub mod render;
pub mod scene;
pub mod search;

pub use math::MathSystem;
pub use render::{RenderConfig, RenderRecord, RenderSink, RenderSystem};
pub use search::SearchSystem;

/// What a tool handler may touch besides its arguments
#[derive(Clone, Copy)]
pub struct ToolContext<'a> {
    pub outbox: &'a dyn Outbox,
}

impl<'a> ToolContext<'a> {
    pub fn new(outbox: &'a dyn Outbox) -> Self {
        Self { outbox }
    }
}

/// Core trait that defines a system that can be operated by an AI agent
#[async_trait]
pub trait System: Send + Sync {
    /// Get the name of the system
    fn name(&self) -> &str;

    /// Get the system description
    fn description(&self) -> &str;

    /// Get available tools
    fn tools(&self) -> &[Tool];

    /// Call a tool with the given parameters, producing the text fed back to the model
    async fn call(&self, tool_call: ToolCall, ctx: &ToolContext<'_>) -> AgentResult<String>;
}
