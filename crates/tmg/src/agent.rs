use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::chunking::{chunk_text, DISCORD_MESSAGE_LIMIT};
use crate::errors::{AgentError, AgentResult};
use crate::models::conversation::ConversationState;
use crate::models::message::{Message, ToolRequest};
use crate::models::tool::Tool;
use crate::outbox::Outbox;
use crate::providers::base::{ModelRequest, Provider};
use crate::providers::errors::ProviderError;
use crate::systems::{System, ToolContext};

pub const DEFAULT_MAX_ROUNDS: usize = 16;

/// Why a turn ended without a final answer. In both cases the conversation
/// state has already been cleared.
#[derive(Error, Debug)]
pub enum TurnError {
    #[error("Model backend unavailable: {0}")]
    BackendUnavailable(#[from] ProviderError),

    #[error("Stopped after {0} consecutive tool rounds")]
    TooManyRounds(usize),
}

/// Agent integrates a foundational LLM with the systems it needs to pilot
pub struct Agent {
    systems: Vec<Box<dyn System>>,
    provider: Box<dyn Provider>,
    system_prompt: String,
    tools: Vec<Tool>,
    max_rounds: usize,
    message_limit: usize,
}

impl Agent {
    /// Create a new Agent with the specified provider
    pub fn new<S: Into<String>>(provider: Box<dyn Provider>, system_prompt: S) -> Self {
        Self {
            systems: Vec::new(),
            provider,
            system_prompt: system_prompt.into(),
            tools: Vec::new(),
            max_rounds: DEFAULT_MAX_ROUNDS,
            message_limit: DISCORD_MESSAGE_LIMIT,
        }
    }

    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds.max(1);
        self
    }

    pub fn with_message_limit(mut self, limit: usize) -> Self {
        self.message_limit = limit.max(1);
        self
    }

    /// Add a system to the agent
    pub fn add_system(&mut self, system: Box<dyn System>) {
        self.tools.extend(system.tools().iter().cloned());
        self.systems.push(system);
    }

    /// The tool manifest advertised to the backend on every call
    pub fn tools(&self) -> &[Tool] {
        &self.tools
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    fn get_system_for_tool(&self, name: &str) -> Option<&dyn System> {
        self.systems
            .iter()
            .find(|system| system.tools().iter().any(|tool| tool.name == name))
            .map(|v| &**v)
    }

    /// Dispatch a single tool request, always producing the text to feed back
    async fn dispatch_tool_call(&self, request: &ToolRequest, ctx: &ToolContext<'_>) -> String {
        match self.try_dispatch(request, ctx).await {
            Ok(output) => output,
            Err(err) => {
                warn!(tool = request.name(), error = %err, "tool call failed");
                err.to_tool_output()
            }
        }
    }

    async fn try_dispatch(&self, request: &ToolRequest, ctx: &ToolContext<'_>) -> AgentResult<String> {
        let call = request.tool_call.clone()?;
        let system = self
            .get_system_for_tool(&call.name)
            .ok_or_else(|| AgentError::ToolNotFound(call.name.clone()))?;

        debug!(tool = %call.name, arguments = %call.arguments, "dispatching tool call");
        match AssertUnwindSafe(system.call(call, ctx)).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => Ok(format!("Panic: {}", panic_message(payload.as_ref()))),
        }
    }

    /// Drive one user turn to completion.
    ///
    /// Appends the user turn, then alternates backend calls and tool dispatch
    /// until the backend answers without tool calls. Reply text is sent to the
    /// outbox as it arrives, split to the transport limit. Tool requests are
    /// run in the order the backend listed them, each answered by its own tool
    /// turn appended after the reply that asked for it.
    pub async fn run_turn(
        &self,
        state: &mut ConversationState,
        user: Message,
        outbox: &dyn Outbox,
    ) -> Result<(), TurnError> {
        state.push(user);
        let ctx = ToolContext::new(outbox);
        let mut rounds = 0;

        loop {
            let request = ModelRequest::new(&self.system_prompt, state.messages(), &self.tools)
                .with_continuation(state.continuation());

            let reply = match self.provider.complete(&request).await {
                Ok(reply) => reply,
                Err(err) => {
                    error!(error = %err, turns = state.len(), "backend call failed, clearing conversation");
                    state.clear();
                    return Err(TurnError::BackendUnavailable(err));
                }
            };

            let text = reply.message.text();
            // Discord rejects blank messages
            if !text.trim().is_empty() {
                for chunk in chunk_text(&text, self.message_limit) {
                    if chunk.trim().is_empty() {
                        continue;
                    }
                    if let Err(err) = outbox.send_text(chunk).await {
                        warn!(error = %err, "failed to deliver reply text");
                    }
                }
                if let Err(err) = outbox.finish_text(&text).await {
                    warn!(error = %err, "failed to post-process reply text");
                }
            }

            let requests: Vec<ToolRequest> =
                reply.message.tool_requests().into_iter().cloned().collect();
            state.push(reply.message);
            if let Some(token) = reply.continuation {
                state.set_continuation(token);
            }

            if requests.is_empty() {
                return Ok(());
            }

            rounds += 1;
            if rounds > self.max_rounds {
                warn!(max_rounds = self.max_rounds, "too many tool rounds, clearing conversation");
                state.clear();
                return Err(TurnError::TooManyRounds(self.max_rounds));
            }

            for request in &requests {
                info!(tool = request.name(), id = %request.id, "running tool");
                let output = self.dispatch_tool_call(request, &ctx).await;
                state.push(Message::tool().with_tool_response(
                    request.id.clone(),
                    request.name(),
                    output,
                ));
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
