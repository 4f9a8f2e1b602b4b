use async_trait::async_trait;
use indoc::indoc;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use super::calculator::{self, format_number, FUNCTIONS};
use super::{System, ToolContext};
use crate::agent::Agent;
use crate::errors::{AgentError, AgentResult};
use crate::models::conversation::ConversationState;
use crate::models::message::Message;
use crate::models::tool::{Tool, ToolCall};
use crate::outbox::CollectingOutbox;
use crate::prompt_template::{load_prompt_file, MATH_SOLVER_PROMPT, PROBLEM_STATEMENT_PROMPT};
use crate::providers::base::{ModelRequest, Provider};

/// The `calculator` tool handed to the math solver
pub struct CalculatorSystem {
    tools: Vec<Tool>,
}

impl Default for CalculatorSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl CalculatorSystem {
    pub fn new() -> Self {
        let calculator = Tool::new(
            "calculator",
            indoc! {r#"
                Evaluates a numeric expression and returns the result.
                Supports + - * / % ^, parentheses, pi, e, tau and common functions
                like sqrt, ln, log, sin, cos, factorial, min and max.
            "#},
            json!({
                "type": "object",
                "properties": {
                    "expression": {
                        "type": "string",
                        "description": "The expression to evaluate, e.g. \"sqrt(2) * 3^2\""
                    }
                },
                "required": ["expression"],
                "additionalProperties": false
            }),
        );
        Self {
            tools: vec![calculator],
        }
    }
}

#[async_trait]
impl System for CalculatorSystem {
    fn name(&self) -> &str {
        "CalculatorSystem"
    }

    fn description(&self) -> &str {
        "Evaluates arithmetic expressions"
    }

    fn tools(&self) -> &[Tool] {
        &self.tools
    }

    async fn call(&self, tool_call: ToolCall, _ctx: &ToolContext<'_>) -> AgentResult<String> {
        match tool_call.name.as_str() {
            "calculator" => {
                let expression = tool_call.str_arg("expression")?;
                calculator::evaluate(expression)
                    .map(format_number)
                    .map_err(|e| AgentError::InvalidParameters(format!("{}: {}", expression, e)))
            }
            _ => Err(AgentError::ToolNotFound(tool_call.name)),
        }
    }
}

/// `solve_math` and `math_problem_state`.
///
/// Solving runs a nested agent with the calculator on a fresh conversation
/// for every problem, so no state leaks between problems.
pub struct MathSystem {
    tools: Vec<Tool>,
    provider: Arc<dyn Provider>,
    solver_prompt: String,
    statement_prompt: String,
}

impl MathSystem {
    pub fn new(provider: Arc<dyn Provider>) -> AgentResult<Self> {
        let solver_prompt = load_prompt_file(
            MATH_SOLVER_PROMPT,
            &json!({"functions": FUNCTIONS.join(", ")}),
        )
        .map_err(|e| AgentError::Internal(e.to_string()))?;
        let statement_prompt = load_prompt_file(PROBLEM_STATEMENT_PROMPT, &json!({}))
            .map_err(|e| AgentError::Internal(e.to_string()))?;

        let solve_math = Tool::new(
            "solve_math",
            "Solve a math problem step by step, with exact calculations.",
            json!({
                "type": "object",
                "properties": {
                    "problem_statement": {
                        "type": "string",
                        "description": "The complete math problem statement."
                    }
                },
                "required": ["problem_statement"],
                "additionalProperties": false
            }),
        );
        let math_problem_state = Tool::new(
            "math_problem_state",
            "Restate a math problem precisely, without solving it.",
            json!({
                "type": "object",
                "properties": {
                    "problem": {
                        "type": "string",
                        "description": "The problem as the user wrote it."
                    }
                },
                "required": ["problem"],
                "additionalProperties": false
            }),
        );

        Ok(Self {
            tools: vec![solve_math, math_problem_state],
            provider,
            solver_prompt,
            statement_prompt,
        })
    }

    async fn solve_math(&self, problem: &str) -> AgentResult<String> {
        let mut solver = Agent::new(Box::new(self.provider.clone()), self.solver_prompt.clone());
        solver.add_system(Box::new(CalculatorSystem::new()));

        let mut state = ConversationState::new();
        // intermediate solver text stays out of the channel
        let scratch = CollectingOutbox::new();
        solver
            .run_turn(&mut state, Message::user().with_text(problem), &scratch)
            .await
            .map_err(|e| AgentError::ExecutionError(e.to_string()))?;

        info!(turns = state.len(), "math solver finished");
        let answer = state.last().map(|m| m.text()).unwrap_or_default();
        if answer.trim().is_empty() {
            return Err(AgentError::ExecutionError(
                "the solver returned no answer".to_string(),
            ));
        }
        Ok(answer)
    }

    async fn math_problem_state(&self, problem: &str) -> AgentResult<String> {
        let messages = vec![Message::user().with_text(problem)];
        let reply = self
            .provider
            .complete(&ModelRequest::new(&self.statement_prompt, &messages, &[]))
            .await
            .map_err(|e| AgentError::ExecutionError(e.to_string()))?;
        Ok(reply.message.text())
    }
}

#[async_trait]
impl System for MathSystem {
    fn name(&self) -> &str {
        "MathSystem"
    }

    fn description(&self) -> &str {
        "Solves and restates math problems"
    }

    fn tools(&self) -> &[Tool] {
        &self.tools
    }

    async fn call(&self, tool_call: ToolCall, _ctx: &ToolContext<'_>) -> AgentResult<String> {
        match tool_call.name.as_str() {
            "solve_math" => self.solve_math(tool_call.str_arg("problem_statement")?).await,
            "math_problem_state" => self.math_problem_state(tool_call.str_arg("problem")?).await,
            _ => Err(AgentError::ToolNotFound(tool_call.name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::role::Role;
    use crate::providers::errors::ProviderError;
    use crate::providers::mock::MockProvider;

    fn ctx_call(name: &str, args: serde_json::Value) -> ToolCall {
        ToolCall::new(name, args)
    }

    #[tokio::test]
    async fn test_calculator_tool() {
        let system = CalculatorSystem::new();
        let outbox = CollectingOutbox::new();
        let ctx = ToolContext::new(&outbox);

        let result = system
            .call(ctx_call("calculator", json!({"expression": "2+2"})), &ctx)
            .await;
        assert_eq!(result, Ok("4".to_string()));

        let result = system
            .call(ctx_call("calculator", json!({"expression": "1/0"})), &ctx)
            .await;
        assert_eq!(
            result,
            Err(AgentError::InvalidParameters("1/0: division by zero".to_string()))
        );
    }

    #[tokio::test]
    async fn test_solve_math_runs_nested_loop_with_calculator() {
        let mock = Arc::new(MockProvider::new(vec![
            Message::assistant().with_tool_request(
                "c1",
                Ok(ToolCall::new("calculator", json!({"expression": "2+2"}))),
            ),
            Message::assistant().with_text("2 + 2 = 4"),
        ]));
        let system = MathSystem::new(mock.clone()).unwrap();
        let outbox = CollectingOutbox::new();
        let ctx = ToolContext::new(&outbox);

        let answer = system
            .call(
                ctx_call("solve_math", json!({"problem_statement": "2+2"})),
                &ctx,
            )
            .await
            .unwrap();

        assert_eq!(answer, "2 + 2 = 4");
        // solver text never reaches the caller's outbox
        assert!(outbox.texts().is_empty());
        let requests = mock.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].tool_names, vec!["calculator"]);
        assert!(requests[0].system.contains("calculator"));
        let tool_turn = &requests[1].messages[2];
        assert_eq!(tool_turn.role, Role::Tool);
        assert_eq!(tool_turn.content[0].as_tool_response().unwrap().output, "4");
    }

    #[tokio::test]
    async fn test_each_problem_starts_fresh() {
        let mock = Arc::new(MockProvider::new(vec![
            Message::assistant().with_text("uno"),
            Message::assistant().with_text("dos"),
        ]));
        let system = MathSystem::new(mock.clone()).unwrap();
        let outbox = CollectingOutbox::new();
        let ctx = ToolContext::new(&outbox);

        for problem in ["a", "b"] {
            system
                .call(ctx_call("solve_math", json!({"problem_statement": problem})), &ctx)
                .await
                .unwrap();
        }
        let requests = mock.requests();
        assert_eq!(requests[1].messages.len(), 1);
        assert_eq!(requests[1].messages[0].text(), "b");
    }

    #[tokio::test]
    async fn test_solver_backend_failure_is_an_error() {
        let mock = Arc::new(MockProvider::from_steps(vec![Err(ProviderError::RateLimited)]));
        let system = MathSystem::new(mock).unwrap();
        let outbox = CollectingOutbox::new();
        let ctx = ToolContext::new(&outbox);

        let result = system
            .call(ctx_call("solve_math", json!({"problem_statement": "x"})), &ctx)
            .await;
        assert!(matches!(result, Err(AgentError::ExecutionError(_))));
    }

    #[tokio::test]
    async fn test_problem_state_uses_no_tools() {
        let mock = Arc::new(MockProvider::new(vec![
            Message::assistant().with_text("Hallar $x$ tal que $x^2 = 4$."),
        ]));
        let system = MathSystem::new(mock.clone()).unwrap();
        let outbox = CollectingOutbox::new();
        let ctx = ToolContext::new(&outbox);

        let restated = system
            .call(
                ctx_call("math_problem_state", json!({"problem": "x^2=4 cuanto es x"})),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(restated, "Hallar $x$ tal que $x^2 = 4$.");
        let requests = mock.requests();
        assert!(requests[0].tool_names.is_empty());
        assert!(requests[0].system.contains("Never solve"));
    }
}
