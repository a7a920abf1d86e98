//! The agent network router.
//!
//! ```text
//!            turn, marker found
//! RUNNING ─────────────────────────▶ CONVERGED
//!    │  ▲
//!    │  │ turn, no marker, below cap
//!    └──┘
//!    │
//!    │ turn, no marker, cap reached
//!    ▼
//! EXHAUSTED
//! ```
//!
//! Turns run strictly one after another. After each turn the router checks
//! the agent's latest text for the completion marker; nothing else can end
//! the loop early.

use serde::{Deserialize, Serialize};
use tracing::{Instrument, info, info_span};

use crate::agent::CodingAgent;
use crate::convergence::extract_task_summary;
use crate::llm::Message;
use crate::state::AgentState;
use crate::step::{StepError, StepExecutor};
use crate::tools::ToolContext;

/// Router state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouterState {
    /// More turns may follow.
    Running,
    /// The agent emitted a valid completion marker.
    Converged,
    /// The iteration cap was reached without convergence.
    Exhausted,
}

impl RouterState {
    /// Whether the loop has stopped.
    pub fn is_terminal(self) -> bool {
        !matches!(self, RouterState::Running)
    }
}

/// Post-turn transition.
///
/// Records the summary in `state` when `text` carries a valid marker.
pub fn advance(
    state: &mut AgentState,
    text: Option<&str>,
    iterations: u32,
    max_iterations: u32,
) -> RouterState {
    if let Some(summary) = text.and_then(extract_task_summary) {
        state.summary = summary;
        return RouterState::Converged;
    }
    if iterations >= max_iterations {
        RouterState::Exhausted
    } else {
        RouterState::Running
    }
}

/// How a network run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkOutcome {
    /// Terminal router state.
    pub status: RouterState,
    /// Number of agent turns performed.
    pub iterations: u32,
    /// Final shared state.
    pub state: AgentState,
}

/// Iteration loop around a single coding agent.
#[derive(Debug)]
pub struct AgentNetwork<'a> {
    agent: &'a CodingAgent,
    max_iterations: u32,
}

impl<'a> AgentNetwork<'a> {
    /// Create a network that allows at most `max_iterations` turns.
    pub fn new(agent: &'a CodingAgent, max_iterations: u32) -> Self {
        Self {
            agent,
            max_iterations,
        }
    }

    /// Run the agent on `input`, seeded with `history` (oldest first).
    pub async fn run(
        &self,
        steps: &StepExecutor,
        ctx: &ToolContext<'_>,
        history: Vec<Message>,
        input: &str,
    ) -> Result<NetworkOutcome, StepError> {
        let mut conversation = history;
        conversation.push(Message::user(input));

        let mut state = AgentState::new();
        let mut iterations = 0;
        let mut status = if self.max_iterations == 0 {
            RouterState::Exhausted
        } else {
            RouterState::Running
        };

        while !status.is_terminal() {
            let turn = iterations + 1;
            let result = self
                .agent
                .turn(turn, steps, ctx, &mut conversation)
                .instrument(info_span!("agent_turn", iteration = turn))
                .await?;
            iterations = turn;

            state.merge_files(result.files);
            status = advance(
                &mut state,
                result.text.as_deref(),
                iterations,
                self.max_iterations,
            );
            info!(
                iteration = iterations,
                tool_calls = result.tool_calls,
                files = state.files.len(),
                status = ?status,
                "agent turn finished"
            );
        }

        Ok(NetworkOutcome {
            status,
            iterations,
            state,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::limits::JobLimits;
    use crate::llm::{AssistantReply, ScriptedModel, ToolCall};
    use crate::sandbox::{MemorySandboxProvider, SandboxProvider};
    use crate::store::InMemoryStepStore;

    async fn run_network(model: Arc<ScriptedModel>, cap: u32) -> NetworkOutcome {
        let agent = CodingAgent::new(model, "test-model");
        let provider = MemorySandboxProvider::new();
        let session = provider.create("caffeine").await.unwrap();
        let steps = StepExecutor::new("run-1", Arc::new(InMemoryStepStore::new()));
        let limits = JobLimits::default();
        let ctx = ToolContext {
            sandboxes: &provider,
            sandbox_id: &session.id,
            limits: &limits,
        };
        AgentNetwork::new(&agent, cap)
            .run(&steps, &ctx, Vec::new(), "build a counter")
            .await
            .unwrap()
    }

    #[test]
    fn test_advance() {
        let mut state = AgentState::new();
        assert_eq!(advance(&mut state, None, 1, 12), RouterState::Running);
        assert_eq!(advance(&mut state, Some("working"), 12, 12), RouterState::Exhausted);
        assert_eq!(
            advance(&mut state, Some("<task_summary>done</task_summary>"), 12, 12),
            RouterState::Converged
        );
        assert_eq!(state.summary, "done");
    }

    #[test]
    fn test_blank_marker_does_not_converge() {
        let mut state = AgentState::new();
        assert_eq!(
            advance(&mut state, Some("<task_summary> </task_summary>"), 3, 12),
            RouterState::Running
        );
        assert!(state.summary.is_empty());
    }

    #[tokio::test]
    async fn test_stops_on_marker() {
        let model = Arc::new(ScriptedModel::new([
            AssistantReply::tool_calls(vec![ToolCall::new(
                "call_1",
                "createOrUpdateFile",
                json!({"files": [{"path": "app/page.tsx", "content": "page"}]}),
            )]),
            AssistantReply::text("checking"),
            AssistantReply::text("<task_summary>Built a counter</task_summary>"),
            AssistantReply::text("never requested"),
        ]));

        let outcome = run_network(Arc::clone(&model), 12).await;

        assert_eq!(outcome.status, RouterState::Converged);
        assert_eq!(outcome.iterations, 3);
        assert_eq!(outcome.state.summary, "Built a counter");
        assert_eq!(outcome.state.files.len(), 1);
        assert_eq!(model.calls(), 3);
    }

    #[tokio::test]
    async fn test_stops_exactly_at_cap() {
        let model = Arc::new(ScriptedModel::repeating(AssistantReply::text("still going")));

        let outcome = run_network(Arc::clone(&model), 12).await;

        assert_eq!(outcome.status, RouterState::Exhausted);
        assert_eq!(outcome.iterations, 12);
        assert_eq!(model.calls(), 12);
        assert!(outcome.state.summary.is_empty());
    }

    #[tokio::test]
    async fn test_zero_cap_runs_no_turns() {
        let model = Arc::new(ScriptedModel::repeating(AssistantReply::text("x")));

        let outcome = run_network(Arc::clone(&model), 0).await;

        assert_eq!(outcome.status, RouterState::Exhausted);
        assert_eq!(outcome.iterations, 0);
        assert_eq!(model.calls(), 0);
    }
}
