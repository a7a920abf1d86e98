//! The code-agent job: one trigger in, one persisted outcome out.
//!
//! # Steps
//!
//! ```text
//! get-sandbox-id            create the session
//! set-sandbox-timeout       give it its expiry
//! get-previous-messages     snapshot the recent conversation window
//! code-agent:inference:<n>  one per agent turn
//! <tool>:<n>:<i>            one per tool call of turn n
//! generate-fragment-title   successful runs only
//! generate-response         successful runs only
//! get-sandbox-url           successful runs only
//! save-result
//! ```
//!
//! Every step is memoized under the run id, so running the same job again
//! after a crash picks up where it stopped without repeating side effects.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{Instrument, info, info_span, warn};

use crate::agent::CodingAgent;
use crate::config::EngineConfig;
use crate::history::load_history;
use crate::llm::{ChatModel, Message};
use crate::network::{AgentNetwork, RouterState};
use crate::persist::{ResultPersister, is_error};
use crate::sandbox::{SandboxProvider, SandboxSession};
use crate::step::{StepError, StepExecutor};
use crate::store::{MessageStore, MessageType, StepStore, StoredMessage};
use crate::summarize::Summarizer;
use crate::tools::{ToolContext, ToolRegistry};
use crate::trigger::{JobTrigger, TriggerError, TriggerEvent};

/// Errors that abort a job run.
///
/// Agent and tool failures never show up here; they end as an `ERROR`
/// message instead. A run that fails with a [`JobError::Step`] can be
/// retried with the same run id.
#[derive(Debug, Error)]
pub enum JobError {
    /// The trigger event was rejected.
    #[error(transparent)]
    Trigger(#[from] TriggerError),

    /// A step failed.
    #[error(transparent)]
    Step(#[from] StepError),
}

/// Summary of a finished job run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobReport {
    /// Run id the steps were recorded under.
    pub run_id: String,
    /// How the router loop ended.
    pub status: RouterState,
    /// Agent turns performed.
    pub iterations: u32,
    /// Sandbox session used by the run.
    pub sandbox_id: String,
    /// Public URL of the app, for successful runs.
    pub sandbox_url: Option<String>,
    /// Task summary, empty if the run did not converge.
    pub summary: String,
    /// Files the agent wrote.
    pub files: BTreeMap<String, String>,
    /// The persisted assistant message.
    pub message: StoredMessage,
}

impl JobReport {
    /// Whether the run was persisted as an error.
    pub fn is_error(&self) -> bool {
        self.message.message_type == MessageType::Error
    }
}

/// Builder for [`CodeAgentJob`].
pub struct CodeAgentJobBuilder {
    sandboxes: Arc<dyn SandboxProvider>,
    messages: Arc<dyn MessageStore>,
    steps: Arc<dyn StepStore>,
    model: Arc<dyn ChatModel>,
    summarizer_model: Option<Arc<dyn ChatModel>>,
    config: EngineConfig,
    tools: Option<ToolRegistry>,
    system_prompt: Option<String>,
}

impl fmt::Debug for CodeAgentJobBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodeAgentJobBuilder")
            .field("config", &self.config)
            .field("has_summarizer_model", &self.summarizer_model.is_some())
            .field("tools", &self.tools)
            .field("has_system_prompt", &self.system_prompt.is_some())
            .finish_non_exhaustive()
    }
}

impl CodeAgentJobBuilder {
    /// Set the engine configuration.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a separate model for the summarizers (defaults to the coding model).
    pub fn summarizer_model(mut self, model: Arc<dyn ChatModel>) -> Self {
        self.summarizer_model = Some(model);
        self
    }

    /// Replace the built-in tools.
    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Replace the coding agent's system prompt.
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Build the job.
    pub fn build(self) -> CodeAgentJob {
        let mut agent = CodingAgent::new(Arc::clone(&self.model), &self.config.coding_model)
            .with_temperature(self.config.temperature);
        if let Some(tools) = self.tools {
            agent = agent.with_tools(tools);
        }
        if let Some(prompt) = self.system_prompt {
            agent = agent.with_system_prompt(prompt);
        }

        let summarizer_model = self.summarizer_model.unwrap_or(self.model);
        let title = Summarizer::title(Arc::clone(&summarizer_model), &self.config.summarizer_model);
        let response = Summarizer::response(summarizer_model, &self.config.summarizer_model);

        CodeAgentJob {
            config: self.config,
            sandboxes: self.sandboxes,
            messages: self.messages,
            steps: self.steps,
            agent,
            title,
            response,
        }
    }
}

/// The orchestration job.
///
/// All collaborators are passed in explicitly; nothing is process-global,
/// so independent runs can share one job value or use their own.
pub struct CodeAgentJob {
    config: EngineConfig,
    sandboxes: Arc<dyn SandboxProvider>,
    messages: Arc<dyn MessageStore>,
    steps: Arc<dyn StepStore>,
    agent: CodingAgent,
    title: Summarizer,
    response: Summarizer,
}

impl fmt::Debug for CodeAgentJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodeAgentJob")
            .field("config", &self.config)
            .field("agent", &self.agent)
            .finish_non_exhaustive()
    }
}

impl CodeAgentJob {
    /// Start building a job from its required collaborators.
    pub fn builder(
        sandboxes: Arc<dyn SandboxProvider>,
        messages: Arc<dyn MessageStore>,
        steps: Arc<dyn StepStore>,
        model: Arc<dyn ChatModel>,
    ) -> CodeAgentJobBuilder {
        CodeAgentJobBuilder {
            sandboxes,
            messages,
            steps,
            model,
            summarizer_model: None,
            config: EngineConfig::default(),
            tools: None,
            system_prompt: None,
        }
    }

    /// Effective configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Validate a trigger event and run it.
    pub async fn handle_event(
        &self,
        run_id: &str,
        event: TriggerEvent,
    ) -> Result<JobReport, JobError> {
        let trigger = event.into_trigger()?;
        self.run(run_id, &trigger).await
    }

    /// Run the job for `trigger` under `run_id`.
    ///
    /// Calling this again with the same run id resumes the run: completed
    /// steps are replayed from the step store instead of being executed.
    pub async fn run(&self, run_id: &str, trigger: &JobTrigger) -> Result<JobReport, JobError> {
        let span = info_span!("code_agent_run", run_id, project_id = trigger.project_id());
        self.run_inner(run_id, trigger).instrument(span).await
    }

    async fn run_inner(&self, run_id: &str, trigger: &JobTrigger) -> Result<JobReport, JobError> {
        let steps = StepExecutor::new(run_id, Arc::clone(&self.steps));
        let project_id = trigger.project_id();
        let limits = &self.config.limits;

        let session: SandboxSession = steps
            .run("get-sandbox-id", || {
                self.sandboxes.create(&self.config.sandbox_template)
            })
            .await?;
        steps
            .run("set-sandbox-timeout", || {
                self.sandboxes.set_timeout(&session.id, limits.sandbox_timeout)
            })
            .await?;
        info!(sandbox_id = %session.id, template = %session.template, "sandbox ready");

        let history: Vec<Message> = steps
            .run("get-previous-messages", || {
                load_history(self.messages.as_ref(), project_id, limits.history_limit)
            })
            .await?;

        let ctx = ToolContext {
            sandboxes: self.sandboxes.as_ref(),
            sandbox_id: &session.id,
            limits,
        };
        let outcome = AgentNetwork::new(&self.agent, limits.max_iterations)
            .run(&steps, &ctx, history, trigger.request_text())
            .await?;

        let persister = ResultPersister::new(
            self.messages.as_ref(),
            self.sandboxes.as_ref(),
            self.config.app_port,
        );
        let persisted = if is_error(&outcome.state) {
            warn!(
                status = ?outcome.status,
                iterations = outcome.iterations,
                files = outcome.state.files.len(),
                "run did not produce a result"
            );
            persister.save_error(&steps, project_id).await?
        } else {
            let summary = &outcome.state.summary;
            let title = self.title.run(&steps, summary).await?;
            let response = self.response.run(&steps, summary).await?;
            persister
                .save_result(&steps, project_id, &session.id, &outcome.state, title, response)
                .await?
        };

        info!(
            status = ?outcome.status,
            iterations = outcome.iterations,
            "run finished"
        );

        Ok(JobReport {
            run_id: run_id.to_string(),
            status: outcome.status,
            iterations: outcome.iterations,
            sandbox_id: session.id,
            sandbox_url: persisted.sandbox_url,
            summary: outcome.state.summary,
            files: outcome.state.files,
            message: persisted.message,
        })
    }
}
