//! Foundry: durable orchestration for a sandboxed coding agent
//!
//! One user request becomes one job run. The job provisions a sandbox,
//! loads recent conversation history, lets a tool-calling coding agent work
//! inside the sandbox until it reports completion or hits the iteration
//! cap, and persists the outcome as a chat message. Every externally
//! visible unit of work is a memoized step, so an interrupted run can be
//! resumed under the same run id without repeating side effects.
//!
//! ```rust,ignore
//! use foundry::{CodeAgentJob, JobTrigger};
//!
//! let job = CodeAgentJob::builder(sandboxes, messages, steps, model).build();
//! let trigger = JobTrigger::new("build a counter", "p1")?;
//! let report = job.run("run-1", &trigger).await?;
//! ```

mod agent;
mod config;
mod convergence;
mod history;
mod job;
mod limits;
mod network;
mod persist;
mod state;
mod step;
mod summarize;
mod trigger;

pub mod llm;
pub mod prompt;
pub mod sandbox;
pub mod store;
pub mod tools;

pub use agent::{AgentTurn, CodingAgent};
pub use config::{ConfigError, EngineConfig};
pub use convergence::{SUMMARY_CLOSE, SUMMARY_OPEN, extract_task_summary};
pub use history::{format_transcript, load_history, to_chat_message};
pub use job::{CodeAgentJob, CodeAgentJobBuilder, JobError, JobReport};
pub use limits::{JobLimits, LimitedBuffer};
pub use network::{AgentNetwork, NetworkOutcome, RouterState, advance};
pub use persist::{ERROR_MESSAGE, PersistedResult, ResultPersister, is_error};
pub use state::AgentState;
pub use step::{StepError, StepExecutor};
pub use summarize::{DEFAULT_RESPONSE, DEFAULT_TITLE, Summarizer, text_or};
pub use trigger::{
    CODE_AGENT_RUN, JobTrigger, MAX_REQUEST_CHARS, TriggerData, TriggerError, TriggerEvent,
    submit_request,
};
