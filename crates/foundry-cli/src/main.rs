//! Foundry CLI
//!
//! Runs one code-agent job against a local sandbox and a JSON file store.
//!
//! Usage:
//!   foundry run --project <id> "build a counter"      Submit a request and run its job
//!   foundry run --project <id> --run-id <id> "..."    Resume an interrupted run
//!   foundry history --project <id>                    Print the recent conversation
//!   foundry config                                    Print the effective configuration

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use foundry::llm::{DEFAULT_BASE_URL, OpenAiCompatibleModel};
use foundry::sandbox::LocalSandboxProvider;
use foundry::store::{FileMessageStore, FileStepStore, MessageStore};
use foundry::{CodeAgentJob, EngineConfig, JobTrigger, format_transcript, submit_request};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "foundry", version, about = "Run sandboxed code-agent jobs")]
struct Cli {
    /// Directory holding messages, step records and sandboxes
    #[arg(long, env = "FOUNDRY_DATA_DIR", default_value = ".foundry", global = true)]
    data_dir: PathBuf,

    /// JSON configuration file
    #[arg(long, env = "FOUNDRY_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a job for a request
    Run {
        /// Project the request belongs to
        #[arg(long)]
        project: String,

        /// Resume this run instead of starting a new one
        #[arg(long)]
        run_id: Option<String>,

        /// Directory containing sandbox templates
        #[arg(long, env = "FOUNDRY_TEMPLATES")]
        templates: Option<PathBuf>,

        /// API key for the model endpoint
        #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
        api_key: Option<String>,

        /// OpenAI-compatible endpoint
        #[arg(long, env = "OPENAI_BASE_URL", default_value = DEFAULT_BASE_URL)]
        base_url: String,

        /// The request
        prompt: String,
    },

    /// Print a project's recent conversation
    History {
        /// Project to show
        #[arg(long)]
        project: String,

        /// Number of messages
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Print the effective configuration as JSON
    Config,
}

async fn load_config(path: Option<&Path>) -> anyhow::Result<EngineConfig> {
    match path {
        Some(path) => Ok(EngineConfig::from_file(path).await?),
        None => Ok(EngineConfig::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries the command's output
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref()).await?;

    match cli.command {
        Command::Run {
            project,
            run_id,
            templates,
            api_key,
            base_url,
            prompt,
        } => {
            let messages = Arc::new(FileMessageStore::new(&cli.data_dir));
            let steps = Arc::new(FileStepStore::new(&cli.data_dir));
            let mut sandboxes = LocalSandboxProvider::new(cli.data_dir.join("sandboxes"))
                .with_command_timeout(config.limits.command_timeout);
            if let Some(templates) = templates {
                sandboxes = sandboxes.with_templates(templates);
            }
            let model = Arc::new(OpenAiCompatibleModel::new(
                reqwest::Client::new(),
                base_url,
                api_key,
            ));

            let job = CodeAgentJob::builder(
                Arc::new(sandboxes),
                Arc::clone(&messages) as Arc<dyn MessageStore>,
                steps,
                model,
            )
            .config(config)
            .build();

            let trigger = JobTrigger::new(prompt, project)?;
            let report = match run_id {
                Some(run_id) => {
                    tracing::info!(run_id = %run_id, "resuming run");
                    job.run(&run_id, &trigger).await?
                }
                None => {
                    let run_id = ulid::Ulid::new().to_string().to_lowercase();
                    let (_, event) = submit_request(messages.as_ref(), &trigger)
                        .await
                        .context("failed to record the request")?;
                    tracing::info!(run_id = %run_id, "starting run");
                    job.handle_event(&run_id, event).await?
                }
            };

            println!("{}", serde_json::to_string_pretty(&report)?);
            if report.is_error() {
                std::process::exit(2);
            }
        }
        Command::History { project, limit } => {
            let store = FileMessageStore::new(&cli.data_dir);
            let limit = limit.unwrap_or(config.limits.history_limit);
            let mut recent = store.find_recent(&project, limit).await?;
            recent.reverse();
            print!("{}", format_transcript(&recent));
        }
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
