//! Routine Agent CLI
//!
//! Loads a JSON fixture into the in-memory store and runs one agent
//! operation against it, printing the result as JSON.
//!
//! Usage:
//!   cargo run --features cli --bin routine-agent -- \
//!     --fixture fixtures/owner.json \
//!     submit "I ran this morning, every Mon Wed Fri at 7"
//!
//! Examples:
//!   # Detect routines
//!   cargo run --features cli --bin routine-agent -- --fixture owner.json analyze
//!
//!   # Check a proposed schedule
//!   cargo run --features cli --bin routine-agent -- --fixture owner.json \
//!     conflict --title Swim --days mon,wed --start 7 --end 8
//!
//!   # Offline run against recorded provider replies
//!   cargo run --features cli --bin routine-agent -- --fixture owner.json \
//!     --replay replies.yaml suggest --title Piano --frequency 3

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use routine_agent::memory::Fixture;
use routine_agent::model::{ProposedSchedule, TimeBlock};
use routine_agent::{AgentConfig, AgentError, InlineImage, RoutineAgent, ScriptedTransport};

/// Routine agent command line
#[derive(Parser, Debug)]
#[command(name = "routine-agent")]
#[command(about = "Plan actions from utterances and analyze routines")]
struct Args {
    /// JSON fixture with the owner's subjects, labels, facts and occurrences
    #[arg(long)]
    fixture: PathBuf,

    /// YAML configuration; environment variables are used when absent
    #[arg(long)]
    config: Option<PathBuf>,

    /// Replay provider replies from a JSON/YAML script instead of calling Gemini
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Act as this owner instead of the fixture's owner
    #[arg(long)]
    owner: Option<Uuid>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Interpret an utterance and apply the resulting plan
    Submit {
        text: String,

        /// Image to send along with the text
        #[arg(long)]
        image: Option<PathBuf>,
    },

    /// Extract and remember personal facts from text
    Facts { text: String },

    /// Detect recurring routines
    Analyze,

    /// Check a proposed schedule against current routines
    Conflict {
        #[arg(long)]
        title: String,

        /// Comma-separated weekdays, e.g. mon,wed,fri
        #[arg(long, value_delimiter = ',')]
        days: Vec<String>,

        #[arg(long)]
        start: i64,

        #[arg(long)]
        end: i64,

        /// Existing subject being rescheduled
        #[arg(long)]
        subject: Option<Uuid>,
    },

    /// Suggest three time slots for a new habit
    Suggest {
        #[arg(long)]
        title: String,

        /// Sessions per week
        #[arg(long, default_value_t = 3)]
        frequency: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let fixture = Fixture::load(&args.fixture)?;
    let owner_id = args.owner.unwrap_or(fixture.owner_id);
    let config = load_config(args.config.as_deref(), args.replay.is_some())?;

    let mut builder = RoutineAgent::builder(config)
        .store(Arc::new(fixture.store()))
        .clock(Arc::new(fixture.clock()?));
    if let Some(replay) = &args.replay {
        builder = builder.transport(Arc::new(ScriptedTransport::load(replay)?));
    }
    let agent = builder.build()?;

    // Ctrl-C cancels the in-flight request
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let result = match args.command {
        Command::Submit { text, image } => {
            let image = image.as_deref().map(read_image).transpose()?;
            to_json(agent.submit_utterance(owner_id, &text, image, &cancel).await)
        }
        Command::Facts { text } => to_json(agent.extract_facts(owner_id, &text, &cancel).await),
        Command::Analyze => to_json(agent.analyze_routines(owner_id, &cancel).await),
        Command::Conflict {
            title,
            days,
            start,
            end,
            subject,
        } => {
            let time_blocks = days
                .iter()
                .map(|day| TimeBlock::parse(day, start, end))
                .collect::<Result<Vec<_>, _>>()?;
            let proposed = ProposedSchedule {
                subject_id: subject,
                title,
                time_blocks,
            };
            to_json(agent.assess_conflict(owner_id, &proposed, &cancel).await)
        }
        Command::Suggest { title, frequency } => {
            to_json(agent.suggest_slots(owner_id, &title, frequency, &cancel).await)
        }
    };

    match result {
        Ok(json) => {
            println!("{}", json);
            Ok(())
        }
        Err(CliError::Agent(e)) => {
            tracing::error!(error = %e, "Request failed");
            eprintln!("{}", e.user_message());
            std::process::exit(1);
        }
        Err(CliError::Output(e)) => Err(e),
    }
}

enum CliError {
    Agent(AgentError),
    Output(anyhow::Error),
}

fn to_json<T: Serialize>(result: Result<T, AgentError>) -> Result<String, CliError> {
    let value = result.map_err(CliError::Agent)?;
    serde_json::to_string_pretty(&value)
        .context("Failed to serialize result")
        .map_err(CliError::Output)
}

fn load_config(path: Option<&Path>, replay: bool) -> Result<AgentConfig> {
    let config = match path {
        Some(path) => {
            let yaml = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            let mut config = AgentConfig::from_yaml_str(&yaml)?;
            if config.provider.api_key.is_empty() {
                config.provider.api_key = std::env::var("GEMINI_API_KEY").unwrap_or_default();
            }
            config
        }
        // A replay never reaches the provider, so no key is needed
        None if replay => AgentConfig::default(),
        None => AgentConfig::from_env()?,
    };
    Ok(config)
}

fn read_image(path: &Path) -> Result<InlineImage> {
    let mime_type = match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => return Err(anyhow!("Unsupported image type: {}", path.display())),
    };
    let data = std::fs::read(path)
        .with_context(|| format!("Failed to read image {}", path.display()))?;
    Ok(InlineImage {
        mime_type: mime_type.to_string(),
        data,
    })
}
