use anyhow::Result;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;

use kidsafe_pipeline_lib::commands::{self, AppContext};
use kidsafe_pipeline_lib::Settings;

#[derive(Parser)]
#[command(name = "kidsafe")]
#[command(about = "Video safety classification pipeline")]
#[command(version)]
struct Cli {
    /// Settings file (YAML)
    #[arg(short, long, env = "KIDSAFE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch a channel's latest uploads and queue them
    Ingest { channel_id: String },
    /// Queue one video by id
    Enqueue { video_id: String },
    /// Run one transcription pass
    Transcribe,
    /// Run one classification pass
    Classify,
    /// Recover tasks stuck in an in-flight status
    Sweep,
    /// Reset a failed task to pending
    Retry { video_id: String },
    /// Queue counts and tasks
    Status {
        /// Only tasks in this status
        #[arg(short, long)]
        status: Option<String>,
        #[arg(short = 'n', long, default_value = "50")]
        limit: i64,
    },
    /// Status transitions recorded for a video's task
    History { video_id: String },
    /// Approve a channel for a child profile
    Approve { child_id: String, channel_id: String },
    /// Remove a channel approval
    Revoke { child_id: String, channel_id: String },
    /// Videos a child may watch, newest first
    Visible {
        child_id: String,
        /// Hide videos rated above this age (all, 7+, 13+)
        #[arg(long)]
        max_age: Option<String>,
    },
    /// Whether one video may be shown to a child
    Check { video_id: String, child_id: String },
    /// Ollama and storage readiness
    Health,
    /// Poll and process the queue until Ctrl-C
    Run,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;
    let ctx = AppContext::from_settings(settings)?;

    match cli.command {
        Commands::Ingest { channel_id } => {
            print_json(&commands::ingest_channel(&ctx, &channel_id).await?)
        }
        Commands::Enqueue { video_id } => print_json(&commands::enqueue_video(&ctx, &video_id)?),
        Commands::Transcribe => print_json(&commands::run_transcription(&ctx).await?),
        Commands::Classify => print_json(&commands::run_classification(&ctx).await?),
        Commands::Sweep => print_json(&commands::sweep_stale(&ctx)?),
        Commands::Retry { video_id } => print_json(&commands::retry_failed(&ctx, &video_id)?),
        Commands::Status { status, limit } => {
            print_json(&commands::queue_status(&ctx, status.as_deref(), limit)?)
        }
        Commands::History { video_id } => print_json(&commands::task_history(&ctx, &video_id)?),
        Commands::Approve {
            child_id,
            channel_id,
        } => print_json(&commands::approve_channel(&ctx, &child_id, &channel_id)?),
        Commands::Revoke {
            child_id,
            channel_id,
        } => print_json(&commands::revoke_channel(&ctx, &child_id, &channel_id)?),
        Commands::Visible { child_id, max_age } => print_json(&commands::visible_videos(
            &ctx,
            &child_id,
            max_age.as_deref(),
        )?),
        Commands::Check { video_id, child_id } => {
            print_json(&commands::check_visibility(&ctx, &video_id, &child_id)?)
        }
        Commands::Health => print_json(&commands::health(&ctx).await?),
        Commands::Run => commands::run_scheduler(&ctx).await.map_err(anyhow::Error::from),
    }
}
