use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::{require, AppContext};
use crate::database::{QueueStats, SweptTask};
use crate::error::{PipelineError, Result};
use crate::ollama::OllamaStatus;
use crate::worker::{IngestReport, PassOutcome};

#[derive(Debug, Serialize)]
pub struct SweepResponse {
    pub swept: Vec<SweptTask>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub ollama: Option<OllamaStatus>,
    pub ollama_error: Option<PipelineError>,
    pub queue: QueueStats,
    pub transcripts_dir: String,
    pub whisper_model_present: bool,
}

pub async fn ingest_channel(ctx: &AppContext, channel_id: &str) -> Result<IngestReport> {
    require("channel_id", channel_id)?;
    ctx.pipeline.ingest_channel(channel_id).await
}

/// One transcription pass (at most one task).
pub async fn run_transcription(ctx: &AppContext) -> Result<PassOutcome> {
    ctx.pipeline.transcribe_next().await
}

/// One classification pass (at most one task).
pub async fn run_classification(ctx: &AppContext) -> Result<PassOutcome> {
    ctx.pipeline.classify_next().await
}

pub fn sweep_stale(ctx: &AppContext) -> Result<SweepResponse> {
    Ok(SweepResponse {
        swept: ctx.pipeline.sweep_stale()?,
    })
}

pub async fn health(ctx: &AppContext) -> Result<HealthResponse> {
    let (ollama, ollama_error) = match ctx.ollama.health_check().await {
        Ok(status) => (Some(status), None),
        Err(e) => {
            log::warn!("Ollama health check failed: {}", e);
            (None, Some(e))
        }
    };

    Ok(HealthResponse {
        ollama,
        ollama_error,
        queue: ctx.db.queue_stats()?,
        transcripts_dir: ctx.settings.transcripts_dir.to_string_lossy().to_string(),
        whisper_model_present: ctx.settings.transcriber.model_path.exists(),
    })
}

/// Run the scheduler until Ctrl-C.
pub async fn run_scheduler(ctx: &AppContext) -> Result<()> {
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Ctrl-C received, stopping after the current tick");
            on_signal.cancel();
        }
    });

    ctx.pipeline.run(cancel).await;
    Ok(())
}
