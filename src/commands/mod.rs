//! Operator command handlers
//!
//! Each handler takes the shared [`AppContext`] and returns a serializable
//! response; the binary prints it as JSON.

pub mod gate;
pub mod queue;
pub mod worker;

pub use gate::*;
pub use queue::*;
pub use worker::*;

use std::sync::Arc;
use std::time::Duration;

use crate::catalog::{CatalogApi, YouTubeDataApi, YouTubeRssFeed};
use crate::config::{CatalogBackend, Settings};
use crate::database::Database;
use crate::error::{PipelineError, Result};
use crate::gate::SafetyGate;
use crate::ollama::OllamaClient;
use crate::storage::FsBlobStore;
use crate::transcriber::WhisperCli;
use crate::worker::{Pipeline, PipelineOptions, Services};

pub struct AppContext {
    pub settings: Settings,
    pub db: Arc<Database>,
    pub pipeline: Pipeline,
    pub gate: SafetyGate,
    pub ollama: Arc<OllamaClient>,
}

impl AppContext {
    /// Open the database and wire the real service adapters.
    pub fn from_settings(settings: Settings) -> Result<Self> {
        if let Some(parent) = settings.database_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Arc::new(Database::new(&settings.database_path)?);
        log::info!("Database ready at {}", settings.database_path.display());

        let ollama = Arc::new(
            OllamaClient::new(
                &settings.ollama.base_url,
                Duration::from_secs(settings.ollama.timeout_secs),
            )
            .with_model(&settings.ollama.model)
            .with_embedding_model(&settings.ollama.embedding_model),
        );

        let services = Services {
            blobs: Arc::new(FsBlobStore::new(&settings.transcripts_dir)),
            catalog: build_catalog(&settings),
            transcriber: Arc::new(WhisperCli {
                yt_dlp_path: settings.transcriber.yt_dlp_path.clone(),
                whisper_cli_path: settings.transcriber.whisper_cli_path.clone(),
                model_path: settings.transcriber.model_path.clone(),
                work_dir: settings.work_dir.clone(),
                timeout: Duration::from_secs(settings.transcriber.timeout_secs),
            }),
            classifier: ollama.clone(),
            embedder: ollama.clone(),
        };

        let pipeline = Pipeline::new(
            db.clone(),
            services,
            PipelineOptions::from_settings(&settings),
        );

        Ok(Self {
            gate: SafetyGate::new(db.clone()),
            settings,
            db,
            pipeline,
            ollama,
        })
    }
}

fn build_catalog(settings: &Settings) -> Arc<dyn CatalogApi> {
    match (settings.catalog.backend, settings.catalog.api_key.as_deref()) {
        (CatalogBackend::YoutubeApi, Some(key)) => Arc::new(YouTubeDataApi::new(key)),
        (CatalogBackend::YoutubeApi, None) => {
            log::warn!("YT_API_KEY not set; using the channel RSS feed for ingestion");
            Arc::new(YouTubeRssFeed::new())
        }
        (CatalogBackend::Rss, _) => Arc::new(YouTubeRssFeed::new()),
    }
}

/// Reject empty identifiers from the command line.
fn require(name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(PipelineError::InvalidInput(format!("{} must not be empty", name)));
    }
    Ok(())
}
