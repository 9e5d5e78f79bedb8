//! Settings: YAML file with per-field defaults, secrets from the environment

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::database::StaleAction;
use crate::error::{PipelineError, Result};
use crate::ollama;

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("kidsafe")
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("kidsafe")
        .join("config.yaml")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database_path: PathBuf,
    pub transcripts_dir: PathBuf,
    pub work_dir: PathBuf,
    pub catalog: CatalogSettings,
    pub transcriber: TranscriberSettings,
    pub ollama: OllamaSettings,
    pub classification: ClassificationSettings,
    pub janitor: JanitorSettings,
    pub scheduler: SchedulerSettings,
}

impl Default for Settings {
    fn default() -> Self {
        let data = data_dir();
        Self {
            database_path: data.join("kidsafe.db"),
            transcripts_dir: data.join("transcripts"),
            work_dir: std::env::temp_dir().join("kidsafe-work"),
            catalog: CatalogSettings::default(),
            transcriber: TranscriberSettings::default(),
            ollama: OllamaSettings::default(),
            classification: ClassificationSettings::default(),
            janitor: JanitorSettings::default(),
            scheduler: SchedulerSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogBackend {
    YoutubeApi,
    Rss,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogSettings {
    pub backend: CatalogBackend,
    pub uploads_limit: usize,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            backend: CatalogBackend::YoutubeApi,
            uploads_limit: 10,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriberSettings {
    pub yt_dlp_path: PathBuf,
    pub whisper_cli_path: PathBuf,
    pub model_path: PathBuf,
    pub timeout_secs: u64,
}

impl Default for TranscriberSettings {
    fn default() -> Self {
        Self {
            yt_dlp_path: PathBuf::from("yt-dlp"),
            whisper_cli_path: PathBuf::from("whisper-cli"),
            model_path: data_dir().join("models").join("ggml-base.en.bin"),
            timeout_secs: 1800,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaSettings {
    pub base_url: String,
    pub model: String,
    pub embedding_model: String,
    pub timeout_secs: u64,
}

impl Default for OllamaSettings {
    fn default() -> Self {
        Self {
            base_url: ollama::DEFAULT_BASE_URL.to_string(),
            model: ollama::DEFAULT_MODEL.to_string(),
            embedding_model: ollama::DEFAULT_EMBEDDING_MODEL.to_string(),
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationSettings {
    /// Transcript characters sent to the classifier; the tail is dropped.
    pub transcript_char_cap: usize,
    pub embedding_dimensions: usize,
}

impl Default for ClassificationSettings {
    fn default() -> Self {
        Self {
            transcript_char_cap: 12_000,
            embedding_dimensions: 768,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JanitorSettings {
    pub stale_after_secs: u64,
    pub action: StaleAction,
}

impl Default for JanitorSettings {
    fn default() -> Self {
        Self {
            stale_after_secs: 3600,
            action: StaleAction::Fail,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub poll_interval_secs: u64,
    pub concurrency: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            concurrency: 1,
        }
    }
}

impl Settings {
    /// Load from `path`, or from the default location when `None`. A missing
    /// default file yields defaults; a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (default_config_path(), false),
        };

        let mut settings = if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| {
                PipelineError::Config(format!("Failed to read {}: {}", path.display(), e))
            })?;
            log::info!("Loaded settings from {}", path.display());
            Self::from_yaml(&content)?
        } else if explicit {
            return Err(PipelineError::Config(format!(
                "config file not found: {}",
                path.display()
            )));
        } else {
            Self::default()
        };

        let config_dir = path.parent().unwrap_or_else(|| Path::new("."));
        settings.apply_env(|key| env_value(config_dir, key));
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| PipelineError::Config(format!("invalid settings: {}", e)))
    }

    /// Secrets and endpoints that deployments set through the environment.
    pub fn apply_env<F: Fn(&str) -> Option<String>>(&mut self, lookup: F) {
        if let Some(key) = lookup("YT_API_KEY") {
            self.catalog.api_key = Some(key);
        }
        if let Some(host) = lookup("OLLAMA_HOST") {
            self.ollama.base_url = if host.starts_with("http://") || host.starts_with("https://") {
                host
            } else {
                format!("http://{}", host)
            };
        }
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("catalog.uploads_limit", self.catalog.uploads_limit as u64),
            ("transcriber.timeout_secs", self.transcriber.timeout_secs),
            ("ollama.timeout_secs", self.ollama.timeout_secs),
            (
                "classification.transcript_char_cap",
                self.classification.transcript_char_cap as u64,
            ),
            (
                "classification.embedding_dimensions",
                self.classification.embedding_dimensions as u64,
            ),
            ("janitor.stale_after_secs", self.janitor.stale_after_secs),
            ("scheduler.poll_interval_secs", self.scheduler.poll_interval_secs),
            ("scheduler.concurrency", self.scheduler.concurrency as u64),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(PipelineError::Config(format!("{} must be positive", name)));
            }
        }

        // A pass still inside its stage timeout must never look stuck.
        // Classification makes two Ollama calls (generate, then embed).
        let stages = [
            ("transcriber.timeout_secs", self.transcriber.timeout_secs),
            (
                "2 * ollama.timeout_secs",
                self.ollama.timeout_secs.saturating_mul(2),
            ),
        ];
        for (name, bound) in stages {
            if self.janitor.stale_after_secs <= bound {
                return Err(PipelineError::Config(format!(
                    "janitor.stale_after_secs ({}) must exceed {} ({})",
                    self.janitor.stale_after_secs, name, bound
                )));
            }
        }
        Ok(())
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.janitor.stale_after_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler.poll_interval_secs)
    }
}

/// Process environment first, then a `.env` file beside the config file.
fn env_value(config_dir: &Path, key: &str) -> Option<String> {
    if let Ok(value) = std::env::var(key) {
        if !value.trim().is_empty() {
            return Some(value.trim().to_string());
        }
    }

    let content = std::fs::read_to_string(config_dir.join(".env")).ok()?;
    dotenv_lookup(&content, key)
}

fn dotenv_lookup(content: &str, key: &str) -> Option<String> {
    let prefix = format!("{}=", key);
    content.lines().find_map(|line| {
        let value = line
            .trim()
            .strip_prefix(&prefix)?
            .trim()
            .trim_matches('"')
            .trim_matches('\'');
        (!value.is_empty()).then(|| value.to_string())
    })
}
