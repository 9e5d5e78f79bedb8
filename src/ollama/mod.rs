//! Ollama integration for transcript classification and embeddings
//!
//! Calls the Ollama REST API: `/api/generate` for the verdict prompt,
//! `/api/embeddings` for the transcript vector, `/api/tags` for health.

pub mod verdict;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{PipelineError, Result};

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "llama3.2:3b";
pub const DEFAULT_EMBEDDING_MODEL: &str = "nomic-embed-text";

/// Classification service: prompt in, raw model text out. Parsing is the
/// caller's job so every backend is held to the same contract.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, prompt: &str) -> Result<String>;
}

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Ollama client for making API calls
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    embedding_model: String,
}

impl OllamaClient {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: DEFAULT_MODEL.to_string(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn with_embedding_model(mut self, model: &str) -> Self {
        self.embedding_model = model.to_string();
        self
    }

    /// Check if Ollama is running and both models are pulled
    pub async fn health_check(&self) -> Result<OllamaStatus> {
        let tags_url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&tags_url)
            .send()
            .await
            .map_err(|e| PipelineError::Upstream(format!("Ollama not running: {}", e)))?;

        if !response.status().is_success() {
            return Err(PipelineError::Upstream(format!(
                "Ollama server returned {}",
                response.status()
            )));
        }

        let tags: TagsResponse = response.json().await?;
        let available_models: Vec<String> = tags.models.into_iter().map(|m| m.name).collect();

        Ok(OllamaStatus {
            running: true,
            model_available: has_model(&available_models, &self.model),
            embedding_model_available: has_model(&available_models, &self.embedding_model),
            model: self.model.clone(),
            embedding_model: self.embedding_model.clone(),
            available_models,
        })
    }

    /// Generate a completion from Ollama
    pub async fn generate(&self, prompt: &str, system: Option<&str>) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);

        let request = GenerateRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
            system: system.map(|s| s.to_string()),
            stream: false,
            format: Some("json".to_string()),
            options: Some(GenerateOptions {
                temperature: 0.0,
                num_predict: 512,
            }),
        };

        log::info!(
            "Sending request to Ollama: model={}, prompt_len={}",
            self.model,
            prompt.len()
        );

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| PipelineError::Upstream(format!("Failed to call Ollama: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::Upstream(format!(
                "Ollama returned {}: {}",
                status, body
            )));
        }

        let result: GenerateResponse = response.json().await.map_err(|e| {
            PipelineError::MalformedResponse(format!("Failed to parse Ollama response: {}", e))
        })?;

        log::info!(
            "Ollama response received: {} chars, eval_duration={:?}ms",
            result.response.len(),
            result.eval_duration.map(|d| d / 1_000_000)
        );

        Ok(result.response)
    }

    pub async fn embeddings(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.base_url);
        let request = EmbeddingsRequest {
            model: self.embedding_model.clone(),
            prompt: text.to_string(),
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| PipelineError::Upstream(format!("Failed to call Ollama embeddings: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::Upstream(format!(
                "Ollama embeddings returned {}: {}",
                status, body
            )));
        }

        let result: EmbeddingsResponse = response.json().await.map_err(|e| {
            PipelineError::MalformedResponse(format!("Failed to parse embeddings response: {}", e))
        })?;
        Ok(result.embedding)
    }
}

impl Default for OllamaClient {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL, Duration::from_secs(120))
    }
}

#[async_trait]
impl Classifier for OllamaClient {
    async fn classify(&self, prompt: &str) -> Result<String> {
        self.generate(prompt, Some(verdict::SYSTEM_PROMPT)).await
    }
}

#[async_trait]
impl Embedder for OllamaClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embeddings(text).await
    }
}

/// Tag names carry a `:tag` suffix; a bare model name matches any tag.
fn has_model(available: &[String], wanted: &str) -> bool {
    available.iter().any(|name| {
        if wanted.contains(':') {
            name == wanted
        } else {
            name.split(':').next() == Some(wanted)
        }
    })
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<GenerateOptions>,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: i32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
    #[serde(default)]
    eval_duration: Option<u64>,
}

#[derive(Debug, Serialize)]
struct EmbeddingsRequest {
    model: String,
    prompt: String,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    models: Vec<ModelInfo>,
}

#[derive(Debug, Deserialize)]
struct ModelInfo {
    name: String,
}

// ============================================================================
// Public Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaStatus {
    pub running: bool,
    pub model: String,
    pub model_available: bool,
    pub embedding_model: String,
    pub embedding_model_available: bool,
    pub available_models: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_model() {
        let available = vec![
            "llama3.2:3b".to_string(),
            "nomic-embed-text:latest".to_string(),
        ];
        assert!(has_model(&available, "llama3.2:3b"));
        assert!(has_model(&available, "nomic-embed-text"));
        assert!(!has_model(&available, "llama3.2:1b"));
        assert!(!has_model(&available, "mistral"));
    }

    #[test]
    fn test_generate_request_shape() {
        let request = GenerateRequest {
            model: "llama3.2:3b".to_string(),
            prompt: "p".to_string(),
            system: None,
            stream: false,
            format: Some("json".to_string()),
            options: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["format"], "json");
        assert_eq!(json["stream"], false);
        assert!(json.get("system").is_none());
        assert!(json.get("options").is_none());
    }

    #[tokio::test]
    async fn test_unreachable_server_is_upstream_error() {
        // Port 9 (discard) is not an Ollama server
        let client = OllamaClient::new("http://127.0.0.1:9", Duration::from_secs(2));
        let err = client.embed("hello").await.unwrap_err();
        assert!(matches!(err, PipelineError::Upstream(_)));
    }
}
