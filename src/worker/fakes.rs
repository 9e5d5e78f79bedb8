//! Deterministic stand-ins for the external services, for worker tests

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use super::{Pipeline, PipelineOptions, Services};
use crate::catalog::CatalogApi;
use crate::database::{CatalogEntry, Database};
use crate::error::{PipelineError, Result};
use crate::ollama::{Classifier, Embedder};
use crate::storage::BlobStore;
use crate::transcriber::Transcriber;

pub const SAFE_VERDICT: &str =
    r#"{"safe": true, "loud": 3, "age": "all", "junk": 2, "reason": "calm sing-along"}"#;

#[derive(Default)]
pub struct FakeCatalog {
    channels: Mutex<HashMap<String, Vec<CatalogEntry>>>,
    down: Mutex<bool>,
}

impl FakeCatalog {
    pub fn set(&self, channel_id: &str, video_ids: &[&str]) {
        let entries = video_ids
            .iter()
            .enumerate()
            .map(|(i, id)| CatalogEntry {
                video_id: id.to_string(),
                channel_id: channel_id.to_string(),
                title: format!("Video {}", id),
                thumbnail_url: Some(format!("https://i.ytimg.com/vi/{}/hqdefault.jpg", id)),
                // Catalog order is newest first
                published_at: Some(format!("2024-06-{:02}T00:00:00Z", 28 - i)),
            })
            .collect();
        self.channels
            .lock()
            .unwrap()
            .insert(channel_id.to_string(), entries);
    }

    pub fn set_entries(&self, channel_id: &str, entries: Vec<CatalogEntry>) {
        self.channels
            .lock()
            .unwrap()
            .insert(channel_id.to_string(), entries);
    }

    pub fn set_down(&self, down: bool) {
        *self.down.lock().unwrap() = down;
    }
}

#[async_trait]
impl CatalogApi for FakeCatalog {
    async fn latest_uploads(&self, channel_id: &str, limit: usize) -> Result<Vec<CatalogEntry>> {
        if *self.down.lock().unwrap() {
            return Err(PipelineError::Upstream("catalog unavailable".into()));
        }
        Ok(self
            .channels
            .lock()
            .unwrap()
            .get(channel_id)
            .map(|entries| entries.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

#[derive(Default)]
pub struct FakeTranscriber {
    failing: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
}

impl FakeTranscriber {
    pub fn fail_for(&self, video_id: &str) {
        self.failing.lock().unwrap().insert(video_id.to_string());
    }

    pub fn recover(&self, video_id: &str) {
        self.failing.lock().unwrap().remove(video_id);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn transcribe(&self, video_id: &str) -> Result<String> {
        self.calls.lock().unwrap().push(video_id.to_string());
        if self.failing.lock().unwrap().contains(video_id) {
            return Err(PipelineError::Upstream(format!(
                "yt-dlp failed for {}",
                video_id
            )));
        }
        Ok(format!("transcript for {}: let's count to ten together", video_id))
    }
}

type Hook = Box<dyn FnOnce() + Send>;

pub struct FakeClassifier {
    response: Mutex<Result<String, String>>,
    prompts: Mutex<Vec<String>>,
    during_call: Mutex<Option<Hook>>,
}

impl Default for FakeClassifier {
    fn default() -> Self {
        Self {
            response: Mutex::new(Ok(SAFE_VERDICT.to_string())),
            prompts: Mutex::new(Vec::new()),
            during_call: Mutex::new(None),
        }
    }
}

impl FakeClassifier {
    pub fn respond_with(&self, response: &str) {
        *self.response.lock().unwrap() = Ok(response.to_string());
    }

    pub fn fail_with(&self, message: &str) {
        *self.response.lock().unwrap() = Err(message.to_string());
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    /// Run `hook` once, while the next classification is in flight.
    pub fn during_next_call(&self, hook: impl FnOnce() + Send + 'static) {
        *self.during_call.lock().unwrap() = Some(Box::new(hook));
    }
}

#[async_trait]
impl Classifier for FakeClassifier {
    async fn classify(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let hook = self.during_call.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }
        self.response
            .lock()
            .unwrap()
            .clone()
            .map_err(PipelineError::Upstream)
    }
}

pub struct FakeEmbedder {
    dimensions: Mutex<usize>,
}

impl FakeEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: Mutex::new(dimensions),
        }
    }

    pub fn set_dimensions(&self, dimensions: usize) {
        *self.dimensions.lock().unwrap() = dimensions;
    }
}

#[async_trait]
impl Embedder for FakeEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let n = *self.dimensions.lock().unwrap();
        let seed = text.len() as f32;
        Ok((0..n).map(|i| ((seed + i as f32) % 7.0) / 7.0).collect())
    }
}

#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, String>>,
    broken: Mutex<bool>,
}

impl MemoryBlobStore {
    pub fn set_broken(&self, broken: bool) {
        *self.broken.lock().unwrap() = broken;
    }

    pub fn insert(&self, key: &str, text: &str) {
        self.blobs
            .lock()
            .unwrap()
            .insert(key.to_string(), text.to_string());
    }

    pub fn remove(&self, key: &str) {
        self.blobs.lock().unwrap().remove(key);
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, text: &str) -> Result<String> {
        if *self.broken.lock().unwrap() {
            return Err(PipelineError::Storage("blob store offline".into()));
        }
        self.insert(key, text);
        Ok(format!("transcripts/{}.txt", key))
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        if *self.broken.lock().unwrap() {
            return Err(PipelineError::Storage("blob store offline".into()));
        }
        Ok(self.blobs.lock().unwrap().get(key).cloned())
    }
}

pub struct Harness {
    pub db: Arc<Database>,
    pub catalog: Arc<FakeCatalog>,
    pub transcriber: Arc<FakeTranscriber>,
    pub classifier: Arc<FakeClassifier>,
    pub embedder: Arc<FakeEmbedder>,
    pub blobs: Arc<MemoryBlobStore>,
    pub pipeline: Pipeline,
    _temp: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_options(PipelineOptions {
            embedding_dimensions: 8,
            ..PipelineOptions::default()
        })
    }

    pub fn with_options(options: PipelineOptions) -> Self {
        let temp = TempDir::new().unwrap();
        let db = Arc::new(Database::new(&temp.path().join("pipeline.db")).unwrap());
        let catalog = Arc::new(FakeCatalog::default());
        let transcriber = Arc::new(FakeTranscriber::default());
        let classifier = Arc::new(FakeClassifier::default());
        let embedder = Arc::new(FakeEmbedder::new(options.embedding_dimensions));
        let blobs = Arc::new(MemoryBlobStore::default());

        let services = Services {
            blobs: blobs.clone(),
            catalog: catalog.clone(),
            transcriber: transcriber.clone(),
            classifier: classifier.clone(),
            embedder: embedder.clone(),
        };
        let pipeline = Pipeline::new(db.clone(), services, options);

        Self {
            db,
            catalog,
            transcriber,
            classifier,
            embedder,
            blobs,
            pipeline,
            _temp: temp,
        }
    }
}
