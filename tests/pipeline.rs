//! End-to-end runs through the public API with stubbed external services
//! and the real filesystem transcript store.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use kidsafe_pipeline_lib::catalog::CatalogApi;
use kidsafe_pipeline_lib::database::{CatalogEntry, FailureKind, TaskStatus};
use kidsafe_pipeline_lib::ollama::{Classifier, Embedder};
use kidsafe_pipeline_lib::storage::FsBlobStore;
use kidsafe_pipeline_lib::transcriber::Transcriber;
use kidsafe_pipeline_lib::{
    Database, GatePolicy, PassOutcome, Pipeline, PipelineError, PipelineOptions, Result,
    SafetyGate, Services,
};

struct StaticCatalog {
    channels: HashMap<String, Vec<&'static str>>,
}

#[async_trait]
impl CatalogApi for StaticCatalog {
    async fn latest_uploads(&self, channel_id: &str, limit: usize) -> Result<Vec<CatalogEntry>> {
        let ids = self
            .channels
            .get(channel_id)
            .ok_or_else(|| PipelineError::Upstream(format!("unknown channel {}", channel_id)))?;
        Ok(ids
            .iter()
            .take(limit)
            .enumerate()
            .map(|(i, id)| CatalogEntry {
                video_id: id.to_string(),
                channel_id: channel_id.to_string(),
                title: format!("Episode {}", i + 1),
                thumbnail_url: None,
                published_at: Some(format!("2026-01-0{}T00:00:00Z", i + 1)),
            })
            .collect())
    }
}

struct EchoTranscriber;

#[async_trait]
impl Transcriber for EchoTranscriber {
    async fn transcribe(&self, video_id: &str) -> Result<String> {
        Ok(format!("hello from {}", video_id))
    }
}

struct ScriptedClassifier {
    response: Mutex<String>,
}

#[async_trait]
impl Classifier for ScriptedClassifier {
    async fn classify(&self, _prompt: &str) -> Result<String> {
        Ok(self.response.lock().unwrap().clone())
    }
}

struct FixedEmbedder;

#[async_trait]
impl Embedder for FixedEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(vec![0.25; 4])
    }
}

struct World {
    db: Arc<Database>,
    pipeline: Pipeline,
    classifier: Arc<ScriptedClassifier>,
    temp: TempDir,
}

fn world() -> World {
    let temp = TempDir::new().unwrap();
    let db = Arc::new(Database::new(&temp.path().join("pipeline.db")).unwrap());
    let classifier = Arc::new(ScriptedClassifier {
        response: Mutex::new(
            r#"{"safe": true, "loud": 2, "age": "all", "junk": 1, "reason": "gentle"}"#.into(),
        ),
    });

    let mut channels = HashMap::new();
    channels.insert("C1".to_string(), vec!["v1", "v2"]);

    let services = Services {
        blobs: Arc::new(FsBlobStore::new(temp.path().join("transcripts"))),
        catalog: Arc::new(StaticCatalog { channels }),
        transcriber: Arc::new(EchoTranscriber),
        classifier: classifier.clone(),
        embedder: Arc::new(FixedEmbedder),
    };
    let options = PipelineOptions {
        embedding_dimensions: 4,
        ..PipelineOptions::default()
    };

    World {
        pipeline: Pipeline::new(db.clone(), services, options),
        db,
        classifier,
        temp,
    }
}

#[tokio::test]
async fn channel_to_child_feed() {
    let w = world();
    let report = w.pipeline.ingest_channel("C1").await.unwrap();
    assert_eq!(report.new_tasks, 2);

    // Oldest task first: only v1 moves.
    let outcome = w.pipeline.transcribe_next().await.unwrap();
    assert!(matches!(
        &outcome,
        PassOutcome::Advanced { video_id, status: TaskStatus::Transcribed, .. } if video_id == "v1"
    ));
    let v2 = w.db.get_task_by_video("v2").unwrap().unwrap();
    assert_eq!(v2.status, TaskStatus::Pending);

    let outcome = w.pipeline.classify_next().await.unwrap();
    assert!(matches!(
        outcome,
        PassOutcome::Advanced { status: TaskStatus::Done, .. }
    ));

    let v1 = w.db.get_video("v1").unwrap().unwrap();
    assert_eq!(v1.safe(), Some(true));
    let transcript_path = v1.transcript_path.clone().unwrap();
    let on_disk = std::fs::read_to_string(&transcript_path).unwrap();
    assert_eq!(on_disk, "hello from v1");
    assert!(transcript_path.starts_with(w.temp.path().to_str().unwrap()));

    let gate = SafetyGate::new(w.db.clone());
    assert!(!gate.check("v1", "kid").unwrap());
    w.db.approve_channel("kid", "C1").unwrap();
    assert!(gate.check("v1", "kid").unwrap());
    assert!(!gate.check("v2", "kid").unwrap());

    let visible = gate.visible_videos("kid", GatePolicy::default()).unwrap();
    let ids: Vec<&str> = visible.iter().map(|v| v.video_id.as_str()).collect();
    assert_eq!(ids, vec!["v1"]);
}

#[tokio::test]
async fn unparseable_verdict_fails_without_partial_write() {
    let w = world();
    *w.classifier.response.lock().unwrap() = "I think it's fine!".to_string();
    w.pipeline.ingest_channel("C1").await.unwrap();
    w.pipeline.transcribe_next().await.unwrap();

    let outcome = w.pipeline.classify_next().await.unwrap();
    match outcome {
        PassOutcome::Failed { video_id, kind, .. } => {
            assert_eq!(video_id, "v1");
            assert_eq!(kind, FailureKind::Malformed);
        }
        other => panic!("expected failure, got {:?}", other),
    }

    let video = w.db.get_video("v1").unwrap().unwrap();
    assert!(video.verdict.is_none());
    assert!(video.transcript_path.is_some());

    w.db.approve_channel("kid", "C1").unwrap();
    let gate = SafetyGate::new(w.db.clone());
    assert!(!gate.check("v1", "kid").unwrap());
}

#[tokio::test]
async fn repeated_ingest_keeps_one_task_per_video() {
    let w = world();
    w.pipeline.ingest_channel("C1").await.unwrap();
    let again = w.pipeline.ingest_channel("C1").await.unwrap();
    assert_eq!(again.new_tasks, 0);
    assert_eq!(again.new_videos, 0);

    let stats = w.db.queue_stats().unwrap();
    assert_eq!(stats.pending, 2);
    assert_eq!(w.db.list_tasks(None, 10).unwrap().len(), 2);
}

#[tokio::test]
async fn unknown_channel_is_an_upstream_error() {
    let w = world();
    let err = w.pipeline.ingest_channel("nope").await.unwrap_err();
    assert!(matches!(err, PipelineError::Upstream(_)));
    assert!(w.db.list_tasks(None, 10).unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_passes_never_share_a_task() {
    let w = world();
    w.pipeline.ingest_channel("C1").await.unwrap();
    let pipeline = Arc::new(w.pipeline);

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let pipeline = pipeline.clone();
            tokio::spawn(async move { pipeline.transcribe_next().await })
        })
        .collect();

    let mut advanced = Vec::new();
    for handle in handles {
        if let PassOutcome::Advanced { video_id, .. } = handle.await.unwrap().unwrap() {
            advanced.push(video_id);
        }
    }
    advanced.sort();
    assert_eq!(advanced, vec!["v1", "v2"]);
    assert_eq!(w.db.queue_stats().unwrap().transcribed, 2);
}
