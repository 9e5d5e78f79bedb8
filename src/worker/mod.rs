pub mod classify;
pub mod ingest;
pub mod janitor;
pub mod transcribe;

#[cfg(test)]
pub(crate) mod fakes;

use futures_util::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::catalog::CatalogApi;
use crate::config::Settings;
use crate::database::{Database, FailureKind, StaleAction, Task, TaskStatus};
use crate::error::{PipelineError, Result};
use crate::ollama::{Classifier, Embedder};
use crate::storage::BlobStore;
use crate::transcriber::Transcriber;

pub use ingest::IngestReport;

/// Tunables for the worker passes.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub uploads_limit: usize,
    pub transcript_char_cap: usize,
    pub embedding_dimensions: usize,
    pub stale_after: Duration,
    pub stale_action: StaleAction,
    pub poll_interval: Duration,
    pub concurrency: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

impl PipelineOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            uploads_limit: settings.catalog.uploads_limit,
            transcript_char_cap: settings.classification.transcript_char_cap,
            embedding_dimensions: settings.classification.embedding_dimensions,
            stale_after: settings.stale_after(),
            stale_action: settings.janitor.action,
            poll_interval: settings.poll_interval(),
            concurrency: settings.scheduler.concurrency.max(1),
        }
    }
}

/// External capabilities the workers call out to.
#[derive(Clone)]
pub struct Services {
    pub blobs: Arc<dyn BlobStore>,
    pub catalog: Arc<dyn CatalogApi>,
    pub transcriber: Arc<dyn Transcriber>,
    pub classifier: Arc<dyn Classifier>,
    pub embedder: Arc<dyn Embedder>,
}

/// Result of one worker pass over at most one task.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PassOutcome {
    /// Nothing was claimable.
    Idle,
    Advanced {
        task_id: String,
        video_id: String,
        status: TaskStatus,
    },
    Failed {
        task_id: String,
        video_id: String,
        kind: FailureKind,
        reason: String,
    },
}

/// Everything one scheduler tick did.
#[derive(Debug, Default, Serialize)]
pub struct TickReport {
    pub swept: usize,
    pub transcribed: usize,
    pub classified: usize,
    pub failed: usize,
    pub aborted: usize,
}

impl TickReport {
    fn record(&mut self, outcome: &Result<PassOutcome>) {
        match outcome {
            Ok(PassOutcome::Idle) => {}
            Ok(PassOutcome::Advanced { status, .. }) => match status {
                TaskStatus::Done => self.classified += 1,
                _ => self.transcribed += 1,
            },
            Ok(PassOutcome::Failed { .. }) => self.failed += 1,
            Err(_) => self.aborted += 1,
        }
    }
}

pub struct Pipeline {
    db: Arc<Database>,
    services: Services,
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(db: Arc<Database>, services: Services, options: PipelineOptions) -> Self {
        Self {
            db,
            services,
            options,
        }
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Record a stage error on the claimed task. Errors that cannot be
    /// persisted (storage, lost claim) abort the pass and leave the task to
    /// the next invocation or the janitor.
    fn settle_failure(&self, task: &Task, err: PipelineError) -> Result<PassOutcome> {
        let Some(kind) = err.failure_kind() else {
            log::error!(
                "Aborting pass for task {} (video {}): {}",
                task.id,
                task.video_id,
                err
            );
            return Err(err);
        };

        let reason = err.to_string();
        self.db.fail_task(task, kind, &reason)?;
        Ok(PassOutcome::Failed {
            task_id: task.id.clone(),
            video_id: task.video_id.clone(),
            kind,
            reason,
        })
    }

    /// One scheduler tick: janitor sweep, then up to `concurrency`
    /// transcription and classification passes each.
    pub async fn tick(&self) -> TickReport {
        let mut report = TickReport::default();

        match self.sweep_stale() {
            Ok(swept) => report.swept = swept.len(),
            Err(e) => log::error!("Janitor sweep failed: {}", e),
        }

        let n = self.options.concurrency;
        for outcome in join_all((0..n).map(|_| self.transcribe_next())).await {
            report.record(&outcome);
        }
        for outcome in join_all((0..n).map(|_| self.classify_next())).await {
            report.record(&outcome);
        }
        report
    }

    /// Long-lived poll loop. Returns once `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        log::info!(
            "Pipeline scheduler started (poll every {}s, concurrency {})",
            self.options.poll_interval.as_secs(),
            self.options.concurrency
        );

        // Recover anything a previous run left claimed
        match self.sweep_stale() {
            Ok(swept) if !swept.is_empty() => {
                log::info!("Startup sweep recovered {} stuck tasks", swept.len())
            }
            Ok(_) => {}
            Err(e) => log::warn!("Startup sweep failed: {}", e),
        }

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let report = self.tick().await;
            if report.transcribed + report.classified + report.failed + report.swept > 0 {
                log::info!(
                    "Tick: {} transcribed, {} classified, {} failed, {} swept",
                    report.transcribed,
                    report.classified,
                    report.failed,
                    report.swept
                );
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.options.poll_interval) => {}
            }
        }

        log::info!("Pipeline scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::fakes::*;
    use super::*;

    #[tokio::test]
    async fn test_tick_runs_both_stages() {
        let harness = Harness::new();
        harness.catalog.set("C1", &["v1", "v2"]);
        harness.pipeline.ingest_channel("C1").await.unwrap();

        let report = harness.pipeline.tick().await;
        // v1 is transcribed then classified in the same tick
        assert_eq!(report.transcribed, 1);
        assert_eq!(report.classified, 1);
        assert_eq!(report.failed, 0);

        let stats = harness.db.queue_stats().unwrap();
        assert_eq!(stats.done, 1);
        assert_eq!(stats.pending, 1);
    }

    #[tokio::test]
    async fn test_tick_with_concurrency_drains_more() {
        let harness = Harness::with_options(PipelineOptions {
            concurrency: 3,
            ..PipelineOptions::default()
        });
        harness.catalog.set("C1", &["a", "b", "c"]);
        harness.pipeline.ingest_channel("C1").await.unwrap();

        let report = harness.pipeline.tick().await;
        assert_eq!(report.transcribed, 3);
        assert_eq!(report.classified, 3);
        assert_eq!(harness.db.queue_stats().unwrap().done, 3);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let harness = Harness::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), harness.pipeline.run(cancel))
            .await
            .unwrap();
    }
}
