use serde::Serialize;

use super::Pipeline;
use crate::error::Result;
use crate::storage::validate_video_id;

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub channel_id: String,
    /// Items the catalog returned, in catalog order.
    pub fetched: Vec<String>,
    pub new_videos: usize,
    pub new_tasks: usize,
    /// Identifiers rejected before touching storage.
    pub skipped: Vec<String>,
}

impl Pipeline {
    /// Register the channel's most recent uploads and queue each one.
    ///
    /// Items are committed one by one: a storage error mid-batch leaves the
    /// prefix already ingested, and re-running is harmless.
    #[tracing::instrument(skip(self), fields(stage = "ingest"))]
    pub async fn ingest_channel(&self, channel_id: &str) -> Result<IngestReport> {
        log::info!("Ingesting channel {}", channel_id);

        let entries = self
            .services
            .catalog
            .latest_uploads(channel_id, self.options.uploads_limit)
            .await?;

        let mut report = IngestReport {
            channel_id: channel_id.to_string(),
            ..IngestReport::default()
        };

        for entry in entries {
            if let Err(e) = validate_video_id(&entry.video_id) {
                log::warn!("Skipping catalog item from {}: {}", channel_id, e);
                report.skipped.push(entry.video_id);
                continue;
            }

            if self.db.upsert_video_catalog(&entry)? {
                report.new_videos += 1;
            }
            let (_, created) = self.db.enqueue(&entry.video_id)?;
            if created {
                report.new_tasks += 1;
            }
            report.fetched.push(entry.video_id);
        }

        log::info!(
            "Ingested channel {}: {} items, {} new videos, {} new tasks",
            channel_id,
            report.fetched.len(),
            report.new_videos,
            report.new_tasks
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use crate::database::{AgeRating, CatalogEntry, TaskStatus, Verdict};
    use crate::error::PipelineError;
    use crate::worker::fakes::Harness;

    #[tokio::test]
    async fn test_ingest_creates_pending_tasks() {
        let harness = Harness::new();
        harness.catalog.set("C1", &["v1", "v2"]);

        let report = harness.pipeline.ingest_channel("C1").await.unwrap();
        assert_eq!(report.fetched, vec!["v1", "v2"]);
        assert_eq!(report.new_videos, 2);
        assert_eq!(report.new_tasks, 2);

        for id in ["v1", "v2"] {
            let task = harness.db.get_task_by_video(id).unwrap().unwrap();
            assert_eq!(task.status, TaskStatus::Pending);
            assert_eq!(harness.db.get_video(id).unwrap().unwrap().channel_id, "C1");
        }
    }

    #[tokio::test]
    async fn test_ingest_twice_is_idempotent() {
        let harness = Harness::new();
        harness.catalog.set("C1", &["v1", "v2"]);

        harness.pipeline.ingest_channel("C1").await.unwrap();
        let again = harness.pipeline.ingest_channel("C1").await.unwrap();

        assert_eq!(again.new_videos, 0);
        assert_eq!(again.new_tasks, 0);
        assert_eq!(harness.db.queue_stats().unwrap().total, 2);
    }

    #[tokio::test]
    async fn test_reingest_keeps_verdict_and_status() {
        let harness = Harness::new();
        harness.catalog.set("C1", &["v1"]);
        harness.pipeline.ingest_channel("C1").await.unwrap();
        harness.pipeline.transcribe_next().await.unwrap();
        harness.pipeline.classify_next().await.unwrap();

        harness.pipeline.ingest_channel("C1").await.unwrap();

        let task = harness.db.get_task_by_video("v1").unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Done);
        assert!(harness.db.get_video("v1").unwrap().unwrap().is_analyzed());
    }

    #[tokio::test]
    async fn test_catalog_failure_commits_nothing() {
        let harness = Harness::new();
        harness.catalog.set("C1", &["v1"]);
        harness.catalog.set_down(true);

        let err = harness.pipeline.ingest_channel("C1").await.unwrap_err();
        assert!(matches!(err, PipelineError::Upstream(_)));
        assert_eq!(harness.db.queue_stats().unwrap().total, 0);
        assert!(harness.db.get_video("v1").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_ids_skipped() {
        let harness = Harness::new();
        let entry = |id: &str| CatalogEntry {
            video_id: id.to_string(),
            channel_id: "C1".to_string(),
            title: id.to_string(),
            thumbnail_url: None,
            published_at: None,
        };
        harness
            .catalog
            .set_entries("C1", vec![entry("ok_1"), entry("../../bad"), entry("ok-2")]);

        let report = harness.pipeline.ingest_channel("C1").await.unwrap();
        assert_eq!(report.fetched, vec!["ok_1", "ok-2"]);
        assert_eq!(report.skipped, vec!["../../bad"]);
        assert_eq!(harness.db.queue_stats().unwrap().total, 2);
    }

    #[tokio::test]
    async fn test_limit_passed_to_catalog() {
        let harness = Harness::new();
        let ids: Vec<String> = (0..15).map(|i| format!("v{}", i)).collect();
        let refs: Vec<&str> = ids.iter().map(|s| s.as_str()).collect();
        harness.catalog.set("C1", &refs);

        let report = harness.pipeline.ingest_channel("C1").await.unwrap();
        assert_eq!(report.fetched.len(), harness.pipeline.options().uploads_limit);
    }

    #[tokio::test]
    async fn test_manual_verdict_survives_catalog_refresh() {
        let harness = Harness::new();
        harness.catalog.set("C1", &["v1"]);
        harness.pipeline.ingest_channel("C1").await.unwrap();
        harness
            .db
            .write_verdict(
                "v1",
                &Verdict {
                    safe: false,
                    loud_score: 9,
                    age_rating: AgeRating::ThirteenPlus,
                    junk_score: 8,
                    analysis_notes: "shouting".into(),
                    embedding: vec![0.0; 8],
                    analyzed_at: "2024-06-01T00:00:00.000000Z".into(),
                },
            )
            .unwrap();

        harness.pipeline.ingest_channel("C1").await.unwrap();
        assert_eq!(harness.db.get_video("v1").unwrap().unwrap().safe(), Some(false));
    }
}
