use chrono::Utc;

use super::Pipeline;
use crate::database::SweptTask;
use crate::error::{PipelineError, Result};

impl Pipeline {
    /// Recover tasks stuck in `processing` or `classifying` for longer than
    /// the configured threshold.
    #[tracing::instrument(skip(self), fields(stage = "janitor"))]
    pub fn sweep_stale(&self) -> Result<Vec<SweptTask>> {
        let threshold = chrono::Duration::from_std(self.options.stale_after)
            .map_err(|e| PipelineError::Config(format!("stale threshold: {}", e)))?;
        let cutoff = Utc::now() - threshold;

        let swept = self.db.sweep_stale(cutoff, self.options.stale_action)?;
        for task in &swept {
            log::warn!(
                "Janitor moved task {} (video {}) from {} to {}",
                task.task_id,
                task.video_id,
                task.was,
                task.now
            );
        }
        Ok(swept)
    }
}
