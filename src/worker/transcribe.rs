use super::{PassOutcome, Pipeline};
use crate::database::{Task, TaskStatus};
use crate::error::{PipelineError, Result};

impl Pipeline {
    /// Claim the oldest pending task and produce its transcript.
    #[tracing::instrument(skip(self), fields(stage = "transcribe"))]
    pub async fn transcribe_next(&self) -> Result<PassOutcome> {
        let Some(task) = self
            .db
            .claim_next(TaskStatus::Pending, TaskStatus::Processing)?
        else {
            return Ok(PassOutcome::Idle);
        };

        let start = std::time::Instant::now();
        let path = match self.transcribe_task(&task).await {
            Ok(path) => path,
            Err(e) => return self.settle_failure(&task, e),
        };

        let task = match self.db.finish_transcription(&task, &path) {
            Ok(done) => done,
            Err(e) => return self.settle_failure(&task, e.into()),
        };
        log::info!(
            "Transcribed video {} in {:.1}s",
            task.video_id,
            start.elapsed().as_secs_f64()
        );

        Ok(PassOutcome::Advanced {
            task_id: task.id,
            video_id: task.video_id,
            status: task.status,
        })
    }

    /// Transcribe and store the blob; returns the stored path.
    async fn transcribe_task(&self, task: &Task) -> Result<String> {
        if self.db.get_video(&task.video_id)?.is_none() {
            return Err(PipelineError::InvariantViolation(format!(
                "task {} has no video row for {}",
                task.id, task.video_id
            )));
        }

        let text = self
            .services
            .transcriber
            .transcribe(&task.video_id)
            .await?;
        self.services.blobs.put(&task.video_id, &text).await
    }
}
