use super::{PassOutcome, Pipeline};
use crate::database::{now_timestamp, Task, TaskStatus, Verdict};
use crate::error::{PipelineError, Result};
use crate::ollama::verdict::{build_prompt, parse_verdict, truncate_chars};

impl Pipeline {
    /// Claim the oldest transcribed task and write its verdict.
    #[tracing::instrument(skip(self), fields(stage = "classify"))]
    pub async fn classify_next(&self) -> Result<PassOutcome> {
        let Some(task) = self
            .db
            .claim_next(TaskStatus::Transcribed, TaskStatus::Classifying)?
        else {
            return Ok(PassOutcome::Idle);
        };

        let verdict = match self.classify_task(&task).await {
            Ok(verdict) => verdict,
            Err(e) => return self.settle_failure(&task, e),
        };

        // Verdict and `done` commit together, and only while the claim holds
        if let Err(e) = self.db.finish_classification(&task, &verdict) {
            return self.settle_failure(&task, e.into());
        }

        log::info!(
            "Classified video {}: safe={} loud={} age={} junk={}",
            task.video_id,
            verdict.safe,
            verdict.loud_score,
            verdict.age_rating,
            verdict.junk_score
        );

        Ok(PassOutcome::Advanced {
            task_id: task.id,
            video_id: task.video_id,
            status: TaskStatus::Done,
        })
    }

    async fn classify_task(&self, task: &Task) -> Result<Verdict> {
        if self.db.get_video(&task.video_id)?.is_none() {
            return Err(PipelineError::InvariantViolation(format!(
                "task {} has no video row for {}",
                task.id, task.video_id
            )));
        }

        let transcript = self
            .services
            .blobs
            .get(&task.video_id)
            .await?
            .ok_or_else(|| {
                PipelineError::InvariantViolation(format!(
                    "no transcript stored for {}",
                    task.video_id
                ))
            })?;

        let cap = self.options.transcript_char_cap;
        let prompt = build_prompt(&transcript, cap);
        let response = self.services.classifier.classify(&prompt).await?;
        let raw = parse_verdict(&response)?;

        let embedding = self
            .services
            .embedder
            .embed(truncate_chars(&transcript, cap))
            .await?;
        if embedding.len() != self.options.embedding_dimensions {
            return Err(PipelineError::MalformedResponse(format!(
                "embedding has {} dimensions, expected {}",
                embedding.len(),
                self.options.embedding_dimensions
            )));
        }

        Ok(Verdict {
            safe: raw.safe,
            loud_score: raw.loud,
            age_rating: raw.age,
            junk_score: raw.junk,
            analysis_notes: raw.reason,
            embedding,
            analyzed_at: now_timestamp(),
        })
    }
}
