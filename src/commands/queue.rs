use serde::Serialize;

use super::{require, AppContext};
use crate::database::{QueueStats, Task, TaskEvent, TaskStatus};
use crate::error::{PipelineError, Result};
use crate::storage::validate_video_id;

#[derive(Debug, Serialize)]
pub struct EnqueueResponse {
    pub task: Task,
    pub created: bool,
}

#[derive(Debug, Serialize)]
pub struct QueueResponse {
    pub stats: QueueStats,
    pub tasks: Vec<Task>,
}

#[derive(Debug, Serialize)]
pub struct RetryResponse {
    pub video_id: String,
    pub reset: bool,
    pub task: Option<Task>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub task: Task,
    pub events: Vec<TaskEvent>,
}

/// Queue a single video by id, outside of channel ingestion.
pub fn enqueue_video(ctx: &AppContext, video_id: &str) -> Result<EnqueueResponse> {
    validate_video_id(video_id)?;
    let (task, created) = ctx.db.enqueue(video_id)?;
    if created {
        log::info!("Enqueued video {} as task {}", video_id, task.id);
    }
    Ok(EnqueueResponse { task, created })
}

/// Counts per status plus the tasks in one status (or all, FIFO order).
pub fn queue_status(
    ctx: &AppContext,
    status: Option<&str>,
    limit: i64,
) -> Result<QueueResponse> {
    let status = status
        .map(|s| s.parse::<TaskStatus>().map_err(PipelineError::InvalidInput))
        .transpose()?;

    Ok(QueueResponse {
        stats: ctx.db.queue_stats()?,
        tasks: ctx.db.list_tasks(status, limit.max(1))?,
    })
}

/// Put a failed task back to pending.
pub fn retry_failed(ctx: &AppContext, video_id: &str) -> Result<RetryResponse> {
    require("video_id", video_id)?;
    let reset = ctx.db.reset_failed(video_id)?;
    let task = ctx.db.get_task_by_video(video_id)?;

    if !reset {
        match &task {
            Some(task) => log::info!(
                "Task for {} is {}, not failed; nothing to retry",
                video_id,
                task.status
            ),
            None => return Err(PipelineError::NotFound(format!("no task for video {}", video_id))),
        }
    }

    Ok(RetryResponse {
        video_id: video_id.to_string(),
        reset,
        task,
    })
}

pub fn task_history(ctx: &AppContext, video_id: &str) -> Result<HistoryResponse> {
    require("video_id", video_id)?;
    let task = ctx
        .db
        .get_task_by_video(video_id)?
        .ok_or_else(|| PipelineError::NotFound(format!("no task for video {}", video_id)))?;
    let events = ctx.db.task_history(&task.id)?;
    Ok(HistoryResponse { task, events })
}
