pub mod models;


use anyhow::{anyhow, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::error::PipelineError;
pub use models::*;

const TASK_COLUMNS: &str = "id, video_id, status, last_status, error_kind, error_message, \
                            attempts, created_at, updated_at";

const VIDEO_COLUMNS: &str = "video_id, channel_id, title, thumbnail_url, published_at, \
                             transcript_path, safe, loud_score, age_rating, junk_score, \
                             analysis_notes, embedding_json, analyzed_at, created_at, updated_at";

/// Fixed-width RFC 3339 so that string order equals time order in SQL.
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn now_timestamp() -> String {
    timestamp(Utc::now())
}

pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn new(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        // WAL for concurrent readers; writers from other processes wait
        // on the busy handler instead of failing immediately.
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA foreign_keys=ON;
            PRAGMA temp_store=MEMORY;
        ",
        )?;
        conn.busy_timeout(Duration::from_secs(10))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.init_schema()?;

        Ok(db)
    }

    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database connection mutex poisoned"))
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            r#"
            -- Catalog + analysis record. Verdict columns are all NULL or all set.
            CREATE TABLE IF NOT EXISTS videos (
                video_id TEXT PRIMARY KEY,
                channel_id TEXT NOT NULL,
                title TEXT NOT NULL,
                thumbnail_url TEXT,
                published_at TEXT,
                transcript_path TEXT,
                safe INTEGER CHECK (safe IN (0, 1)),
                loud_score INTEGER CHECK (loud_score BETWEEN 0 AND 10),
                age_rating TEXT CHECK (age_rating IN ('all', '7+', '13+')),
                junk_score INTEGER CHECK (junk_score BETWEEN 0 AND 10),
                analysis_notes TEXT,
                embedding_json TEXT,
                analyzed_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                CHECK (
                    (safe IS NULL AND loud_score IS NULL AND age_rating IS NULL
                        AND junk_score IS NULL AND analysis_notes IS NULL
                        AND embedding_json IS NULL AND analyzed_at IS NULL)
                    OR
                    (safe IS NOT NULL AND loud_score IS NOT NULL AND age_rating IS NOT NULL
                        AND junk_score IS NOT NULL AND analysis_notes IS NOT NULL
                        AND embedding_json IS NOT NULL AND analyzed_at IS NOT NULL)
                )
            );

            CREATE INDEX IF NOT EXISTS idx_videos_channel
                ON videos(channel_id, published_at DESC);

            -- One task per video; never deleted, it is the audit trail.
            CREATE TABLE IF NOT EXISTS tasks (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                video_id TEXT NOT NULL UNIQUE,
                status TEXT NOT NULL DEFAULT 'pending'
                    CHECK (status IN ('pending', 'processing', 'transcribed',
                                      'classifying', 'done', 'failed')),
                last_status TEXT,
                error_kind TEXT,
                error_message TEXT,
                attempts INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_tasks_claim
                ON tasks(status, created_at, seq);
            CREATE INDEX IF NOT EXISTS idx_tasks_in_flight
                ON tasks(status, updated_at);

            CREATE TABLE IF NOT EXISTS task_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id TEXT NOT NULL,
                from_status TEXT,
                to_status TEXT NOT NULL,
                note TEXT,
                at TEXT NOT NULL,
                FOREIGN KEY (task_id) REFERENCES tasks(id)
            );

            CREATE INDEX IF NOT EXISTS idx_task_events_task ON task_events(task_id, id);

            -- Owned by the profile system; the pipeline only reads it.
            CREATE TABLE IF NOT EXISTS approved_channels (
                child_id TEXT NOT NULL,
                channel_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (child_id, channel_id)
            );
        "#,
        )?;
        Ok(())
    }

    // =========================================================================
    // Task queue
    // =========================================================================

    /// Idempotent insert. An existing task is returned untouched.
    /// Returns the task and whether this call created it.
    pub fn enqueue(&self, video_id: &str) -> Result<(Task, bool)> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = now_timestamp();
        let task_id = uuid::Uuid::new_v4().to_string();

        let inserted = tx.execute(
            "INSERT INTO tasks (id, video_id, status, attempts, created_at, updated_at)
             VALUES (?1, ?2, 'pending', 0, ?3, ?3)
             ON CONFLICT(video_id) DO NOTHING",
            params![task_id, video_id, now],
        )?;
        if inserted == 1 {
            insert_event(&tx, &task_id, None, TaskStatus::Pending, Some("enqueued"), &now)?;
        }

        let task = tx.query_row(
            &format!("SELECT {} FROM tasks WHERE video_id = ?", TASK_COLUMNS),
            params![video_id],
            task_from_row,
        )?;
        tx.commit()?;

        Ok((task, inserted == 1))
    }

    /// Atomically take the oldest task in `from` and move it to `to`.
    ///
    /// The select and the status change are one conditional UPDATE inside an
    /// IMMEDIATE transaction, so two workers can never claim the same task.
    pub fn claim_next(&self, from: TaskStatus, to: TaskStatus) -> Result<Option<Task>> {
        if to.claimed_from() != Some(from) {
            return Err(PipelineError::InvalidInput(format!(
                "{} -> {} is not a claim transition",
                from, to
            ))
            .into());
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = now_timestamp();

        let claimed = tx
            .query_row(
                &format!(
                    "UPDATE tasks
                     SET status = ?1, attempts = attempts + 1, updated_at = ?2
                     WHERE seq = (
                         SELECT seq FROM tasks
                         WHERE status = ?3
                         ORDER BY created_at ASC, seq ASC
                         LIMIT 1
                     ) AND status = ?3
                     RETURNING {}",
                    TASK_COLUMNS
                ),
                params![to.as_str(), now, from.as_str()],
                task_from_row,
            )
            .optional()?;

        if let Some(task) = &claimed {
            insert_event(&tx, &task.id, Some(from), to, Some("claimed"), &now)?;
        }
        tx.commit()?;

        if let Some(task) = &claimed {
            log::info!(
                "Claimed task {} (video {}) {} -> {}",
                task.id,
                task.video_id,
                from,
                to
            );
        }
        Ok(claimed)
    }

    /// Compare-and-set a non-terminal step (e.g. `processing -> transcribed`).
    pub fn transition(&self, task_id: &str, from: TaskStatus, to: TaskStatus) -> Result<Task> {
        if !from.can_advance_to(to) || to.is_terminal() {
            return Err(PipelineError::InvalidTransition {
                task_id: task_id.to_string(),
                from,
                to,
            }
            .into());
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = now_timestamp();

        let updated = tx
            .query_row(
                &format!(
                    "UPDATE tasks SET status = ?1, updated_at = ?2
                     WHERE id = ?3 AND status = ?4
                     RETURNING {}",
                    TASK_COLUMNS
                ),
                params![to.as_str(), now, task_id, from.as_str()],
                task_from_row,
            )
            .optional()?;

        let Some(task) = updated else {
            let current = current_status(&tx, task_id)?;
            return Err(match current {
                None => PipelineError::NotFound(format!("task {}", task_id)),
                Some(current) => PipelineError::InvalidTransition {
                    task_id: task_id.to_string(),
                    from: current,
                    to,
                },
            }
            .into());
        };

        insert_event(&tx, task_id, Some(from), to, None, &now)?;
        tx.commit()?;
        Ok(task)
    }

    /// Set `done` or `failed`. Repeating the same terminal status is a no-op;
    /// returns whether anything changed.
    pub fn mark_terminal(
        &self,
        task_id: &str,
        status: TaskStatus,
        failure: Option<(FailureKind, &str)>,
    ) -> Result<bool> {
        self.settle_terminal(task_id, None, status, failure)
    }

    /// `done` for a task the caller still holds.
    pub fn complete_task(&self, claim: &Task) -> Result<bool> {
        self.settle_terminal(&claim.id, Some(claim), TaskStatus::Done, None)
    }

    /// `failed` for a task the caller still holds. A claim that was swept
    /// or re-claimed in the meantime is reported as `ClaimLost` and the
    /// task is left to its current owner.
    pub fn fail_task(&self, claim: &Task, kind: FailureKind, reason: &str) -> Result<bool> {
        self.settle_terminal(
            &claim.id,
            Some(claim),
            TaskStatus::Failed,
            Some((kind, reason)),
        )
    }

    fn settle_terminal(
        &self,
        task_id: &str,
        claim: Option<&Task>,
        status: TaskStatus,
        failure: Option<(FailureKind, &str)>,
    ) -> Result<bool> {
        if !status.is_terminal() {
            return Err(PipelineError::InvalidInput(format!(
                "{} is not a terminal status",
                status
            ))
            .into());
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let (current, attempts) = claim_state(&tx, task_id)?
            .ok_or_else(|| PipelineError::NotFound(format!("task {}", task_id)))?;
        if current == status {
            return Ok(false);
        }
        if let Some(claim) = claim {
            ensure_held(claim, current, attempts)?;
        }
        if !current.can_advance_to(status) {
            return Err(PipelineError::InvalidTransition {
                task_id: task_id.to_string(),
                from: current,
                to: status,
            }
            .into());
        }

        let now = now_timestamp();
        let (kind, message) = match (status, failure) {
            (TaskStatus::Failed, Some((kind, message))) => {
                (Some(kind.as_str()), Some(message.to_string()))
            }
            _ => (None, None),
        };
        let last_status = (status == TaskStatus::Failed).then(|| current.as_str());

        tx.execute(
            "UPDATE tasks
             SET status = ?1,
                 last_status = COALESCE(?2, last_status),
                 error_kind = COALESCE(?3, error_kind),
                 error_message = COALESCE(?4, error_message),
                 updated_at = ?5
             WHERE id = ?6 AND status = ?7 AND attempts = ?8",
            params![
                status.as_str(),
                last_status,
                kind,
                message,
                now,
                task_id,
                current.as_str(),
                attempts
            ],
        )?;
        insert_event(&tx, task_id, Some(current), status, message.as_deref(), &now)?;
        tx.commit()?;

        if status == TaskStatus::Failed {
            log::warn!(
                "Task {} failed in {} [{}]: {}",
                task_id,
                current,
                kind.unwrap_or("unspecified"),
                message.as_deref().unwrap_or("")
            );
        }
        Ok(true)
    }

    /// Record the transcript path and move a held `processing` claim to
    /// `transcribed` in one transaction. Nothing is written when the claim
    /// has been lost.
    pub fn finish_transcription(&self, claim: &Task, transcript_path: &str) -> Result<Task> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = now_timestamp();

        held_claim(&tx, claim, TaskStatus::Processing)?;
        update_transcript_path(&tx, &claim.video_id, transcript_path, &now)?;
        let task = advance_claim(&tx, claim, TaskStatus::Transcribed, &now)?;

        tx.commit()?;
        Ok(task)
    }

    /// Write the verdict and move a held `classifying` claim to `done` in
    /// one transaction. A swept or re-claimed task gets no verdict.
    pub fn finish_classification(&self, claim: &Task, verdict: &Verdict) -> Result<Task> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = now_timestamp();

        held_claim(&tx, claim, TaskStatus::Classifying)?;
        update_verdict(&tx, &claim.video_id, verdict, &now)?;
        let task = advance_claim(&tx, claim, TaskStatus::Done, &now)?;

        tx.commit()?;
        Ok(task)
    }

    /// Operator recovery: put a failed task back at `pending`.
    /// Returns false when the task is not currently failed.
    pub fn reset_failed(&self, video_id: &str) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = now_timestamp();

        let task_id: Option<String> = tx
            .query_row(
                "UPDATE tasks
                 SET status = 'pending', last_status = NULL, error_kind = NULL,
                     error_message = NULL, updated_at = ?1
                 WHERE video_id = ?2 AND status = 'failed'
                 RETURNING id",
                params![now, video_id],
                |row| row.get(0),
            )
            .optional()?;

        let Some(task_id) = task_id else {
            return Ok(false);
        };
        insert_event(
            &tx,
            &task_id,
            Some(TaskStatus::Failed),
            TaskStatus::Pending,
            Some("manual reset"),
            &now,
        )?;
        tx.commit()?;

        log::info!("Reset failed task for video {} to pending", video_id);
        Ok(true)
    }

    /// Janitor sweep: recover tasks whose in-flight claim has made no
    /// progress since `cutoff`.
    pub fn sweep_stale(&self, cutoff: DateTime<Utc>, action: StaleAction) -> Result<Vec<SweptTask>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = now_timestamp();
        let cutoff = timestamp(cutoff);

        let swept: Vec<SweptTask> = {
            let sql = match action {
                StaleAction::Fail => {
                    "UPDATE tasks
                     SET status = 'failed',
                         last_status = status,
                         error_kind = 'stale',
                         error_message = 'no progress in ' || status || ' since ' || updated_at,
                         updated_at = ?1
                     WHERE status IN ('processing', 'classifying') AND updated_at < ?2
                     RETURNING id, video_id, last_status, status"
                }
                StaleAction::Requeue => {
                    "UPDATE tasks
                     SET status = CASE status
                             WHEN 'processing' THEN 'pending'
                             ELSE 'transcribed'
                         END,
                         last_status = status,
                         updated_at = ?1
                     WHERE status IN ('processing', 'classifying') AND updated_at < ?2
                     RETURNING id, video_id, last_status, status"
                }
            };
            let mut stmt = tx.prepare(sql)?;
            let rows = stmt
                .query_map(params![now, cutoff], |row| {
                    Ok(SweptTask {
                        task_id: row.get(0)?,
                        video_id: row.get(1)?,
                        was: parse_column(row, 2)?,
                        now: parse_column(row, 3)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        for task in &swept {
            let note = format!("stale since before {}", cutoff);
            insert_event(&tx, &task.task_id, Some(task.was), task.now, Some(&note), &now)?;
        }
        tx.commit()?;

        if !swept.is_empty() {
            log::warn!("Janitor recovered {} stuck tasks ({:?})", swept.len(), action);
        }
        Ok(swept)
    }

    pub fn get_task(&self, task_id: &str) -> Result<Option<Task>> {
        let conn = self.conn()?;
        let task = conn
            .query_row(
                &format!("SELECT {} FROM tasks WHERE id = ?", TASK_COLUMNS),
                params![task_id],
                task_from_row,
            )
            .optional()?;
        Ok(task)
    }

    pub fn get_task_by_video(&self, video_id: &str) -> Result<Option<Task>> {
        let conn = self.conn()?;
        let task = conn
            .query_row(
                &format!("SELECT {} FROM tasks WHERE video_id = ?", TASK_COLUMNS),
                params![video_id],
                task_from_row,
            )
            .optional()?;
        Ok(task)
    }

    /// Tasks in FIFO order, optionally restricted to one status.
    pub fn list_tasks(&self, status: Option<TaskStatus>, limit: i64) -> Result<Vec<Task>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM tasks
             WHERE (?1 IS NULL OR status = ?1)
             ORDER BY created_at ASC, seq ASC
             LIMIT ?2",
            TASK_COLUMNS
        ))?;
        let tasks = stmt
            .query_map(params![status.map(|s| s.as_str()), limit], task_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tasks)
    }

    pub fn queue_stats(&self) -> Result<QueueStats> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM tasks GROUP BY status")?;
        let counts = stmt
            .query_map([], |row| {
                Ok((parse_column::<TaskStatus>(row, 0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stats = QueueStats::default();
        for (status, count) in counts {
            match status {
                TaskStatus::Pending => stats.pending = count,
                TaskStatus::Processing => stats.processing = count,
                TaskStatus::Transcribed => stats.transcribed = count,
                TaskStatus::Classifying => stats.classifying = count,
                TaskStatus::Done => stats.done = count,
                TaskStatus::Failed => stats.failed = count,
            }
            stats.total += count;
        }
        Ok(stats)
    }

    pub fn task_history(&self, task_id: &str) -> Result<Vec<TaskEvent>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, task_id, from_status, to_status, note, at
             FROM task_events WHERE task_id = ? ORDER BY id ASC",
        )?;
        let events = stmt
            .query_map(params![task_id], |row| {
                Ok(TaskEvent {
                    id: row.get(0)?,
                    task_id: row.get(1)?,
                    from_status: parse_optional_column(row, 2)?,
                    to_status: parse_column(row, 3)?,
                    note: row.get(4)?,
                    at: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(events)
    }

    // =========================================================================
    // Videos
    // =========================================================================

    /// Insert or refresh catalog fields. Transcript and verdict columns are
    /// never touched here. Returns true when the row is new.
    pub fn upsert_video_catalog(&self, entry: &CatalogEntry) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = now_timestamp();

        let exists: bool = tx
            .query_row(
                "SELECT 1 FROM videos WHERE video_id = ?",
                params![entry.video_id],
                |_| Ok(()),
            )
            .optional()?
            .is_some();

        tx.execute(
            "INSERT INTO videos (video_id, channel_id, title, thumbnail_url, published_at,
                                 created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
             ON CONFLICT(video_id) DO UPDATE SET
                 channel_id = excluded.channel_id,
                 title = excluded.title,
                 thumbnail_url = COALESCE(excluded.thumbnail_url, videos.thumbnail_url),
                 published_at = COALESCE(excluded.published_at, videos.published_at),
                 updated_at = excluded.updated_at",
            params![
                entry.video_id,
                entry.channel_id,
                entry.title,
                entry.thumbnail_url,
                entry.published_at,
                now
            ],
        )?;
        tx.commit()?;

        Ok(!exists)
    }

    pub fn get_video(&self, video_id: &str) -> Result<Option<Video>> {
        let conn = self.conn()?;
        let video = conn
            .query_row(
                &format!("SELECT {} FROM videos WHERE video_id = ?", VIDEO_COLUMNS),
                params![video_id],
                video_from_row,
            )
            .optional()?;
        Ok(video)
    }

    pub fn set_transcript_path(&self, video_id: &str, transcript_path: &str) -> Result<()> {
        let conn = self.conn()?;
        update_transcript_path(&conn, video_id, transcript_path, &now_timestamp())
    }

    /// Write every verdict column in one statement. Re-running overwrites.
    pub fn write_verdict(&self, video_id: &str, verdict: &Verdict) -> Result<()> {
        let conn = self.conn()?;
        update_verdict(&conn, video_id, verdict, &now_timestamp())
    }

    /// Videos from the given channels, newest first.
    pub fn videos_in_channels(&self, channel_ids: &[String]) -> Result<Vec<Video>> {
        if channel_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; channel_ids.len()].join(", ");
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM videos
             WHERE channel_id IN ({})
             ORDER BY published_at DESC, video_id ASC",
            VIDEO_COLUMNS, placeholders
        ))?;
        let videos = stmt
            .query_map(rusqlite::params_from_iter(channel_ids.iter()), video_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(videos)
    }

    // =========================================================================
    // Approved channels
    // =========================================================================

    pub fn approve_channel(&self, child_id: &str, channel_id: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO approved_channels (child_id, channel_id, created_at)
             VALUES (?1, ?2, ?3)",
            params![child_id, channel_id, now_timestamp()],
        )?;
        Ok(())
    }

    pub fn revoke_channel(&self, child_id: &str, channel_id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM approved_channels WHERE child_id = ?1 AND channel_id = ?2",
            params![child_id, channel_id],
        )?;
        Ok(removed > 0)
    }

    pub fn approved_channels(&self, child_id: &str) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT channel_id FROM approved_channels WHERE child_id = ? ORDER BY channel_id",
        )?;
        let channels = stmt
            .query_map(params![child_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(channels)
    }
}

// ============================================================================
// Row helpers
// ============================================================================

fn insert_event(
    conn: &Connection,
    task_id: &str,
    from: Option<TaskStatus>,
    to: TaskStatus,
    note: Option<&str>,
    at: &str,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO task_events (task_id, from_status, to_status, note, at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![task_id, from.map(|s| s.as_str()), to.as_str(), note, at],
    )?;
    Ok(())
}

fn current_status(conn: &Connection, task_id: &str) -> rusqlite::Result<Option<TaskStatus>> {
    conn.query_row(
        "SELECT status FROM tasks WHERE id = ?",
        params![task_id],
        |row| parse_column(row, 0),
    )
    .optional()
}

fn claim_state(conn: &Connection, task_id: &str) -> rusqlite::Result<Option<(TaskStatus, i32)>> {
    conn.query_row(
        "SELECT status, attempts FROM tasks WHERE id = ?",
        params![task_id],
        |row| Ok((parse_column(row, 0)?, row.get(1)?)),
    )
    .optional()
}

/// A claim is held while the task sits in the status it was claimed into
/// and nobody has claimed it since (`attempts` grows on every claim).
fn ensure_held(claim: &Task, current: TaskStatus, attempts: i32) -> Result<()> {
    if current != claim.status || attempts != claim.attempts {
        return Err(PipelineError::ClaimLost {
            task_id: claim.id.clone(),
            held: claim.status,
            found: current,
        }
        .into());
    }
    Ok(())
}

fn held_claim(conn: &Connection, claim: &Task, expected: TaskStatus) -> Result<()> {
    if claim.status != expected {
        return Err(PipelineError::InvalidInput(format!(
            "task {} is {}, expected a {} claim",
            claim.id, claim.status, expected
        ))
        .into());
    }
    let (current, attempts) = claim_state(conn, &claim.id)?
        .ok_or_else(|| PipelineError::NotFound(format!("task {}", claim.id)))?;
    ensure_held(claim, current, attempts)
}

fn advance_claim(conn: &Connection, claim: &Task, to: TaskStatus, now: &str) -> Result<Task> {
    let task = conn.query_row(
        &format!(
            "UPDATE tasks SET status = ?1, updated_at = ?2
             WHERE id = ?3 AND status = ?4 AND attempts = ?5
             RETURNING {}",
            TASK_COLUMNS
        ),
        params![to.as_str(), now, claim.id, claim.status.as_str(), claim.attempts],
        task_from_row,
    )?;
    insert_event(conn, &claim.id, Some(claim.status), to, None, now)?;
    Ok(task)
}

fn update_transcript_path(
    conn: &Connection,
    video_id: &str,
    transcript_path: &str,
    now: &str,
) -> Result<()> {
    let updated = conn.execute(
        "UPDATE videos SET transcript_path = ?1, updated_at = ?2 WHERE video_id = ?3",
        params![transcript_path, now, video_id],
    )?;
    if updated == 0 {
        return Err(PipelineError::NotFound(format!("video {}", video_id)).into());
    }
    Ok(())
}

fn update_verdict(conn: &Connection, video_id: &str, verdict: &Verdict, now: &str) -> Result<()> {
    let embedding_json = serde_json::to_string(&verdict.embedding)?;
    let updated = conn.execute(
        "UPDATE videos
         SET safe = ?1, loud_score = ?2, age_rating = ?3, junk_score = ?4,
             analysis_notes = ?5, embedding_json = ?6, analyzed_at = ?7,
             updated_at = ?8
         WHERE video_id = ?9",
        params![
            verdict.safe,
            verdict.loud_score,
            verdict.age_rating.as_str(),
            verdict.junk_score,
            verdict.analysis_notes,
            embedding_json,
            verdict.analyzed_at,
            now,
            video_id
        ],
    )?;
    if updated == 0 {
        return Err(PipelineError::NotFound(format!("video {}", video_id)).into());
    }
    Ok(())
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        Box::new(PipelineError::InvariantViolation(message)),
    )
}

fn parse_column<T: FromStr<Err = String>>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_error(idx, e))
}

fn parse_optional_column<T: FromStr<Err = String>>(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<T>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| s.parse().map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get(0)?,
        video_id: row.get(1)?,
        status: parse_column(row, 2)?,
        last_status: parse_optional_column(row, 3)?,
        error_kind: parse_optional_column(row, 4)?,
        error_message: row.get(5)?,
        attempts: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn video_from_row(row: &Row<'_>) -> rusqlite::Result<Video> {
    let safe: Option<bool> = row.get(6)?;
    let verdict = match safe {
        None => None,
        Some(safe) => {
            let embedding_json: String = row.get(11)?;
            let embedding: Vec<f32> = serde_json::from_str(&embedding_json)
                .map_err(|e| conversion_error(11, format!("embedding column: {}", e)))?;
            Some(Verdict {
                safe,
                loud_score: row.get(7)?,
                age_rating: parse_column(row, 8)?,
                junk_score: row.get(9)?,
                analysis_notes: row.get(10)?,
                embedding,
                analyzed_at: row.get(12)?,
            })
        }
    };

    Ok(Video {
        video_id: row.get(0)?,
        channel_id: row.get(1)?,
        title: row.get(2)?,
        thumbnail_url: row.get(3)?,
        published_at: row.get(4)?,
        transcript_path: row.get(5)?,
        verdict,
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
    })
}
