use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Task state machine
// ============================================================================

/// Pipeline position of a task. Variants are declared in forward order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Transcribed,
    Classifying,
    Done,
    Failed,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 6] = [
        Self::Pending,
        Self::Processing,
        Self::Transcribed,
        Self::Classifying,
        Self::Done,
        Self::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Transcribed => "transcribed",
            Self::Classifying => "classifying",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Statuses that mean "a worker holds this task right now".
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Processing | Self::Classifying)
    }

    /// The queue status an in-flight task was claimed from.
    pub fn claimed_from(&self) -> Option<TaskStatus> {
        match self {
            Self::Processing => Some(Self::Pending),
            Self::Classifying => Some(Self::Transcribed),
            _ => None,
        }
    }

    /// Next status along the happy path.
    pub fn successor(&self) -> Option<TaskStatus> {
        match self {
            Self::Pending => Some(Self::Processing),
            Self::Processing => Some(Self::Transcribed),
            Self::Transcribed => Some(Self::Classifying),
            Self::Classifying => Some(Self::Done),
            Self::Done | Self::Failed => None,
        }
    }

    /// Forward-only rule: one step along the happy path, or `failed` from any
    /// non-terminal status. `failed -> pending` is only reachable through an
    /// explicit operator reset and is not a normal transition.
    pub fn can_advance_to(&self, next: TaskStatus) -> bool {
        if next == Self::Failed {
            return !self.is_terminal();
        }
        self.successor() == Some(next)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "transcribed" => Ok(Self::Transcribed),
            "classifying" => Ok(Self::Classifying),
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown task status '{}'", other)),
        }
    }
}

/// Why a task ended in `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Catalog, transcription, classification or embedding service errored.
    Upstream,
    /// Service answered, but not in the required shape.
    Malformed,
    /// Pipeline data contradicts itself (e.g. task without a video row).
    Invariant,
    /// Swept by the janitor after sitting in an in-flight status too long.
    Stale,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upstream => "upstream",
            Self::Malformed => "malformed",
            Self::Invariant => "invariant",
            Self::Stale => "stale",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upstream" => Ok(Self::Upstream),
            "malformed" => Ok(Self::Malformed),
            "invariant" => Ok(Self::Invariant),
            "stale" => Ok(Self::Stale),
            other => Err(format!("unknown failure kind '{}'", other)),
        }
    }
}

/// What the janitor does with a stuck task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaleAction {
    Fail,
    Requeue,
}

impl Default for StaleAction {
    fn default() -> Self {
        Self::Fail
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub video_id: String,
    pub status: TaskStatus,
    /// Status held when the task failed.
    pub last_status: Option<TaskStatus>,
    pub error_kind: Option<FailureKind>,
    pub error_message: Option<String>,
    /// Number of times a worker has claimed this task.
    pub attempts: i32,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEvent {
    pub id: i64,
    pub task_id: String,
    pub from_status: Option<TaskStatus>,
    pub to_status: TaskStatus,
    pub note: Option<String>,
    pub at: String,
}

/// Task row swept by the janitor.
#[derive(Debug, Clone, Serialize)]
pub struct SweptTask {
    pub task_id: String,
    pub video_id: String,
    pub was: TaskStatus,
    pub now: TaskStatus,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStats {
    pub pending: i64,
    pub processing: i64,
    pub transcribed: i64,
    pub classifying: i64,
    pub done: i64,
    pub failed: i64,
    pub total: i64,
}

// ============================================================================
// Videos and verdicts
// ============================================================================

/// Minimum audience age. Ordered from most to least permissive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AgeRating {
    #[serde(rename = "all")]
    All,
    #[serde(rename = "7+")]
    SevenPlus,
    #[serde(rename = "13+")]
    ThirteenPlus,
}

impl AgeRating {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::SevenPlus => "7+",
            Self::ThirteenPlus => "13+",
        }
    }
}

impl fmt::Display for AgeRating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgeRating {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(Self::All),
            "7+" => Ok(Self::SevenPlus),
            "13+" => Ok(Self::ThirteenPlus),
            other => Err(format!("unknown age rating '{}'", other)),
        }
    }
}

/// Classification outcome. Stored as a unit: a video either has one or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub safe: bool,
    pub loud_score: u8,
    pub age_rating: AgeRating,
    pub junk_score: u8,
    pub analysis_notes: String,
    pub embedding: Vec<f32>,
    pub analyzed_at: String,
}

/// Catalog fields as reported by the external catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub video_id: String,
    pub channel_id: String,
    pub title: String,
    pub thumbnail_url: Option<String>,
    pub published_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Video {
    pub video_id: String,
    pub channel_id: String,
    pub title: String,
    pub thumbnail_url: Option<String>,
    pub published_at: Option<String>,
    pub transcript_path: Option<String>,
    pub verdict: Option<Verdict>,
    pub created_at: String,
    pub updated_at: String,
}

impl Video {
    /// `None` while unanalyzed.
    pub fn safe(&self) -> Option<bool> {
        self.verdict.as_ref().map(|v| v.safe)
    }

    pub fn is_analyzed(&self) -> bool {
        self.verdict.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovedChannel {
    pub child_id: String,
    pub channel_id: String,
    pub created_at: String,
}
