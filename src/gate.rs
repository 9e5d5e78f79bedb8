//! Safety Gate: whether a video may be shown to a child
//!
//! `safe == true` is the hard gate and the channel must be approved for the
//! child. Age rating and junk score are soft signals; age only filters when
//! the caller opts in through [`GatePolicy::max_age`].

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use crate::database::{AgeRating, Database, Video};
use crate::error::Result;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatePolicy {
    /// Hide videos rated above this age. `None` disables age filtering.
    pub max_age: Option<AgeRating>,
}

/// Pure visibility rule over an already-loaded approval set.
pub fn is_visible(video: &Video, approved_channels: &HashSet<String>, policy: GatePolicy) -> bool {
    let Some(verdict) = &video.verdict else {
        return false;
    };
    if !verdict.safe || !approved_channels.contains(&video.channel_id) {
        return false;
    }
    match policy.max_age {
        Some(max) => verdict.age_rating <= max,
        None => true,
    }
}

pub struct SafetyGate {
    db: Arc<Database>,
}

impl SafetyGate {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn is_visible_to_child(&self, video: &Video, child_id: &str) -> Result<bool> {
        let approved: HashSet<String> = self.db.approved_channels(child_id)?.into_iter().collect();
        Ok(is_visible(video, &approved, GatePolicy::default()))
    }

    /// Gate a video by id. Unknown videos are never visible.
    pub fn check(&self, video_id: &str, child_id: &str) -> Result<bool> {
        match self.db.get_video(video_id)? {
            Some(video) => self.is_visible_to_child(&video, child_id),
            None => Ok(false),
        }
    }

    /// Every video the child may see, newest first.
    pub fn visible_videos(&self, child_id: &str, policy: GatePolicy) -> Result<Vec<Video>> {
        let channels = self.db.approved_channels(child_id)?;
        let approved: HashSet<String> = channels.iter().cloned().collect();

        let videos = self
            .db
            .videos_in_channels(&channels)?
            .into_iter()
            .filter(|v| is_visible(v, &approved, policy))
            .collect();
        Ok(videos)
    }
}
