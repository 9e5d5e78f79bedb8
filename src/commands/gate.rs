use serde::Serialize;

use super::{require, AppContext};
use crate::database::{AgeRating, Video};
use crate::error::{PipelineError, Result};
use crate::gate::GatePolicy;

#[derive(Debug, Serialize)]
pub struct ApprovalResponse {
    pub child_id: String,
    pub channels: Vec<String>,
    pub changed: bool,
}

#[derive(Debug, Serialize)]
pub struct VisibleResponse {
    pub child_id: String,
    pub policy: GatePolicy,
    pub videos: Vec<Video>,
}

#[derive(Debug, Serialize)]
pub struct CheckResponse {
    pub video_id: String,
    pub child_id: String,
    pub visible: bool,
}

pub fn approve_channel(ctx: &AppContext, child_id: &str, channel_id: &str) -> Result<ApprovalResponse> {
    require("child_id", child_id)?;
    require("channel_id", channel_id)?;
    let before = ctx.db.approved_channels(child_id)?;
    ctx.db.approve_channel(child_id, channel_id)?;
    let channels = ctx.db.approved_channels(child_id)?;
    Ok(ApprovalResponse {
        child_id: child_id.to_string(),
        changed: channels.len() != before.len(),
        channels,
    })
}

pub fn revoke_channel(ctx: &AppContext, child_id: &str, channel_id: &str) -> Result<ApprovalResponse> {
    require("child_id", child_id)?;
    let changed = ctx.db.revoke_channel(child_id, channel_id)?;
    Ok(ApprovalResponse {
        child_id: child_id.to_string(),
        channels: ctx.db.approved_channels(child_id)?,
        changed,
    })
}

pub fn visible_videos(
    ctx: &AppContext,
    child_id: &str,
    max_age: Option<&str>,
) -> Result<VisibleResponse> {
    require("child_id", child_id)?;
    let policy = GatePolicy {
        max_age: max_age
            .map(|s| s.parse::<AgeRating>().map_err(PipelineError::InvalidInput))
            .transpose()?,
    };
    Ok(VisibleResponse {
        child_id: child_id.to_string(),
        policy,
        videos: ctx.gate.visible_videos(child_id, policy)?,
    })
}

pub fn check_visibility(ctx: &AppContext, video_id: &str, child_id: &str) -> Result<CheckResponse> {
    require("child_id", child_id)?;
    Ok(CheckResponse {
        video_id: video_id.to_string(),
        child_id: child_id.to_string(),
        visible: ctx.gate.check(video_id, child_id)?,
    })
}
