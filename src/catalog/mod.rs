//! Catalog clients: recent uploads for a channel
//!
//! Two backends. The YouTube Data API resolves the channel's uploads
//! playlist and lists it; the channel RSS feed needs no key but only carries
//! the last ~15 uploads.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::database::CatalogEntry;
use crate::error::{PipelineError, Result};

const YOUTUBE_API_BASE: &str = "https://www.googleapis.com/youtube/v3";
const YOUTUBE_FEED_BASE: &str = "https://www.youtube.com/feeds/videos.xml";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
pub trait CatalogApi: Send + Sync {
    /// Most recent uploads, in the order the catalog reports them.
    async fn latest_uploads(&self, channel_id: &str, limit: usize) -> Result<Vec<CatalogEntry>>;
}

fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .unwrap_or_default()
}

async fn fetch_text(request: reqwest::RequestBuilder, what: &str) -> Result<String> {
    let response = request
        .send()
        .await
        .map_err(|e| {
            PipelineError::Upstream(format!("{} request failed: {}", what, e.without_url()))
        })?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(PipelineError::Upstream(format!(
            "{} returned {}: {}",
            what,
            status,
            body.chars().take(200).collect::<String>()
        )));
    }

    response
        .text()
        .await
        .map_err(|e| {
            PipelineError::Upstream(format!("{} body unreadable: {}", what, e.without_url()))
        })
}

// ============================================================================
// YouTube Data API v3
// ============================================================================

pub struct YouTubeDataApi {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl YouTubeDataApi {
    pub fn new(api_key: &str) -> Self {
        Self {
            client: http_client(),
            base_url: YOUTUBE_API_BASE.to_string(),
            api_key: api_key.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn channels_request(&self, channel_id: &str) -> reqwest::RequestBuilder {
        self.client
            .get(format!("{}/channels", self.base_url))
            .query(&[
                ("part", "contentDetails"),
                ("id", channel_id),
                ("key", self.api_key.as_str()),
            ])
    }

    fn playlist_items_request(&self, playlist_id: &str, limit: usize) -> reqwest::RequestBuilder {
        // The API caps a single page at 50 items
        let max_results = limit.clamp(1, 50).to_string();
        self.client
            .get(format!("{}/playlistItems", self.base_url))
            .query(&[
                ("part", "contentDetails,snippet"),
                ("playlistId", playlist_id),
                ("maxResults", max_results.as_str()),
                ("key", self.api_key.as_str()),
            ])
    }

    async fn uploads_playlist(&self, channel_id: &str) -> Result<String> {
        let body = fetch_text(self.channels_request(channel_id), "YouTube channels").await?;
        let channels: ChannelsResponse = serde_json::from_str(&body)?;

        channels
            .items
            .into_iter()
            .next()
            .and_then(|c| c.content_details.related_playlists.uploads)
            .ok_or_else(|| {
                PipelineError::Upstream(format!(
                    "could not find uploads playlist for channel {}",
                    channel_id
                ))
            })
    }
}

#[async_trait]
impl CatalogApi for YouTubeDataApi {
    async fn latest_uploads(&self, channel_id: &str, limit: usize) -> Result<Vec<CatalogEntry>> {
        let playlist_id = self.uploads_playlist(channel_id).await?;
        log::info!(
            "Listing uploads playlist {} for channel {}",
            playlist_id,
            channel_id
        );

        let request = self.playlist_items_request(&playlist_id, limit);
        let body = fetch_text(request, "YouTube playlistItems").await?;
        let page: PlaylistItemsResponse = serde_json::from_str(&body)?;

        Ok(entries_from_playlist(page, channel_id, limit))
    }
}

fn entries_from_playlist(
    page: PlaylistItemsResponse,
    channel_id: &str,
    limit: usize,
) -> Vec<CatalogEntry> {
    page.items
        .into_iter()
        .take(limit)
        .map(|item| {
            let thumbnails = item.snippet.thumbnails;
            CatalogEntry {
                video_id: item.content_details.video_id,
                channel_id: channel_id.to_string(),
                title: item.snippet.title,
                thumbnail_url: thumbnails
                    .high
                    .or(thumbnails.default)
                    .map(|t| t.url),
                published_at: item
                    .content_details
                    .video_published_at
                    .or(item.snippet.published_at),
            }
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct ChannelsResponse {
    #[serde(default)]
    items: Vec<ChannelItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelItem {
    content_details: ChannelContentDetails,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelContentDetails {
    related_playlists: RelatedPlaylists,
}

#[derive(Debug, Deserialize)]
struct RelatedPlaylists {
    uploads: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlaylistItemsResponse {
    #[serde(default)]
    items: Vec<PlaylistItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItem {
    content_details: PlaylistContentDetails,
    snippet: Snippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistContentDetails {
    video_id: String,
    video_published_at: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snippet {
    #[serde(default)]
    title: String,
    published_at: Option<String>,
    #[serde(default)]
    thumbnails: Thumbnails,
}

#[derive(Debug, Default, Deserialize)]
struct Thumbnails {
    default: Option<Thumbnail>,
    high: Option<Thumbnail>,
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    url: String,
}

// ============================================================================
// Channel RSS feed
// ============================================================================

pub struct YouTubeRssFeed {
    client: reqwest::Client,
    base_url: String,
}

impl YouTubeRssFeed {
    pub fn new() -> Self {
        Self {
            client: http_client(),
            base_url: YOUTUBE_FEED_BASE.to_string(),
        }
    }

    fn feed_request(&self, channel_id: &str) -> reqwest::RequestBuilder {
        self.client
            .get(&self.base_url)
            .query(&[("channel_id", channel_id)])
    }
}

impl Default for YouTubeRssFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CatalogApi for YouTubeRssFeed {
    async fn latest_uploads(&self, channel_id: &str, limit: usize) -> Result<Vec<CatalogEntry>> {
        log::info!("Fetching channel feed for {}", channel_id);
        let body = fetch_text(self.feed_request(channel_id), "YouTube feed").await?;
        entries_from_feed(&body, channel_id, limit)
    }
}

fn entries_from_feed(body: &str, channel_id: &str, limit: usize) -> Result<Vec<CatalogEntry>> {
    let feed = feed_rs::parser::parse(body.as_bytes())
        .map_err(|e| PipelineError::MalformedResponse(format!("channel feed: {}", e)))?;

    log::info!("Parsed {} entries from channel feed", feed.entries.len());

    let entries = feed
        .entries
        .into_iter()
        .filter_map(|entry| {
            // Atom ids look like "yt:video:<id>"
            let video_id = entry.id.rsplit(':').next()?.to_string();
            let thumbnail_url = entry
                .media
                .iter()
                .flat_map(|m| m.thumbnails.iter())
                .map(|t| t.image.uri.clone())
                .next();
            Some(CatalogEntry {
                video_id,
                channel_id: channel_id.to_string(),
                title: entry.title.map(|t| t.content).unwrap_or_default(),
                thumbnail_url,
                published_at: entry.published.map(|d| d.to_rfc3339()),
            })
        })
        .take(limit)
        .collect();

    Ok(entries)
}
