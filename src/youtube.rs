#![forbid(unsafe_code)]

//! Thin client for the YouTube Data API v3.
//!
//! Only two operations are wrapped: the related-video search and the bulk
//! detail lookup. Both degrade to an empty result when no API key is
//! configured, because related-track suggestions are an enhancement rather
//! than a core guarantee.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

const API_BASE: &str = "https://www.googleapis.com/youtube/v3";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const RETRY_DELAY: Duration = Duration::from_millis(250);

/// Source of related-video candidates and their details. The production
/// implementation talks to the Data API; handler tests install canned stubs.
#[async_trait]
pub trait RelatedSource: Send + Sync {
    /// Whether a credential is configured. Without one the suggestion
    /// feature is disabled rather than silently empty.
    fn has_credential(&self) -> bool;

    /// Searches for videos related to the given one and returns their IDs.
    async fn search_related(&self, video_id: &str, max_results: usize) -> Result<Vec<String>>;

    /// Bulk detail lookup. Results carry no ordering guarantee relative to
    /// the input, so callers must match entries by ID.
    async fn video_details(&self, video_ids: &[String]) -> Result<Vec<VideoItem>>;
}

pub struct YouTubeClient {
    http: Client,
    api_key: Option<String>,
}

impl YouTubeClient {
    pub fn new(api_key: Option<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("building YouTube API client")?;
        Ok(Self { http, api_key })
    }

    /// GET with a single retry after a short pause. These calls are
    /// idempotent, so retrying a transport failure is safe.
    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = match self.http.get(url).send().await {
            Ok(response) => response,
            Err(_) => {
                tokio::time::sleep(RETRY_DELAY).await;
                self.http
                    .get(url)
                    .send()
                    .await
                    .context("requesting YouTube API")?
            }
        };
        response
            .error_for_status()
            .context("YouTube API request rejected")?
            .json()
            .await
            .context("parsing YouTube API response")
    }
}

#[async_trait]
impl RelatedSource for YouTubeClient {
    fn has_credential(&self) -> bool {
        self.api_key.is_some()
    }

    async fn search_related(&self, video_id: &str, max_results: usize) -> Result<Vec<String>> {
        let Some(key) = &self.api_key else {
            return Ok(Vec::new());
        };
        let url = format!(
            "{API_BASE}/search?part=snippet&relatedToVideoId={video_id}&type=video&maxResults={max_results}&key={key}"
        );
        let response: SearchListResponse = self.get_json(&url).await?;
        Ok(response
            .items
            .into_iter()
            .filter_map(|item| item.id.and_then(|id| id.video_id))
            .collect())
    }

    async fn video_details(&self, video_ids: &[String]) -> Result<Vec<VideoItem>> {
        let Some(key) = &self.api_key else {
            return Ok(Vec::new());
        };
        if video_ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids = video_ids.join(",");
        let url =
            format!("{API_BASE}/videos?part=snippet,contentDetails,statistics&id={ids}&key={key}");
        let response: VideoListResponse = self.get_json(&url).await?;
        Ok(response.items)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchListResponse {
    #[serde(default)]
    pub items: Vec<SearchItem>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchItem {
    pub id: Option<SearchItemId>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchItemId {
    pub video_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VideoListResponse {
    #[serde(default)]
    pub items: Vec<VideoItem>,
}

/// One entry from the `videos` endpoint with the parts the ranker reads.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoItem {
    #[serde(default)]
    pub id: String,
    pub snippet: Option<Snippet>,
    pub content_details: Option<ContentDetails>,
    pub statistics: Option<Statistics>,
}

impl VideoItem {
    pub fn title(&self) -> &str {
        self.snippet
            .as_ref()
            .and_then(|snippet| snippet.title.as_deref())
            .unwrap_or_default()
    }

    pub fn tags(&self) -> &[String] {
        self.snippet
            .as_ref()
            .map(|snippet| snippet.tags.as_slice())
            .unwrap_or_default()
    }

    pub fn channel(&self) -> &str {
        self.snippet
            .as_ref()
            .and_then(|snippet| snippet.channel_title.as_deref())
            .unwrap_or_default()
    }

    /// Best-available thumbnail URL: `high` first, then `default`.
    pub fn thumbnail(&self) -> &str {
        let thumbnails = self
            .snippet
            .as_ref()
            .and_then(|snippet| snippet.thumbnails.as_ref());
        thumbnails
            .and_then(|set| set.high.as_ref().or(set.fallback.as_ref()))
            .and_then(|thumb| thumb.url.as_deref())
            .unwrap_or_default()
    }

    /// Platform-formatted ISO 8601 duration, e.g. `PT3M33S`.
    pub fn duration(&self) -> &str {
        self.content_details
            .as_ref()
            .and_then(|details| details.duration.as_deref())
            .unwrap_or_default()
    }

    pub fn views(&self) -> &str {
        self.statistics
            .as_ref()
            .and_then(|stats| stats.view_count.as_deref())
            .unwrap_or_default()
    }

    /// Parsed view count; missing or malformed values count as zero.
    pub fn view_count(&self) -> f64 {
        self.views().parse::<f64>().unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snippet {
    pub title: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub channel_title: Option<String>,
    pub thumbnails: Option<ThumbnailSet>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ThumbnailSet {
    pub high: Option<ThumbnailUrl>,
    #[serde(rename = "default")]
    pub fallback: Option<ThumbnailUrl>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ThumbnailUrl {
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContentDetails {
    pub duration: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub view_count: Option<String>,
}
