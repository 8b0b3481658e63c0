#![forbid(unsafe_code)]

//! Stream resolution: turns an external video ID into a direct, short-lived
//! audio URL plus descriptive metadata.
//!
//! The actual extraction is delegated to yt-dlp, invoked with
//! `--dump-single-json` so we get every available format in one call. The
//! extractor sits behind a trait so handlers and the cache can be exercised
//! with stubs.

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Canonical watch URL for a video ID.
pub fn watch_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={video_id}")
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Video not found")]
    NotFound,
    #[error("No audio stream found")]
    NoAudioStream,
    #[error(transparent)]
    Extraction(#[from] anyhow::Error),
}

/// Source of raw video metadata. The production implementation shells out to
/// yt-dlp; tests install counting or canned stubs.
#[async_trait]
pub trait AudioExtractor: Send + Sync {
    async fn fetch_video_info(&self, video_id: &str) -> Result<VideoInfo, ExtractError>;
}

/// Subset of the yt-dlp single-JSON dump that resolution needs. Unknown
/// fields are ignored during deserialization.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VideoInfo {
    pub title: Option<String>,
    pub channel: Option<String>,
    pub uploader: Option<String>,
    #[serde(default)]
    pub thumbnails: Vec<Thumbnail>,
    pub duration: Option<f64>,
    #[serde(default)]
    pub formats: Vec<FormatInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Thumbnail {
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FormatInfo {
    pub url: Option<String>,
    pub acodec: Option<String>,
    pub vcodec: Option<String>,
    /// Audio bitrate in kbit/s.
    pub abr: Option<f64>,
    /// Total bitrate, reported for muxed or audio-only formats alike.
    pub tbr: Option<f64>,
    pub ext: Option<String>,
}

impl FormatInfo {
    /// A format counts as audio when it carries an audio codec and no video
    /// track. Muxed formats are skipped so the proxy never ships video bytes.
    pub fn is_audio(&self) -> bool {
        let has_audio = self.acodec.as_deref().is_some_and(|codec| codec != "none");
        let has_video = self.vcodec.as_deref().is_some_and(|codec| codec != "none");
        has_audio && !has_video
    }

    pub fn bitrate(&self) -> f64 {
        self.abr.or(self.tbr).unwrap_or(0.0)
    }
}

/// Resolved playback descriptor for one video. The direct URL expires
/// upstream after a short window, which is why callers cache it briefly.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedStream {
    pub audio_url: String,
    pub title: String,
    pub artist: String,
    pub thumbnail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    pub video_id: String,
    /// Content type of the selected format, used by the stream proxy only.
    #[serde(skip)]
    pub mime_type: Option<String>,
}

/// Picks the highest-bitrate audio-only format. The sort is stable, so equal
/// bitrates keep the extractor's original ordering.
pub fn select_best_audio(formats: &[FormatInfo]) -> Option<&FormatInfo> {
    let mut audio: Vec<&FormatInfo> = formats.iter().filter(|format| format.is_audio()).collect();
    audio.sort_by(|a, b| b.bitrate().total_cmp(&a.bitrate()));
    audio.first().copied()
}

/// Resolves a video ID into a playable stream descriptor.
pub async fn resolve(
    extractor: &dyn AudioExtractor,
    video_id: &str,
) -> Result<ResolvedStream, ExtractError> {
    let info = extractor.fetch_video_info(video_id).await?;

    let best = select_best_audio(&info.formats).ok_or(ExtractError::NoAudioStream)?;
    let audio_url = best
        .url
        .clone()
        .filter(|url| !url.is_empty())
        .ok_or(ExtractError::NoAudioStream)?;

    let artist = info
        .channel
        .clone()
        .or_else(|| info.uploader.clone())
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| "Unknown Artist".to_string());

    // The thumbnails list is ordered worst-to-best; take the last usable one.
    let thumbnail = info
        .thumbnails
        .iter()
        .rev()
        .find_map(|thumb| thumb.url.clone())
        .unwrap_or_default();

    Ok(ResolvedStream {
        audio_url,
        title: info.title.clone().unwrap_or_default(),
        artist,
        thumbnail,
        duration: info.duration,
        video_id: video_id.to_string(),
        mime_type: best.ext.as_deref().map(audio_mime_for_ext),
    })
}

/// Maps a container extension to the Content-Type served by the proxy. The
/// selected format is audio-only, so generic guesses for `webm`/`mp4` are
/// corrected to their audio types.
pub fn audio_mime_for_ext(ext: &str) -> String {
    match ext.to_ascii_lowercase().as_str() {
        "webm" => "audio/webm".to_string(),
        "m4a" | "mp4" => "audio/mp4".to_string(),
        "opus" | "ogg" | "oga" => "audio/ogg".to_string(),
        "mp3" => "audio/mpeg".to_string(),
        other => mime_guess::from_ext(other)
            .first()
            .map(|mime| mime.to_string())
            .unwrap_or_else(|| "audio/webm".to_string()),
    }
}

/// Production extractor that shells out to yt-dlp.
pub struct YtDlpExtractor;

#[async_trait]
impl AudioExtractor for YtDlpExtractor {
    async fn fetch_video_info(&self, video_id: &str) -> Result<VideoInfo, ExtractError> {
        let url = watch_url(video_id);
        let output = tokio::task::spawn_blocking(move || {
            std::process::Command::new("yt-dlp")
                .arg("--dump-single-json")
                .arg("--skip-download")
                .arg("--no-warnings")
                .arg("--no-progress")
                .arg("--socket-timeout")
                .arg("15")
                .arg(&url)
                .output()
        })
        .await
        .map_err(|err| ExtractError::Extraction(anyhow!(err)))?
        .context("launching yt-dlp")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_extraction_failure(&stderr));
        }

        let info: VideoInfo =
            serde_json::from_slice(&output.stdout).context("parsing yt-dlp metadata")?;
        Ok(info)
    }
}

/// Sorts yt-dlp failures into the error taxonomy based on its stderr output.
fn classify_extraction_failure(stderr: &str) -> ExtractError {
    let lowered = stderr.to_ascii_lowercase();
    let missing = [
        "video unavailable",
        "is not available",
        "private video",
        "does not exist",
        "has been removed",
    ];
    if missing.iter().any(|needle| lowered.contains(needle)) {
        return ExtractError::NotFound;
    }
    let detail = stderr.trim();
    if detail.is_empty() {
        ExtractError::Extraction(anyhow!("yt-dlp failed without diagnostics"))
    } else {
        ExtractError::Extraction(anyhow!("yt-dlp failed: {detail}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CannedExtractor(VideoInfo);

    #[async_trait]
    impl AudioExtractor for CannedExtractor {
        async fn fetch_video_info(&self, _video_id: &str) -> Result<VideoInfo, ExtractError> {
            Ok(self.0.clone())
        }
    }

    fn audio_format(url: &str, abr: f64) -> FormatInfo {
        FormatInfo {
            url: Some(url.to_string()),
            acodec: Some("opus".into()),
            vcodec: Some("none".into()),
            abr: Some(abr),
            tbr: None,
            ext: Some("webm".into()),
        }
    }

    fn video_format(url: &str) -> FormatInfo {
        FormatInfo {
            url: Some(url.to_string()),
            acodec: Some("none".into()),
            vcodec: Some("avc1".into()),
            abr: None,
            tbr: Some(2500.0),
            ext: Some("mp4".into()),
        }
    }

    #[test]
    fn selects_highest_bitrate_audio() {
        let formats = vec![
            audio_format("low", 96.0),
            video_format("video"),
            audio_format("high", 160.0),
            audio_format("mid", 128.0),
        ];
        let best = select_best_audio(&formats).unwrap();
        assert_eq!(best.url.as_deref(), Some("high"));
        for format in formats.iter().filter(|format| format.is_audio()) {
            assert!(best.bitrate() >= format.bitrate());
        }
    }

    #[test]
    fn equal_bitrates_keep_original_order() {
        let formats = vec![audio_format("first", 128.0), audio_format("second", 128.0)];
        let best = select_best_audio(&formats).unwrap();
        assert_eq!(best.url.as_deref(), Some("first"));
    }

    #[test]
    fn missing_bitrate_falls_back_to_tbr_then_zero() {
        let mut no_abr = audio_format("tbr-only", 0.0);
        no_abr.abr = None;
        no_abr.tbr = Some(140.0);
        let mut bare = audio_format("bare", 0.0);
        bare.abr = None;
        assert_eq!(no_abr.bitrate(), 140.0);
        assert_eq!(bare.bitrate(), 0.0);
    }

    #[test]
    fn muxed_formats_are_not_audio() {
        let muxed = FormatInfo {
            acodec: Some("mp4a.40.2".into()),
            vcodec: Some("avc1".into()),
            ..FormatInfo::default()
        };
        assert!(!muxed.is_audio());
    }

    #[tokio::test]
    async fn resolve_errors_when_only_video_formats_exist() {
        let extractor = CannedExtractor(VideoInfo {
            formats: vec![video_format("a"), video_format("b")],
            ..VideoInfo::default()
        });
        let err = resolve(&extractor, "abc").await.unwrap_err();
        assert!(matches!(err, ExtractError::NoAudioStream));
    }

    #[tokio::test]
    async fn resolve_errors_when_winner_has_no_url() {
        let mut format = audio_format("", 128.0);
        format.url = None;
        let extractor = CannedExtractor(VideoInfo {
            formats: vec![format],
            ..VideoInfo::default()
        });
        let err = resolve(&extractor, "abc").await.unwrap_err();
        assert!(matches!(err, ExtractError::NoAudioStream));
    }

    #[tokio::test]
    async fn resolve_populates_metadata_and_fallbacks() {
        let extractor = CannedExtractor(VideoInfo {
            title: Some("Song".into()),
            channel: None,
            uploader: None,
            thumbnails: vec![
                Thumbnail {
                    url: Some("small.jpg".into()),
                },
                Thumbnail {
                    url: Some("large.jpg".into()),
                },
            ],
            duration: Some(213.0),
            formats: vec![audio_format("https://cdn/audio", 160.0)],
        });

        let stream = resolve(&extractor, "abc123").await.unwrap();
        assert_eq!(stream.audio_url, "https://cdn/audio");
        assert_eq!(stream.title, "Song");
        assert_eq!(stream.artist, "Unknown Artist");
        assert_eq!(stream.thumbnail, "large.jpg");
        assert_eq!(stream.duration, Some(213.0));
        assert_eq!(stream.video_id, "abc123");
        assert_eq!(stream.mime_type.as_deref(), Some("audio/webm"));
    }

    #[tokio::test]
    async fn resolve_prefers_channel_over_uploader() {
        let extractor = CannedExtractor(VideoInfo {
            channel: Some("Channel".into()),
            uploader: Some("Uploader".into()),
            formats: vec![audio_format("u", 1.0)],
            ..VideoInfo::default()
        });
        let stream = resolve(&extractor, "abc").await.unwrap();
        assert_eq!(stream.artist, "Channel");
    }

    #[test]
    fn classifies_unavailable_videos_as_not_found() {
        let err = classify_extraction_failure("ERROR: [youtube] dQw4: Video unavailable");
        assert!(matches!(err, ExtractError::NotFound));
        let err = classify_extraction_failure("ERROR: Private video. Sign in.");
        assert!(matches!(err, ExtractError::NotFound));
    }

    #[test]
    fn classifies_other_failures_as_extraction_errors() {
        let err = classify_extraction_failure("ERROR: unable to download webpage");
        assert!(matches!(err, ExtractError::Extraction(_)));
        assert!(err.to_string().contains("unable to download webpage"));
    }

    #[test]
    fn audio_payload_omits_mime_type() {
        let stream = ResolvedStream {
            audio_url: "u".into(),
            title: "t".into(),
            artist: "a".into(),
            thumbnail: String::new(),
            duration: Some(1.0),
            video_id: "id".into(),
            mime_type: Some("audio/webm".into()),
        };
        let value = serde_json::to_value(&stream).unwrap();
        assert_eq!(value["audioUrl"], "u");
        assert_eq!(value["videoId"], "id");
        assert!(value.get("mimeType").is_none());
        assert!(value.get("mime_type").is_none());
    }

    #[test]
    fn parses_ytdlp_dump() {
        let raw = serde_json::json!({
            "id": "abc",
            "title": "Track",
            "channel": "Artist",
            "duration": 180,
            "thumbnails": [{"url": "a.jpg", "height": 90}, {"url": "b.jpg", "height": 1080}],
            "formats": [
                {"url": "v", "acodec": "none", "vcodec": "vp9", "tbr": 1200.0, "ext": "webm"},
                {"url": "a", "acodec": "opus", "vcodec": "none", "abr": 130.5, "ext": "webm"}
            ],
            "webpage_url": "ignored"
        });
        let info: VideoInfo = serde_json::from_value(raw).unwrap();
        assert_eq!(info.duration, Some(180.0));
        assert_eq!(info.formats.len(), 2);
        let best = select_best_audio(&info.formats).unwrap();
        assert_eq!(best.url.as_deref(), Some("a"));
    }

    #[test]
    fn audio_mime_covers_common_containers() {
        assert_eq!(audio_mime_for_ext("webm"), "audio/webm");
        assert_eq!(audio_mime_for_ext("m4a"), "audio/mp4");
        assert_eq!(audio_mime_for_ext("OPUS"), "audio/ogg");
        assert_eq!(audio_mime_for_ext("mp3"), "audio/mpeg");
    }
}
