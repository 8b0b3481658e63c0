#![forbid(unsafe_code)]

//! Heuristic scoring for related-track suggestions.
//!
//! Candidates come from the related-video search, which already applies the
//! platform's own relevance model, so every candidate starts with a flat base
//! credit. Tag overlap with the seed video, mood keyword matches and a
//! log-scaled popularity bonus differentiate them from there.

use serde::Serialize;
use std::collections::HashSet;

use crate::youtube::VideoItem;

pub const MAX_RELATED: usize = 10;

const BASE_SCORE: f64 = 20.0;
const TAG_OVERLAP_WEIGHT: f64 = 5.0;
const MOOD_KEYWORD_WEIGHT: f64 = 8.0;
const POPULARITY_CAP: f64 = 10.0;

/// Listening-context filter biasing the score via keyword matching. Unknown
/// mode strings map to `Default`, which carries no keywords.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mood {
    Chill,
    Workout,
    Romantic,
    Party,
    Default,
}

impl Mood {
    pub fn parse(mode: &str) -> Self {
        match mode.trim().to_ascii_lowercase().as_str() {
            "chill" => Self::Chill,
            "workout" => Self::Workout,
            "romantic" => Self::Romantic,
            "party" => Self::Party,
            _ => Self::Default,
        }
    }

    pub fn keywords(self) -> &'static [&'static str] {
        match self {
            Self::Chill => &[
                "acoustic", "lofi", "calm", "soft", "relax", "peaceful", "ambient",
            ],
            Self::Workout => &[
                "energetic", "fast", "dance", "club", "party", "pump", "gym", "hype",
            ],
            Self::Romantic => &[
                "love", "romantic", "acoustic", "slow", "soul", "ballad", "heart",
            ],
            Self::Party => &["party", "dance", "club", "remix", "edm", "bass", "drop"],
            Self::Default => &[],
        }
    }
}

/// Scored suggestion returned by `/related`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelatedTrack {
    pub video_id: String,
    pub title: String,
    pub thumbnail: String,
    pub channel: String,
    pub duration: String,
    pub views: String,
    pub score: f64,
}

/// Composite relevance score. Always finite and non-negative: every term is
/// a non-negative bonus and the popularity term is clamped.
pub fn score_candidate(seed_tags: &[String], mood: Mood, candidate: &VideoItem) -> f64 {
    let mut score = BASE_SCORE;

    let tags = candidate.tags();
    let overlap = seed_tags.iter().filter(|tag| tags.contains(*tag)).count();
    score += overlap as f64 * TAG_OVERLAP_WEIGHT;

    let mut text = candidate.title().to_string();
    text.push(' ');
    text.push_str(&tags.join(" "));
    let text = text.to_lowercase();
    let matches = mood
        .keywords()
        .iter()
        .filter(|&&keyword| text.contains(keyword))
        .count();
    score += matches as f64 * MOOD_KEYWORD_WEIGHT;

    score += (candidate.view_count() + 1.0).log10().min(POPULARITY_CAP);

    score
}

/// Scores, deduplicates by video ID, sorts descending and caps the list.
/// The sort is stable, so equal scores keep the search's candidate order.
pub fn rank_candidates(
    seed_tags: &[String],
    mood: Mood,
    candidates: &[VideoItem],
) -> Vec<RelatedTrack> {
    let mut seen = HashSet::new();
    let mut ranked: Vec<RelatedTrack> = candidates
        .iter()
        .filter(|candidate| seen.insert(candidate.id.clone()))
        .map(|candidate| RelatedTrack {
            video_id: candidate.id.clone(),
            title: candidate.title().to_string(),
            thumbnail: candidate.thumbnail().to_string(),
            channel: candidate.channel().to_string(),
            duration: candidate.duration().to_string(),
            views: candidate.views().to_string(),
            score: score_candidate(seed_tags, mood, candidate),
        })
        .collect();

    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
    ranked.truncate(MAX_RELATED);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::youtube::{Snippet, Statistics, VideoItem};

    fn candidate(id: &str, title: &str, tags: &[&str], views: &str) -> VideoItem {
        VideoItem {
            id: id.to_string(),
            snippet: Some(Snippet {
                title: Some(title.to_string()),
                tags: tags.iter().map(|tag| tag.to_string()).collect(),
                channel_title: Some("Channel".into()),
                thumbnails: None,
            }),
            content_details: None,
            statistics: Some(Statistics {
                view_count: Some(views.to_string()),
            }),
        }
    }

    #[test]
    fn mood_parse_is_case_insensitive_and_defaults() {
        assert_eq!(Mood::parse("chill"), Mood::Chill);
        assert_eq!(Mood::parse("PARTY"), Mood::Party);
        assert_eq!(Mood::parse(" workout "), Mood::Workout);
        assert_eq!(Mood::parse("default"), Mood::Default);
        assert_eq!(Mood::parse("unknown-mode"), Mood::Default);
        assert!(Mood::parse("unknown-mode").keywords().is_empty());
    }

    #[test]
    fn score_combines_all_four_factors() {
        // Base 20 + one shared tag (5) + two romantic keywords in the text
        // blob, "love" and "acoustic" (16) + log10(999 + 1) = 3.
        let seed_tags = vec!["acoustic".to_string(), "love".to_string()];
        let item = candidate("x", "Love Song", &["acoustic"], "999");
        let score = score_candidate(&seed_tags, Mood::Romantic, &item);
        assert!((score - 44.0).abs() < 1e-9);
    }

    #[test]
    fn unknown_mood_contributes_nothing() {
        let item = candidate("x", "Love Song", &["acoustic"], "0");
        let score = score_candidate(&[], Mood::Default, &item);
        assert!((score - 20.0).abs() < 1e-9);
    }

    #[test]
    fn popularity_bonus_is_clamped() {
        let item = candidate("x", "t", &[], "10000000000000000");
        let score = score_candidate(&[], Mood::Default, &item);
        assert!((score - 30.0).abs() < 1e-9);
    }

    #[test]
    fn unparseable_views_count_as_zero() {
        let item = candidate("x", "t", &[], "not-a-number");
        let score = score_candidate(&[], Mood::Default, &item);
        assert!((score - 20.0).abs() < 1e-9);
    }

    #[test]
    fn ranking_sorts_descending_and_caps_at_ten() {
        let candidates: Vec<VideoItem> = (0..12u32)
            .map(|n| {
                candidate(
                    &format!("id{n}"),
                    if n % 2 == 0 { "party remix" } else { "plain" },
                    &[],
                    &format!("{}", 10u64.pow(n % 5)),
                )
            })
            .collect();

        let ranked = rank_candidates(&[], Mood::Party, &candidates);
        assert_eq!(ranked.len(), MAX_RELATED);
        for window in ranked.windows(2) {
            assert!(window[0].score >= window[1].score);
        }
        // Every scored entry is finite and at least the base credit.
        for track in &ranked {
            assert!(track.score.is_finite());
            assert!(track.score >= 20.0);
        }
    }

    #[test]
    fn ranking_deduplicates_by_video_id() {
        let candidates = vec![
            candidate("dup", "a", &[], "10"),
            candidate("dup", "b", &[], "10"),
            candidate("other", "c", &[], "10"),
        ];
        let ranked = rank_candidates(&[], Mood::Default, &candidates);
        assert_eq!(ranked.len(), 2);
        assert!(ranked.iter().any(|track| track.video_id == "dup"));
        assert!(ranked.iter().any(|track| track.video_id == "other"));
    }

    #[test]
    fn equal_scores_keep_candidate_order() {
        let candidates = vec![
            candidate("first", "same", &[], "10"),
            candidate("second", "same", &[], "10"),
        ];
        let ranked = rank_candidates(&[], Mood::Default, &candidates);
        assert_eq!(ranked[0].video_id, "first");
        assert_eq!(ranked[1].video_id, "second");
    }

    #[test]
    fn related_track_serializes_camel_case() {
        let track = RelatedTrack {
            video_id: "abc".into(),
            title: "t".into(),
            thumbnail: "th".into(),
            channel: "ch".into(),
            duration: "PT3M".into(),
            views: "10".into(),
            score: 23.0,
        };
        let value = serde_json::to_value(&track).unwrap();
        assert_eq!(value["videoId"], "abc");
        assert_eq!(value["views"], "10");
        assert_eq!(value["score"], 23.0);
    }
}
