use crate::features::FeatureVector;
use crate::mood::MoodCategory;
use chrono::{DateTime, Utc};
use std::path::PathBuf;

/// A downloaded track as stored in the library.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub id: i64,
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub source: String,
    pub url: Option<String>,
    pub file_path: Option<PathBuf>,
    pub mood: Option<MoodCategory>,
    /// Length in seconds.
    pub duration: Option<f64>,
    pub file_hash: Option<String>,
    pub external_id: Option<String>,
    pub play_count: u32,
    pub downloaded_at: DateTime<Utc>,
    pub last_played: Option<DateTime<Utc>>,
    pub audio_features: Option<FeatureVector>,
}

impl Track {
    /// "Artist - Title"
    #[must_use]
    pub fn display_name(&self) -> String {
        format!("{} - {}", self.artist, self.title)
    }

    /// Has a complete feature vector and a mood label, so it can train a model.
    #[must_use]
    pub fn training_sample(&self) -> Option<(FeatureVector, MoodCategory)> {
        Some((self.audio_features?, self.mood?))
    }
}

/// Fields supplied when a track enters the library.
#[derive(Debug, Clone, Default)]
pub struct NewTrack {
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub source: String,
    pub url: Option<String>,
    pub file_path: Option<PathBuf>,
    pub mood: Option<MoodCategory>,
    pub duration: Option<f64>,
    pub file_hash: Option<String>,
    pub external_id: Option<String>,
    pub play_count: u32,
    /// Defaults to the insertion time.
    pub downloaded_at: Option<DateTime<Utc>>,
    pub last_played: Option<DateTime<Utc>>,
}

impl NewTrack {
    pub fn new(title: impl Into<String>, artist: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            artist: artist.into(),
            source: "local".to_string(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_mood(mut self, mood: MoodCategory) -> Self {
        self.mood = Some(mood);
        self
    }

    #[must_use]
    pub fn with_play_count(mut self, play_count: u32) -> Self {
        self.play_count = play_count;
        self
    }

    #[must_use]
    pub fn with_file_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn downloaded(mut self, at: DateTime<Utc>) -> Self {
        self.downloaded_at = Some(at);
        self
    }

    #[must_use]
    pub fn last_played(mut self, at: DateTime<Utc>) -> Self {
        self.last_played = Some(at);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_training_sample_needs_both_parts() {
        let mut track = Track {
            id: 1,
            title: "Song".into(),
            artist: "Band".into(),
            album: None,
            source: "local".into(),
            url: None,
            file_path: None,
            mood: Some(MoodCategory::Calm),
            duration: None,
            file_hash: None,
            external_id: None,
            play_count: 0,
            downloaded_at: Utc::now(),
            last_played: None,
            audio_features: None,
        };
        assert!(track.training_sample().is_none());
        track.audio_features = Some(FeatureVector::default());
        assert_eq!(track.training_sample().map(|(_, m)| m), Some(MoodCategory::Calm));
        assert_eq!(track.display_name(), "Band - Song");
    }
}
