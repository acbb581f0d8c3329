//! Mood labels and the single-hop similarity table used to widen mood queues.

use crate::error::TretaError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed set of mood labels a track can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MoodCategory {
    Happy,
    Sad,
    Energetic,
    Calm,
    Angry,
    Romantic,
    Melancholic,
    Upbeat,
    Chill,
    Intense,
}

impl MoodCategory {
    pub const ALL: [MoodCategory; 10] = [
        Self::Happy,
        Self::Sad,
        Self::Energetic,
        Self::Calm,
        Self::Angry,
        Self::Romantic,
        Self::Melancholic,
        Self::Upbeat,
        Self::Chill,
        Self::Intense,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Happy => "happy",
            Self::Sad => "sad",
            Self::Energetic => "energetic",
            Self::Calm => "calm",
            Self::Angry => "angry",
            Self::Romantic => "romantic",
            Self::Melancholic => "melancholic",
            Self::Upbeat => "upbeat",
            Self::Chill => "chill",
            Self::Intense => "intense",
        }
    }

    /// Moods one hop away from `self`, in preference order.
    #[must_use]
    pub fn similar(self) -> &'static [MoodCategory] {
        MOOD_SIMILARITY
            .iter()
            .find(|(mood, _)| *mood == self)
            .map(|(_, similar)| *similar)
            .unwrap_or(&[])
    }
}

impl fmt::Display for MoodCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MoodCategory {
    type Err = TretaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|mood| mood.as_str() == needle)
            .ok_or_else(|| TretaError::UnknownMood(s.to_string()))
    }
}

use MoodCategory::{Angry, Calm, Chill, Energetic, Happy, Intense, Melancholic, Romantic, Sad, Upbeat};

/// Adjacency table for mood queue expansion. Not transitive.
pub static MOOD_SIMILARITY: [(MoodCategory, &[MoodCategory]); 10] = [
    (Happy, &[Upbeat, Energetic, Romantic]),
    (Sad, &[Melancholic, Calm]),
    (Energetic, &[Upbeat, Intense, Happy]),
    (Calm, &[Chill, Romantic, Melancholic]),
    (Angry, &[Intense, Energetic]),
    (Romantic, &[Calm, Happy, Chill]),
    (Melancholic, &[Sad, Calm]),
    (Upbeat, &[Happy, Energetic]),
    (Chill, &[Calm, Romantic]),
    (Intense, &[Angry, Energetic]),
];
