//! Rule-based mood suggestion used when no trained model is confident.
//!
//! The rules are data: an ordered table of predicates over tempo, energy
//! (`rmse_mean`) and brightness (`spectral_centroid_mean`). The first matching
//! rule wins and the last rule always matches.

use crate::features::FeatureVector;
use crate::mood::MoodCategory;

/// One entry of the rule cascade.
#[derive(Clone, Copy)]
pub struct HeuristicRule {
    pub name: &'static str,
    pub matches: fn(&FeatureVector) -> bool,
    pub mood: MoodCategory,
}

impl std::fmt::Debug for HeuristicRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeuristicRule")
            .field("name", &self.name)
            .field("mood", &self.mood)
            .finish_non_exhaustive()
    }
}

fn energy(f: &FeatureVector) -> f64 {
    f.rmse_mean
}

fn brightness(f: &FeatureVector) -> f64 {
    f.spectral_centroid_mean
}

pub static HEURISTIC_RULES: [HeuristicRule; 8] = [
    HeuristicRule {
        name: "fast and loud",
        matches: |f| f.tempo > 140.0 && energy(f) > 0.15,
        mood: MoodCategory::Energetic,
    },
    HeuristicRule {
        name: "quick and lively",
        matches: |f| f.tempo > 120.0 && energy(f) > 0.12,
        mood: MoodCategory::Upbeat,
    },
    HeuristicRule {
        name: "slow and quiet",
        matches: |f| f.tempo < 80.0 && energy(f) < 0.08,
        mood: MoodCategory::Sad,
    },
    HeuristicRule {
        name: "slow and dark",
        matches: |f| f.tempo < 100.0 && brightness(f) < 1500.0,
        mood: MoodCategory::Melancholic,
    },
    HeuristicRule {
        name: "loud",
        matches: |f| energy(f) > 0.2,
        mood: MoodCategory::Intense,
    },
    HeuristicRule {
        name: "bright and moving",
        matches: |f| f.tempo > 100.0 && brightness(f) > 2500.0,
        mood: MoodCategory::Happy,
    },
    HeuristicRule {
        name: "quiet",
        matches: |f| energy(f) < 0.1,
        mood: MoodCategory::Calm,
    },
    HeuristicRule {
        name: "fallback",
        matches: |_| true,
        mood: MoodCategory::Chill,
    },
];

/// First rule in [`HEURISTIC_RULES`] that matches `features`.
#[must_use]
pub fn matching_rule(features: &FeatureVector) -> &'static HeuristicRule {
    HEURISTIC_RULES
        .iter()
        .find(|rule| (rule.matches)(features))
        .unwrap_or(&HEURISTIC_RULES[HEURISTIC_RULES.len() - 1])
}

/// Suggest a mood from features. Never fails.
#[must_use]
pub fn suggest(features: &FeatureVector) -> MoodCategory {
    matching_rule(features).mood
}
