//! # Mood Analysis
//!
//! Ties feature extraction, the classifier and the heuristic together and
//! commits results to the track store.
//!
//! A model prediction is committed only when its confidence exceeds
//! [`AnalysisConfig::confidence_threshold`]. Otherwise the heuristic
//! suggestion is committed, unless fallback is disabled, in which case the
//! track keeps its current mood. Extracted features are always stored so the
//! next training run can use them.
//!
//! Batch analysis handles one track at a time and checks a cancellation flag
//! between tracks, so an interrupted run keeps everything committed so far.

use crate::classifier::{Classifier, Prediction, TrainingReport};
use crate::config::AnalysisConfig;
use crate::db::TrackStore;
use crate::decoder::AudioDecoder;
use crate::error::{Result, TretaError};
use crate::features::{FeatureExtractor, FeatureVector};
use crate::heuristic;
use crate::mood::MoodCategory;
use crate::track::Track;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// Where a committed mood came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoodSource {
    Model,
    Heuristic,
}

/// Mood chosen for a feature vector, if any.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoodDecision {
    pub prediction: Prediction,
    pub suggestion: MoodCategory,
    pub chosen: Option<(MoodCategory, MoodSource)>,
}

/// Result of analyzing one track.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackAnalysis {
    pub track_id: i64,
    pub features: FeatureVector,
    pub decision: MoodDecision,
}

/// Counts from a batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub analyzed: usize,
    /// Tracks that got a mood committed.
    pub labelled: usize,
    pub failed: usize,
    pub cancelled: bool,
}

/// Which tracks a batch run visits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchScope {
    All,
    Unlabelled,
}

/// Caller-owned analysis service over a store, a classifier and a decoder.
pub struct MoodAnalyzer<'a, S: TrackStore + ?Sized, C: Classifier, D: AudioDecoder> {
    store: &'a S,
    classifier: C,
    extractor: FeatureExtractor<D>,
    config: AnalysisConfig,
}

impl<'a, S: TrackStore + ?Sized, C: Classifier, D: AudioDecoder> MoodAnalyzer<'a, S, C, D> {
    pub fn new(store: &'a S, classifier: C, decoder: D, config: AnalysisConfig) -> Self {
        Self {
            store,
            classifier,
            extractor: FeatureExtractor::new(decoder),
            config,
        }
    }

    pub fn classifier(&self) -> &C {
        &self.classifier
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn extract_features(&self, path: &Path) -> Result<FeatureVector> {
        self.extractor.extract(path, self.config.max_duration_secs)
    }

    /// Extract and classify a file without touching the store.
    pub fn predict_mood(&self, path: &Path) -> Result<(FeatureVector, Prediction)> {
        let features = self.extract_features(path)?;
        let prediction = self.classifier.predict(&features);
        if !prediction.is_available() {
            debug!("No trained mood model, prediction unavailable");
        }
        Ok((features, prediction))
    }

    #[must_use]
    pub fn suggest_mood_for_features(&self, features: &FeatureVector) -> MoodCategory {
        heuristic::suggest(features)
    }

    /// Apply the acceptance policy to a feature vector.
    #[must_use]
    pub fn decide(&self, features: &FeatureVector) -> MoodDecision {
        let prediction = self.classifier.predict(features);
        let suggestion = heuristic::suggest(features);
        let chosen = match prediction.mood {
            Some(mood) if prediction.confidence > self.config.confidence_threshold => Some((mood, MoodSource::Model)),
            _ if self.config.heuristic_fallback => Some((suggestion, MoodSource::Heuristic)),
            _ => None,
        };
        MoodDecision {
            prediction,
            suggestion,
            chosen,
        }
    }

    /// Extract, store features, and commit a mood for one track.
    pub fn analyze_track(&self, track: &Track) -> Result<TrackAnalysis> {
        let path = track.file_path.clone().unwrap_or_else(PathBuf::new);
        if path.as_os_str().is_empty() {
            return Err(TretaError::FeatureExtraction {
                path,
                reason: format!("track {} has no audio file", track.id),
            });
        }

        let features = self.extract_features(&path)?;
        self.store.update_audio_features(track.id, &features)?;

        let decision = self.decide(&features);
        if let Some((mood, source)) = decision.chosen {
            self.store.update_track_mood(track.id, mood)?;
            info!(
                "Mood '{mood}' for {} ({source:?}, confidence {:.2})",
                track.display_name(),
                decision.prediction.confidence
            );
        } else {
            debug!("No confident mood for {}", track.display_name());
        }

        Ok(TrackAnalysis {
            track_id: track.id,
            features,
            decision,
        })
    }

    /// Analyze every track in `scope`, stopping early when `cancel` is set.
    /// Per-track failures are logged and counted; store and serialization
    /// errors abort the batch.
    pub fn analyze_all(&self, scope: BatchScope, cancel: &AtomicBool) -> Result<BatchReport> {
        let tracks: Vec<Track> = self
            .store
            .get_all_tracks()?
            .into_iter()
            .filter(|t| scope == BatchScope::All || t.mood.is_none())
            .collect();
        info!("Analyzing {} tracks", tracks.len());

        let mut report = BatchReport::default();
        for track in &tracks {
            if cancel.load(Ordering::SeqCst) {
                warn!("Analysis cancelled after {} tracks", report.analyzed + report.failed);
                report.cancelled = true;
                break;
            }
            match self.analyze_track(track) {
                Ok(analysis) => {
                    report.analyzed += 1;
                    if analysis.decision.chosen.is_some() {
                        report.labelled += 1;
                    }
                }
                Err(e) if e.is_per_track() => {
                    warn!("Failed to analyze {}: {e}", track.display_name());
                    report.failed += 1;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(report)
    }

    /// Train on every track that has both a mood and stored features.
    pub fn train_model(&mut self) -> Result<TrainingReport> {
        let samples: Vec<(FeatureVector, MoodCategory)> = self
            .store
            .get_all_tracks()?
            .iter()
            .filter_map(Track::training_sample)
            .collect();
        info!("Collected {} labelled samples for training", samples.len());

        let mut rng = StdRng::seed_from_u64(self.config.training_seed);
        self.classifier.train(&samples, &mut rng)
    }

    /// Track counts per mood.
    pub fn mood_distribution(&self) -> Result<BTreeMap<MoodCategory, usize>> {
        let mut distribution = BTreeMap::new();
        for mood in self.store.get_all_tracks()?.into_iter().filter_map(|t| t.mood) {
            *distribution.entry(mood).or_insert(0) += 1;
        }
        Ok(distribution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteTrackStore;
    use crate::decoder::DecodedAudio;
    use crate::track::NewTrack;
    use chrono::Utc;
    use rand::RngCore;

    /// Quiet 440 Hz tone for every path.
    struct ToneDecoder;

    impl AudioDecoder for ToneDecoder {
        fn decode(&self, path: &Path, _max: f64) -> Result<DecodedAudio> {
            if path.to_string_lossy().contains("broken") {
                return Err(TretaError::UnsupportedFormat {
                    path: path.to_path_buf(),
                    reason: "test".into(),
                });
            }
            let sample_rate = 22_050;
            let samples = (0..sample_rate)
                .map(|i| 0.05 * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / sample_rate as f32).sin())
                .collect();
            Ok(DecodedAudio {
                samples,
                sample_rate,
                channels: 1,
            })
        }
    }

    struct FixedClassifier(Prediction);

    impl Classifier for FixedClassifier {
        fn train(&mut self, samples: &[(FeatureVector, MoodCategory)], _rng: &mut dyn RngCore) -> Result<TrainingReport> {
            if samples.len() < 10 {
                return Err(TretaError::InsufficientData {
                    found: samples.len(),
                    required: 10,
                });
            }
            Ok(TrainingReport {
                samples: samples.len(),
                train_size: samples.len(),
                test_size: 0,
                classes: vec![samples[0].1],
                accuracy: None,
                trained_at: Utc::now(),
            })
        }

        fn predict(&self, _features: &FeatureVector) -> Prediction {
            self.0
        }

        fn save(&self) -> Result<()> {
            Ok(())
        }

        fn load(&mut self) -> Result<bool> {
            Ok(false)
        }

        fn is_trained(&self) -> bool {
            self.0.is_available()
        }
    }

    fn confident(mood: MoodCategory, confidence: f64) -> FixedClassifier {
        FixedClassifier(Prediction {
            mood: Some(mood),
            confidence,
        })
    }

    fn library(store: &SqliteTrackStore) -> Vec<i64> {
        vec![
            store.add_track(&NewTrack::new("one", "a").with_file_path("/music/one.mp3")).unwrap(),
            store.add_track(&NewTrack::new("two", "b").with_file_path("/music/broken.mp3")).unwrap(),
            store.add_track(&NewTrack::new("three", "c")).unwrap(),
        ]
    }

    #[test]
    fn test_confident_prediction_is_committed() {
        let store = SqliteTrackStore::open_in_memory().unwrap();
        let ids = library(&store);
        let analyzer = MoodAnalyzer::new(&store, confident(MoodCategory::Romantic, 0.9), ToneDecoder, AnalysisConfig::default());

        let track = store.get_track(ids[0]).unwrap().unwrap();
        let analysis = analyzer.analyze_track(&track).unwrap();
        assert_eq!(analysis.decision.chosen, Some((MoodCategory::Romantic, MoodSource::Model)));

        let stored = store.get_track(ids[0]).unwrap().unwrap();
        assert_eq!(stored.mood, Some(MoodCategory::Romantic));
        assert_eq!(stored.audio_features, Some(analysis.features));
    }

    #[test]
    fn test_unsure_prediction_falls_back_to_heuristic() {
        let store = SqliteTrackStore::open_in_memory().unwrap();
        let ids = library(&store);
        let analyzer = MoodAnalyzer::new(&store, confident(MoodCategory::Romantic, 0.6), ToneDecoder, AnalysisConfig::default());

        let track = store.get_track(ids[0]).unwrap().unwrap();
        let analysis = analyzer.analyze_track(&track).unwrap();
        let suggestion = heuristic::suggest(&analysis.features);
        assert_eq!(analysis.decision.chosen, Some((suggestion, MoodSource::Heuristic)));
        assert_eq!(store.get_track(ids[0]).unwrap().unwrap().mood, Some(suggestion));
    }

    #[test]
    fn test_without_fallback_nothing_is_committed() {
        let store = SqliteTrackStore::open_in_memory().unwrap();
        let ids = library(&store);
        let config = AnalysisConfig {
            heuristic_fallback: false,
            ..AnalysisConfig::default()
        };
        let analyzer = MoodAnalyzer::new(&store, FixedClassifier(Prediction::UNAVAILABLE), ToneDecoder, config);

        let track = store.get_track(ids[0]).unwrap().unwrap();
        let analysis = analyzer.analyze_track(&track).unwrap();
        assert!(analysis.decision.chosen.is_none());
        let stored = store.get_track(ids[0]).unwrap().unwrap();
        assert!(stored.mood.is_none());
        assert!(stored.audio_features.is_some());
    }

    /// Library store whose feature writes always fail.
    struct ReadOnlyStore(SqliteTrackStore);

    impl TrackStore for ReadOnlyStore {
        fn get_all_tracks(&self) -> Result<Vec<Track>> {
            self.0.get_all_tracks()
        }

        fn get_track(&self, track_id: i64) -> Result<Option<Track>> {
            self.0.get_track(track_id)
        }

        fn update_track_mood(&self, track_id: i64, mood: MoodCategory) -> Result<()> {
            self.0.update_track_mood(track_id, mood)
        }

        fn update_audio_features(&self, _track_id: i64, _features: &FeatureVector) -> Result<()> {
            Err(TretaError::Store(rusqlite::Error::QueryReturnedNoRows))
        }

        fn replace_queue(&self, track_ids: &[i64], queue_type: &str) -> Result<()> {
            self.0.replace_queue(track_ids, queue_type)
        }

        fn get_queue(&self, queue_type: &str) -> Result<Vec<Track>> {
            self.0.get_queue(queue_type)
        }

        fn remove_from_queue(&self, track_id: i64, queue_type: &str) -> Result<bool> {
            self.0.remove_from_queue(track_id, queue_type)
        }
    }

    #[test]
    fn test_batch_aborts_on_store_error() {
        let inner = SqliteTrackStore::open_in_memory().unwrap();
        library(&inner);
        let store = ReadOnlyStore(inner);
        let analyzer = MoodAnalyzer::new(&store, confident(MoodCategory::Calm, 0.95), ToneDecoder, AnalysisConfig::default());

        let err = analyzer.analyze_all(BatchScope::All, &AtomicBool::new(false)).unwrap_err();
        assert!(matches!(err, TretaError::Store(_)));
        assert!(store.get_all_tracks().unwrap().iter().all(|t| t.mood.is_none()));
    }

    #[test]
    fn test_batch_counts_failures_and_continues() {
        let store = SqliteTrackStore::open_in_memory().unwrap();
        library(&store);
        let analyzer = MoodAnalyzer::new(&store, confident(MoodCategory::Calm, 0.95), ToneDecoder, AnalysisConfig::default());

        let report = analyzer.analyze_all(BatchScope::All, &AtomicBool::new(false)).unwrap();
        assert_eq!(
            report,
            BatchReport {
                analyzed: 1,
                labelled: 1,
                failed: 2,
                cancelled: false,
            }
        );
        assert_eq!(analyzer.mood_distribution().unwrap().get(&MoodCategory::Calm), Some(&1));
    }

    #[test]
    fn test_batch_unlabelled_scope_skips_labelled_tracks() {
        let store = SqliteTrackStore::open_in_memory().unwrap();
        store
            .add_track(&NewTrack::new("done", "a").with_file_path("/x.mp3").with_mood(MoodCategory::Sad))
            .unwrap();
        store.add_track(&NewTrack::new("todo", "b").with_file_path("/y.mp3")).unwrap();
        let analyzer = MoodAnalyzer::new(&store, confident(MoodCategory::Happy, 0.9), ToneDecoder, AnalysisConfig::default());

        let report = analyzer.analyze_all(BatchScope::Unlabelled, &AtomicBool::new(false)).unwrap();
        assert_eq!(report.analyzed, 1);
        let dist = analyzer.mood_distribution().unwrap();
        assert_eq!(dist.get(&MoodCategory::Sad), Some(&1));
        assert_eq!(dist.get(&MoodCategory::Happy), Some(&1));
    }

    #[test]
    fn test_cancelled_batch_stops_before_next_track() {
        let store = SqliteTrackStore::open_in_memory().unwrap();
        library(&store);
        let analyzer = MoodAnalyzer::new(&store, confident(MoodCategory::Calm, 0.95), ToneDecoder, AnalysisConfig::default());

        let report = analyzer.analyze_all(BatchScope::All, &AtomicBool::new(true)).unwrap();
        assert!(report.cancelled);
        assert_eq!(report.analyzed + report.failed, 0);
        assert!(analyzer.mood_distribution().unwrap().is_empty());
    }

    #[test]
    fn test_train_requires_features_and_labels() {
        let store = SqliteTrackStore::open_in_memory().unwrap();
        for i in 0..12 {
            let id = store
                .add_track(&NewTrack::new(format!("s{i}"), "a").with_mood(MoodCategory::Chill))
                .unwrap();
            if i < 5 {
                store.update_audio_features(id, &FeatureVector::default()).unwrap();
            }
        }
        let mut analyzer = MoodAnalyzer::new(&store, FixedClassifier(Prediction::UNAVAILABLE), ToneDecoder, AnalysisConfig::default());
        assert!(matches!(
            analyzer.train_model(),
            Err(TretaError::InsufficientData { found: 5, .. })
        ));

        for track in store.get_all_tracks().unwrap() {
            store.update_audio_features(track.id, &FeatureVector::default()).unwrap();
        }
        assert_eq!(analyzer.train_model().unwrap().samples, 12);
    }

    #[test]
    fn test_predict_mood_without_model() {
        let store = SqliteTrackStore::open_in_memory().unwrap();
        let analyzer = MoodAnalyzer::new(&store, FixedClassifier(Prediction::UNAVAILABLE), ToneDecoder, AnalysisConfig::default());
        let (features, prediction) = analyzer.predict_mood(Path::new("any.wav")).unwrap();
        assert_eq!(prediction, Prediction::UNAVAILABLE);
        assert_eq!(analyzer.suggest_mood_for_features(&features), heuristic::suggest(&features));
    }
}
