//! Supervised mood classifier: feature scaling, a balanced random forest and
//! the on-disk artifacts that carry a trained model between runs.

use crate::error::{Result, TretaError};
use crate::features::{FeatureVector, FEATURE_COUNT, FEATURE_NAMES};
use crate::forest::{argmax, DecisionTree, ForestParams, RandomForest};
use crate::mood::MoodCategory;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use rand::seq::SliceRandom;
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Minimum labelled samples accepted by [`Classifier::train`].
pub const MIN_TRAINING_SAMPLES: usize = 10;
/// Share of each class held out for evaluation.
pub const TEST_FRACTION: f64 = 0.2;

pub const MODEL_FILE: &str = "mood_model.json";
pub const SCALER_FILE: &str = "mood_scaler.json";

/// Outcome of [`Classifier::predict`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub mood: Option<MoodCategory>,
    pub confidence: f64,
}

impl Prediction {
    /// Returned when no model is loaded.
    pub const UNAVAILABLE: Self = Self {
        mood: None,
        confidence: 0.0,
    };

    #[must_use]
    pub fn is_available(&self) -> bool {
        self.mood.is_some()
    }
}

/// Summary of a successful training run.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingReport {
    pub samples: usize,
    pub train_size: usize,
    pub test_size: usize,
    pub classes: Vec<MoodCategory>,
    /// Held-out accuracy, `None` when the split left nothing to test on.
    pub accuracy: Option<f64>,
    pub trained_at: DateTime<Utc>,
}

/// Capability interface for mood models.
pub trait Classifier {
    /// Fit on labelled samples and persist the result.
    ///
    /// # Errors
    ///
    /// [`TretaError::InsufficientData`] below [`MIN_TRAINING_SAMPLES`], or a
    /// persistence error when the fitted model could not be saved. Any
    /// previously loaded model stays active on failure.
    fn train(&mut self, samples: &[(FeatureVector, MoodCategory)], rng: &mut dyn RngCore) -> Result<TrainingReport>;

    /// [`Prediction::UNAVAILABLE`] when untrained.
    fn predict(&self, features: &FeatureVector) -> Prediction;

    /// Write the current model.
    ///
    /// # Errors
    ///
    /// Fails when there is no model or the artifacts cannot be written.
    fn save(&self) -> Result<()>;

    /// Load persisted artifacts. `Ok(false)` when none exist.
    ///
    /// # Errors
    ///
    /// Fails on unreadable or inconsistent artifacts.
    fn load(&mut self) -> Result<bool>;

    fn is_trained(&self) -> bool;
}

/// Per-column standardisation to zero mean and unit variance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl StandardScaler {
    /// Constant columns get a scale of 1.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fit(rows: &[Vec<f64>]) -> Self {
        let width = rows.first().map_or(0, Vec::len);
        let n = rows.len().max(1) as f64;
        let mut mean = vec![0.0; width];
        for row in rows {
            for (m, v) in mean.iter_mut().zip(row) {
                *m += v / n;
            }
        }
        let mut variance = vec![0.0; width];
        for row in rows {
            for ((var, v), m) in variance.iter_mut().zip(row).zip(&mean) {
                *var += (v - m).powi(2) / n;
            }
        }
        let scale = variance
            .into_iter()
            .map(|var| {
                let std = var.sqrt();
                if std > 0.0 {
                    std
                } else {
                    1.0
                }
            })
            .collect();
        Self { mean, scale }
    }

    #[must_use]
    pub fn transform(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(v, (m, s))| (v - m) / s)
            .collect()
    }
}

/// Split sample indices into `(train, test)` keeping each class's share.
///
/// Every class holds out `round(count * TEST_FRACTION)` samples, but always
/// keeps at least one in the training half.
pub fn stratified_split<R: rand::Rng + ?Sized>(labels: &[MoodCategory], rng: &mut R) -> (Vec<usize>, Vec<usize>) {
    let mut by_class: BTreeMap<MoodCategory, Vec<usize>> = BTreeMap::new();
    for (i, label) in labels.iter().enumerate() {
        by_class.entry(*label).or_default().push(i);
    }

    let mut train = Vec::with_capacity(labels.len());
    let mut test = Vec::new();
    for mut indices in by_class.into_values() {
        indices.shuffle(rng);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
        let n_test = ((indices.len() as f64 * TEST_FRACTION).round() as usize).min(indices.len() - 1);
        test.extend_from_slice(&indices[..n_test]);
        train.extend_from_slice(&indices[n_test..]);
    }
    (train, test)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ModelArtifact {
    trained_at: DateTime<Utc>,
    feature_names: Vec<String>,
    classes: Vec<MoodCategory>,
    accuracy: Option<f64>,
    forest: RandomForest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ScalerArtifact {
    trained_at: DateTime<Utc>,
    scaler: StandardScaler,
}

#[derive(Debug, Clone)]
struct TrainedModel {
    model: ModelArtifact,
    scaler: ScalerArtifact,
}

impl TrainedModel {
    fn validate(self) -> Result<Self> {
        if self.model.trained_at != self.scaler.trained_at {
            return Err(TretaError::ModelFormat(format!(
                "model ({}) and scaler ({}) come from different training runs",
                self.model.trained_at, self.scaler.trained_at
            )));
        }
        if self.model.feature_names != FEATURE_NAMES {
            return Err(TretaError::ModelFormat("feature schema mismatch".to_string()));
        }
        if self.model.classes.is_empty() || self.model.classes.len() != self.model.forest.n_classes() {
            return Err(TretaError::ModelFormat("class list does not match forest".to_string()));
        }
        if self.model.forest.n_features() != FEATURE_COUNT
            || self.scaler.scaler.mean.len() != FEATURE_COUNT
            || self.scaler.scaler.scale.len() != FEATURE_COUNT
            || !self.model.forest.is_well_formed()
        {
            return Err(TretaError::ModelFormat("dimension mismatch".to_string()));
        }
        Ok(self)
    }
}

/// Random-forest mood model persisted as `mood_model.json` + `mood_scaler.json`.
#[derive(Debug)]
pub struct MoodClassifier {
    model_dir: PathBuf,
    params: ForestParams,
    state: Option<TrainedModel>,
}

impl MoodClassifier {
    /// Create a classifier rooted at `model_dir`, loading artifacts if present.
    /// An unreadable model is logged and ignored.
    pub fn new(model_dir: impl Into<PathBuf>, n_estimators: usize) -> Self {
        let mut classifier = Self {
            model_dir: model_dir.into(),
            params: ForestParams {
                n_estimators,
                ..ForestParams::default()
            },
            state: None,
        };
        match classifier.load() {
            Ok(true) => info!("Loaded mood model from {}", classifier.model_dir.display()),
            Ok(false) => debug!("No mood model in {}", classifier.model_dir.display()),
            Err(e) => warn!("Ignoring mood model: {e}"),
        }
        classifier
    }

    #[must_use]
    pub fn model_path(&self) -> PathBuf {
        self.model_dir.join(MODEL_FILE)
    }

    #[must_use]
    pub fn scaler_path(&self) -> PathBuf {
        self.model_dir.join(SCALER_FILE)
    }

    #[must_use]
    pub fn trained_at(&self) -> Option<DateTime<Utc>> {
        self.state.as_ref().map(|s| s.model.trained_at)
    }

    #[must_use]
    pub fn classes(&self) -> &[MoodCategory] {
        self.state.as_ref().map_or(&[], |s| s.model.classes.as_slice())
    }

    /// Replace both artifacts. If the scaler cannot be written the previous
    /// model file is put back, so the pair on disk always matches.
    fn write_artifacts(&self, state: &TrainedModel) -> Result<()> {
        fs::create_dir_all(&self.model_dir).map_err(|source| TretaError::Persistence {
            path: self.model_dir.clone(),
            source,
        })?;
        // Stage both files before replacing either
        let model_tmp = self.stage(&state.model)?;
        let scaler_tmp = self.stage(&state.scaler)?;
        let model_path = self.model_path();
        let previous_model = self.backup(&model_path)?;

        persist(model_tmp, &model_path)?;
        if let Err(e) = persist(scaler_tmp, &self.scaler_path()) {
            self.restore(previous_model, &model_path);
            return Err(e);
        }
        debug!("Wrote mood model artifacts to {}", self.model_dir.display());
        Ok(())
    }

    /// Copy of the current model artifact, if there is one.
    fn backup(&self, model_path: &Path) -> Result<Option<NamedTempFile>> {
        if !model_path.is_file() {
            return Ok(None);
        }
        let persistence = |source| TretaError::Persistence {
            path: model_path.to_path_buf(),
            source,
        };
        let tmp = NamedTempFile::new_in(&self.model_dir).map_err(persistence)?;
        fs::copy(model_path, tmp.path()).map_err(persistence)?;
        Ok(Some(tmp))
    }

    /// Put the previous model back after a half-finished write.
    fn restore(&self, previous: Option<NamedTempFile>, model_path: &Path) {
        let restored = match previous {
            Some(tmp) => persist(tmp, model_path),
            None => fs::remove_file(model_path).map_err(|source| TretaError::Persistence {
                path: model_path.to_path_buf(),
                source,
            }),
        };
        match restored {
            Ok(()) => warn!("Scaler write failed, model artifact rolled back"),
            Err(e) => error!("Could not restore previous model in {}: {e}", self.model_dir.display()),
        }
    }

    fn stage<T: Serialize>(&self, value: &T) -> Result<NamedTempFile> {
        let persistence = |source| TretaError::Persistence {
            path: self.model_dir.clone(),
            source,
        };
        let tmp = NamedTempFile::new_in(&self.model_dir).map_err(persistence)?;
        let mut writer = BufWriter::new(tmp.as_file());
        serde_json::to_writer(&mut writer, value)?;
        writer.flush().map_err(persistence)?;
        drop(writer);
        Ok(tmp)
    }
}

fn persist(tmp: NamedTempFile, path: &Path) -> Result<()> {
    tmp.persist(path).map_err(|e| TretaError::Persistence {
        path: path.to_path_buf(),
        source: e.error,
    })?;
    Ok(())
}

fn read_artifact<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path).map_err(|source| TretaError::Persistence {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

impl Classifier for MoodClassifier {
    fn train(&mut self, samples: &[(FeatureVector, MoodCategory)], rng: &mut dyn RngCore) -> Result<TrainingReport> {
        if samples.len() < MIN_TRAINING_SAMPLES {
            return Err(TretaError::InsufficientData {
                found: samples.len(),
                required: MIN_TRAINING_SAMPLES,
            });
        }

        let labels: Vec<MoodCategory> = samples.iter().map(|(_, mood)| *mood).collect();
        let mut classes = labels.clone();
        classes.sort_unstable();
        classes.dedup();
        let class_index = |mood: MoodCategory| classes.iter().position(|c| *c == mood).unwrap_or(0);

        let (train_idx, test_idx) = stratified_split(&labels, rng);
        let raw: Vec<Vec<f64>> = samples.iter().map(|(f, _)| f.to_array().to_vec()).collect();

        let train_rows: Vec<Vec<f64>> = train_idx.iter().map(|&i| raw[i].clone()).collect();
        let scaler = StandardScaler::fit(&train_rows);
        let train_x: Vec<Vec<f64>> = train_rows.iter().map(|r| scaler.transform(r)).collect();
        let train_y: Vec<usize> = train_idx.iter().map(|&i| class_index(labels[i])).collect();

        info!(
            "Training mood model on {} samples ({} held out, {} classes)",
            train_idx.len(),
            test_idx.len(),
            classes.len()
        );
        let forest = RandomForest::fit(self.params, &train_x, &train_y, classes.len(), rng)
            .ok_or_else(|| TretaError::ModelFormat("empty training split".to_string()))?;
        debug!(
            "Fitted {} trees, deepest {}",
            forest.trees().len(),
            forest.trees().iter().map(DecisionTree::depth).max().unwrap_or(0)
        );

        #[allow(clippy::cast_precision_loss)]
        let accuracy = (!test_idx.is_empty()).then(|| {
            let correct = test_idx
                .iter()
                .filter(|&&i| forest.predict(&scaler.transform(&raw[i])) == class_index(labels[i]))
                .count();
            correct as f64 / test_idx.len() as f64
        });
        if let Some(acc) = accuracy {
            info!("Held-out accuracy: {:.1}%", acc * 100.0);
        }

        let trained_at = Utc::now();
        let state = TrainedModel {
            model: ModelArtifact {
                trained_at,
                feature_names: FEATURE_NAMES.iter().map(ToString::to_string).collect(),
                classes: classes.clone(),
                accuracy,
                forest,
            },
            scaler: ScalerArtifact { trained_at, scaler },
        };
        self.write_artifacts(&state)?;
        self.state = Some(state);

        Ok(TrainingReport {
            samples: samples.len(),
            train_size: train_idx.len(),
            test_size: test_idx.len(),
            classes,
            accuracy,
            trained_at,
        })
    }

    fn predict(&self, features: &FeatureVector) -> Prediction {
        let Some(state) = &self.state else {
            return Prediction::UNAVAILABLE;
        };
        let row = state.scaler.scaler.transform(&features.to_array());
        let (idx, confidence) = argmax(&state.model.forest.predict_proba(&row));
        Prediction {
            mood: state.model.classes.get(idx).copied(),
            confidence,
        }
    }

    fn save(&self) -> Result<()> {
        let state = self
            .state
            .as_ref()
            .ok_or_else(|| TretaError::ModelFormat("no trained model to save".to_string()))?;
        self.write_artifacts(state)
    }

    fn load(&mut self) -> Result<bool> {
        let (model_path, scaler_path) = (self.model_path(), self.scaler_path());
        if !model_path.exists() || !scaler_path.exists() {
            return Ok(false);
        }
        let state = TrainedModel {
            model: read_artifact(&model_path)?,
            scaler: read_artifact(&scaler_path)?,
        }
        .validate()?;
        self.state = Some(state);
        Ok(true)
    }

    fn is_trained(&self) -> bool {
        self.state.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tempfile::TempDir;

    fn sample(tempo: f64, rmse: f64, mood: MoodCategory) -> (FeatureVector, MoodCategory) {
        let f = FeatureVector {
            tempo,
            rmse_mean: rmse,
            spectral_centroid_mean: tempo * 20.0,
            ..FeatureVector::default()
        };
        (f, mood)
    }

    fn training_set() -> Vec<(FeatureVector, MoodCategory)> {
        let mut samples = Vec::new();
        for i in 0..10 {
            let d = f64::from(i);
            samples.push(sample(150.0 + d, 0.25 + d * 0.001, MoodCategory::Energetic));
            samples.push(sample(65.0 + d, 0.03 + d * 0.001, MoodCategory::Sad));
        }
        samples
    }

    fn small_classifier(dir: &Path) -> MoodClassifier {
        MoodClassifier::new(dir, 20)
    }

    #[test]
    fn test_predict_without_model_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let classifier = small_classifier(dir.path());
        assert!(!classifier.is_trained());
        assert_eq!(classifier.predict(&FeatureVector::default()), Prediction::UNAVAILABLE);
    }

    #[test]
    fn test_train_rejects_small_sets() {
        let dir = TempDir::new().unwrap();
        let mut classifier = small_classifier(dir.path());
        let samples: Vec<_> = training_set().into_iter().take(9).collect();
        let err = classifier
            .train(&samples, &mut StdRng::seed_from_u64(42))
            .unwrap_err();
        assert!(matches!(err, TretaError::InsufficientData { found: 9, required: 10 }));
        assert!(!classifier.is_trained());
        assert!(!classifier.model_path().exists());
    }

    #[test]
    fn test_insufficient_data_keeps_trained_model() {
        let dir = TempDir::new().unwrap();
        let mut classifier = small_classifier(dir.path());
        classifier.train(&training_set(), &mut StdRng::seed_from_u64(1)).unwrap();
        let trained_at = classifier.trained_at();
        let query = sample(152.0, 0.24, MoodCategory::Energetic).0;
        let prediction = classifier.predict(&query);
        let model_bytes = fs::read(classifier.model_path()).unwrap();
        let scaler_bytes = fs::read(classifier.scaler_path()).unwrap();

        let few: Vec<_> = training_set().into_iter().take(9).collect();
        let err = classifier.train(&few, &mut StdRng::seed_from_u64(2)).unwrap_err();
        assert!(matches!(err, TretaError::InsufficientData { found: 9, .. }));

        assert_eq!(classifier.trained_at(), trained_at);
        assert_eq!(classifier.predict(&query), prediction);
        assert_eq!(fs::read(classifier.model_path()).unwrap(), model_bytes);
        assert_eq!(fs::read(classifier.scaler_path()).unwrap(), scaler_bytes);
    }

    #[test]
    fn test_failed_scaler_write_restores_previous_model() {
        let dir = TempDir::new().unwrap();
        let mut classifier = small_classifier(dir.path());
        classifier.train(&training_set(), &mut StdRng::seed_from_u64(1)).unwrap();
        let trained_at = classifier.trained_at();
        let model_bytes = fs::read(classifier.model_path()).unwrap();

        // A non-empty directory cannot be replaced by a file rename
        fs::remove_file(classifier.scaler_path()).unwrap();
        fs::create_dir(classifier.scaler_path()).unwrap();
        fs::write(classifier.scaler_path().join("keep"), b"x").unwrap();

        let err = classifier
            .train(&training_set(), &mut StdRng::seed_from_u64(2))
            .unwrap_err();
        assert!(matches!(err, TretaError::Persistence { .. }));
        assert_eq!(fs::read(classifier.model_path()).unwrap(), model_bytes);
        assert_eq!(classifier.trained_at(), trained_at);

        // No staged files left behind
        let leftovers = fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| e.as_ref().unwrap().path().is_file())
            .count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn test_failed_first_write_leaves_no_model() {
        let dir = TempDir::new().unwrap();
        let mut classifier = small_classifier(dir.path());
        fs::create_dir(classifier.scaler_path()).unwrap();
        fs::write(classifier.scaler_path().join("keep"), b"x").unwrap();

        assert!(classifier.train(&training_set(), &mut StdRng::seed_from_u64(1)).is_err());
        assert!(!classifier.model_path().exists());
        assert!(!classifier.is_trained());
    }

    #[test]
    fn test_train_then_predict() {
        let dir = TempDir::new().unwrap();
        let mut classifier = small_classifier(dir.path());
        let report = classifier
            .train(&training_set(), &mut StdRng::seed_from_u64(42))
            .unwrap();
        assert_eq!(report.samples, 20);
        assert_eq!(report.test_size, 4);
        assert_eq!(report.classes, vec![MoodCategory::Sad, MoodCategory::Energetic]);
        assert_eq!(report.accuracy, Some(1.0));

        let p = classifier.predict(&sample(155.0, 0.26, MoodCategory::Energetic).0);
        assert_eq!(p.mood, Some(MoodCategory::Energetic));
        assert!(p.confidence > 0.5 && p.confidence <= 1.0);
    }

    #[test]
    fn test_artifacts_reload_in_new_instance() {
        let dir = TempDir::new().unwrap();
        let mut first = small_classifier(dir.path());
        first.train(&training_set(), &mut StdRng::seed_from_u64(1)).unwrap();
        assert!(first.model_path().exists());
        assert!(first.scaler_path().exists());

        let second = small_classifier(dir.path());
        assert!(second.is_trained());
        assert_eq!(second.trained_at(), first.trained_at());
        let query = sample(70.0, 0.04, MoodCategory::Sad).0;
        assert_eq!(second.predict(&query), first.predict(&query));
    }

    #[test]
    fn test_mismatched_artifacts_are_rejected() {
        let dir = TempDir::new().unwrap();
        let mut a = small_classifier(dir.path());
        a.train(&training_set(), &mut StdRng::seed_from_u64(1)).unwrap();
        let scaler_json = fs::read_to_string(a.scaler_path()).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        a.train(&training_set(), &mut StdRng::seed_from_u64(2)).unwrap();
        fs::write(a.scaler_path(), scaler_json).unwrap();

        let mut b = MoodClassifier {
            model_dir: dir.path().to_path_buf(),
            params: ForestParams::default(),
            state: None,
        };
        assert!(matches!(b.load(), Err(TretaError::ModelFormat(_))));
        assert!(!b.is_trained());
    }

    #[test]
    fn test_failed_save_keeps_previous_model() {
        let dir = TempDir::new().unwrap();
        let mut classifier = small_classifier(dir.path());
        classifier.train(&training_set(), &mut StdRng::seed_from_u64(1)).unwrap();
        let before = classifier.trained_at();

        // A regular file where the model directory should be
        let blocker = dir.path().join("blocked");
        fs::write(&blocker, b"").unwrap();
        classifier.model_dir = blocker;
        let err = classifier
            .train(&training_set(), &mut StdRng::seed_from_u64(2))
            .unwrap_err();
        assert!(matches!(err, TretaError::Persistence { .. }));
        assert_eq!(classifier.trained_at(), before);
    }

    #[test]
    fn test_stratified_split_keeps_every_class_in_train() {
        let mut labels = vec![MoodCategory::Happy; 10];
        labels.extend([MoodCategory::Sad; 3]);
        labels.push(MoodCategory::Calm);
        let (train, test) = stratified_split(&labels, &mut StdRng::seed_from_u64(9));
        assert_eq!(train.len() + test.len(), labels.len());
        assert_eq!(test.iter().filter(|&&i| labels[i] == MoodCategory::Happy).count(), 2);
        assert_eq!(test.iter().filter(|&&i| labels[i] == MoodCategory::Sad).count(), 1);
        assert!(train.iter().any(|&i| labels[i] == MoodCategory::Calm));
    }

    #[test]
    fn test_scaler_handles_constant_columns() {
        let scaler = StandardScaler::fit(&[vec![1.0, 5.0], vec![3.0, 5.0]]);
        assert_eq!(scaler.mean, vec![2.0, 5.0]);
        assert_eq!(scaler.scale, vec![1.0, 1.0]);
        assert_eq!(scaler.transform(&[3.0, 5.0]), vec![1.0, 0.0]);
    }
}
