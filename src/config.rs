//! # Configuration Module
//!
//! Data directory layout and the runtime settings shared by the analysis and
//! queue commands.
//!
//! ## Data Storage
//!
//! Treta keeps its library database and trained mood model in the
//! platform-standard data directory:
//! - Linux: `~/.local/share/treta/`
//! - macOS: `~/Library/Application Support/treta/`
//! - Windows: `%APPDATA%\treta\`
//!
//! ```text
//! treta/
//! ├── treta.db              # tracks + smart_queue tables
//! └── models/
//!     ├── mood_model.json   # random forest + class list
//!     └── mood_scaler.json  # feature standardisation
//! ```
//!
//! Both locations can be overridden on the command line (`--database`,
//! `--model-dir`) or through `TRETA_DATABASE` / `TRETA_MODEL_DIR`.

use crate::queue::QueueConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

const APP_DIR: &str = "treta";
const DB_FILE: &str = "treta.db";
const MODEL_DIR: &str = "models";

/// Returns the Treta data directory, creating it if needed.
///
/// # Errors
///
/// Fails when the platform has no data directory or it cannot be created.
pub fn get_data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir().ok_or_else(|| {
        anyhow::anyhow!(
            "Could not determine system data directory. Please ensure your platform supports standard data directories."
        )
    })?;

    let treta_dir = data_dir.join(APP_DIR);
    fs::create_dir_all(&treta_dir).with_context(|| {
        format!(
            "Failed to create Treta data directory at {}. Please check file permissions.",
            treta_dir.display()
        )
    })?;

    Ok(treta_dir)
}

/// Returns the library database path, `<data dir>/treta.db`.
///
/// # Errors
///
/// See [`get_data_dir`].
///
/// # Examples
///
/// ```no_run
/// use treta::config::get_db_path;
///
/// let db_path = get_db_path()?;
/// println!("Database location: {}", db_path.display());
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn get_db_path() -> Result<PathBuf> {
    Ok(get_data_dir()?.join(DB_FILE))
}

/// Returns the mood model directory, `<data dir>/models/`. Not created here;
/// the classifier creates it on first save.
///
/// # Errors
///
/// See [`get_data_dir`].
pub fn get_model_dir() -> Result<PathBuf> {
    Ok(get_data_dir()?.join(MODEL_DIR))
}

/// Settings for feature extraction, prediction acceptance and training.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Seconds of audio decoded per track.
    pub max_duration_secs: f64,
    /// A model prediction is committed only above this confidence.
    pub confidence_threshold: f64,
    /// Commit the heuristic suggestion when the model is absent or unsure.
    pub heuristic_fallback: bool,
    pub training_seed: u64,
    pub n_estimators: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_duration_secs: crate::features::DEFAULT_MAX_DURATION_SECS,
            confidence_threshold: 0.6,
            heuristic_fallback: true,
            training_seed: 42,
            n_estimators: 100,
        }
    }
}

/// Configuration for runtime behavior
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub db_path: PathBuf,
    pub model_dir: PathBuf,
    pub analysis: AnalysisConfig,
    pub queue: QueueConfig,
}

impl RuntimeConfig {
    /// Platform default locations.
    ///
    /// # Errors
    ///
    /// See [`get_data_dir`].
    pub fn new() -> Result<Self> {
        Ok(Self::with_paths(get_db_path()?, get_model_dir()?))
    }

    /// Explicit database and model locations with default settings.
    pub fn with_paths(db_path: impl Into<PathBuf>, model_dir: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            model_dir: model_dir.into(),
            analysis: AnalysisConfig::default(),
            queue: QueueConfig::default(),
        }
    }

    /// Platform defaults with any of the given overrides applied.
    ///
    /// # Errors
    ///
    /// Fails only when a default location is needed and cannot be resolved.
    pub fn resolve(db_path: Option<PathBuf>, model_dir: Option<PathBuf>) -> Result<Self> {
        let db_path = match db_path {
            Some(path) => path,
            None => get_db_path()?,
        };
        let model_dir = match model_dir {
            Some(dir) => dir,
            None => get_model_dir()?,
        };
        Ok(Self::with_paths(db_path, model_dir))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_path_structure() {
        let path = get_db_path().expect("Should get valid path");
        assert_eq!(path.file_name().unwrap(), "treta.db");
        let parent = path.parent().expect("Should have parent directory");
        assert_eq!(parent.file_name().unwrap(), "treta");
        assert!(parent.is_dir());
    }

    #[test]
    fn test_model_dir_sits_next_to_db() {
        let db = get_db_path().unwrap();
        let models = get_model_dir().unwrap();
        assert_eq!(models.parent(), db.parent());
        assert!(models.ends_with("models"));
    }

    #[test]
    fn test_overrides_skip_defaults() {
        let config = RuntimeConfig::resolve(Some("/tmp/a.db".into()), Some("/tmp/m".into())).unwrap();
        assert_eq!(config.db_path, PathBuf::from("/tmp/a.db"));
        assert_eq!(config.model_dir, PathBuf::from("/tmp/m"));
        assert_eq!(config.analysis, AnalysisConfig::default());
        assert_eq!(config.queue.mood_limit, 50);
    }

    #[test]
    fn test_analysis_defaults() {
        let analysis = AnalysisConfig::default();
        assert!((analysis.confidence_threshold - 0.6).abs() < f64::EPSILON);
        assert!(analysis.heuristic_fallback);
        assert_eq!(analysis.training_seed, 42);
        assert_eq!(analysis.n_estimators, 100);
    }
}
