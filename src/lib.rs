//! Mood detection and smart queues for a local music library.
//!
//! Core modules:
//! - [`features`] - The 21-value audio feature vector and its extraction
//! - [`heuristic`] - Rule-based mood suggestion from features
//! - [`classifier`] - Trainable mood model with on-disk artifacts
//! - [`analysis`] - Extraction, classification and commit policy over a library
//! - [`queue`] - Mood, artist, discovery, favorites and mixed queues
//! - [`db`] - SQLite track and queue store
//!
//! ### Supporting Modules
//!
//! - [`dsp`] - Frame-level spectral analysis and tempo estimation
//! - [`decoder`] - Audio decoding to mono PCM
//! - [`forest`] - Class-balanced random forest
//! - [`mood`] - Mood categories and the similarity table
//! - [`track`] - Library track records
//! - [`config`] - Data directory and runtime settings
//! - [`cli`] - Command-line interface definitions with clap integration
//! - [`completion`] - Shell completion generation
//! - [`error`] - Library error type
//!
//! ## Quick Start Example
//!
//! ```no_run
//! use rand::rngs::StdRng;
//! use rand::SeedableRng;
//! use std::sync::atomic::AtomicBool;
//! use treta::analysis::{BatchScope, MoodAnalyzer};
//! use treta::classifier::MoodClassifier;
//! use treta::config::RuntimeConfig;
//! use treta::db::SqliteTrackStore;
//! use treta::decoder::SymphoniaDecoder;
//! use treta::queue::{QueueGenerator, QueueKind};
//!
//! let config = RuntimeConfig::new()?;
//! let store = SqliteTrackStore::open(&config.db_path)?;
//!
//! // Label everything that has no mood yet
//! let classifier = MoodClassifier::new(&config.model_dir, config.analysis.n_estimators);
//! let analyzer = MoodAnalyzer::new(&store, classifier, SymphoniaDecoder, config.analysis.clone());
//! let report = analyzer.analyze_all(BatchScope::Unlabelled, &AtomicBool::new(false))?;
//! println!("Labelled {} tracks", report.labelled);
//!
//! // Build a discovery queue
//! let mut rng = StdRng::seed_from_u64(7);
//! let queue = QueueGenerator::new(&store).generate(&QueueKind::Discovery, Some(20), &mut rng)?;
//! println!("Queued {} tracks", queue.len());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Mood Assignment
//!
//! A trained model's prediction is committed only when its confidence is
//! above 0.6. Otherwise the first matching heuristic rule decides, unless
//! fallback is turned off. Features are stored on every analyzed track so
//! labelled tracks become training data.
//!
//! ## Error Handling
//!
//! Library operations return [`error::Result`]. Per-track failures during a
//! batch are logged and counted rather than aborting the run. The binary and
//! [`config`] use `anyhow` for context.
//!
//! ## Testing
//!
//! ```bash
//! cargo test
//! cargo bench
//! ```

pub mod analysis;
pub mod classifier;
pub mod cli;
pub mod completion;
pub mod config;
pub mod db;
pub mod decoder;
pub mod dsp;
pub mod error;
pub mod features;
pub mod forest;
pub mod heuristic;
pub mod mood;
pub mod queue;
pub mod track;
