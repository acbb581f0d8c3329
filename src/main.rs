//! # Treta
//!
//! Mood detection and smart queues for a local music library.
//!
//! ## Usage
//!
//! ```bash
//! # Analyze tracks that have no mood yet, then retrain
//! treta analyze --retrain
//!
//! # Classify a single file without touching the library
//! treta analyze --file song.flac
//!
//! # Build and inspect queues
//! treta queue generate discovery --limit 20
//! treta queue show discovery
//! ```

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{CommandFactory, Parser};
use log::{debug, info};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use treta::analysis::{BatchScope, MoodAnalyzer};
use treta::classifier::{Classifier, MoodClassifier, Prediction};
use treta::cli::{self, Command, MoodAction, QueueAction};
use treta::completion;
use treta::config::RuntimeConfig;
use treta::db::{SqliteTrackStore, TrackStore};
use treta::decoder::SymphoniaDecoder;
use treta::error::TretaError;
use treta::mood::MoodCategory;
use treta::queue::{QueueGenerator, QueueKind};
use treta::track::Track;

/// Entry point: parse arguments, resolve locations and route the command.
///
/// Logging is controlled through `RUST_LOG`, e.g. `RUST_LOG=treta=debug`.
fn main() -> Result<()> {
    env_logger::init();

    let args = cli::Args::parse();

    if let Command::Completion { shell } = &args.command {
        let mut cmd = cli::Args::command();
        completion::write_completions(shell, &mut cmd, &mut std::io::stdout().lock())
            .context("Failed to write completion script")?;
        return Ok(());
    }

    let mut config = RuntimeConfig::resolve(args.database, args.model_dir)?;
    debug!(
        "Database: {}, models: {}",
        config.db_path.display(),
        config.model_dir.display()
    );

    if let Command::CompleteArtists = args.command {
        // Completion must never print errors into the shell.
        if let Err(e) = completion::print_artist_completions(&config.db_path) {
            debug!("Artist completion failed: {e:#}");
        }
        return Ok(());
    }

    let store = SqliteTrackStore::open(&config.db_path)
        .with_context(|| format!("Failed to open library at {}", config.db_path.display()))?;

    match args.command {
        Command::Analyze {
            file,
            track,
            all,
            retrain,
            no_fallback,
            duration,
        } => {
            config.analysis.max_duration_secs = duration;
            config.analysis.heuristic_fallback = !no_fallback;
            let classifier = MoodClassifier::new(&config.model_dir, config.analysis.n_estimators);
            let mut analyzer = MoodAnalyzer::new(&store, classifier, SymphoniaDecoder, config.analysis.clone());

            if let Some(path) = file {
                analyze_file(&analyzer, &path)?;
            } else if let Some(id) = track {
                let track = store.get_track(id)?.ok_or(TretaError::TrackNotFound(id))?;
                let analysis = analyzer
                    .analyze_track(&track)
                    .with_context(|| format!("Failed to analyze {}", track.display_name()))?;
                match analysis.decision.chosen {
                    Some((mood, source)) => println!("{}: {mood} ({source:?})", track.display_name()),
                    None => println!("{}: no confident mood", track.display_name()),
                }
            } else {
                let cancel = Arc::new(AtomicBool::new(false));
                let flag = Arc::clone(&cancel);
                ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
                    .context("Failed to install Ctrl-C handler")?;

                let scope = if all { BatchScope::All } else { BatchScope::Unlabelled };
                let report = analyzer.analyze_all(scope, &cancel)?;
                println!(
                    "Analyzed {} tracks, labelled {}, failed {}{}",
                    report.analyzed,
                    report.labelled,
                    report.failed,
                    if report.cancelled { " (cancelled)" } else { "" }
                );

                if retrain && !report.cancelled {
                    train(&mut analyzer)?;
                }
            }
        }
        Command::Train { seed } => {
            config.analysis.training_seed = seed;
            let classifier = MoodClassifier::new(&config.model_dir, config.analysis.n_estimators);
            let mut analyzer = MoodAnalyzer::new(&store, classifier, SymphoniaDecoder, config.analysis.clone());
            train(&mut analyzer)?;
        }
        Command::Search { query } => {
            let tracks = store.search_tracks(&query)?;
            if tracks.is_empty() {
                println!("No tracks match '{query}'");
            }
            print_tracks(&tracks);
        }
        Command::Played { track_id } => {
            store.record_play(track_id, Utc::now())?;
            println!("Recorded play of track {track_id}");
        }
        Command::Mood { action } => run_mood(&store, &config, action)?,
        Command::Queue { action } => run_queue(&store, &config, action)?,
        Command::Completion { .. } | Command::CompleteArtists => {}
    }

    Ok(())
}

fn analyze_file(analyzer: &MoodAnalyzer<'_, SqliteTrackStore, MoodClassifier, SymphoniaDecoder>, path: &Path) -> Result<()> {
    let (features, prediction) = analyzer
        .predict_mood(path)
        .with_context(|| format!("Failed to analyze {}", path.display()))?;

    println!("Features for {}:", path.display());
    for (name, value) in features.named() {
        println!("  {name:<20} {value:>12.4}");
    }
    print_prediction(&prediction);
    println!("Suggested (rules): {}", analyzer.suggest_mood_for_features(&features));
    Ok(())
}

fn print_prediction(prediction: &Prediction) {
    match prediction.mood {
        Some(mood) => println!("Predicted: {mood} (confidence {:.2})", prediction.confidence),
        None => println!("Predicted: unavailable (no trained model)"),
    }
}

fn train(analyzer: &mut MoodAnalyzer<'_, SqliteTrackStore, MoodClassifier, SymphoniaDecoder>) -> Result<()> {
    let report = analyzer.train_model().context("Training failed")?;
    let classes: Vec<&str> = report.classes.iter().map(|m| m.as_str()).collect();
    println!(
        "Trained on {} samples ({} train / {} test), classes: {}",
        report.samples,
        report.train_size,
        report.test_size,
        classes.join(", ")
    );
    match report.accuracy {
        Some(accuracy) => println!("Held-out accuracy: {:.1}%", accuracy * 100.0),
        None => println!("Held-out accuracy: n/a (empty test split)"),
    }
    info!("Model saved to {}", analyzer.classifier().model_path().display());
    Ok(())
}

fn run_mood(store: &SqliteTrackStore, config: &RuntimeConfig, action: MoodAction) -> Result<()> {
    match action {
        MoodAction::Set { track_id, mood } => {
            store.update_track_mood(track_id, mood)?;
            println!("Track {track_id} set to {mood}");
        }
        MoodAction::Search { mood, limit } => {
            let tracks = store.tracks_with_mood(mood, Some(limit))?;
            if tracks.is_empty() {
                println!("No {mood} tracks");
            }
            print_tracks(&tracks);
        }
        MoodAction::Stats => {
            let distribution = store.mood_distribution()?;
            let total = store.get_all_tracks()?.len();
            let labelled: usize = distribution.values().sum();
            for (mood, count) in &distribution {
                println!("  {:<12} {count:>6}", mood.as_str());
            }
            println!("  {:<12} {:>6}", "unlabelled", total - labelled);

            let classifier = MoodClassifier::new(&config.model_dir, config.analysis.n_estimators);
            match classifier.trained_at() {
                Some(at) if classifier.is_trained() => println!("Model trained at {}", at.to_rfc3339()),
                _ => println!("No trained model"),
            }
        }
        MoodAction::List => {
            for mood in MoodCategory::ALL {
                let similar: Vec<&str> = mood.similar().iter().map(|m| m.as_str()).collect();
                println!("{:<12} similar: {}", mood.as_str(), similar.join(", "));
            }
        }
    }
    Ok(())
}

fn run_queue(store: &SqliteTrackStore, config: &RuntimeConfig, action: QueueAction) -> Result<()> {
    let generator = QueueGenerator::new(store).with_config(config.queue.clone());

    match action {
        QueueAction::Generate { strategy, options } => {
            let kind = QueueKind::from(strategy);
            let mut rng = match options.seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            let tracks = generator.generate(&kind, options.limit, &mut rng)?;
            println!("Generated {kind} queue '{}' with {} tracks", kind.queue_type(), tracks.len());
            print_tracks(&tracks);
        }
        QueueAction::Show { queue_type } => {
            let tracks = generator.get_queue(&queue_type)?;
            if tracks.is_empty() {
                println!("Queue '{queue_type}' is empty");
            }
            print_tracks(&tracks);
        }
        QueueAction::Next { queue_type } => match generator.get_next_track(&queue_type)? {
            Some(track) => println!("{} [{}]", track.display_name(), track.id),
            None => println!("Queue '{queue_type}' is empty"),
        },
        QueueAction::Remove { track_id, queue_type } => {
            if generator.remove_from_queue(track_id, &queue_type)? {
                println!("Removed track {track_id} from '{queue_type}'");
            } else {
                println!("Track {track_id} is not in '{queue_type}'");
            }
        }
        QueueAction::List => {
            for (queue_type, len) in store.queue_types()? {
                println!("  {queue_type:<24} {len:>4} tracks");
            }
        }
    }
    Ok(())
}

fn print_tracks(tracks: &[Track]) {
    for (i, track) in tracks.iter().enumerate() {
        let mood = track.mood.map_or("-", MoodCategory::as_str);
        println!(
            "{:>3}. {} [{mood}] (plays {}, id {})",
            i + 1,
            track.display_name(),
            track.play_count,
            track.id
        );
    }
}
