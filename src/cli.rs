//! # Command-Line Interface Module
//!
//! Clap derive definitions for the `treta` binary.
//!
//! ## Commands
//!
//! - `analyze`: Extract audio features and assign moods
//! - `train`: Fit the mood model on labelled, analyzed tracks
//! - `mood`: Manual labels, mood search and distribution
//! - `queue`: Generate, inspect and edit smart queues
//! - `search`, `played`: Library lookup and play tracking
//! - `completion`: Shell completion scripts
//!
//! ## Examples
//!
//! ```bash
//! treta analyze --all --retrain
//! treta mood set 42 melancholic
//! treta queue generate mood happy --limit 20
//! treta queue next mood_happy
//! ```

use crate::mood::MoodCategory;
use crate::queue::{QueueKind, DEFAULT_QUEUE};
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Shell types supported for completion generation
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

/// Main application arguments structure.
#[derive(Parser, Debug)]
#[command(name = "treta")]
#[command(about = "Treta: mood detection and smart queues for your music library")]
#[command(version)]
pub struct Args {
    /// Library database file
    #[arg(long, global = true, env = "TRETA_DATABASE", value_hint = clap::ValueHint::FilePath)]
    pub database: Option<PathBuf>,

    /// Directory holding the trained mood model
    #[arg(long, global = true, env = "TRETA_MODEL_DIR", value_hint = clap::ValueHint::DirPath)]
    pub model_dir: Option<PathBuf>,

    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Analyze audio and assign moods
    ///
    /// Without options, analyzes every track that has no mood yet. Features
    /// are stored on each track so later training can use them. A model
    /// prediction is only kept above the confidence threshold; otherwise the
    /// rule-based suggestion is used.
    Analyze {
        /// Analyze a single audio file and print the result (library untouched)
        #[arg(long, value_hint = clap::ValueHint::FilePath, conflicts_with_all = ["track", "all"])]
        file: Option<PathBuf>,

        /// Analyze one library track by id
        #[arg(long, conflicts_with = "all")]
        track: Option<i64>,

        /// Re-analyze every track, including labelled ones
        #[arg(long)]
        all: bool,

        /// Retrain the model after the batch finishes
        #[arg(long, conflicts_with_all = ["file", "track"])]
        retrain: bool,

        /// Leave tracks unlabelled when the model is absent or unsure
        #[arg(long)]
        no_fallback: bool,

        /// Seconds of audio to analyze per track
        #[arg(long, default_value_t = crate::features::DEFAULT_MAX_DURATION_SECS, value_parser = parse_duration)]
        duration: f64,
    },

    /// Train the mood model from labelled, analyzed tracks
    ///
    /// Needs at least 10 tracks with both a mood and stored features.
    Train {
        /// Seed for the train/test split and the forest
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },

    /// Manage mood labels
    Mood {
        #[command(subcommand)]
        action: MoodAction,
    },

    /// Generate and manage smart queues
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },

    /// Find tracks by title, artist or album
    Search {
        query: String,
    },

    /// Record that a track was played (feeds the favorites queue)
    Played {
        track_id: i64,
    },

    /// Generate shell completions
    ///
    /// Usage: treta completion bash > ~/.local/share/bash-completion/completions/treta
    Completion {
        /// Shell to generate completions for
        shell: Shell,
    },

    /// List artist names for completion (hidden command)
    #[command(hide = true)]
    CompleteArtists,
}

#[derive(Subcommand, Debug)]
pub enum MoodAction {
    /// Label a track by hand
    Set {
        track_id: i64,
        #[arg(value_parser = parse_mood)]
        mood: MoodCategory,
    },

    /// List tracks with a mood, most played first
    Search {
        #[arg(value_parser = parse_mood)]
        mood: MoodCategory,

        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Show how moods are distributed across the library
    Stats,

    /// Print the available mood names
    List,
}

#[derive(Subcommand, Debug)]
pub enum QueueAction {
    /// Build a queue with one of the strategies and store it
    Generate {
        #[command(subcommand)]
        strategy: Strategy,

        #[command(flatten)]
        options: GenerateOptions,
    },

    /// Print a stored queue
    Show {
        #[arg(default_value = DEFAULT_QUEUE)]
        queue_type: String,
    },

    /// Print the head of a stored queue
    Next {
        #[arg(default_value = DEFAULT_QUEUE)]
        queue_type: String,
    },

    /// Remove a track from a stored queue
    Remove {
        track_id: i64,
        #[arg(default_value = DEFAULT_QUEUE)]
        queue_type: String,
    },

    /// List stored queues
    List,
}

#[derive(ClapArgs, Debug, Clone, Copy)]
pub struct GenerateOptions {
    /// Maximum number of tracks (defaults depend on the strategy)
    #[arg(long, global = true)]
    pub limit: Option<usize>,

    /// Seed for reproducible shuffling and sampling
    #[arg(long, global = true)]
    pub seed: Option<u64>,
}

#[derive(Subcommand, Debug)]
pub enum Strategy {
    /// Tracks of a mood, widened to similar moods when short (default 50)
    Mood {
        #[arg(value_parser = parse_mood)]
        mood: MoodCategory,
    },
    /// An artist plus artists with a similar play profile (default 30)
    Artist {
        #[arg(value_hint = clap::ValueHint::Other)]
        name: String,
    },
    /// Rarely played recent downloads, one per artist first (default 25)
    Discovery,
    /// Most played and recently played tracks (default 40)
    Favorites,
    /// A blend of favorites, discovery and a random mood (default 50)
    Mixed,
}

impl From<Strategy> for QueueKind {
    fn from(strategy: Strategy) -> Self {
        match strategy {
            Strategy::Mood { mood } => Self::Mood(mood),
            Strategy::Artist { name } => Self::Artist(name),
            Strategy::Discovery => Self::Discovery,
            Strategy::Favorites => Self::Favorites,
            Strategy::Mixed => Self::Mixed,
        }
    }
}

fn parse_duration(s: &str) -> Result<f64, String> {
    let secs: f64 = s.parse().map_err(|e| format!("invalid duration '{s}': {e}"))?;
    if secs.is_finite() && secs > 0.0 {
        Ok(secs)
    } else {
        Err(format!("duration must be a positive number of seconds, got '{s}'"))
    }
}

fn parse_mood(s: &str) -> Result<MoodCategory, String> {
    s.parse::<MoodCategory>().map_err(|_| {
        let names: Vec<&str> = MoodCategory::ALL.iter().map(|m| m.as_str()).collect();
        format!("unknown mood '{s}' (expected one of: {})", names.join(", "))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_queue_generate() {
        let args = Args::try_parse_from(["treta", "queue", "generate", "mood", "Happy", "--limit", "10", "--seed", "7"])
            .unwrap();
        let Command::Queue {
            action: QueueAction::Generate { strategy, options },
        } = args.command
        else {
            panic!("wrong command");
        };
        assert_eq!(QueueKind::from(strategy), QueueKind::Mood(MoodCategory::Happy));
        assert_eq!(options.limit, Some(10));
        assert_eq!(options.seed, Some(7));
    }

    #[test]
    fn test_unknown_mood_is_rejected() {
        let err = Args::try_parse_from(["treta", "mood", "set", "1", "groovy"]).unwrap_err();
        assert!(err.to_string().contains("unknown mood"));
    }

    #[test]
    fn test_analyze_file_conflicts_with_all() {
        assert!(Args::try_parse_from(["treta", "analyze", "--file", "a.mp3", "--all"]).is_err());
        assert!(Args::try_parse_from(["treta", "analyze", "--all", "--retrain"]).is_ok());
    }

    #[test]
    fn test_duration_must_be_finite_and_positive() {
        for bad in ["inf", "NaN", "0", "-5", "abc"] {
            assert!(
                Args::try_parse_from(["treta", "analyze", "--duration", bad]).is_err(),
                "accepted {bad}"
            );
        }
        let args = Args::try_parse_from(["treta", "analyze", "--duration", "90"]).unwrap();
        assert!(matches!(args.command, Command::Analyze { duration, .. } if (duration - 90.0).abs() < f64::EPSILON));
    }

    #[test]
    fn test_played_requires_numeric_id() {
        assert!(Args::try_parse_from(["treta", "played", "abc"]).is_err());
        assert!(matches!(
            Args::try_parse_from(["treta", "played", "12"]).unwrap().command,
            Command::Played { track_id: 12 }
        ));
    }

    #[test]
    fn test_queue_defaults_to_default_queue() {
        let args = Args::try_parse_from(["treta", "queue", "next"]).unwrap();
        assert!(matches!(
            args.command,
            Command::Queue {
                action: QueueAction::Next { ref queue_type }
            } if queue_type == DEFAULT_QUEUE
        ));
    }
}
