//! # Shell Completion Module
//!
//! Completion scripts for the `treta` binary, plus the artist list behind the
//! hidden `complete-artists` command.
//!
//! ## Usage
//!
//! ```bash
//! # Generate bash completions
//! treta completion bash > ~/.local/share/bash-completion/completions/treta
//!
//! # Generate zsh completions
//! treta completion zsh > ~/.config/zsh/completions/_treta
//! ```

use crate::db::{SqliteTrackStore, TrackStore};
use anyhow::Result;
use clap::Command;
use clap_complete::{generate, Shell as CompletionShell};
use std::collections::BTreeSet;
use std::io::{self, Write};
use std::path::Path;

/// Fish hook completing `queue generate artist` from the library.
const FISH_ARTIST_HOOK: &str = r#"
function __treta_complete_artists
    treta complete-artists 2>/dev/null
end
complete -c treta -f -n '__fish_seen_subcommand_from generate; and __fish_seen_subcommand_from artist' -a '(__treta_complete_artists)' -d 'Artist'
"#;

/// Bash wrapper that answers artist names before deferring to `_treta`.
const BASH_ARTIST_HOOK: &str = r#"
_treta_with_artists() {
    local cur="${COMP_WORDS[COMP_CWORD]}"
    local prev="${COMP_WORDS[COMP_CWORD-1]}"
    if [[ "$prev" == "artist" && " ${COMP_WORDS[*]} " == *" generate "* ]]; then
        local IFS=$'\n'
        COMPREPLY=($(compgen -W "$(treta complete-artists 2>/dev/null)" -- "$cur"))
        return 0
    fi
    _treta "$@"
}
complete -F _treta_with_artists -o bashdefault -o default treta
"#;

/// Write the completion script for `shell` to `out`.
///
/// Bash and fish scripts also complete artist names through the hidden
/// `complete-artists` command.
pub fn write_completions(shell: &crate::cli::Shell, cmd: &mut Command, out: &mut dyn Write) -> io::Result<()> {
    let name = cmd.get_name().to_string();
    let mut script = Vec::new();
    generate(shell_to_completion_shell(shell), cmd, name, &mut script);
    out.write_all(&script)?;
    match shell {
        crate::cli::Shell::Bash => out.write_all(BASH_ARTIST_HOOK.as_bytes()),
        crate::cli::Shell::Fish => out.write_all(FISH_ARTIST_HOOK.as_bytes()),
        _ => Ok(()),
    }
}

/// Convert our Shell enum to clap_complete's Shell enum
#[must_use]
pub fn shell_to_completion_shell(shell: &crate::cli::Shell) -> CompletionShell {
    match shell {
        crate::cli::Shell::Bash => CompletionShell::Bash,
        crate::cli::Shell::Zsh => CompletionShell::Zsh,
        crate::cli::Shell::Fish => CompletionShell::Fish,
        crate::cli::Shell::PowerShell => CompletionShell::PowerShell,
        crate::cli::Shell::Elvish => CompletionShell::Elvish,
    }
}

/// Distinct artist names in the library, sorted.
///
/// A missing database yields an empty list so completion never fails loudly.
pub fn get_artist_completions(db_path: &Path) -> Result<Vec<String>> {
    if !db_path.exists() {
        return Ok(Vec::new());
    }

    let store = SqliteTrackStore::open(db_path)?;
    let artists: BTreeSet<String> = store
        .get_all_tracks()?
        .into_iter()
        .map(|t| t.artist)
        .filter(|a| !a.is_empty())
        .collect();
    Ok(artists.into_iter().collect())
}

/// Print artist completions one per line.
pub fn print_artist_completions(db_path: &Path) -> Result<()> {
    for artist in get_artist_completions(db_path)? {
        println!("{artist}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::NewTrack;
    use tempfile::TempDir;

    #[test]
    fn test_shell_conversion() {
        assert_eq!(
            shell_to_completion_shell(&crate::cli::Shell::Bash),
            CompletionShell::Bash
        );
        assert_eq!(
            shell_to_completion_shell(&crate::cli::Shell::Zsh),
            CompletionShell::Zsh
        );
    }

    fn script_for(shell: crate::cli::Shell) -> String {
        use clap::CommandFactory;
        let mut cmd = crate::cli::Args::command();
        let mut out = Vec::new();
        write_completions(&shell, &mut cmd, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_bash_and_fish_scripts_complete_artists() {
        let bash = script_for(crate::cli::Shell::Bash);
        assert!(bash.contains("_treta()"));
        assert!(bash.contains("treta complete-artists"));
        assert!(bash.trim_end().ends_with("treta"));

        let fish = script_for(crate::cli::Shell::Fish);
        assert!(fish.contains("__treta_complete_artists"));
        assert!(fish.contains("treta complete-artists"));
    }

    #[test]
    fn test_other_shells_get_plain_scripts() {
        let zsh = script_for(crate::cli::Shell::Zsh);
        assert!(zsh.contains("#compdef treta"));
        assert!(!zsh.contains("complete-artists 2>/dev/null"));
    }

    #[test]
    fn test_artist_completions_missing_db() {
        let dir = TempDir::new().unwrap();
        let result = get_artist_completions(&dir.path().join("absent.db")).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_artist_completions_are_distinct_and_sorted() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("treta.db");
        {
            let store = SqliteTrackStore::open(&db_path).unwrap();
            for (title, artist) in [("a", "Zola"), ("b", "Amber"), ("c", "Zola")] {
                store.add_track(&NewTrack::new(title, artist)).unwrap();
            }
        }

        let artists = get_artist_completions(&db_path).unwrap();
        assert_eq!(artists, vec!["Amber".to_string(), "Zola".to_string()]);
    }
}
