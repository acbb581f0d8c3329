use crate::error::{Result, TretaError};
use crate::features::FeatureVector;
use crate::mood::MoodCategory;
use crate::track::{NewTrack, Track};
use chrono::{DateTime, Utc};
use log::{debug, trace, warn};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Storage operations the analysis and queue code depend on.
pub trait TrackStore {
    /// All tracks, most recently downloaded first.
    fn get_all_tracks(&self) -> Result<Vec<Track>>;

    fn get_track(&self, track_id: i64) -> Result<Option<Track>>;

    fn update_track_mood(&self, track_id: i64, mood: MoodCategory) -> Result<()>;

    fn update_audio_features(&self, track_id: i64, features: &FeatureVector) -> Result<()>;

    /// Atomically replace `queue_type` with `track_ids` at positions `0..n`.
    fn replace_queue(&self, track_ids: &[i64], queue_type: &str) -> Result<()>;

    /// Tracks of `queue_type` in position order.
    fn get_queue(&self, queue_type: &str) -> Result<Vec<Track>>;

    /// Drop `track_id` from `queue_type` and close the gap. Returns whether
    /// anything was removed.
    fn remove_from_queue(&self, track_id: i64, queue_type: &str) -> Result<bool>;
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS tracks (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    title          TEXT    NOT NULL,
    artist         TEXT    NOT NULL,
    album          TEXT,
    source         TEXT    NOT NULL,
    url            TEXT,
    file_path      TEXT,
    mood           TEXT,
    duration       REAL,
    file_hash      TEXT UNIQUE,
    external_id    TEXT,
    play_count     INTEGER NOT NULL DEFAULT 0,
    downloaded_at  TEXT    NOT NULL,
    last_played    TEXT,
    audio_features TEXT
);
CREATE TABLE IF NOT EXISTS smart_queue (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    track_id   INTEGER NOT NULL REFERENCES tracks(id) ON DELETE CASCADE,
    position   INTEGER NOT NULL,
    queue_type TEXT    NOT NULL,
    UNIQUE(queue_type, position)
);
CREATE INDEX IF NOT EXISTS idx_tracks_mood ON tracks(mood);
CREATE INDEX IF NOT EXISTS idx_smart_queue_type ON smart_queue(queue_type, position);
";

const TRACK_COLUMNS: &str = "id, title, artist, album, source, url, file_path, mood, duration, \
     file_hash, external_id, play_count, downloaded_at, last_played, audio_features";

/// [`TrackStore`] backed by a single `SQLite` file.
pub struct SqliteTrackStore {
    conn: Connection,
}

impl SqliteTrackStore {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| TretaError::Persistence {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }
        debug!("Opening track store at {}", path.display());
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Insert a track and return its id.
    pub fn add_track(&self, track: &NewTrack) -> Result<i64> {
        let features: Option<String> = None;
        self.conn.execute(
            "INSERT INTO tracks (title, artist, album, source, url, file_path, mood, duration,
                                 file_hash, external_id, play_count, downloaded_at, last_played, audio_features)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                track.title,
                track.artist,
                track.album,
                track.source,
                track.url,
                track.file_path.as_ref().map(|p| p.to_string_lossy().into_owned()),
                track.mood.map(MoodCategory::as_str),
                track.duration,
                track.file_hash,
                track.external_id,
                track.play_count,
                track.downloaded_at.unwrap_or_else(Utc::now),
                track.last_played,
                features,
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        trace!("Inserted track {id}: {} - {}", track.artist, track.title);
        Ok(id)
    }

    /// Bump the play count and stamp `last_played`.
    pub fn record_play(&self, track_id: i64, at: DateTime<Utc>) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE tracks SET play_count = play_count + 1, last_played = ?1 WHERE id = ?2",
            params![at, track_id],
        )?;
        ensure_found(changed, track_id)
    }

    /// Count of tracks per mood; unlabelled tracks are not counted.
    pub fn mood_distribution(&self) -> Result<BTreeMap<MoodCategory, usize>> {
        let mut stmt = self
            .conn
            .prepare("SELECT mood, COUNT(*) FROM tracks WHERE mood IS NOT NULL GROUP BY mood")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;

        let mut distribution = BTreeMap::new();
        for row in rows {
            let (mood, count) = row?;
            match mood.parse::<MoodCategory>() {
                Ok(mood) => {
                    *distribution.entry(mood).or_insert(0) += usize::try_from(count).unwrap_or(0);
                }
                Err(_) => warn!("Ignoring unknown mood label {mood:?} in store"),
            }
        }
        Ok(distribution)
    }

    /// Tracks labelled `mood`, most played first.
    pub fn tracks_with_mood(&self, mood: MoodCategory, limit: Option<usize>) -> Result<Vec<Track>> {
        // SQLite reads a negative LIMIT as unbounded
        let limit = limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX));
        self.query_tracks(
            &format!("SELECT {TRACK_COLUMNS} FROM tracks WHERE mood = ?1 ORDER BY play_count DESC, id LIMIT ?2"),
            params![mood.as_str(), limit],
        )
    }

    /// Title, artist or album containing `needle`.
    pub fn search_tracks(&self, needle: &str) -> Result<Vec<Track>> {
        let pattern = format!("%{needle}%");
        self.query_tracks(
            &format!(
                "SELECT {TRACK_COLUMNS} FROM tracks
                 WHERE title LIKE ?1 OR artist LIKE ?1 OR album LIKE ?1
                 ORDER BY downloaded_at DESC, id DESC"
            ),
            [pattern],
        )
    }

    /// Stored queue names with their lengths.
    pub fn queue_types(&self) -> Result<Vec<(String, usize)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT queue_type, COUNT(*) FROM smart_queue GROUP BY queue_type ORDER BY queue_type")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, usize::try_from(row.get::<_, i64>(1)?).unwrap_or(0)))
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    /// Raw `(track_id, position)` pairs of a queue in position order.
    pub fn queue_positions(&self, queue_type: &str) -> Result<Vec<(i64, i64)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT track_id, position FROM smart_queue WHERE queue_type = ?1 ORDER BY position")?;
        let rows = stmt.query_map([queue_type], |row| Ok((row.get(0)?, row.get(1)?)))?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    fn query_tracks<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<Track>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, track_from_row)?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }
}

fn ensure_found(changed: usize, track_id: i64) -> Result<()> {
    if changed == 0 {
        Err(TretaError::TrackNotFound(track_id))
    } else {
        Ok(())
    }
}

fn track_from_row(row: &Row<'_>) -> rusqlite::Result<Track> {
    let mood: Option<String> = row.get("mood")?;
    let features: Option<String> = row.get("audio_features")?;
    let file_path: Option<String> = row.get("file_path")?;
    Ok(Track {
        id: row.get("id")?,
        title: row.get("title")?,
        artist: row.get("artist")?,
        album: row.get("album")?,
        source: row.get("source")?,
        url: row.get("url")?,
        file_path: file_path.map(PathBuf::from),
        mood: mood.and_then(|m| m.parse().ok()),
        duration: row.get("duration")?,
        file_hash: row.get("file_hash")?,
        external_id: row.get("external_id")?,
        play_count: row.get("play_count")?,
        downloaded_at: row.get("downloaded_at")?,
        last_played: row.get("last_played")?,
        // Anything short of a full 21-field object reads as absent
        audio_features: features.and_then(|json| serde_json::from_str(&json).ok()),
    })
}

impl TrackStore for SqliteTrackStore {
    fn get_all_tracks(&self) -> Result<Vec<Track>> {
        self.query_tracks(
            &format!("SELECT {TRACK_COLUMNS} FROM tracks ORDER BY downloaded_at DESC, id DESC"),
            [],
        )
    }

    fn get_track(&self, track_id: i64) -> Result<Option<Track>> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {TRACK_COLUMNS} FROM tracks WHERE id = ?1"),
                [track_id],
                track_from_row,
            )
            .optional()?)
    }

    fn update_track_mood(&self, track_id: i64, mood: MoodCategory) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE tracks SET mood = ?1 WHERE id = ?2",
            params![mood.as_str(), track_id],
        )?;
        ensure_found(changed, track_id)
    }

    fn update_audio_features(&self, track_id: i64, features: &FeatureVector) -> Result<()> {
        let json = serde_json::to_string(features)?;
        let changed = self.conn.execute(
            "UPDATE tracks SET audio_features = ?1 WHERE id = ?2",
            params![json, track_id],
        )?;
        ensure_found(changed, track_id)
    }

    fn replace_queue(&self, track_ids: &[i64], queue_type: &str) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM smart_queue WHERE queue_type = ?1", [queue_type])?;
        {
            let mut stmt =
                tx.prepare("INSERT INTO smart_queue (track_id, position, queue_type) VALUES (?1, ?2, ?3)")?;
            for (position, track_id) in track_ids.iter().enumerate() {
                stmt.execute(params![track_id, i64::try_from(position).unwrap_or(i64::MAX), queue_type])?;
            }
        }
        tx.commit()?;
        debug!("Stored queue {queue_type:?} with {} tracks", track_ids.len());
        Ok(())
    }

    fn get_queue(&self, queue_type: &str) -> Result<Vec<Track>> {
        let columns: String = TRACK_COLUMNS
            .split(", ")
            .map(|c| format!("t.{c}"))
            .collect::<Vec<_>>()
            .join(", ");
        self.query_tracks(
            &format!(
                "SELECT {columns} FROM tracks t
                 JOIN smart_queue sq ON t.id = sq.track_id
                 WHERE sq.queue_type = ?1
                 ORDER BY sq.position"
            ),
            [queue_type],
        )
    }

    fn remove_from_queue(&self, track_id: i64, queue_type: &str) -> Result<bool> {
        let tx = self.conn.unchecked_transaction()?;
        let removed = tx.execute(
            "DELETE FROM smart_queue WHERE track_id = ?1 AND queue_type = ?2",
            params![track_id, queue_type],
        )?;
        if removed > 0 {
            // Ascending order keeps every target slot free when it is written
            let survivors: Vec<i64> = {
                let mut stmt =
                    tx.prepare("SELECT id FROM smart_queue WHERE queue_type = ?1 ORDER BY position")?;
                let rows = stmt.query_map([queue_type], |row| row.get(0))?;
                rows.collect::<rusqlite::Result<_>>()?
            };
            let mut stmt = tx.prepare("UPDATE smart_queue SET position = ?1 WHERE id = ?2")?;
            for (position, row_id) in survivors.iter().enumerate() {
                stmt.execute(params![i64::try_from(position).unwrap_or(i64::MAX), row_id])?;
            }
        }
        tx.commit()?;
        Ok(removed > 0)
    }
}
