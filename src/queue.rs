//! # Smart Queue Generation
//!
//! Builds bounded, de-duplicated track lists from the library and stores them
//! as named queues. Five strategies are available:
//!
//! - **Mood**: tracks with a mood, widened through the similarity table when short
//! - **Artist**: an artist's tracks plus artists with a similar play profile
//! - **Discovery**: rarely played, recently downloaded tracks, one per artist first
//! - **Favorites**: most played and recently played tracks, ranked by [`favorite_score`]
//! - **Mixed**: a quarter each of favorites, discovery and a random mood, topped up at random
//!
//! Every random choice draws from the generator passed in by the caller, so a
//! seeded `StdRng` reproduces a queue exactly.

use crate::db::TrackStore;
use crate::error::Result;
use crate::mood::MoodCategory;
use crate::track::Track;
use chrono::{DateTime, Duration, Utc};
use log::{debug, info};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

/// Queue used when a command names none.
pub const DEFAULT_QUEUE: &str = "default";

/// Days a play counts towards recency in [`favorite_score`].
pub const RECENCY_WINDOW_DAYS: i64 = 30;

/// Tracks needed before an artist's mean play count is comparable.
const MIN_ARTIST_TRACKS: usize = 2;
/// Maximum relative gap between play-count means of similar artists.
const ARTIST_SIMILARITY_TOLERANCE: f64 = 0.5;

/// Play counts below this are fresh discovery material.
const DISCOVERY_FRESH_PLAYS: u32 = 3;
/// Play counts below this are used when fresh tracks run short.
const DISCOVERY_MODERATE_PLAYS: u32 = 10;

/// Default sizes and tuning knobs for each strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    pub mood_limit: usize,
    pub artist_limit: usize,
    pub discovery_limit: usize,
    pub favorites_limit: usize,
    pub mixed_limit: usize,
    pub max_similar_artists: usize,
    pub recent_days: i64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            mood_limit: 50,
            artist_limit: 30,
            discovery_limit: 25,
            favorites_limit: 40,
            mixed_limit: 50,
            max_similar_artists: 5,
            recent_days: RECENCY_WINDOW_DAYS,
        }
    }
}

/// A queue strategy together with its parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueKind {
    Mood(MoodCategory),
    Artist(String),
    Discovery,
    Favorites,
    Mixed,
}

impl QueueKind {
    /// Name the queue is stored under, e.g. `mood_happy` or `artist_daft_punk`.
    #[must_use]
    pub fn queue_type(&self) -> String {
        match self {
            Self::Mood(mood) => format!("mood_{mood}"),
            Self::Artist(name) => format!("artist_{}", name.replace(' ', "_").to_lowercase()),
            Self::Discovery => "discovery".to_string(),
            Self::Favorites => "favorites".to_string(),
            Self::Mixed => "mixed".to_string(),
        }
    }

    #[must_use]
    pub fn default_limit(&self, config: &QueueConfig) -> usize {
        match self {
            Self::Mood(_) => config.mood_limit,
            Self::Artist(_) => config.artist_limit,
            Self::Discovery => config.discovery_limit,
            Self::Favorites => config.favorites_limit,
            Self::Mixed => config.mixed_limit,
        }
    }
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.queue_type())
    }
}

/// `play_count * 10 + max(0, 30 - days since last play)`; never played adds 0.
#[must_use]
pub fn favorite_score(track: &Track, now: DateTime<Utc>) -> i64 {
    let play_score = i64::from(track.play_count) * 10;
    let recency_score = track.last_played.map_or(0, |played| {
        let days_ago = (now - played).num_seconds().div_euclid(86_400);
        (RECENCY_WINDOW_DAYS - days_ago).max(0)
    });
    play_score + recency_score
}

/// Produces queues from a [`TrackStore`] and writes them back.
pub struct QueueGenerator<'a, S: TrackStore + ?Sized> {
    store: &'a S,
    config: QueueConfig,
    now: Option<DateTime<Utc>>,
}

impl<'a, S: TrackStore + ?Sized> QueueGenerator<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            config: QueueConfig::default(),
            now: None,
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    /// Pin the clock used for recency.
    #[must_use]
    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }

    #[must_use]
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    fn now(&self) -> DateTime<Utc> {
        self.now.unwrap_or_else(Utc::now)
    }

    /// Run the strategy named by `kind`; `limit` falls back to the configured size.
    pub fn generate<R: Rng + ?Sized>(&self, kind: &QueueKind, limit: Option<usize>, rng: &mut R) -> Result<Vec<Track>> {
        let limit = limit.unwrap_or_else(|| kind.default_limit(&self.config));
        match kind {
            QueueKind::Mood(mood) => self.generate_mood_queue(*mood, limit, rng),
            QueueKind::Artist(name) => self.generate_artist_queue(name, limit, rng),
            QueueKind::Discovery => self.generate_discovery_queue(limit, rng),
            QueueKind::Favorites => self.generate_favorites_queue(limit, rng),
            QueueKind::Mixed => self.generate_mixed_queue(limit, rng),
        }
    }

    pub fn generate_mood_queue<R: Rng + ?Sized>(&self, mood: MoodCategory, limit: usize, rng: &mut R) -> Result<Vec<Track>> {
        let tracks = self.store.get_all_tracks()?;
        let selected = select_mood(&tracks, mood, limit, rng);
        self.commit(&QueueKind::Mood(mood), selected)
    }

    pub fn generate_artist_queue<R: Rng + ?Sized>(&self, artist: &str, limit: usize, rng: &mut R) -> Result<Vec<Track>> {
        let tracks = self.store.get_all_tracks()?;
        let selected = select_artist(&tracks, artist, limit, self.config.max_similar_artists, rng);
        self.commit(&QueueKind::Artist(artist.to_string()), selected)
    }

    pub fn generate_discovery_queue<R: Rng + ?Sized>(&self, limit: usize, rng: &mut R) -> Result<Vec<Track>> {
        let tracks = self.store.get_all_tracks()?;
        let selected = select_discovery(&tracks, limit, rng);
        self.commit(&QueueKind::Discovery, selected)
    }

    pub fn generate_favorites_queue<R: Rng + ?Sized>(&self, limit: usize, rng: &mut R) -> Result<Vec<Track>> {
        let tracks = self.store.get_all_tracks()?;
        let selected = select_favorites(&tracks, limit, self.now(), self.config.recent_days, rng);
        self.commit(&QueueKind::Favorites, selected)
    }

    /// Only the `mixed` queue is written. The favorites, discovery and
    /// `mood_*` parts are built in memory, so those stored queues keep their
    /// previous contents.
    pub fn generate_mixed_queue<R: Rng + ?Sized>(&self, limit: usize, rng: &mut R) -> Result<Vec<Track>> {
        let tracks = self.store.get_all_tracks()?;
        let selected = select_mixed(&tracks, limit, self.now(), &self.config, rng);
        self.commit(&QueueKind::Mixed, selected)
    }

    /// Head of the stored queue.
    pub fn get_next_track(&self, queue_type: &str) -> Result<Option<Track>> {
        Ok(self.store.get_queue(queue_type)?.into_iter().next())
    }

    pub fn get_queue(&self, queue_type: &str) -> Result<Vec<Track>> {
        self.store.get_queue(queue_type)
    }

    /// Remove a track from a stored queue, keeping positions contiguous.
    pub fn remove_from_queue(&self, track_id: i64, queue_type: &str) -> Result<bool> {
        let removed = self.store.remove_from_queue(track_id, queue_type)?;
        debug!("Remove track {track_id} from {queue_type:?}: {removed}");
        Ok(removed)
    }

    fn commit(&self, kind: &QueueKind, selected: Vec<&Track>) -> Result<Vec<Track>> {
        let queue_type = kind.queue_type();
        let ids: Vec<i64> = selected.iter().map(|t| t.id).collect();
        self.store.replace_queue(&ids, &queue_type)?;
        info!("Generated {queue_type} queue with {} tracks", ids.len());
        Ok(selected.into_iter().cloned().collect())
    }
}

/// Random subset of `min(amount, pool.len())` elements.
fn sample<'t, R: Rng + ?Sized>(pool: &[&'t Track], amount: usize, rng: &mut R) -> Vec<&'t Track> {
    pool.choose_multiple(rng, amount.min(pool.len())).copied().collect()
}

fn sort_by_play_count(pool: &mut [&Track]) {
    pool.sort_by(|a, b| b.play_count.cmp(&a.play_count));
}

fn select_mood<'t, R: Rng + ?Sized>(tracks: &'t [Track], mood: MoodCategory, limit: usize, rng: &mut R) -> Vec<&'t Track> {
    let mut pool: Vec<&Track> = tracks.iter().filter(|t| t.mood == Some(mood)).collect();
    if pool.len() < limit {
        for similar in mood.similar() {
            pool.extend(tracks.iter().filter(|t| t.mood == Some(*similar)));
            if pool.len() >= limit {
                break;
            }
        }
    }
    sort_by_play_count(&mut pool);

    let mut selected = if pool.len() > limit {
        let half = limit / 2;
        let (top, rest) = pool.split_at(half);
        let mut picked = top.to_vec();
        picked.extend(sample(rest, half, rng));
        picked
    } else {
        pool
    };
    selected.shuffle(rng);
    selected.truncate(limit);
    selected
}

/// Other artists (first-seen order) whose mean play count is within
/// 50% of `artist`'s, each with at least two tracks.
#[must_use]
pub fn similar_artists(tracks: &[Track], artist: &str, max: usize) -> Vec<String> {
    let target = artist.to_lowercase();
    let target_plays: Vec<u32> = tracks
        .iter()
        .filter(|t| t.artist.to_lowercase() == target)
        .map(|t| t.play_count)
        .collect();
    if target_plays.is_empty() {
        return Vec::new();
    }
    let target_mean = mean(&target_plays);

    let mut order: Vec<&str> = Vec::new();
    let mut plays: HashMap<&str, Vec<u32>> = HashMap::new();
    for track in tracks.iter().filter(|t| t.artist.to_lowercase() != target) {
        plays
            .entry(track.artist.as_str())
            .or_insert_with(|| {
                order.push(track.artist.as_str());
                Vec::new()
            })
            .push(track.play_count);
    }

    order
        .into_iter()
        .filter(|name| {
            let counts = &plays[name];
            counts.len() >= MIN_ARTIST_TRACKS
                && (mean(counts) - target_mean).abs() / target_mean.max(1.0) < ARTIST_SIMILARITY_TOLERANCE
        })
        .take(max)
        .map(str::to_string)
        .collect()
}

#[allow(clippy::cast_precision_loss)]
fn mean(values: &[u32]) -> f64 {
    values.iter().map(|&v| f64::from(v)).sum::<f64>() / values.len().max(1) as f64
}

fn select_artist<'t, R: Rng + ?Sized>(
    tracks: &'t [Track],
    artist: &str,
    limit: usize,
    max_similar: usize,
    rng: &mut R,
) -> Vec<&'t Track> {
    let target = artist.to_lowercase();
    let mut pool: Vec<&Track> = tracks.iter().filter(|t| t.artist.to_lowercase() == target).collect();
    if pool.len() < limit {
        let mut seen: HashSet<i64> = pool.iter().map(|t| t.id).collect();
        for name in similar_artists(tracks, artist, max_similar) {
            let name = name.to_lowercase();
            pool.extend(
                tracks
                    .iter()
                    .filter(|t| t.artist.to_lowercase() == name && seen.insert(t.id)),
            );
            if pool.len() >= limit {
                break;
            }
        }
    }
    sort_by_play_count(&mut pool);

    let mut selected = if pool.len() > limit {
        let third = limit / 3;
        let medium = &pool[third..(2 * limit) / 3];
        let mut picked = pool[..third].to_vec();
        picked.extend(sample(medium, third, rng));

        let picked_ids: HashSet<i64> = picked.iter().map(|t| t.id).collect();
        let remaining: Vec<&Track> = pool.iter().filter(|t| !picked_ids.contains(&t.id)).copied().collect();
        picked.extend(sample(&remaining, third, rng));
        picked
    } else {
        pool
    };
    selected.shuffle(rng);
    selected.truncate(limit);
    selected
}

fn select_discovery<'t, R: Rng + ?Sized>(tracks: &'t [Track], limit: usize, rng: &mut R) -> Vec<&'t Track> {
    let mut pool: Vec<&Track> = tracks
        .iter()
        .filter(|t| t.play_count < DISCOVERY_FRESH_PLAYS)
        .collect();
    if pool.len() < limit {
        pool.extend(
            tracks
                .iter()
                .filter(|t| (DISCOVERY_FRESH_PLAYS..DISCOVERY_MODERATE_PLAYS).contains(&t.play_count)),
        );
    }
    pool.sort_by(|a, b| b.downloaded_at.cmp(&a.downloaded_at));

    // One track per artist first
    let mut selected: Vec<&Track> = Vec::with_capacity(limit);
    let mut artists: HashSet<&str> = HashSet::new();
    for track in pool.iter().copied() {
        if selected.len() >= limit {
            break;
        }
        if artists.insert(track.artist.as_str()) {
            selected.push(track);
        }
    }

    if selected.len() < limit {
        let chosen: HashSet<i64> = selected.iter().map(|t| t.id).collect();
        let leftovers: Vec<&Track> = pool.iter().filter(|t| !chosen.contains(&t.id)).copied().collect();
        let missing = limit - selected.len();
        selected.extend(sample(&leftovers, missing, rng));
    }
    selected
}

fn select_favorites<'t, R: Rng + ?Sized>(
    tracks: &'t [Track],
    limit: usize,
    now: DateTime<Utc>,
    recent_days: i64,
    rng: &mut R,
) -> Vec<&'t Track> {
    let half = limit / 2;

    let mut most_played: Vec<&Track> = tracks.iter().collect();
    sort_by_play_count(&mut most_played);
    most_played.truncate(half);

    let cutoff = now - Duration::days(recent_days);
    let mut recent: Vec<&Track> = tracks
        .iter()
        .filter(|t| t.last_played.is_some_and(|played| played > cutoff))
        .collect();
    recent.sort_by(|a, b| b.last_played.cmp(&a.last_played));
    recent.truncate(half);

    let mut seen = HashSet::new();
    let mut favorites: Vec<&Track> = most_played
        .into_iter()
        .chain(recent)
        .filter(|t| seen.insert(t.id))
        .collect();
    favorites.sort_by_key(|t| std::cmp::Reverse(favorite_score(t, now)));
    favorites.truncate(limit);
    favorites.shuffle(rng);
    favorites
}

fn select_mixed<'t, R: Rng + ?Sized>(
    tracks: &'t [Track],
    limit: usize,
    now: DateTime<Utc>,
    config: &QueueConfig,
    rng: &mut R,
) -> Vec<&'t Track> {
    let quarter = limit / 4;
    let favorites = select_favorites(tracks, quarter, now, config.recent_days, rng);
    let discovery = select_discovery(tracks, quarter, rng);

    let moods: Vec<MoodCategory> = tracks
        .iter()
        .filter_map(|t| t.mood)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let by_mood = match moods.choose(rng) {
        Some(mood) => {
            debug!("Mixed queue draws from mood {mood}");
            select_mood(tracks, *mood, quarter, rng)
        }
        None => Vec::new(),
    };

    let mut seen = HashSet::new();
    let mut mixed: Vec<&Track> = favorites
        .into_iter()
        .chain(discovery)
        .chain(by_mood)
        .filter(|t| seen.insert(t.id))
        .collect();

    let mut rest: Vec<&Track> = tracks.iter().filter(|t| !seen.contains(&t.id)).collect();
    rest.shuffle(rng);
    mixed.extend(rest);
    mixed.truncate(limit);
    mixed.shuffle(rng);
    mixed
}
