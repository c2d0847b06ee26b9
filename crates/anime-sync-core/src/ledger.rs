//! The watched-episode ledger: per-series episode sets and their derived
//! aggregates. All operations self-correct expected anomalies (duplicate
//! numbers, missing records) instead of returning errors.

use anime_sync_models::{episode_key, AnimeRecord, EpisodeMark};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

/// Record a watched episode. Returns false when the episode was already
/// tracked; marks are append-only and never overwritten. A missing series
/// record is created on the fly.
pub fn add_episode(
    anime: &mut BTreeMap<String, AnimeRecord>,
    slug: &str,
    title: &str,
    mark: EpisodeMark,
    now: DateTime<Utc>,
) -> bool {
    let record = anime.entry(slug.to_string()).or_insert_with(|| AnimeRecord {
        title: title.to_string(),
        slug: Some(slug.to_string()),
        ..AnimeRecord::default()
    });

    if record.contains_episode(mark.number) {
        debug!("Episode already tracked: {}", episode_key(slug, mark.number));
        return false;
    }
    if record.title.is_empty() {
        record.title = title.to_string();
    }

    record.episodes.push(mark);
    record.episodes.sort_by_key(|mark| mark.number);
    record.recompute_watch_time();
    record.last_watched = Some(now);
    true
}

pub fn is_episode_tracked(
    anime: &BTreeMap<String, AnimeRecord>,
    slug: &str,
    number: u32,
) -> bool {
    anime
        .get(slug)
        .map(|record| record.contains_episode(number))
        .unwrap_or(false)
}

/// Collapse duplicate marks to the first occurrence per episode number (in
/// canonical stored order), drop zero-numbered junk, re-sort, and recompute
/// the aggregates. Idempotent.
pub fn remove_duplicate_episodes(anime: &mut BTreeMap<String, AnimeRecord>) {
    for record in anime.values_mut() {
        let mut seen = HashSet::new();
        record.episodes.retain(|mark| mark.number > 0 && seen.insert(mark.number));
        record.episodes.sort_by_key(|mark| mark.number);
        record.recompute_watch_time();
    }
}

/// Progress-entry ids for every tracked mark, across all series.
pub fn tracked_episode_keys(anime: &BTreeMap<String, AnimeRecord>) -> HashSet<String> {
    let mut keys = HashSet::new();
    for (slug, record) in anime {
        for mark in &record.episodes {
            keys.insert(episode_key(slug, mark.number));
        }
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mark(number: u32, duration: u32) -> EpisodeMark {
        EpisodeMark::new(number, Utc::now(), duration)
    }

    #[test]
    fn add_episode_creates_the_record_and_aggregates() {
        let mut anime = BTreeMap::new();
        let now = Utc::now();

        assert!(add_episode(&mut anime, "bleach", "Bleach", mark(3, 1440), now));
        assert!(add_episode(&mut anime, "bleach", "Bleach", mark(1, 1380), now));

        let record = &anime["bleach"];
        assert_eq!(record.title, "Bleach");
        assert_eq!(
            record.episodes.iter().map(|m| m.number).collect::<Vec<_>>(),
            vec![1, 3]
        );
        assert_eq!(record.total_watch_time, 2820);
        assert_eq!(record.last_watched, Some(now));
    }

    #[test]
    fn add_episode_is_idempotent_per_number() {
        let mut anime = BTreeMap::new();
        let now = Utc::now();
        assert!(add_episode(&mut anime, "bleach", "Bleach", mark(1, 1440), now));
        assert!(!add_episode(&mut anime, "bleach", "Bleach", mark(1, 900), now));
        assert_eq!(anime["bleach"].episodes.len(), 1);
        assert_eq!(anime["bleach"].total_watch_time, 1440);
    }

    #[test]
    fn dedup_keeps_the_first_occurrence_and_is_idempotent() {
        let mut anime = BTreeMap::new();
        let record = AnimeRecord {
            title: "Bleach".to_string(),
            episodes: vec![mark(2, 1440), mark(1, 1380), mark(2, 600), mark(0, 100)],
            total_watch_time: 0,
            ..AnimeRecord::default()
        };
        anime.insert("bleach".to_string(), record);

        remove_duplicate_episodes(&mut anime);
        let first = anime.clone();
        remove_duplicate_episodes(&mut anime);
        assert_eq!(anime, first);

        let record = &anime["bleach"];
        assert_eq!(
            record.episodes.iter().map(|m| m.number).collect::<Vec<_>>(),
            vec![1, 2]
        );
        // first occurrence of episode 2 (1440s) wins over the later 600s copy
        assert_eq!(record.total_watch_time, 1440 + 1380);
    }

    #[test]
    fn membership_checks_cover_missing_series() {
        let mut anime = BTreeMap::new();
        add_episode(&mut anime, "bleach", "Bleach", mark(5, 1440), Utc::now());
        assert!(is_episode_tracked(&anime, "bleach", 5));
        assert!(!is_episode_tracked(&anime, "bleach", 6));
        assert!(!is_episode_tracked(&anime, "naruto", 5));
    }

    #[test]
    fn tracked_keys_use_the_progress_id_format() {
        let mut anime = BTreeMap::new();
        add_episode(&mut anime, "bleach", "Bleach", mark(5, 1440), Utc::now());
        let keys = tracked_episode_keys(&anime);
        assert!(keys.contains("bleach__episode-5"));
        assert_eq!(keys.len(), 1);
    }
}
