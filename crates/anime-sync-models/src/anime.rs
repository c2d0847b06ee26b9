use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Shortest duration accepted for a watched episode, in seconds.
pub const MIN_EPISODE_DURATION_SECS: u32 = 1;
/// Longest plausible episode duration (2 hours). Player-reported values above
/// this are clamped, never rejected; a malformed upstream duration must not
/// abort the save that carries it.
pub const MAX_EPISODE_DURATION_SECS: u32 = 7200;

/// A single watched episode. Created once when playback crosses the
/// completion threshold and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EpisodeMark {
    pub number: u32,
    pub watched_at: DateTime<Utc>,
    pub duration: u32,
}

impl EpisodeMark {
    pub fn new(number: u32, watched_at: DateTime<Utc>, duration_secs: u32) -> Self {
        Self {
            number,
            watched_at,
            duration: duration_secs.clamp(MIN_EPISODE_DURATION_SECS, MAX_EPISODE_DURATION_SECS),
        }
    }
}

/// Per-series record of watched episodes, keyed by slug in the snapshot map.
///
/// `episodes` holds at most one mark per episode number, sorted ascending;
/// `total_watch_time` is always recomputable as the sum of their durations.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnimeRecord {
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(default, deserialize_with = "crate::lenient::seq_or_default")]
    pub episodes: Vec<EpisodeMark>,
    #[serde(default)]
    pub total_watch_time: u64,
    #[serde(default)]
    pub last_watched: Option<DateTime<Utc>>,
}

impl AnimeRecord {
    pub fn contains_episode(&self, number: u32) -> bool {
        self.episodes.iter().any(|mark| mark.number == number)
    }

    pub fn recompute_watch_time(&mut self) {
        self.total_watch_time = self.episodes.iter().map(|mark| u64::from(mark.duration)).sum();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn implausible_durations_are_clamped_not_rejected() {
        let now = Utc::now();
        assert_eq!(EpisodeMark::new(1, now, 0).duration, MIN_EPISODE_DURATION_SECS);
        assert_eq!(EpisodeMark::new(1, now, 1440).duration, 1440);
        assert_eq!(EpisodeMark::new(1, now, 500_000).duration, MAX_EPISODE_DURATION_SECS);
    }

    #[test]
    fn watch_time_recomputes_from_marks() {
        let now = Utc::now();
        let mut record = AnimeRecord {
            title: "Bleach".to_string(),
            episodes: vec![EpisodeMark::new(1, now, 1440), EpisodeMark::new(2, now, 1380)],
            total_watch_time: 9999,
            ..Default::default()
        };
        record.recompute_watch_time();
        assert_eq!(record.total_watch_time, 2820);
    }
}
