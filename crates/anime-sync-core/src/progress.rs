//! The playback-position ledger: periodic saves, monotonicity, soft deletes,
//! and the orphan policy the garbage collector applies.

use anime_sync_config::GcConfig;
use anime_sync_models::{parse_episode_key, AnimeRecord, ProgressEntry};
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

/// Fraction of the actual video duration that counts as watched.
pub const COMPLETION_THRESHOLD: f64 = 0.85;

/// Absolute tail allowance: with this little left the viewer is into the
/// ending/preview block (typically 90s ending + 30s preview) and the episode
/// counts as watched even below the percentage threshold.
pub const OUTRO_SKIP_SECS: f64 = 120.0;

/// Positions earlier than this are noise (autoplay blips, accidental opens).
pub const MIN_PROGRESS_TO_SAVE_SECS: f64 = 5.0;

const MAX_PLAUSIBLE_DURATION_SECS: f64 = 100_000.0;

/// Whether a playback position counts as a completed episode.
///
/// True when 85% of the actual duration has been watched OR no more than 120
/// seconds remain. An unknown or non-positive duration is never complete.
pub fn should_mark_complete(current_time: f64, duration: f64) -> bool {
    if !duration.is_finite() || duration <= 0.0 || !current_time.is_finite() {
        return false;
    }

    let progress = current_time / duration;
    let remaining = duration - current_time;
    progress >= COMPLETION_THRESHOLD || remaining <= OUTRO_SKIP_SECS
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Entry written.
    Saved,
    /// An existing entry already stores a strictly larger position.
    KeptNewer,
    /// Position is past the completion threshold; the episode ledger is
    /// authoritative from here and no progress entry is needed.
    AlreadyComplete,
    /// Below the minimum-position floor.
    BelowFloor,
    /// Non-finite or implausible input, dropped.
    Rejected,
}

/// Store a playback position. Progress never regresses: a stale smaller
/// position does not overwrite a larger one within the same id. Writing over
/// a tombstone is allowed: that is the re-watch case the merge rules honor.
pub fn upsert_progress(
    progress: &mut BTreeMap<String, ProgressEntry>,
    id: &str,
    current_time: f64,
    duration: f64,
    now: DateTime<Utc>,
) -> SaveOutcome {
    if !current_time.is_finite()
        || !duration.is_finite()
        || current_time < 0.0
        || duration <= 0.0
        || duration > MAX_PLAUSIBLE_DURATION_SECS
    {
        debug!("Dropping implausible progress save for {}: {}s / {}s", id, current_time, duration);
        return SaveOutcome::Rejected;
    }
    if current_time < MIN_PROGRESS_TO_SAVE_SECS {
        return SaveOutcome::BelowFloor;
    }
    if should_mark_complete(current_time, duration) {
        return SaveOutcome::AlreadyComplete;
    }

    let current_time = current_time.floor();
    let duration = duration.floor();

    if let Some(existing) = progress.get(id) {
        if !existing.deleted && existing.current_time > current_time {
            debug!(
                "Keeping higher existing progress for {}: {}s vs new {}s",
                id, existing.current_time, current_time
            );
            return SaveOutcome::KeptNewer;
        }
    }

    progress.insert(id.to_string(), ProgressEntry::new(current_time, duration, now));
    SaveOutcome::Saved
}

/// Replace the entry with a tombstone so the deletion survives merges against
/// devices that have not seen it yet. Returns false when there is nothing
/// live to delete.
pub fn soft_delete(
    progress: &mut BTreeMap<String, ProgressEntry>,
    id: &str,
    now: DateTime<Utc>,
) -> bool {
    match progress.get_mut(id) {
        Some(entry) if !entry.deleted => {
            *entry = entry.clone().into_tombstone(now);
            true
        }
        _ => false,
    }
}

/// Orphan test used by the garbage collector: an entry nothing refers to
/// anymore, old enough and insignificant enough to discard. Tombstones are
/// never orphans; they age out under their own retention window.
pub fn is_orphan(
    id: &str,
    entry: &ProgressEntry,
    anime: &BTreeMap<String, AnimeRecord>,
    tracked: &HashSet<String>,
    config: &GcConfig,
    now: DateTime<Utc>,
) -> bool {
    if entry.deleted {
        return false;
    }
    let Some((slug, _)) = parse_episode_key(id) else {
        // Unmatchable id, can never be promoted or displayed.
        return true;
    };
    if anime.contains_key(slug) {
        return false;
    }
    if tracked.contains(id) {
        return false;
    }
    if now - entry.saved_at < Duration::days(config.orphan_max_age_days) {
        return false;
    }

    let significant = entry.percentage > config.significant_progress_pct
        || entry.current_time > config.significant_watch_secs;
    !significant
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_threshold_contract() {
        assert!(should_mark_complete(1700.0, 2000.0)); // exactly 85%
        assert!(!should_mark_complete(1000.0, 2000.0)); // 50%
        assert!(should_mark_complete(1890.0, 2000.0)); // 110s left, tail rule
        assert!(should_mark_complete(3060.0, 3600.0)); // 85%, tail rule alone would not fire
        assert!(!should_mark_complete(3059.0, 3600.0)); // 84.97%, 541s left
        assert!(!should_mark_complete(500.0, 0.0));
        assert!(!should_mark_complete(500.0, -10.0));
        assert!(!should_mark_complete(f64::NAN, 2000.0));
        assert!(!should_mark_complete(500.0, f64::INFINITY));
    }

    #[test]
    fn both_triggers_are_independent() {
        // the tail rule covers clips shorter than the allowance outright
        assert!(should_mark_complete(0.0, 100.0));
        // a long feature is complete neither at 50% nor 10 minutes from the end
        assert!(!should_mark_complete(3600.0, 7200.0));
        assert!(!should_mark_complete(6000.0, 7200.0));
    }

    #[test]
    fn progress_is_monotonic() {
        let mut progress = BTreeMap::new();
        let now = Utc::now();
        assert_eq!(
            upsert_progress(&mut progress, "show__episode-1", 500.0, 2000.0, now),
            SaveOutcome::Saved
        );
        assert_eq!(
            upsert_progress(&mut progress, "show__episode-1", 300.0, 2000.0, now),
            SaveOutcome::KeptNewer
        );
        assert_eq!(progress["show__episode-1"].current_time, 500.0);
        assert_eq!(
            upsert_progress(&mut progress, "show__episode-1", 600.0, 2000.0, now),
            SaveOutcome::Saved
        );
        assert_eq!(progress["show__episode-1"].current_time, 600.0);
    }

    #[test]
    fn completed_positions_are_not_stored() {
        let mut progress = BTreeMap::new();
        assert_eq!(
            upsert_progress(&mut progress, "show__episode-1", 1700.0, 2000.0, Utc::now()),
            SaveOutcome::AlreadyComplete
        );
        assert!(progress.is_empty());
    }

    #[test]
    fn noise_and_garbage_are_dropped() {
        let mut progress = BTreeMap::new();
        let now = Utc::now();
        assert_eq!(
            upsert_progress(&mut progress, "show__episode-1", 2.0, 2000.0, now),
            SaveOutcome::BelowFloor
        );
        assert_eq!(
            upsert_progress(&mut progress, "show__episode-1", f64::NAN, 2000.0, now),
            SaveOutcome::Rejected
        );
        assert_eq!(
            upsert_progress(&mut progress, "show__episode-1", 500.0, 200_000.0, now),
            SaveOutcome::Rejected
        );
        assert!(progress.is_empty());
    }

    #[test]
    fn a_new_save_replaces_a_tombstone() {
        let mut progress = BTreeMap::new();
        let earlier = Utc::now();
        upsert_progress(&mut progress, "show__episode-1", 500.0, 2000.0, earlier);
        assert!(soft_delete(&mut progress, "show__episode-1", earlier));

        let later = earlier + Duration::minutes(10);
        assert_eq!(
            upsert_progress(&mut progress, "show__episode-1", 60.0, 2000.0, later),
            SaveOutcome::Saved
        );
        let entry = &progress["show__episode-1"];
        assert!(!entry.deleted);
        assert_eq!(entry.current_time, 60.0);
    }

    #[test]
    fn soft_delete_preserves_fields_and_is_single_shot() {
        let mut progress = BTreeMap::new();
        let now = Utc::now();
        upsert_progress(&mut progress, "show__episode-1", 500.0, 2000.0, now);

        assert!(soft_delete(&mut progress, "show__episode-1", now));
        let entry = &progress["show__episode-1"];
        assert!(entry.deleted);
        assert_eq!(entry.current_time, 500.0);

        assert!(!soft_delete(&mut progress, "show__episode-1", now));
        assert!(!soft_delete(&mut progress, "missing", now));
    }

    #[test]
    fn orphan_requires_every_condition() {
        let config = GcConfig::default();
        let now = Utc::now();
        let old = now - Duration::days(20);

        let anime: BTreeMap<String, AnimeRecord> = BTreeMap::new();
        let tracked = HashSet::new();

        // old and insignificant: orphan
        let stale = ProgressEntry::new(30.0, 2000.0, old);
        assert!(is_orphan("gone__episode-1", &stale, &anime, &tracked, &config, now));

        // old but significant watch time: kept
        let significant = ProgressEntry::new(400.0, 2000.0, old);
        assert!(!is_orphan("gone__episode-1", &significant, &anime, &tracked, &config, now));

        // recent: kept regardless of size
        let recent = ProgressEntry::new(30.0, 2000.0, now - Duration::days(2));
        assert!(!is_orphan("gone__episode-1", &recent, &anime, &tracked, &config, now));

        // tracked series: kept regardless of age
        let mut with_series = BTreeMap::new();
        with_series.insert("gone".to_string(), AnimeRecord::default());
        assert!(!is_orphan("gone__episode-1", &stale, &with_series, &tracked, &config, now));

        // unparseable id: orphan regardless of age
        let fresh = ProgressEntry::new(400.0, 2000.0, now);
        assert!(is_orphan("not-a-valid-id", &fresh, &anime, &tracked, &config, now));

        // tombstones are never orphans
        let tombstone = stale.clone().into_tombstone(now);
        assert!(!is_orphan("gone__episode-1", &tombstone, &anime, &tracked, &config, now));
    }
}
