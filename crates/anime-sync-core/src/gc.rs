//! Progress-ledger garbage collection. Runs after every load/merge cycle to
//! bound storage growth: the progress map would otherwise accumulate one
//! entry per episode ever opened.

use crate::{ledger, progress};
use anime_sync_config::GcConfig;
use anime_sync_models::Snapshot;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GcReport {
    /// Entries whose episode is already in the episode ledger.
    pub tracked_removed: usize,
    /// Tombstones past their retention window.
    pub tombstones_expired: usize,
    /// Stale, insignificant entries nothing refers to anymore.
    pub orphans_removed: usize,
}

impl GcReport {
    pub fn total(&self) -> usize {
        self.tracked_removed + self.tombstones_expired + self.orphans_removed
    }
}

/// Prune the progress map in place.
///
/// An entry is removed only once its episode is reflected in the episode
/// ledger, never on percentage alone, so a completion that has not landed in
/// the ledger yet survives the pass. Tombstones are kept for the full
/// retention window so every device crosses at least one sync cycle before
/// the deletion record disappears.
pub fn collect_garbage(snapshot: &mut Snapshot, config: &GcConfig, now: DateTime<Utc>) -> GcReport {
    let tracked = ledger::tracked_episode_keys(&snapshot.anime);
    let mut report = GcReport::default();

    let Snapshot { anime, progress } = snapshot;
    progress.retain(|id, entry| {
        if entry.deleted {
            let age = now - entry.delete_time();
            if age >= Duration::days(config.tombstone_retention_days) {
                debug!("Removing expired tombstone: {}", id);
                report.tombstones_expired += 1;
                return false;
            }
            return true;
        }

        if tracked.contains(id) {
            debug!("Removing progress for tracked episode: {}", id);
            report.tracked_removed += 1;
            return false;
        }

        if progress::is_orphan(id, entry, anime, &tracked, config, now) {
            debug!("Removing orphaned progress: {}", id);
            report.orphans_removed += 1;
            return false;
        }

        true
    });

    if report.total() > 0 {
        info!(
            "Removed {} progress entries ({} tracked, {} expired tombstones, {} orphans)",
            report.total(),
            report.tracked_removed,
            report.tombstones_expired,
            report.orphans_removed
        );
    }
    report
}
