//! Reconciliation of two snapshots of the same user's state (the local copy
//! and the cloud copy) into one, with no data loss across devices and no
//! resurrection of user deletions.
//!
//! This is a pure function of its two inputs: no I/O, deterministic, and
//! safe to run repeatedly (`merge(merge(a, b), b) == merge(a, b)`).

use crate::ledger;
use anime_sync_models::{AnimeRecord, ProgressEntry, Snapshot};
use std::collections::{BTreeMap, BTreeSet};

/// Combine a local and a remote snapshot.
///
/// Episode marks are unioned per series with a fixed remote-then-local scan;
/// the first mark seen for a number supplies its attributes, so the visible
/// fields are deterministic regardless of which device merges. Series
/// metadata follows the local side, the more current editor of cosmetic
/// fields. Progress entries resolve per id by timestamp, with tombstones
/// honored unless a strictly later save overrides them.
pub fn merge_snapshots(local: &Snapshot, remote: &Snapshot) -> Snapshot {
    let mut anime: BTreeMap<String, AnimeRecord> = BTreeMap::new();

    let slugs: BTreeSet<&String> = remote.anime.keys().chain(local.anime.keys()).collect();
    for slug in slugs {
        let remote_record = remote.anime.get(slug.as_str());
        let local_record = local.anime.get(slug.as_str());

        let episodes: Vec<_> = remote_record
            .into_iter()
            .chain(local_record)
            .flat_map(|record| record.episodes.iter().cloned())
            .collect();

        let meta = match local_record.or(remote_record) {
            Some(meta) => meta,
            None => continue,
        };

        anime.insert(
            slug.clone(),
            AnimeRecord {
                title: meta.title.clone(),
                slug: meta.slug.clone(),
                episodes,
                total_watch_time: 0,
                last_watched: meta.last_watched,
            },
        );
    }

    // The de-dup pass enforces first-occurrence-wins on the unioned lists and
    // recomputes the aggregates.
    ledger::remove_duplicate_episodes(&mut anime);

    let mut progress: BTreeMap<String, ProgressEntry> = BTreeMap::new();
    let ids: BTreeSet<&String> = remote.progress.keys().chain(local.progress.keys()).collect();
    for id in ids {
        let merged = match (local.progress.get(id.as_str()), remote.progress.get(id.as_str())) {
            (Some(local_entry), Some(remote_entry)) => {
                resolve_progress_conflict(local_entry, remote_entry)
            }
            (Some(local_entry), None) => local_entry,
            (None, Some(remote_entry)) => remote_entry,
            (None, None) => continue,
        };
        progress.insert(id.clone(), merged.clone());
    }

    Snapshot { anime, progress }
}

fn resolve_progress_conflict<'a>(
    local: &'a ProgressEntry,
    remote: &'a ProgressEntry,
) -> &'a ProgressEntry {
    match (local.deleted, remote.deleted) {
        // Both live: the later save wins; ties go to the remote copy so the
        // outcome does not depend on which device runs the merge.
        (false, false) => {
            if local.saved_at > remote.saved_at {
                local
            } else {
                remote
            }
        }
        // A delete beats a live entry only when it is the later event;
        // otherwise the live entry is a legitimate re-watch and wins.
        (true, false) => {
            if local.delete_time() > remote.saved_at {
                local
            } else {
                remote
            }
        }
        (false, true) => {
            if remote.delete_time() > local.saved_at {
                remote
            } else {
                local
            }
        }
        // Both deleted: no information is lost either way.
        (true, true) => remote,
    }
}
