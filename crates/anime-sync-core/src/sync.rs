//! The sync orchestrator: owns all remote I/O and its timing/retry policy.
//! Reconciliation rules live in [`crate::merge`]; this module only decides
//! when reads and writes happen and keeps them serialized.

use crate::gc;
use crate::ledger;
use crate::merge;
use crate::progress::{self, SaveOutcome};
use anime_sync_config::{GcConfig, SyncTuning};
use anime_sync_models::{episode_key, parse_episode_key, EpisodeMark, Snapshot, UserDocument};
use anime_sync_stores::{KeyValues, LocalStore, RemoteStore, StoreError};
use anyhow::Result;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

const ANIME_DATA_KEY: &str = "animeData";
const VIDEO_PROGRESS_KEY: &str = "videoProgress";
const USER_ID_KEY: &str = "userId";

#[derive(Debug, Clone)]
pub struct UserIdentity {
    pub uid: String,
    pub email: Option<String>,
}

/// Non-blocking sync indicator. Remote failures end up here, never as errors
/// propagated to callers; nothing that already succeeded locally is rolled
/// back because a remote step failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    LocalOnly,
    Syncing,
    Synced,
    SyncError,
}

impl SyncStatus {
    pub fn label(&self) -> &'static str {
        match self {
            SyncStatus::LocalOnly => "local only",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Synced => "cloud synced",
            SyncStatus::SyncError => "sync error",
        }
    }
}

/// Remote-write bookkeeping. `pending` is replaced, never merged, by newer
/// payloads: merging would carry keys the newer payload deleted back in and
/// resurrect them.
#[derive(Default)]
struct SaveState {
    pending: Option<Snapshot>,
    in_flight: bool,
    retry_count: u32,
    debounce: Option<JoinHandle<()>>,
}

struct LocalState {
    snapshot: Snapshot,
    user_id: Option<String>,
}

struct Inner {
    local: Arc<dyn LocalStore>,
    remote: RwLock<Box<dyn RemoteStore>>,
    user: UserIdentity,
    collection: String,
    tuning: SyncTuning,
    gc: GcConfig,
    state: Mutex<SaveState>,
    status: watch::Sender<SyncStatus>,
}

/// Cheap-clone handle; all clones share one set of ledgers, one pending
/// payload, and one in-flight flag, so every path in the process funnels
/// through the same write serialization.
#[derive(Clone)]
pub struct SyncOrchestrator {
    inner: Arc<Inner>,
}

impl SyncOrchestrator {
    pub fn new(
        local: Arc<dyn LocalStore>,
        remote: Box<dyn RemoteStore>,
        user: UserIdentity,
        collection: String,
        tuning: SyncTuning,
        gc: GcConfig,
    ) -> Self {
        let (status, _) = watch::channel(SyncStatus::LocalOnly);
        Self {
            inner: Arc::new(Inner {
                local,
                remote: RwLock::new(remote),
                user,
                collection,
                tuning,
                gc,
                state: Mutex::new(SaveState::default()),
                status,
            }),
        }
    }

    pub fn user(&self) -> &UserIdentity {
        &self.inner.user
    }

    pub fn status(&self) -> SyncStatus {
        *self.inner.status.borrow()
    }

    /// Watch the sync indicator (used by long-running frontends).
    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.inner.status.subscribe()
    }

    fn set_status(&self, status: SyncStatus) {
        self.inner.status.send_replace(status);
    }

    /// Current on-device snapshot, read fresh from the store.
    pub async fn local_snapshot(&self) -> Snapshot {
        self.read_local_state().await.snapshot
    }

    // ---- load / reconcile ------------------------------------------------

    /// Pull the remote document, reconcile it with local state, persist the
    /// result on both sides. A failed pull degrades to local-only state and
    /// a `SyncError` status instead of blocking.
    #[instrument(skip(self))]
    pub async fn load_and_sync(&self) -> Result<Snapshot> {
        self.set_status(SyncStatus::Syncing);
        info!(
            operation = "sync_start",
            user = %self.inner.user.uid,
            "Starting load-and-sync cycle"
        );

        let pulled = self.pull_remote().await;
        let local = self.read_local_state().await;
        let same_user = local.user_id.as_deref() == Some(self.inner.user.uid.as_str());

        let remote_doc = match pulled {
            Ok(doc) => doc,
            Err(err) => {
                warn!(
                    operation = "pull",
                    status = "error",
                    error = %err,
                    "Remote pull failed, continuing with local state"
                );
                let mut snapshot = local.snapshot;
                ledger::remove_duplicate_episodes(&mut snapshot.anime);
                gc::collect_garbage(&mut snapshot, &self.inner.gc, Utc::now());
                if let Err(err) = self.persist_local(&snapshot).await {
                    warn!("Failed to persist local snapshot: {}", err);
                }
                self.set_status(SyncStatus::SyncError);
                return Ok(snapshot);
            }
        };

        let (mut snapshot, push_back) = match remote_doc {
            Some(doc) => {
                if same_user && !local.snapshot.anime.is_empty() {
                    let merged = merge::merge_snapshots(&local.snapshot, &doc.snapshot);
                    info!(
                        "Merged local and remote snapshots: {} episodes",
                        merged.episode_count()
                    );
                    (merged, true)
                } else {
                    // Fresh identity on this device: adopt the remote ledgers
                    // wholesale, but keep this device's in-flight positions so
                    // pre-sign-in progress survives.
                    let mut adopted = doc.snapshot;
                    for (id, entry) in &local.snapshot.progress {
                        adopted.progress.insert(id.clone(), entry.clone());
                    }
                    ledger::remove_duplicate_episodes(&mut adopted.anime);
                    info!("Adopted remote snapshot: {} episodes", adopted.episode_count());
                    (adopted, false)
                }
            }
            None => {
                // Nothing in the cloud yet; seed it from local state when the
                // identity matches, otherwise start clean.
                let mut snapshot = if same_user { local.snapshot } else { Snapshot::default() };
                ledger::remove_duplicate_episodes(&mut snapshot.anime);
                let push = !snapshot.is_empty();
                (snapshot, push)
            }
        };

        gc::collect_garbage(&mut snapshot, &self.inner.gc, Utc::now());

        if let Err(err) = self.persist_local(&snapshot).await {
            warn!("Failed to persist reconciled snapshot locally: {}", err);
        }

        if push_back {
            // The reconciled union goes back up before the cycle completes.
            self.save_now(snapshot.clone()).await;
        } else {
            self.set_status(SyncStatus::Synced);
        }

        Ok(snapshot)
    }

    async fn pull_remote(&self) -> Result<Option<UserDocument>, StoreError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = {
                let remote = self.inner.remote.read().await;
                remote
                    .get_document(&self.inner.collection, &self.inner.user.uid)
                    .await
            };
            match result {
                Ok(doc) => return Ok(doc),
                Err(err) if err.is_transient() && attempt < self.inner.tuning.pull_retries => {
                    info!(
                        "Cloud fetch failed, retrying ({}/{}): {}",
                        attempt, self.inner.tuning.pull_retries, err
                    );
                    tokio::time::sleep(Duration::from_millis(
                        self.inner.tuning.pull_retry_delay_ms * u64::from(attempt),
                    ))
                    .await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    // ---- local mutations -------------------------------------------------

    /// Record a completed episode. The ledger write lands before the progress
    /// cleanup; a crash in between leaves an orphaned progress entry for the
    /// collector, never a lost episode.
    pub async fn record_episode(
        &self,
        slug: &str,
        title: &str,
        number: u32,
        duration_secs: u32,
    ) -> Result<bool> {
        let mut state = self.read_local_state().await;
        let now = Utc::now();
        let mark = EpisodeMark::new(number, now, duration_secs);
        if !ledger::add_episode(&mut state.snapshot.anime, slug, title, mark, now) {
            return Ok(false);
        }

        let mut data = KeyValues::new();
        data.insert(
            ANIME_DATA_KEY.to_string(),
            serde_json::to_value(&state.snapshot.anime)?,
        );
        self.inner.local.set(data).await?;

        let id = episode_key(slug, number);
        if state.snapshot.progress.remove(&id).is_some() {
            let mut data = KeyValues::new();
            data.insert(
                VIDEO_PROGRESS_KEY.to_string(),
                serde_json::to_value(&state.snapshot.progress)?,
            );
            self.inner.local.set(data).await?;
        }

        info!("Tracked {} episode {}", slug, number);
        self.schedule_save(state.snapshot).await;
        Ok(true)
    }

    /// Record an in-flight playback position.
    pub async fn record_progress(
        &self,
        slug: &str,
        number: u32,
        current_time: f64,
        duration: f64,
    ) -> Result<SaveOutcome> {
        let mut state = self.read_local_state().await;
        if ledger::is_episode_tracked(&state.snapshot.anime, slug, number) {
            return Ok(SaveOutcome::AlreadyComplete);
        }

        let id = episode_key(slug, number);
        let outcome = progress::upsert_progress(
            &mut state.snapshot.progress,
            &id,
            current_time,
            duration,
            Utc::now(),
        );
        if outcome == SaveOutcome::Saved {
            let mut data = KeyValues::new();
            data.insert(
                VIDEO_PROGRESS_KEY.to_string(),
                serde_json::to_value(&state.snapshot.progress)?,
            );
            self.inner.local.set(data).await?;
            self.schedule_save(state.snapshot).await;
        }
        Ok(outcome)
    }

    /// Tombstone one progress entry. Deletions skip the debounce so the
    /// intent reaches the cloud before the popup goes away.
    pub async fn delete_progress(&self, id: &str) -> Result<bool> {
        let mut state = self.read_local_state().await;
        if !progress::soft_delete(&mut state.snapshot.progress, id, Utc::now()) {
            return Ok(false);
        }

        let mut data = KeyValues::new();
        data.insert(
            VIDEO_PROGRESS_KEY.to_string(),
            serde_json::to_value(&state.snapshot.progress)?,
        );
        self.inner.local.set(data).await?;

        info!("Deleted progress entry {}", id);
        self.save_now(state.snapshot).await;
        Ok(true)
    }

    /// Remove a whole series on explicit user request, tombstoning its
    /// progress entries so the removal propagates to other devices.
    pub async fn remove_series(&self, slug: &str) -> Result<bool> {
        let mut state = self.read_local_state().await;
        if state.snapshot.anime.remove(slug).is_none() {
            return Ok(false);
        }

        let now = Utc::now();
        let ids: Vec<String> = state
            .snapshot
            .progress
            .keys()
            .filter(|id| matches!(parse_episode_key(id), Some((entry_slug, _)) if entry_slug == slug))
            .cloned()
            .collect();
        for id in &ids {
            progress::soft_delete(&mut state.snapshot.progress, id, now);
        }

        let mut data = KeyValues::new();
        data.insert(
            ANIME_DATA_KEY.to_string(),
            serde_json::to_value(&state.snapshot.anime)?,
        );
        self.inner.local.set(data).await?;
        let mut data = KeyValues::new();
        data.insert(
            VIDEO_PROGRESS_KEY.to_string(),
            serde_json::to_value(&state.snapshot.progress)?,
        );
        self.inner.local.set(data).await?;

        info!("Removed series {} ({} progress entries tombstoned)", slug, ids.len());
        self.save_now(state.snapshot).await;
        Ok(true)
    }

    // ---- remote writes ---------------------------------------------------

    /// Queue a snapshot for upload after the debounce window. Bursts of
    /// mutations coalesce into one write; each call replaces the payload.
    pub async fn schedule_save(&self, snapshot: Snapshot) {
        let mut state = self.inner.state.lock().await;
        state.pending = Some(snapshot);
        if let Some(handle) = state.debounce.take() {
            handle.abort();
        }

        let this = self.clone();
        let delay = Duration::from_millis(self.inner.tuning.save_debounce_ms);
        state.debounce = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Hand off to an independent task: aborting a rearmed debounce
            // must never cancel a write that already started.
            let drainer = this.clone();
            tokio::spawn(async move { drainer.drain_pending().await });
        }));
    }

    /// Upload without waiting for the debounce window.
    pub async fn save_now(&self, snapshot: Snapshot) {
        {
            let mut state = self.inner.state.lock().await;
            if let Some(handle) = state.debounce.take() {
                handle.abort();
            }
            state.pending = Some(snapshot);
        }
        self.drain_pending().await;
    }

    /// Best-effort shutdown flush: one attempt, no retries. The data is
    /// append-mostly and reconciles on next load if this write is lost.
    pub async fn flush(&self) {
        let payload = {
            let mut state = self.inner.state.lock().await;
            if let Some(handle) = state.debounce.take() {
                handle.abort();
            }
            if state.in_flight {
                None
            } else {
                state.pending.take()
            }
        };
        let Some(payload) = payload else { return };

        warn!("Flushing pending cloud save on shutdown");
        match self.push_document(&payload).await {
            Ok(()) => self.set_status(SyncStatus::Synced),
            Err(err) => warn!("Shutdown flush failed (will reconcile on next load): {}", err),
        }
    }

    /// Serialized upload loop: exactly one write in flight, exponential
    /// backoff on failure, abandonment after the retry budget. A payload
    /// queued while a write is in flight is picked up on the next turn.
    async fn drain_pending(&self) {
        {
            let mut state = self.inner.state.lock().await;
            if state.in_flight || state.pending.is_none() {
                return;
            }
            state.in_flight = true;
        }

        loop {
            let payload = {
                let mut state = self.inner.state.lock().await;
                match state.pending.take() {
                    Some(payload) => payload,
                    None => {
                        state.retry_count = 0;
                        state.in_flight = false;
                        return;
                    }
                }
            };

            match self.push_document(&payload).await {
                Ok(()) => {
                    let mut state = self.inner.state.lock().await;
                    state.retry_count = 0;
                    drop(state);
                    self.set_status(SyncStatus::Synced);
                    debug!("Snapshot saved to cloud");
                }
                Err(err) => {
                    let delay = {
                        let mut state = self.inner.state.lock().await;
                        state.retry_count += 1;
                        if state.retry_count >= self.inner.tuning.max_save_retries {
                            warn!(
                                operation = "push",
                                status = "error",
                                error = %err,
                                attempts = state.retry_count,
                                "Giving up on cloud save; next local change will retry"
                            );
                            state.retry_count = 0;
                            state.in_flight = false;
                            drop(state);
                            self.set_status(SyncStatus::SyncError);
                            return;
                        }
                        // A newer payload replaces the failed one; otherwise
                        // the failed payload goes back for the retry.
                        if state.pending.is_none() {
                            state.pending = Some(payload);
                        }
                        self.backoff_delay(state.retry_count)
                    };
                    warn!("Cloud save failed ({}), retrying in {:?}", err, delay);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self
            .inner
            .tuning
            .retry_base_delay_ms
            .saturating_mul(1u64 << exponent);
        Duration::from_millis(delay.min(self.inner.tuning.max_retry_delay_ms))
    }

    async fn push_document(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let document = UserDocument {
            snapshot: snapshot.clone(),
            last_updated: Some(Utc::now()),
            email: self.inner.user.email.clone(),
        };
        let remote = self.inner.remote.read().await;
        remote
            .set_document(&self.inner.collection, &self.inner.user.uid, &document)
            .await
    }

    // ---- local persistence -----------------------------------------------

    async fn read_local_state(&self) -> LocalState {
        let values = self
            .inner
            .local
            .get(&[ANIME_DATA_KEY, VIDEO_PROGRESS_KEY, USER_ID_KEY])
            .await;
        let user_id = values
            .get(USER_ID_KEY)
            .and_then(Value::as_str)
            .map(str::to_string);

        let mut doc = serde_json::Map::new();
        if let Some(anime) = values.get(ANIME_DATA_KEY) {
            doc.insert(ANIME_DATA_KEY.to_string(), anime.clone());
        }
        if let Some(progress) = values.get(VIDEO_PROGRESS_KEY) {
            doc.insert(VIDEO_PROGRESS_KEY.to_string(), progress.clone());
        }
        // The lenient decoders reset whatever shape is wrong in storage.
        let snapshot = serde_json::from_value(Value::Object(doc)).unwrap_or_default();

        LocalState { snapshot, user_id }
    }

    async fn persist_local(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let mut data = KeyValues::new();
        data.insert(ANIME_DATA_KEY.to_string(), serde_json::to_value(&snapshot.anime)?);
        data.insert(
            VIDEO_PROGRESS_KEY.to_string(),
            serde_json::to_value(&snapshot.progress)?,
        );
        data.insert(
            USER_ID_KEY.to_string(),
            Value::String(self.inner.user.uid.clone()),
        );
        self.inner.local.set(data).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anime_sync_models::AnimeRecord;
    use anime_sync_stores::{MemoryRemote, MemoryStore};
    use chrono::Duration as ChronoDuration;

    const UID: &str = "uid-1";

    fn orchestrator(local: MemoryStore, remote: MemoryRemote) -> SyncOrchestrator {
        SyncOrchestrator::new(
            Arc::new(local),
            Box::new(remote),
            UserIdentity {
                uid: UID.to_string(),
                email: Some("viewer@example.com".to_string()),
            },
            "users".to_string(),
            SyncTuning::default(),
            GcConfig::default(),
        )
    }

    fn series(title: &str, numbers: std::ops::RangeInclusive<u32>) -> AnimeRecord {
        let now = Utc::now();
        let mut record = AnimeRecord {
            title: title.to_string(),
            episodes: numbers.map(|n| EpisodeMark::new(n, now, 1440)).collect(),
            ..AnimeRecord::default()
        };
        record.recompute_watch_time();
        record
    }

    async fn seed_local(local: &MemoryStore, snapshot: &Snapshot, user_id: &str) {
        let mut data = KeyValues::new();
        data.insert(
            ANIME_DATA_KEY.to_string(),
            serde_json::to_value(&snapshot.anime).unwrap(),
        );
        data.insert(
            VIDEO_PROGRESS_KEY.to_string(),
            serde_json::to_value(&snapshot.progress).unwrap(),
        );
        data.insert(USER_ID_KEY.to_string(), Value::String(user_id.to_string()));
        local.set(data).await.unwrap();
    }

    /// Let spawned push tasks run to completion under the paused clock.
    async fn settle() {
        for _ in 0..3 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_coalesces_bursts_into_one_write() {
        let remote = MemoryRemote::new();
        let sync = orchestrator(MemoryStore::new(), remote.clone());

        let mut first = Snapshot::default();
        first.anime.insert("bleach".to_string(), series("Bleach", 1..=1));
        let mut second = Snapshot::default();
        second.anime.insert("bleach".to_string(), series("Bleach", 1..=2));

        sync.schedule_save(first).await;
        sync.schedule_save(second).await;
        tokio::time::sleep(Duration::from_millis(600)).await;
        settle().await;

        assert_eq!(remote.set_calls(), 1);
        let doc = remote.document("users", UID).unwrap();
        assert_eq!(doc.snapshot.episode_count(), 2);
        assert_eq!(doc.email.as_deref(), Some("viewer@example.com"));
        assert_eq!(sync.status(), SyncStatus::Synced);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_retry_with_backoff_until_success() {
        let remote = MemoryRemote::new();
        let sync = orchestrator(MemoryStore::new(), remote.clone());
        remote.fail_next(2);

        let mut snapshot = Snapshot::default();
        snapshot.anime.insert("bleach".to_string(), series("Bleach", 1..=3));
        sync.save_now(snapshot).await;

        assert_eq!(remote.set_calls(), 3);
        assert!(remote.document("users", UID).is_some());
        assert_eq!(sync.status(), SyncStatus::Synced);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_the_retry_budget() {
        let remote = MemoryRemote::new();
        let sync = orchestrator(MemoryStore::new(), remote.clone());
        remote.fail_next(10);

        let mut snapshot = Snapshot::default();
        snapshot.anime.insert("bleach".to_string(), series("Bleach", 1..=3));
        sync.save_now(snapshot).await;

        assert_eq!(remote.set_calls(), SyncTuning::default().max_save_retries);
        assert!(remote.document("users", UID).is_none());
        assert_eq!(sync.status(), SyncStatus::SyncError);
    }

    #[tokio::test(start_paused = true)]
    async fn load_merges_overlapping_histories_and_pushes_the_union() {
        let local = MemoryStore::new();
        let remote = MemoryRemote::new();

        let mut local_snapshot = Snapshot::default();
        local_snapshot
            .anime
            .insert("bleach".to_string(), series("Bleach", 1..=13));
        seed_local(&local, &local_snapshot, UID).await;

        let mut remote_snapshot = Snapshot::default();
        remote_snapshot
            .anime
            .insert("bleach".to_string(), series("BLEACH (TV)", 10..=20));
        remote.insert_document(
            "users",
            UID,
            UserDocument {
                snapshot: remote_snapshot,
                last_updated: Some(Utc::now()),
                email: None,
            },
        );

        let sync = orchestrator(local.clone(), remote.clone());
        let merged = sync.load_and_sync().await.unwrap();
        settle().await;

        assert_eq!(merged.anime["bleach"].title, "Bleach");
        assert_eq!(merged.episode_count(), 20);
        assert_eq!(merged.anime["bleach"].total_watch_time, 20 * 1440);

        // the reconciled union was pushed back up
        let doc = remote.document("users", UID).unwrap();
        assert_eq!(doc.snapshot.episode_count(), 20);
        assert_eq!(sync.status(), SyncStatus::Synced);

        // and persisted locally under this identity
        let stored = local.get(&[USER_ID_KEY]).await;
        assert_eq!(stored[USER_ID_KEY], Value::String(UID.to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn a_different_signed_in_user_replaces_local_ledgers() {
        let local = MemoryStore::new();
        let remote = MemoryRemote::new();

        let mut stale = Snapshot::default();
        stale.anime.insert("naruto".to_string(), series("Naruto", 1..=50));
        stale.progress.insert(
            "one-piece__episode-3".to_string(),
            anime_sync_models::ProgressEntry::new(400.0, 1440.0, Utc::now()),
        );
        seed_local(&local, &stale, "somebody-else").await;

        let mut cloud = Snapshot::default();
        cloud.anime.insert("bleach".to_string(), series("Bleach", 1..=5));
        remote.insert_document(
            "users",
            UID,
            UserDocument {
                snapshot: cloud,
                last_updated: None,
                email: None,
            },
        );

        let sync = orchestrator(local.clone(), remote.clone());
        let snapshot = sync.load_and_sync().await.unwrap();
        settle().await;

        // remote ledgers adopted wholesale, local in-flight positions kept
        assert!(snapshot.anime.contains_key("bleach"));
        assert!(!snapshot.anime.contains_key("naruto"));
        assert!(snapshot.progress.contains_key("one-piece__episode-3"));
        // nothing pushed back; the cloud copy was already authoritative
        assert_eq!(remote.set_calls(), 0);

        let stored = local.get(&[USER_ID_KEY]).await;
        assert_eq!(stored[USER_ID_KEY], Value::String(UID.to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn first_sync_seeds_the_cloud_from_local_state() {
        let local = MemoryStore::new();
        let remote = MemoryRemote::new();

        let mut local_snapshot = Snapshot::default();
        local_snapshot
            .anime
            .insert("bleach".to_string(), series("Bleach", 1..=13));
        seed_local(&local, &local_snapshot, UID).await;

        let sync = orchestrator(local, remote.clone());
        let snapshot = sync.load_and_sync().await.unwrap();
        settle().await;

        assert_eq!(snapshot.episode_count(), 13);
        let doc = remote.document("users", UID).unwrap();
        assert_eq!(doc.snapshot.episode_count(), 13);
    }

    #[tokio::test(start_paused = true)]
    async fn a_failed_pull_degrades_to_local_only_state() {
        let local = MemoryStore::new();
        let remote = MemoryRemote::new();

        let mut local_snapshot = Snapshot::default();
        local_snapshot
            .anime
            .insert("bleach".to_string(), series("Bleach", 1..=13));
        seed_local(&local, &local_snapshot, UID).await;
        remote.fail_next(10);

        let sync = orchestrator(local, remote.clone());
        let snapshot = sync.load_and_sync().await.unwrap();

        assert_eq!(snapshot.episode_count(), 13);
        assert_eq!(remote.get_calls(), SyncTuning::default().pull_retries);
        assert_eq!(remote.set_calls(), 0);
        assert_eq!(sync.status(), SyncStatus::SyncError);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_uploads_the_pending_payload_once() {
        let remote = MemoryRemote::new();
        let sync = orchestrator(MemoryStore::new(), remote.clone());

        let mut snapshot = Snapshot::default();
        snapshot.anime.insert("bleach".to_string(), series("Bleach", 1..=2));
        sync.schedule_save(snapshot).await;

        // teardown arrives before the debounce window elapses
        sync.flush().await;
        assert_eq!(remote.set_calls(), 1);
        assert!(remote.document("users", UID).is_some());

        // the aborted debounce never fires a second write
        settle().await;
        assert_eq!(remote.set_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn recording_an_episode_clears_its_progress_entry() {
        let local = MemoryStore::new();
        let remote = MemoryRemote::new();
        seed_local(&local, &Snapshot::default(), UID).await;

        let sync = orchestrator(local.clone(), remote.clone());

        assert_eq!(
            sync.record_progress("show", 5, 300.0, 1440.0).await.unwrap(),
            SaveOutcome::Saved
        );
        assert!(sync.record_episode("show", "Show", 5, 1440).await.unwrap());

        let snapshot = sync.local_snapshot().await;
        assert!(snapshot.anime["show"].contains_episode(5));
        assert!(!snapshot.progress.contains_key("show__episode-5"));

        // a second recording is a no-op, and positions for a tracked episode
        // are no longer stored
        assert!(!sync.record_episode("show", "Show", 5, 1440).await.unwrap());
        assert_eq!(
            sync.record_progress("show", 5, 300.0, 1440.0).await.unwrap(),
            SaveOutcome::AlreadyComplete
        );

        tokio::time::sleep(Duration::from_millis(600)).await;
        settle().await;
        let doc = remote.document("users", UID).unwrap();
        assert!(doc.snapshot.anime["show"].contains_episode(5));
        assert!(doc.snapshot.progress.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn deleting_progress_pushes_a_tombstone_immediately() {
        let local = MemoryStore::new();
        let remote = MemoryRemote::new();
        seed_local(&local, &Snapshot::default(), UID).await;

        let sync = orchestrator(local, remote.clone());
        sync.record_progress("show", 7, 600.0, 1440.0).await.unwrap();
        settle().await;

        assert!(sync.delete_progress("show__episode-7").await.unwrap());
        let doc = remote.document("users", UID).unwrap();
        let entry = &doc.snapshot.progress["show__episode-7"];
        assert!(entry.deleted);
        assert!(entry.deleted_at.is_some());
        assert_eq!(entry.current_time, 600.0);

        assert!(!sync.delete_progress("show__episode-7").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn removing_a_series_tombstones_its_progress() {
        let local = MemoryStore::new();
        let remote = MemoryRemote::new();

        let mut snapshot = Snapshot::default();
        snapshot.anime.insert("bleach".to_string(), series("Bleach", 1..=3));
        snapshot.progress.insert(
            "bleach__episode-4".to_string(),
            anime_sync_models::ProgressEntry::new(500.0, 1440.0, Utc::now()),
        );
        snapshot.progress.insert(
            "naruto__episode-1".to_string(),
            anime_sync_models::ProgressEntry::new(500.0, 1440.0, Utc::now()),
        );
        seed_local(&local, &snapshot, UID).await;

        let sync = orchestrator(local, remote.clone());
        assert!(sync.remove_series("bleach").await.unwrap());
        assert!(!sync.remove_series("bleach").await.unwrap());

        let doc = remote.document("users", UID).unwrap();
        assert!(!doc.snapshot.anime.contains_key("bleach"));
        assert!(doc.snapshot.progress["bleach__episode-4"].deleted);
        assert!(!doc.snapshot.progress["naruto__episode-1"].deleted);
    }

    #[tokio::test(start_paused = true)]
    async fn a_newer_payload_supersedes_the_retrying_one() {
        let remote = MemoryRemote::new();
        let sync = orchestrator(MemoryStore::new(), remote.clone());
        remote.fail_next(1);

        let mut first = Snapshot::default();
        first.anime.insert("bleach".to_string(), series("Bleach", 1..=1));
        let mut second = Snapshot::default();
        second.anime.insert("bleach".to_string(), series("Bleach", 1..=2));

        // the first push fails once and backs off; the second arrives during
        // the backoff window and replaces the stale payload
        let handle = {
            let sync = sync.clone();
            let first = first.clone();
            tokio::spawn(async move { sync.save_now(first).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        sync.schedule_save(second).await;
        handle.await.unwrap();
        settle().await;

        let doc = remote.document("users", UID).unwrap();
        assert_eq!(doc.snapshot.episode_count(), 2);
        assert_eq!(sync.status(), SyncStatus::Synced);
    }

    #[tokio::test(start_paused = true)]
    async fn gc_runs_on_every_load_cycle() {
        let local = MemoryStore::new();
        let remote = MemoryRemote::new();

        let mut snapshot = Snapshot::default();
        snapshot.anime.insert("bleach".to_string(), series("Bleach", 1..=3));
        // redundant: its episode is already tracked
        snapshot.progress.insert(
            "bleach__episode-2".to_string(),
            anime_sync_models::ProgressEntry::new(700.0, 1440.0, Utc::now()),
        );
        // orphan: stale, insignificant, unknown series
        snapshot.progress.insert(
            "gone__episode-1".to_string(),
            anime_sync_models::ProgressEntry::new(
                30.0,
                1440.0,
                Utc::now() - ChronoDuration::days(20),
            ),
        );
        seed_local(&local, &snapshot, UID).await;

        let sync = orchestrator(local, remote);
        let reconciled = sync.load_and_sync().await.unwrap();
        settle().await;

        assert!(!reconciled.progress.contains_key("bleach__episode-2"));
        assert!(!reconciled.progress.contains_key("gone__episode-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_local_state_heals_to_defaults() {
        let local = MemoryStore::new();
        let mut data = KeyValues::new();
        data.insert(
            ANIME_DATA_KEY.to_string(),
            serde_json::json!("definitely not a map"),
        );
        data.insert(VIDEO_PROGRESS_KEY.to_string(), serde_json::json!(42));
        data.insert(USER_ID_KEY.to_string(), Value::String(UID.to_string()));
        local.set(data).await.unwrap();

        let sync = orchestrator(local, MemoryRemote::new());
        let snapshot = sync.local_snapshot().await;
        assert!(snapshot.is_empty());
    }
}
