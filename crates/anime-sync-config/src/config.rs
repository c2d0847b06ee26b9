use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub remote: Option<RemoteConfig>,
    #[serde(default)]
    pub sync: SyncTuning,
    #[serde(default)]
    pub gc: GcConfig,
    #[serde(default)]
    pub scheduler: Option<SchedulerConfig>,
}

/// Cloud document store connection (Firebase Realtime Database REST).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub enabled: bool,
    /// e.g. `https://my-project-default-rtdb.firebaseio.com`
    pub database_url: String,
    pub api_key: String,
    #[serde(default = "default_collection")]
    pub collection: String,
}

/// Timing and retry policy for the sync orchestrator. The conflict rules
/// themselves are not configurable; only when and how often I/O happens is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncTuning {
    /// Idle window that coalesces a burst of local mutations into one push.
    #[serde(default = "default_save_debounce_ms")]
    pub save_debounce_ms: u64,

    /// Push attempts before giving up until the next local mutation.
    #[serde(default = "default_max_save_retries")]
    pub max_save_retries: u32,

    /// First retry delay; doubles per attempt up to `max_retry_delay_ms`.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,

    /// Pull attempts during load before degrading to local-only state.
    #[serde(default = "default_pull_retries")]
    pub pull_retries: u32,

    #[serde(default = "default_pull_retry_delay_ms")]
    pub pull_retry_delay_ms: u64,

    /// Device-store operations that exceed this are treated as "no data".
    #[serde(default = "default_storage_timeout_ms")]
    pub storage_timeout_ms: u64,
}

/// Retention windows for the progress-entry garbage collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GcConfig {
    /// Untracked progress entries younger than this are left alone.
    #[serde(default = "default_orphan_max_age_days")]
    pub orphan_max_age_days: i64,

    /// Tombstones must outlive one full sync cycle on every device before
    /// being purged, or a slow device resurrects the deleted entry.
    #[serde(default = "default_tombstone_retention_days")]
    pub tombstone_retention_days: i64,

    /// An entry above either floor counts as significant and is never
    /// collected as an orphan.
    #[serde(default = "default_significant_progress_pct")]
    pub significant_progress_pct: u8,

    #[serde(default = "default_significant_watch_secs")]
    pub significant_watch_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,
    #[serde(default = "default_true")]
    pub run_on_startup: bool,
}

fn default_collection() -> String {
    "users".to_string()
}

fn default_save_debounce_ms() -> u64 {
    500
}

fn default_max_save_retries() -> u32 {
    5
}

fn default_retry_base_delay_ms() -> u64 {
    2000
}

fn default_max_retry_delay_ms() -> u64 {
    30_000
}

fn default_pull_retries() -> u32 {
    3
}

fn default_pull_retry_delay_ms() -> u64 {
    1000
}

fn default_storage_timeout_ms() -> u64 {
    5000
}

fn default_orphan_max_age_days() -> i64 {
    14
}

fn default_tombstone_retention_days() -> i64 {
    30
}

fn default_significant_progress_pct() -> u8 {
    5
}

fn default_significant_watch_secs() -> f64 {
    120.0
}

fn default_interval_minutes() -> u64 {
    360
}

fn default_true() -> bool {
    true
}

impl Default for SyncTuning {
    fn default() -> Self {
        Self {
            save_debounce_ms: default_save_debounce_ms(),
            max_save_retries: default_max_save_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
            pull_retries: default_pull_retries(),
            pull_retry_delay_ms: default_pull_retry_delay_ms(),
            storage_timeout_ms: default_storage_timeout_ms(),
        }
    }
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            orphan_max_age_days: default_orphan_max_age_days(),
            tombstone_retention_days: default_tombstone_retention_days(),
            significant_progress_pct: default_significant_progress_pct(),
            significant_watch_secs: default_significant_watch_secs(),
        }
    }
}

pub fn default_scheduler_config() -> SchedulerConfig {
    SchedulerConfig {
        interval_minutes: default_interval_minutes(),
        run_on_startup: default_true(),
    }
}

impl Config {
    pub fn load_from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: &PathBuf) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(remote) = &self.remote {
            if remote.enabled {
                if remote.database_url.is_empty() {
                    return Err(anyhow::anyhow!("remote is enabled but database_url is not configured"));
                }
                if remote.api_key.is_empty() || remote.api_key == "YOUR_API_KEY" {
                    return Err(anyhow::anyhow!("remote is enabled but api_key is not configured"));
                }
                if remote.collection.is_empty() {
                    return Err(anyhow::anyhow!("remote collection cannot be empty"));
                }
            }
        }

        if self.sync.max_save_retries == 0 {
            return Err(anyhow::anyhow!("sync.max_save_retries must be at least 1"));
        }
        if self.sync.max_retry_delay_ms < self.sync.retry_base_delay_ms {
            return Err(anyhow::anyhow!(
                "sync.max_retry_delay_ms must be >= sync.retry_base_delay_ms"
            ));
        }
        if self.gc.orphan_max_age_days < 0 || self.gc.tombstone_retention_days < 0 {
            return Err(anyhow::anyhow!("gc retention windows must be non-negative"));
        }

        Ok(())
    }
}
