pub mod config;
pub mod credentials;
pub mod paths;

pub use config::{Config, GcConfig, RemoteConfig, SchedulerConfig, SyncTuning, default_scheduler_config};
pub use credentials::CredentialStore;
pub use paths::{PathManager, container_base_path};
