pub mod anime;
pub mod key;
pub mod lenient;
pub mod progress;
pub mod snapshot;

pub use anime::{AnimeRecord, EpisodeMark, MAX_EPISODE_DURATION_SECS, MIN_EPISODE_DURATION_SECS};
pub use key::{episode_key, parse_episode_key};
pub use progress::ProgressEntry;
pub use snapshot::{Snapshot, UserDocument};
