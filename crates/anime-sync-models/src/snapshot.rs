use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::anime::AnimeRecord;
use crate::progress::ProgressEntry;

/// The combined tracker state at a point in time: every series record plus
/// every in-flight progress entry. This is the unit the merge engine
/// combines and the unit persisted on both sides.
///
/// Both maps are ordered so iteration, and therefore merging, is
/// deterministic regardless of insertion history.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    #[serde(rename = "animeData", default, deserialize_with = "crate::lenient::map_or_default")]
    pub anime: BTreeMap<String, AnimeRecord>,
    #[serde(
        rename = "videoProgress",
        default,
        deserialize_with = "crate::lenient::map_or_default"
    )]
    pub progress: BTreeMap<String, ProgressEntry>,
}

impl Snapshot {
    pub fn is_empty(&self) -> bool {
        self.anime.is_empty() && self.progress.is_empty()
    }

    /// Total watched-episode count across all series.
    pub fn episode_count(&self) -> usize {
        self.anime.values().map(|record| record.episodes.len()).sum()
    }

    pub fn total_watch_time(&self) -> u64 {
        self.anime.values().map(|record| record.total_watch_time).sum()
    }
}

/// Wire shape of the per-user cloud document: the snapshot plus the metadata
/// the extension wrote alongside it. Whole-document overwrite only.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UserDocument {
    #[serde(flatten)]
    pub snapshot: Snapshot,
    #[serde(rename = "lastUpdated", default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_documents_written_by_the_extension() {
        let doc: UserDocument = serde_json::from_value(json!({
            "animeData": {
                "bleach": {
                    "title": "Bleach",
                    "slug": "bleach",
                    "episodes": [
                        {"number": 1, "watchedAt": "2024-03-01T20:15:00Z", "duration": 1440}
                    ],
                    "totalWatchTime": 1440,
                    "lastWatched": "2024-03-01T20:15:00Z"
                }
            },
            "videoProgress": {
                "bleach__episode-2": {
                    "currentTime": 312.0,
                    "duration": 1440.0,
                    "percentage": 21,
                    "savedAt": "2024-03-02T19:00:00Z"
                }
            },
            "lastUpdated": "2024-03-02T19:00:05Z",
            "email": "viewer@example.com"
        }))
        .unwrap();

        assert_eq!(doc.snapshot.episode_count(), 1);
        assert_eq!(doc.snapshot.anime["bleach"].title, "Bleach");
        assert_eq!(doc.snapshot.progress["bleach__episode-2"].percentage, 21);
        assert_eq!(doc.email.as_deref(), Some("viewer@example.com"));
    }

    #[test]
    fn wrong_shaped_fields_reset_instead_of_failing() {
        // episodes as a number, one garbage progress entry, videoProgress as
        // an array: every malformed piece heals to its default.
        let snapshot: Snapshot = serde_json::from_value(json!({
            "animeData": {
                "bleach": {"title": "Bleach", "episodes": 7},
                "naruto": "not an object"
            },
            "videoProgress": ["nope"]
        }))
        .unwrap();

        assert_eq!(snapshot.anime.len(), 1);
        assert!(snapshot.anime["bleach"].episodes.is_empty());
        assert!(snapshot.progress.is_empty());
    }

    #[test]
    fn missing_maps_default_to_empty() {
        let snapshot: Snapshot = serde_json::from_value(json!({})).unwrap();
        assert!(snapshot.is_empty());
    }

    #[test]
    fn serializes_with_extension_key_names() {
        let json = serde_json::to_value(Snapshot::default()).unwrap();
        assert!(json.get("animeData").is_some());
        assert!(json.get("videoProgress").is_some());
    }
}
