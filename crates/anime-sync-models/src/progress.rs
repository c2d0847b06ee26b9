use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// In-flight playback position for one episode, keyed by
/// [`crate::episode_key`] in the snapshot map.
///
/// A user-initiated delete does not remove the entry; it flips `deleted` and
/// stamps `deleted_at` so the intent survives a merge against a device that
/// has not seen the delete yet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEntry {
    #[serde(default)]
    pub current_time: f64,
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub percentage: u8,
    #[serde(default = "unix_epoch")]
    pub saved_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl ProgressEntry {
    pub fn new(current_time: f64, duration: f64, saved_at: DateTime<Utc>) -> Self {
        Self {
            current_time,
            duration,
            percentage: Self::percentage_of(current_time, duration),
            saved_at,
            deleted: false,
            deleted_at: None,
        }
    }

    /// Derived whole-number percentage, clamped to 0..=100.
    pub fn percentage_of(current_time: f64, duration: f64) -> u8 {
        if !duration.is_finite() || duration <= 0.0 || !current_time.is_finite() {
            return 0;
        }
        ((current_time / duration * 100.0).floor()).clamp(0.0, 100.0) as u8
    }

    /// Replace this entry with its tombstone, preserving the prior fields.
    pub fn into_tombstone(self, deleted_at: DateTime<Utc>) -> Self {
        Self {
            deleted: true,
            deleted_at: Some(deleted_at),
            ..self
        }
    }

    /// Tombstone timestamp; a tombstone that lost its `deleted_at` compares
    /// as the epoch so any real save overrides it.
    pub fn delete_time(&self) -> DateTime<Utc> {
        self.deleted_at.unwrap_or_else(unix_epoch)
    }
}

pub(crate) fn unix_epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

fn is_false(value: &bool) -> bool {
    !*value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentage_is_floored_and_clamped() {
        assert_eq!(ProgressEntry::percentage_of(500.0, 1000.0), 50);
        assert_eq!(ProgressEntry::percentage_of(999.0, 1000.0), 99);
        assert_eq!(ProgressEntry::percentage_of(1500.0, 1000.0), 100);
        assert_eq!(ProgressEntry::percentage_of(300.0, 0.0), 0);
        assert_eq!(ProgressEntry::percentage_of(f64::NAN, 1000.0), 0);
    }

    #[test]
    fn tombstone_preserves_prior_fields() {
        let saved = Utc::now();
        let deleted = saved + chrono::Duration::minutes(5);
        let entry = ProgressEntry::new(420.0, 1440.0, saved).into_tombstone(deleted);
        assert!(entry.deleted);
        assert_eq!(entry.deleted_at, Some(deleted));
        assert_eq!(entry.current_time, 420.0);
        assert_eq!(entry.saved_at, saved);
    }

    #[test]
    fn deleted_flag_is_omitted_when_false() {
        let json = serde_json::to_value(ProgressEntry::new(60.0, 1440.0, Utc::now())).unwrap();
        assert!(json.get("deleted").is_none());
        assert!(json.get("deletedAt").is_none());
        assert_eq!(json["percentage"], 4);
    }
}
