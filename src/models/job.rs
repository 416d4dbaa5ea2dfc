//! Queue-resident jobs, terminal history entries, and their state enums.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use super::lenient;

// ============================================================================
// Job State
// ============================================================================

/// Lifecycle state of a job as reported by the remote service.
///
/// Transitions are owned by the server. The client only observes them by
/// diffing consecutive queue snapshots; [`JobState::can_transition_to`]
/// encodes the expected machine and the queue poller warns on jumps outside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum JobState {
    Queued,
    Downloading,
    Paused,
    Assembling,
    Extracting,
    Completed,
    Failed,
    /// Missing or unrecognised state string; rendered in its own bucket.
    #[default]
    Unknown,
}

impl JobState {
    /// Parse a state string leniently (case-insensitive, common aliases).
    #[must_use]
    pub fn from_state_string(state: &str) -> Self {
        match state.trim().to_ascii_lowercase().as_str() {
            "queued" | "waiting" | "pending" | "idle" => Self::Queued,
            "downloading" | "fetching" | "grabbing" | "active" => Self::Downloading,
            "paused" => Self::Paused,
            "assembling" | "verifying" | "repairing" | "checking" => Self::Assembling,
            "extracting" | "unpacking" | "moving" | "running" => Self::Extracting,
            "completed" | "complete" | "done" => Self::Completed,
            "failed" | "error" => Self::Failed,
            _ => Self::Unknown,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Downloading => "downloading",
            Self::Paused => "paused",
            Self::Assembling => "assembling",
            Self::Extracting => "extracting",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Unknown => "unknown",
        }
    }

    /// Human-readable label for table output.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Queued => "Queued",
            Self::Downloading => "Downloading",
            Self::Paused => "Paused",
            Self::Assembling => "Assembling",
            Self::Extracting => "Extracting",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
            Self::Unknown => "Unknown",
        }
    }

    #[must_use]
    pub fn is_pausable(&self) -> bool {
        matches!(self, Self::Queued | Self::Downloading)
    }

    #[must_use]
    pub fn is_resumable(&self) -> bool {
        matches!(self, Self::Paused)
    }

    /// Whether `next` is a transition the server is expected to make from `self`.
    ///
    /// `Unknown` on either side is always accepted: a malformed snapshot must
    /// never be reported as a protocol violation.
    #[must_use]
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        if *self == next || *self == Unknown || next == Unknown {
            return true;
        }
        match self {
            Queued => matches!(next, Downloading | Paused | Failed),
            Downloading => matches!(next, Paused | Assembling | Failed | Queued),
            Paused => matches!(next, Downloading | Queued),
            Assembling => matches!(next, Extracting | Completed | Failed),
            Extracting => matches!(next, Completed | Failed),
            Completed | Failed => false,
            Unknown => true,
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl<'de> Deserialize<'de> for JobState {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Ok(match value {
            Value::String(s) => JobState::from_state_string(&s),
            _ => JobState::Unknown,
        })
    }
}

impl Serialize for JobState {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

// ============================================================================
// Job
// ============================================================================

/// A queue-resident job.
///
/// Replaced wholesale on every poll; fields are never merged across snapshots.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Job {
    #[serde(deserialize_with = "lenient::string")]
    pub id: String,

    #[serde(deserialize_with = "lenient::string")]
    pub name: String,

    #[serde(deserialize_with = "lenient::opt_string")]
    pub category: Option<String>,

    pub state: JobState,

    /// 0-100 as reported; the renderer recomputes from bytes when possible
    #[serde(deserialize_with = "lenient::float")]
    pub progress_pct: f64,

    #[serde(deserialize_with = "lenient::number")]
    pub downloaded_bytes: u64,

    #[serde(deserialize_with = "lenient::number")]
    pub total_bytes: u64,

    /// Only meaningful while downloading
    #[serde(deserialize_with = "lenient::number")]
    pub speed_bps: u64,

    #[serde(deserialize_with = "lenient::opt_string")]
    pub time_left: Option<String>,

    #[serde(deserialize_with = "lenient::number")]
    pub failed_segment_count: u64,

    #[serde(deserialize_with = "lenient::opt_string")]
    pub status_message: Option<String>,

    #[serde(deserialize_with = "lenient::opt_string")]
    pub error_message: Option<String>,
}

impl Job {
    /// Downloaded bytes clamped to the total, so a misbehaving source can
    /// never push progress past 100%.
    #[must_use]
    pub fn clamped_downloaded(&self) -> u64 {
        self.downloaded_bytes.min(self.total_bytes)
    }

    /// Progress in percent, always within 0..=100.
    ///
    /// Derived from byte counts when a total is known, otherwise from the
    /// reported percentage.
    #[must_use]
    pub fn progress_percent(&self) -> f64 {
        let pct = if self.total_bytes > 0 {
            self.clamped_downloaded() as f64 / self.total_bytes as f64 * 100.0
        } else {
            self.progress_pct
        };
        pct.clamp(0.0, 100.0)
    }

    #[must_use]
    pub fn remaining_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.clamped_downloaded())
    }

    /// Transfer rate, zero unless actually downloading.
    #[must_use]
    pub fn effective_speed(&self) -> u64 {
        if self.state == JobState::Downloading {
            self.speed_bps
        } else {
            0
        }
    }
}

// ============================================================================
// History
// ============================================================================

/// Outcome of a finished job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HistoryState {
    Completed,
    Failed,
    #[default]
    Unknown,
}

impl HistoryState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Unknown => "unknown",
        }
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed => "Completed",
            Self::Failed => "Failed",
            Self::Unknown => "Unknown",
        }
    }
}

impl std::fmt::Display for HistoryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl<'de> Deserialize<'de> for HistoryState {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Ok(match value {
            Value::String(s) => match JobState::from_state_string(&s) {
                JobState::Completed => HistoryState::Completed,
                JobState::Failed => HistoryState::Failed,
                _ => HistoryState::Unknown,
            },
            _ => HistoryState::Unknown,
        })
    }
}

impl Serialize for HistoryState {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

/// A terminal job record. Immutable once created.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct HistoryEntry {
    #[serde(deserialize_with = "lenient::string")]
    pub id: String,

    #[serde(deserialize_with = "lenient::string")]
    pub name: String,

    #[serde(deserialize_with = "lenient::opt_string")]
    pub category: Option<String>,

    pub state: HistoryState,

    #[serde(deserialize_with = "lenient::number")]
    pub total_bytes: u64,

    #[serde(deserialize_with = "lenient::timestamp")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(deserialize_with = "lenient::timestamp")]
    pub added_at: Option<DateTime<Utc>>,

    /// Present only when failed
    #[serde(deserialize_with = "lenient::opt_string")]
    pub error_message: Option<String>,
}

/// Sort history newest-first: by completion time, then by time added.
///
/// Entries without timestamps sink to the end, in their original order.
pub fn sort_history_newest_first(entries: &mut [HistoryEntry]) {
    entries.sort_by(|a, b| {
        b.completed_at
            .cmp(&a.completed_at)
            .then_with(|| b.added_at.cmp(&a.added_at))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_state_parsing() {
        assert_eq!(JobState::from_state_string("Downloading"), JobState::Downloading);
        assert_eq!(JobState::from_state_string("  PAUSED "), JobState::Paused);
        assert_eq!(JobState::from_state_string("Extracting"), JobState::Extracting);
        assert_eq!(JobState::from_state_string("bogus"), JobState::Unknown);
        assert_eq!(JobState::from_state_string(""), JobState::Unknown);
    }

    #[test]
    fn test_state_machine() {
        use JobState::*;
        assert!(Queued.can_transition_to(Downloading));
        assert!(Downloading.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Downloading));
        assert!(Assembling.can_transition_to(Extracting));
        assert!(Extracting.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Downloading));
        assert!(!Queued.can_transition_to(Extracting));
        assert!(Unknown.can_transition_to(Completed));
    }

    #[test]
    fn test_pause_resume_predicates() {
        assert!(JobState::Queued.is_pausable());
        assert!(JobState::Downloading.is_pausable());
        assert!(!JobState::Extracting.is_pausable());
        assert!(JobState::Paused.is_resumable());
        assert!(!JobState::Queued.is_resumable());
    }

    #[test]
    fn test_malformed_job_decodes() {
        let job: Job = serde_json::from_value(json!({
            "id": "a",
            "name": "Movie.2020",
            "total_bytes": "500",
            "downloaded_bytes": null,
            "extra_field": {"ignored": true}
        }))
        .unwrap();
        assert_eq!(job.id, "a");
        assert_eq!(job.state, JobState::Unknown);
        assert_eq!(job.total_bytes, 500);
        assert_eq!(job.downloaded_bytes, 0);
        assert_eq!(job.speed_bps, 0);
    }

    #[test]
    fn test_non_string_state_is_unknown() {
        let job: Job = serde_json::from_value(json!({ "id": "a", "state": 7 })).unwrap();
        assert_eq!(job.state, JobState::Unknown);
    }

    #[test]
    fn test_progress_clamped_to_total() {
        let job = Job {
            id: "a".to_string(),
            state: JobState::Downloading,
            downloaded_bytes: 600,
            total_bytes: 500,
            ..Default::default()
        };
        assert_eq!(job.clamped_downloaded(), 500);
        assert_eq!(job.progress_percent(), 100.0);
        assert_eq!(job.remaining_bytes(), 0);
    }

    #[test]
    fn test_progress_falls_back_to_reported_pct() {
        let job = Job {
            progress_pct: 140.0,
            ..Default::default()
        };
        assert_eq!(job.progress_percent(), 100.0);

        let job = Job {
            progress_pct: 37.5,
            ..Default::default()
        };
        assert_eq!(job.progress_percent(), 37.5);
    }

    #[test]
    fn test_speed_only_while_downloading() {
        let mut job = Job {
            speed_bps: 1000,
            state: JobState::Paused,
            ..Default::default()
        };
        assert_eq!(job.effective_speed(), 0);
        job.state = JobState::Downloading;
        assert_eq!(job.effective_speed(), 1000);
    }

    #[test]
    fn test_history_state_decoding() {
        let entry: HistoryEntry =
            serde_json::from_value(json!({ "id": 1, "state": "Failed", "error_message": "CRC" }))
                .unwrap();
        assert_eq!(entry.id, "1");
        assert_eq!(entry.state, HistoryState::Failed);
        assert_eq!(entry.error_message.as_deref(), Some("CRC"));

        let entry: HistoryEntry =
            serde_json::from_value(json!({ "id": "2", "state": "Downloading" })).unwrap();
        assert_eq!(entry.state, HistoryState::Unknown);
    }

    #[test]
    fn test_history_sort_newest_first() {
        let mut entries: Vec<HistoryEntry> = [10, 30, 20]
            .iter()
            .map(|secs| HistoryEntry {
                id: secs.to_string(),
                completed_at: DateTime::from_timestamp(*secs, 0),
                ..Default::default()
            })
            .collect();
        entries.push(HistoryEntry {
            id: "none".to_string(),
            ..Default::default()
        });

        sort_history_newest_first(&mut entries);
        let ids: Vec<&str> = entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["30", "20", "10", "none"]);
    }
}
