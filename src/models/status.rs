//! Queue and status snapshots, and the warnings carried inside them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::job::Job;
use super::lenient;

/// Severity of a server-side warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WarningLevel {
    Info,
    #[default]
    Warning,
    Error,
}

impl WarningLevel {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

impl<'de> Deserialize<'de> for WarningLevel {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Ok(match value {
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "info" | "notice" => WarningLevel::Info,
                "error" | "critical" => WarningLevel::Error,
                _ => WarningLevel::Warning,
            },
            _ => WarningLevel::Warning,
        })
    }
}

/// A warning derived from the status snapshot.
///
/// Warnings have no client-owned lifecycle; the only local operation is
/// asking the server to dismiss one (or all).
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Warning {
    #[serde(deserialize_with = "lenient::string")]
    pub id: String,

    pub level: WarningLevel,

    #[serde(deserialize_with = "lenient::string")]
    pub title: String,

    #[serde(deserialize_with = "lenient::string")]
    pub message: String,

    #[serde(deserialize_with = "lenient::timestamp")]
    pub time: Option<DateTime<Utc>>,
}

/// Active connection count for one upstream link.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LinkConnections {
    #[serde(deserialize_with = "lenient::string")]
    pub link: String,

    #[serde(deserialize_with = "lenient::number")]
    pub active: u64,

    #[serde(deserialize_with = "lenient::number")]
    pub max: u64,
}

/// Ordered list of active jobs; replaced wholesale on each successful poll.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueSnapshot {
    pub jobs: Vec<Job>,
}

impl QueueSnapshot {
    #[must_use]
    pub fn new(jobs: Vec<Job>) -> Self {
        Self { jobs }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Job> {
        self.jobs.iter().find(|j| j.id == id)
    }
}

/// Aggregate counters for the whole queue. Replaced wholesale per poll.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StatusSnapshot {
    #[serde(deserialize_with = "lenient::number")]
    pub speed_bps: u64,

    /// Opaque display string from the server
    #[serde(deserialize_with = "lenient::opt_string")]
    pub time_left: Option<String>,

    #[serde(deserialize_with = "lenient::number")]
    pub remaining_bytes: u64,

    #[serde(deserialize_with = "lenient::number")]
    pub free_space_bytes: u64,

    #[serde(deserialize_with = "lenient::flag")]
    pub paused: bool,

    /// 0 means unlimited
    #[serde(deserialize_with = "lenient::number")]
    pub speed_limit_bps: u64,

    pub connections: Vec<LinkConnections>,

    pub warnings: Vec<Warning>,
}

impl StatusSnapshot {
    #[must_use]
    pub fn total_connections(&self) -> u64 {
        self.connections.iter().map(|c| c.active).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_decodes_with_missing_fields() {
        let status: StatusSnapshot = serde_json::from_value(json!({
            "speed_bps": "2048",
            "paused": 1,
            "warnings": [
                { "id": "w1", "level": "ERROR", "title": "Disk", "message": "Disk full" },
                { "id": 2, "message": "no level" }
            ],
            "unknown": "ignored"
        }))
        .unwrap();

        assert_eq!(status.speed_bps, 2048);
        assert!(status.paused);
        assert_eq!(status.remaining_bytes, 0);
        assert_eq!(status.warnings.len(), 2);
        assert_eq!(status.warnings[0].level, WarningLevel::Error);
        assert_eq!(status.warnings[1].id, "2");
        assert_eq!(status.warnings[1].level, WarningLevel::Warning);
    }

    #[test]
    fn test_total_connections() {
        let status = StatusSnapshot {
            connections: vec![
                LinkConnections { link: "news-a".into(), active: 8, max: 20 },
                LinkConnections { link: "news-b".into(), active: 2, max: 10 },
            ],
            ..Default::default()
        };
        assert_eq!(status.total_connections(), 10);
    }

    #[test]
    fn test_queue_lookup() {
        let snapshot = QueueSnapshot::new(vec![Job {
            id: "x".to_string(),
            ..Default::default()
        }]);
        assert!(snapshot.get("x").is_some());
        assert!(snapshot.get("y").is_none());
        assert_eq!(snapshot.len(), 1);
    }
}
