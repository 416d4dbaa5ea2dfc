//! Data models for the remote download service.
//!
//! Jobs, history entries, status snapshots, display preferences and the
//! client configuration. All payload types decode leniently: unknown fields
//! are ignored and missing or malformed values fall back to zero values.

mod config;
mod job;
pub mod lenient;
mod prefs;
mod status;

pub use config::{BehaviorConfig, NetworkConfig, QmonConfig, ServerConfig};
pub use job::{HistoryEntry, HistoryState, Job, JobState, sort_history_newest_first};
pub use prefs::{
    Context, DisplayPreferences, HistoryColumns, MAX_PAGE_SIZE, MIN_PAGE_SIZE,
    MIN_REFRESH_INTERVAL,
};
pub use status::{LinkConnections, QueueSnapshot, StatusSnapshot, Warning, WarningLevel};
