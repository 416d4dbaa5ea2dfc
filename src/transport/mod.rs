//! Remote operations consumed by the engine
//!
//! The [`Transport`] trait is the seam between the engine and the download
//! service. [`HttpTransport`] speaks JSON over HTTP; tests substitute an
//! in-memory mock with call counters and scripted failures.

mod http;
#[cfg(test)]
pub(crate) mod mock;

pub use http::HttpTransport;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::ApiError;
use crate::models::{Context, DisplayPreferences, HistoryEntry, QueueSnapshot, StatusSnapshot};

/// Per-job control command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobAction {
    Pause,
    Resume,
}

impl JobAction {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            JobAction::Pause => "pause",
            JobAction::Resume => "resume",
        }
    }
}

/// Whole-queue control command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueAction {
    PauseAll,
    ResumeAll,
}

impl QueueAction {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueAction::PauseAll => "pause",
            QueueAction::ResumeAll => "resume",
        }
    }
}

/// Which warning(s) to dismiss
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarningTarget {
    One(String),
    All,
}

impl WarningTarget {
    /// Parse a CLI/API argument; `"*"` means all warnings.
    #[must_use]
    pub fn parse(arg: &str) -> Self {
        if arg.trim() == "*" {
            WarningTarget::All
        } else {
            WarningTarget::One(arg.trim().to_string())
        }
    }

    /// Wire representation (`"*"` for all)
    #[must_use]
    pub fn as_wire(&self) -> &str {
        match self {
            WarningTarget::One(id) => id,
            WarningTarget::All => "*",
        }
    }
}

/// Logical remote operations of the download service.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn queue_snapshot(&self) -> Result<QueueSnapshot, ApiError>;

    async fn status_snapshot(&self) -> Result<StatusSnapshot, ApiError>;

    /// Terminal jobs, at most `limit` of them, in server order
    async fn history_snapshot(&self, limit: usize) -> Result<Vec<HistoryEntry>, ApiError>;

    async fn job_action(&self, id: &str, action: JobAction) -> Result<(), ApiError>;

    async fn delete_job(&self, id: &str) -> Result<(), ApiError>;

    async fn delete_history_entry(&self, id: &str) -> Result<(), ApiError>;

    async fn clear_history(&self) -> Result<(), ApiError>;

    async fn queue_action(&self, action: QueueAction) -> Result<(), ApiError>;

    /// Active speed limit in bytes per second (0 = unlimited)
    async fn speed_limit(&self) -> Result<u64, ApiError>;

    async fn set_speed_limit(&self, bps: u64) -> Result<(), ApiError>;

    async fn dismiss_warning(&self, target: &WarningTarget) -> Result<(), ApiError>;

    async fn display_preferences(&self, context: Context) -> Result<DisplayPreferences, ApiError>;

    async fn save_display_preferences(
        &self,
        context: Context,
        prefs: &DisplayPreferences,
    ) -> Result<(), ApiError>;
}

/// Run a remote call under a bounded timeout.
///
/// Elapsing is reported as [`ApiError::Timeout`], indistinguishable for
/// callers from any other fetch failure.
pub async fn with_timeout<T, F>(timeout: Duration, call: F) -> Result<T, ApiError>
where
    F: Future<Output = Result<T, ApiError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(ApiError::Timeout(timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warning_target_parse() {
        assert_eq!(WarningTarget::parse("*"), WarningTarget::All);
        assert_eq!(WarningTarget::parse(" w1 "), WarningTarget::One("w1".to_string()));
        assert_eq!(WarningTarget::All.as_wire(), "*");
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_elapses() {
        let result: Result<(), ApiError> = with_timeout(Duration::from_secs(2), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(ApiError::Timeout(d)) if d == Duration::from_secs(2)));
    }

    #[tokio::test]
    async fn test_with_timeout_passes_result_through() {
        let result = with_timeout(Duration::from_secs(2), async { Ok::<_, ApiError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }
}
