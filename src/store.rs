//! Model stores holding the last-known server snapshots
//!
//! Each store is replaced wholesale by a successful poll. The only other
//! write is the pending speed-limit override on the queue store, which the
//! next authoritative snapshot always clears.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::time::Instant;

use crate::events::JobTransition;
use crate::models::{HistoryEntry, QueueSnapshot, StatusSnapshot, sort_history_newest_first};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Queue and status fetched together by one queue poll.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueData {
    pub queue: QueueSnapshot,
    pub status: StatusSnapshot,
}

/// Read-only copy of the queue store handed to renderers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueView {
    pub queue: QueueSnapshot,
    pub status: StatusSnapshot,
    /// Requested speed limit not yet confirmed by a poll
    pub pending_speed_limit: Option<u64>,
}

#[derive(Debug, Default)]
struct QueueState {
    data: QueueData,
    pending_speed_limit: Option<u64>,
    last_replaced: Option<Instant>,
}

/// Active jobs plus the aggregate status counters.
#[derive(Debug, Default)]
pub struct QueueStore {
    state: Mutex<QueueState>,
}

impl QueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn view(&self) -> QueueView {
        let state = lock(&self.state);
        QueueView {
            queue: state.data.queue.clone(),
            status: state.data.status.clone(),
            pending_speed_limit: state.pending_speed_limit,
        }
    }

    #[must_use]
    pub fn queue(&self) -> QueueSnapshot {
        lock(&self.state).data.queue.clone()
    }

    #[must_use]
    pub fn status(&self) -> StatusSnapshot {
        lock(&self.state).data.status.clone()
    }

    /// Replace both snapshots and clear any pending override.
    ///
    /// Returns the job transitions between the previous and the new queue.
    /// The very first replacement has no baseline and reports none.
    pub fn replace(&self, data: QueueData) -> Vec<JobTransition> {
        let mut state = lock(&self.state);
        let transitions = if state.last_replaced.is_some() {
            diff_queue(&state.data.queue, &data.queue)
        } else {
            Vec::new()
        };
        state.data = data;
        state.pending_speed_limit = None;
        state.last_replaced = Some(Instant::now());
        transitions
    }

    /// Reflect a requested speed limit until the next poll lands.
    pub fn patch_speed_limit(&self, bps: u64) {
        lock(&self.state).pending_speed_limit = Some(bps);
    }

    /// Drop the override for `bps` if it is still the one shown.
    /// Returns whether anything was cleared.
    pub fn clear_speed_limit(&self, bps: u64) -> bool {
        let mut state = lock(&self.state);
        if state.pending_speed_limit == Some(bps) {
            state.pending_speed_limit = None;
            true
        } else {
            false
        }
    }

    #[must_use]
    pub fn pending_speed_limit(&self) -> Option<u64> {
        lock(&self.state).pending_speed_limit
    }

    #[must_use]
    pub fn last_replaced(&self) -> Option<Instant> {
        lock(&self.state).last_replaced
    }
}

#[derive(Debug, Default)]
struct HistoryState {
    entries: Vec<HistoryEntry>,
    last_replaced: Option<Instant>,
}

/// Terminal jobs, newest first.
#[derive(Debug, Default)]
pub struct HistoryStore {
    state: Mutex<HistoryState>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn entries(&self) -> Vec<HistoryEntry> {
        lock(&self.state).entries.clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.state).entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<HistoryEntry> {
        lock(&self.state).entries.iter().find(|e| e.id == id).cloned()
    }

    pub fn replace(&self, mut entries: Vec<HistoryEntry>) {
        sort_history_newest_first(&mut entries);
        let mut state = lock(&self.state);
        state.entries = entries;
        state.last_replaced = Some(Instant::now());
    }

    #[must_use]
    pub fn last_replaced(&self) -> Option<Instant> {
        lock(&self.state).last_replaced
    }
}

/// Job transitions between two consecutive queue snapshots.
///
/// Appearances and state changes follow `next` order; disappearances follow
/// `prev` order and come last.
#[must_use]
pub fn diff_queue(prev: &QueueSnapshot, next: &QueueSnapshot) -> Vec<JobTransition> {
    let before: HashMap<&str, _> = prev.jobs.iter().map(|j| (j.id.as_str(), j.state)).collect();
    let mut transitions = Vec::new();

    for job in &next.jobs {
        match before.get(job.id.as_str()) {
            None => transitions.push(JobTransition::Appeared {
                id: job.id.clone(),
                state: job.state,
            }),
            Some(&from) if from != job.state => transitions.push(JobTransition::StateChanged {
                id: job.id.clone(),
                from,
                to: job.state,
            }),
            Some(_) => {}
        }
    }

    for job in &prev.jobs {
        if next.get(&job.id).is_none() {
            transitions.push(JobTransition::Vanished {
                id: job.id.clone(),
                last_state: job.state,
            });
        }
    }

    transitions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HistoryState, JobState};
    use crate::transport::mock::job;
    use chrono::{TimeZone, Utc};

    fn data(jobs: Vec<crate::models::Job>) -> QueueData {
        QueueData {
            queue: QueueSnapshot::new(jobs),
            status: StatusSnapshot::default(),
        }
    }

    #[test]
    fn test_first_replace_has_no_transitions() {
        let store = QueueStore::new();
        assert!(store.last_replaced().is_none());
        let transitions = store.replace(data(vec![job("a", "A", JobState::Queued)]));
        assert!(transitions.is_empty());
        assert!(store.last_replaced().is_some());
        assert_eq!(store.queue().len(), 1);
    }

    #[test]
    fn test_replace_reports_transitions() {
        let store = QueueStore::new();
        store.replace(data(vec![
            job("a", "A", JobState::Queued),
            job("b", "B", JobState::Downloading),
        ]));
        let transitions = store.replace(data(vec![
            job("a", "A", JobState::Downloading),
            job("c", "C", JobState::Queued),
        ]));
        assert_eq!(
            transitions,
            vec![
                JobTransition::StateChanged {
                    id: "a".to_string(),
                    from: JobState::Queued,
                    to: JobState::Downloading,
                },
                JobTransition::Appeared {
                    id: "c".to_string(),
                    state: JobState::Queued,
                },
                JobTransition::Vanished {
                    id: "b".to_string(),
                    last_state: JobState::Downloading,
                },
            ]
        );
    }

    #[test]
    fn test_replace_is_wholesale() {
        let store = QueueStore::new();
        let mut first = job("a", "A", JobState::Downloading);
        first.error_message = Some("slow".to_string());
        store.replace(data(vec![first]));

        store.replace(data(vec![job("a", "A", JobState::Downloading)]));
        assert_eq!(store.queue().jobs[0].error_message, None);
    }

    #[test]
    fn test_speed_limit_override_cleared_by_poll() {
        let store = QueueStore::new();
        store.patch_speed_limit(1_000_000);
        assert_eq!(store.view().pending_speed_limit, Some(1_000_000));
        assert_eq!(store.status().speed_limit_bps, 0);

        store.replace(QueueData::default());
        assert_eq!(store.pending_speed_limit(), None);
    }

    #[test]
    fn test_clear_speed_limit_only_drops_matching_override() {
        let store = QueueStore::new();
        store.patch_speed_limit(2_000);
        assert!(!store.clear_speed_limit(1_000));
        assert_eq!(store.pending_speed_limit(), Some(2_000));
        assert!(store.clear_speed_limit(2_000));
        assert_eq!(store.pending_speed_limit(), None);
    }

    #[test]
    fn test_history_sorted_newest_first() {
        let store = HistoryStore::new();
        let entry = |id: &str, secs: i64| HistoryEntry {
            id: id.to_string(),
            state: HistoryState::Completed,
            completed_at: Some(Utc.timestamp_opt(secs, 0).unwrap()),
            ..HistoryEntry::default()
        };
        store.replace(vec![entry("old", 100), entry("new", 300), entry("mid", 200)]);
        let ids: Vec<_> = store.entries().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["new", "mid", "old"]);
        assert!(store.get("mid").is_some());
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_diff_identical_snapshots() {
        let snap = QueueSnapshot::new(vec![job("a", "A", JobState::Paused)]);
        assert!(diff_queue(&snap, &snap).is_empty());
    }
}
