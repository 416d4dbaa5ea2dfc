//! In-memory transport for tests: call counters, scripted failures and an
//! optional artificial latency.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use super::{JobAction, QueueAction, Transport, WarningTarget};
use crate::error::ApiError;
use crate::models::{
    Context, DisplayPreferences, HistoryEntry, Job, JobState, QueueSnapshot, StatusSnapshot,
    Warning,
};

pub(crate) const QUEUE: &str = "queue_snapshot";
pub(crate) const STATUS: &str = "status_snapshot";
pub(crate) const HISTORY: &str = "history_snapshot";
pub(crate) const JOB_ACTION: &str = "job_action";
pub(crate) const DELETE_JOB: &str = "delete_job";
pub(crate) const DELETE_HISTORY: &str = "delete_history_entry";
pub(crate) const CLEAR_HISTORY: &str = "clear_history";
pub(crate) const QUEUE_ACTION: &str = "queue_action";
pub(crate) const SPEED_LIMIT: &str = "speed_limit";
pub(crate) const SET_SPEED_LIMIT: &str = "set_speed_limit";
pub(crate) const DISMISS: &str = "dismiss_warning";
pub(crate) const LOAD_PREFS: &str = "display_preferences";
pub(crate) const SAVE_PREFS: &str = "save_display_preferences";

#[derive(Debug, Default)]
struct ServerState {
    jobs: Vec<Job>,
    status: StatusSnapshot,
    history: Vec<HistoryEntry>,
    prefs: HashMap<Context, DisplayPreferences>,
}

#[derive(Debug, Default)]
pub(crate) struct MockTransport {
    server: Mutex<ServerState>,
    calls: Mutex<HashMap<&'static str, usize>>,
    failing: Mutex<HashSet<&'static str>>,
    delay: Mutex<Duration>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn job(id: &str, name: &str, state: JobState) -> Job {
    Job {
        id: id.to_string(),
        name: name.to_string(),
        state,
        ..Job::default()
    }
}

pub(crate) fn warning(id: &str, title: &str) -> Warning {
    Warning {
        id: id.to_string(),
        title: title.to_string(),
        ..Warning::default()
    }
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_jobs(jobs: Vec<Job>) -> Self {
        let mock = Self::new();
        mock.set_jobs(jobs);
        mock
    }

    pub(crate) fn set_jobs(&self, jobs: Vec<Job>) {
        lock(&self.server).jobs = jobs;
    }

    pub(crate) fn set_history(&self, history: Vec<HistoryEntry>) {
        lock(&self.server).history = history;
    }

    pub(crate) fn set_warnings(&self, warnings: Vec<Warning>) {
        lock(&self.server).status.warnings = warnings;
    }

    pub(crate) fn set_status(&self, status: StatusSnapshot) {
        lock(&self.server).status = status;
    }

    pub(crate) fn set_prefs(&self, context: Context, prefs: DisplayPreferences) {
        lock(&self.server).prefs.insert(context, prefs);
    }

    pub(crate) fn stored_prefs(&self, context: Context) -> Option<DisplayPreferences> {
        lock(&self.server).prefs.get(&context).cloned()
    }

    pub(crate) fn set_delay(&self, delay: Duration) {
        *lock(&self.delay) = delay;
    }

    /// Make every subsequent call of `op` time out.
    pub(crate) fn fail(&self, op: &'static str) {
        lock(&self.failing).insert(op);
    }

    pub(crate) fn recover(&self, op: &'static str) {
        lock(&self.failing).remove(op);
    }

    pub(crate) fn calls(&self, op: &str) -> usize {
        lock(&self.calls).get(op).copied().unwrap_or(0)
    }

    async fn enter(&self, op: &'static str) -> Result<(), ApiError> {
        *lock(&self.calls).entry(op).or_insert(0) += 1;
        let delay = *lock(&self.delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if lock(&self.failing).contains(op) {
            return Err(ApiError::Timeout(Duration::from_secs(1)));
        }
        Ok(())
    }
}

fn not_found(what: &str, id: &str) -> ApiError {
    ApiError::Server {
        status: 404,
        message: Some(format!("{what} {id} not found")),
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn queue_snapshot(&self) -> Result<QueueSnapshot, ApiError> {
        self.enter(QUEUE).await?;
        Ok(QueueSnapshot::new(lock(&self.server).jobs.clone()))
    }

    async fn status_snapshot(&self) -> Result<StatusSnapshot, ApiError> {
        self.enter(STATUS).await?;
        Ok(lock(&self.server).status.clone())
    }

    async fn history_snapshot(&self, limit: usize) -> Result<Vec<HistoryEntry>, ApiError> {
        self.enter(HISTORY).await?;
        Ok(lock(&self.server)
            .history
            .iter()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn job_action(&self, id: &str, action: JobAction) -> Result<(), ApiError> {
        self.enter(JOB_ACTION).await?;
        let mut server = lock(&self.server);
        let job = server
            .jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or_else(|| not_found("Job", id))?;
        job.state = match action {
            JobAction::Pause => JobState::Paused,
            JobAction::Resume => JobState::Queued,
        };
        Ok(())
    }

    async fn delete_job(&self, id: &str) -> Result<(), ApiError> {
        self.enter(DELETE_JOB).await?;
        let mut server = lock(&self.server);
        let before = server.jobs.len();
        server.jobs.retain(|j| j.id != id);
        if server.jobs.len() == before {
            return Err(not_found("Job", id));
        }
        Ok(())
    }

    async fn delete_history_entry(&self, id: &str) -> Result<(), ApiError> {
        self.enter(DELETE_HISTORY).await?;
        let mut server = lock(&self.server);
        let before = server.history.len();
        server.history.retain(|e| e.id != id);
        if server.history.len() == before {
            return Err(not_found("History entry", id));
        }
        Ok(())
    }

    async fn clear_history(&self) -> Result<(), ApiError> {
        self.enter(CLEAR_HISTORY).await?;
        lock(&self.server).history.clear();
        Ok(())
    }

    async fn queue_action(&self, action: QueueAction) -> Result<(), ApiError> {
        self.enter(QUEUE_ACTION).await?;
        lock(&self.server).status.paused = action == QueueAction::PauseAll;
        Ok(())
    }

    async fn speed_limit(&self) -> Result<u64, ApiError> {
        self.enter(SPEED_LIMIT).await?;
        Ok(lock(&self.server).status.speed_limit_bps)
    }

    async fn set_speed_limit(&self, bps: u64) -> Result<(), ApiError> {
        self.enter(SET_SPEED_LIMIT).await?;
        lock(&self.server).status.speed_limit_bps = bps;
        Ok(())
    }

    async fn dismiss_warning(&self, target: &WarningTarget) -> Result<(), ApiError> {
        self.enter(DISMISS).await?;
        let mut server = lock(&self.server);
        match target {
            WarningTarget::All => server.status.warnings.clear(),
            WarningTarget::One(id) => {
                let before = server.status.warnings.len();
                server.status.warnings.retain(|w| &w.id != id);
                if server.status.warnings.len() == before {
                    return Err(not_found("Warning", id));
                }
            }
        }
        Ok(())
    }

    async fn display_preferences(&self, context: Context) -> Result<DisplayPreferences, ApiError> {
        self.enter(LOAD_PREFS).await?;
        Ok(lock(&self.server)
            .prefs
            .get(&context)
            .cloned()
            .unwrap_or_else(|| DisplayPreferences::defaults_for(context)))
    }

    async fn save_display_preferences(
        &self,
        context: Context,
        prefs: &DisplayPreferences,
    ) -> Result<(), ApiError> {
        self.enter(SAVE_PREFS).await?;
        lock(&self.server).prefs.insert(context, prefs.clone());
        Ok(())
    }
}
