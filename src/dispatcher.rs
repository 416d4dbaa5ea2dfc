//! Control commands against the download service
//!
//! Every command follows the same pattern: issue the remote call, then on
//! success request an out-of-cycle poll of the affected context so the
//! server's authoritative state shows up before the next tick. Failures are
//! surfaced as an error notice and never touch the stores. The one local
//! write is the pending speed-limit override.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast;

use crate::error::ActionError;
use crate::events::{EngineEvent, Notice};
use crate::models::{Context, HistoryEntry};
use crate::poller::{PollOutcome, Poller};
use crate::store::{QueueData, QueueStore};
use crate::transport::{JobAction, QueueAction, Transport, WarningTarget, with_timeout};

/// An action on the history that cannot be undone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestructiveAction {
    DeleteHistoryEntry { id: String, name: Option<String> },
    ClearHistory { entries: usize },
}

impl DestructiveAction {
    #[must_use]
    pub fn description(&self) -> String {
        match self {
            DestructiveAction::DeleteHistoryEntry { id, name: Some(name) } => {
                format!("Delete history entry '{}' ({})?", name, id)
            }
            DestructiveAction::DeleteHistoryEntry { id, name: None } => {
                format!("Delete history entry {}?", id)
            }
            DestructiveAction::ClearHistory { entries } => {
                format!("Clear all {} history entries? This cannot be undone.", entries)
            }
        }
    }
}

/// Asks the user to confirm a destructive action before any remote call.
pub trait ConfirmPrompt: Send + Sync {
    fn confirm(&self, action: &DestructiveAction) -> bool;
}

/// Confirms everything (non-interactive use with an explicit opt-in).
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeYes;

impl ConfirmPrompt for AssumeYes {
    fn confirm(&self, _action: &DestructiveAction) -> bool {
        true
    }
}

type RowKey = (Context, String);

/// Marks a row busy for the lifetime of one command.
struct BusyRow<'a> {
    rows: &'a Mutex<HashSet<RowKey>>,
    key: RowKey,
}

impl<'a> BusyRow<'a> {
    fn acquire(rows: &'a Mutex<HashSet<RowKey>>, context: Context, id: &str) -> Result<Self, ActionError> {
        let key = (context, id.to_string());
        if !lock(rows).insert(key.clone()) {
            return Err(ActionError::Busy { id: id.to_string() });
        }
        Ok(Self { rows, key })
    }
}

impl Drop for BusyRow<'_> {
    fn drop(&mut self) {
        lock(self.rows).remove(&self.key);
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Issues control commands and nudges the pollers afterwards.
pub struct ActionDispatcher {
    transport: Arc<dyn Transport>,
    queue_store: Arc<QueueStore>,
    queue_poller: Arc<Poller<QueueData>>,
    history_poller: Arc<Poller<Vec<HistoryEntry>>>,
    events: broadcast::Sender<EngineEvent>,
    busy: Mutex<HashSet<RowKey>>,
    request_timeout: Duration,
}

impl ActionDispatcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        queue_store: Arc<QueueStore>,
        queue_poller: Arc<Poller<QueueData>>,
        history_poller: Arc<Poller<Vec<HistoryEntry>>>,
        events: broadcast::Sender<EngineEvent>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            queue_store,
            queue_poller,
            history_poller,
            events,
            busy: Mutex::new(HashSet::new()),
            request_timeout,
        }
    }

    /// Whether a command for this row is outstanding (for disabling controls).
    #[must_use]
    pub fn is_busy(&self, context: Context, id: &str) -> bool {
        lock(&self.busy).contains(&(context, id.to_string()))
    }

    pub async fn pause(&self, id: &str) -> Result<(), ActionError> {
        self.job_action(id, JobAction::Pause).await
    }

    pub async fn resume(&self, id: &str) -> Result<(), ActionError> {
        self.job_action(id, JobAction::Resume).await
    }

    async fn job_action(&self, id: &str, action: JobAction) -> Result<(), ActionError> {
        let _row = BusyRow::acquire(&self.busy, Context::Queue, id)?;
        let result = with_timeout(self.request_timeout, self.transport.job_action(id, action)).await;
        self.finish(&format!("{} {}", action.as_str(), id), Context::Queue, result.map_err(Into::into))
            .await
    }

    pub async fn remove(&self, id: &str) -> Result<(), ActionError> {
        let _row = BusyRow::acquire(&self.busy, Context::Queue, id)?;
        let result = with_timeout(self.request_timeout, self.transport.delete_job(id)).await;
        self.finish(&format!("remove {}", id), Context::Queue, result.map_err(Into::into))
            .await
    }

    pub async fn pause_all(&self) -> Result<(), ActionError> {
        self.queue_action(QueueAction::PauseAll).await
    }

    pub async fn resume_all(&self) -> Result<(), ActionError> {
        self.queue_action(QueueAction::ResumeAll).await
    }

    async fn queue_action(&self, action: QueueAction) -> Result<(), ActionError> {
        let result = with_timeout(self.request_timeout, self.transport.queue_action(action)).await;
        self.finish(&format!("{} all", action.as_str()), Context::Queue, result.map_err(Into::into))
            .await
    }

    /// Set the speed limit (0 = unlimited). The requested value is shown as
    /// pending while the command runs and until the next poll reports the
    /// real one. A rejected command takes the pending value back.
    pub async fn set_speed_limit(&self, bps: u64) -> Result<(), ActionError> {
        self.queue_store.patch_speed_limit(bps);
        self.emit(EngineEvent::StoreReplaced(Context::Queue));

        let result = with_timeout(self.request_timeout, self.transport.set_speed_limit(bps)).await;
        if result.is_err() && self.queue_store.clear_speed_limit(bps) {
            self.emit(EngineEvent::StoreReplaced(Context::Queue));
        }
        self.finish(&format!("set speed limit {}", bps), Context::Queue, result.map_err(Into::into))
            .await
    }

    /// Ask the server for the speed limit currently in force.
    pub async fn current_speed_limit(&self) -> Result<u64, ActionError> {
        with_timeout(self.request_timeout, self.transport.speed_limit())
            .await
            .map_err(|e| {
                tracing::warn!("reading speed limit failed: {}", e);
                ActionError::from(e)
            })
    }

    pub async fn dismiss_warning(&self, target: &WarningTarget) -> Result<(), ActionError> {
        if matches!(target, WarningTarget::One(id) if id.is_empty()) {
            return Err(ActionError::InvalidArgument("warning id must not be empty".to_string()));
        }
        let result = with_timeout(self.request_timeout, self.transport.dismiss_warning(target)).await;
        self.finish(
            &format!("dismiss warning {}", target.as_wire()),
            Context::Queue,
            result.map_err(Into::into),
        )
        .await
    }

    /// Delete one history entry after confirmation.
    pub async fn delete_history_entry(
        &self,
        id: &str,
        name: Option<String>,
        prompt: &dyn ConfirmPrompt,
    ) -> Result<(), ActionError> {
        let _row = BusyRow::acquire(&self.busy, Context::History, id)?;
        let action = DestructiveAction::DeleteHistoryEntry {
            id: id.to_string(),
            name,
        };
        if !prompt.confirm(&action) {
            tracing::info!("history delete of {} not confirmed", id);
            return Err(ActionError::NotConfirmed);
        }
        let result = with_timeout(self.request_timeout, self.transport.delete_history_entry(id)).await;
        self.finish(&format!("delete history {}", id), Context::History, result.map_err(Into::into))
            .await
    }

    /// Clear the whole history after confirmation.
    pub async fn clear_history(
        &self,
        entries: usize,
        prompt: &dyn ConfirmPrompt,
    ) -> Result<(), ActionError> {
        if !prompt.confirm(&DestructiveAction::ClearHistory { entries }) {
            tracing::info!("history clear not confirmed");
            return Err(ActionError::NotConfirmed);
        }
        let result = with_timeout(self.request_timeout, self.transport.clear_history()).await;
        self.finish("clear history", Context::History, result.map_err(Into::into))
            .await
    }

    async fn finish(
        &self,
        what: &str,
        context: Context,
        result: Result<(), ActionError>,
    ) -> Result<(), ActionError> {
        match result {
            Ok(()) => {
                tracing::debug!("{} succeeded", what);
                self.refresh(context).await;
                Ok(())
            }
            Err(e) => {
                tracing::warn!("{} failed: {}", what, e);
                self.emit(EngineEvent::Notice(Notice::error(e.user_message())));
                Err(e)
            }
        }
    }

    /// Out-of-cycle poll after a successful command. Dropped if a fetch for
    /// the context is already running; that fetch or the next tick covers it.
    async fn refresh(&self, context: Context) {
        let outcome = match context {
            Context::Queue => self.queue_poller.poll_now().await,
            Context::History => self.history_poller.poll_now().await,
        };
        match outcome {
            PollOutcome::Skipped => {
                tracing::debug!("{} refresh dropped: poll already in flight", context)
            }
            PollOutcome::Failed(e) => {
                tracing::debug!("{} refresh after command failed: {}", context, e)
            }
            PollOutcome::Applied | PollOutcome::Discarded => {}
        }
    }

    fn emit(&self, event: EngineEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}
