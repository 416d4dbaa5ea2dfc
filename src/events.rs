//! Engine events delivered to subscribers
//!
//! A single broadcast channel carries everything a rendering layer needs to
//! react to: a model store was replaced, jobs changed state between two
//! snapshots, or a user-visible notice was raised.

use crate::models::{Context, JobState};

/// Notice severity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Error,
}

/// A user-visible notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

/// A change observed between two consecutive queue snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobTransition {
    Appeared { id: String, state: JobState },
    StateChanged { id: String, from: JobState, to: JobState },
    /// Gone from the queue; expected to show up in history on its next poll
    Vanished { id: String, last_state: JobState },
}

impl JobTransition {
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            JobTransition::Appeared { id, .. }
            | JobTransition::StateChanged { id, .. }
            | JobTransition::Vanished { id, .. } => id,
        }
    }

    /// Whether a state change follows the server's job state machine.
    /// Appearing and vanishing are always expected.
    #[must_use]
    pub fn is_expected(&self) -> bool {
        match self {
            JobTransition::StateChanged { from, to, .. } => from.can_transition_to(*to),
            JobTransition::Appeared { .. } | JobTransition::Vanished { .. } => true,
        }
    }
}

/// Events published by the engine
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A model store's snapshot was replaced (re-paint hook)
    StoreReplaced(Context),

    /// Job state changes detected by diffing queue snapshots
    Transitions(Vec<JobTransition>),

    /// Something the user should see (command failure, fetch failure, ...)
    Notice(Notice),
}
