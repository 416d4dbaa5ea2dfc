//! Error taxonomy for remote calls, control commands and preferences.

use std::time::Duration;

use thiserror::Error;

/// Generic message shown when the server gave no usable error text.
pub const GENERIC_FAILURE: &str = "The request failed. Please try again.";

/// Failure of a single remote call.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("request timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// The server rejected the request; `message` is kept verbatim
    #[error("server returned {status}: {}", .message.as_deref().unwrap_or("no message"))]
    Server { status: u16, message: Option<String> },

    #[error("malformed response: {0}")]
    Decode(String),

    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

impl ApiError {
    /// Text suitable for a user-visible notification.
    ///
    /// The server's own message is shown verbatim when present; every other
    /// failure collapses to a generic message (details go to the log).
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Server {
                message: Some(msg), ..
            } if !msg.trim().is_empty() => msg.clone(),
            ApiError::Timeout(_) => "The server did not respond in time.".to_string(),
            _ => GENERIC_FAILURE.to_string(),
        }
    }

    /// Network-level failures that the next scheduled tick will retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Network(_) | ApiError::Timeout(_))
    }
}

/// Failure of a control command issued through the dispatcher.
#[derive(Debug, Error)]
pub enum ActionError {
    /// A command for this row is already outstanding
    #[error("a command for '{id}' is already in progress")]
    Busy { id: String },

    /// A destructive action was not confirmed; no remote call was made
    #[error("action cancelled: confirmation declined")]
    NotConfirmed,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Api(#[from] ApiError),
}

impl ActionError {
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            ActionError::Api(e) => e.user_message(),
            other => other.to_string(),
        }
    }
}

/// Failure while saving display preferences.
#[derive(Debug, Error)]
pub enum PrefsError {
    #[error("invalid preferences: {0}")]
    Invalid(String),

    #[error(transparent)]
    Api(#[from] ApiError),
}

impl PrefsError {
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            PrefsError::Api(e) => e.user_message(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_message_verbatim() {
        let err = ApiError::Server {
            status: 404,
            message: Some("Job x not found".to_string()),
        };
        assert_eq!(err.user_message(), "Job x not found");
        assert!(!err.is_transient());
        assert_eq!(err.to_string(), "server returned 404: Job x not found");
    }

    #[test]
    fn test_generic_message_without_server_text() {
        let err = ApiError::Server {
            status: 500,
            message: Some("   ".to_string()),
        };
        assert_eq!(err.user_message(), GENERIC_FAILURE);

        let err = ApiError::Decode("missing field".to_string());
        assert_eq!(err.user_message(), GENERIC_FAILURE);
    }

    #[test]
    fn test_timeout_is_transient() {
        let err = ApiError::Timeout(Duration::from_secs(10));
        assert!(err.is_transient());
        assert_eq!(err.to_string(), "request timed out after 10s");
    }

    #[test]
    fn test_action_error_messages() {
        let busy = ActionError::Busy { id: "a".to_string() };
        assert_eq!(busy.user_message(), "a command for 'a' is already in progress");

        let api: ActionError = ApiError::Server {
            status: 409,
            message: Some("already removed".to_string()),
        }
        .into();
        assert_eq!(api.user_message(), "already removed");
    }
}
