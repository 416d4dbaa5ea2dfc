//! Server-persisted display preferences
//!
//! Loading never fails: if the server cannot be reached, or returns
//! something unusable, the built-in defaults for the context are used so the
//! engine can still start. Saving validates strictly and only updates the
//! local copy once the server has accepted the new values.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::error::PrefsError;
use crate::models::{Context, DisplayPreferences};
use crate::transport::{Transport, with_timeout};

pub struct PreferencesStore {
    transport: Arc<dyn Transport>,
    current: Mutex<HashMap<Context, DisplayPreferences>>,
    request_timeout: Duration,
}

impl PreferencesStore {
    pub fn new(transport: Arc<dyn Transport>, request_timeout: Duration) -> Self {
        let current = Context::ALL
            .iter()
            .map(|&c| (c, DisplayPreferences::defaults_for(c)))
            .collect();
        Self {
            transport,
            current: Mutex::new(current),
            request_timeout,
        }
    }

    fn current(&self) -> MutexGuard<'_, HashMap<Context, DisplayPreferences>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Preferences currently in effect for `context`.
    #[must_use]
    pub fn get(&self, context: Context) -> DisplayPreferences {
        self.current()
            .get(&context)
            .cloned()
            .unwrap_or_else(|| DisplayPreferences::defaults_for(context))
    }

    /// Fetch preferences from the server, falling back to defaults.
    pub async fn load(&self, context: Context) -> DisplayPreferences {
        let fetched = with_timeout(
            self.request_timeout,
            self.transport.display_preferences(context),
        )
        .await;
        let prefs = match fetched {
            Ok(mut prefs) => {
                match prefs.validate(context, false) {
                    Ok(warnings) => {
                        for w in warnings {
                            tracing::warn!("{}", w);
                        }
                    }
                    // Non-strict validation corrects instead of failing
                    Err(e) => tracing::warn!("{}", e),
                }
                prefs
            }
            Err(e) => {
                tracing::warn!(
                    "Could not load {} preferences ({}), using defaults",
                    context,
                    e
                );
                DisplayPreferences::defaults_for(context)
            }
        };
        self.current().insert(context, prefs.clone());
        prefs
    }

    /// Validate and persist new preferences. Returns the values as stored.
    pub async fn save(
        &self,
        context: Context,
        mut prefs: DisplayPreferences,
    ) -> Result<DisplayPreferences, PrefsError> {
        prefs.validate(context, true).map_err(PrefsError::Invalid)?;
        with_timeout(
            self.request_timeout,
            self.transport.save_display_preferences(context, &prefs),
        )
        .await?;
        tracing::info!(
            "Saved {} preferences: every {}s, {} per page",
            context,
            prefs.refresh_interval_seconds,
            prefs.page_size
        );
        self.current().insert(context, prefs.clone());
        Ok(prefs)
    }
}
