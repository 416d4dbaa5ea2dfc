//! Server-persisted display preferences, one set per view context.

use serde::{Deserialize, Serialize};

use crate::formatting::RELATIVE_DATE_FORMAT;

/// A polling/rendering context. Queue and history have independent
/// lifecycles, cadences and pagination state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Context {
    Queue,
    History,
}

impl Context {
    pub const ALL: [Context; 2] = [Context::Queue, Context::History];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Context::Queue => "queue",
            Context::History => "history",
        }
    }
}

impl std::fmt::Display for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Minimum refresh interval in seconds (prevents tight polling loops)
pub const MIN_REFRESH_INTERVAL: u64 = 1;

/// Page size bounds
pub const MIN_PAGE_SIZE: usize = 1;
pub const MAX_PAGE_SIZE: usize = 500;

/// Column visibility for the history view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryColumns {
    pub category: bool,
    pub size: bool,
    pub added: bool,
    pub completed: bool,
    pub error: bool,
}

impl Default for HistoryColumns {
    fn default() -> Self {
        Self {
            category: true,
            size: true,
            added: false,
            completed: true,
            error: true,
        }
    }
}

/// Per-context display preferences.
///
/// `date_format` and `columns` only apply to the history context and are
/// omitted from the queue payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DisplayPreferences {
    pub refresh_interval_seconds: u64,

    pub page_size: usize,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_format: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub columns: Option<HistoryColumns>,
}

impl Default for DisplayPreferences {
    fn default() -> Self {
        Self::defaults_for(Context::Queue)
    }
}

impl DisplayPreferences {
    /// Built-in defaults used when the server has none or cannot be reached.
    #[must_use]
    pub fn defaults_for(context: Context) -> Self {
        match context {
            Context::Queue => Self {
                refresh_interval_seconds: 3,
                page_size: 20,
                date_format: None,
                columns: None,
            },
            Context::History => Self {
                refresh_interval_seconds: 30,
                page_size: 20,
                date_format: Some(RELATIVE_DATE_FORMAT.to_string()),
                columns: Some(HistoryColumns::default()),
            },
        }
    }

    /// Refresh interval as a `Duration`.
    #[must_use]
    pub fn refresh_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.refresh_interval_seconds)
    }

    /// Date format for history rows ("relative" when unset).
    #[must_use]
    pub fn date_format(&self) -> &str {
        self.date_format.as_deref().unwrap_or(RELATIVE_DATE_FORMAT)
    }

    /// Validate and normalise for `context`.
    ///
    /// In non-strict mode out-of-range values are replaced by the context
    /// default and a warning is returned; in strict mode the first problem is
    /// returned as an error and nothing is modified.
    pub fn validate(&mut self, context: Context, strict: bool) -> Result<Vec<String>, String> {
        let defaults = Self::defaults_for(context);
        let mut warnings = Vec::new();

        if self.refresh_interval_seconds < MIN_REFRESH_INTERVAL {
            let msg = format!(
                "{context}.refreshIntervalSeconds must be at least {MIN_REFRESH_INTERVAL} second(s), got {}",
                self.refresh_interval_seconds
            );
            if strict {
                return Err(msg);
            }
            warnings.push(format!(
                "{msg} - using default ({})",
                defaults.refresh_interval_seconds
            ));
            self.refresh_interval_seconds = defaults.refresh_interval_seconds;
        }

        if !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&self.page_size) {
            let msg = format!(
                "{context}.pageSize must be between {MIN_PAGE_SIZE} and {MAX_PAGE_SIZE}, got {}",
                self.page_size
            );
            if strict {
                return Err(msg);
            }
            warnings.push(format!("{msg} - using default ({})", defaults.page_size));
            self.page_size = defaults.page_size;
        }

        match context {
            Context::Queue => {
                self.date_format = None;
                self.columns = None;
            }
            Context::History => {
                if self.date_format.as_deref().is_none_or(str::is_empty) {
                    self.date_format = defaults.date_format;
                }
                if self.columns.is_none() {
                    self.columns = defaults.columns;
                }
            }
        }

        Ok(warnings)
    }
}
