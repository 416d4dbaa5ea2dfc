//! Projection of store snapshots into display rows
//!
//! Every function here is pure: the same snapshot, filter, page and page
//! size always yield the same rows. Filtering runs before pagination, and a
//! page past the end of the filtered set clamps to the last valid page.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::formatting::{format_bytes, format_speed, format_timestamp, truncate_string};
use crate::models::{
    HistoryColumns, HistoryEntry, HistoryState, Job, JobState, QueueSnapshot, StatusSnapshot,
    Warning, WarningLevel,
};
use crate::store::QueueView;

/// Maximum rendered length of free-text detail columns
const MAX_DETAIL_LEN: usize = 60;

/// One page of rendered rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayPage<R> {
    pub rows: Vec<R>,
    /// Effective 1-based page after clamping
    pub page: usize,
    pub total_pages: usize,
    /// Rows matching the filter, across all pages
    pub total_items: usize,
}

/// Page and filter state of one view. Queue and history each keep their own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewState {
    pub filter: String,
    /// 1-based
    pub page: usize,
    pub page_size: usize,
}

impl ViewState {
    #[must_use]
    pub fn new(page_size: usize) -> Self {
        Self {
            filter: String::new(),
            page: 1,
            page_size: page_size.max(1),
        }
    }

    /// Set a new filter; starts over at the first page.
    pub fn set_filter(&mut self, filter: impl Into<String>) {
        self.filter = filter.into();
        self.page = 1;
    }

    /// Apply a new page size and keep the page within range.
    pub fn set_page_size(&mut self, page_size: usize, total_items: usize) {
        self.page_size = page_size.max(1);
        self.clamp(total_items);
    }

    pub fn clamp(&mut self, total_items: usize) {
        self.page = clamp_page(self.page, total_pages(total_items, self.page_size));
    }
}

/// Number of pages for `total_items`; an empty set still has one page.
#[must_use]
pub fn total_pages(total_items: usize, page_size: usize) -> usize {
    total_items.div_ceil(page_size.max(1)).max(1)
}

fn clamp_page(page: usize, total_pages: usize) -> usize {
    page.clamp(1, total_pages.max(1))
}

/// Slice `items` to one page, clamping the page into range.
#[must_use]
pub fn paginate<T, R>(
    items: &[&T],
    page: usize,
    page_size: usize,
    project: impl Fn(&T) -> R,
) -> DisplayPage<R> {
    let page_size = page_size.max(1);
    let total_items = items.len();
    let total_pages = total_pages(total_items, page_size);
    let page = clamp_page(page, total_pages);
    let rows = items
        .iter()
        .skip((page - 1) * page_size)
        .take(page_size)
        .map(|item| project(*item))
        .collect();
    DisplayPage {
        rows,
        page,
        total_pages,
        total_items,
    }
}

/// Case-insensitive substring match on the name. An empty filter matches all.
#[must_use]
pub fn name_matches(name: &str, filter: &str) -> bool {
    filter.is_empty() || name.to_lowercase().contains(&filter.to_lowercase())
}

// ============================================================================
// Queue
// ============================================================================

/// A rendered queue row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueRow {
    pub id: String,
    pub name: String,
    pub category: String,
    pub state: JobState,
    /// Display label; unrecognised states fall into their own bucket
    pub state_label: &'static str,
    /// Always within 0..=100
    pub progress_pct: f64,
    pub progress: String,
    pub size: String,
    pub speed: String,
    pub time_left: String,
    pub detail: String,
}

impl QueueRow {
    #[must_use]
    pub fn from_job(job: &Job) -> Self {
        let pct = job.progress_percent();
        let size = if job.total_bytes > 0 {
            format!(
                "{} / {}",
                format_bytes(job.clamped_downloaded()),
                format_bytes(job.total_bytes)
            )
        } else {
            "-".to_string()
        };
        let speed = match job.effective_speed() {
            0 => "-".to_string(),
            bps => format_speed(bps),
        };
        let detail = job
            .error_message
            .as_deref()
            .or(job.status_message.as_deref())
            .map(|m| truncate_string(m, MAX_DETAIL_LEN))
            .unwrap_or_else(|| match job.failed_segment_count {
                0 => String::new(),
                n => format!("{} failed segments", n),
            });

        Self {
            id: job.id.clone(),
            name: job.name.clone(),
            category: job.category.clone().unwrap_or_default(),
            state: job.state,
            state_label: job.state.label(),
            progress_pct: pct,
            progress: format!("{}%", pct.floor() as u64),
            size,
            speed,
            time_left: job.time_left.clone().unwrap_or_else(|| "-".to_string()),
            detail,
        }
    }
}

/// Render one page of the queue in snapshot order.
#[must_use]
pub fn render_queue(
    snapshot: &QueueSnapshot,
    filter: &str,
    page: usize,
    page_size: usize,
) -> DisplayPage<QueueRow> {
    let matching: Vec<&Job> = snapshot
        .jobs
        .iter()
        .filter(|j| name_matches(&j.name, filter))
        .collect();
    paginate(&matching, page, page_size, QueueRow::from_job)
}

// ============================================================================
// History
// ============================================================================

/// A rendered history row. Hidden columns are `None`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryRow {
    pub id: String,
    pub name: String,
    pub state: HistoryState,
    pub state_label: &'static str,
    pub category: Option<String>,
    pub size: Option<String>,
    pub added: Option<String>,
    pub completed: Option<String>,
    pub error: Option<String>,
}

/// Column visibility and date format for history rendering.
#[derive(Debug, Clone)]
pub struct HistoryLayout<'a> {
    pub columns: &'a HistoryColumns,
    pub date_format: &'a str,
    pub now: DateTime<Utc>,
}

impl HistoryRow {
    #[must_use]
    pub fn from_entry(entry: &HistoryEntry, layout: &HistoryLayout<'_>) -> Self {
        let date = |ts: Option<DateTime<Utc>>| {
            ts.map(|t| format_timestamp(t, layout.date_format, layout.now))
                .unwrap_or_else(|| "-".to_string())
        };
        let cols = layout.columns;
        Self {
            id: entry.id.clone(),
            name: entry.name.clone(),
            state: entry.state,
            state_label: entry.state.label(),
            category: cols
                .category
                .then(|| entry.category.clone().unwrap_or_default()),
            size: cols.size.then(|| format_bytes(entry.total_bytes)),
            added: cols.added.then(|| date(entry.added_at)),
            completed: cols.completed.then(|| date(entry.completed_at)),
            error: cols.error.then(|| {
                match (entry.state, entry.error_message.as_deref()) {
                    (HistoryState::Failed, Some(msg)) => truncate_string(msg, MAX_DETAIL_LEN),
                    _ => String::new(),
                }
            }),
        }
    }
}

/// Render one page of history. Entries are expected newest-first already.
#[must_use]
pub fn render_history(
    entries: &[HistoryEntry],
    filter: &str,
    page: usize,
    page_size: usize,
    layout: &HistoryLayout<'_>,
) -> DisplayPage<HistoryRow> {
    let matching: Vec<&HistoryEntry> = entries
        .iter()
        .filter(|e| name_matches(&e.name, filter))
        .collect();
    paginate(&matching, page, page_size, |e| HistoryRow::from_entry(e, layout))
}

// ============================================================================
// Status and warnings
// ============================================================================

/// A rendered warning row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WarningRow {
    pub id: String,
    pub level: WarningLevel,
    pub title: String,
    pub message: String,
    pub time: String,
}

#[must_use]
pub fn render_warnings(status: &StatusSnapshot, now: DateTime<Utc>) -> Vec<WarningRow> {
    status
        .warnings
        .iter()
        .map(|w: &Warning| WarningRow {
            id: w.id.clone(),
            level: w.level,
            title: if w.title.is_empty() {
                w.level.as_str().to_string()
            } else {
                w.title.clone()
            },
            message: w.message.clone(),
            time: w
                .time
                .map(|t| format_timestamp(t, crate::formatting::RELATIVE_DATE_FORMAT, now))
                .unwrap_or_default(),
        })
        .collect()
}

/// Aggregate counters for the status line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusLine {
    pub paused: bool,
    pub speed: String,
    pub speed_limit: String,
    pub time_left: String,
    pub remaining: String,
    pub free_space: String,
    pub connections: u64,
    pub jobs: usize,
    pub warnings: usize,
}

fn speed_limit_label(bps: u64) -> String {
    match bps {
        0 => "unlimited".to_string(),
        bps => format_speed(bps),
    }
}

#[must_use]
pub fn render_status(view: &QueueView) -> StatusLine {
    let status = &view.status;
    let speed_limit = match view.pending_speed_limit {
        Some(requested) => format!("{} (applying…)", speed_limit_label(requested)),
        None => speed_limit_label(status.speed_limit_bps),
    };
    StatusLine {
        paused: status.paused,
        speed: format_speed(status.speed_bps),
        speed_limit,
        time_left: status.time_left.clone().unwrap_or_else(|| "-".to_string()),
        remaining: format_bytes(status.remaining_bytes),
        free_space: format_bytes(status.free_space_bytes),
        connections: status.total_connections(),
        jobs: view.queue.len(),
        warnings: status.warnings.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{job, warning};

    fn snapshot(names: &[&str]) -> QueueSnapshot {
        QueueSnapshot::new(
            names
                .iter()
                .enumerate()
                .map(|(i, n)| job(&i.to_string(), n, JobState::Queued))
                .collect(),
        )
    }

    #[test]
    fn test_overshooting_bytes_render_as_full() {
        let mut j = job("a", "Movie", JobState::Downloading);
        j.downloaded_bytes = 600;
        j.total_bytes = 500;
        let page = render_queue(&QueueSnapshot::new(vec![j]), "", 1, 20);
        assert_eq!(page.rows[0].progress, "100%");
        assert!(page.rows[0].progress_pct <= 100.0);
        assert_eq!(page.rows[0].size, "500 B / 500 B");
    }

    #[test]
    fn test_filter_is_case_insensitive() {
        let page = render_queue(&snapshot(&["Movie.2020", "Show.S01"]), "movie", 1, 20);
        assert_eq!(page.rows.len(), 1);
        assert_eq!(page.rows[0].name, "Movie.2020");
        assert_eq!(page.total_pages, 1);
        assert_eq!(page.total_items, 1);
    }

    #[test]
    fn test_filter_is_plain_substring() {
        assert!(name_matches("Show.S01", "s01"));
        assert!(name_matches("Show.S01", ""));
        assert!(!name_matches("Show.S01", " S01"));
        assert!(name_matches("My Show S01", " s01"));
    }

    #[test]
    fn test_render_is_idempotent() {
        let snap = snapshot(&["a", "b", "c", "d", "e"]);
        let first = render_queue(&snap, "", 2, 2);
        let second = render_queue(&snap, "", 2, 2);
        assert_eq!(first, second);
    }

    #[test]
    fn test_page_clamps_when_filter_narrows() {
        let names: Vec<String> = (0..30)
            .map(|i| if i < 3 { format!("keep{i}") } else { format!("other{i}") })
            .collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let snap = snapshot(&refs);

        let unfiltered = render_queue(&snap, "", 3, 10);
        assert_eq!(unfiltered.page, 3);
        assert_eq!(unfiltered.total_pages, 3);

        for page_size in [1, 2, 10] {
            let page = render_queue(&snap, "KEEP", 3, page_size);
            assert!(!page.rows.is_empty());
            assert_eq!(page.page, page.total_pages.min(3));
        }
        let page = render_queue(&snap, "keep", 3, 10);
        assert_eq!(page.page, 1);
        assert_eq!(page.rows.len(), 3);
    }

    #[test]
    fn test_empty_result_has_one_page() {
        let page = render_queue(&snapshot(&["a"]), "zzz", 4, 10);
        assert!(page.rows.is_empty());
        assert_eq!(page.page, 1);
        assert_eq!(page.total_pages, 1);
    }

    #[test]
    fn test_unknown_state_bucket() {
        let j = job("a", "Odd", JobState::Unknown);
        let row = QueueRow::from_job(&j);
        assert_eq!(row.state, JobState::Unknown);
        assert_eq!(row.state_label, JobState::Unknown.label());
        assert_eq!(row.progress, "0%");
        assert_eq!(row.size, "-");
    }

    #[test]
    fn test_view_state_page_size_reclamp() {
        let mut view = ViewState::new(10);
        view.page = 5;
        view.set_page_size(50, 45);
        assert_eq!(view.page, 1);

        view.page = 9;
        view.set_page_size(20, 45);
        assert_eq!(view.page, 3);
        view.set_filter("x");
        assert_eq!(view.page, 1);
    }

    #[test]
    fn test_history_columns_hidden() {
        let entry = HistoryEntry {
            id: "h".to_string(),
            name: "Done".to_string(),
            state: HistoryState::Failed,
            total_bytes: 2048,
            error_message: Some("CRC error".to_string()),
            ..HistoryEntry::default()
        };
        let columns = HistoryColumns {
            size: false,
            ..HistoryColumns::default()
        };
        let layout = HistoryLayout {
            columns: &columns,
            date_format: "relative",
            now: Utc::now(),
        };
        let page = render_history(&[entry], "", 1, 20, &layout);
        let row = &page.rows[0];
        assert_eq!(row.size, None);
        assert_eq!(row.error.as_deref(), Some("CRC error"));
        assert_eq!(row.completed.as_deref(), Some("-"));
    }

    #[test]
    fn test_status_line_shows_pending_limit() {
        let mut view = QueueView::default();
        view.status.speed_limit_bps = 1024;
        assert_eq!(render_status(&view).speed_limit, "1.0 KB/s");

        view.pending_speed_limit = Some(0);
        assert_eq!(render_status(&view).speed_limit, "unlimited (applying…)");
    }

    #[test]
    fn test_warning_rows() {
        let status = StatusSnapshot {
            warnings: vec![warning("w1", "Disk full"), warning("w2", "")],
            ..StatusSnapshot::default()
        };
        let rows = render_warnings(&status, Utc::now());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].title, "Disk full");
        assert_eq!(rows[1].title, "warning");
    }
}
