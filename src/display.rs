//! Terminal and HTML output for rendered pages

use owo_colors::OwoColorize;
use tabled::{
    Table, Tabled,
    builder::Builder,
    settings::{Alignment, Modify, Style, Width, object::Rows},
};

use crate::events::{JobTransition, Notice, NoticeLevel};
use crate::formatting::escape_html;
use crate::models::{Context, DisplayPreferences, HistoryState, JobState, WarningLevel};
use crate::render::{DisplayPage, HistoryRow, QueueRow, StatusLine, WarningRow};

/// Wrap width for tables
const TABLE_WIDTH: usize = 200;

/// Format job state with colored indicator
pub fn format_job_state(state: JobState) -> String {
    let label = state.label();
    match state {
        JobState::Downloading => format!("{} {}", "●".green(), label.green()),
        JobState::Queued => format!("{} {}", "○".white(), label.white()),
        JobState::Paused => format!("{} {}", "◐".yellow(), label.yellow()),
        JobState::Assembling | JobState::Extracting => {
            format!("{} {}", "◑".cyan(), label.cyan())
        }
        JobState::Completed => format!("{} {}", "●".bright_green(), label.bright_green()),
        JobState::Failed => format!("{} {}", "○".bright_red(), label.bright_red()),
        JobState::Unknown => format!("{} {}", "?".bright_black(), label.bright_black()),
    }
}

fn format_history_state(state: HistoryState) -> String {
    match state {
        HistoryState::Completed => state.label().green().to_string(),
        HistoryState::Failed => state.label().bright_red().to_string(),
        HistoryState::Unknown => state.label().bright_black().to_string(),
    }
}

/// Color progress by how far along the job is
fn format_progress(row: &QueueRow) -> String {
    if row.progress_pct >= 100.0 {
        row.progress.green().to_string()
    } else if row.progress_pct > 0.0 {
        row.progress.yellow().to_string()
    } else {
        row.progress.clone()
    }
}

fn page_footer<R>(page: &DisplayPage<R>, noun: &str) -> String {
    format!(
        "Page {}/{} ({} {})",
        page.page, page.total_pages, page.total_items, noun
    )
    .bright_black()
    .to_string()
}

#[derive(Tabled)]
struct QueueTableRow {
    #[tabled(rename = "ID")]
    id: String,

    #[tabled(rename = "Name")]
    name: String,

    #[tabled(rename = "Category")]
    category: String,

    #[tabled(rename = "State")]
    state: String,

    #[tabled(rename = "Progress")]
    progress: String,

    #[tabled(rename = "Size")]
    size: String,

    #[tabled(rename = "Speed")]
    speed: String,

    #[tabled(rename = "Left")]
    time_left: String,

    #[tabled(rename = "Detail")]
    detail: String,
}

/// Format one page of the queue as a table
pub fn format_queue(page: &DisplayPage<QueueRow>) -> String {
    if page.rows.is_empty() {
        return "No jobs in queue".yellow().to_string();
    }

    let rows: Vec<QueueTableRow> = page
        .rows
        .iter()
        .map(|row| QueueTableRow {
            id: row.id.clone(),
            name: row.name.clone(),
            category: row.category.clone(),
            state: format_job_state(row.state),
            progress: format_progress(row),
            size: row.size.clone(),
            speed: row.speed.clone(),
            time_left: row.time_left.clone(),
            detail: row.detail.red().to_string(),
        })
        .collect();

    let mut table = Table::new(rows);
    table
        .with(Style::rounded())
        .with(Width::wrap(TABLE_WIDTH).keep_words(true))
        .with(Modify::new(Rows::first()).with(Alignment::center()));

    format!("{}\n{}", table, page_footer(page, "jobs"))
}

/// Format one page of history. Hidden columns are left out entirely.
pub fn format_history(page: &DisplayPage<HistoryRow>) -> String {
    if page.rows.is_empty() {
        return "No history entries".yellow().to_string();
    }

    let first = &page.rows[0];
    let mut header = vec!["ID", "Name", "State"];
    let optional = [
        ("Category", first.category.is_some()),
        ("Size", first.size.is_some()),
        ("Added", first.added.is_some()),
        ("Completed", first.completed.is_some()),
        ("Error", first.error.is_some()),
    ];
    header.extend(optional.iter().filter(|(_, shown)| *shown).map(|(name, _)| *name));

    let mut builder = Builder::default();
    builder.push_record(header);
    for row in &page.rows {
        let mut record = vec![
            row.id.clone(),
            row.name.clone(),
            format_history_state(row.state),
        ];
        for cell in [&row.category, &row.size, &row.added, &row.completed] {
            if let Some(value) = cell {
                record.push(value.clone());
            }
        }
        if let Some(error) = &row.error {
            record.push(error.red().to_string());
        }
        builder.push_record(record);
    }

    let mut table = builder.build();
    table
        .with(Style::rounded())
        .with(Width::wrap(TABLE_WIDTH).keep_words(true))
        .with(Modify::new(Rows::first()).with(Alignment::center()));

    format!("{}\n{}", table, page_footer(page, "entries"))
}

fn format_level(level: WarningLevel) -> String {
    match level {
        WarningLevel::Info => level.as_str().cyan().to_string(),
        WarningLevel::Warning => level.as_str().yellow().to_string(),
        WarningLevel::Error => level.as_str().bright_red().to_string(),
    }
}

#[derive(Tabled)]
struct WarningTableRow {
    #[tabled(rename = "ID")]
    id: String,

    #[tabled(rename = "Level")]
    level: String,

    #[tabled(rename = "Title")]
    title: String,

    #[tabled(rename = "Message")]
    message: String,

    #[tabled(rename = "When")]
    time: String,
}

pub fn format_warnings(rows: &[WarningRow]) -> String {
    if rows.is_empty() {
        return "No warnings".green().to_string();
    }

    let rows: Vec<WarningTableRow> = rows
        .iter()
        .map(|w| WarningTableRow {
            id: w.id.clone(),
            level: format_level(w.level),
            title: w.title.clone(),
            message: w.message.clone(),
            time: w.time.clone(),
        })
        .collect();

    let mut table = Table::new(rows);
    table
        .with(Style::rounded())
        .with(Width::wrap(TABLE_WIDTH).keep_words(true))
        .with(Modify::new(Rows::first()).with(Alignment::center()));
    table.to_string()
}

/// One-line summary of the aggregate counters
pub fn format_status_line(status: &StatusLine) -> String {
    let state = if status.paused {
        "PAUSED".yellow().bold().to_string()
    } else {
        "RUNNING".green().bold().to_string()
    };
    let warnings = if status.warnings > 0 {
        format!("{} warnings", status.warnings).yellow().to_string()
    } else {
        "no warnings".bright_black().to_string()
    };
    format!(
        "{}  {} {}  {} {}  {} {}  {} {}  {} {}  {} jobs  {}",
        state,
        "Speed".bold(),
        status.speed,
        "Limit".bold(),
        status.speed_limit,
        "Left".bold(),
        status.time_left,
        "Remaining".bold(),
        status.remaining,
        "Free".bold(),
        status.free_space,
        status.jobs,
        warnings
    )
}

pub fn format_preferences(context: Context, prefs: &DisplayPreferences) -> String {
    let mut out = format!(
        "{}\n  Refresh interval: {}s\n  Page size:        {}",
        format!("{} preferences", context).bold(),
        prefs.refresh_interval_seconds,
        prefs.page_size
    );
    if context == Context::History {
        out.push_str(&format!("\n  Date format:      {}", prefs.date_format()));
        if let Some(cols) = &prefs.columns {
            let shown: Vec<&str> = [
                ("category", cols.category),
                ("size", cols.size),
                ("added", cols.added),
                ("completed", cols.completed),
                ("error", cols.error),
            ]
            .iter()
            .filter(|(_, on)| *on)
            .map(|(name, _)| *name)
            .collect();
            out.push_str(&format!("\n  Columns:          {}", shown.join(", ")));
        }
    }
    out
}

pub fn format_notice(notice: &Notice) -> String {
    match notice.level {
        NoticeLevel::Info => notice.message.green().to_string(),
        NoticeLevel::Error => format!("{} {}", "Error:".bright_red().bold(), notice.message),
    }
}

pub fn format_transition(transition: &JobTransition) -> String {
    match transition {
        JobTransition::Appeared { id, state } => {
            format!("{} {} ({})", "+".green(), id, state.label())
        }
        JobTransition::StateChanged { id, from, to } => {
            format!("{} {}: {} -> {}", "~".cyan(), id, from.label(), to.label())
        }
        JobTransition::Vanished { id, last_state } => {
            format!("{} {} (was {})", "-".bright_black(), id, last_state.label())
        }
    }
}

// ============================================================================
// HTML
// ============================================================================

fn html_table(headers: &[&str], rows: impl Iterator<Item = Vec<String>>) -> String {
    let mut out = String::from("<table>\n  <thead><tr>");
    for h in headers {
        out.push_str(&format!("<th>{}</th>", escape_html(h)));
    }
    out.push_str("</tr></thead>\n  <tbody>\n");
    for row in rows {
        out.push_str("    <tr>");
        for cell in row {
            out.push_str(&format!("<td>{}</td>", escape_html(&cell)));
        }
        out.push_str("</tr>\n");
    }
    out.push_str("  </tbody>\n</table>");
    out
}

pub fn queue_html(page: &DisplayPage<QueueRow>) -> String {
    html_table(
        &["ID", "Name", "Category", "State", "Progress", "Size", "Speed", "Left", "Detail"],
        page.rows.iter().map(|r| {
            vec![
                r.id.clone(),
                r.name.clone(),
                r.category.clone(),
                r.state_label.to_string(),
                r.progress.clone(),
                r.size.clone(),
                r.speed.clone(),
                r.time_left.clone(),
                r.detail.clone(),
            ]
        }),
    )
}

pub fn history_html(page: &DisplayPage<HistoryRow>) -> String {
    html_table(
        &["ID", "Name", "State", "Category", "Size", "Added", "Completed", "Error"],
        page.rows.iter().map(|r| {
            vec![
                r.id.clone(),
                r.name.clone(),
                r.state_label.to_string(),
                r.category.clone().unwrap_or_default(),
                r.size.clone().unwrap_or_default(),
                r.added.clone().unwrap_or_default(),
                r.completed.clone().unwrap_or_default(),
                r.error.clone().unwrap_or_default(),
            ]
        }),
    )
}

pub fn warnings_html(rows: &[WarningRow]) -> String {
    html_table(
        &["ID", "Level", "Title", "Message", "When"],
        rows.iter().map(|w| {
            vec![
                w.id.clone(),
                w.level.as_str().to_string(),
                w.title.clone(),
                w.message.clone(),
                w.time.clone(),
            ]
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HistoryColumns, HistoryEntry, QueueSnapshot};
    use crate::render::{HistoryLayout, render_history, render_queue};
    use crate::transport::mock::job;
    use chrono::Utc;

    #[test]
    fn test_empty_queue_message() {
        let page = render_queue(&QueueSnapshot::default(), "", 1, 20);
        assert!(format_queue(&page).contains("No jobs in queue"));
    }

    #[test]
    fn test_queue_table_contains_rows_and_footer() {
        let snap = QueueSnapshot::new(vec![job("a1", "Movie.2020", JobState::Downloading)]);
        let out = format_queue(&render_queue(&snap, "", 1, 20));
        assert!(out.contains("Movie.2020"));
        assert!(out.contains("Page 1/1 (1 jobs)"));
    }

    #[test]
    fn test_history_hidden_columns_omitted() {
        let columns = HistoryColumns {
            size: false,
            ..HistoryColumns::default()
        };
        let layout = HistoryLayout {
            columns: &columns,
            date_format: "%Y",
            now: Utc::now(),
        };
        let entry = HistoryEntry {
            id: "h1".to_string(),
            name: "Show.S01".to_string(),
            ..HistoryEntry::default()
        };
        let out = format_history(&render_history(&[entry], "", 1, 20, &layout));
        assert!(out.contains("Show.S01"));
        assert!(out.contains("Completed"));
        assert!(!out.contains("Size"));
    }

    #[test]
    fn test_html_is_escaped() {
        let snap = QueueSnapshot::new(vec![job("x", "<script>alert(1)</script>", JobState::Queued)]);
        let html = queue_html(&render_queue(&snap, "", 1, 20));
        assert!(html.contains("&lt;script&gt;"));
        assert!(!html.contains("<script>"));
    }

    #[test]
    fn test_transition_text() {
        let t = JobTransition::StateChanged {
            id: "a".to_string(),
            from: JobState::Queued,
            to: JobState::Downloading,
        };
        let out = format_transition(&t);
        assert!(out.contains("a: "));
        assert!(out.contains(JobState::Downloading.label()));
    }
}
