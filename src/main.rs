//! qmon - command-line front end for the queue synchronization engine

use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use crossterm::{
    cursor::{Hide, Show},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen},
};
use dialoguer::{Confirm, theme::ColorfulTheme};
use owo_colors::OwoColorize;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use qmon::dispatcher::{AssumeYes, ConfirmPrompt, DestructiveAction};
use qmon::display;
use qmon::formatting;
use qmon::events::EngineEvent;
use qmon::models::{Context, DisplayPreferences, JobState, QmonConfig};
use qmon::poller::PollOutcome;
use qmon::transport::{HttpTransport, Transport, WarningTarget};
use qmon::{Engine, EngineOptions};

/// Refresh of the "last updated" footer in watch mode
const WATCH_CLOCK_TICK: Duration = Duration::from_secs(1);

/// Transition and notice lines kept under the watch table
const WATCH_RECENT_LINES: usize = 5;

#[derive(Parser)]
#[command(name = "qmon")]
#[command(about = "Monitor and control a remote download queue", long_about = None)]
#[command(version)]
struct Cli {
    /// Server base URL (overrides config and QMON_URL)
    #[arg(long, global = true, value_name = "URL")]
    url: Option<String>,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,

    /// Do not ask before destructive actions
    #[arg(short, long, global = true)]
    yes: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
    Html,
}

#[derive(Subcommand)]
enum Commands {
    /// Show active jobs
    Queue {
        /// Case-insensitive name filter
        #[arg(short, long)]
        filter: Option<String>,

        /// Page number (1-based)
        #[arg(short, long, default_value = "1")]
        page: usize,
    },

    /// Show finished and failed jobs, newest first
    History {
        #[arg(short, long)]
        filter: Option<String>,

        #[arg(short, long, default_value = "1")]
        page: usize,
    },

    /// Show aggregate speed, limits and free space
    Status,

    /// Show server warnings
    Warnings,

    /// Pause a job
    Pause { id: String },

    /// Resume a paused job
    Resume { id: String },

    /// Remove a job from the queue
    #[command(alias = "rm")]
    Remove { id: String },

    /// Pause the whole queue
    PauseAll,

    /// Resume the whole queue
    ResumeAll,

    /// Show the speed limit, or set it in bytes per second (0 = unlimited)
    SpeedLimit { bps: Option<u64> },

    /// Dismiss a warning by id, or all warnings with "*"
    Dismiss { id: String },

    /// Delete one history entry
    DeleteHistory { id: String },

    /// Delete the whole history
    ClearHistory,

    /// Show or change display preferences
    Prefs {
        #[arg(value_enum)]
        context: PrefsContext,

        /// New refresh interval in seconds
        #[arg(long, value_name = "SECONDS")]
        interval: Option<u64>,

        /// New page size
        #[arg(long)]
        page_size: Option<usize>,

        /// New date format for history ("relative" or a strftime pattern)
        #[arg(long)]
        date_format: Option<String>,
    },

    /// Live view of the queue that follows every poll
    #[command(alias = "w")]
    Watch {
        #[arg(short, long)]
        filter: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PrefsContext {
    Queue,
    History,
}

impl From<PrefsContext> for Context {
    fn from(value: PrefsContext) -> Self {
        match value {
            PrefsContext::Queue => Context::Queue,
            PrefsContext::History => Context::History,
        }
    }
}

/// Asks on the terminal before destructive history actions
struct TerminalConfirm;

impl ConfirmPrompt for TerminalConfirm {
    fn confirm(&self, action: &DestructiveAction) -> bool {
        Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(action.description())
            .default(false)
            .interact()
            .unwrap_or(false)
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("qmon=warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    let (mut config, warnings) = match QmonConfig::load() {
        Ok(loaded) => loaded,
        Err(e) => bail!("Configuration error: {}", e),
    };
    for w in warnings {
        eprintln!("{} {}", "Warning:".yellow(), w);
    }
    if let Some(url) = &cli.url {
        config.server.url = url.clone();
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    runtime.block_on(run(cli, config))
}

async fn run(cli: Cli, config: QmonConfig) -> Result<()> {
    let transport: Arc<dyn Transport> = Arc::new(
        HttpTransport::from_config(&config)
            .with_context(|| format!("Cannot use server '{}'", config.server.url))?,
    );
    let engine = Engine::new(transport, EngineOptions::from(&config));
    let prompt: Box<dyn ConfirmPrompt> = if cli.yes || !config.behavior.confirm_destructive {
        Box::new(AssumeYes)
    } else {
        Box::new(TerminalConfirm)
    };

    let command = cli.command.unwrap_or(Commands::Queue {
        filter: None,
        page: 1,
    });

    let result = match command {
        Commands::Queue { filter, page } => {
            show_queue(&engine, cli.format, filter.as_deref(), page).await
        }
        Commands::History { filter, page } => {
            show_history(&engine, cli.format, filter.as_deref(), page).await
        }
        Commands::Status => show_status(&engine, cli.format).await,
        Commands::Warnings => show_warnings(&engine, cli.format).await,
        Commands::Pause { id } => {
            check_job_state(&engine, &id, JobState::is_pausable, "paused").await?;
            command_result(engine.dispatcher().pause(&id).await, "Paused")
        }
        Commands::Resume { id } => {
            check_job_state(&engine, &id, JobState::is_resumable, "resumed").await?;
            command_result(engine.dispatcher().resume(&id).await, "Resumed")
        }
        Commands::Remove { id } => {
            command_result(engine.dispatcher().remove(&id).await, "Removed")
        }
        Commands::PauseAll => {
            command_result(engine.dispatcher().pause_all().await, "Queue paused")
        }
        Commands::ResumeAll => {
            command_result(engine.dispatcher().resume_all().await, "Queue resumed")
        }
        Commands::SpeedLimit { bps: None } => {
            match engine.dispatcher().current_speed_limit().await {
                Ok(0) => println!("Speed limit: {}", "unlimited".green()),
                Ok(bps) => println!("Speed limit: {}", formatting::format_speed(bps)),
                Err(e) => bail!(e.user_message()),
            }
            Ok(())
        }
        Commands::SpeedLimit { bps: Some(bps) } => {
            let result = engine.dispatcher().set_speed_limit(bps).await;
            command_result(result, "Speed limit set")?;
            println!("{}", display::format_status_line(&engine.render_status()));
            Ok(())
        }
        Commands::Dismiss { id } => {
            let target = WarningTarget::parse(&id);
            command_result(
                engine.dispatcher().dismiss_warning(&target).await,
                "Warning dismissed",
            )
        }
        Commands::DeleteHistory { id } => {
            expect_applied(engine.refresh(Context::History).await, "history")?;
            let name = engine.history_entry(&id).map(|e| e.name);
            let result = engine
                .dispatcher()
                .delete_history_entry(&id, name, prompt.as_ref())
                .await;
            command_result(result, "History entry deleted")
        }
        Commands::ClearHistory => {
            expect_applied(engine.refresh(Context::History).await, "history")?;
            let entries = engine.history_entries().len();
            let result = engine.dispatcher().clear_history(entries, prompt.as_ref()).await;
            command_result(result, "History cleared")
        }
        Commands::Prefs {
            context,
            interval,
            page_size,
            date_format,
        } => handle_prefs(&engine, context.into(), interval, page_size, date_format).await,
        Commands::Watch { filter } => watch_loop(&engine, filter.as_deref()).await,
    };

    engine.dispose();
    result
}

fn expect_applied(outcome: PollOutcome, what: &str) -> Result<()> {
    match outcome {
        PollOutcome::Applied => Ok(()),
        PollOutcome::Failed(e) => Err(e).with_context(|| format!("Could not fetch {}", what)),
        other => bail!("Could not fetch {} ({:?})", what, other),
    }
}

/// Refuse a pause/resume the job's current state does not allow. Jobs not in
/// the snapshot, or in an unknown state, are left for the server to judge.
async fn check_job_state(
    engine: &Engine,
    id: &str,
    allowed: fn(&JobState) -> bool,
    verb: &str,
) -> Result<()> {
    expect_applied(engine.refresh(Context::Queue).await, "queue")?;
    let view = engine.queue_view();
    if let Some(job) = view.queue.get(id)
        && job.state != JobState::Unknown
        && !allowed(&job.state)
    {
        bail!("Job {} is {} and cannot be {}", id, job.state, verb);
    }
    Ok(())
}

fn command_result(result: Result<(), qmon::error::ActionError>, done: &str) -> Result<()> {
    match result {
        Ok(()) => {
            println!("{}", done.green());
            Ok(())
        }
        Err(e) => bail!(e.user_message()),
    }
}

async fn show_queue(
    engine: &Engine,
    format: OutputFormat,
    filter: Option<&str>,
    page: usize,
) -> Result<()> {
    engine.load_preferences().await;
    expect_applied(engine.refresh(Context::Queue).await, "queue")?;
    engine.set_filter(Context::Queue, filter.unwrap_or_default());
    engine.set_page(Context::Queue, page);
    let rendered = engine.render_queue();

    let output = match format {
        OutputFormat::Table => format!(
            "{}\n\n{}",
            display::format_status_line(&engine.render_status()),
            display::format_queue(&rendered)
        ),
        OutputFormat::Json => serde_json::to_string_pretty(&rendered)?,
        OutputFormat::Html => display::queue_html(&rendered),
    };
    println!("{}", output);
    Ok(())
}

async fn show_history(
    engine: &Engine,
    format: OutputFormat,
    filter: Option<&str>,
    page: usize,
) -> Result<()> {
    engine.load_preferences().await;
    expect_applied(engine.refresh(Context::History).await, "history")?;
    engine.set_filter(Context::History, filter.unwrap_or_default());
    engine.set_page(Context::History, page);
    let rendered = engine.render_history();

    let output = match format {
        OutputFormat::Table => display::format_history(&rendered),
        OutputFormat::Json => serde_json::to_string_pretty(&rendered)?,
        OutputFormat::Html => display::history_html(&rendered),
    };
    println!("{}", output);
    Ok(())
}

async fn show_status(engine: &Engine, format: OutputFormat) -> Result<()> {
    expect_applied(engine.refresh(Context::Queue).await, "status")?;
    let status = engine.render_status();
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&status)?),
        _ => {
            println!("{}", display::format_status_line(&status));
            let view = engine.queue_view();
            for link in &view.status.connections {
                println!("  {}: {}/{} connections", link.link, link.active, link.max);
            }
        }
    }
    Ok(())
}

async fn show_warnings(engine: &Engine, format: OutputFormat) -> Result<()> {
    expect_applied(engine.refresh(Context::Queue).await, "warnings")?;
    let rows = engine.render_warnings();
    let output = match format {
        OutputFormat::Table => display::format_warnings(&rows),
        OutputFormat::Json => serde_json::to_string_pretty(&rows)?,
        OutputFormat::Html => display::warnings_html(&rows),
    };
    println!("{}", output);
    Ok(())
}

async fn handle_prefs(
    engine: &Engine,
    context: Context,
    interval: Option<u64>,
    page_size: Option<usize>,
    date_format: Option<String>,
) -> Result<()> {
    engine.load_preferences().await;
    let current = engine.preferences(context);

    if interval.is_none() && page_size.is_none() && date_format.is_none() {
        println!("{}", display::format_preferences(context, &current));
        return Ok(());
    }

    let updated = DisplayPreferences {
        refresh_interval_seconds: interval.unwrap_or(current.refresh_interval_seconds),
        page_size: page_size.unwrap_or(current.page_size),
        date_format: date_format.or(current.date_format.clone()),
        columns: current.columns.clone(),
    };
    match engine.save_preferences(context, updated).await {
        Ok(saved) => {
            println!("{}", display::format_preferences(context, &saved));
            Ok(())
        }
        Err(e) => bail!(e.user_message()),
    }
}

/// Keep only the latest few event lines under the watch table
fn push_recent(recent: &mut Vec<String>, line: String) {
    recent.push(line);
    let excess = recent.len().saturating_sub(WATCH_RECENT_LINES);
    recent.drain(..excess);
}

/// Live queue view: repaints on every store replacement until Ctrl+C
async fn watch_loop(engine: &Engine, filter: Option<&str>) -> Result<()> {
    let cancel = CancellationToken::new();
    let c = cancel.clone();
    ctrlc::set_handler(move || c.cancel()).context("Error setting Ctrl-C handler")?;

    let mut events = engine.subscribe();
    engine.set_filter(Context::Queue, filter.unwrap_or_default());
    engine.load_preferences().await;
    engine.start_context(Context::Queue);
    engine.refresh(Context::Queue).await;

    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, Hide)?;

    let mut recent: Vec<String> = Vec::new();
    let mut clock = tokio::time::interval(WATCH_CLOCK_TICK);

    let result: Result<()> = async {
        loop {
            let interval = engine.preferences(Context::Queue).refresh_interval_seconds;
            let stale = if engine.is_stale(Context::Queue) {
                format!(" | {}", "data may be stale".yellow())
            } else {
                String::new()
            };
            let screen = format!(
                "{}\n\n{}\n\n{}\nLast updated: {} | Refreshing every {}s{} | Press Ctrl+C to exit",
                display::format_status_line(&engine.render_status()),
                display::format_queue(&engine.render_queue()),
                recent.join("\n"),
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                interval,
                stale
            );

            // Synchronized update so the frame is drawn at once
            write!(stdout, "\x1B[?2026h")?;
            write!(stdout, "\x1B[H{}\x1B[J", screen)?;
            write!(stdout, "\x1B[?2026l")?;
            stdout.flush()?;

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = clock.tick() => {}
                event = events.recv() => match event {
                    Ok(EngineEvent::StoreReplaced(_)) => {}
                    Ok(EngineEvent::Transitions(transitions)) => {
                        for t in &transitions {
                            push_recent(&mut recent, display::format_transition(t));
                        }
                    }
                    Ok(EngineEvent::Notice(notice)) => {
                        push_recent(&mut recent, display::format_notice(&notice));
                    }
                    Err(RecvError::Lagged(n)) => tracing::debug!("watch view skipped {} events", n),
                    Err(RecvError::Closed) => break,
                },
            }
        }
        Ok(())
    }
    .await;

    execute!(stdout, Show, LeaveAlternateScreen)?;
    println!("Watch mode stopped.");
    result
}
