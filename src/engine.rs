//! The queue synchronization engine
//!
//! [`Engine`] owns both model stores, one poller per context, the action
//! dispatcher and the preferences store. It is constructed once, started
//! explicitly and torn down with [`Engine::dispose`]; nothing lives in
//! global state.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::broadcast;

use crate::dispatcher::ActionDispatcher;
use crate::error::{ApiError, PrefsError};
use crate::events::{EngineEvent, Notice};
use crate::models::{Context, DisplayPreferences, HistoryEntry, QmonConfig};
use crate::poller::{ApplyFn, FailFn, FetchFn, PollOutcome, Poller};
use crate::preferences::PreferencesStore;
use crate::render::{
    self, DisplayPage, HistoryLayout, HistoryRow, QueueRow, StatusLine, ViewState, WarningRow,
};
use crate::store::{HistoryStore, QueueData, QueueStore, QueueView};
use crate::transport::Transport;

/// Event channel capacity; slow subscribers lag rather than block polling
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Engine tuning taken from the client configuration.
#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    pub request_timeout: Duration,
    pub history_limit: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            history_limit: 200,
        }
    }
}

impl From<&QmonConfig> for EngineOptions {
    fn from(config: &QmonConfig) -> Self {
        Self {
            request_timeout: config.network.request_timeout(),
            history_limit: config.network.history_limit,
        }
    }
}

fn emit(events: &broadcast::Sender<EngineEvent>, event: EngineEvent) {
    // Sending only fails when nobody is subscribed.
    let _ = events.send(event);
}

fn notify_failure(events: &broadcast::Sender<EngineEvent>) -> FailFn {
    let tx = events.clone();
    Arc::new(move |e: &ApiError| {
        emit(&tx, EngineEvent::Notice(Notice::error(e.user_message())));
    })
}

/// Poller for the queue context: queue and status are fetched together and
/// replace the store only if both succeed.
pub(crate) fn queue_poller(
    transport: &Arc<dyn Transport>,
    store: &Arc<QueueStore>,
    events: &broadcast::Sender<EngineEvent>,
    request_timeout: Duration,
) -> Poller<QueueData> {
    let t = Arc::clone(transport);
    let fetch: FetchFn<QueueData> = Arc::new(move || {
        let t = Arc::clone(&t);
        async move {
            let (queue, status) = futures::try_join!(t.queue_snapshot(), t.status_snapshot())?;
            Ok::<_, ApiError>(QueueData { queue, status })
        }
        .boxed()
    });

    let store = Arc::clone(store);
    let tx = events.clone();
    let apply: ApplyFn<QueueData> = Arc::new(move |data: QueueData| {
        let transitions = store.replace(data);
        for t in &transitions {
            if t.is_expected() {
                tracing::debug!("job {}: {:?}", t.id(), t);
            } else {
                tracing::warn!("job {}: unexpected transition {:?}", t.id(), t);
            }
        }
        emit(&tx, EngineEvent::StoreReplaced(Context::Queue));
        if !transitions.is_empty() {
            emit(&tx, EngineEvent::Transitions(transitions));
        }
    });

    Poller::new(Context::Queue, request_timeout, fetch, apply).on_failure(notify_failure(events))
}

/// Poller for the history context.
pub(crate) fn history_poller(
    transport: &Arc<dyn Transport>,
    store: &Arc<HistoryStore>,
    events: &broadcast::Sender<EngineEvent>,
    request_timeout: Duration,
    limit: usize,
) -> Poller<Vec<HistoryEntry>> {
    let t = Arc::clone(transport);
    let fetch: FetchFn<Vec<HistoryEntry>> = Arc::new(move || {
        let t = Arc::clone(&t);
        async move { t.history_snapshot(limit).await }.boxed()
    });

    let store = Arc::clone(store);
    let tx = events.clone();
    let apply: ApplyFn<Vec<HistoryEntry>> = Arc::new(move |entries: Vec<HistoryEntry>| {
        store.replace(entries);
        emit(&tx, EngineEvent::StoreReplaced(Context::History));
    });

    Poller::new(Context::History, request_timeout, fetch, apply).on_failure(notify_failure(events))
}

#[derive(Debug)]
struct Views {
    queue: ViewState,
    history: ViewState,
}

impl Views {
    fn get_mut(&mut self, context: Context) -> &mut ViewState {
        match context {
            Context::Queue => &mut self.queue,
            Context::History => &mut self.history,
        }
    }
}

/// Owns the stores, pollers and command surface for one server.
pub struct Engine {
    queue: Arc<QueueStore>,
    history: Arc<HistoryStore>,
    queue_poller: Arc<Poller<QueueData>>,
    history_poller: Arc<Poller<Vec<HistoryEntry>>>,
    dispatcher: ActionDispatcher,
    prefs: PreferencesStore,
    views: Mutex<Views>,
    events: broadcast::Sender<EngineEvent>,
    options: EngineOptions,
}

impl Engine {
    pub fn new(transport: Arc<dyn Transport>, options: EngineOptions) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let queue = Arc::new(QueueStore::new());
        let history = Arc::new(HistoryStore::new());
        let queue_poller = Arc::new(queue_poller(
            &transport,
            &queue,
            &events,
            options.request_timeout,
        ));
        let history_poller = Arc::new(history_poller(
            &transport,
            &history,
            &events,
            options.request_timeout,
            options.history_limit,
        ));
        let dispatcher = ActionDispatcher::new(
            Arc::clone(&transport),
            Arc::clone(&queue),
            Arc::clone(&queue_poller),
            Arc::clone(&history_poller),
            events.clone(),
            options.request_timeout,
        );
        let prefs = PreferencesStore::new(transport, options.request_timeout);
        let views = Views {
            queue: ViewState::new(DisplayPreferences::defaults_for(Context::Queue).page_size),
            history: ViewState::new(DisplayPreferences::defaults_for(Context::History).page_size),
        };

        Self {
            queue,
            history,
            queue_poller,
            history_poller,
            dispatcher,
            prefs,
            views: Mutex::new(views),
            events,
            options,
        }
    }

    fn views(&self) -> MutexGuard<'_, Views> {
        self.views.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Receive store-replaced, transition and notice events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    #[must_use]
    pub fn dispatcher(&self) -> &ActionDispatcher {
        &self.dispatcher
    }

    #[must_use]
    pub fn options(&self) -> EngineOptions {
        self.options
    }

    /// Load preferences for both contexts and size the views accordingly.
    /// Never fails; unreachable preferences fall back to defaults.
    pub async fn load_preferences(&self) {
        let (queue, history) = tokio::join!(
            self.prefs.load(Context::Queue),
            self.prefs.load(Context::History)
        );
        let mut views = self.views();
        views.queue.page_size = queue.page_size;
        views.history.page_size = history.page_size;
    }

    /// Load preferences, start both pollers and take an initial snapshot.
    pub async fn start(&self) {
        self.load_preferences().await;
        for context in Context::ALL {
            self.start_context(context);
        }
        let (queue, history) = tokio::join!(
            self.queue_poller.poll_now(),
            self.history_poller.poll_now()
        );
        tracing::debug!("initial polls: queue {:?}, history {:?}", queue, history);
    }

    /// Start (or restart) one context's poller at its preferred cadence.
    pub fn start_context(&self, context: Context) {
        let interval = self.prefs.get(context).refresh_interval();
        match context {
            Context::Queue => self.queue_poller.start(interval),
            Context::History => self.history_poller.start(interval),
        }
    }

    /// Stop one context, e.g. when its view is no longer shown.
    pub fn stop_context(&self, context: Context) {
        match context {
            Context::Queue => self.queue_poller.stop(),
            Context::History => self.history_poller.stop(),
        }
    }

    #[must_use]
    pub fn is_polling(&self, context: Context) -> bool {
        match context {
            Context::Queue => self.queue_poller.is_running(),
            Context::History => self.history_poller.is_running(),
        }
    }

    /// Stop every timer. In-flight fetches finish but are discarded.
    pub fn dispose(&self) {
        for context in Context::ALL {
            self.stop_context(context);
        }
        tracing::debug!("engine disposed");
    }

    /// Out-of-cycle poll of one context.
    pub async fn refresh(&self, context: Context) -> PollOutcome {
        match context {
            Context::Queue => self.queue_poller.poll_now().await,
            Context::History => self.history_poller.poll_now().await,
        }
    }

    /// Whether the store may lag the server by more than one interval plus
    /// one request timeout. A store never filled is stale.
    #[must_use]
    pub fn is_stale(&self, context: Context) -> bool {
        let last = match context {
            Context::Queue => self.queue.last_replaced(),
            Context::History => self.history.last_replaced(),
        };
        let Some(last) = last else {
            return true;
        };
        last.elapsed() > self.max_staleness(context)
    }

    /// Maximum staleness bound for a context at its current cadence.
    #[must_use]
    pub fn max_staleness(&self, context: Context) -> Duration {
        let running = match context {
            Context::Queue => self.queue_poller.max_staleness(),
            Context::History => self.history_poller.max_staleness(),
        };
        running.unwrap_or_else(|| {
            self.prefs.get(context).refresh_interval() + self.options.request_timeout
        })
    }

    // ------------------------------------------------------------------
    // Stores and rendering
    // ------------------------------------------------------------------

    #[must_use]
    pub fn queue_view(&self) -> QueueView {
        self.queue.view()
    }

    #[must_use]
    pub fn history_entries(&self) -> Vec<HistoryEntry> {
        self.history.entries()
    }

    #[must_use]
    pub fn history_entry(&self, id: &str) -> Option<HistoryEntry> {
        self.history.get(id)
    }

    #[must_use]
    pub fn view_state(&self, context: Context) -> ViewState {
        self.views().get_mut(context).clone()
    }

    pub fn set_filter(&self, context: Context, filter: &str) {
        self.views().get_mut(context).set_filter(filter);
    }

    pub fn set_page(&self, context: Context, page: usize) {
        self.views().get_mut(context).page = page.max(1);
    }

    /// Render the current queue page; the stored page is clamped in place.
    #[must_use]
    pub fn render_queue(&self) -> DisplayPage<QueueRow> {
        let snapshot = self.queue.queue();
        let mut views = self.views();
        let view = &mut views.queue;
        let page = render::render_queue(&snapshot, &view.filter, view.page, view.page_size);
        view.page = page.page;
        page
    }

    /// Render the current history page using the history date format and
    /// column visibility.
    #[must_use]
    pub fn render_history(&self) -> DisplayPage<HistoryRow> {
        let prefs = self.prefs.get(Context::History);
        let columns = prefs.columns.clone().unwrap_or_default();
        let layout = HistoryLayout {
            columns: &columns,
            date_format: prefs.date_format(),
            now: Utc::now(),
        };
        let entries = self.history.entries();
        let mut views = self.views();
        let view = &mut views.history;
        let page = render::render_history(&entries, &view.filter, view.page, view.page_size, &layout);
        view.page = page.page;
        page
    }

    #[must_use]
    pub fn render_warnings(&self) -> Vec<WarningRow> {
        render::render_warnings(&self.queue.status(), Utc::now())
    }

    #[must_use]
    pub fn render_status(&self) -> StatusLine {
        render::render_status(&self.queue.view())
    }

    // ------------------------------------------------------------------
    // Preferences
    // ------------------------------------------------------------------

    #[must_use]
    pub fn preferences(&self, context: Context) -> DisplayPreferences {
        self.prefs.get(context)
    }

    /// Persist new preferences, then apply the cadence to a running poller
    /// and the page size to the view.
    pub async fn save_preferences(
        &self,
        context: Context,
        prefs: DisplayPreferences,
    ) -> Result<DisplayPreferences, PrefsError> {
        let saved = match self.prefs.save(context, prefs).await {
            Ok(saved) => saved,
            Err(e) => {
                tracing::warn!("saving {} preferences failed: {}", context, e);
                emit(&self.events, EngineEvent::Notice(Notice::error(e.user_message())));
                return Err(e);
            }
        };

        if self.is_polling(context) {
            match context {
                Context::Queue => self.queue_poller.restart(saved.refresh_interval()),
                Context::History => self.history_poller.restart(saved.refresh_interval()),
            }
        }

        let total_items = self.filtered_len(context);
        self.views()
            .get_mut(context)
            .set_page_size(saved.page_size, total_items);

        emit(&self.events, EngineEvent::StoreReplaced(context));
        emit(
            &self.events,
            EngineEvent::Notice(Notice::info(format!("{} preferences saved", context))),
        );
        Ok(saved)
    }

    fn filtered_len(&self, context: Context) -> usize {
        let filter = self.views().get_mut(context).filter.clone();
        match context {
            Context::Queue => self
                .queue
                .queue()
                .jobs
                .iter()
                .filter(|j| render::name_matches(&j.name, &filter))
                .count(),
            Context::History => self
                .history
                .entries()
                .iter()
                .filter(|e| render::name_matches(&e.name, &filter))
                .count(),
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.dispose();
    }
}
