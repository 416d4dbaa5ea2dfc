//! Per-context snapshot poller
//!
//! A [`Poller`] owns one repeating timer. Each tick fetches a snapshot and
//! hands it to the applier. Fetches for the same poller never overlap: a tick
//! (or an out-of-cycle [`Poller::poll_now`]) that finds a fetch in flight is
//! skipped, not queued. Stopping bumps a generation counter so a fetch that
//! was already running when the poller stopped is discarded on completion.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::ApiError;
use crate::models::Context;
use crate::transport::with_timeout;

/// Produces one snapshot per call.
pub type FetchFn<S> = Arc<dyn Fn() -> BoxFuture<'static, Result<S, ApiError>> + Send + Sync>;

/// Consumes a successfully fetched snapshot.
pub type ApplyFn<S> = Arc<dyn Fn(S) + Send + Sync>;

/// Observes a failed fetch (the store is not touched).
pub type FailFn = Arc<dyn Fn(&ApiError) + Send + Sync>;

/// Result of a single poll attempt
#[derive(Debug)]
pub enum PollOutcome {
    /// Snapshot fetched and applied
    Applied,
    /// Another fetch was in flight; nothing was issued
    Skipped,
    /// Fetch failed; the store keeps its last good snapshot
    Failed(ApiError),
    /// Fetch completed after the poller was stopped; result dropped
    Discarded,
}

impl PollOutcome {
    #[must_use]
    pub fn is_applied(&self) -> bool {
        matches!(self, PollOutcome::Applied)
    }
}

struct Timer {
    interval: Duration,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct Shared<S> {
    context: Context,
    request_timeout: Duration,
    fetch: FetchFn<S>,
    apply: ApplyFn<S>,
    on_failure: Option<FailFn>,
    in_flight: AtomicBool,
    generation: AtomicU64,
    stopped: AtomicBool,
}

/// Releases the in-flight flag when the fetch ends, however it ends.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlight(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<S: Send + 'static> Shared<S> {
    async fn poll_once(&self) -> PollOutcome {
        if self.stopped.load(Ordering::Acquire) {
            return PollOutcome::Discarded;
        }
        let Some(_guard) = InFlight::acquire(&self.in_flight) else {
            tracing::trace!("{} poll skipped: fetch already in flight", self.context);
            return PollOutcome::Skipped;
        };

        let started_in = self.generation.load(Ordering::Acquire);
        let result = with_timeout(self.request_timeout, (self.fetch)()).await;

        if self.stopped.load(Ordering::Acquire)
            || self.generation.load(Ordering::Acquire) != started_in
        {
            tracing::debug!("{} poll result discarded: poller stopped", self.context);
            return PollOutcome::Discarded;
        }

        match result {
            Ok(snapshot) => {
                (self.apply)(snapshot);
                PollOutcome::Applied
            }
            Err(e) => {
                tracing::warn!("{} poll failed: {}", self.context, e);
                if let Some(on_failure) = &self.on_failure {
                    on_failure(&e);
                }
                PollOutcome::Failed(e)
            }
        }
    }
}

/// Repeating fetch-and-apply loop for one context.
pub struct Poller<S> {
    shared: Arc<Shared<S>>,
    timer: Mutex<Option<Timer>>,
}

impl<S: Send + 'static> Poller<S> {
    pub fn new(
        context: Context,
        request_timeout: Duration,
        fetch: FetchFn<S>,
        apply: ApplyFn<S>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                context,
                request_timeout,
                fetch,
                apply,
                on_failure: None,
                in_flight: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                stopped: AtomicBool::new(false),
            }),
            timer: Mutex::new(None),
        }
    }

    /// Attach a failure observer. Must be called before the poller is shared.
    #[must_use]
    pub fn on_failure(mut self, f: FailFn) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.on_failure = Some(f);
        }
        self
    }

    #[must_use]
    pub fn context(&self) -> Context {
        self.shared.context
    }

    fn timer(&self) -> MutexGuard<'_, Option<Timer>> {
        self.timer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start ticking every `interval`. The first tick fires one full
    /// interval from now; callers wanting an immediate snapshot use
    /// [`Poller::poll_now`]. Any previous timer is replaced.
    pub fn start(&self, interval: Duration) {
        let interval = interval.max(Duration::from_millis(1));
        let mut timer = self.timer();
        if let Some(old) = timer.take() {
            old.cancel.cancel();
        }
        self.shared.stopped.store(false, Ordering::Release);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_timer(
            Arc::clone(&self.shared),
            interval,
            cancel.clone(),
        ));
        tracing::debug!(
            "{} poller started ({}s)",
            self.shared.context,
            interval.as_secs_f64()
        );
        *timer = Some(Timer {
            interval,
            cancel,
            handle,
        });
    }

    /// Replace the timer with one running at the new cadence.
    pub fn restart(&self, interval: Duration) {
        self.start(interval);
    }

    /// Clear the timer. A fetch already in flight completes but its result
    /// is discarded.
    pub fn stop(&self) {
        let mut timer = self.timer();
        self.shared.stopped.store(true, Ordering::Release);
        self.shared.generation.fetch_add(1, Ordering::AcqRel);
        if let Some(old) = timer.take() {
            old.cancel.cancel();
            tracing::debug!("{} poller stopped", self.shared.context);
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.timer()
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }

    #[must_use]
    pub fn interval(&self) -> Option<Duration> {
        self.timer().as_ref().map(|t| t.interval)
    }

    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.shared.in_flight.load(Ordering::Acquire)
    }

    /// Fetch and apply right now, sharing the in-flight guard with the timer.
    pub async fn poll_now(&self) -> PollOutcome {
        self.shared.poll_once().await
    }

    /// Longest time the store can lag the server while polling succeeds:
    /// one interval plus one request timeout.
    #[must_use]
    pub fn max_staleness(&self) -> Option<Duration> {
        self.interval()
            .map(|interval| interval + self.shared.request_timeout)
    }
}

impl<S> Drop for Poller<S> {
    fn drop(&mut self) {
        let timer = self
            .timer
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(old) = timer.take() {
            old.cancel.cancel();
        }
    }
}

async fn run_timer<S: Send + 'static>(
    shared: Arc<Shared<S>>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                // Each tick runs detached so a slow fetch cannot hold up the
                // schedule; overlapping ticks fall through the in-flight guard.
                let shared = Arc::clone(&shared);
                tokio::spawn(async move {
                    shared.poll_once().await;
                });
            }
        }
    }
}
