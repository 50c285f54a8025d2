//! Debounced remote search for an interactive input.
//!
//! Keystrokes arrive through [`DebouncedSearch::search`]. Each one cancels
//! the armed timer; only after a quiet period is a query dispatched. Every
//! dispatch and every clear bumps an epoch, and a response is applied only
//! if its epoch is still current, so the last dispatch always wins no matter
//! in which order responses come back.

use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::api::{ApiClient, ApiError};
use crate::models::Contributor;

/// Quiet period before a query goes out, in milliseconds.
pub const DEFAULT_QUIET_MS: u64 = 300;

/// Shorter input clears results without a request.
pub const DEFAULT_MIN_CHARS: usize = 2;

pub const DEFAULT_RESULT_LIMIT: usize = 10;

pub type SearchFn<R> = Arc<dyn Fn(String) -> BoxFuture<'static, Result<Vec<R>, ApiError>> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub quiet_period: Duration,
    pub min_chars: usize,
    pub limit: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            quiet_period: Duration::from_millis(DEFAULT_QUIET_MS),
            min_chars: DEFAULT_MIN_CHARS,
            limit: DEFAULT_RESULT_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchPhase {
    Idle,
    /// Timer armed, nothing sent yet.
    Pending,
    InFlight,
}

/// What the input widget renders.
#[derive(Debug)]
pub struct SearchView<R> {
    pub phase: SearchPhase,
    /// Query the current results answer.
    pub query: Option<String>,
    pub results: Arc<Vec<R>>,
    pub error: Option<String>,
}

impl<R> Clone for SearchView<R> {
    fn clone(&self) -> Self {
        Self {
            phase: self.phase,
            query: self.query.clone(),
            results: self.results.clone(),
            error: self.error.clone(),
        }
    }
}

impl<R> SearchView<R> {
    fn idle() -> Self {
        Self {
            phase: SearchPhase::Idle,
            query: None,
            results: Arc::new(Vec::new()),
            error: None,
        }
    }
}

struct ArmedTimer {
    seq: u64,
    handle: JoinHandle<()>,
}

struct SearchState<R> {
    view: SearchView<R>,
    pending_query: Option<String>,
    timer: Option<ArmedTimer>,
    // Identifies the armed timer; a cancelled one that still fires must not dispatch
    timer_seq: u64,
    epoch: u64,
}

impl<R> SearchState<R> {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.handle.abort();
        }
    }
}

struct SearchInner<R> {
    name: &'static str,
    state: Mutex<SearchState<R>>,
    fetch: SearchFn<R>,
    config: SearchConfig,
    view_tx: watch::Sender<SearchView<R>>,
}

impl<R: Send + Sync + 'static> SearchInner<R> {
    fn publish(&self, state: &SearchState<R>) {
        self.view_tx.send_replace(state.view.clone());
    }

    async fn dispatch(self: Arc<Self>, query: String, seq: u64) {
        let epoch = {
            let mut state = self.state.lock();
            if state.timer.as_ref().map(|t| t.seq) != Some(seq) {
                // Cancelled or replaced between firing and getting here
                trace!(search = self.name, seq, "Timer superseded");
                return;
            }
            // Detach: from here on a new keystroke must not cancel this request
            state.timer = None;
            state.pending_query = None;
            state.epoch += 1;
            state.view.phase = SearchPhase::InFlight;
            self.publish(&state);
            state.epoch
        };

        debug!(search = self.name, epoch, "Dispatching query");
        let result = (self.fetch)(query.clone()).await;

        let mut state = self.state.lock();
        if state.epoch != epoch {
            debug!(search = self.name, epoch, current = state.epoch, "Stale response dropped");
            return;
        }
        match result {
            Ok(results) => {
                trace!(search = self.name, count = results.len(), "Results applied");
                state.view.results = Arc::new(results);
                state.view.error = None;
            }
            Err(e) => {
                warn!(search = self.name, error = %e, "Search failed, showing no results");
                state.view.results = Arc::new(Vec::new());
                state.view.error = Some(e.user_message());
            }
        }
        state.view.query = Some(query);
        state.view.phase = if state.timer.is_some() {
            SearchPhase::Pending
        } else {
            SearchPhase::Idle
        };
        self.publish(&state);
    }
}

/// Search client owned by one input widget. Dropping it cancels any armed timer.
pub struct DebouncedSearch<R> {
    inner: Arc<SearchInner<R>>,
}

impl<R: Send + Sync + 'static> DebouncedSearch<R> {
    pub fn new<F, Fut>(name: &'static str, config: SearchConfig, fetch: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<R>, ApiError>> + Send + 'static,
    {
        let (view_tx, _) = watch::channel(SearchView::idle());
        Self {
            inner: Arc::new(SearchInner {
                name,
                state: Mutex::new(SearchState {
                    view: SearchView::idle(),
                    pending_query: None,
                    timer: None,
                    timer_seq: 0,
                    epoch: 0,
                }),
                fetch: Arc::new(move |query| fetch(query).boxed()),
                config,
                view_tx,
            }),
        }
    }

    /// Feed the latest input. Short input clears at once; anything else is
    /// sent after the quiet period unless another call comes first.
    pub fn search(&self, query: &str) {
        let query = query.trim();
        let mut state = self.inner.state.lock();
        state.cancel_timer();

        if query.chars().count() < self.inner.config.min_chars {
            Self::reset(&mut state);
            self.inner.publish(&state);
            return;
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                warn!(search = self.inner.name, error = %e, "No async runtime, search skipped");
                Self::reset(&mut state);
                self.inner.publish(&state);
                return;
            }
        };

        let weak: Weak<SearchInner<R>> = Arc::downgrade(&self.inner);
        let quiet = self.inner.config.quiet_period;
        let dispatched = query.to_string();
        state.timer_seq += 1;
        let seq = state.timer_seq;
        state.pending_query = Some(query.to_string());
        state.view.phase = SearchPhase::Pending;
        let handle = runtime.spawn(async move {
            tokio::time::sleep(quiet).await;
            if let Some(inner) = weak.upgrade() {
                inner.dispatch(dispatched, seq).await;
            }
        });
        state.timer = Some(ArmedTimer { seq, handle });
        self.inner.publish(&state);
    }

    /// Back to idle with no results, whatever is armed or in flight.
    pub fn clear(&self) {
        let mut state = self.inner.state.lock();
        state.cancel_timer();
        Self::reset(&mut state);
        self.inner.publish(&state);
    }

    /// Query waiting for the quiet period to pass, if any.
    pub fn pending_query(&self) -> Option<String> {
        self.inner.state.lock().pending_query.clone()
    }

    pub fn snapshot(&self) -> SearchView<R> {
        self.inner.state.lock().view.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SearchView<R>> {
        self.inner.view_tx.subscribe()
    }

    fn reset(state: &mut SearchState<R>) {
        // Strands any in-flight response
        state.epoch += 1;
        state.pending_query = None;
        state.view = SearchView::idle();
    }
}

impl DebouncedSearch<Contributor> {
    /// Contributor lookup against the platform's search endpoint.
    pub fn contributors(api: ApiClient, config: SearchConfig) -> Self {
        let limit = config.limit;
        Self::new("contributors", config, move |query| {
            let api = api.clone();
            async move { api.search_contributors(&query, limit).await }
        })
    }
}

impl<R> Drop for DebouncedSearch<R> {
    fn drop(&mut self) {
        self.inner.state.lock().cancel_timer();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Envelope;
    use crate::testing::FakeTransport;
    use serde_json::json;

    const ENDPOINT: &str = "contributors/search";

    /// Echoes the query as a single contributor; "slow" takes a second.
    fn echo_backend() -> Arc<FakeTransport> {
        let fake = FakeTransport::new();
        fake.respond_with(ENDPOINT, |req| {
            let q = req.params["q"].as_str().unwrap_or_default().to_string();
            let delay = if q == "slow" { 1_000 } else { 10 };
            (
                Duration::from_millis(delay),
                Ok(Envelope::ok(json!([{"id": q, "name": q}]))),
            )
        });
        fake
    }

    fn client(fake: &Arc<FakeTransport>) -> DebouncedSearch<Contributor> {
        DebouncedSearch::contributors(ApiClient::new(fake.clone()), SearchConfig::default())
    }

    fn names(view: &SearchView<Contributor>) -> Vec<String> {
        view.results.iter().map(|c| c.name.clone()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_sends_one_query_for_last_input() {
        let fake = echo_backend();
        let search = client(&fake);

        search.search("a");
        search.search("ab");
        search.search("abc");
        assert_eq!(search.snapshot().phase, SearchPhase::Pending);
        assert_eq!(search.pending_query().as_deref(), Some("abc"));

        tokio::time::sleep(Duration::from_secs(1)).await;

        let sent = fake.requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].params["q"], json!("abc"));
        assert_eq!(sent[0].params["limit"], json!(DEFAULT_RESULT_LIMIT));

        let view = search.snapshot();
        assert_eq!(view.phase, SearchPhase::Idle);
        assert_eq!(view.query.as_deref(), Some("abc"));
        assert_eq!(names(&view), vec!["abc"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_response_from_superseded_dispatch_is_dropped() {
        let fake = echo_backend();
        let search = client(&fake);

        search.search("slow");
        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(search.snapshot().phase, SearchPhase::InFlight);

        search.search("fast");
        tokio::time::sleep(Duration::from_millis(1_500)).await;

        assert_eq!(fake.total_calls(), 2);
        assert_eq!(names(&search.snapshot()), vec!["fast"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_input_clears_synchronously() {
        let fake = echo_backend();
        let search = client(&fake);
        search.search("ann");
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(names(&search.snapshot()), vec!["ann"]);

        search.search("");

        let view = search.snapshot();
        assert_eq!(view.phase, SearchPhase::Idle);
        assert!(view.results.is_empty());
        assert!(view.query.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_input_never_hits_network() {
        let fake = echo_backend();
        let search = client(&fake);

        search.search("a");
        search.search("  b  ");
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(fake.total_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_strands_in_flight_response() {
        let fake = echo_backend();
        let search = client(&fake);

        search.search("slow");
        tokio::time::sleep(Duration::from_millis(400)).await;
        search.clear();
        tokio::time::sleep(Duration::from_secs(2)).await;

        let view = search.snapshot();
        assert_eq!(view.phase, SearchPhase::Idle);
        assert!(view.results.is_empty());
        assert_eq!(fake.total_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_input_strands_in_flight_response() {
        let fake = echo_backend();
        let search = client(&fake);

        search.search("slow");
        tokio::time::sleep(Duration::from_millis(400)).await;
        search.search("");
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert!(search.snapshot().results.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_yields_empty_results_and_message() {
        let fake = FakeTransport::new();
        fake.respond(ENDPOINT, Envelope::rejected("Search is temporarily disabled"));
        let search = client(&fake);

        search.search("ann");
        tokio::time::sleep(Duration::from_secs(1)).await;

        let view = search.snapshot();
        assert!(view.results.is_empty());
        assert_eq!(view.error.as_deref(), Some("Search is temporarily disabled"));
        assert_eq!(view.phase, SearchPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels_armed_timer() {
        let fake = echo_backend();
        let search = client(&fake);

        search.search("ann");
        drop(search);
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(fake.total_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribers_see_results() {
        let fake = echo_backend();
        let search = client(&fake);
        let mut rx = search.subscribe();

        search.search("ann");
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(rx.has_changed().unwrap());
        let view = rx.borrow_and_update().clone();
        assert_eq!(names(&view), vec!["ann"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_replaced_timer_firing_late_does_not_dispatch() {
        let fake = echo_backend();
        let search = client(&fake);

        search.search("abc");
        let replaced = search.inner.state.lock().timer.as_ref().map(|t| t.seq).unwrap();
        search.search("abc");

        // The first timer fired before its abort landed and reaches dispatch late
        search.inner.clone().dispatch("abc".to_string(), replaced).await;
        assert_eq!(search.snapshot().phase, SearchPhase::Pending);
        assert_eq!(fake.total_calls(), 0);

        tokio::time::sleep(Duration::from_secs(1)).await;
        let view = search.snapshot();
        assert_eq!(view.phase, SearchPhase::Idle);
        assert_eq!(names(&view), vec!["abc"]);
        assert_eq!(fake.total_calls(), 1);
    }

    #[test]
    fn test_search_without_runtime_returns_to_idle() {
        let search: DebouncedSearch<String> =
            DebouncedSearch::new("words", SearchConfig::default(), |q| async move { Ok(vec![q]) });
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();

        let guard = rt.enter();
        search.search("abc");
        assert_eq!(search.snapshot().phase, SearchPhase::Pending);
        drop(guard);

        search.search("abcd");
        let view = search.snapshot();
        assert_eq!(view.phase, SearchPhase::Idle);
        assert!(view.results.is_empty());
        assert!(search.inner.state.lock().timer.is_none());
        assert!(search.pending_query().is_none());
    }
}
