//! The authenticated-identity cache of one client context.
//!
//! Reads never wait: they return what is known and, when that is missing,
//! invalidated or older than the staleness window, start one background
//! refresh that every concurrent reader shares.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::api::{ApiClient, ApiError};
use crate::broadcast::{BroadcastChannel, SignalKind};
use crate::models::{Credentials, Identity};
use crate::store::{SharedStore, TOKEN_KEY};

/// Default staleness window in minutes.
pub const DEFAULT_STALE_MINUTES: u64 = 5;

/// Upper bound on back-to-back refreshes inside one `resolve` call.
/// Only reachable when invalidations keep landing mid-refresh.
const MAX_RESOLVE_ROUNDS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Uninitialized,
    Loading,
    Authenticated,
    Anonymous,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub identity: Option<Identity>,
    pub fetched_at: Option<DateTime<Utc>>,
    pub in_flight: bool,
}

impl SessionSnapshot {
    pub fn is_authenticated(&self) -> bool {
        self.identity.is_some()
    }
}

type RefreshFuture = Shared<BoxFuture<'static, SessionSnapshot>>;

struct SessionState {
    status: SessionStatus,
    identity: Option<Identity>,
    fetched_at: Option<DateTime<Utc>>,
    fetched_instant: Option<Instant>,
    // Bumped by every local write; a refresh only lands if it still matches
    generation: u64,
    in_flight: Option<RefreshFuture>,
}

impl SessionState {
    fn new() -> Self {
        Self {
            status: SessionStatus::Uninitialized,
            identity: None,
            fetched_at: None,
            fetched_instant: None,
            generation: 0,
            in_flight: None,
        }
    }

    fn needs_refresh(&self, now: Instant, stale_after: Duration) -> bool {
        match self.status {
            SessionStatus::Uninitialized | SessionStatus::Loading => true,
            SessionStatus::Authenticated | SessionStatus::Anonymous => self
                .fetched_instant
                .map(|at| now.duration_since(at) >= stale_after)
                .unwrap_or(true),
        }
    }

    fn settle(&mut self, identity: Option<Identity>) {
        self.status = if identity.is_some() {
            SessionStatus::Authenticated
        } else {
            SessionStatus::Anonymous
        };
        self.identity = identity;
        self.fetched_at = Some(Utc::now());
        self.fetched_instant = Some(Instant::now());
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            status: self.status,
            identity: self.identity.clone(),
            fetched_at: self.fetched_at,
            in_flight: self.in_flight.is_some(),
        }
    }
}

struct SessionInner {
    state: Mutex<SessionState>,
    api: ApiClient,
    store: Arc<dyn SharedStore>,
    channel: BroadcastChannel,
    stale_after: Duration,
}

impl SessionInner {
    fn token(&self) -> Option<String> {
        match self.store.get(TOKEN_KEY) {
            Ok(token) => token.filter(|t| !t.is_empty()),
            Err(e) => {
                warn!(error = %e, "Token unreadable, treating session as anonymous");
                None
            }
        }
    }

    /// Any failure collapses to anonymous; only staleness keeps old data.
    async fn lookup_identity(&self) -> Option<Identity> {
        if self.token().is_none() {
            debug!("No token, anonymous without lookup");
            return None;
        }
        match self.api.fetch_identity().await {
            Ok(identity) => Some(identity),
            Err(e) if e.is_auth_failure() => {
                debug!(error = %e, "Token no longer accepted");
                None
            }
            Err(e) => {
                warn!(error = %e, "Identity lookup failed, treating session as anonymous");
                None
            }
        }
    }

    async fn run_refresh(self: Arc<Self>, generation: u64) -> SessionSnapshot {
        let identity = self.lookup_identity().await;

        let mut state = self.state.lock();
        state.in_flight = None;
        if state.generation != generation {
            debug!("Session changed during refresh, result dropped");
            return state.snapshot();
        }
        state.settle(identity);
        info!(status = ?state.status, "Session refreshed");
        state.snapshot()
    }
}

/// Shared handle on one context's session state.
/// Clone is cheap and refers to the same state.
#[derive(Clone)]
pub struct SessionCache {
    inner: Arc<SessionInner>,
}

impl SessionCache {
    pub fn new(
        api: ApiClient,
        store: Arc<dyn SharedStore>,
        channel: BroadcastChannel,
        stale_after: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                state: Mutex::new(SessionState::new()),
                api,
                store,
                channel,
                stale_after,
            }),
        }
    }

    /// Current snapshot, without scheduling anything.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.state.lock().snapshot()
    }

    /// Current snapshot, returned immediately. Schedules a background
    /// refresh when the snapshot is missing, invalidated or stale.
    pub fn read(&self) -> SessionSnapshot {
        self.ensure_refresh();
        self.snapshot()
    }

    /// Like [`SessionCache::read`] but waits for the refresh it triggers or joins.
    pub async fn resolve(&self) -> SessionSnapshot {
        for _ in 0..MAX_RESOLVE_ROUNDS {
            match self.ensure_refresh() {
                Some(refresh) => {
                    refresh.await;
                }
                None => break,
            }
        }
        self.snapshot()
    }

    /// Join the running refresh or start one if needed. Single-flight.
    fn ensure_refresh(&self) -> Option<RefreshFuture> {
        let refresh = {
            let mut state = self.inner.state.lock();
            if let Some(running) = &state.in_flight {
                return Some(running.clone());
            }
            if !state.needs_refresh(Instant::now(), self.inner.stale_after) {
                return None;
            }
            if self.inner.token().is_none() {
                // Answerable without a lookup
                state.settle(None);
                debug!("No token, anonymous without lookup");
                return None;
            }
            if tokio::runtime::Handle::try_current().is_err() {
                warn!("No async runtime, session refresh skipped");
                return None;
            }

            state.status = SessionStatus::Loading;
            let generation = state.generation;
            let inner = self.inner.clone();
            let refresh = inner.run_refresh(generation).boxed().shared();
            state.in_flight = Some(refresh.clone());
            refresh
        };

        debug!("Session refresh started");
        tokio::spawn(refresh.clone());
        Some(refresh)
    }

    /// Mark the session stale, keeping the identity on display.
    pub fn invalidate(&self) {
        let mut state = self.inner.state.lock();
        state.generation += 1;
        state.status = SessionStatus::Loading;
        debug!("Session invalidated");
    }

    /// Drop the identity immediately. No network call.
    pub fn clear(&self) {
        let mut state = self.inner.state.lock();
        state.generation += 1;
        state.settle(None);
        info!("Session cleared");
    }

    /// Install a fresh login and tell the other contexts.
    pub fn complete_login(&self, token: &str, identity: Identity) {
        if let Err(e) = self.inner.store.set(TOKEN_KEY, token) {
            warn!(error = %e, "Token could not be stored, other contexts stay logged out");
        }
        {
            let mut state = self.inner.state.lock();
            state.generation += 1;
            state.settle(Some(identity));
        }
        info!("Logged in");
        self.inner.channel.announce(SignalKind::Login);
    }

    /// Authenticate with the platform. On failure the session is untouched.
    pub async fn login(&self, credentials: &Credentials) -> Result<Identity, ApiError> {
        let response = self.inner.api.login(credentials).await?;
        self.complete_login(&response.token, response.user.clone());
        Ok(response.user)
    }

    /// End the session here and in every other context.
    pub async fn logout(&self) {
        if self.inner.token().is_some() {
            if let Err(e) = self.inner.api.logout().await {
                debug!(error = %e, "Server-side logout failed, clearing locally anyway");
            }
        }
        if let Err(e) = self.inner.store.remove(TOKEN_KEY) {
            warn!(error = %e, "Token could not be removed from the shared store");
        }
        self.clear();
        self.inner.channel.announce(SignalKind::Logout);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Envelope;
    use crate::store::{MemoryOrigin, MemoryStore};
    use crate::testing::FakeTransport;
    use serde_json::json;

    const IDENTITY: &str = "auth/me";
    const STALE: Duration = Duration::from_secs(300);

    fn identity_json() -> serde_json::Value {
        json!({"id": "u1", "name": "Ada Lovelace", "email": "ada@example.com"})
    }

    fn identity() -> Identity {
        serde_json::from_value(identity_json()).unwrap()
    }

    struct Fixture {
        origin: MemoryOrigin,
        fake: Arc<FakeTransport>,
        session: SessionCache,
    }

    fn fixture() -> Fixture {
        let origin = MemoryOrigin::new();
        let fake = FakeTransport::new();
        let session = session_on(&origin, &fake);
        Fixture {
            origin,
            fake,
            session,
        }
    }

    fn session_on(origin: &MemoryOrigin, fake: &Arc<FakeTransport>) -> SessionCache {
        let store: Arc<dyn SharedStore> = Arc::new(origin.open_tab());
        SessionCache::new(
            ApiClient::new(fake.clone()),
            store.clone(),
            BroadcastChannel::new(store),
            STALE,
        )
    }

    fn other_tab(origin: &MemoryOrigin) -> MemoryStore {
        origin.open_tab()
    }

    fn identity_after(fake: &FakeTransport, delay: Duration) {
        fake.respond_with(IDENTITY, move |_| (delay, Ok(Envelope::ok(identity_json()))));
    }

    #[tokio::test]
    async fn test_no_token_is_anonymous_without_network() {
        let f = fixture();
        identity_after(&f.fake, Duration::ZERO);

        let snapshot = f.session.resolve().await;

        assert_eq!(snapshot.status, SessionStatus::Anonymous);
        assert!(snapshot.identity.is_none());
        assert_eq!(f.fake.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_read_without_token_is_anonymous_at_once() {
        let f = fixture();
        identity_after(&f.fake, Duration::ZERO);

        let snapshot = f.session.read();

        assert_eq!(snapshot.status, SessionStatus::Anonymous);
        assert!(snapshot.identity.is_none());
        assert!(!snapshot.in_flight);
        assert!(snapshot.fetched_at.is_some());
        tokio::task::yield_now().await;
        assert_eq!(f.fake.total_calls(), 0);
    }

    #[test]
    fn test_read_without_token_needs_no_runtime() {
        let f = fixture();
        assert_eq!(f.session.read().status, SessionStatus::Anonymous);
    }

    #[tokio::test]
    async fn test_first_read_is_uninitialized_then_loading() {
        let f = fixture();
        other_tab(&f.origin).set(TOKEN_KEY, "t0k").unwrap();
        identity_after(&f.fake, Duration::ZERO);
        assert_eq!(f.session.snapshot().status, SessionStatus::Uninitialized);

        let snapshot = f.session.read();
        assert_eq!(snapshot.status, SessionStatus::Loading);
        assert!(snapshot.in_flight);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_reads_share_one_refresh() {
        let f = fixture();
        other_tab(&f.origin).set(TOKEN_KEY, "t0k").unwrap();
        identity_after(&f.fake, Duration::from_millis(200));

        for _ in 0..50 {
            f.session.read();
        }
        let (a, b) = tokio::join!(f.session.resolve(), f.session.resolve());

        assert_eq!(a.status, SessionStatus::Authenticated);
        assert_eq!(a, b);
        assert_eq!(f.fake.calls(IDENTITY), 1);

        for _ in 0..50 {
            assert_eq!(f.session.read().status, SessionStatus::Authenticated);
        }
        assert_eq!(f.fake.calls(IDENTITY), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_value_served_while_revalidating() {
        let f = fixture();
        other_tab(&f.origin).set(TOKEN_KEY, "t0k").unwrap();
        identity_after(&f.fake, Duration::from_millis(100));
        f.session.resolve().await;

        tokio::time::advance(STALE + Duration::from_secs(1)).await;

        let stale = f.session.read();
        assert_eq!(stale.identity, Some(identity()));
        assert!(stale.in_flight);

        let fresh = f.session.resolve().await;
        assert_eq!(fresh.status, SessionStatus::Authenticated);
        assert_eq!(f.fake.calls(IDENTITY), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_lookup_falls_to_anonymous() {
        let f = fixture();
        other_tab(&f.origin).set(TOKEN_KEY, "t0k").unwrap();
        identity_after(&f.fake, Duration::ZERO);
        assert!(f.session.resolve().await.is_authenticated());

        f.fake.fail(IDENTITY, "gateway down");
        tokio::time::advance(STALE).await;
        let snapshot = f.session.resolve().await;

        assert_eq!(snapshot.status, SessionStatus::Anonymous);
        assert!(snapshot.identity.is_none());
    }

    #[tokio::test]
    async fn test_rejected_lookup_falls_to_anonymous() {
        let f = fixture();
        other_tab(&f.origin).set(TOKEN_KEY, "expired").unwrap();
        f.fake.respond(IDENTITY, Envelope::rejected("Token expired"));

        let snapshot = f.session.resolve().await;
        assert_eq!(snapshot.status, SessionStatus::Anonymous);
        assert_eq!(f.fake.calls(IDENTITY), 1);
    }

    #[tokio::test]
    async fn test_invalidate_keeps_identity_and_refreshes_once() {
        let f = fixture();
        other_tab(&f.origin).set(TOKEN_KEY, "t0k").unwrap();
        identity_after(&f.fake, Duration::ZERO);
        f.session.resolve().await;

        f.session.invalidate();
        let snapshot = f.session.snapshot();
        assert_eq!(snapshot.status, SessionStatus::Loading);
        assert_eq!(snapshot.identity, Some(identity()));
        assert_eq!(f.fake.calls(IDENTITY), 1);

        f.session.read();
        f.session.read();
        f.session.resolve().await;
        assert_eq!(f.fake.calls(IDENTITY), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_during_refresh_wins() {
        let f = fixture();
        other_tab(&f.origin).set(TOKEN_KEY, "t0k").unwrap();
        identity_after(&f.fake, Duration::from_millis(500));

        f.session.read();
        f.session.clear();
        tokio::time::sleep(Duration::from_secs(1)).await;

        let snapshot = f.session.snapshot();
        assert_eq!(snapshot.status, SessionStatus::Anonymous);
        assert!(snapshot.identity.is_none());
        assert!(!snapshot.in_flight);
        // Cleared state is fresh, nothing further to fetch
        f.session.read();
        assert_eq!(f.fake.calls(IDENTITY), 1);
    }

    #[tokio::test]
    async fn test_login_stores_token_and_announces() {
        let f = fixture();
        f.fake.respond(
            "auth/login",
            Envelope::ok(json!({"token": "t0k", "user": identity_json()})),
        );
        let watcher = other_tab(&f.origin);
        let mut changes = watcher.watch().unwrap();

        let who = f
            .session
            .login(&Credentials {
                email: "ada@example.com".into(),
                password: "pw".into(),
            })
            .await
            .unwrap();

        assert_eq!(who, identity());
        assert_eq!(f.session.snapshot().status, SessionStatus::Authenticated);
        assert_eq!(watcher.get(TOKEN_KEY).unwrap().as_deref(), Some("t0k"));

        let mut keys = Vec::new();
        while let Ok(change) = changes.try_recv() {
            keys.push(change.key);
        }
        assert_eq!(keys, vec![TOKEN_KEY.to_string(), "login".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_login_leaves_session_alone() {
        let f = fixture();
        f.fake.respond("auth/login", Envelope::rejected("Wrong password"));

        let err = f
            .session
            .login(&Credentials {
                email: "ada@example.com".into(),
                password: "nope".into(),
            })
            .await
            .unwrap_err();

        assert_eq!(err.user_message(), "Wrong password");
        assert_eq!(f.session.snapshot().status, SessionStatus::Uninitialized);
        assert_eq!(other_tab(&f.origin).get("login").unwrap(), None);
    }

    #[tokio::test]
    async fn test_logout_removes_token_and_announces() {
        let f = fixture();
        f.fake.respond("auth/logout", Envelope::ok(json!(null)));
        f.session.complete_login("t0k", identity());
        let watcher = other_tab(&f.origin);

        f.session.logout().await;

        let snapshot = f.session.snapshot();
        assert_eq!(snapshot.status, SessionStatus::Anonymous);
        assert!(snapshot.identity.is_none());
        assert_eq!(watcher.get(TOKEN_KEY).unwrap(), None);
        assert!(watcher.get("logout").unwrap().is_some());
        assert_eq!(f.fake.calls("auth/logout"), 1);
    }

    #[tokio::test]
    async fn test_logout_survives_unavailable_storage() {
        let f = fixture();
        f.session.complete_login("t0k", identity());
        f.origin.set_available(false);

        f.session.logout().await;
        assert_eq!(f.session.snapshot().status, SessionStatus::Anonymous);
    }

    #[test]
    fn test_read_outside_runtime_does_not_panic() {
        let f = fixture();
        let snapshot = f.session.read();
        assert_eq!(snapshot.status, SessionStatus::Uninitialized);
        assert!(!snapshot.in_flight);
    }
}
