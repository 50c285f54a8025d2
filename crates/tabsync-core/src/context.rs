//! One client context: session, caches and API wired to the shared store.
//!
//! A context reacts to signals from its siblings. A logout elsewhere clears
//! the session, empties every cache and sends the user to the landing view
//! without any network traffic. A login elsewhere only invalidates the
//! session, so the next read revalidates once.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::api::{ApiClient, Transport};
use crate::auth::SessionCache;
use crate::broadcast::{BroadcastChannel, BroadcastSignal, SignalKind, Subscription};
use crate::cache::EntityRegistry;
use crate::config::Config;
use crate::models::Contributor;
use crate::poll::{poll_callback, Poller};
use crate::search::DebouncedSearch;
use crate::store::SharedStore;

/// Where the host application goes when the session ends remotely.
pub trait Navigator: Send + Sync {
    fn to_landing(&self);
}

/// For hosts without views.
pub struct NoopNavigator;

impl Navigator for NoopNavigator {
    fn to_landing(&self) {
        debug!("Landing navigation requested, nothing to do");
    }
}

pub struct TabContext {
    api: ApiClient,
    channel: BroadcastChannel,
    session: SessionCache,
    registry: Arc<EntityRegistry>,
    config: Config,
    _signals: Subscription,
}

impl TabContext {
    pub fn new(
        store: Arc<dyn SharedStore>,
        transport: Arc<dyn Transport>,
        navigator: Arc<dyn Navigator>,
        config: Config,
    ) -> Self {
        let api = ApiClient::new(transport);
        let channel = BroadcastChannel::new(store.clone());
        let session = SessionCache::new(
            api.clone(),
            store,
            channel.clone(),
            config.session_stale_after(),
        );
        let registry = Arc::new(EntityRegistry::new());

        let signals = {
            let session = session.clone();
            let registry = registry.clone();
            channel.subscribe_signals(move |signal: BroadcastSignal| match signal.kind {
                SignalKind::Logout => {
                    info!(emitted_at = %signal.emitted_at, "Logged out elsewhere");
                    session.clear();
                    registry.reset_all();
                    navigator.to_landing();
                }
                SignalKind::Login => {
                    info!(emitted_at = %signal.emitted_at, "Logged in elsewhere");
                    session.invalidate();
                }
            })
        };

        Self {
            api,
            channel,
            session,
            registry,
            config,
            _signals: signals,
        }
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn session(&self) -> &SessionCache {
        &self.session
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn channel(&self) -> &BroadcastChannel {
        &self.channel
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Log out here and everywhere else, dropping every cached entity.
    pub async fn logout(&self) {
        self.session.logout().await;
        self.registry.reset_all();
    }

    /// Timer that keeps the session fresh while a view is open.
    pub fn session_poller(&self, interval: Duration) -> Poller {
        let session = self.session.clone();
        let mut poller = Poller::new("session");
        poller.start(
            Some(poll_callback(move || {
                let session = session.clone();
                async move {
                    session.resolve().await;
                }
            })),
            interval,
            true,
        );
        poller
    }

    pub fn contributor_search(&self) -> DebouncedSearch<Contributor> {
        DebouncedSearch::contributors(self.api.clone(), self.config.search())
    }
}
