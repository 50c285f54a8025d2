//! Cross-context login/logout signals carried by the shared store.
//!
//! A signal is a write of the current time under the key `login` or
//! `logout`. The kind is the key; the value only exists to make the write a
//! change, and receivers re-derive their state instead of trusting it.
//! Storage failures turn both directions into no-ops.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::store::SharedStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Login,
    Logout,
}

impl SignalKind {
    pub fn key(&self) -> &'static str {
        match self {
            SignalKind::Login => "login",
            SignalKind::Logout => "logout",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "login" => Some(SignalKind::Login),
            "logout" => Some(SignalKind::Logout),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastSignal {
    pub kind: SignalKind,
    /// Informational only; receipt time when the stored value is not a timestamp.
    pub emitted_at: DateTime<Utc>,
}

/// Keeps a subscription alive. Dropping it stops delivery.
pub struct Subscription {
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    fn inert() -> Self {
        Self { task: None }
    }

    /// False when the store could not be watched and nothing will be delivered.
    pub fn is_active(&self) -> bool {
        self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[derive(Clone)]
pub struct BroadcastChannel {
    store: Arc<dyn SharedStore>,
}

impl BroadcastChannel {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self { store }
    }

    /// Tell every other context that `kind` happened here.
    pub fn announce(&self, kind: SignalKind) {
        let value = Utc::now().timestamp_millis().to_string();
        match self.store.set(kind.key(), &value) {
            Ok(()) => info!(signal = kind.key(), "Signal announced"),
            Err(e) => warn!(signal = kind.key(), error = %e, "Cross-context sync unavailable, signal dropped"),
        }
    }

    /// Deliver every change made by another context as `(key, new_value)`.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&str, Option<&str>) + Send + 'static,
    {
        let mut rx = match self.store.watch() {
            Ok(rx) => rx,
            Err(e) => {
                warn!(error = %e, "Cross-context sync unavailable, not subscribing");
                return Subscription::inert();
            }
        };
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                warn!(error = %e, "No async runtime, not subscribing");
                return Subscription::inert();
            }
        };

        let task = runtime.spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(change) => handler(&change.key, change.new_value.as_deref()),
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "Store change listener lagged");
                    }
                    Err(RecvError::Closed) => {
                        debug!("Store change stream closed");
                        break;
                    }
                }
            }
        });
        Subscription { task: Some(task) }
    }

    /// Deliver only login/logout writes. Removals are not signals.
    pub fn subscribe_signals<F>(&self, handler: F) -> Subscription
    where
        F: Fn(BroadcastSignal) + Send + 'static,
    {
        self.subscribe(move |key, new_value| {
            let Some(kind) = SignalKind::from_key(key) else {
                return;
            };
            let Some(value) = new_value else {
                return;
            };
            let emitted_at = value
                .parse::<i64>()
                .ok()
                .and_then(DateTime::from_timestamp_millis)
                .unwrap_or_else(Utc::now);
            debug!(signal = key, "Signal received");
            handler(BroadcastSignal { kind, emitted_at });
        })
    }
}
