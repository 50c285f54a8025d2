//! Interval-driven refresh, decoupled from callback identity.
//!
//! A view calls [`Poller::start`] every time it rebuilds, usually with a
//! freshly built closure. The closure goes into a shared cell that the timer
//! reads when it fires; the timer itself is only rearmed when the interval,
//! the enabled flag, or the presence of a callback changes.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

/// Refresh callback invoked on every tick.
pub type PollCallback = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Box an async closure into a [`PollCallback`].
pub fn poll_callback<F, Fut>(f: F) -> PollCallback
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move || f().boxed())
}

struct ArmedTimer {
    interval: Duration,
    handle: JoinHandle<()>,
}

/// Repeating timer owned by one consuming view.
///
/// Dropping the poller aborts the timer; no tick runs after that.
pub struct Poller {
    name: &'static str,
    callback: Arc<Mutex<Option<PollCallback>>>,
    armed: Option<ArmedTimer>,
    arm_count: u64,
}

impl Poller {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            callback: Arc::new(Mutex::new(None)),
            armed: None,
            arm_count: 0,
        }
    }

    /// Install `callback` and make sure the timer matches `interval`/`enabled`.
    ///
    /// `enabled = false`, a missing callback, or a zero interval leave no timer
    /// armed. Swapping only the callback never rearms.
    pub fn start(&mut self, callback: Option<PollCallback>, interval: Duration, enabled: bool) {
        let has_callback = callback.is_some();
        *self.callback.lock() = callback;

        let wanted = (enabled && has_callback && !interval.is_zero()).then_some(interval);
        let current = self.armed.as_ref().map(|armed| armed.interval);
        if wanted == current {
            trace!(poller = self.name, "Callback swapped, timer kept");
            return;
        }

        self.disarm();
        if let Some(interval) = wanted {
            self.arm(interval);
        }
    }

    /// Release the timer. The installed callback stays until the next `start`.
    pub fn stop(&mut self) {
        self.disarm();
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    /// Number of timers armed over this poller's lifetime.
    pub fn arm_count(&self) -> u64 {
        self.arm_count
    }

    fn arm(&mut self, interval: Duration) {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                warn!(poller = self.name, error = %e, "No async runtime, polling disabled");
                return;
            }
        };

        let cell = self.callback.clone();
        let name = self.name;
        let handle = runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            // A slow callback pushes the next tick back instead of bursting
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let current = cell.lock().clone();
                if let Some(callback) = current {
                    trace!(poller = name, "Tick");
                    callback().await;
                }
            }
        });

        self.arm_count += 1;
        debug!(poller = self.name, interval_ms = interval.as_millis() as u64, "Timer armed");
        self.armed = Some(ArmedTimer { interval, handle });
    }

    fn disarm(&mut self) {
        if let Some(armed) = self.armed.take() {
            armed.handle.abort();
            debug!(poller = self.name, "Timer released");
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.disarm();
    }
}
