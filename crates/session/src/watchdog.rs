//! Outstanding-request tracking behind the loading flag.
//!
//! WebSocket searches have no acknowledgement. Arming the watchdog for an
//! endpoint records that a push is expected there; the inbound router
//! resolves that endpoint when its push arrives. HTTP searches hold an
//! [`InFlight`] guard for as long as they run. The loading flag is set
//! while anything is outstanding and cleared when the last of it is
//! answered, cancelled or timed out.
//!
//! If an endpoint sees no push within the configured timeout it stops
//! counting as outstanding and the user is told.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use framesync_channels::Endpoint;
use framesync_events::NoticeLevel;
use tokio::task::JoinHandle;

use crate::view::SharedView;

pub struct ResponseWatchdog {
    view: Arc<SharedView>,
    timeout: Option<Duration>,
    state: Mutex<Outstanding>,
}

#[derive(Default)]
struct Outstanding {
    /// Bumped on every arm; a timer only fires for its own arm.
    generation: u64,
    endpoints: HashMap<Endpoint, Pending>,
    http: usize,
}

impl Outstanding {
    fn any(&self) -> bool {
        self.http > 0 || !self.endpoints.is_empty()
    }
}

struct Pending {
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

impl Pending {
    fn disarm(self) {
        if let Some(timer) = self.timer {
            timer.abort();
        }
    }
}

impl ResponseWatchdog {
    /// `timeout` of `None` keeps an endpoint outstanding until its push
    /// arrives.
    pub fn new(view: Arc<SharedView>, timeout: Option<Duration>) -> Arc<Self> {
        Arc::new(Self {
            view,
            timeout,
            state: Mutex::new(Outstanding::default()),
        })
    }

    /// A request went out on `endpoint`; expect a push there. Re-arming an
    /// endpoint restarts only that endpoint's timer.
    pub fn arm(self: &Arc<Self>, endpoint: Endpoint) {
        let mut state = self.state();
        state.generation += 1;
        let generation = state.generation;

        let timer = self.timeout.map(|timeout| {
            let watchdog = Arc::clone(self);
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                watchdog.expire(endpoint, generation, timeout);
            })
        });
        if let Some(previous) = state.endpoints.insert(endpoint, Pending { generation, timer }) {
            previous.disarm();
        }
        // View lock is always taken after ours, never the other way round.
        self.view.set_loading(true);
    }

    /// A push arrived on `endpoint`. Loading clears only if nothing else
    /// is outstanding.
    pub fn resolve(&self, endpoint: Endpoint) {
        let mut state = self.state();
        if let Some(pending) = state.endpoints.remove(&endpoint) {
            pending.disarm();
        }
        self.view.set_loading(state.any());
    }

    /// Track one HTTP request until the returned guard is dropped.
    pub fn http_request(self: &Arc<Self>) -> InFlight {
        let mut state = self.state();
        state.http += 1;
        self.view.set_loading(true);
        InFlight {
            watchdog: Arc::clone(self),
        }
    }

    pub fn is_pending(&self, endpoint: Endpoint) -> bool {
        self.state().endpoints.contains_key(&endpoint)
    }

    fn expire(&self, endpoint: Endpoint, generation: u64, timeout: Duration) {
        {
            let mut state = self.state();
            match state.endpoints.get(&endpoint) {
                Some(pending) if pending.generation == generation => {}
                _ => return,
            }
            state.endpoints.remove(&endpoint);
            self.view.set_loading(state.any());
        }
        tracing::warn!(%endpoint, timeout_secs = timeout.as_secs(), "No response before timeout");
        self.view.notify(
            NoticeLevel::Warning,
            format!("No response from {endpoint} after {}s", timeout.as_secs()),
        );
    }

    fn state(&self) -> MutexGuard<'_, Outstanding> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Keeps the loading flag set while an HTTP request runs. Dropping it,
/// on completion or cancellation, releases the request.
#[must_use = "the request stops counting as outstanding when the guard is dropped"]
pub struct InFlight {
    watchdog: Arc<ResponseWatchdog>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let mut state = self.watchdog.state();
        state.http = state.http.saturating_sub(1);
        self.watchdog.view.set_loading(state.any());
    }
}
