//! Trailing-edge debounce with cancellation of the superseded request.
//!
//! Each user-facing action owns one [`Debouncer`]. A call to
//! [`Debouncer::schedule`] restarts the quiet window; when the window
//! elapses without another call the job runs with a fresh
//! [`CancellationToken`], and the token of the previous still-running job
//! is cancelled first. The action moves through
//! `Idle -> Debouncing -> InFlight -> Idle`.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionPhase {
    Idle,
    Debouncing,
    InFlight,
}

#[derive(Debug)]
struct Slot {
    /// Bumped on every schedule; a timer or job only acts while it holds
    /// the current generation.
    generation: u64,
    timer: Option<JoinHandle<()>>,
    in_flight: Option<CancellationToken>,
    phase: ActionPhase,
}

#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    slot: Arc<Mutex<Slot>>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            slot: Arc::new(Mutex::new(Slot {
                generation: 0,
                timer: None,
                in_flight: None,
                phase: ActionPhase::Idle,
            })),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn phase(&self) -> ActionPhase {
        lock(&self.slot).phase
    }

    /// Run `job` once the window passes with no further calls. A pending
    /// job that has not started yet is discarded.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule<F, Fut>(&self, job: F)
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut slot = lock(&self.slot);
        if let Some(timer) = slot.timer.take() {
            timer.abort();
        }
        slot.generation += 1;
        slot.phase = ActionPhase::Debouncing;

        let generation = slot.generation;
        let shared = Arc::clone(&self.slot);
        let window = self.window;

        slot.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(window).await;

            let token = {
                let mut slot = lock(&shared);
                if slot.generation != generation {
                    return;
                }
                slot.timer = None;
                if let Some(previous) = slot.in_flight.take() {
                    tracing::debug!("Cancelling superseded request");
                    previous.cancel();
                }
                let token = CancellationToken::new();
                slot.in_flight = Some(token.clone());
                slot.phase = ActionPhase::InFlight;
                token
            };

            job(token).await;

            let mut slot = lock(&shared);
            if slot.generation == generation {
                slot.in_flight = None;
                slot.phase = ActionPhase::Idle;
            }
        }));
    }

    /// Drop any pending job and cancel the running one.
    pub fn cancel(&self) {
        let mut slot = lock(&self.slot);
        slot.generation += 1;
        if let Some(timer) = slot.timer.take() {
            timer.abort();
        }
        if let Some(token) = slot.in_flight.take() {
            token.cancel();
        }
        slot.phase = ActionPhase::Idle;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    const WINDOW: Duration = Duration::from_millis(300);

    #[tokio::test(start_paused = true)]
    async fn burst_collapses_to_last_call() {
        let debouncer = Debouncer::new(WINDOW);
        let calls = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5 {
            let calls = Arc::clone(&calls);
            debouncer.schedule(move |_| async move {
                calls.lock().unwrap().push(i);
            });
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(debouncer.phase(), ActionPhase::Debouncing);
        assert!(calls.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(*calls.lock().unwrap(), vec![4]);
        assert_eq!(debouncer.phase(), ActionPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn new_dispatch_cancels_in_flight_job() {
        let debouncer = Debouncer::new(WINDOW);
        let cancelled = Arc::new(AtomicUsize::new(0));

        let flag = Arc::clone(&cancelled);
        debouncer.schedule(move |token| async move {
            tokio::select! {
                _ = token.cancelled() => { flag.fetch_add(1, Ordering::SeqCst); }
                _ = tokio::time::sleep(Duration::from_secs(60)) => {}
            }
        });
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(debouncer.phase(), ActionPhase::InFlight);

        debouncer.schedule(|_| async {});
        // Still debouncing: the running job is not cancelled yet.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(cancelled.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(cancelled.load(Ordering::SeqCst), 1);
        assert_eq!(debouncer.phase(), ActionPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_drops_pending_job() {
        let debouncer = Debouncer::new(WINDOW);
        let ran = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&ran);
        debouncer.schedule(move |_| async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        debouncer.cancel();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(debouncer.phase(), ActionPhase::Idle);
    }
}
