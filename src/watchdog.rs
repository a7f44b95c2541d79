// I/O cancellation watchdog.
// Wraps one blocking open/read at a time with an inactivity bound: the
// guarded call touches its token on every partial progress, and a monitor
// thread aborts the call once the token sits idle past the bound. Each
// token owns its own last-activity timestamp, so engines never interfere
// with each other's timers.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::source::AbortHandle;

/// Default inactivity bound for opening a track.
pub const DEFAULT_OPEN_BOUND: Duration = Duration::from_secs(10);
/// Default inactivity bound for a single chunk read. Shorter than the open
/// bound: a stall on a live stream is more urgent than a slow open.
pub const DEFAULT_READ_BOUND: Duration = Duration::from_secs(5);
/// Default monitor poll interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    Active,
    TimedOut,
    Completed,
}

/// Per-guarded-call handle shared between the calling thread and the
/// watchdog monitor. Created per call, dropped when the call returns.
pub struct InterruptToken {
    state: Mutex<TokenState>,
    epoch: Instant,
    last_activity_ms: AtomicU64,
    abort: Mutex<Option<Arc<dyn AbortHandle>>>,
}

impl InterruptToken {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(TokenState::Active),
            epoch: Instant::now(),
            last_activity_ms: AtomicU64::new(0),
            abort: Mutex::new(None),
        })
    }

    /// Record forward progress, resetting the inactivity bound.
    pub fn touch(&self) {
        let elapsed = self.epoch.elapsed().as_millis() as u64;
        self.last_activity_ms.store(elapsed, Ordering::Relaxed);
    }

    /// Register the handle the monitor fires to unblock the guarded call.
    pub fn set_abort(&self, handle: Arc<dyn AbortHandle>) {
        *self.abort.lock().unwrap() = Some(handle);
    }

    pub fn state(&self) -> TokenState {
        *self.state.lock().unwrap()
    }

    /// Time since the last touch (or since creation).
    pub fn idle_for(&self) -> Duration {
        let elapsed = self.epoch.elapsed().as_millis() as u64;
        let last = self.last_activity_ms.load(Ordering::Relaxed);
        Duration::from_millis(elapsed.saturating_sub(last))
    }

    /// Mark the token timed out and fire the abort handle. No-op once the
    /// call already completed.
    pub fn cancel(&self) {
        {
            let mut state = self.state.lock().unwrap();
            if *state != TokenState::Active {
                return;
            }
            *state = TokenState::TimedOut;
        }
        let handle = self.abort.lock().unwrap().clone();
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    /// Mark the call finished. A token already timed out stays timed out:
    /// the call must report a timeout even if data arrived concurrently
    /// with cancellation.
    pub fn complete(&self) -> TokenState {
        let mut state = self.state.lock().unwrap();
        if *state == TokenState::Active {
            *state = TokenState::Completed;
        }
        *state
    }
}

struct Watched {
    token: Arc<InterruptToken>,
    bound: Duration,
}

/// Per-engine watchdog: one monitor thread observing at most one active
/// token at a time (only one guarded call is ever in flight per engine).
pub struct IoWatchdog {
    slot: Arc<Mutex<Option<Watched>>>,
    shutdown: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl IoWatchdog {
    pub fn new(poll_interval: Duration) -> Self {
        let slot: Arc<Mutex<Option<Watched>>> = Arc::new(Mutex::new(None));
        let shutdown = Arc::new(AtomicBool::new(false));

        let slot_clone = slot.clone();
        let shutdown_clone = shutdown.clone();
        let handle = thread::Builder::new()
            .name("io-watchdog".into())
            .spawn(move || monitor_loop(slot_clone, shutdown_clone, poll_interval))
            .expect("failed to spawn watchdog thread");

        Self {
            slot,
            shutdown,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Run `f` under the inactivity bound. If the monitor times the token
    /// out, the result of `f` is discarded and `IoTimeout` is reported.
    pub fn guard<T>(
        &self,
        bound: Duration,
        token: Arc<InterruptToken>,
        f: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        token.touch();
        *self.slot.lock().unwrap() = Some(Watched {
            token: token.clone(),
            bound,
        });

        let result = f();

        *self.slot.lock().unwrap() = None;
        match token.complete() {
            TokenState::TimedOut => Err(Error::IoTimeout),
            _ => result,
        }
    }

    /// Cancel whatever guarded call is currently in flight. Used by `stop`
    /// so the loop does not have to wait out the bound.
    pub fn cancel_active(&self) {
        let slot = self.slot.lock().unwrap();
        if let Some(watched) = slot.as_ref() {
            debug!("cancelling active guarded call");
            watched.token.cancel();
        }
    }
}

impl Drop for IoWatchdog {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

fn monitor_loop(
    slot: Arc<Mutex<Option<Watched>>>,
    shutdown: Arc<AtomicBool>,
    poll_interval: Duration,
) {
    while !shutdown.load(Ordering::SeqCst) {
        thread::sleep(poll_interval);

        let expired = {
            let slot = slot.lock().unwrap();
            match slot.as_ref() {
                Some(w) if w.token.state() == TokenState::Active && w.token.idle_for() >= w.bound => {
                    Some(w.token.clone())
                }
                _ => None,
            }
        };

        if let Some(token) = expired {
            warn!(
                idle_ms = token.idle_for().as_millis() as u64,
                "guarded i/o call exceeded inactivity bound, aborting"
            );
            token.cancel();
        }
    }
}
