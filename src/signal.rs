//! Concurrency primitives shared between the tick thread, worker threads
//! and timers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::NodeStatus;

/// Edge-triggered suspend/resume primitive.
///
/// The tree driver sleeps in [`WakeUpSignal::wait_for`] between `Running`
/// ticks; any asynchronous leaf that makes progress calls
/// [`WakeUpSignal::emit_signal`] so the driver re-ticks immediately instead
/// of waiting out its poll interval. The ready flag latches an emission
/// that happens while nobody is waiting, and is cleared when a wait
/// returns.
pub struct WakeUpSignal {
    ready: Mutex<bool>,
    cv: Condvar,
}

impl Default for WakeUpSignal {
    fn default() -> Self {
        Self {
            ready: Mutex::new(false),
            cv: Condvar::new(),
        }
    }
}

impl WakeUpSignal {
    pub fn new() -> Arc<WakeUpSignal> {
        Arc::new(Self::default())
    }

    /// Blocks until a signal arrives or `timeout` elapses. Returns true if
    /// the signal was received. A zero timeout just polls the latch.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        let mut ready = self.ready.lock();
        if !*ready && !timeout.is_zero() {
            self.cv.wait_for(&mut ready, timeout);
        }
        let received = *ready;
        *ready = false;
        received
    }

    pub fn emit_signal(&self) {
        *self.ready.lock() = true;
        self.cv.notify_all();
    }
}

type StatusChangeFn = Arc<dyn Fn(NodeStatus, NodeStatus) + Send + Sync>;

/// Listener list notified on every actual status transition of a node.
/// Logging and visualization tooling attaches here.
#[derive(Default)]
pub struct StatusChangeSignal {
    subscribers: Mutex<Vec<StatusChangeFn>>,
}

impl StatusChangeSignal {
    pub fn subscribe(&self, f: impl Fn(NodeStatus, NodeStatus) + Send + Sync + 'static) {
        self.subscribers.lock().push(Arc::new(f));
    }

    pub fn notify(&self, prev: NodeStatus, next: NodeStatus) {
        let subscribers = self.subscribers.lock().clone();
        for f in subscribers {
            f(prev, next);
        }
    }
}

/// A one-shot deadline that emits the wake-up signal when it fires.
///
/// Timer expiry never mutates tree state directly: the decision to halt a
/// child or report a status is always taken on the tick thread. The timer
/// only makes sure the driver wakes up in time to take it.
pub struct WakeTimer {
    cancelled: Arc<AtomicBool>,
}

impl WakeTimer {
    pub fn start(deadline: Instant, wake_up: Option<Arc<WakeUpSignal>>) -> WakeTimer {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();
        std::thread::spawn(move || {
            let now = Instant::now();
            if deadline > now {
                std::thread::sleep(deadline - now);
            }
            if !flag.load(Ordering::SeqCst) {
                if let Some(wake_up) = wake_up {
                    wake_up.emit_signal();
                }
            }
        });
        WakeTimer { cancelled }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

impl Drop for WakeTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
