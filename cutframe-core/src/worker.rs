//! Cancellable named worker threads with a bounded stop.
//!
//! The closure polls a [`CancelToken`] every iteration. Stopping sets the
//! token and waits for the closure to return, up to a timeout; a worker still
//! running after that is detached rather than blocking the caller.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Shared stop flag handed to the worker closure.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sleep up to `duration`, returning early (true) once cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep((deadline - now).min(Duration::from_millis(5)));
        }
    }
}

struct Slot<T> {
    state: Mutex<SlotState<T>>,
    finished: Condvar,
}

struct SlotState<T> {
    done: bool,
    value: Option<T>,
}

/// Marks the slot done even if the closure panics.
struct FinishGuard<T>(Arc<Slot<T>>);

impl<T> Drop for FinishGuard<T> {
    fn drop(&mut self) {
        self.0.state.lock().done = true;
        self.0.finished.notify_all();
    }
}

pub struct Worker<T> {
    name: String,
    cancel: CancelToken,
    slot: Arc<Slot<T>>,
    handle: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> Worker<T> {
    pub fn spawn<F>(name: impl Into<String>, f: F) -> std::io::Result<Self>
    where
        F: FnOnce(&CancelToken) -> T + Send + 'static,
    {
        let name = name.into();
        let cancel = CancelToken::new();
        let slot = Arc::new(Slot {
            state: Mutex::new(SlotState {
                done: false,
                value: None,
            }),
            finished: Condvar::new(),
        });

        let handle = {
            let cancel = cancel.clone();
            let slot = Arc::clone(&slot);
            thread::Builder::new().name(name.clone()).spawn(move || {
                let guard = FinishGuard(slot);
                let value = f(&cancel);
                guard.0.state.lock().value = Some(value);
            })?
        };

        debug!("Worker {} started", name);
        Ok(Self {
            name,
            cancel,
            slot,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.slot.state.lock().done
    }

    /// Ask the worker to exit without waiting.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Cancel, then wait up to `timeout` for the worker's result.
    ///
    /// `None` when the worker panicked or missed the deadline; in the latter
    /// case the thread is detached and keeps whatever it owns.
    pub fn stop(mut self, timeout: Duration) -> Option<T> {
        self.cancel.cancel();
        self.wait(timeout)
    }

    fn wait(&mut self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let value = {
            let mut state = self.slot.state.lock();
            while !state.done {
                if self.slot.finished.wait_until(&mut state, deadline).timed_out() {
                    break;
                }
            }
            if !state.done {
                warn!(
                    "Worker {} did not exit within {:?}, detaching",
                    self.name, timeout
                );
                self.handle.take();
                return None;
            }
            state.value.take()
        };

        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Worker {} panicked", self.name);
            }
        }
        debug!("Worker {} stopped", self.name);
        value
    }
}

impl<T> Drop for Worker<T> {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.cancel.cancel();
        }
    }
}
