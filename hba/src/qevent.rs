// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Queued events: auto-reset "set-or-not" events with cancellable waits.
//!
//! Setting an already-set event is a no-op; a successful wait consumes the
//! signal. A [`CancelToken`] wakes any wait it was passed to, so blocked
//! transact callers can be released when their handle goes away.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

/// Outcome of a cancellable wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    Success,
    Timeout,
    Cancelled,
}

struct QeventShared {
    state: Mutex<bool>,
    cond: Condvar,
}

pub struct Qevent {
    shared: Arc<QeventShared>,
}

impl Default for Qevent {
    fn default() -> Self {
        Self::new()
    }
}

impl Qevent {
    pub fn new() -> Self {
        Qevent {
            shared: Arc::new(QeventShared {
                state: Mutex::new(false),
                cond: Condvar::new(),
            }),
        }
    }

    /// Signals the event; idempotent while the event is set.
    pub fn set(&self) {
        let mut set = self.shared.state.lock().unwrap();
        if !*set {
            *set = true;
            self.shared.cond.notify_one();
        }
    }

    /// Waits for the event to become set and consumes the signal.
    ///
    /// Returns `Cancelled` as soon as `cancel` fires, `Timeout` when
    /// `timeout` elapses first. `None` means wait forever.
    pub fn wait(&self, timeout: Option<Duration>, cancel: Option<&CancelToken>) -> WaitStatus {
        let deadline = timeout.map(|t| Instant::now() + t);
        let _registration = cancel.map(|c| c.register(&self.shared));

        let mut set = self.shared.state.lock().unwrap();
        loop {
            if let Some(cancel) = cancel {
                if cancel.cancelled() {
                    return WaitStatus::Cancelled;
                }
            }
            if *set {
                *set = false;
                return WaitStatus::Success;
            }
            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return WaitStatus::Timeout;
                    }
                    let (guard, _) = self
                        .shared
                        .cond
                        .wait_timeout(set, deadline - now)
                        .unwrap();
                    set = guard;
                }
                None => set = self.shared.cond.wait(set).unwrap(),
            }
        }
    }
}

struct CancelInner {
    cancelled: AtomicBool,
    waiters: Mutex<Vec<Arc<QeventShared>>>,
}

/// Cancellation source for [`Qevent::wait`].
///
/// Clones observe the same cancellation state.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        CancelToken {
            inner: Arc::new(CancelInner {
                cancelled: AtomicBool::new(false),
                waiters: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Cancels the token and wakes every wait it is registered with.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        let waiters = self.inner.waiters.lock().unwrap();
        for shared in waiters.iter() {
            // Take the state lock so a waiter between its cancelled check
            // and its condvar wait cannot miss the wakeup.
            let _set = shared.state.lock().unwrap();
            shared.cond.notify_all();
        }
    }

    fn register(&self, shared: &Arc<QeventShared>) -> CancelRegistration {
        self.inner.waiters.lock().unwrap().push(Arc::clone(shared));
        CancelRegistration {
            token: Arc::clone(&self.inner),
            shared: Arc::clone(shared),
        }
    }
}

struct CancelRegistration {
    token: Arc<CancelInner>,
    shared: Arc<QeventShared>,
}

impl Drop for CancelRegistration {
    fn drop(&mut self) {
        let mut waiters = self.token.waiters.lock().unwrap();
        if let Some(pos) = waiters.iter().position(|w| Arc::ptr_eq(w, &self.shared)) {
            waiters.swap_remove(pos);
        }
    }
}
