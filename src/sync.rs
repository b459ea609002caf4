// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Spawn-and-wait handshake between a thread and the worker it starts.

use std::{
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

/// Locks `mutex`, ignoring poisoning.
///
/// Runtime locks are never held while user code runs, so a poisoned lock
/// can only come from a panic inside the runtime's own short critical
/// sections, which leave the protected data consistent.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct State<T> {
    ready: bool,
    result: Option<T>,
}

/// A one-shot milestone published by one thread and awaited by another.
///
/// The result and the `ready` flag live under a single mutex and are paired
/// with a condition variable. The publisher sets both and notifies while
/// holding the lock, and the waiter checks the flag under the same lock
/// before sleeping, so a notification issued before the waiter arrives is
/// never lost.
///
/// # Example
///
/// ```
/// use edgefirst_camera_base::sync::SyncPoint;
/// use std::{sync::Arc, thread};
///
/// let sync = Arc::new(SyncPoint::new());
/// let worker = {
///     let sync = sync.clone();
///     thread::spawn(move || sync.notify(-5))
/// };
/// assert_eq!(sync.wait(), -5);
/// worker.join().unwrap();
/// ```
pub struct SyncPoint<T> {
    state: Mutex<State<T>>,
    cond: Condvar,
}

impl<T> SyncPoint<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                ready: false,
                result: None,
            }),
            cond: Condvar::new(),
        }
    }

    /// Publishes `result` and wakes the waiter.
    ///
    /// Only the first notification is recorded.
    pub fn notify(&self, result: T) {
        let mut state = lock(&self.state);
        if state.ready {
            return;
        }
        state.result = Some(result);
        state.ready = true;
        self.cond.notify_all();
    }

    /// Blocks until a result has been published and takes it.
    ///
    /// The result can be taken once; a second wait blocks forever.
    pub fn wait(&self) -> T {
        let mut state = lock(&self.state);
        loop {
            if let Some(result) = state.result.take() {
                return result;
            }
            state = self
                .cond
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like [`SyncPoint::wait`] but gives up after `timeout`, returning
    /// `None` if nothing was published in time.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<T> {
        let (mut state, _) = self
            .cond
            .wait_timeout_while(lock(&self.state), timeout, |state| state.result.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        state.result.take()
    }

    /// Whether a result has been published, regardless of whether it was
    /// already taken.
    pub fn is_ready(&self) -> bool {
        lock(&self.state).ready
    }
}

impl<T> Default for SyncPoint<T> {
    fn default() -> Self {
        Self::new()
    }
}
