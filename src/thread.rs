// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Worker threads and their message event loop.
//!
//! Each [`Thread`] owns a FIFO message queue protected by a single mutex,
//! held only to enqueue or dequeue and never while a message is being
//! handled. The event loop dequeues one message at a time and delivers it
//! to its receiver object, so handlers of the objects bound to a thread
//! never run concurrently.
//!
//! When a started worker terminates, the messages still queued are
//! discarded without delivery. This includes messages posted by the last
//! handler that ran before the stop request was observed.

use crate::{
    error::{Error, Result},
    message::{Message, MessageType},
    object::{Object, ObjectId},
    sync::{lock, SyncPoint},
};
use std::{
    cell::RefCell,
    collections::VecDeque,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Condvar, Mutex, PoisonError,
    },
    thread::{self as os, JoinHandle},
    time::{Duration, Instant},
};
use tracing::{debug, error, trace, warn};

thread_local! {
    static CURRENT: RefCell<Option<Thread>> = const { RefCell::new(None) };
}

struct Queue {
    messages: VecDeque<Message>,
    exit: bool,
}

struct ThreadData {
    name: String,
    adopted: bool,
    running: AtomicBool,
    queue: Mutex<Queue>,
    cond: Condvar,
    handle: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to a worker thread with its own message queue and event loop.
///
/// Handles are cheap to clone and compare equal when they refer to the same
/// worker. A worker goes through `idle -> started -> stop requested ->
/// joined` and may be started again once joined.
#[derive(Clone)]
pub struct Thread {
    data: Arc<ThreadData>,
}

/// Resets the worker state when its OS thread leaves the run routine,
/// including by unwinding.
struct Teardown(Thread);

impl Drop for Teardown {
    fn drop(&mut self) {
        let thread = &self.0;
        let discarded = thread.discard_messages();
        if discarded > 0 {
            debug!(thread = %thread.name(), discarded, "discarded queued messages");
        }
        thread.data.running.store(false, Ordering::Release);
        let _ = CURRENT.try_with(|current| current.borrow_mut().take());
        debug!(thread = %thread.name(), "worker terminated");
    }
}

impl Thread {
    /// Creates an idle worker. Nothing runs until [`Thread::start`].
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_data(name.into(), false)
    }

    fn with_data(name: String, adopted: bool) -> Self {
        Self {
            data: Arc::new(ThreadData {
                name,
                adopted,
                running: AtomicBool::new(adopted),
                queue: Mutex::new(Queue {
                    messages: VecDeque::new(),
                    exit: false,
                }),
                cond: Condvar::new(),
                handle: Mutex::new(None),
            }),
        }
    }

    /// Attaches a worker handle to the calling OS thread, typically the
    /// application's main thread, and returns it.
    ///
    /// Objects can then be bound to the calling thread. Its queue is
    /// processed by [`Thread::exec`], [`Thread::process_events`] or
    /// [`Thread::dispatch_messages`] called from the same OS thread. If a
    /// handle is already attached, that handle is returned instead.
    pub fn adopt(name: impl Into<String>) -> Self {
        CURRENT.with(|current| {
            current
                .borrow_mut()
                .get_or_insert_with(|| {
                    let thread = Self::with_data(name.into(), true);
                    debug!(thread = %thread.name(), "adopted calling thread");
                    thread
                })
                .clone()
        })
    }

    /// The worker driving the calling OS thread, if any.
    pub fn current() -> Option<Self> {
        CURRENT
            .try_with(|current| current.borrow().clone())
            .ok()
            .flatten()
    }

    /// Whether the calling OS thread is driven by this worker.
    pub fn is_current(&self) -> bool {
        CURRENT
            .try_with(|current| current.borrow().as_ref() == Some(self))
            .unwrap_or(false)
    }

    pub fn name(&self) -> &str {
        &self.data.name
    }

    /// Whether the worker's OS thread is alive. Adopted threads are always
    /// running.
    pub fn is_running(&self) -> bool {
        self.data.running.load(Ordering::Acquire)
    }

    /// Number of messages waiting in the queue.
    pub fn queued_messages(&self) -> usize {
        lock(&self.data.queue).messages.len()
    }

    /// Starts the worker running its event loop.
    ///
    /// Returns once the new OS thread is up and attached to this worker,
    /// right before it enters [`Thread::exec`]. Messages posted from then on
    /// are delivered in order by the loop; nothing posted after `start`
    /// returns can be missed.
    ///
    /// # Errors
    ///
    /// [`Error::ResourceExhausted`] if the OS thread can't be created,
    /// [`Error::PreconditionViolation`] if the worker is adopted or already
    /// started and not yet joined.
    pub fn start(&self) -> Result<()> {
        self.start_with(|thread| {
            if let Err(err) = thread.exec() {
                error!(thread = %thread.name(), %err, "event loop failed");
            }
        })
    }

    /// Starts the worker running `run` instead of the bare event loop.
    ///
    /// `run` executes on the new OS thread, where [`Thread::current`]
    /// already returns this worker. It usually ends by calling
    /// [`Thread::exec`]. Queued messages are discarded once `run` returns.
    pub fn start_with<F>(&self, run: F) -> Result<()>
    where
        F: FnOnce(&Thread) + Send + 'static,
    {
        if self.data.adopted {
            return Err(self.precondition("adopted threads can't be started"));
        }

        let mut handle = lock(&self.data.handle);
        if handle.is_some() {
            return Err(self.precondition("thread already started"));
        }

        lock(&self.data.queue).exit = false;

        let started = Arc::new(SyncPoint::new());
        let spawned = {
            let started = started.clone();
            let thread = self.clone();
            os::Builder::new()
                .name(self.data.name.clone())
                .spawn(move || {
                    CURRENT.with(|current| *current.borrow_mut() = Some(thread.clone()));
                    thread.data.running.store(true, Ordering::Release);
                    let teardown = Teardown(thread);
                    started.notify(());
                    debug!(thread = %teardown.0.name(), "worker started");
                    run(&teardown.0);
                })
        };

        let spawned = spawned.map_err(|err| {
            error!(thread = %self.name(), %err, "failed to spawn worker");
            Error::ResourceExhausted(err)
        })?;

        started.wait();
        *handle = Some(spawned);
        Ok(())
    }

    /// Starts the worker and blocks until its one-shot initialization
    /// routine has run.
    ///
    /// The worker runs `init` first. On success it goes on to run its event
    /// loop and this call returns `Ok`. On failure the worker is stopped and
    /// joined before this call returns, so no thread is left behind.
    ///
    /// # Errors
    ///
    /// [`Error::InitializationFailed`] carrying the code returned by
    /// `init`, or any error of [`Thread::start`]. A panic in `init` is
    /// reported as a failure with `-EIO`.
    pub fn run_init_and_wait<I>(&self, init: I) -> Result<()>
    where
        I: FnOnce() -> std::result::Result<(), i32> + Send + 'static,
    {
        self.run_init_and_wait_with_cleanup(init, |_| {})
    }

    /// Same as [`Thread::run_init_and_wait`], additionally running
    /// `cleanup` on the worker after its event loop exits. `cleanup` does
    /// not run when initialization fails.
    pub fn run_init_and_wait_with_cleanup<I, C>(&self, init: I, cleanup: C) -> Result<()>
    where
        I: FnOnce() -> std::result::Result<(), i32> + Send + 'static,
        C: FnOnce(&Thread) + Send + 'static,
    {
        let sync = Arc::new(SyncPoint::new());
        let ready = sync.clone();

        self.start_with(move |thread| {
            let status = panic::catch_unwind(AssertUnwindSafe(init)).unwrap_or_else(|_| {
                error!(thread = %thread.name(), "initialization routine panicked");
                Err(-libc::EIO)
            });
            let failed = status.is_err();
            ready.notify(status);
            if failed {
                return;
            }

            if let Err(err) = thread.exec() {
                error!(thread = %thread.name(), %err, "event loop failed");
            }
            cleanup(thread);
        })?;

        if let Err(code) = sync.wait() {
            warn!(thread = %self.name(), code, "worker initialization failed");
            self.stop();
            self.join()?;
            return Err(Error::InitializationFailed { code });
        }

        Ok(())
    }

    /// Runs the event loop until [`Thread::stop`] is called.
    ///
    /// Messages are dispatched in FIFO order, one at a time. A stop request
    /// takes effect between two dispatches.
    ///
    /// # Errors
    ///
    /// [`Error::PreconditionViolation`] unless called from the worker's own
    /// OS thread.
    pub fn exec(&self) -> Result<()> {
        if !self.is_current() {
            return Err(self.precondition("event loop run outside of its thread"));
        }

        trace!(thread = %self.name(), "event loop running");
        loop {
            let msg = {
                let mut queue = lock(&self.data.queue);
                loop {
                    if queue.exit {
                        break None;
                    }
                    if let Some(msg) = queue.messages.pop_front() {
                        break Some(msg);
                    }
                    queue = self
                        .data
                        .cond
                        .wait(queue)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            };

            match msg {
                Some(msg) => Self::dispatch(msg),
                None => break,
            }
        }

        lock(&self.data.queue).exit = false;
        trace!(thread = %self.name(), "event loop exited");
        Ok(())
    }

    /// Requests the event loop to exit. The message being dispatched, if
    /// any, completes first.
    pub fn stop(&self) {
        let mut queue = lock(&self.data.queue);
        queue.exit = true;
        self.data.cond.notify_all();
        debug!(thread = %self.name(), queued = queue.messages.len(), "stop requested");
    }

    /// Blocks until the worker's OS thread has terminated.
    ///
    /// Joining a worker that was never started, or was already joined,
    /// returns immediately. Joining a started worker without stopping it
    /// first blocks until someone else stops it.
    ///
    /// # Errors
    ///
    /// [`Error::PreconditionViolation`] when called from the worker itself
    /// or on an adopted thread, [`Error::WorkerPanicked`] if the worker
    /// unwound.
    pub fn join(&self) -> Result<()> {
        if self.is_current() {
            return Err(self.precondition("thread joined from itself"));
        }
        if self.data.adopted {
            return Err(self.precondition("adopted threads can't be joined"));
        }

        let handle = lock(&self.data.handle).take();
        match handle {
            Some(handle) => handle.join().map_err(|payload| {
                let reason = payload
                    .downcast_ref::<&str>()
                    .map(|reason| reason.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_owned());
                error!(thread = %self.name(), %reason, "worker panicked");
                Error::WorkerPanicked(reason)
            }),
            None => Ok(()),
        }
    }

    /// Dispatches the queued messages of `kind`, or all queued messages
    /// when `kind` is `None`, without blocking. Messages posted while
    /// dispatching are processed too. Returns the number of messages
    /// dispatched.
    ///
    /// # Errors
    ///
    /// [`Error::PreconditionViolation`] unless called from the worker's own
    /// OS thread.
    pub fn dispatch_messages(&self, kind: Option<MessageType>) -> Result<usize> {
        if !self.is_current() {
            return Err(self.precondition("messages dispatched outside of their thread"));
        }

        let mut count = 0;
        loop {
            let msg = {
                let mut queue = lock(&self.data.queue);
                let index = match kind {
                    Some(kind) => queue.messages.iter().position(|msg| msg.kind() == kind),
                    None if queue.messages.is_empty() => None,
                    None => Some(0),
                };
                index.and_then(|index| queue.messages.remove(index))
            };

            match msg {
                Some(msg) => {
                    Self::dispatch(msg);
                    count += 1;
                }
                None => return Ok(count),
            }
        }
    }

    /// Waits up to `timeout` for messages to arrive, then dispatches
    /// everything queued. Returns the number of messages dispatched.
    ///
    /// A [`Thread::stop`] request ends the wait early. On an adopted thread
    /// the request is consumed, so later calls wait normally again.
    ///
    /// Meant for threads that don't sit in [`Thread::exec`], such as an
    /// adopted main thread polling its queue.
    ///
    /// # Errors
    ///
    /// [`Error::PreconditionViolation`] unless called from the worker's own
    /// OS thread.
    pub fn process_events(&self, timeout: Duration) -> Result<usize> {
        if !self.is_current() {
            return Err(self.precondition("events processed outside of their thread"));
        }

        let deadline = Instant::now() + timeout;
        {
            let mut queue = lock(&self.data.queue);
            while queue.messages.is_empty() {
                if queue.exit {
                    // A worker's exec() still needs the request.
                    if self.data.adopted {
                        queue.exit = false;
                    }
                    break;
                }
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                queue = self
                    .data
                    .cond
                    .wait_timeout(queue, deadline - now)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0;
            }
        }

        self.dispatch_messages(None)
    }

    /// Discards every message queued for `object` without delivering it.
    /// Returns the number of messages removed.
    pub fn remove_messages(&self, object: &Object) -> usize {
        self.remove_messages_for(object.id())
    }

    pub(crate) fn enqueue(&self, msg: Message) {
        let mut queue = lock(&self.data.queue);
        queue.messages.push_back(msg);
        self.data.cond.notify_one();
    }

    pub(crate) fn remove_messages_for(&self, id: ObjectId) -> usize {
        let removed = self.take_messages(id);
        for msg in &removed {
            if let Some(receiver) = msg.receiver_shared() {
                receiver.message_dequeued();
            }
        }
        removed.len()
    }

    /// Extracts the messages queued for `id`, in order.
    pub(crate) fn take_messages(&self, id: ObjectId) -> Vec<Message> {
        let mut queue = lock(&self.data.queue);
        let (taken, kept): (Vec<Message>, Vec<Message>) = queue
            .messages
            .drain(..)
            .partition(|msg| msg.receiver() == Some(id));
        queue.messages = kept.into();
        taken
    }

    pub(crate) fn append_messages(&self, messages: Vec<Message>) {
        if messages.is_empty() {
            return;
        }
        let mut queue = lock(&self.data.queue);
        queue.messages.extend(messages);
        self.data.cond.notify_one();
    }

    fn discard_messages(&self) -> usize {
        let discarded: Vec<Message> = lock(&self.data.queue).messages.drain(..).collect();
        for msg in &discarded {
            if let Some(receiver) = msg.receiver_shared() {
                receiver.message_dequeued();
            }
        }
        discarded.len()
    }

    fn dispatch(msg: Message) {
        let Some(receiver) = msg.receiver_shared().cloned() else {
            return;
        };
        receiver.message_dequeued();
        receiver.deliver(msg);
    }

    fn precondition(&self, what: &str) -> Error {
        error!(thread = %self.name(), "{what}");
        Error::PreconditionViolation(format!("{what} ('{}')", self.name()))
    }
}

impl PartialEq for Thread {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

impl Eq for Thread {}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("name", &self.name())
            .field("adopted", &self.data.adopted)
            .field("running", &self.is_running())
            .finish()
    }
}
