// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Thread-bound objects.
//!
//! An [`Object`] is bound to the [`Thread`] it was created in. Messages
//! posted to it and slots connected to signals on its behalf always run in
//! that thread, one at a time. Dropping an object disconnects it from every
//! signal and purges the messages still queued for it, so no slot or
//! handler ever runs for a destroyed object.

use crate::{
    error::{Error, Result},
    message::{Message, MessageType},
    signal::{SignalBase, SignalId},
    sync::{lock, SyncPoint},
    thread::Thread,
};
use std::{
    any::Any,
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex, OnceLock, Weak,
    },
};
use tracing::{debug, error, warn};

/// Stable identifier of an [`Object`], unique for the process lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "object#{}", self.0)
    }
}

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// Message handler of an object.
///
/// Called in the context of the object's thread for every message posted to
/// the object. Implementations handle the kinds they know about and shall
/// pass every other message to [`Message::handle_default`], which runs
/// invocation and deferred deletion messages.
///
/// # Example
///
/// ```
/// use edgefirst_camera_base::{Message, MessageType, Object, Receiver, Thread};
/// use std::sync::{atomic::{AtomicU32, Ordering}, Arc};
///
/// struct Counter {
///     object: Object,
///     ticks: AtomicU32,
/// }
///
/// impl Receiver for Counter {
///     fn message(&self, msg: Message) {
///         match msg.kind() {
///             MessageType::User(_) => {
///                 self.ticks.fetch_add(1, Ordering::Relaxed);
///             }
///             _ => msg.handle_default(),
///         }
///     }
/// }
///
/// let thread = Thread::adopt("main");
/// let counter = Arc::new_cyclic(|weak| Counter {
///     object: Object::new_in(&thread).with_receiver(weak.clone()),
///     ticks: AtomicU32::new(0),
/// });
/// counter.object.post_message(Message::new(MessageType::register()));
/// thread.dispatch_messages(None).unwrap();
/// assert_eq!(counter.ticks.load(Ordering::Relaxed), 1);
/// ```
pub trait Receiver: Send + Sync {
    fn message(&self, msg: Message) {
        msg.handle_default();
    }
}

pub(crate) struct ObjectShared {
    id: ObjectId,
    thread: Mutex<Thread>,
    receiver: OnceLock<Weak<dyn Receiver>>,
    pending: AtomicUsize,
    alive: AtomicBool,
    signals: Mutex<Vec<(SignalId, Weak<dyn SignalBase>)>>,
}

impl ObjectShared {
    pub(crate) fn id(&self) -> ObjectId {
        self.id
    }

    pub(crate) fn thread(&self) -> Thread {
        lock(&self.thread).clone()
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Queues `msg` on the object's current thread.
    ///
    /// The thread lock is held across the enqueue so that a concurrent
    /// thread move can't strand the message on the old queue.
    pub(crate) fn post(self: &Arc<Self>, mut msg: Message) {
        msg.set_receiver(self.clone());
        let thread = lock(&self.thread);
        self.pending.fetch_add(1, Ordering::AcqRel);
        thread.enqueue(msg);
    }

    /// Runs `func` in the object's thread and waits for its result.
    ///
    /// Called directly when the caller already runs in that thread. Returns
    /// `None` if the invocation was discarded before running.
    pub(crate) fn invoke_blocking<F, R>(self: &Arc<Self>, func: F) -> Option<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.thread().is_current() {
            return self.is_alive().then(func);
        }

        let sync = Arc::new(SyncPoint::new());
        let reply = Reply(sync.clone());
        self.post(Message::invoke(move || {
            let reply = reply;
            reply.0.notify(Some(func()));
        }));
        sync.wait()
    }

    pub(crate) fn message_dequeued(&self) {
        self.pending.fetch_sub(1, Ordering::AcqRel);
    }

    /// Hands `msg` to the object's handler, or drops it when the object is
    /// already being destroyed.
    pub(crate) fn deliver(&self, msg: Message) {
        if !self.is_alive() {
            return;
        }

        match self.receiver.get() {
            Some(receiver) => {
                if let Some(receiver) = receiver.upgrade() {
                    receiver.message(msg);
                }
            }
            None => msg.handle_default(),
        }
    }

    pub(crate) fn remember_signal(&self, id: SignalId, signal: Weak<dyn SignalBase>) {
        let mut signals = lock(&self.signals);
        if !signals.iter().any(|(known, _)| *known == id) {
            signals.push((id, signal));
        }
    }

    pub(crate) fn forget_signal(&self, id: SignalId) {
        lock(&self.signals).retain(|(known, _)| *known != id);
    }
}

/// Answers a blocking invocation with `None` when it is dropped unrun.
struct Reply<R>(Arc<SyncPoint<Option<R>>>);

impl<R> Drop for Reply<R> {
    fn drop(&mut self) {
        self.0.notify(None);
    }
}

/// Base object with thread affinity and automatic signal disconnection.
///
/// Types that receive messages or slot invocations compose an `Object` and,
/// when they need custom message handling, register themselves as its
/// [`Receiver`] with [`Object::with_receiver`].
pub struct Object {
    shared: Arc<ObjectShared>,
}

impl Object {
    /// Creates an object bound to the calling thread.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PreconditionViolation`] if the calling OS thread is
    /// neither a started [`Thread`] nor one attached with [`Thread::adopt`].
    pub fn new() -> Result<Self> {
        match Thread::current() {
            Some(thread) => Ok(Self::new_in(&thread)),
            None => {
                error!("object created outside of any thread context");
                Err(Error::PreconditionViolation(
                    "object created outside of any thread context".to_owned(),
                ))
            }
        }
    }

    /// Creates an object bound to `thread`.
    pub fn new_in(thread: &Thread) -> Self {
        let id = ObjectId(NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed));
        Self {
            shared: Arc::new(ObjectShared {
                id,
                thread: Mutex::new(thread.clone()),
                receiver: OnceLock::new(),
                pending: AtomicUsize::new(0),
                alive: AtomicBool::new(true),
                signals: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Routes messages posted to the object to `receiver`.
    ///
    /// Meant to be used while constructing the receiver, typically from
    /// [`Arc::new_cyclic`]. The first registered receiver wins.
    pub fn with_receiver<R: Receiver + 'static>(self, receiver: Weak<R>) -> Self {
        let receiver: Weak<dyn Receiver> = receiver;
        if self.shared.receiver.set(receiver).is_err() {
            warn!(object = %self.id(), "message receiver already registered");
        }
        self
    }

    pub fn id(&self) -> ObjectId {
        self.shared.id
    }

    /// The thread the object is currently bound to.
    pub fn thread(&self) -> Thread {
        self.shared.thread()
    }

    /// Number of messages queued for the object and not yet delivered.
    pub fn pending_messages(&self) -> usize {
        self.shared.pending.load(Ordering::Acquire)
    }

    /// Posts `msg` to the object's thread.
    ///
    /// The message is delivered to the object's [`Receiver`] from the
    /// thread's event loop, never synchronously, even when called from the
    /// object's own thread. Messages are not delivered until the thread
    /// runs its event loop. Callable from any thread.
    pub fn post_message(&self, msg: Message) {
        self.shared.post(msg);
    }

    /// Invokes `func` asynchronously in the object's thread.
    ///
    /// Arguments are moved into the closure, so nothing borrowed from the
    /// caller crosses the thread boundary. The call is always queued, even
    /// when the caller already runs in the object's thread.
    pub fn invoke_method<F>(&self, func: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.post_message(Message::invoke(func));
    }

    /// Invokes `func` in the object's thread and blocks until it returns.
    ///
    /// When the caller already runs in the object's thread, `func` is
    /// called directly. Otherwise it is queued like
    /// [`Object::invoke_method`] and the caller waits for the event loop to
    /// run it, so the object's thread must be processing events.
    ///
    /// Returns `None` if the invocation was discarded without running,
    /// because the object was destroyed, its queued messages were removed or
    /// its thread stopped.
    pub fn invoke_method_blocking<F, R>(&self, func: F) -> Option<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.shared.invoke_blocking(func)
    }

    /// Drops `value` from the object's thread event loop.
    ///
    /// Used for resources that must only be released in the thread they
    /// belong to.
    pub fn delete_later<T: Any + Send>(&self, value: T) {
        self.post_message(Message::deferred_delete(value));
    }

    /// Moves the object, and the messages already queued for it, to
    /// `thread`.
    ///
    /// Before the move the object's receiver gets a
    /// [`MessageType::ThreadMove`] message, synchronously, so it can release
    /// state tied to the current thread.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PreconditionViolation`] unless called from the
    /// thread the object currently lives in.
    pub fn move_to_thread(&self, thread: &Thread) -> Result<()> {
        let current = self.thread();
        if !current.is_current() {
            error!(object = %self.id(), thread = %current.name(),
                "object can only be moved from its own thread");
            return Err(Error::PreconditionViolation(format!(
                "{} moved from outside of its thread '{}'",
                self.id(),
                current.name()
            )));
        }

        if current == *thread {
            return Ok(());
        }

        let mut msg = Message::new(MessageType::ThreadMove);
        msg.set_receiver(self.shared.clone());
        self.shared.deliver(msg);

        let mut bound = lock(&self.shared.thread);
        let messages = bound.take_messages(self.id());
        thread.append_messages(messages);
        *bound = thread.clone();
        debug!(object = %self.id(), from = %current.name(), to = %thread.name(),
            "object moved");

        Ok(())
    }

    pub(crate) fn shared(&self) -> &Arc<ObjectShared> {
        &self.shared
    }
}

impl Drop for Object {
    fn drop(&mut self) {
        self.shared.alive.store(false, Ordering::Release);

        let signals = std::mem::take(&mut *lock(&self.shared.signals));
        for (_, signal) in signals {
            if let Some(signal) = signal.upgrade() {
                signal.disconnect_object(self.id());
            }
        }

        let thread = self.thread();
        if !thread.is_current() && thread.is_running() {
            warn!(object = %self.id(), thread = %thread.name(),
                "object destroyed outside of its running thread");
        }
        if self.shared.pending.load(Ordering::Acquire) > 0 {
            let purged = thread.remove_messages_for(self.id());
            debug!(object = %self.id(), purged, "purged pending messages");
        }
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("id", &self.id())
            .field("thread", &self.thread().name())
            .field("pending_messages", &self.pending_messages())
            .finish()
    }
}
