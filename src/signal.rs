// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Typed one-to-many notifications with thread-aware delivery.

use crate::{
    message::Message,
    object::{Object, ObjectId, ObjectShared},
    sync::lock,
    thread::Thread,
};
use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, Weak,
    },
};
use tracing::trace;

/// How a slot connected to an object is invoked on emission.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionType {
    /// Direct when the emitting thread is the receiver's thread, queued
    /// otherwise.
    #[default]
    Auto,
    /// Always invoked synchronously from the emitting thread.
    Direct,
    /// Always posted to the receiver's thread, even from that same thread.
    Queued,
    /// Posted to the receiver's thread, with the emitter waiting for the
    /// slot to return. Direct when emitted from the receiver's thread.
    Blocking,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct SignalId(u64);

static NEXT_SIGNAL_ID: AtomicU64 = AtomicU64::new(1);

/// Type-erased view objects use to detach from the signals they are
/// connected to.
pub(crate) trait SignalBase: Send + Sync {
    fn disconnect_object(&self, object: ObjectId);
}

struct Slot<T> {
    receiver: Option<(ObjectId, Weak<ObjectShared>)>,
    kind: ConnectionType,
    func: Arc<dyn Fn(T) + Send + Sync>,
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        Self {
            receiver: self.receiver.clone(),
            kind: self.kind,
            func: self.func.clone(),
        }
    }
}

struct SignalShared<T> {
    id: SignalId,
    slots: Mutex<Vec<Slot<T>>>,
}

impl<T: 'static> SignalBase for SignalShared<T> {
    fn disconnect_object(&self, object: ObjectId) {
        lock(&self.slots).retain(|slot| !matches!(slot.receiver, Some((id, _)) if id == object));
    }
}

/// A typed signal carrying `T` to every connected slot.
///
/// Slots connected on behalf of an [`Object`] run in that object's thread:
/// synchronously when the signal is emitted from the same thread, through a
/// queued invocation message otherwise. The signal only keeps a weak
/// association with receiver objects, and a receiver is disconnected
/// automatically when dropped, so a slot never runs for a destroyed object.
///
/// Use a tuple for signals carrying several values and `()` for none.
///
/// # Example
///
/// ```
/// use edgefirst_camera_base::{Object, Signal, Thread};
/// use std::sync::{atomic::{AtomicI32, Ordering}, Arc};
///
/// let _main = Thread::adopt("main");
/// let receiver = Object::new().unwrap();
/// let value = Arc::new(AtomicI32::new(0));
///
/// let signal = Signal::new();
/// let sink = value.clone();
/// signal.connect(&receiver, move |v: i32| sink.store(v, Ordering::Relaxed));
///
/// signal.emit(42);
/// assert_eq!(value.load(Ordering::Relaxed), 42);
///
/// drop(receiver);
/// signal.emit(7);
/// assert_eq!(value.load(Ordering::Relaxed), 42);
/// ```
pub struct Signal<T> {
    shared: Arc<SignalShared<T>>,
}

impl<T: Clone + Send + 'static> Signal<T> {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(SignalShared {
                id: SignalId(NEXT_SIGNAL_ID.fetch_add(1, Ordering::Relaxed)),
                slots: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Connects `slot` to be invoked in `object`'s thread on every emission.
    ///
    /// Several connections from the same object are independent and all
    /// fire, in connection order.
    pub fn connect<F>(&self, object: &Object, slot: F)
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        self.connect_with(object, ConnectionType::Auto, slot);
    }

    /// Connects `slot` on behalf of `object` with an explicit connection
    /// type.
    pub fn connect_with<F>(&self, object: &Object, kind: ConnectionType, slot: F)
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let receiver = object.shared();
        lock(&self.shared.slots).push(Slot {
            receiver: Some((receiver.id(), Arc::downgrade(receiver))),
            kind,
            func: Arc::new(slot),
        });

        let base: Weak<dyn SignalBase> = Arc::downgrade(&self.shared) as Weak<dyn SignalBase>;
        receiver.remember_signal(self.shared.id, base);
    }

    /// Connects a slot that isn't tied to any object. It is always invoked
    /// synchronously from the emitting thread and stays connected until
    /// [`Signal::disconnect_all`] or the signal is dropped.
    pub fn connect_fn<F>(&self, slot: F)
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        lock(&self.shared.slots).push(Slot {
            receiver: None,
            kind: ConnectionType::Direct,
            func: Arc::new(slot),
        });
    }

    /// Removes every slot connected on behalf of `object`. Disconnecting an
    /// object that isn't connected does nothing.
    pub fn disconnect(&self, object: &Object) {
        self.shared.disconnect_object(object.id());
        object.shared().forget_signal(self.shared.id);
    }

    /// Removes every slot.
    pub fn disconnect_all(&self) {
        let slots = std::mem::take(&mut *lock(&self.shared.slots));
        self.forget_receivers(&slots);
    }

    /// Whether `object` has at least one slot connected.
    pub fn is_connected(&self, object: &Object) -> bool {
        let id = object.id();
        lock(&self.shared.slots)
            .iter()
            .any(|slot| matches!(slot.receiver, Some((receiver, _)) if receiver == id))
    }

    pub fn connection_count(&self) -> usize {
        lock(&self.shared.slots).len()
    }

    /// Emits the signal, invoking every connected slot in connection order.
    ///
    /// Slots of receivers living in the emitting thread run before `emit`
    /// returns. Slots of receivers living in other threads are posted to
    /// those threads, `emit` doesn't wait for them.
    pub fn emit(&self, args: T) {
        let slots = lock(&self.shared.slots).clone();
        let current = Thread::current();

        for slot in slots {
            let Some((id, receiver)) = &slot.receiver else {
                (slot.func)(args.clone());
                continue;
            };

            let Some(receiver) = receiver.upgrade().filter(|r| r.is_alive()) else {
                continue;
            };

            let direct = match slot.kind {
                ConnectionType::Direct => true,
                ConnectionType::Queued => false,
                ConnectionType::Auto => current.as_ref() == Some(&receiver.thread()),
                ConnectionType::Blocking => {
                    trace!(receiver = %id, "blocking slot invocation");
                    let func = slot.func.clone();
                    let args = args.clone();
                    receiver.invoke_blocking(move || func(args));
                    continue;
                }
            };

            if direct {
                (slot.func)(args.clone());
            } else {
                trace!(receiver = %id, "queueing slot invocation");
                let func = slot.func.clone();
                let args = args.clone();
                receiver.post(Message::invoke(move || func(args)));
            }
        }
    }

    fn forget_receivers(&self, slots: &[Slot<T>]) {
        for slot in slots {
            if let Some(receiver) = slot.receiver.as_ref().and_then(|(_, r)| r.upgrade()) {
                receiver.forget_signal(self.shared.id);
            }
        }
    }
}

impl<T: Clone + Send + 'static> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for Signal<T> {
    fn drop(&mut self) {
        let slots = std::mem::take(&mut *lock(&self.shared.slots));
        for slot in slots {
            if let Some(receiver) = slot.receiver.and_then(|(_, r)| r.upgrade()) {
                receiver.forget_signal(self.shared.id);
            }
        }
    }
}

impl<T> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.shared.id)
            .field("connections", &lock(&self.shared.slots).len())
            .finish()
    }
}
