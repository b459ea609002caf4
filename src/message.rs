// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::object::{ObjectId, ObjectShared};
use std::{
    any::Any,
    fmt,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
};
use tracing::trace;

/// Kind tag carried by every [`Message`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Untyped message, ignored by the default handler.
    None,
    /// Asynchronous method invocation, executed by the default handler.
    Invoke,
    /// Delivered synchronously to an object right before it moves to
    /// another thread.
    ThreadMove,
    /// Carries a value to be dropped in the receiver's thread.
    DeferredDelete,
    /// Application defined kind, see [`MessageType::register`].
    User(u32),
}

static NEXT_USER_TYPE: AtomicU32 = AtomicU32::new(0);

impl MessageType {
    /// Allocates a process-wide unique [`MessageType::User`] kind.
    pub fn register() -> MessageType {
        MessageType::User(NEXT_USER_TYPE.fetch_add(1, Ordering::Relaxed))
    }
}

enum Payload {
    Empty,
    Invoke(Box<dyn FnOnce() + Send>),
    Data(Box<dyn Any + Send>),
}

/// A unit of work queued on a thread for delivery to one object.
///
/// Ownership of a posted message is transferred to the receiver's thread
/// queue. The message is dropped after delivery, or discarded without
/// delivery when the receiver is destroyed or the thread terminates first.
pub struct Message {
    kind: MessageType,
    receiver: Option<Arc<ObjectShared>>,
    payload: Payload,
}

impl Message {
    /// Creates a message of `kind` without payload.
    pub fn new(kind: MessageType) -> Self {
        Self {
            kind,
            receiver: None,
            payload: Payload::Empty,
        }
    }

    /// Creates a message of `kind` carrying `data`, retrieved by the
    /// receiver with [`Message::data`] or [`Message::take_data`].
    pub fn with_data<T: Any + Send>(kind: MessageType, data: T) -> Self {
        Self {
            kind,
            receiver: None,
            payload: Payload::Data(Box::new(data)),
        }
    }

    pub(crate) fn invoke<F>(func: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            kind: MessageType::Invoke,
            receiver: None,
            payload: Payload::Invoke(Box::new(func)),
        }
    }

    pub(crate) fn deferred_delete<T: Any + Send>(value: T) -> Self {
        Self::with_data(MessageType::DeferredDelete, value)
    }

    pub fn kind(&self) -> MessageType {
        self.kind
    }

    /// Identifier of the object the message was posted to, once posted.
    pub fn receiver(&self) -> Option<ObjectId> {
        self.receiver.as_ref().map(|shared| shared.id())
    }

    /// Borrows the payload if it is a `T`.
    pub fn data<T: Any>(&self) -> Option<&T> {
        match &self.payload {
            Payload::Data(data) => data.downcast_ref(),
            _ => None,
        }
    }

    /// Takes the payload out of the message if it is a `T`.
    pub fn take_data<T: Any>(&mut self) -> Option<T> {
        match std::mem::replace(&mut self.payload, Payload::Empty) {
            Payload::Data(data) => match data.downcast::<T>() {
                Ok(data) => Some(*data),
                Err(data) => {
                    self.payload = Payload::Data(data);
                    None
                }
            },
            payload => {
                self.payload = payload;
                None
            }
        }
    }

    /// Default message processing.
    ///
    /// Executes invocation messages and drops the value carried by deferred
    /// deletion messages. Every other kind is ignored. Custom
    /// [`Receiver`](crate::object::Receiver) implementations forward the
    /// messages they do not recognize here.
    pub fn handle_default(self) {
        match (self.kind, self.payload) {
            (MessageType::Invoke, Payload::Invoke(func)) => func(),
            (MessageType::DeferredDelete, Payload::Data(value)) => {
                trace!(receiver = ?self.receiver.map(|r| r.id()), "deferred delete");
                drop(value);
            }
            _ => {}
        }
    }

    pub(crate) fn set_receiver(&mut self, receiver: Arc<ObjectShared>) {
        self.receiver = Some(receiver);
    }

    pub(crate) fn receiver_shared(&self) -> Option<&Arc<ObjectShared>> {
        self.receiver.as_ref()
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("kind", &self.kind)
            .field("receiver", &self.receiver())
            .finish()
    }
}
