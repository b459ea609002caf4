// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! # EdgeFirst Camera Base Library
//!
//! This library provides the thread-affine object runtime the EdgeFirst
//! camera stack is built on. Every component that must receive
//! notifications or run work on a specific thread composes an [`Object`]
//! bound to a [`Thread`], and components talk to each other through typed
//! [`Signal`]s and posted [`Message`]s.
//!
//! ## Features
//!
//! - **Thread Affinity**: objects are bound to the thread that created them
//!   and all their message handlers and slots run there, serialized.
//! - **Signals**: typed one-to-many notifications that call slots directly
//!   within a thread and queue them across threads, with automatic
//!   disconnection when the receiver is dropped.
//! - **Message Queues**: per-thread FIFO event loops with asynchronous
//!   method invocation and deferred deletion.
//! - **Start-up Handshake**: [`Thread::run_init_and_wait`] brings a worker
//!   up and reports its initialization status synchronously.
//! - **Camera Manager**: device enumeration and hot-plug handling on a
//!   private worker, built on the primitives above.
//!
//! ## Example
//!
//! ```no_run
//! use edgefirst_camera_base::{Object, Signal, Thread};
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let main = Thread::adopt("main");
//! let receiver = Object::new()?;
//!
//! let worker = Thread::new("worker");
//! worker.start()?;
//!
//! let ready: Signal<u32> = Signal::new();
//! ready.connect(&receiver, |value| println!("ready {value}"));
//!
//! // Emitted from another thread, the slot is queued to the main thread.
//! let emitter = Object::new_in(&worker);
//! emitter.invoke_method(move || ready.emit(42));
//!
//! main.process_events(Duration::from_millis(100))?;
//!
//! worker.stop();
//! worker.join()?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod manager;
pub mod message;
pub mod object;
pub mod signal;
pub mod sync;
pub mod thread;

pub use error::{Error, Result};
pub use manager::{Camera, CameraManager, DeviceEnumerator, DeviceInfo};
pub use message::{Message, MessageType};
pub use object::{Object, ObjectId, Receiver};
pub use signal::{ConnectionType, Signal};
pub use sync::SyncPoint;
pub use thread::Thread;
