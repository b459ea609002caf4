// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use std::io;
use thiserror::Error;

/// Errors reported by the object, thread and signal runtime.
///
/// Message posting and signal emission have no failure channel: delivering
/// to a destroyed object is a no-op. The variants below are therefore
/// limited to thread-affinity misuse and worker start-up failures.
#[derive(Debug, Error)]
pub enum Error {
    /// A thread-affinity contract was violated by the caller, for example
    /// moving an object from a thread other than the one it lives in, or
    /// joining a worker from inside itself.
    #[error("precondition violation: {0}")]
    PreconditionViolation(String),

    /// The operating system refused to create the worker's thread.
    #[error("unable to spawn worker thread: {0}")]
    ResourceExhausted(#[source] io::Error),

    /// The worker's one-shot initialization routine failed with `code`.
    #[error("worker initialization failed with code {code}")]
    InitializationFailed {
        /// Negative errno-style status reported by the init routine.
        code: i32,
    },

    /// The joined worker terminated by panicking.
    #[error("worker thread panicked: {0}")]
    WorkerPanicked(String),
}

impl Error {
    /// Negative errno equivalent of the error, following the camera stack's
    /// status code convention.
    pub fn code(&self) -> i32 {
        match self {
            Error::PreconditionViolation(_) => -libc::EPERM,
            Error::ResourceExhausted(err) => -err.raw_os_error().unwrap_or(libc::EAGAIN),
            Error::InitializationFailed { code } => *code,
            Error::WorkerPanicked(_) => -libc::EIO,
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
