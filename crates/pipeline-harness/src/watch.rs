//! Broadcast waiters for watch-mode compilations.
//!
//! In watch mode the tool produces one complete result per rebuild instead of
//! a stream of fragments, so there is nothing to match: every pending waiter
//! receives the next result, and the waiter list starts over empty.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::{HarnessError, Result};

/// A failed compilation as reported by the tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileFailure {
    /// The failure text.
    pub message: String,
}

impl CompileFailure {
    /// Create a failure.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<CompileFailure> for HarnessError {
    fn from(failure: CompileFailure) -> Self {
        Self::compile(failure.message)
    }
}

/// One published watch result.
pub type Outcome<T> = std::result::Result<T, CompileFailure>;

/// Fans each compilation result out to every pending waiter.
#[derive(Debug)]
pub struct BroadcastWatch<T> {
    waiters: Arc<Mutex<Vec<oneshot::Sender<Outcome<T>>>>>,
}

impl<T> Clone for BroadcastWatch<T> {
    fn clone(&self) -> Self {
        Self {
            waiters: Arc::clone(&self.waiters),
        }
    }
}

impl<T> Default for BroadcastWatch<T> {
    fn default() -> Self {
        Self {
            waiters: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<T: Clone> BroadcastWatch<T> {
    /// Create a watch with no waiters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<oneshot::Sender<Outcome<T>>>> {
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a waiter for the next result.
    pub fn wait(&self) -> Waiter<T> {
        let (tx, rx) = oneshot::channel();
        self.lock().push(tx);
        Waiter { rx }
    }

    /// Settle every pending waiter with `outcome` and clear the list.
    ///
    /// Returns the number of waiters settled.
    pub fn publish(&self, outcome: Outcome<T>) -> usize {
        let waiters = std::mem::take(&mut *self.lock());
        let count = waiters.len();
        tracing::debug!(waiters = count, ok = outcome.is_ok(), "publishing watch result");
        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
        count
    }

    /// Number of pending waiters.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.lock().len()
    }
}

/// Future returned by [`BroadcastWatch::wait`].
#[must_use = "a waiter does nothing unless awaited"]
#[derive(Debug)]
pub struct Waiter<T> {
    rx: oneshot::Receiver<Outcome<T>>,
}

impl<T> Future for Waiter<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|outcome| match outcome {
            Ok(result) => result.map_err(HarnessError::from),
            Err(_) => Err(HarnessError::WatchClosed),
        })
    }
}
