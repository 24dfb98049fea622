//! The output matcher engine.
//!
//! Test code registers batches of matchers ("watchers") at any point in
//! time. Every output chunk is offered to each pending watcher in
//! registration order:
//!
//! - the first remaining matcher that accepts the chunk is consumed, and the
//!   watcher resolves once its last matcher is consumed;
//! - a chunk that none of the remaining matchers accepts rejects the watcher
//!   with [`HarnessError::UnexpectedOutput`].
//!
//! Matchers inside one batch are unordered with respect to each other, so a
//! test can say "all of these fragments will show up" without pinning down
//! the order in which the tool prints them. Chunks that arrive while nothing
//! is pending are dropped.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::oneshot;

use super::matcher::Matcher;
use crate::error::{HarnessError, Result};
use crate::process::OutputSink;
use crate::types::OutputEvent;
use crate::util::bounded;

/// A pending batch of matchers.
struct Watcher {
    /// Registration number, for logs.
    id: u64,
    /// Matchers not yet consumed. Never empty while pending.
    remaining: Vec<Matcher>,
    /// Settles the registration's [`Expectation`].
    resolver: oneshot::Sender<Result<()>>,
}

/// Future returned by [`OutputMatcher::register`].
///
/// Resolves once every matcher of the batch was consumed, or rejects with the
/// first chunk the batch did not anticipate.
#[must_use = "an expectation does nothing unless awaited"]
pub struct Expectation {
    rx: oneshot::Receiver<Result<()>>,
    description: String,
}

impl Expectation {
    fn rejected(err: HarnessError) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Err(err));
        Self {
            rx,
            description: "an empty expectation".to_string(),
        }
    }

    /// Await the expectation, failing with [`HarnessError::Timeout`] if it
    /// does not settle in time.
    pub async fn within(self, duration: Duration) -> Result<()> {
        let description = self.description.clone();
        bounded(duration, description, self).await
    }
}

impl Future for Expectation {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|outcome| outcome.unwrap_or_else(|_| Err(HarnessError::ExpectationAbandoned)))
    }
}

impl std::fmt::Debug for Expectation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Expectation")
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Routes output events to pending watchers.
#[derive(Default)]
pub struct OutputMatcher {
    watchers: Vec<Watcher>,
    next_id: u64,
}

impl OutputMatcher {
    /// Create an engine with no pending watchers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a batch of matchers.
    ///
    /// An empty batch is rejected immediately with
    /// [`HarnessError::EmptyExpectation`] and nothing is registered.
    pub fn register<I>(&mut self, matchers: I) -> Expectation
    where
        I: IntoIterator<Item = Matcher>,
    {
        let remaining: Vec<Matcher> = matchers.into_iter().collect();
        if remaining.is_empty() {
            return Expectation::rejected(HarnessError::EmptyExpectation);
        }

        let id = self.next_id;
        self.next_id += 1;
        let description = format!("watcher #{id} ({} matchers)", remaining.len());
        tracing::debug!(watcher = id, matchers = remaining.len(), "registered watcher");

        let (resolver, rx) = oneshot::channel();
        self.watchers.push(Watcher {
            id,
            remaining,
            resolver,
        });
        Expectation { rx, description }
    }

    /// Offer one event to every watcher pending at the time of the call.
    pub fn dispatch(&mut self, event: &OutputEvent) {
        if self.watchers.is_empty() {
            tracing::trace!(stream = %event.stream, "no pending watchers, chunk dropped");
            return;
        }

        let snapshot = std::mem::take(&mut self.watchers);
        for mut watcher in snapshot {
            if watcher.resolver.is_closed() {
                tracing::debug!(watcher = watcher.id, "expectation dropped, discarding watcher");
                continue;
            }

            let Some(index) = watcher.remaining.iter().position(|m| m.accepts(event)) else {
                tracing::warn!(
                    watcher = watcher.id,
                    stream = %event.stream,
                    "chunk matched no remaining matcher"
                );
                let _ = watcher.resolver.send(Err(HarnessError::unexpected_output(
                    event.stream,
                    event.data.clone(),
                )));
                continue;
            };

            watcher.remaining.remove(index);
            if watcher.remaining.is_empty() {
                tracing::debug!(watcher = watcher.id, "watcher satisfied");
                let _ = watcher.resolver.send(Ok(()));
            } else {
                self.watchers.push(watcher);
            }
        }
    }

    /// Number of pending watchers.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.watchers.len()
    }

    /// Reject every pending watcher with [`HarnessError::Cancelled`].
    ///
    /// Returns the number of watchers cancelled.
    pub fn cancel_all(&mut self, reason: &str) -> usize {
        let watchers = std::mem::take(&mut self.watchers);
        let count = watchers.len();
        for watcher in watchers {
            let _ = watcher.resolver.send(Err(HarnessError::cancelled(reason)));
        }
        if count > 0 {
            tracing::debug!(count, reason, "cancelled pending watchers");
        }
        count
    }
}

impl std::fmt::Debug for OutputMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputMatcher")
            .field("pending", &self.watchers.len())
            .finish_non_exhaustive()
    }
}

/// An [`OutputMatcher`] shared between the process pump and test code.
#[derive(Debug, Clone, Default)]
pub struct SharedMatcher(Arc<Mutex<OutputMatcher>>);

impl SharedMatcher {
    /// Create a shared engine with no pending watchers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, OutputMatcher> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// See [`OutputMatcher::register`].
    pub fn register<I>(&self, matchers: I) -> Expectation
    where
        I: IntoIterator<Item = Matcher>,
    {
        self.lock().register(matchers)
    }

    /// See [`OutputMatcher::dispatch`].
    pub fn dispatch(&self, event: &OutputEvent) {
        self.lock().dispatch(event);
    }

    /// See [`OutputMatcher::pending`].
    #[must_use]
    pub fn pending(&self) -> usize {
        self.lock().pending()
    }

    /// See [`OutputMatcher::cancel_all`].
    pub fn cancel_all(&self, reason: &str) -> usize {
        self.lock().cancel_all(reason)
    }
}

impl OutputSink for SharedMatcher {
    fn on_event(&mut self, event: &OutputEvent) {
        self.dispatch(event);
    }
}
