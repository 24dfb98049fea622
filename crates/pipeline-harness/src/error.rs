//! Error types for pipeline-harness.
//!
//! Every failure is terminal for the single test that produced it. Nothing in
//! the harness retries: build-tool invocations are not assumed to be safe to
//! repeat inside a test's fixed working directory.

use std::time::Duration;

use thiserror::Error;

use crate::types::Stream;

/// The main error type for pipeline-harness operations.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// The tool process could not be started.
    #[error("could not start the tool: {0}")]
    Spawn(#[from] SpawnError),

    /// An output chunk satisfied none of a pending watcher's remaining matchers.
    #[error("Unexpected {stream}:\n{data}")]
    UnexpectedOutput {
        /// The stream the chunk arrived on.
        stream: Stream,
        /// The raw chunk text.
        data: String,
    },

    /// The build tool reported a failed compilation.
    #[error("compilation failed: {message}")]
    Compile {
        /// The failure as reported by the tool.
        message: String,
    },

    /// An expectation was registered with no matchers.
    #[error("an expectation needs at least one matcher")]
    EmptyExpectation,

    /// The matcher engine was dropped while an expectation was pending.
    #[error("expectation abandoned: the output matcher was dropped before it settled")]
    ExpectationAbandoned,

    /// A pending expectation was cancelled explicitly.
    #[error("expectation cancelled: {reason}")]
    Cancelled {
        /// Why the expectation was cancelled.
        reason: String,
    },

    /// The watch-mode engine was dropped while a waiter was pending.
    #[error("watch closed before the next compilation result")]
    WatchClosed,

    /// A callback-style test body dropped its completion signal.
    #[error("test body dropped its completion signal without calling it")]
    DoneDropped,

    /// A bounded wait ran out.
    #[error("gave up after {duration:?} waiting for {waiting_for}")]
    Timeout {
        /// How long the wait lasted.
        duration: Duration,
        /// Description of the awaited event.
        waiting_for: String,
    },

    /// An output or report assertion failed.
    #[error("assertion failed: {message}")]
    Assertion {
        /// Description of the failed assertion.
        message: String,
    },

    /// Filesystem or pipe failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Filesystem failure while preparing a session or fixture.
    #[error("{context} failed: {source}")]
    IoWithContext {
        /// The step, e.g. `writing src/index.ts`.
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The harness configuration file could not be parsed.
    #[error("invalid harness config: {0}")]
    TomlDe(#[from] toml::de::Error),

    /// A matcher, error marker or build boundary did not compile.
    #[error("bad pattern: {0}")]
    Regex(#[from] regex::Error),

    /// The watch-mode build boundary matches empty output, so it cannot
    /// separate one rebuild from the next.
    #[error("build boundary {pattern:?} matches empty output")]
    EmptyBoundary {
        /// The configured pattern.
        pattern: String,
    },

    /// A fixture or tool configuration could not be produced.
    #[error("bad fixture: {message}")]
    Fixture {
        /// What went wrong.
        message: String,
    },
}

/// Why the tool process did not start.
#[derive(Debug, Error)]
pub enum SpawnError {
    /// No such executable on `PATH` or at the given path.
    #[error("`{command}` not found")]
    CommandNotFound {
        /// The program as given.
        command: String,
    },

    /// The executable exists but may not be run.
    #[error("`{command}` is not executable")]
    NotExecutable {
        /// The program as given.
        command: String,
    },

    /// The session directory to run in is missing.
    #[error("working directory {path} does not exist")]
    InvalidWorkingDir {
        /// The directory as given.
        path: String,
    },

    /// The child came up without a pipe on one of its output streams.
    #[error("no pipe for the tool's {stream}")]
    StreamNotCaptured {
        /// The unpiped stream.
        stream: Stream,
    },

    /// Any other OS failure from `spawn`.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type alias for pipeline-harness operations.
pub type Result<T> = std::result::Result<T, HarnessError>;

impl HarnessError {
    /// Create an unexpected-output error.
    pub fn unexpected_output(stream: Stream, data: impl Into<String>) -> Self {
        Self::UnexpectedOutput {
            stream,
            data: data.into(),
        }
    }

    /// Create a compilation failure.
    pub fn compile(message: impl Into<String>) -> Self {
        Self::Compile {
            message: message.into(),
        }
    }

    /// Create a cancellation error.
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled {
            reason: reason.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(duration: Duration, waiting_for: impl Into<String>) -> Self {
        Self::Timeout {
            duration,
            waiting_for: waiting_for.into(),
        }
    }

    /// Create an assertion failure.
    pub fn assertion(message: impl Into<String>) -> Self {
        Self::Assertion {
            message: message.into(),
        }
    }

    /// Create a fixture error.
    pub fn fixture(message: impl Into<String>) -> Self {
        Self::Fixture {
            message: message.into(),
        }
    }

    /// Attach the failing step to an I/O result.
    pub fn with_io_context<T>(result: std::io::Result<T>, context: impl Into<String>) -> Result<T> {
        result.map_err(|source| Self::IoWithContext {
            context: context.into(),
            source,
        })
    }

    /// Check if this is an unexpected-output failure.
    #[must_use]
    pub const fn is_unexpected_output(&self) -> bool {
        matches!(self, Self::UnexpectedOutput { .. })
    }

    /// Whether a bounded wait ran out.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Get the offending stream and chunk if this is an unexpected-output failure.
    #[must_use]
    pub fn unexpected(&self) -> Option<(Stream, &str)> {
        match self {
            Self::UnexpectedOutput { stream, data } => Some((*stream, data)),
            _ => None,
        }
    }
}

impl SpawnError {
    /// Classify the error `Command::spawn` returned for `command`.
    #[must_use]
    pub fn from_io(command: &str, err: std::io::Error) -> Self {
        let command = command.to_string();
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::CommandNotFound { command },
            std::io::ErrorKind::PermissionDenied => Self::NotExecutable { command },
            _ => Self::Io(err),
        }
    }
}
