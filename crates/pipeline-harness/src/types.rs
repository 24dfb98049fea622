//! Common types used throughout pipeline-harness.

use std::fmt;

/// One of the subprocess's two output streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stream {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

impl Stream {
    /// Get the stream name as used in error messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A discrete chunk of output delivered by the subprocess.
///
/// Chunks on the same stream arrive in order; there is no ordering
/// guarantee between the two streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputEvent {
    /// The stream the chunk arrived on.
    pub stream: Stream,
    /// The chunk text.
    pub data: String,
}

impl OutputEvent {
    /// Create a new output event.
    pub fn new(stream: Stream, data: impl Into<String>) -> Self {
        Self {
            stream,
            data: data.into(),
        }
    }

    /// Create a stdout event.
    pub fn stdout(data: impl Into<String>) -> Self {
        Self::new(Stream::Stdout, data)
    }

    /// Create a stderr event.
    pub fn stderr(data: impl Into<String>) -> Self {
        Self::new(Stream::Stderr, data)
    }
}

/// How the tool process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessExitStatus {
    /// Normal exit with this code.
    Exited(i32),
    /// Killed by this signal number.
    Signaled(i32),
    /// The status could not be collected.
    Unknown,
}

impl ProcessExitStatus {
    /// Exit code zero.
    #[must_use]
    pub const fn success(self) -> bool {
        matches!(self, Self::Exited(0))
    }

    /// The exit code, for a normal exit.
    #[must_use]
    pub const fn code(self) -> Option<i32> {
        if let Self::Exited(code) = self { Some(code) } else { None }
    }

    /// The signal number, when the tool was killed.
    #[must_use]
    pub const fn signal(self) -> Option<i32> {
        if let Self::Signaled(signal) = self { Some(signal) } else { None }
    }
}

impl fmt::Display for ProcessExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Exited(0) => f.write_str("exit 0 (success)"),
            Self::Exited(code) => write!(f, "exit {code}"),
            Self::Signaled(signal) => write!(f, "killed (signal {signal})"),
            Self::Unknown => f.write_str("exit status unavailable"),
        }
    }
}

#[cfg(unix)]
fn signal_of(status: std::process::ExitStatus) -> Option<i32> {
    std::os::unix::process::ExitStatusExt::signal(&status)
}

#[cfg(not(unix))]
fn signal_of(_status: std::process::ExitStatus) -> Option<i32> {
    None
}

impl From<std::process::ExitStatus> for ProcessExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        status
            .code()
            .map(Self::Exited)
            .or_else(|| signal_of(status).map(Self::Signaled))
            .unwrap_or(Self::Unknown)
    }
}
