//! Subprocess driver.
//!
//! Spawns a command with piped stdout and stderr and turns both streams into
//! a sequence of [`OutputEvent`]s delivered to an [`OutputSink`]. Each stream
//! is read by its own task; a single pump task hands events to the sink, so
//! chunks from one stream reach it in the order they were read. There is no
//! ordering guarantee between the two streams.
//!
//! Must be called from within a Tokio runtime.

use std::ffi::OsStr;
use std::future::Future;
use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{Notify, mpsc, watch};
use tokio::task::JoinHandle;

use crate::error::{Result, SpawnError};
use crate::types::{OutputEvent, ProcessExitStatus, Stream};

/// Size of a single read from a child stream.
const READ_BUFFER_SIZE: usize = 8192;

/// Receives every output chunk of a spawned process.
pub trait OutputSink: Send + 'static {
    /// Handle one chunk.
    fn on_event(&mut self, event: &OutputEvent);

    /// Called once after both streams reached end of file and every chunk
    /// was handled.
    fn on_end(&mut self) {}
}

impl<F> OutputSink for F
where
    F: FnMut(&OutputEvent) + Send + 'static,
{
    fn on_event(&mut self, event: &OutputEvent) {
        self(event);
    }
}

/// Options for [`spawn`].
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    /// Extra environment variables on top of the inherited environment.
    pub env: Vec<(String, String)>,
    /// Working directory for the child. Defaults to the current directory.
    pub working_dir: Option<PathBuf>,
    /// Echo every chunk to the harness's own stdout/stderr.
    pub echo: bool,
}

impl Default for SpawnOptions {
    fn default() -> Self {
        Self {
            env: Vec::new(),
            working_dir: None,
            echo: true,
        }
    }
}

impl SpawnOptions {
    /// Create default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Set the working directory.
    #[must_use]
    pub fn working_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(path.into());
        self
    }

    /// Set whether chunks are echoed to the console.
    #[must_use]
    pub const fn echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }
}

/// Handle to a spawned process.
///
/// Dropping the handle terminates the process.
#[derive(Debug)]
pub struct ProcessHandle {
    command: String,
    pid: Option<u32>,
    kill: Arc<Notify>,
    exit: watch::Receiver<Option<ProcessExitStatus>>,
    pump: Option<JoinHandle<()>>,
}

impl ProcessHandle {
    /// The spawned command.
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// The OS process id, if the process had not exited when it was spawned.
    #[must_use]
    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Send a kill signal.
    ///
    /// Idempotent. Output already in flight may still be delivered, and
    /// pending expectations are left untouched.
    pub fn terminate(&self) {
        if self.is_running() {
            tracing::debug!(command = %self.command, pid = ?self.pid, "terminating process");
        }
        self.kill.notify_one();
    }

    /// The exit status, if the process has exited.
    #[must_use]
    pub fn exit_status(&self) -> Option<ProcessExitStatus> {
        *self.exit.borrow()
    }

    /// Check whether the process is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.exit_status().is_none()
    }

    /// A future fulfilled with the exit status once the process exits.
    ///
    /// Can be called any number of times, before or after the exit.
    pub fn on_exit(&self) -> impl Future<Output = ProcessExitStatus> + Send + 'static {
        let mut exit = self.exit.clone();
        async move {
            exit.wait_for(Option::is_some)
                .await
                .ok()
                .and_then(|status| *status)
                .unwrap_or(ProcessExitStatus::Unknown)
        }
    }

    /// Wait for the process to exit and for every chunk it wrote to reach
    /// the sink.
    pub async fn finish(mut self) -> ProcessExitStatus {
        let status = self.on_exit().await;
        if let Some(pump) = self.pump.take() {
            if let Err(err) = pump.await {
                tracing::warn!(%err, "output pump failed");
            }
        }
        status
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        self.kill.notify_one();
    }
}

/// Spawn `command` with `args`, delivering its output to `sink`.
///
/// The child inherits the environment (plus [`SpawnOptions::env`]). All three
/// standard streams are piped. Nothing is written to stdin, but its pipe stays
/// open until the child exits, so a tool that watches stdin for end of file
/// keeps running.
///
/// # Errors
///
/// Returns [`SpawnError`] if the working directory is missing or the OS
/// cannot create the process. Spawn failures are never retried.
pub fn spawn<I, A, S>(
    command: &str,
    args: I,
    options: &SpawnOptions,
    sink: S,
) -> Result<ProcessHandle>
where
    I: IntoIterator<Item = A>,
    A: AsRef<OsStr>,
    S: OutputSink,
{
    let mut cmd = Command::new(command);
    cmd.args(args)
        .envs(options.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(dir) = &options.working_dir {
        if !dir.is_dir() {
            return Err(SpawnError::InvalidWorkingDir {
                path: dir.display().to_string(),
            }
            .into());
        }
        cmd.current_dir(dir);
    }

    let mut child = cmd.spawn().map_err(|e| SpawnError::from_io(command, e))?;
    let pid = child.id();
    tracing::debug!(command, ?pid, "spawned process");

    let stdout = child.stdout.take().ok_or(SpawnError::StreamNotCaptured {
        stream: Stream::Stdout,
    })?;
    let stderr = child.stderr.take().ok_or(SpawnError::StreamNotCaptured {
        stream: Stream::Stderr,
    })?;

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(read_stream(Stream::Stdout, stdout, tx.clone()));
    tokio::spawn(read_stream(Stream::Stderr, stderr, tx));
    let pump = tokio::spawn(pump(rx, sink, options.echo));

    let kill = Arc::new(Notify::new());
    let (exit_tx, exit_rx) = watch::channel(None);
    let stdin = child.stdin.take();
    tokio::spawn(supervise(child, stdin, Arc::clone(&kill), exit_tx));

    Ok(ProcessHandle {
        command: command.to_string(),
        pid,
        kill,
        exit: exit_rx,
        pump: Some(pump),
    })
}

async fn supervise(
    mut child: Child,
    stdin: Option<ChildStdin>,
    kill: Arc<Notify>,
    exit_tx: watch::Sender<Option<ProcessExitStatus>>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        () = kill.notified() => {
            if let Err(err) = child.start_kill() {
                tracing::debug!(%err, "kill signal not delivered");
            }
            child.wait().await
        }
    };

    drop(stdin);
    let status = status.map_or(ProcessExitStatus::Unknown, ProcessExitStatus::from);
    tracing::debug!(%status, "process exited");
    exit_tx.send_replace(Some(status));
}

async fn read_stream<R>(stream: Stream, mut reader: R, tx: mpsc::UnboundedSender<OutputEvent>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let mut decoder = ChunkDecoder::default();

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let text = decoder.decode(&buf[..n]);
                if !text.is_empty() && tx.send(OutputEvent::new(stream, text)).is_err() {
                    return;
                }
            }
            Err(err) => {
                tracing::debug!(%stream, %err, "read failed");
                break;
            }
        }
    }

    let rest = decoder.finish();
    if !rest.is_empty() {
        let _ = tx.send(OutputEvent::new(stream, rest));
    }
}

async fn pump<S: OutputSink>(mut rx: mpsc::UnboundedReceiver<OutputEvent>, mut sink: S, echo: bool) {
    while let Some(event) = rx.recv().await {
        tracing::trace!(stream = %event.stream, bytes = event.data.len(), "chunk received");
        if echo {
            echo_chunk(&event);
        }
        sink.on_event(&event);
    }
    sink.on_end();
}

fn echo_chunk(event: &OutputEvent) {
    match event.stream {
        Stream::Stdout => {
            print!("{}", event.data);
            let _ = std::io::stdout().flush();
        }
        Stream::Stderr => eprint!("{}", event.data),
    }
}

/// Decodes a byte stream into text chunks, holding back a UTF-8 sequence
/// that is split across reads.
#[derive(Debug, Default)]
struct ChunkDecoder {
    pending: Vec<u8>,
}

impl ChunkDecoder {
    fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let split = self.pending.len() - incomplete_tail(&self.pending);
        let text = String::from_utf8_lossy(&self.pending[..split]).into_owned();
        self.pending.drain(..split);
        text
    }

    fn finish(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        text
    }
}

/// Length of an incomplete UTF-8 sequence at the end of `bytes`.
fn incomplete_tail(bytes: &[u8]) -> usize {
    let start = bytes.len().saturating_sub(3);
    for i in (start..bytes.len()).rev() {
        let byte = bytes[i];
        if byte & 0xC0 == 0x80 {
            continue;
        }
        let width = match byte {
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => 1,
        };
        let available = bytes.len() - i;
        return if available < width { available } else { 0 };
    }
    0
}
