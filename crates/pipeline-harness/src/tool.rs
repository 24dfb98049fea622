//! Running the build tool.
//!
//! Three ways to drive the tool from a session:
//!
//! - [`exec`] streams its output into an [`OutputMatcher`](crate::expect::OutputMatcher)
//!   so a test can wait for fragments as they appear.
//! - [`compile`] runs one build to completion and returns a [`CompileReport`].
//! - [`watch`] keeps the tool running in watch mode and publishes a report
//!   for every rebuild through a [`BroadcastWatch`].

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use regex::Regex;
use serde_json::Value;

use crate::compose::write_config;
use crate::error::{HarnessError, Result};
use crate::expect::{Expectation, Matcher, SharedMatcher};
use crate::process::{OutputSink, ProcessHandle, SpawnOptions, spawn};
use crate::session::TestEnv;
use crate::types::{OutputEvent, ProcessExitStatus, Stream};
use crate::util::bounded;
use crate::watch::{BroadcastWatch, CompileFailure, Outcome, Waiter};

/// Flag selecting the configuration file.
pub const CONFIG_FLAG: &str = "--config";

/// Flag enabling watch mode.
pub const WATCH_FLAG: &str = "--watch";

/// Output kept in the failure message when a watch process exits.
const WATCH_TAIL: usize = 2000;

fn options(env: &TestEnv) -> SpawnOptions {
    SpawnOptions::new()
        .working_dir(&env.working_dir)
        .echo(env.config().echo_output)
}

fn tool_args<I, A>(env: &TestEnv, args: I) -> Vec<String>
where
    I: IntoIterator<Item = A>,
    A: Into<String>,
{
    std::iter::once(env.tool.to_string_lossy().into_owned())
        .chain(args.into_iter().map(Into::into))
        .collect()
}

/// A running tool whose output feeds an output matcher.
#[derive(Debug)]
pub struct Exec {
    process: ProcessHandle,
    matcher: SharedMatcher,
    timeout: Duration,
}

/// Spawn the tool with `args` in the session directory.
///
/// # Errors
///
/// Returns [`HarnessError::Spawn`](crate::error::HarnessError::Spawn) if the process cannot be created.
pub fn exec<I, A>(env: &TestEnv, args: I) -> Result<Exec>
where
    I: IntoIterator<Item = A>,
    A: Into<String>,
{
    let config = env.config();
    let matcher = SharedMatcher::new();
    let process = spawn(
        &config.node,
        tool_args(env, args),
        &options(env),
        matcher.clone(),
    )?;
    Ok(Exec {
        process,
        matcher,
        timeout: config.expect_timeout_duration(),
    })
}

impl Exec {
    /// Register a batch of matchers against future output.
    pub fn wait<I>(&self, matchers: I) -> Expectation
    where
        I: IntoIterator<Item = Matcher>,
    {
        self.matcher.register(matchers)
    }

    /// Register a batch and await it, failing after `duration`.
    pub async fn wait_within<I>(&self, matchers: I, duration: Duration) -> Result<()>
    where
        I: IntoIterator<Item = Matcher>,
    {
        self.wait(matchers).within(duration).await
    }

    /// Register a batch and await it with the configured default timeout.
    pub async fn expect<I>(&self, matchers: I) -> Result<()>
    where
        I: IntoIterator<Item = Matcher>,
    {
        self.wait_within(matchers, self.timeout).await
    }

    /// Kill the tool. Pending expectations stay pending.
    pub fn close(&self) {
        self.process.terminate();
    }

    /// A future fulfilled when the tool exits.
    pub fn alive(&self) -> impl Future<Output = ProcessExitStatus> + Send + 'static {
        self.process.on_exit()
    }

    /// Number of pending expectations.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.matcher.pending()
    }

    /// Reject every pending expectation with [`HarnessError::Cancelled`](crate::error::HarnessError::Cancelled).
    pub fn cancel_pending(&self, reason: &str) -> usize {
        self.matcher.cancel_all(reason)
    }

    /// The underlying process.
    #[must_use]
    pub const fn process(&self) -> &ProcessHandle {
        &self.process
    }
}

/// Outcome of one build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileReport {
    /// Exit status, if the process exited. `None` for watch-mode rebuilds.
    pub status: Option<ProcessExitStatus>,
    /// Standard output of the build.
    pub stdout: String,
    /// Standard error of the build.
    pub stderr: String,
    /// Error entries, split on the configured error marker.
    pub errors: Vec<String>,
}

impl CompileReport {
    /// Build a report from captured output.
    #[must_use]
    pub fn from_output(
        status: Option<ProcessExitStatus>,
        stdout: String,
        stderr: String,
        error_marker: &Regex,
    ) -> Self {
        let mut errors = split_errors(&stdout, error_marker);
        errors.extend(split_errors(&stderr, error_marker));
        Self {
            status,
            stdout,
            stderr,
            errors,
        }
    }

    /// Check if any error was reported.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// No errors, and a zero exit code if the process exited.
    #[must_use]
    pub fn success(&self) -> bool {
        !self.has_errors() && self.status.is_none_or(|status| status.success())
    }
}

fn split_errors(text: &str, marker: &Regex) -> Vec<String> {
    let starts: Vec<usize> = marker.find_iter(text).map(|m| m.start()).collect();
    starts
        .iter()
        .enumerate()
        .map(|(i, &start)| {
            let end = starts.get(i + 1).copied().unwrap_or(text.len());
            text[start..end].trim_end().to_string()
        })
        .collect()
}

#[derive(Debug, Default)]
struct Captured {
    stdout: String,
    stderr: String,
}

impl Captured {
    fn push(&mut self, event: &OutputEvent) {
        match event.stream {
            Stream::Stdout => self.stdout.push_str(&event.data),
            Stream::Stderr => self.stderr.push_str(&event.data),
        }
    }
}

/// Write `tool_config`, run one build and report it.
///
/// A failed build is still `Ok`; inspect the report.
///
/// # Errors
///
/// Fails if the configuration cannot be written, the error marker is not a
/// valid regex, or the process cannot be spawned.
pub async fn compile(env: &TestEnv, tool_config: &Value) -> Result<CompileReport> {
    let config = env.config();
    let marker = Regex::new(&config.error_marker)?;
    let file = write_config(env, tool_config)?;

    let captured = Arc::new(Mutex::new(Captured::default()));
    let sink = {
        let captured = Arc::clone(&captured);
        move |event: &OutputEvent| {
            captured
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(event);
        }
    };
    let args = [CONFIG_FLAG.to_string(), file.path().to_string_lossy().into_owned()];
    let status = spawn(&config.node, tool_args(env, args), &options(env), sink)?
        .finish()
        .await;

    let captured = std::mem::take(&mut *captured.lock().unwrap_or_else(PoisonError::into_inner));
    let report = CompileReport::from_output(Some(status), captured.stdout, captured.stderr, &marker);
    tracing::debug!(%status, errors = report.errors.len(), "build finished");
    Ok(report)
}

/// Called with every watch-mode result before waiters see it.
pub type ResultHook = Box<dyn FnMut(&Outcome<CompileReport>) + Send>;

/// Compile the watch-mode build boundary.
///
/// A pattern that matches empty output is rejected: it would cut a rebuild
/// out of every chunk.
fn boundary_regex(pattern: &str) -> Result<Regex> {
    let boundary = Regex::new(pattern)?;
    if boundary.is_match("") {
        return Err(HarnessError::EmptyBoundary {
            pattern: pattern.to_string(),
        });
    }
    Ok(boundary)
}

/// Cuts watch-mode output into one report per rebuild.
struct RebuildSplitter {
    boundary: Regex,
    error_marker: Regex,
    captured: Captured,
    watch: BroadcastWatch<CompileReport>,
    on_result: ResultHook,
}

impl RebuildSplitter {
    fn emit(&mut self, outcome: Outcome<CompileReport>) -> usize {
        (self.on_result)(&outcome);
        self.watch.publish(outcome)
    }

    /// End of the first non-empty boundary match in the captured stdout.
    fn next_boundary(&self) -> Option<usize> {
        self.boundary
            .find_iter(&self.captured.stdout)
            .find(|m| !m.is_empty())
            .map(|m| m.end())
    }

    fn tail(&self) -> String {
        let text = format!("{}{}", self.captured.stdout, self.captured.stderr);
        let mut start = text.len().saturating_sub(WATCH_TAIL);
        while !text.is_char_boundary(start) {
            start += 1;
        }
        text[start..].to_string()
    }
}

impl OutputSink for RebuildSplitter {
    fn on_event(&mut self, event: &OutputEvent) {
        self.captured.push(event);
        if event.stream != Stream::Stdout {
            return;
        }
        while let Some(end) = self.next_boundary() {
            let rest = self.captured.stdout.split_off(end);
            let stdout = std::mem::replace(&mut self.captured.stdout, rest);
            let stderr = std::mem::take(&mut self.captured.stderr);
            let report = CompileReport::from_output(None, stdout, stderr, &self.error_marker);
            self.emit(Ok(report));
        }
    }

    fn on_end(&mut self) {
        let message = format!("watch process closed its output:\n{}", self.tail());
        let settled = self.emit(Err(CompileFailure::new(message)));
        tracing::debug!(settled, "watch output ended");
    }
}

/// The tool running in watch mode.
#[derive(Debug)]
pub struct ToolWatch {
    process: ProcessHandle,
    watch: BroadcastWatch<CompileReport>,
}

/// Write `tool_config` and start the tool in watch mode.
///
/// # Errors
///
/// Fails if the configuration cannot be written, a configured pattern is not
/// a valid regex, the build boundary matches empty output, or the process
/// cannot be spawned.
pub fn watch(env: &TestEnv, tool_config: &Value) -> Result<ToolWatch> {
    watch_with(env, tool_config, |_: &Outcome<CompileReport>| {})
}

/// Like [`watch`], calling `on_result` with every rebuild report (and the
/// final failure) before pending waiters are settled.
///
/// # Errors
///
/// Same as [`watch`].
pub fn watch_with<F>(env: &TestEnv, tool_config: &Value, on_result: F) -> Result<ToolWatch>
where
    F: FnMut(&Outcome<CompileReport>) + Send + 'static,
{
    let config = env.config();
    let boundary = boundary_regex(&config.build_boundary)?;
    let error_marker = Regex::new(&config.error_marker)?;
    let file = write_config(env, tool_config)?;
    let watch = BroadcastWatch::new();
    let splitter = RebuildSplitter {
        boundary,
        error_marker,
        captured: Captured::default(),
        watch: watch.clone(),
        on_result: Box::new(on_result),
    };

    let args = [
        CONFIG_FLAG.to_string(),
        file.path().to_string_lossy().into_owned(),
        WATCH_FLAG.to_string(),
    ];
    let process = spawn(&config.node, tool_args(env, args), &options(env), splitter)?;
    Ok(ToolWatch { process, watch })
}

impl ToolWatch {
    /// Wait for the next rebuild.
    pub fn wait(&self) -> Waiter<CompileReport> {
        self.watch.wait()
    }

    /// Wait for the next rebuild, failing after `duration`.
    pub async fn wait_within(&self, duration: Duration) -> Result<CompileReport> {
        bounded(duration, "the next rebuild", self.wait()).await
    }

    /// Number of pending waiters.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.watch.pending()
    }

    /// Stop watching. Pending waiters fail once the tool's output is closed.
    pub fn close(&self) {
        self.process.terminate();
    }

    /// The underlying process.
    #[must_use]
    pub const fn process(&self) -> &ProcessHandle {
        &self.process
    }
}

#[cfg(test)]
mod tests {
    use futures::FutureExt;

    use super::*;
    use crate::config::DEFAULT_ERROR_MARKER;

    fn marker() -> Regex {
        Regex::new(DEFAULT_ERROR_MARKER).unwrap()
    }

    #[test]
    fn errors_split_on_marker_lines() {
        let stdout = "Hash: 1\n\
                      ERROR in [at-loader] src/index.ts:1:1\n    TS2345: bad\n\
                      ERROR in [at-loader] src/other.ts:2:2\n    TS2304: missing\n";
        let report = CompileReport::from_output(
            Some(ProcessExitStatus::Exited(2)),
            stdout.to_string(),
            String::new(),
            &marker(),
        );
        assert_eq!(report.errors.len(), 2);
        assert!(report.errors[0].starts_with("ERROR in [at-loader] src/index.ts"));
        assert!(report.errors[0].ends_with("TS2345: bad"));
        assert!(report.errors[1].contains("TS2304"));
        assert!(!report.success());
    }

    #[test]
    fn clean_build_succeeds() {
        let report = CompileReport::from_output(
            Some(ProcessExitStatus::Exited(0)),
            "Time: 12ms\n".to_string(),
            String::new(),
            &marker(),
        );
        assert!(!report.has_errors());
        assert!(report.success());

        let rebuild = CompileReport::from_output(None, String::new(), String::new(), &marker());
        assert!(rebuild.success());
    }

    #[test]
    fn marker_must_start_a_line() {
        let report = CompileReport::from_output(
            None,
            "no ERROR in here\n".to_string(),
            String::new(),
            &marker(),
        );
        assert!(report.errors.is_empty());
    }

    fn splitter(watch: &BroadcastWatch<CompileReport>) -> RebuildSplitter {
        RebuildSplitter {
            boundary: boundary_regex(crate::config::DEFAULT_BUILD_BOUNDARY).unwrap(),
            error_marker: marker(),
            captured: Captured::default(),
            watch: watch.clone(),
            on_result: Box::new(|_: &Outcome<CompileReport>| {}),
        }
    }

    #[test]
    fn boundaries_matching_empty_output_are_rejected() {
        for pattern in ["(?m)^", "(Time: \\d+ms)?", ""] {
            assert!(
                matches!(boundary_regex(pattern), Err(HarnessError::EmptyBoundary { .. })),
                "{pattern:?}"
            );
        }
        assert!(matches!(boundary_regex("(unclosed"), Err(HarnessError::Regex(_))));
        assert!(boundary_regex(crate::config::DEFAULT_BUILD_BOUNDARY).is_ok());
    }

    #[test]
    fn empty_boundary_matches_never_cut_a_rebuild() {
        let watch = BroadcastWatch::new();
        let mut splitter = splitter(&watch);
        splitter.boundary = Regex::new(r"\b").unwrap();
        let _waiter = watch.wait();

        splitter.on_event(&OutputEvent::stdout("build 1\n"));
        assert_eq!(watch.pending(), 1);
        assert_eq!(splitter.captured.stdout, "build 1\n");
    }

    #[test]
    fn result_hook_sees_every_outcome_first() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let watch = BroadcastWatch::new();
        let mut splitter = splitter(&watch);
        splitter.on_result = {
            let seen = Arc::clone(&seen);
            let watch = watch.clone();
            Box::new(move |outcome: &Outcome<CompileReport>| {
                seen.lock().unwrap().push((outcome.is_ok(), watch.pending()));
            })
        };

        let _first = watch.wait();
        splitter.on_event(&OutputEvent::stdout("build 1\nTime: 4ms\n"));
        splitter.on_end();

        assert_eq!(*seen.lock().unwrap(), vec![(true, 1), (false, 0)]);
    }

    #[test]
    fn splitter_publishes_on_boundary() {
        let watch = BroadcastWatch::new();
        let mut splitter = splitter(&watch);
        let waiter = watch.wait();

        splitter.on_event(&OutputEvent::stdout("ERROR in a.ts\n"));
        splitter.on_event(&OutputEvent::stderr("warning\n"));
        assert_eq!(watch.pending(), 1);

        splitter.on_event(&OutputEvent::stdout("Time: 31ms\nHash: next"));
        let report = waiter.now_or_never().unwrap().unwrap();
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("ERROR in a.ts"));
        assert_eq!(report.stderr, "warning\n");
        assert!(report.stdout.ends_with("Time: 31ms"));
        assert_eq!(splitter.captured.stdout, "\nHash: next");
        assert!(splitter.captured.stderr.is_empty());
    }

    #[test]
    fn splitter_ignores_boundary_on_stderr() {
        let watch = BroadcastWatch::new();
        let mut splitter = splitter(&watch);
        let _waiter = watch.wait();

        splitter.on_event(&OutputEvent::stderr("Time: 5ms\n"));
        assert_eq!(watch.pending(), 1);
    }

    #[test]
    fn end_of_output_fails_pending_waiters_with_the_tail() {
        let watch = BroadcastWatch::new();
        let mut splitter = splitter(&watch);
        let waiter = watch.wait();
        splitter.on_event(&OutputEvent::stderr("Cannot find module 'webpack'\n"));
        splitter.on_end();

        match waiter.now_or_never().unwrap() {
            Err(HarnessError::Compile { message }) => {
                assert!(message.contains("Cannot find module 'webpack'"), "{message}");
            }
            other => panic!("expected a compile failure, got {other:?}"),
        }
    }

    #[test]
    fn tail_keeps_the_end() {
        let watch = BroadcastWatch::new();
        let mut splitter = splitter(&watch);
        splitter.on_event(&OutputEvent::stdout("é".repeat(WATCH_TAIL)));
        let tail = splitter.tail();
        assert!(tail.len() <= WATCH_TAIL);
        assert!(tail.chars().all(|c| c == 'é'));
    }
}
