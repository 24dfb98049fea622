//! Isolated test sessions.
//!
//! Every spec runs in a freshly created directory under the configured test
//! root, with the process working directory switched into it for the length
//! of the body. The working directory is process-wide, so sessions are
//! serialized by a global lock and the previous directory is restored when
//! the session ends, whether the body returned, failed or panicked.
//!
//! ```ignore
//! use pipeline_harness::prelude::*;
//!
//! #[tokio::test]
//! async fn emits_bundle() -> Result<()> {
//!     let config = HarnessConfig::load()?;
//!     spec(file!(), &config, |env| async move {
//!         env.src("index.ts", "export const a: number = 1;")?;
//!         let report = compile(&env, &base_config(&env)).await?;
//!         expect_errors(&report, 0, &[])
//!     })
//!     .await
//! }
//! ```

use std::ffi::OsStr;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::{Mutex, MutexGuard, oneshot};

use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::fixture::{self, Fixture};

/// Serializes sessions; held while a session owns the working directory.
static CWD_LOCK: Mutex<()> = Mutex::const_new(());

/// Process-wide session counter, part of every directory name.
static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Paths a spec body works with.
#[derive(Debug, Clone)]
pub struct TestEnv {
    /// Root under which session directories are created.
    pub test_dir: PathBuf,
    /// This session's directory, also the current directory during the body.
    pub working_dir: PathBuf,
    /// Output subdirectory, relative to `working_dir`.
    pub out_dir: String,
    /// Source subdirectory, relative to `working_dir`.
    pub src_dir: String,
    /// The loader under test.
    pub loader: PathBuf,
    /// The tool's entry script.
    pub tool: PathBuf,
    config: Arc<HarnessConfig>,
}

impl TestEnv {
    /// Describe a session directory configured by `config`.
    #[must_use]
    pub fn new(config: Arc<HarnessConfig>, working_dir: PathBuf) -> Self {
        Self {
            test_dir: config.test_root.clone(),
            working_dir,
            out_dir: config.out_dir.clone(),
            src_dir: config.src_dir.clone(),
            loader: config.loader.clone(),
            tool: config.tool_entry.clone(),
            config,
        }
    }

    /// The configuration the session was opened with.
    #[must_use]
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Absolute source directory.
    #[must_use]
    pub fn src_path(&self) -> PathBuf {
        under(&self.working_dir, &self.src_dir)
    }

    /// Absolute output directory.
    #[must_use]
    pub fn out_path(&self) -> PathBuf {
        under(&self.working_dir, &self.out_dir)
    }

    /// Path of the generated tool configuration.
    #[must_use]
    pub fn config_path(&self) -> PathBuf {
        self.working_dir.join(&self.config.config_file)
    }

    /// Write a file relative to the session directory.
    pub fn file(&self, name: &str, text: impl Into<String>) -> Result<Fixture> {
        Fixture::create(self.working_dir.join(name), text)
    }

    /// Write a file into the source directory.
    pub fn src(&self, name: &str, text: impl Into<String>) -> Result<Fixture> {
        Fixture::create(self.src_path().join(name), text)
    }

    /// Write `tsconfig.json` into the session directory.
    pub fn tsconfig(&self, compiler_options: Option<Value>, extra: Option<Value>) -> Result<Fixture> {
        fixture::tsconfig(&self.working_dir, compiler_options, extra)
    }
}

fn under(base: &Path, relative: &str) -> PathBuf {
    let relative = Path::new(relative);
    base.join(relative.strip_prefix(".").unwrap_or(relative))
}

/// Switches the process working directory and switches back on drop.
struct CwdGuard {
    saved: PathBuf,
}

impl CwdGuard {
    fn enter(dir: &Path) -> Result<Self> {
        let saved = HarnessError::with_io_context(
            std::env::current_dir(),
            "reading the current directory",
        )?;
        HarnessError::with_io_context(
            std::env::set_current_dir(dir),
            format!("entering {}", dir.display()),
        )?;
        Ok(Self { saved })
    }
}

impl Drop for CwdGuard {
    fn drop(&mut self) {
        if let Err(err) = std::env::set_current_dir(&self.saved) {
            tracing::warn!(
                dir = %self.saved.display(),
                %err,
                "failed to restore the working directory"
            );
        }
    }
}

/// Lifecycle of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the working-directory lock.
    Init,
    /// Directory created and entered, baseline manifest written.
    DirectoryReady,
    /// The body is running.
    Running,
    /// The body finished and the directory was restored.
    Settled,
}

/// An open session: owns the working directory until dropped.
pub struct Session {
    env: TestEnv,
    state: SessionState,
    // Field order matters: the directory is restored before the lock is released.
    cwd: CwdGuard,
    _lock: MutexGuard<'static, ()>,
}

impl Session {
    /// Wait for exclusive use of the working directory, then create and enter
    /// a fresh session directory.
    pub async fn open(name: &str, config: &HarnessConfig) -> Result<Self> {
        tracing::debug!(spec = name, state = ?SessionState::Init, "opening session");
        let lock = CWD_LOCK.lock().await;

        let root = HarnessError::with_io_context(
            std::path::absolute(&config.test_root),
            format!("resolving {}", config.test_root.display()),
        )?;
        HarnessError::with_io_context(
            std::fs::create_dir_all(&root),
            format!("creating {}", root.display()),
        )?;
        let working_dir = root.join(session_dir_name(name));
        HarnessError::with_io_context(
            std::fs::create_dir(&working_dir),
            format!("creating {}", working_dir.display()),
        )?;

        let cwd = CwdGuard::enter(&working_dir)?;
        let config = HarnessConfig {
            test_root: root,
            ..config.clone()
        };
        let env = TestEnv::new(Arc::new(config), working_dir);
        fixture::pkg(&env.working_dir)?;

        let state = SessionState::DirectoryReady;
        tracing::debug!(spec = name, dir = %env.working_dir.display(), ?state, "session ready");
        Ok(Self {
            env,
            state,
            cwd,
            _lock: lock,
        })
    }

    /// The session's paths.
    #[must_use]
    pub const fn env(&self) -> &TestEnv {
        &self.env
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, state: SessionState) {
        tracing::debug!(from = ?self.state, to = ?state, dir = %self.env.working_dir.display(), "session transition");
        self.state = state;
    }

    /// Restore the previous working directory and release the lock.
    pub fn close(mut self) {
        self.transition(SessionState::Settled);
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("env", &self.env)
            .field("state", &self.state)
            .field("saved_cwd", &self.cwd.saved)
            .finish_non_exhaustive()
    }
}

/// Directory name for a session of `name`: `<stem>-<HH-MM-SS>-<pid>-<seq>`.
///
/// The time of day is UTC, not local time.
#[must_use]
pub fn session_dir_name(name: &str) -> String {
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("{}-{}-{}-{seq}", stem(name), clock(), std::process::id())
}

fn stem(name: &str) -> String {
    let base = Path::new(name)
        .file_name()
        .and_then(OsStr::to_str)
        .unwrap_or(name);
    let stem: String = base
        .chars()
        .filter(|c| *c != '.')
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if stem.is_empty() { "spec".to_string() } else { stem }
}

/// UTC time of day as `HH-MM-SS`.
fn clock() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs())
        % 86_400;
    format!("{:02}-{:02}-{:02}", secs / 3600, secs / 60 % 60, secs % 60)
}

/// Completion signal handed to callback-style bodies.
///
/// Dropping it without calling [`complete`](Self::complete) or
/// [`fail`](Self::fail) fails the spec with [`HarnessError::DoneDropped`].
pub struct Done<T = ()> {
    tx: oneshot::Sender<Result<T>>,
}

impl<T> Done<T> {
    /// Settle the spec successfully with `value`.
    pub fn complete(self, value: T) {
        self.settle(Ok(value));
    }

    /// Fail the spec with `err`.
    pub fn fail(self, err: HarnessError) {
        self.settle(Err(err));
    }

    /// Settle the spec with `result`.
    pub fn settle(self, result: Result<T>) {
        let _ = self.tx.send(result);
    }
}

impl Done {
    /// Settle a unit spec successfully.
    pub fn finish(self) {
        self.complete(());
    }
}

impl<T> fmt::Debug for Done<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Done")
            .field("settled", &self.tx.is_closed())
            .finish()
    }
}

/// Body of a future-style spec.
pub type FutureBody<T> = Box<dyn FnOnce(TestEnv) -> BoxFuture<'static, Result<T>> + Send>;

/// Body of a callback-style spec.
pub type CallbackBody<T> = Box<dyn FnOnce(TestEnv, Done<T>) -> BoxFuture<'static, Result<()>> + Send>;

/// How a spec reports completion.
pub enum SpecBody<T> {
    /// The body's own result settles the spec.
    Future(FutureBody<T>),
    /// The body settles the spec through a [`Done`] signal.
    Callback(CallbackBody<T>),
}

impl<T> fmt::Debug for SpecBody<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Future(_) => f.write_str("Future(..)"),
            Self::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

/// Result of running a [`Spec`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecOutcome<T> {
    /// The body ran and succeeded.
    Passed(T),
    /// The spec was disabled.
    Skipped,
}

impl<T> SpecOutcome<T> {
    /// Check if the spec was skipped.
    #[must_use]
    pub const fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped)
    }

    /// The body's value, if it ran.
    #[must_use]
    pub fn into_passed(self) -> Option<T> {
        match self {
            Self::Passed(value) => Some(value),
            Self::Skipped => None,
        }
    }
}

/// A named test body bound to a fresh session when run.
#[derive(Debug)]
pub struct Spec<T = ()> {
    name: String,
    body: SpecBody<T>,
    disabled: bool,
}

impl<T: Send + 'static> Spec<T> {
    /// A spec settled by the body's own result.
    pub fn new<F, Fut>(name: impl Into<String>, body: F) -> Self
    where
        F: FnOnce(TestEnv) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            name: name.into(),
            body: SpecBody::Future(Box::new(move |env| Box::pin(body(env)))),
            disabled: false,
        }
    }

    /// A spec settled through a [`Done`] signal.
    pub fn with_done<F, Fut>(name: impl Into<String>, body: F) -> Self
    where
        F: FnOnce(TestEnv, Done<T>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            body: SpecBody::Callback(Box::new(move |env, done| Box::pin(body(env, done)))),
            disabled: false,
        }
    }

    /// Skip the body when run.
    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    /// The spec's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The body.
    #[must_use]
    pub const fn body(&self) -> &SpecBody<T> {
        &self.body
    }

    /// Run the body in a fresh session.
    pub async fn run(self, config: &HarnessConfig) -> Result<SpecOutcome<T>> {
        if self.disabled {
            tracing::debug!(spec = %self.name, "spec disabled, skipping");
            return Ok(SpecOutcome::Skipped);
        }
        execute(&self.name, config, self.body).await.map(SpecOutcome::Passed)
    }
}

async fn execute<T>(name: &str, config: &HarnessConfig, body: SpecBody<T>) -> Result<T> {
    let mut session = Session::open(name, config).await?;
    session.transition(SessionState::Running);
    let env = session.env().clone();

    let outcome = match body {
        SpecBody::Future(body) => body(env).await,
        SpecBody::Callback(body) => {
            let (tx, rx) = oneshot::channel();
            match body(env, Done { tx }).await {
                Ok(()) => rx.await.unwrap_or(Err(HarnessError::DoneDropped)),
                Err(err) => Err(err),
            }
        }
    };

    session.close();
    outcome
}

/// Run a future-style body in a fresh session.
pub async fn spec<T, F, Fut>(name: &str, config: &HarnessConfig, body: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(TestEnv) -> Fut + Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    execute(name, config, Spec::new(name, body).body).await
}

/// Run a callback-style body in a fresh session.
pub async fn spec_with_done<T, F, Fut>(name: &str, config: &HarnessConfig, body: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(TestEnv, Done<T>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    execute(name, config, Spec::with_done(name, body).body).await
}
