//! pipeline-harness: integration tests for a build pipeline driven as a subprocess
//!
//! This crate runs an external build tool (a bundler started as
//! `node <entry-script>`, with the loader under test plugged in) inside an
//! isolated working directory and asserts on its console output and on the
//! files it writes.
//!
//! # Features
//!
//! - **Output matching**: declare an unordered batch of expected fragments
//!   across stdout and stderr and await it; any chunk the batch did not
//!   anticipate fails it
//! - **Isolated sessions**: every spec gets a fresh directory and the process
//!   working directory is restored on every exit path
//! - **Watch mode**: every rebuild is broadcast to all waiting tests
//! - **Config composition**: the tool's configuration is a JSON template
//!   transformed by a list of mutators
//!
//! # Example
//!
//! ```ignore
//! use pipeline_harness::prelude::*;
//!
//! #[tokio::test]
//! async fn reports_type_errors() -> Result<()> {
//!     let config = HarnessConfig::load()?;
//!     spec(file!(), &config, |env| async move {
//!         env.src("index.ts", "function f(a: number) {}\nf('1');")?;
//!         write_config(&env, &base_config(&env))?;
//!
//!         let tool = exec(&env, ["--config", "webpack.config.js"])?;
//!         tool.expect([
//!             stderr("Checking finished with 1 errors"),
//!             stdout(["ERROR in [at-loader]", "TS2345"]),
//!         ])
//!         .await?;
//!         tool.close();
//!         Ok(())
//!     })
//!     .await
//! }
//! ```

// Core types
pub mod config;
pub mod error;
pub mod logging;
pub mod prelude;
pub mod types;

// Engines
pub mod expect;
pub mod process;
pub mod util;
pub mod watch;

// Sessions and the tool
pub mod assertions;
pub mod compose;
pub mod fixture;
pub mod session;
pub mod tool;

pub use assertions::{check_output, expect_errors, read_output};
pub use compose::{Mutator, base_config, compose, deep_merge, write_config};
pub use config::{EnvOverrides, HarnessConfig};
pub use error::{HarnessError, Result, SpawnError};
pub use expect::{Expectation, Matcher, OutputMatcher, SharedMatcher, Term, Test};
pub use fixture::Fixture;
pub use process::{OutputSink, ProcessHandle, SpawnOptions, spawn};
pub use session::{Done, Session, SessionState, Spec, SpecBody, SpecOutcome, TestEnv, spec, spec_with_done};
pub use tool::{CompileReport, Exec, ToolWatch, compile, exec, watch_with};
pub use types::{OutputEvent, ProcessExitStatus, Stream};
pub use util::TimeoutExt;
pub use watch::{BroadcastWatch, CompileFailure, Outcome, Waiter};
